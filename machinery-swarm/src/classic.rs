//! Classic (token-discovery) Swarm: master election and per-machine join
//! flags (spec §2 "Swarm Classic", §4.2 "Swarm handling at create time").

use machinery_model::Machine;
use tracing::warn;

/// Enforces invariant 2 (§3): at most one machine may have `master=true` in
/// classic mode. The first `master: true` machine found wins; any later
/// ones are demoted to `false` with a `WARN` (spec §7.5, §8 scenario 2).
pub fn enforce_single_master(machines: &mut [Machine]) {
    let mut seen_master = false;
    for machine in machines.iter_mut() {
        if machine.spec.master.unwrap_or(false) {
            if seen_master {
                warn!(
                    machine = %machine.full_name,
                    "multiple masters declared under classic Swarm, demoting"
                );
                machine.spec.master = Some(false);
            } else {
                seen_master = true;
            }
        }
    }
}

/// Builds the `docker-machine create` flags classic Swarm contributes
/// (spec §4.2): only when a token is known and `swarm` is not explicitly
/// `false`.
pub fn join_flags(token: Option<&str>, swarm_explicitly_off: bool, is_master: bool) -> Vec<String> {
    let mut flags = Vec::new();
    let Some(token) = token else {
        return flags;
    };
    if swarm_explicitly_off {
        return flags;
    }
    flags.push("--swarm".to_string());
    flags.push("--swarm-discovery".to_string());
    flags.push(format!("token://{token}"));
    if is_master {
        flags.push("--swarm-master".to_string());
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use machinery_model::{MachineSpec, MachineState};
    use std::path::PathBuf;

    fn machine(name: &str, master: bool) -> Machine {
        Machine {
            short_name: name.to_string(),
            full_name: format!("proj-{name}"),
            aliases: vec![],
            origin: PathBuf::from("cluster.yaml"),
            spec: MachineSpec {
                master: Some(master),
                ..Default::default()
            },
            state: MachineState::default(),
        }
    }

    #[test]
    fn first_master_survives_second_is_demoted() {
        let mut machines = vec![machine("n1", true), machine("n2", true), machine("n3", false)];
        enforce_single_master(&mut machines);
        assert!(machines[0].spec.master.unwrap());
        assert!(!machines[1].spec.master.unwrap());
        assert!(!machines[2].spec.master.unwrap());
    }

    #[test]
    fn no_masters_is_a_no_op() {
        let mut machines = vec![machine("n1", false), machine("n2", false)];
        enforce_single_master(&mut machines);
        assert!(!machines[0].spec.master.unwrap());
        assert!(!machines[1].spec.master.unwrap());
    }

    #[test]
    fn join_flags_require_token_and_not_explicitly_off() {
        assert!(join_flags(None, false, true).is_empty());
        assert!(join_flags(Some("tok"), true, true).is_empty());

        let flags = join_flags(Some("tok"), false, true);
        assert_eq!(flags, vec!["--swarm", "--swarm-discovery", "token://tok", "--swarm-master"]);

        let worker_flags = join_flags(Some("tok"), false, false);
        assert!(!worker_flags.contains(&"--swarm-master".to_string()));
    }
}
