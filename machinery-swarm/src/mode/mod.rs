//! Swarm Mode subsystem (spec §4.4): join protocol, leave, the manager
//! picker, and network creation. Stack deploy lives in [`stack`] since its
//! compose-linearization machinery is large enough to stand alone.

pub mod stack;

use machinery_core::error::{MachineryError, Result};
use machinery_model::Network;
use machinery_remote::ssh::UnixRemote;
use machinery_tool::runner::{RunOptions, Tool, ToolRunner};
use rand::seq::SliceRandom;
use tracing::{info, warn};

use crate::token::{generate_classic_token, TokenPair, TokenStore};

/// One row of `docker node ls`, enough to drive the join protocol and the
/// manager picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEntry {
    pub id: String,
    pub hostname: String,
    pub status: String,
    pub availability: String,
    pub manager_status: String,
}

impl NodeEntry {
    pub fn is_manager(&self) -> bool {
        !self.manager_status.trim().is_empty() && self.manager_status.trim() != "-"
    }

    pub fn is_running(&self) -> bool {
        self.status.eq_ignore_ascii_case("ready") || self.status.eq_ignore_ascii_case("active")
    }
}

/// A machine's role under Swarm Mode (spec §4.4 "Mode classification").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Manager,
    Worker,
    None,
}

impl Role {
    pub fn classify(is_master: bool, swarm_explicitly_disabled: bool) -> Role {
        if swarm_explicitly_disabled {
            return Role::None;
        }
        if is_master {
            Role::Manager
        } else {
            Role::Worker
        }
    }
}

/// Queries `docker node ls` on `manager_machine` and parses the result.
pub fn node_ls(runner: &ToolRunner, manager_machine: &str) -> Result<Vec<NodeEntry>> {
    let remote = UnixRemote::new(runner, manager_machine);
    let lines = remote.exec(&["docker".to_string(), "node".to_string(), "ls".to_string()], false)?;
    let records = machinery_tool::table::parse_table(&lines, &[("MANAGER STATUS", "manager_status")]);
    Ok(records
        .into_iter()
        .map(|r| NodeEntry {
            id: r.get("id").cloned().unwrap_or_default().trim_start_matches('*').trim().to_string(),
            hostname: r.get("hostname").cloned().unwrap_or_default(),
            status: r.get("status").cloned().unwrap_or_default(),
            availability: r.get("availability").cloned().unwrap_or_default(),
            manager_status: r.get("manager_status").cloned().unwrap_or_default(),
        })
        .collect())
}

/// Picks uniformly at random among running machines matching `pattern`
/// (spec §4.4 "Manager picker"); `None` pattern matches everything.
pub fn pick_manager<'a>(candidates: &'a [NodeEntry], pattern: Option<&glob::Pattern>) -> Option<&'a NodeEntry> {
    let eligible: Vec<&NodeEntry> = candidates
        .iter()
        .filter(|n| n.is_manager() && n.is_running())
        .filter(|n| pattern.map(|p| p.matches(&n.hostname)).unwrap_or(true))
        .collect();
    eligible.choose(&mut rand::rng()).copied()
}

/// Result of a successful join: the node id the manager's `node ls` now
/// reports for the joining hostname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinResult {
    pub node_id: String,
}

/// Runs the full join protocol (spec §4.4 steps 1-5) for `machine_name`
/// joining as `role`. `known_managers` is the set of *other*, already
/// running managers' machine names; an empty set means this machine
/// bootstraps the swarm.
pub fn join(
    runner: &ToolRunner,
    token_store: &TokenStore,
    machine_name: &str,
    role: Role,
    known_managers: &[String],
    join_options: &[String],
) -> Result<JoinResult> {
    if known_managers.is_empty() {
        if !matches!(role, Role::Manager) {
            return Err(MachineryError::Resolution(format!(
                "no running managers and '{machine_name}' is not a manager; cannot bootstrap swarm"
            )));
        }
        return bootstrap(runner, token_store, machine_name);
    }

    let mut rng_source = known_managers.to_vec();
    rng_source.shuffle(&mut rand::rng());
    let chosen_manager = rng_source
        .first()
        .ok_or_else(|| MachineryError::Internal("empty manager list after shuffle".to_string()))?;

    let pair = match token_store.token_pair()? {
        Some(pair) => pair,
        None => refresh_tokens(runner, chosen_manager, token_store)?,
    };

    let token = match role {
        Role::Manager => &pair.manager,
        Role::Worker | Role::None => &pair.worker,
    };

    let addr = manager_addr(runner, chosen_manager)?;

    let mut args = vec![
        "docker".to_string(),
        "swarm".to_string(),
        "join".to_string(),
        "--token".to_string(),
        token.clone(),
    ];
    args.extend(join_options.iter().cloned());
    args.push(addr);

    let remote = UnixRemote::new(runner, machine_name);
    let output = remote.exec(&args, false)?;
    if !output.iter().any(|l| l.to_lowercase().contains("this node joined a swarm")) {
        warn!(machine = %machine_name, "swarm join output did not confirm success");
    }

    confirm_join(runner, chosen_manager, machine_name)
}

fn bootstrap(runner: &ToolRunner, token_store: &TokenStore, machine_name: &str) -> Result<JoinResult> {
    let remote = UnixRemote::new(runner, machine_name);
    let init_output = remote.exec(
        &["docker".to_string(), "swarm".to_string(), "init".to_string()],
        false,
    )?;
    let node_id = extract_node_id(&init_output).ok_or_else(|| {
        MachineryError::Resolution("could not parse node id from 'docker swarm init'".to_string())
    })?;

    let pair = refresh_tokens(runner, machine_name, token_store)?;
    info!(machine = %machine_name, "bootstrapped swarm, cached manager/worker join tokens");
    let _ = pair;

    Ok(JoinResult { node_id })
}

fn extract_node_id(lines: &[String]) -> Option<String> {
    for line in lines {
        if let Some(rest) = line.trim().strip_prefix("Swarm initialized: current node (") {
            return rest.split(')').next().map(str::to_string);
        }
    }
    None
}

/// Actively re-queries `docker swarm join-token -q manager`/`... worker` on
/// `manager_machine` and writes the refreshed pair to the token store.
pub fn refresh_tokens(runner: &ToolRunner, manager_machine: &str, token_store: &TokenStore) -> Result<TokenPair> {
    let remote = UnixRemote::new(runner, manager_machine);
    let manager_lines = remote.exec(
        &["docker".to_string(), "swarm".to_string(), "join-token".to_string(), "-q".to_string(), "manager".to_string()],
        false,
    )?;
    let worker_lines = remote.exec(
        &["docker".to_string(), "swarm".to_string(), "join-token".to_string(), "-q".to_string(), "worker".to_string()],
        false,
    )?;
    let pair = TokenPair {
        manager: manager_lines.first().cloned().unwrap_or_default(),
        worker: worker_lines.first().cloned().unwrap_or_default(),
    };
    token_store.write_token_pair(&pair)?;
    Ok(pair)
}

fn manager_addr(runner: &ToolRunner, manager_machine: &str) -> Result<String> {
    let remote = UnixRemote::new(runner, manager_machine);
    let lines = remote.exec(
        &[
            "docker".to_string(),
            "info".to_string(),
            "--format".to_string(),
            "{{.Swarm.NodeAddr}}".to_string(),
        ],
        false,
    )?;
    let addr = lines.first().cloned().unwrap_or_default();
    if addr.trim().is_empty() {
        return Err(MachineryError::Resolution(format!(
            "could not determine swarm address for manager '{manager_machine}'"
        )));
    }
    Ok(format!("{}:2377", addr.trim()))
}

fn confirm_join(runner: &ToolRunner, manager_machine: &str, joined_hostname: &str) -> Result<JoinResult> {
    let nodes = node_ls(runner, manager_machine)?;
    nodes
        .into_iter()
        .find(|n| machinery_core::name::name_eq_default(&n.hostname, joined_hostname) || n.hostname == joined_hostname)
        .map(|n| JoinResult { node_id: n.id })
        .ok_or_else(|| {
            MachineryError::Resolution(format!(
                "joined machine '{joined_hostname}' not found in node ls after join"
            ))
        })
}

/// Leave protocol: managers are demoted first, then the node leaves; a
/// second attempt adds `--force` if Docker asks for it.
pub fn leave(runner: &ToolRunner, machine_name: &str, is_manager: bool) -> Result<()> {
    let remote = UnixRemote::new(runner, machine_name);
    if is_manager {
        let _ = remote.exec(
            &["docker".to_string(), "node".to_string(), "demote".to_string(), machine_name.to_string()],
            false,
        );
    }
    let output = remote.exec(
        &["docker".to_string(), "swarm".to_string(), "leave".to_string()],
        false,
    )?;
    if output.iter().any(|l| l.to_lowercase().contains("--force")) {
        remote.exec(
            &["docker".to_string(), "swarm".to_string(), "leave".to_string(), "--force".to_string()],
            false,
        )?;
    }
    Ok(())
}

/// Creates `network` on `manager_machine` if it doesn't already exist
/// there (spec "Network create").
pub fn create_network(runner: &ToolRunner, manager_machine: &str, network: &Network) -> Result<()> {
    let remote = UnixRemote::new(runner, manager_machine);
    let existing = remote.exec(
        &[
            "docker".to_string(),
            "network".to_string(),
            "ls".to_string(),
            "--format".to_string(),
            "{{.Name}}".to_string(),
        ],
        false,
    )?;
    if existing.iter().any(|n| n.trim() == network.name) {
        return Ok(());
    }

    let mut args = vec![
        "docker".to_string(),
        "network".to_string(),
        "create".to_string(),
        format!("--driver={}", network.driver),
        format!("--scope={}", network.scope),
    ];
    if network.attachable {
        args.push("--attachable".to_string());
    }
    for (k, v) in &network.options {
        args.push(format!("--{k}={v}"));
    }
    args.push(network.name.clone());

    remote.exec(&args, false)?;
    Ok(())
}

/// Generates a classic Swarm discovery token, for callers operating in
/// classic mode rather than Swarm Mode (kept here since both modes share
/// the `docker run swarm create` plumbing in [`crate::token`]).
pub fn generate_discovery_token(runner: &ToolRunner) -> Result<String> {
    generate_classic_token(runner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, hostname: &str, manager: bool, running: bool) -> NodeEntry {
        NodeEntry {
            id: id.to_string(),
            hostname: hostname.to_string(),
            status: if running { "Ready".to_string() } else { "Down".to_string() },
            availability: "Active".to_string(),
            manager_status: if manager { "Leader".to_string() } else { String::new() },
        }
    }

    #[test]
    fn role_classification_matches_spec() {
        assert_eq!(Role::classify(true, false), Role::Manager);
        assert_eq!(Role::classify(false, false), Role::Worker);
        assert_eq!(Role::classify(false, true), Role::None);
        assert_eq!(Role::classify(true, true), Role::None);
    }

    #[test]
    fn picker_only_considers_running_managers() {
        let nodes = vec![
            node("1", "proj-n1", true, false),
            node("2", "proj-n2", false, true),
            node("3", "proj-n3", true, true),
        ];
        let picked = pick_manager(&nodes, None).unwrap();
        assert_eq!(picked.id, "3");
    }

    #[test]
    fn picker_honors_hostname_pattern() {
        let nodes = vec![node("1", "proj-m1", true, true), node("2", "proj-m2", true, true)];
        let pattern = glob::Pattern::new("proj-m1").unwrap();
        let picked = pick_manager(&nodes, Some(&pattern)).unwrap();
        assert_eq!(picked.id, "1");
    }

    #[test]
    fn extracts_node_id_from_init_output() {
        let lines = vec![
            "Swarm initialized: current node (abc123xyz) is now a manager.".to_string(),
        ];
        assert_eq!(extract_node_id(&lines), Some("abc123xyz".to_string()));
    }

    #[test]
    fn node_is_manager_requires_non_dash_status() {
        assert!(node("1", "n1", true, true).is_manager());
        assert!(!node("1", "n1", false, true).is_manager());
    }
}
