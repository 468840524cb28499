//! Machine Lifecycle (spec §4.2): `create`/`start`/`halt`/`destroy`/
//! `restart`/`bind`/`wait`, wrapping `docker-machine` subcommands with the
//! driver-option translation from [`crate::driver_options`] and the
//! unified [`crate::retry::RetryPolicy`].

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use machinery_core::error::Result;
use machinery_discovery::{DiscoveryCache, InterfaceAddr, MachineObservation};
use machinery_model::{ClusteringMode, Machine, MachineRunState};
use machinery_remote::ssh::{is_virtual_interface, UnixRemote};
use machinery_tool::runner::{RunOptions, Tool, ToolRunner};
use machinery_tool::table::parse_table;
use machinery_tool::version::{ToolVersion, VersionCache};
use serde_json::Value;
use tracing::{info, warn};

use crate::driver_options::{build_option_flags, translate_resources};
use crate::retry::RetryPolicy;

/// Knobs shared across every lifecycle operation for one cluster.
#[derive(Clone)]
pub struct LifecycleConfig {
    pub wait_policy: RetryPolicy,
    pub ssh_policy: RetryPolicy,
    pub driver_defaults: HashMap<String, Vec<(String, Value)>>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            wait_policy: RetryPolicy::default(),
            ssh_policy: RetryPolicy::default(),
            driver_defaults: HashMap::new(),
        }
    }
}

/// Per-machine lifecycle operations, backed by one [`ToolRunner`] and a
/// process-wide cache of each driver's recognized `create` options.
pub struct MachineLifecycle<'a> {
    runner: &'a ToolRunner,
    config: LifecycleConfig,
    versions: VersionCache,
    option_cache: Mutex<HashMap<String, HashSet<String>>>,
}

impl<'a> MachineLifecycle<'a> {
    pub fn new(runner: &'a ToolRunner, config: LifecycleConfig) -> Self {
        Self {
            runner,
            config,
            versions: VersionCache::new(),
            option_cache: Mutex::new(HashMap::new()),
        }
    }

    fn recognized_options(&self, driver: &str) -> HashSet<String> {
        {
            let cache = self.option_cache.lock().expect("option cache lock poisoned");
            if let Some(set) = cache.get(driver) {
                return set.clone();
            }
        }
        let help = self
            .runner
            .run(
                Tool::DockerMachine,
                &["create".to_string(), "--driver".to_string(), driver.to_string(), "--help".to_string()],
                &RunOptions::capture(),
            )
            .map(|out| out.lines.join("\n"))
            .unwrap_or_default();
        let recognized = machinery_tool::options::parse_recognized_options(&help);
        self.option_cache
            .lock()
            .expect("option cache lock poisoned")
            .insert(driver.to_string(), recognized.clone());
        recognized
    }

    /// Translates `machine`'s declarative fields into `docker-machine
    /// create` flags and runs it, then waits for SSH and upgrades the
    /// remote Docker if the local CLI is strictly newer (spec §4.2
    /// "create"). `classic_token` carries the classic-Swarm discovery
    /// token, if any; Swarm Mode joins occur afterward (§4.4) so no swarm
    /// flags are added here in that mode.
    pub fn create(
        &self,
        machine: &Machine,
        clustering: ClusteringMode,
        classic_token: Option<&str>,
    ) -> Result<()> {
        let driver = machine.spec.driver.clone().unwrap_or_else(|| "virtualbox".to_string());
        let mut args = vec!["create".to_string(), format!("--driver={driver}")];

        args.extend(translate_resources(&driver, machine.spec.cpu, machine.spec.memory, machine.spec.size));

        let recognized = self.recognized_options(&driver);
        let defaults = self.config.driver_defaults.get(&driver).cloned().unwrap_or_default();
        args.extend(build_option_flags(&machine.spec.options, &machine.base_dir(), &recognized, &defaults));

        if matches!(clustering, ClusteringMode::DockerSwarm) {
            let explicitly_off = machine.spec.swarm.as_ref().map(|s| s.explicitly_disabled()).unwrap_or(false);
            args.extend(machinery_swarm::join_flags(classic_token, explicitly_off, machine.is_master()));
        }

        args.push(machine.full_name.clone());
        self.runner.run(Tool::DockerMachine, &args, &RunOptions::default())?;

        self.wait_ssh(&machine.full_name)?;
        self.maybe_upgrade(&machine.full_name)?;
        Ok(())
    }

    fn wait_ssh(&self, machine_name: &str) -> Result<()> {
        let remote = UnixRemote::new(self.runner, machine_name);
        let ready = self.config.ssh_policy.poll(|| remote.exec(&["echo".to_string(), "ok".to_string()], false).ok());
        if ready.is_none() {
            warn!(machine = machine_name, "SSH never became ready within the retry budget");
        }
        Ok(())
    }

    fn maybe_upgrade(&self, machine_name: &str) -> Result<()> {
        let local_version = self
            .versions
            .get_or_probe("docker", || {
                self.runner
                    .run(Tool::Docker, &["--version".to_string()], &RunOptions::capture())
                    .ok()
                    .map(|o| o.lines.join(" "))
            });
        let Some(local_version) = local_version else { return Ok(()) };

        let remote = UnixRemote::new(self.runner, machine_name);
        let remote_version_text = remote
            .exec(&["docker".to_string(), "--version".to_string()], false)
            .ok()
            .and_then(|lines| lines.first().cloned())
            .unwrap_or_default();
        let Some(remote_version) = ToolVersion::parse(&remote_version_text) else { return Ok(()) };

        let os = remote.os_release()?;
        if local_version > remote_version && os.id != "rancheros" {
            info!(machine = machine_name, "local docker is newer, upgrading remote");
            self.runner
                .run(Tool::DockerMachine, &["upgrade".to_string(), machine_name.to_string()], &RunOptions::default())?;
        }
        Ok(())
    }

    pub fn start(&self, machine_name: &str) -> Result<()> {
        self.runner.run(Tool::DockerMachine, &["start".to_string(), machine_name.to_string()], &RunOptions::default())?;
        Ok(())
    }

    /// Graceful stop, force-kill if the machine isn't `Stopped` afterward
    /// (spec §4.2 "halt").
    pub fn halt(&self, machine_name: &str) -> Result<()> {
        self.runner.run(Tool::DockerMachine, &["stop".to_string(), machine_name.to_string()], &RunOptions::default())?;
        let state = self.wait(machine_name, &[MachineRunState::Stopped], RetryPolicy::new(1, std::time::Duration::from_secs(0)));
        if state != Some(MachineRunState::Stopped) {
            warn!(machine = machine_name, "graceful stop did not land, force-killing");
            self.runner.run(Tool::DockerMachine, &["kill".to_string(), machine_name.to_string()], &RunOptions::default())?;
        }
        Ok(())
    }

    /// `halt` then `rm -f` (spec §4.2 "destroy implies halt first").
    pub fn destroy(&self, machine_name: &str) -> Result<()> {
        self.halt(machine_name)?;
        self.runner.run(Tool::DockerMachine, &["rm".to_string(), "-f".to_string(), machine_name.to_string()], &RunOptions::default())?;
        Ok(())
    }

    pub fn restart(&self, machine_name: &str) -> Result<()> {
        self.runner.run(Tool::DockerMachine, &["restart".to_string(), machine_name.to_string()], &RunOptions::default())?;
        Ok(())
    }

    /// Polls `docker-machine ls` for `machine_name` until its state is in
    /// `acceptable`, returning the reached state or `None` on give-up
    /// (spec §4.2 "wait").
    pub fn wait(&self, machine_name: &str, acceptable: &[MachineRunState], policy: RetryPolicy) -> Option<MachineRunState> {
        policy.poll(|| {
            let rows = self
                .runner
                .run(
                    Tool::DockerMachine,
                    &["ls".to_string(), "--filter".to_string(), format!("name={machine_name}")],
                    &RunOptions::capture(),
                )
                .ok()?;
            let records = parse_table(&rows.lines, &[]);
            let state = MachineRunState::parse(records.first()?.get("state")?);
            if acceptable.contains(&state) {
                Some(state)
            } else {
                None
            }
        })
    }

    /// Merges a `docker-machine ls` row into `machine`'s live state (spec
    /// §4.2 "bind"): `state`, `url`, `active` (`-`/empty → `false`), and the
    /// swarm column if present.
    pub fn bind(machine: &mut Machine, row: &indexmap::IndexMap<String, String>) {
        if let Some(state) = row.get("state") {
            machine.state.state = Some(MachineRunState::parse(state));
        }
        machine.state.url = row.get("url").filter(|s| !s.trim().is_empty()).cloned();
        machine.state.active = row
            .get("active")
            .map(|s| {
                let trimmed = s.trim();
                !trimmed.is_empty() && trimmed != "-"
            })
            .unwrap_or(false);
        machine.state.swarm_role = row.get("swarm").filter(|s| !s.trim().is_empty()).cloned();
    }

    /// Rewrites the discovery cache for `machine` after any state-changing
    /// operation (spec §5 "The discovery cache is written after every
    /// state-changing operation on a machine").
    pub fn update_discovery(&self, cluster_origin: &Path, prefix: &str, machine: &Machine) -> Result<()> {
        let cache = DiscoveryCache::for_cluster(cluster_origin, prefix);
        let running = machine.state.state == Some(MachineRunState::Running);
        let obs = if running {
            let remote = UnixRemote::new(self.runner, &machine.full_name);
            let interfaces = remote
                .ifconfig()
                .unwrap_or_default()
                .into_iter()
                .filter(|i| !is_virtual_interface(&i.name))
                .map(|i| InterfaceAddr { name: i.name, inet: i.inet, inet6: i.inet6 })
                .collect::<Vec<_>>();
            let main_ip = interfaces.iter().find_map(|i| i.inet.clone());
            MachineObservation {
                running: true,
                interfaces,
                main_ip,
                main_hostname: Some(machine.full_name.clone()),
            }
        } else {
            MachineObservation::default()
        };
        cache.update(&machine.full_name, &machine.aliases, &obs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use machinery_model::MachineState;
    use std::path::PathBuf;

    fn sample_machine() -> Machine {
        Machine {
            short_name: "n1".to_string(),
            full_name: "proj-n1".to_string(),
            aliases: vec![],
            origin: PathBuf::from("cluster.yaml"),
            spec: Default::default(),
            state: MachineState::default(),
        }
    }

    #[test]
    fn bind_coerces_active_and_parses_state() {
        let mut machine = sample_machine();
        let mut row = indexmap::IndexMap::new();
        row.insert("state".to_string(), "Running".to_string());
        row.insert("active".to_string(), "*".to_string());
        row.insert("url".to_string(), "tcp://1.2.3.4:2376".to_string());

        MachineLifecycle::bind(&mut machine, &row);

        assert_eq!(machine.state.state, Some(MachineRunState::Running));
        assert!(machine.state.active);
        assert_eq!(machine.state.url, Some("tcp://1.2.3.4:2376".to_string()));
    }

    #[test]
    fn bind_treats_dash_active_as_false() {
        let mut machine = sample_machine();
        let mut row = indexmap::IndexMap::new();
        row.insert("active".to_string(), "-".to_string());
        MachineLifecycle::bind(&mut machine, &row);
        assert!(!machine.state.active);
    }
}
