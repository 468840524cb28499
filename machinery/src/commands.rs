//! Handlers for each CLI subcommand (spec §6), each a thin call into the
//! core crates plus the bookkeeping needed to thread live machine state
//! between them.

use machinery_core::error::{MachineryError, Result};
use machinery_discovery::DEFAULT_PREFIX;
use machinery_lifecycle::{LifecycleConfig, MachineLifecycle};
use machinery_model::{Cluster, ClusteringMode, Machine, MachineRunState};
use machinery_remote::ssh::UnixRemote;
use machinery_share::rsync::Direction;
use machinery_swarm::{Role, TokenStore};
use machinery_tool::runner::{RunOptions, Tool, ToolRunner};
use tracing::info;

use crate::{bound_row, warn_and_continue};

fn bind_current(runner: &ToolRunner, machine: &mut Machine) {
    if let Some(row) = bound_row(runner, &machine.full_name) {
        MachineLifecycle::bind(machine, &row);
    }
}

/// Creates or starts every machine, joins Swarm if configured, then runs
/// the full Init Pipeline (spec §6 "up").
pub fn up(runner: &ToolRunner, cluster: &Cluster) -> Result<()> {
    let mut machines = cluster.machines.clone();
    if matches!(cluster.options.clustering, ClusteringMode::DockerSwarm) {
        machinery_swarm::enforce_single_master(&mut machines);
    }

    let token_store = TokenStore::for_cluster(&cluster.origin);
    let classic_token = classic_token_for(runner, cluster, &token_store)?;

    let lifecycle = MachineLifecycle::new(runner, LifecycleConfig::default());
    let mut known_managers: Vec<String> = Vec::new();

    for machine in &mut machines {
        match bound_row(runner, &machine.full_name) {
            None => lifecycle.create(machine, cluster.options.clustering, classic_token.as_deref())?,
            Some(row) => {
                MachineLifecycle::bind(machine, &row);
                if machine.state.state != Some(MachineRunState::Running) {
                    lifecycle.start(&machine.full_name)?;
                }
            }
        }
        bind_current(runner, machine);
        lifecycle.update_discovery(&cluster.origin, DEFAULT_PREFIX, machine)?;

        if matches!(cluster.options.clustering, ClusteringMode::SwarmMode) {
            let explicitly_off = machine.spec.swarm.as_ref().map(|s| s.explicitly_disabled()).unwrap_or(false);
            let role = Role::classify(machine.is_master(), explicitly_off);
            if !matches!(role, Role::None) {
                match machinery_swarm::join(runner, &token_store, &machine.full_name, role, &known_managers, &[]) {
                    Ok(_) if matches!(role, Role::Manager) => known_managers.push(machine.full_name.clone()),
                    Ok(_) => {}
                    Err(e) => warn_and_continue("swarm join", e),
                }
            }
        }
    }

    let resolved_cluster = Cluster {
        machines,
        ..cluster.clone()
    };
    let init_ctx = machinery_init::InitContext {
        runner,
        vbox_binary: "VBoxManage".to_string(),
        caching_patterns: resolved_cluster.machines.iter().flat_map(|m| m.spec.caching.clone()).collect(),
        global_cache_disable: false,
    };
    machinery_init::run(&init_ctx, &resolved_cluster, &[])
}

fn classic_token_for(runner: &ToolRunner, cluster: &Cluster, token_store: &TokenStore) -> Result<Option<String>> {
    if !matches!(cluster.options.clustering, ClusteringMode::DockerSwarm) {
        return Ok(None);
    }
    if let Some(token) = token_store.classic_token()? {
        return Ok(Some(token));
    }
    let token = machinery_swarm::token::generate_classic_token(runner)?;
    token_store.write_classic_token(&token)?;
    Ok(Some(token))
}

pub fn halt(runner: &ToolRunner, cluster: &Cluster) -> Result<()> {
    let lifecycle = MachineLifecycle::new(runner, LifecycleConfig::default());
    for machine in &cluster.machines {
        if let Err(e) = lifecycle.halt(&machine.full_name) {
            warn_and_continue(&machine.full_name, e);
        }
    }
    Ok(())
}

pub fn destroy(runner: &ToolRunner, cluster: &Cluster) -> Result<()> {
    let lifecycle = MachineLifecycle::new(runner, LifecycleConfig::default());
    for machine in &cluster.machines {
        if let Err(e) = lifecycle.destroy(&machine.full_name) {
            warn_and_continue(&machine.full_name, e);
        }
    }
    Ok(())
}

pub fn restart(runner: &ToolRunner, cluster: &Cluster) -> Result<()> {
    let lifecycle = MachineLifecycle::new(runner, LifecycleConfig::default());
    for machine in &cluster.machines {
        if let Err(e) = lifecycle.restart(&machine.full_name) {
            warn_and_continue(&machine.full_name, e);
        }
    }
    Ok(())
}

/// Re-runs the Init Pipeline, honoring `-steps` glob abbreviations (spec
/// §6 "reinit").
pub fn reinit(runner: &ToolRunner, cluster: &Cluster, steps: &[String]) -> Result<()> {
    let init_ctx = machinery_init::InitContext {
        runner,
        vbox_binary: "VBoxManage".to_string(),
        caching_patterns: cluster.machines.iter().flat_map(|m| m.spec.caching.clone()).collect(),
        global_cache_disable: false,
    };
    machinery_init::run(&init_ctx, cluster, steps)
}

/// Prints the `docker-machine env` lines for one machine (spec §6 "env").
pub fn env(runner: &ToolRunner, cluster: &Cluster, name: &str, force: bool) -> Result<()> {
    let machine = find_machine(cluster, name)?;
    let mut args = vec!["env".to_string(), machine.full_name.clone()];
    if force {
        args.insert(1, "--shell".to_string());
        args.insert(2, "none".to_string());
    }
    let output = runner.run(Tool::DockerMachine, &args, &RunOptions::capture())?;
    for line in output.lines {
        println!("{line}");
    }
    Ok(())
}

pub fn ssh(runner: &ToolRunner, cluster: &Cluster, name: &str, cmd: &[String]) -> Result<()> {
    let machine = find_machine(cluster, name)?;
    let remote = UnixRemote::new(runner, &machine.full_name);
    let interactive = cmd.is_empty();
    let command = if cmd.is_empty() { vec!["bash".to_string(), "-l".to_string()] } else { cmd.to_vec() };
    let lines = remote.exec(&command, interactive)?;
    for line in lines {
        println!("{line}");
    }
    Ok(())
}

pub fn ps(runner: &ToolRunner, cluster: &Cluster, names: &[String]) -> Result<()> {
    let targets: Vec<&Machine> = if names.is_empty() {
        cluster.machines.iter().collect()
    } else {
        names.iter().filter_map(|n| cluster.find(n)).collect()
    };
    for machine in targets {
        let remote = UnixRemote::new(runner, &machine.full_name);
        println!("== {} ==", machine.full_name);
        match remote.ps() {
            Ok(procs) => {
                for p in procs {
                    println!("{:>8}  {}", p.pid, p.command);
                }
            }
            Err(e) => warn_and_continue(&machine.full_name, e),
        }
    }
    Ok(())
}

pub fn ls(runner: &ToolRunner, cluster: &Cluster) -> Result<()> {
    for machine in &cluster.machines {
        let mut m = machine.clone();
        bind_current(runner, &mut m);
        println!(
            "{:<24} {:<10} {:<8} {}",
            m.full_name,
            m.state.state.map(|s| format!("{s:?}")).unwrap_or_else(|| "unknown".to_string()),
            if m.state.active { "active" } else { "-" },
            m.state.url.unwrap_or_default(),
        );
    }
    Ok(())
}

pub fn token(runner: &ToolRunner, cluster: &Cluster, force: bool) -> Result<()> {
    let store = TokenStore::for_cluster(&cluster.origin);
    if force {
        let token = machinery_swarm::token::generate_classic_token(runner)?;
        store.write_classic_token(&token)?;
        println!("{token}");
        return Ok(());
    }
    match store.classic_token()? {
        Some(token) => println!("{token}"),
        None => {
            let token = machinery_swarm::token::generate_classic_token(runner)?;
            store.write_classic_token(&token)?;
            println!("{token}");
        }
    }
    Ok(())
}

pub fn swarm(runner: &ToolRunner, cluster: &Cluster) -> Result<()> {
    let Some(master) = cluster.machines.iter().find(|m| m.is_master()) else {
        return Err(MachineryError::Resolution("no master machine in this cluster".to_string()));
    };
    let nodes = machinery_swarm::node_ls(runner, &master.full_name)?;
    for node in nodes {
        println!(
            "{:<26} {:<10} {}",
            node.hostname,
            node.status,
            if node.is_manager() { "manager" } else { "worker" }
        );
    }
    Ok(())
}

pub fn node(runner: &ToolRunner, cluster: &Cluster) -> Result<()> {
    swarm(runner, cluster)
}

/// Deploys every `applications:` stack not already running on the master,
/// resolved against the live `docker stack ls` (spec §6 "stack").
pub fn stack(runner: &ToolRunner, cluster: &Cluster) -> Result<()> {
    let Some(master) = cluster.machines.iter().find(|m| m.is_master()) else {
        return Err(MachineryError::Resolution("no master machine in this cluster".to_string()));
    };
    for app in &cluster.applications {
        match machinery_swarm::stack::is_running(runner, &master.full_name, &app.name) {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => {
                warn_and_continue(&app.name, e);
                continue;
            }
        }
        let compose_path = cluster.origin.parent().unwrap_or_else(|| std::path::Path::new(".")).join(&app.file);
        if let Err(e) = machinery_swarm::stack::deploy(runner, &master.full_name, &compose_path, &app.name, &[]) {
            warn_and_continue(&app.name, e);
        }
    }
    Ok(())
}

/// Re-syncs every `rsync`-backed share on every machine, in `op`'s
/// direction (spec §6 "sync -op get|put").
pub fn sync(runner: &ToolRunner, cluster: &Cluster, op: &str) -> Result<()> {
    let direction = match op {
        "get" => Direction::Get,
        "put" => Direction::Put,
        other => {
            return Err(MachineryError::Config(format!("unknown sync op '{other}', expected get or put")));
        }
    };
    for machine in &cluster.machines {
        let driver = machine.spec.driver.as_deref().unwrap_or("virtualbox");
        for share in &machine.spec.shares {
            let resolved = machinery_share::resolve_share(share, driver)?;
            if resolved.share_type != machinery_share::ShareType::Rsync {
                continue;
            }
            if let Err(e) = machinery_init::ops::sync_share(runner, &machine.full_name, &resolved.host, &resolved.guest, direction) {
                warn_and_continue(&machine.full_name, e);
            }
        }
    }
    Ok(())
}

/// Filters machine names/aliases by substring match against every
/// supplied pattern (spec §6 "search PATTERN...").
pub fn search(cluster: &Cluster, patterns: &[String]) -> Result<()> {
    for machine in &cluster.machines {
        let haystacks: Vec<&str> = std::iter::once(machine.full_name.as_str())
            .chain(machine.aliases.iter().map(String::as_str))
            .collect();
        let matched = patterns.is_empty() || patterns.iter().any(|p| haystacks.iter().any(|h| h.contains(p.as_str())));
        if matched {
            println!("{}", machine.full_name);
        }
    }
    Ok(())
}

/// Runs `cmd` over SSH on every machine whose name matches `pattern`,
/// optionally restricted to a name prefix (spec §6 "forall").
pub fn forall(runner: &ToolRunner, cluster: &Cluster, restrict: Option<&str>, pattern: Option<&str>, cmd: &[String]) -> Result<()> {
    if cmd.is_empty() {
        return Err(MachineryError::Config("forall requires a command to run".to_string()));
    }
    for machine in &cluster.machines {
        if let Some(prefix) = restrict {
            if !machine.full_name.starts_with(prefix) {
                continue;
            }
        }
        if let Some(pattern) = pattern {
            if !machine.full_name.contains(pattern) {
                continue;
            }
        }
        let remote = UnixRemote::new(runner, &machine.full_name);
        info!(machine = %machine.full_name, "forall");
        match remote.exec(cmd, false) {
            Ok(lines) => {
                for line in lines {
                    println!("{}: {}", machine.full_name, line);
                }
            }
            Err(e) => warn_and_continue(&machine.full_name, e),
        }
    }
    Ok(())
}

fn find_machine<'a>(cluster: &'a Cluster, name: &str) -> Result<&'a Machine> {
    cluster
        .find(name)
        .ok_or_else(|| MachineryError::Resolution(format!("no machine named '{name}' in this cluster")))
}
