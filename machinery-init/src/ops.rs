//! Per-machine implementations of each Init Pipeline step (spec §4.3).
//!
//! Every function here operates on one already-running [`Machine`]; ordering
//! and the worker/manager phase split live in [`crate::pipeline`].

use std::path::Path;

use machinery_core::error::{MachineryError, Result};
use machinery_model::{ExecSpec, Machine, Network};
use machinery_remote::ssh::UnixRemote;
use machinery_remote::VBoxRemote;
use machinery_share::rsync::{build_rsync_args, derive_ssh_command, install_command, installer_for, Direction};
use machinery_share::{resolve_share, ShareType};
use machinery_tool::runner::{RunOptions, Tool, ToolRunner};
use tracing::warn;

use crate::docker_env::endpoint_for_machine;

/// Registers every `shares:` entry on `machine`. `vboxsf` shares require a
/// halt/restart cycle (handled by [`machinery_share::vboxsf::attach`]
/// itself plus a restart issued here); `rsync` shares install the tool if
/// missing and run one initial `put` sync.
pub fn apply_shares(runner: &ToolRunner, vbox_binary: &str, machine: &Machine, is_running: bool) -> Result<()> {
    if machine.spec.shares.is_empty() {
        return Ok(());
    }
    let driver = machine.spec.driver.as_deref().unwrap_or("virtualbox");
    let remote = UnixRemote::new(runner, &machine.full_name);
    let identity = remote.id()?;

    for (idx, spec) in machine.spec.shares.iter().enumerate() {
        let resolved = resolve_share(spec, driver)?;
        let host_path = machinery_mount::resolve(&resolved.host)?;
        match resolved.share_type {
            ShareType::VboxSf => {
                let vbox = VBoxRemote::new(vbox_binary);
                let share_name = format!("{}-share{idx}", machine.short_name);
                vboxsf_attach(
                    &vbox,
                    &remote,
                    &machine.full_name,
                    &host_path,
                    &share_name,
                    &resolved.guest,
                    &identity.uid,
                    is_running,
                )?;
            }
            ShareType::Rsync => {
                ensure_rsync_installed(&remote)?;
                sync_share(runner, &machine.full_name, &host_path.to_string_lossy(), &resolved.guest, Direction::Put)?;
            }
        }
    }
    Ok(())
}

/// Thin wrapper over [`machinery_share::vboxsf::attach`]: the attach call
/// halts the VM itself if needed but leaves restarting it to the lifecycle
/// engine, which runs right after this step in the pipeline.
fn vboxsf_attach(
    vbox: &VBoxRemote,
    remote: &UnixRemote,
    vm_name: &str,
    host_path: &Path,
    share_name: &str,
    guest_path: &str,
    guest_uid: &str,
    is_running: bool,
) -> Result<()> {
    machinery_share::vboxsf::attach(vbox, remote, vm_name, host_path, share_name, guest_path, guest_uid, is_running)
}

fn ensure_rsync_installed(remote: &UnixRemote) -> Result<()> {
    let present = remote.exec(&["which".to_string(), "rsync".to_string()], false).map(|l| !l.is_empty()).unwrap_or(false);
    if present {
        return Ok(());
    }
    let os = remote.os_release()?;
    let installer = installer_for(&os);
    match install_command(installer) {
        Some(cmd) => {
            remote.exec(&["sh".to_string(), "-c".to_string(), cmd.to_string()], false)?;
            Ok(())
        }
        None => {
            warn!(os = %os.id, "no known rsync installer for this guest, share sync may fail");
            Ok(())
        }
    }
}

/// Runs one `rsync` transfer in `direction`, deriving the SSH invocation
/// `docker-machine --debug ssh` would use so the connection parameters
/// (identity file, strict host key checking) match exactly.
pub fn sync_share(runner: &ToolRunner, machine_name: &str, host_path: &str, guest_path: &str, direction: Direction) -> Result<()> {
    let debug_output = runner.run(
        Tool::DockerMachine,
        &["--debug".to_string(), "ssh".to_string(), machine_name.to_string(), "true".to_string()],
        &RunOptions {
            capture: true,
            merge_stderr: true,
            ..Default::default()
        },
    )?;
    let ssh_command = derive_ssh_command(&debug_output.lines)?;
    let remote_host = ssh_command
        .split_whitespace()
        .last()
        .ok_or_else(|| MachineryError::Resolution("could not extract remote host from ssh command".to_string()))?
        .to_string();

    let rsync_args = build_rsync_args(&ssh_command, host_path, &remote_host, guest_path, direction);
    duct::cmd("rsync", &rsync_args)
        .stderr_to_stdout()
        .run()
        .map_err(|e| MachineryError::Tool(format!("rsync: {e}")))?;
    Ok(())
}

/// Copies every `files:` entry to `machine`, resolving `source` relative to
/// the cluster file's directory (spec §4.3 "files").
pub fn apply_files(runner: &ToolRunner, machine: &Machine) -> Result<()> {
    for file in &machine.spec.files {
        let resolved = machinery_mount::resolve(&file.source)?;
        let source = if resolved.is_absolute() {
            resolved
        } else {
            machine.base_dir().join(resolved)
        };
        let destination = format!("{}:{}", machine.full_name, file.destination);
        runner.run(
            Tool::DockerMachine,
            &["scp".to_string(), source.to_string_lossy().to_string(), destination],
            &RunOptions::default(),
        )?;
    }
    Ok(())
}

/// Runs `exec_specs` in order: bare commands and host-targeted scripts run
/// locally, `guest: true` scripts run over SSH (spec §4.3 "prelude" and
/// "addendum", which share the same exec shape).
pub fn run_exec_specs(runner: &ToolRunner, machine: &Machine, exec_specs: &[ExecSpec]) -> Result<()> {
    let remote = UnixRemote::new(runner, &machine.full_name);
    for spec in exec_specs {
        match spec {
            ExecSpec::Command(command) => run_host_shell(command)?,
            ExecSpec::Script { script, guest: true } => {
                remote.exec(&["sh".to_string(), "-c".to_string(), script.clone()], false)?;
            }
            ExecSpec::Script { script, guest: false } => run_host_shell(script)?,
        }
    }
    Ok(())
}

fn run_host_shell(command: &str) -> Result<()> {
    duct::cmd("sh", ["-c", command])
        .stderr_to_stdout()
        .run()
        .map_err(|e| MachineryError::Tool(format!("host exec failed: {e}")))?;
    Ok(())
}

/// Logs into every `registries:` entry on `machine` (spec §4.3
/// "registries").
pub fn apply_registries(runner: &ToolRunner, machine: &Machine) -> Result<()> {
    let remote = UnixRemote::new(runner, &machine.full_name);
    for registry in &machine.spec.registries {
        let mut args = vec!["docker".to_string(), "login".to_string()];
        match (&registry.username, &registry.password) {
            (Some(user), Some(pass)) => {
                args.push("-u".to_string());
                args.push(user.clone());
                args.push("-p".to_string());
                args.push(pass.clone());
            }
            _ => warn!(registry = %registry.url, "no credentials supplied, attempting anonymous login"),
        }
        args.push(registry.url.clone());
        remote.exec(&args, false)?;
    }
    Ok(())
}

/// Caches or pulls every `images:` entry onto `machine` (spec §4.5, §4.3
/// "images"). `caching_patterns` and `global_disable` come from the
/// cluster's caching configuration.
pub fn apply_images(runner: &ToolRunner, machine: &Machine, caching_patterns: &[String], global_disable: bool) -> Result<()> {
    if machine.spec.images.is_empty() {
        return Ok(());
    }
    let local = machinery_image::DockerEndpoint::local();
    let target = endpoint_for_machine(runner, &machine.full_name)?;

    for image in &machine.spec.images {
        if machinery_image::cache_enabled(image, caching_patterns, global_disable) {
            machinery_image::cache_image(runner, &local, &target, image, |tmp_path| {
                let remote_path = format!("/tmp/{}", tmp_path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| "machinery-img.tar".to_string()));
                runner.run(
                    Tool::DockerMachine,
                    &["scp".to_string(), tmp_path.to_string_lossy().to_string(), format!("{}:{remote_path}", machine.full_name)],
                    &RunOptions::default(),
                )?;
                Ok(())
            })?;
        } else {
            machinery_image::pull_direct(runner, &target, image)?;
        }
    }
    Ok(())
}

/// Creates every cluster-level network on `machine` when it's a Swarm Mode
/// manager (spec §4.3 "networks", manager-only).
pub fn apply_networks(runner: &ToolRunner, manager_machine: &str, networks: &[Network]) -> Result<()> {
    for network in networks {
        machinery_swarm::create_network(runner, manager_machine, network)?;
    }
    Ok(())
}

/// Applies `labels:` to `machine`'s swarm node entry (spec §4.3 "labels",
/// manager-only: run against the manager that owns the node).
pub fn apply_labels(runner: &ToolRunner, manager_machine: &str, node_hostname: &str, labels: &indexmap::IndexMap<String, String>) -> Result<()> {
    if labels.is_empty() {
        return Ok(());
    }
    let remote = UnixRemote::new(runner, manager_machine);
    let mut args = vec!["docker".to_string(), "node".to_string(), "update".to_string()];
    for (key, value) in labels {
        args.push("--label-add".to_string());
        args.push(format!("{key}={value}"));
    }
    args.push(node_hostname.to_string());
    remote.exec(&args, false)?;
    Ok(())
}

/// Runs every `compose:` project on `machine` via classic
/// `docker-compose` (spec §4.3 "compose"; stacks deployed under Swarm Mode
/// go through `applications` instead).
pub fn apply_compose(runner: &ToolRunner, machine: &Machine) -> Result<()> {
    if machine.spec.compose.is_empty() {
        return Ok(());
    }
    let target = endpoint_for_machine(runner, &machine.full_name)?;
    for project in &machine.spec.compose {
        let resolved = machinery_mount::resolve(&project.file)?;
        let path = if resolved.is_absolute() {
            resolved
        } else {
            machine.base_dir().join(resolved)
        };
        let mut args: Vec<String> = Vec::new();
        if let Some(host) = &target.host {
            args.push("-H".to_string());
            args.push(host.clone());
        }
        args.push("-f".to_string());
        args.push(path.to_string_lossy().to_string());
        if let Some(name) = &project.project {
            args.push("-p".to_string());
            args.push(name.clone());
        }
        args.push("up".to_string());
        args.push("-d".to_string());
        runner.run(Tool::DockerCompose, &args, &RunOptions::default())?;
    }
    Ok(())
}

/// Deploys every cluster-level `applications:` entry not already running
/// as a Swarm Mode stack on `manager_machine` (spec §4.3 "applications",
/// manager-only; spec §4.4 resolves stack names against the live
/// `docker stack ls` via the name-comparison rule of §4.10 before acting).
pub fn apply_applications(runner: &ToolRunner, manager_machine: &str, cluster_origin: &Path, applications: &[machinery_model::Application]) -> Result<()> {
    let base_dir = cluster_origin.parent().unwrap_or_else(|| Path::new("."));
    for app in applications {
        if machinery_swarm::stack::is_running(runner, manager_machine, &app.name)? {
            continue;
        }
        let compose_path = base_dir.join(&app.file);
        machinery_swarm::stack::deploy(runner, manager_machine, &compose_path, &app.name, &[])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use machinery_model::{MachineSpec, MachineState, RegistrySpec};
    use std::path::PathBuf;

    fn sample_machine() -> Machine {
        Machine {
            short_name: "n1".to_string(),
            full_name: "proj-n1".to_string(),
            aliases: vec![],
            origin: PathBuf::from("/cluster/cluster.yaml"),
            spec: MachineSpec::default(),
            state: MachineState::default(),
        }
    }

    #[test]
    fn apply_files_skips_when_empty() {
        let runner = ToolRunner::new();
        let machine = sample_machine();
        assert!(apply_files(&runner, &machine).is_ok());
    }

    #[test]
    fn registries_without_credentials_does_not_panic_building_args() {
        let registry = RegistrySpec {
            url: "registry.example.com".to_string(),
            username: None,
            password: None,
        };
        let mut args = vec!["docker".to_string(), "login".to_string()];
        if registry.username.is_none() {
            // matches apply_registries' anonymous-login branch
        }
        args.push(registry.url.clone());
        assert_eq!(args, vec!["docker", "login", "registry.example.com"]);
    }
}
