//! `rsync` shares (spec §4.6): ensures `rsync` is installed on the guest,
//! derives the exact SSH command `docker-machine` would use, and syncs in
//! either direction.

use machinery_core::error::{MachineryError, Result};
use machinery_remote::ssh::OsRelease;
use once_cell::sync::Lazy;
use regex::Regex;

static SSH_COMMAND_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(ssh\s+[^\n]+)").expect("static regex is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host to guest (the default share direction).
    Put,
    /// Guest to host (the `sync -op get` operation).
    Get,
}

/// Which package manager to use to install `rsync`, chosen from the
/// guest's `/etc/os-release` id (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Installer {
    AptGet,
    TceLoad,
    Unsupported,
}

pub fn installer_for(os: &OsRelease) -> Installer {
    if os.id == "debian" || os.id == "ubuntu" || os.id_like.iter().any(|l| l == "debian") {
        Installer::AptGet
    } else if os.id == "boot2docker" || os.id_like.iter().any(|l| l == "boot2docker") {
        Installer::TceLoad
    } else {
        Installer::Unsupported
    }
}

pub fn install_command(installer: Installer) -> Option<&'static str> {
    match installer {
        Installer::AptGet => Some("sudo apt-get update && sudo apt-get install -y rsync"),
        Installer::TceLoad => Some("tce-load -wi rsync"),
        Installer::Unsupported => None,
    }
}

/// Extracts the `ssh ...` invocation `docker-machine --debug ssh` writes to
/// stderr, so the same connection parameters can be reused for `rsync -e`.
pub fn derive_ssh_command(debug_stderr: &[String]) -> Result<String> {
    for line in debug_stderr {
        if let Some(caps) = SSH_COMMAND_PATTERN.captures(line) {
            return Ok(caps[1].trim().to_string());
        }
    }
    Err(MachineryError::Resolution(
        "could not find 'ssh ...' invocation in docker-machine --debug output".to_string(),
    ))
}

/// Builds the `rsync -az -e SSH_CMD ...` argv for one share, in `direction`.
pub fn build_rsync_args(
    ssh_command: &str,
    host_path: &str,
    remote_host: &str,
    guest_path: &str,
    direction: Direction,
) -> Vec<String> {
    let host_slash = format!("{}/", host_path.trim_end_matches('/'));
    let guest_slash = format!("{}/", guest_path.trim_end_matches('/'));
    let remote_spec = format!("{remote_host}:{guest_slash}");

    let (source, destination) = match direction {
        Direction::Put => (host_slash, remote_spec),
        Direction::Get => (remote_spec, host_slash),
    };

    vec![
        "-az".to_string(),
        "-e".to_string(),
        ssh_command.to_string(),
        source,
        destination,
    ]
}
