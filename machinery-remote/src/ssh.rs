//! Higher-level wrappers over `docker-machine ssh` (spec §4.1 "Unix
//! Remote"): `ps`, `mount`, `id`, `ifconfig`, and `/etc/os-release`.

use machinery_core::error::Result;
use machinery_tool::runner::{RunOptions, Tool, ToolRunner};

/// A single running guest process, as reported by `ps`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: String,
    pub command: String,
}

/// A single mounted filesystem, as reported by `mount`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: String,
    pub mount_point: String,
    pub fs_type: String,
    pub options: String,
}

/// The guest's numeric and symbolic identity, as reported by `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestIdentity {
    pub uid: String,
    pub gid: String,
    pub user: String,
}

/// One network interface's addresses, as reported by `ifconfig`/`ip addr`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    pub inet: Option<String>,
    pub inet6: Option<String>,
}

/// Parsed `/etc/os-release` fields, enough to pick a package installer
/// (spec §4.6) and a rsync-install strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsRelease {
    pub id: String,
    pub id_like: Vec<String>,
}

/// Executes commands inside a machine over `docker-machine ssh NAME -- ...`.
pub struct UnixRemote<'a> {
    runner: &'a ToolRunner,
    machine_name: String,
}

impl<'a> UnixRemote<'a> {
    pub fn new(runner: &'a ToolRunner, machine_name: impl Into<String>) -> Self {
        Self {
            runner,
            machine_name: machine_name.into(),
        }
    }

    fn ssh(&self, remote_command: &str) -> Result<Vec<String>> {
        let args = vec!["ssh".to_string(), self.machine_name.clone(), remote_command.to_string()];
        let output = self
            .runner
            .run(Tool::DockerMachine, &args, &RunOptions::capture())?;
        Ok(output.lines)
    }

    /// Runs an arbitrary command on the guest, inheriting the caller's TTY
    /// when interactive (used for `machinery ssh`/`exec`).
    pub fn exec(&self, command: &[String], interactive: bool) -> Result<Vec<String>> {
        let mut args = vec!["ssh".to_string(), self.machine_name.clone()];
        args.extend(command.iter().cloned());
        let options = if interactive {
            RunOptions::interactive()
        } else {
            RunOptions::capture()
        };
        Ok(self.runner.run(Tool::DockerMachine, &args, &options)?.lines)
    }

    pub fn ps(&self) -> Result<Vec<ProcessEntry>> {
        let lines = self.ssh("ps -eo pid,comm --no-headers")?;
        Ok(lines
            .iter()
            .filter_map(|line| {
                let mut parts = line.trim().splitn(2, char::is_whitespace);
                let pid = parts.next()?.to_string();
                let command = parts.next().unwrap_or("").trim().to_string();
                Some(ProcessEntry { pid, command })
            })
            .collect())
    }

    pub fn mount(&self) -> Result<Vec<MountEntry>> {
        let lines = self.ssh("mount")?;
        Ok(lines.iter().filter_map(|l| parse_mount_line(l)).collect())
    }

    pub fn id(&self) -> Result<GuestIdentity> {
        let lines = self.ssh("id")?;
        let joined = lines.join(" ");
        Ok(parse_id_line(&joined))
    }

    pub fn ifconfig(&self) -> Result<Vec<Interface>> {
        let lines = self.ssh("ifconfig -a")?;
        Ok(parse_ifconfig(&lines))
    }

    pub fn os_release(&self) -> Result<OsRelease> {
        let lines = self.ssh("cat /etc/os-release")?;
        Ok(parse_os_release(&lines))
    }
}

fn parse_mount_line(line: &str) -> Option<MountEntry> {
    // "device on mount_point type fs_type (options)"
    let rest = line.strip_prefix("")?;
    let on_idx = rest.find(" on ")?;
    let device = rest[..on_idx].trim().to_string();
    let rest = &rest[on_idx + 4..];
    let type_idx = rest.find(" type ")?;
    let mount_point = rest[..type_idx].trim().to_string();
    let rest = &rest[type_idx + 6..];
    let paren_idx = rest.find('(');
    let (fs_type, options) = match paren_idx {
        Some(idx) => (
            rest[..idx].trim().to_string(),
            rest[idx + 1..].trim_end_matches(')').trim().to_string(),
        ),
        None => (rest.trim().to_string(), String::new()),
    };
    Some(MountEntry {
        device,
        mount_point,
        fs_type,
        options,
    })
}

fn parse_id_line(line: &str) -> GuestIdentity {
    let extract = |tag: &str| -> Option<String> {
        let idx = line.find(tag)?;
        let after = &line[idx + tag.len()..];
        let start = after.find('(')? + 1;
        let end = after[start..].find(')')? + start;
        Some(after[start..end].to_string())
    };
    let uid = line
        .split_whitespace()
        .find(|p| p.starts_with("uid="))
        .and_then(|p| p.strip_prefix("uid="))
        .and_then(|p| p.split('(').next())
        .unwrap_or_default()
        .to_string();
    let gid = line
        .split_whitespace()
        .find(|p| p.starts_with("gid="))
        .and_then(|p| p.strip_prefix("gid="))
        .and_then(|p| p.split('(').next())
        .unwrap_or_default()
        .to_string();
    let user = extract("uid=").unwrap_or_default();
    GuestIdentity { uid, gid, user }
}

fn parse_ifconfig(lines: &[String]) -> Vec<Interface> {
    let mut interfaces = Vec::new();
    let mut current: Option<Interface> = None;
    for line in lines {
        if !line.starts_with(char::is_whitespace) && !line.trim().is_empty() {
            if let Some(iface) = current.take() {
                interfaces.push(iface);
            }
            let name = line.split_whitespace().next().unwrap_or("").trim_end_matches(':').to_string();
            current = Some(Interface {
                name,
                ..Default::default()
            });
        } else if let Some(iface) = current.as_mut() {
            if let Some(addr) = extract_after(line, "inet ") {
                iface.inet = Some(addr);
            } else if let Some(addr) = extract_after(line, "inet addr:") {
                iface.inet = Some(addr);
            }
            if let Some(addr) = extract_after(line, "inet6 ") {
                iface.inet6 = Some(addr);
            }
        }
    }
    if let Some(iface) = current {
        interfaces.push(iface);
    }
    interfaces
}

fn extract_after(line: &str, marker: &str) -> Option<String> {
    let idx = line.find(marker)?;
    let rest = &line[idx + marker.len()..];
    rest.split_whitespace().next().map(str::to_string)
}

fn parse_os_release(lines: &[String]) -> OsRelease {
    let mut release = OsRelease::default();
    for line in lines {
        if let Some(value) = line.strip_prefix("ID=") {
            release.id = value.trim_matches('"').to_string();
        } else if let Some(value) = line.strip_prefix("ID_LIKE=") {
            release.id_like = value
                .trim_matches('"')
                .split_whitespace()
                .map(str::to_string)
                .collect();
        }
    }
    release
}

/// Interfaces whose name starts with `v` are "virtual" and excluded from
/// discovery (spec §4.7).
pub fn is_virtual_interface(name: &str) -> bool {
    name.starts_with('v')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mount_line() {
        let entry = parse_mount_line(
            "/dev/sda1 on /mnt/share type vboxsf (rw,relatime,uid=1000)",
        )
        .unwrap();
        assert_eq!(entry.device, "/dev/sda1");
        assert_eq!(entry.mount_point, "/mnt/share");
        assert_eq!(entry.fs_type, "vboxsf");
        assert!(entry.options.contains("uid=1000"));
    }

    #[test]
    fn parses_id_line() {
        let id = parse_id_line("uid=1000(docker) gid=1000(docker) groups=1000(docker)");
        assert_eq!(id.uid, "1000");
        assert_eq!(id.gid, "1000");
        assert_eq!(id.user, "docker");
    }

    #[test]
    fn parses_ifconfig_blocks() {
        let lines = vec![
            "eth0      Link encap:Ethernet".to_string(),
            "          inet addr:192.168.99.100  Bcast:...".to_string(),
            "veth123   Link encap:Ethernet".to_string(),
            "          inet addr:172.17.0.1".to_string(),
        ];
        let interfaces = parse_ifconfig(&lines);
        assert_eq!(interfaces.len(), 2);
        assert_eq!(interfaces[0].name, "eth0");
        assert_eq!(interfaces[0].inet.as_deref(), Some("192.168.99.100"));
        assert!(is_virtual_interface("veth123"));
        assert!(!is_virtual_interface("eth0"));
    }

    #[test]
    fn parses_os_release() {
        let lines = vec![
            r#"ID=ubuntu"#.to_string(),
            r#"ID_LIKE=debian"#.to_string(),
        ];
        let release = parse_os_release(&lines);
        assert_eq!(release.id, "ubuntu");
        assert_eq!(release.id_like, vec!["debian".to_string()]);
    }
}
