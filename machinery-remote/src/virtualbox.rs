//! The specific `VBoxManage` operations the core invokes (spec §4.1
//! "VirtualBox"; §1 scopes out everything else about the binding): port
//! forwarding, shared-folder registration, and a graceful halt with a
//! power-off fallback.

use std::path::Path;
use std::time::Duration;

use machinery_core::error::{MachineryError, Result};
use tracing::warn;

/// A single NAT port-forwarding rule.
#[derive(Debug, Clone)]
pub struct PortForwardRule {
    pub name: String,
    pub protocol: String,
    pub host_port: u16,
    pub guest_port: u16,
}

/// Invokes `VBoxManage` directly; this is deliberately not routed through
/// [`machinery_tool::ToolRunner`], which is reserved for the three
/// `docker*` tools per spec §4.9 — VBoxManage is a fourth, narrowly-scoped
/// binary the core only touches for these three operations.
pub struct VBoxRemote {
    binary: String,
}

impl Default for VBoxRemote {
    fn default() -> Self {
        Self {
            binary: "VBoxManage".to_string(),
        }
    }
}

impl VBoxRemote {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let output = duct::cmd(&self.binary, args)
            .stderr_to_stdout()
            .unchecked()
            .read()
            .map_err(|e| MachineryError::Tool(format!("VBoxManage {:?}: {e}", args)))?;
        Ok(output)
    }

    /// Adds NAT port-forwarding rules to `vm_name`'s first NIC.
    pub fn port_forward(&self, vm_name: &str, rules: &[PortForwardRule]) -> Result<()> {
        for rule in rules {
            let rule_spec = format!(
                "{},{},,{},,{}",
                rule.name, rule.protocol, rule.host_port, rule.guest_port
            );
            self.run(&[
                "modifyvm",
                vm_name,
                "--natpf1",
                "delete",
                &rule.name,
            ])
            .ok(); // best-effort: rule may not exist yet
            self.run(&["modifyvm", vm_name, "--natpf1", &rule_spec])?;
        }
        Ok(())
    }

    /// Registers a host directory as a shared folder. VirtualBox requires
    /// the VM to be powered off to add a share, so the caller must halt it
    /// first if running (the Share Engine does this).
    pub fn add_shared_folder(&self, vm_name: &str, host_path: &Path, share_name: &str) -> Result<()> {
        self.run(&[
            "sharedfolder",
            "add",
            vm_name,
            "--name",
            share_name,
            "--hostpath",
            &host_path.to_string_lossy(),
            "--automount",
        ])?;
        Ok(())
    }

    pub fn vm_state(&self, vm_name: &str) -> Result<String> {
        let info = self.run(&["showvminfo", vm_name, "--machinereadable"])?;
        for line in info.lines() {
            if let Some(value) = line.strip_prefix("VMState=") {
                return Ok(value.trim_matches('"').to_string());
            }
        }
        Ok("unknown".to_string())
    }

    /// Graceful halt: ACPI power button, polling for `poweroff`; if the VM
    /// hasn't stopped after `retries * sleep`, force a hard power-off.
    pub fn graceful_halt(&self, vm_name: &str, retries: u32, sleep: Duration) -> Result<()> {
        self.run(&["controlvm", vm_name, "acpipowerbutton"])?;

        for _ in 0..retries {
            if self.vm_state(vm_name)?.eq_ignore_ascii_case("poweroff") {
                return Ok(());
            }
            std::thread::sleep(sleep);
        }

        warn!("VM '{vm_name}' did not halt gracefully, forcing power-off");
        self.run(&["controlvm", vm_name, "poweroff"])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_forward_rule_spec_format() {
        let rule = PortForwardRule {
            name: "web".to_string(),
            protocol: "tcp".to_string(),
            host_port: 8080,
            guest_port: 80,
        };
        let spec = format!(
            "{},{},,{},,{}",
            rule.name, rule.protocol, rule.host_port, rule.guest_port
        );
        assert_eq!(spec, "web,tcp,,8080,,80");
    }
}
