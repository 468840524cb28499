//! `DockerEndpoint` (spec §9 design note): the engine's original
//! process-global `docker attach`/`detach` trick (mutating `DOCKER_HOST`
//! etc.) becomes an explicit value threaded through every `docker`
//! invocation instead of ambient process state.

use machinery_tool::runner::{RunOptions, Tool, ToolRunner};
use machinery_core::error::Result;

/// Connection parameters for one Docker daemon: either the local default
/// socket, or a remote machine reached the way `docker-machine env` would
/// set up `DOCKER_HOST`/`DOCKER_CERT_PATH`/`DOCKER_TLS_VERIFY`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DockerEndpoint {
    pub host: Option<String>,
    pub cert_path: Option<String>,
    pub tls_verify: bool,
    pub machine_name: Option<String>,
}

impl DockerEndpoint {
    pub fn local() -> Self {
        Self::default()
    }

    pub fn for_machine(machine_name: impl Into<String>, host: impl Into<String>, cert_path: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            cert_path: Some(cert_path.into()),
            tls_verify: true,
            machine_name: Some(machine_name.into()),
        }
    }

    /// Builds the `docker` global flags (`-H`, `--tlsverify`, ...) that
    /// steer a single invocation at this endpoint, without mutating any
    /// process environment.
    fn global_flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if let Some(host) = &self.host {
            flags.push("-H".to_string());
            flags.push(host.clone());
        }
        if self.tls_verify {
            flags.push("--tlsverify".to_string());
        }
        if let Some(cert_path) = &self.cert_path {
            flags.push(format!("--tlscacert={cert_path}/ca.pem"));
            flags.push(format!("--tlscert={cert_path}/cert.pem"));
            flags.push(format!("--tlskey={cert_path}/key.pem"));
        }
        flags
    }

    pub fn run(&self, runner: &ToolRunner, args: &[&str], options: &RunOptions) -> Result<machinery_tool::runner::RunOutput> {
        let mut full: Vec<String> = self.global_flags();
        full.extend(args.iter().map(|s| s.to_string()));
        runner.run(Tool::Docker, &full, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_endpoint_has_no_global_flags() {
        assert!(DockerEndpoint::local().global_flags().is_empty());
    }

    #[test]
    fn remote_endpoint_sets_host_and_tls_flags() {
        let endpoint = DockerEndpoint::for_machine("proj-n1", "tcp://1.2.3.4:2376", "/certs");
        let flags = endpoint.global_flags();
        assert!(flags.contains(&"-H".to_string()));
        assert!(flags.contains(&"tcp://1.2.3.4:2376".to_string()));
        assert!(flags.iter().any(|f| f.contains("tlscacert")));
    }
}
