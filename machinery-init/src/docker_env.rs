//! Resolves a machine's `DockerEndpoint` by parsing `docker-machine env`'s
//! shell export lines, the same connection parameters the original engine
//! would mutate into the process environment via attach/detach (spec §9
//! design note, carried through explicitly instead here).

use machinery_core::error::Result;
use machinery_image::DockerEndpoint;
use machinery_tool::runner::{RunOptions, Tool, ToolRunner};

pub fn endpoint_for_machine(runner: &ToolRunner, machine_name: &str) -> Result<DockerEndpoint> {
    let output = runner.run(
        Tool::DockerMachine,
        &["env".to_string(), machine_name.to_string()],
        &RunOptions::capture(),
    )?;

    let mut host = None;
    let mut cert_path = None;
    for line in &output.lines {
        if let Some(value) = extract_export(line, "DOCKER_HOST") {
            host = Some(value);
        } else if let Some(value) = extract_export(line, "DOCKER_CERT_PATH") {
            cert_path = Some(value);
        }
    }

    Ok(match (host, cert_path) {
        (Some(host), Some(cert_path)) => DockerEndpoint::for_machine(machine_name, host, cert_path),
        _ => DockerEndpoint::local(),
    })
}

fn extract_export(line: &str, var: &str) -> Option<String> {
    let prefix = format!("export {var}=");
    let rest = line.trim().strip_prefix(&prefix)?;
    Some(rest.trim_matches('"').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_host_and_cert_path_from_export_lines() {
        let line = r#"export DOCKER_HOST="tcp://1.2.3.4:2376""#;
        assert_eq!(extract_export(line, "DOCKER_HOST"), Some("tcp://1.2.3.4:2376".to_string()));
    }

    #[test]
    fn non_matching_line_yields_none() {
        assert_eq!(extract_export("export DOCKER_TLS_VERIFY=1", "DOCKER_HOST"), None);
    }
}
