//! The YAML Model resolution pipeline (spec §4.1): parse, merge `include:`,
//! merge `extends:`, whitelist keys, prefix names, filter ignored machines,
//! default the driver, and validate master uniqueness.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use machinery_core::error::{MachineryError, Result};
use machinery_core::name;
use serde_json::Value;
use tracing::warn;

use crate::merge::merge_into;
use crate::types::{Cluster, ClusterOptions, ClusteringMode, Machine, MachineSpec, MachineState};

/// Bounds and defaults governing one resolution run. Kept explicit rather
/// than global constants so tests can exercise budget-exhaustion paths
/// cheaply (spec §9 supplement).
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub include_depth: usize,
    pub extends_passes: usize,
    pub ignore_patterns: Vec<String>,
    pub default_driver: String,
    pub separator: char,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            include_depth: 10,
            extends_passes: 10,
            ignore_patterns: vec![".*".to_string(), "x-*".to_string()],
            default_driver: "virtualbox".to_string(),
            separator: name::DEFAULT_SEPARATOR,
        }
    }
}

const MACHINE_KEYS: &[&str] = &[
    "driver", "cpu", "memory", "size", "master", "swarm", "labels", "ports", "shares", "images",
    "compose", "registries", "aliases", "files", "prelude", "addendum", "environment", "env_file",
    "options", "caching", "extends",
];

const TOP_LEVEL_KEYS: &[&str] = &[
    "version",
    "machines",
    "networks",
    "applications",
    "stacks",
    "environment",
    "env_file",
    "options",
    "include",
];

/// Parses and fully resolves the cluster YAML at `path`.
pub fn parse_cluster(path: &Path, config: &ResolverConfig) -> Result<Cluster> {
    let base_dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    let root = load_document(path)?;

    let version = root
        .get("version")
        .and_then(|v| v.as_str())
        .map(parse_version)
        .unwrap_or(1.0);

    let root = if version >= 2.0 {
        resolve_includes(root, &base_dir, config.include_depth)?
    } else {
        root
    };

    let root = root
        .as_object()
        .cloned()
        .ok_or_else(|| MachineryError::Parse("cluster document must be a mapping".into()))?;

    let mut machines = extract_machines(&root)?;
    resolve_extends(&mut machines, config.extends_passes);

    let prefix = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("cluster")
        .to_string();

    let mut resolved_machines = Vec::new();
    for (short_name, spec_value) in machines {
        if is_ignored(&short_name, &config.ignore_patterns) {
            continue;
        }
        let Value::Object(ref obj) = spec_value else {
            return Err(MachineryError::Parse(format!(
                "machine '{short_name}' must be a mapping"
            )));
        };
        warn_unknown_keys(&short_name, obj, MACHINE_KEYS, "machine");

        let mut spec: MachineSpec = serde_json::from_value(spec_value.clone())?;
        if spec.driver.is_none() {
            spec.driver = Some(config.default_driver.clone());
        }

        let full_name = name::qualify(&prefix, &short_name, config.separator);
        let aliases: Vec<String> = spec
            .aliases
            .iter()
            .map(|a| name::qualify(&prefix, a, config.separator))
            .collect();

        resolved_machines.push(Machine {
            short_name,
            full_name,
            aliases,
            origin: path.to_path_buf(),
            spec,
            state: MachineState::default(),
        });
    }

    let options: ClusterOptions = root
        .get("options")
        .cloned()
        .map(serde_json::from_value)
        .transpose()?
        .unwrap_or_default();

    validate_master_uniqueness(&mut resolved_machines, options.clustering);

    let networks = root
        .get("networks")
        .cloned()
        .map(serde_json::from_value)
        .transpose()?
        .unwrap_or_default();

    let applications = root
        .get("applications")
        .or_else(|| root.get("stacks"))
        .cloned()
        .map(serde_json::from_value)
        .transpose()?
        .unwrap_or_default();

    let environment = root
        .get("environment")
        .cloned()
        .map(serde_json::from_value)
        .transpose()?
        .unwrap_or_default();

    if resolved_machines.is_empty() {
        warn!("cluster '{}' resolved with zero machines", path.display());
    }

    Ok(Cluster {
        origin: path.to_path_buf(),
        prefix,
        machines: resolved_machines,
        networks,
        applications,
        environment,
        options,
    })
}

fn parse_version(raw: &str) -> f64 {
    raw.trim().parse().unwrap_or(1.0)
}

fn load_document(path: &Path) -> Result<Value> {
    let text = fs::read_to_string(path)
        .map_err(|e| MachineryError::Resolution(format!("cannot read {}: {e}", path.display())))?;
    let value: Value = serde_yaml_ng::from_str(&text)?;
    Ok(value)
}

/// Recursively merges `include:` file references into `value`. Processed in
/// list order, each later include overlaying the ones before it; the
/// document's own keys (minus `include`) are then overlaid on top, so a
/// cluster file always wins over what it includes.
fn resolve_includes(value: Value, base_dir: &Path, depth_remaining: usize) -> Result<Value> {
    let Value::Object(mut obj) = value else {
        return Ok(value);
    };
    let includes = obj.remove("include");

    let mut accumulated = Value::Object(Default::default());
    if let (Some(Value::Array(paths)), true) = (&includes, depth_remaining > 0) {
        for path_value in paths {
            let Some(rel_path) = path_value.as_str() else {
                continue;
            };
            let include_path = resolve_relative(base_dir, rel_path);
            let included_dir = include_path
                .parent()
                .unwrap_or(base_dir)
                .to_path_buf();
            let included = load_document(&include_path).map_err(|e| {
                MachineryError::Resolution(format!(
                    "include '{}' from {}: {e}",
                    rel_path,
                    base_dir.display()
                ))
            })?;
            let included = resolve_includes(included, &included_dir, depth_remaining - 1)?;
            merge_into(&mut accumulated, included);
        }
    } else if includes.is_some() && depth_remaining == 0 {
        warn!("include depth budget exhausted, skipping further includes");
    }

    merge_into(&mut accumulated, Value::Object(obj));
    Ok(accumulated)
}

fn resolve_relative(base_dir: &Path, rel: &str) -> PathBuf {
    let candidate = Path::new(rel);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base_dir.join(candidate)
    }
}

/// Pulls the `machines:` mapping out of the root document. Falls back to
/// treating every non-reserved top-level key as a v1-style flat machine
/// definition when no `machines:` key is present.
fn extract_machines(root: &serde_json::Map<String, Value>) -> Result<IndexMap<String, Value>> {
    if let Some(machines) = root.get("machines") {
        let Value::Object(map) = machines else {
            return Err(MachineryError::Parse("'machines' must be a mapping".into()));
        };
        return Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect());
    }

    warn_unknown_keys(
        "<root>",
        root,
        TOP_LEVEL_KEYS,
        "top-level (v1 flat-machine fallback)",
    );
    Ok(root
        .iter()
        .filter(|(k, _)| !TOP_LEVEL_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect())
}

fn extends_of(spec: &Value) -> Vec<String> {
    match spec.get("extends") {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

fn without_extends(spec: &Value) -> Value {
    let mut spec = spec.clone();
    if let Value::Object(obj) = &mut spec {
        obj.remove("extends");
    }
    spec
}

/// Resolves `extends:` chains via a bounded worklist (spec §9: bounded
/// iteration, not recursion). Each pass reads the *previous* pass's
/// snapshot so multi-hop chains (`A extends B extends C`) converge over a
/// few passes rather than requiring recursive lookups.
fn resolve_extends(machines: &mut IndexMap<String, Value>, max_passes: usize) {
    for _ in 0..max_passes {
        let snapshot = machines.clone();
        let mut changed = false;

        for (name, spec) in machines.iter_mut() {
            let refs = extends_of(spec);
            if refs.is_empty() {
                continue;
            }
            changed = true;

            let mut base = Value::Object(Default::default());
            for reference in &refs {
                match snapshot.get(reference) {
                    Some(base_spec) => merge_into(&mut base, base_spec.clone()),
                    None => warn!("machine '{name}' extends unknown machine '{reference}'"),
                }
            }
            merge_into(&mut base, without_extends(spec));
            *spec = base;
        }

        if !changed {
            return;
        }
    }

    let unresolved: Vec<&String> = machines
        .iter()
        .filter(|(_, spec)| !extends_of(spec).is_empty())
        .map(|(name, _)| name)
        .collect();
    if !unresolved.is_empty() {
        warn!(
            "extends budget exhausted with unresolved references on: {:?}",
            unresolved
        );
        for name in unresolved {
            if let Some(spec) = machines.get(name).cloned() {
                machines.insert(name.clone(), without_extends(&spec));
            }
        }
    }
}

fn is_ignored(name: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| {
        glob::Pattern::new(p)
            .map(|pat| pat.matches(name))
            .unwrap_or(false)
    })
}

fn warn_unknown_keys(
    context: &str,
    obj: &serde_json::Map<String, Value>,
    known: &[&str],
    kind: &str,
) {
    for key in obj.keys() {
        if !known.contains(&key.as_str()) {
            warn!("unknown {kind} key '{key}' on '{context}' (ignored, value preserved)");
        }
    }
}

/// Classic Swarm allows at most one master; keep the first, drop the rest
/// with a warning (spec §7 invariant-violation principle: "warn and
/// self-correct where possible").
fn validate_master_uniqueness(machines: &mut [Machine], mode: ClusteringMode) {
    if mode == ClusteringMode::SwarmMode {
        return;
    }
    let mut seen_master = false;
    for machine in machines.iter_mut() {
        if machine.is_master() {
            if seen_master {
                warn!(
                    "multiple masters declared in classic swarm mode; dropping master on '{}'",
                    machine.full_name
                );
                machine.spec.master = Some(false);
            } else {
                seen_master = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_yaml(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn single_node_bring_up_assigns_full_name_and_driver() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_yaml(
            dir.path(),
            "proj.yaml",
            r#"
version: "2.0"
machines:
  n1:
    memory: 2048
"#,
        );
        let cluster = parse_cluster(&path, &ResolverConfig::default()).unwrap();
        assert_eq!(cluster.machines.len(), 1);
        let m = &cluster.machines[0];
        assert_eq!(m.full_name, "proj-n1");
        assert_eq!(m.spec.driver.as_deref(), Some("virtualbox"));
        assert_eq!(m.spec.memory, Some(2048));
    }

    #[test]
    fn classic_swarm_keeps_first_master_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_yaml(
            dir.path(),
            "proj.yaml",
            r#"
version: "2.0"
machines:
  n1:
    master: true
  n2:
    master: true
"#,
        );
        let cluster = parse_cluster(&path, &ResolverConfig::default()).unwrap();
        let masters: Vec<_> = cluster.machines.iter().filter(|m| m.is_master()).collect();
        assert_eq!(masters.len(), 1);
        assert_eq!(masters[0].short_name, "n1");
    }

    #[test]
    fn swarm_mode_allows_multiple_masters() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_yaml(
            dir.path(),
            "proj.yaml",
            r#"
version: "2.0"
options:
  clustering: swarm mode
machines:
  n1:
    master: true
  n2:
    master: true
  n3:
    master: false
"#,
        );
        let cluster = parse_cluster(&path, &ResolverConfig::default()).unwrap();
        let masters: Vec<_> = cluster.machines.iter().filter(|m| m.is_master()).collect();
        assert_eq!(masters.len(), 2);
    }

    #[test]
    fn extends_merges_referenced_machine() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_yaml(
            dir.path(),
            "proj.yaml",
            r#"
version: "2.0"
machines:
  base:
    driver: virtualbox
    memory: 1024
    labels:
      role: base
  n1:
    extends: base
    memory: 2048
"#,
        );
        let cluster = parse_cluster(&path, &ResolverConfig::default()).unwrap();
        let n1 = cluster.find("n1").unwrap();
        assert_eq!(n1.spec.memory, Some(2048));
        assert_eq!(n1.spec.driver.as_deref(), Some("virtualbox"));
        assert_eq!(n1.spec.labels.get("role").map(String::as_str), Some("base"));
    }

    #[test]
    fn extends_chain_resolves_over_multiple_passes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_yaml(
            dir.path(),
            "proj.yaml",
            r#"
version: "2.0"
machines:
  grandparent:
    cpu: 1
  parent:
    extends: grandparent
    memory: 512
  child:
    extends: parent
    memory: 2048
"#,
        );
        let cluster = parse_cluster(&path, &ResolverConfig::default()).unwrap();
        let child = cluster.find("child").unwrap();
        assert_eq!(child.spec.cpu, Some(1));
        assert_eq!(child.spec.memory, Some(2048));
    }

    #[test]
    fn unknown_extends_reference_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_yaml(
            dir.path(),
            "proj.yaml",
            r#"
version: "2.0"
machines:
  n1:
    extends: does-not-exist
    memory: 2048
"#,
        );
        let cluster = parse_cluster(&path, &ResolverConfig::default()).unwrap();
        let n1 = cluster.find("n1").unwrap();
        assert_eq!(n1.spec.memory, Some(2048));
    }

    #[test]
    fn ignore_pattern_skips_template_machines() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_yaml(
            dir.path(),
            "proj.yaml",
            r#"
version: "2.0"
machines:
  .template:
    memory: 1024
  x-base:
    memory: 1024
  n1:
    memory: 1024
"#,
        );
        let cluster = parse_cluster(&path, &ResolverConfig::default()).unwrap();
        assert_eq!(cluster.machines.len(), 1);
        assert_eq!(cluster.machines[0].short_name, "n1");
    }

    #[test]
    fn lookup_accepts_short_or_qualified_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_yaml(
            dir.path(),
            "proj.yaml",
            r#"
version: "2.0"
machines:
  n1:
    memory: 1024
"#,
        );
        let cluster = parse_cluster(&path, &ResolverConfig::default()).unwrap();
        assert!(cluster.find("n1").is_some());
        assert!(cluster.find("proj-n1").is_some());
        assert!(cluster.find("nope").is_none());
    }

    #[test]
    fn include_merges_and_is_overridden_by_parent() {
        let dir = tempfile::tempdir().unwrap();
        write_yaml(
            dir.path(),
            "base.yaml",
            r#"
machines:
  n1:
    memory: 1024
    cpu: 1
"#,
        );
        let path = write_yaml(
            dir.path(),
            "proj.yaml",
            r#"
version: "2.0"
include:
  - base.yaml
machines:
  n1:
    memory: 4096
"#,
        );
        let cluster = parse_cluster(&path, &ResolverConfig::default()).unwrap();
        let n1 = cluster.find("n1").unwrap();
        assert_eq!(n1.spec.memory, Some(4096));
        assert_eq!(n1.spec.cpu, Some(1));
    }

    #[test]
    fn aliases_are_prefix_qualified() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_yaml(
            dir.path(),
            "proj.yaml",
            r#"
version: "2.0"
machines:
  n1:
    aliases: [primary]
"#,
        );
        let cluster = parse_cluster(&path, &ResolverConfig::default()).unwrap();
        let n1 = cluster.find("n1").unwrap();
        assert_eq!(n1.aliases, vec!["proj-primary".to_string()]);
        assert!(cluster.find("primary").is_some());
    }
}
