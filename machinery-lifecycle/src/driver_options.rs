//! Driver-specific flag translation (spec §4.2 "create"): the uniform
//! `memory`/`cpu`/`size` fields and a machine's `options:` map become
//! `docker-machine create` flags through a built-in per-driver table.

use std::collections::HashMap;
use std::path::Path;

use once_cell::sync::Lazy;
use serde_json::Value;
use tracing::warn;

/// One driver's resource-flag names and disk-size unit conversion (the
/// user always thinks in MB; some drivers take the disk size in GB).
#[derive(Debug, Clone, Copy)]
pub struct DriverProfile {
    pub memory_flag: Option<&'static str>,
    pub cpu_flag: Option<&'static str>,
    pub disk_flag: Option<&'static str>,
    /// Multiply a MB size by this to get the driver's native unit.
    pub disk_multiplier: f64,
}

const MB: f64 = 1.0;
const GB_FROM_MB: f64 = 1.0 / 1024.0;

static DRIVER_TABLE: Lazy<HashMap<&'static str, DriverProfile>> = Lazy::new(|| {
    let mut table = HashMap::new();
    table.insert(
        "virtualbox",
        DriverProfile {
            memory_flag: Some("virtualbox-memory"),
            cpu_flag: Some("virtualbox-cpu-count"),
            disk_flag: Some("virtualbox-disk-size"),
            disk_multiplier: MB,
        },
    );
    table.insert(
        "vmwarefusion",
        DriverProfile {
            memory_flag: Some("vmwarefusion-memory-size"),
            cpu_flag: Some("vmwarefusion-cpu-count"),
            disk_flag: Some("vmwarefusion-disk-size"),
            disk_multiplier: MB,
        },
    );
    table.insert(
        "vmwarevsphere",
        DriverProfile {
            memory_flag: Some("vmwarevsphere-memory-size"),
            cpu_flag: Some("vmwarevsphere-cpu-count"),
            disk_flag: Some("vmwarevsphere-disk-size"),
            disk_multiplier: MB,
        },
    );
    table.insert(
        "vmwarevcloudair",
        DriverProfile {
            memory_flag: Some("vmwarevcloudair-memory-size"),
            cpu_flag: None,
            disk_flag: None,
            disk_multiplier: MB,
        },
    );
    table.insert(
        "softlayer",
        DriverProfile {
            memory_flag: Some("softlayer-memory"),
            cpu_flag: Some("softlayer-cpu"),
            disk_flag: None,
            disk_multiplier: MB,
        },
    );
    table.insert(
        "hyper-v",
        DriverProfile {
            memory_flag: Some("hyper-v-memory"),
            cpu_flag: Some("hyper-v-cpu-count"),
            disk_flag: Some("hyper-v-disk-size"),
            disk_multiplier: MB,
        },
    );
    table.insert(
        "kvm",
        DriverProfile {
            memory_flag: Some("kvm-memory"),
            cpu_flag: Some("kvm-cpu-count"),
            disk_flag: Some("kvm-disk-size"),
            disk_multiplier: MB,
        },
    );
    table.insert(
        "amazonec2",
        DriverProfile {
            memory_flag: None,
            cpu_flag: None,
            disk_flag: Some("amazonec2-root-size"),
            disk_multiplier: GB_FROM_MB,
        },
    );
    table.insert(
        "digitalocean",
        DriverProfile {
            memory_flag: None,
            cpu_flag: None,
            disk_flag: None,
            disk_multiplier: MB,
        },
    );
    table.insert(
        "google",
        DriverProfile {
            memory_flag: None,
            cpu_flag: None,
            disk_flag: Some("google-disk-size"),
            disk_multiplier: GB_FROM_MB,
        },
    );
    table.insert(
        "exoscale",
        DriverProfile {
            memory_flag: None,
            cpu_flag: None,
            disk_flag: Some("exoscale-disk-size"),
            disk_multiplier: GB_FROM_MB,
        },
    );
    table
});

/// Suffixes marking an `options:` key as holding a path that should be
/// resolved relative to the YAML before being forwarded (spec: "SSH-key
/// paths, publish-settings files"). Configurable in spirit; this is the
/// built-in default set.
pub const ABSOLUTE_PATH_OPTION_SUFFIXES: &[&str] =
    &["ssh-keypath", "publish-settings-file", "cacert", "cert"];

/// Translates `memory`/`cpu`/`size` into this driver's flags. An unknown
/// driver produces a `WARN` and the whole set is skipped (spec §4.2); a
/// known driver simply omits fields it has no flag for (e.g. `cpu` on
/// `amazonec2`, which sizes machines via `--amazonec2-instance-type`).
pub fn translate_resources(driver: &str, cpu: Option<u32>, memory: Option<u32>, size: Option<u32>) -> Vec<String> {
    let Some(profile) = DRIVER_TABLE.get(driver) else {
        if cpu.is_some() || memory.is_some() || size.is_some() {
            warn!(driver, "unknown driver, skipping resource flag translation");
        }
        return Vec::new();
    };

    let mut flags = Vec::new();
    if let (Some(flag), Some(value)) = (profile.memory_flag, memory) {
        flags.push(format!("--{flag}={value}"));
    }
    if let (Some(flag), Some(value)) = (profile.cpu_flag, cpu) {
        flags.push(format!("--{flag}={value}"));
    }
    if let (Some(flag), Some(value)) = (profile.disk_flag, size) {
        let converted = (value as f64 * profile.disk_multiplier).round() as i64;
        flags.push(format!("--{flag}={converted}"));
    }
    flags
}

pub fn profile_for(driver: &str) -> Option<DriverProfile> {
    DRIVER_TABLE.get(driver).copied()
}

fn is_absolute_path_option(key: &str) -> bool {
    ABSOLUTE_PATH_OPTION_SUFFIXES.iter().any(|suffix| key.ends_with(suffix))
}

/// Builds `--key[=value]` flags from a machine's `options:` map, validated
/// against `recognized` (the driver's live `--help`-derived option set),
/// resolving absolute-path options relative to `yaml_dir`, turning booleans
/// into bare flags (omitted when `false`), and appending any
/// `driver_defaults` not already present in `options`.
pub fn build_option_flags(
    options: &indexmap::IndexMap<String, Value>,
    yaml_dir: &Path,
    recognized: &std::collections::HashSet<String>,
    driver_defaults: &[(String, Value)],
) -> Vec<String> {
    let mut merged: indexmap::IndexMap<String, Value> = options.clone();
    for (key, value) in driver_defaults {
        merged.entry(key.clone()).or_insert_with(|| value.clone());
    }

    let mut flags = Vec::new();
    for (key, value) in &merged {
        if !recognized.is_empty() && !recognized.contains(key) {
            warn!(option = key, "option not recognized by driver, skipping");
            continue;
        }
        match value {
            Value::Bool(true) => flags.push(format!("--{key}")),
            Value::Bool(false) => {}
            Value::String(s) if is_absolute_path_option(key) => {
                let resolved = yaml_dir.join(s);
                flags.push(format!("--{key}={}", resolved.display()));
            }
            Value::String(s) => flags.push(format!("--{key}={s}")),
            Value::Number(n) => flags.push(format!("--{key}={n}")),
            _ => {
                warn!(option = key, "unsupported option value type, skipping");
            }
        }
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn virtualbox_resources_use_mb_directly() {
        let flags = translate_resources("virtualbox", Some(2), Some(2048), Some(20000));
        assert_eq!(
            flags,
            vec![
                "--virtualbox-memory=2048",
                "--virtualbox-cpu-count=2",
                "--virtualbox-disk-size=20000",
            ]
        );
    }

    #[test]
    fn amazonec2_converts_disk_to_gb_and_skips_memory_cpu() {
        let flags = translate_resources("amazonec2", Some(2), Some(2048), Some(20480));
        assert_eq!(flags, vec!["--amazonec2-root-size=20"]);
    }

    #[test]
    fn unknown_driver_skips_with_warning() {
        let flags = translate_resources("made-up-driver", Some(2), Some(2048), None);
        assert!(flags.is_empty());
    }

    #[test]
    fn bool_options_become_bare_or_omitted_flags() {
        let mut options = indexmap::IndexMap::new();
        options.insert("tls-verify".to_string(), json!(true));
        options.insert("insecure".to_string(), json!(false));
        let recognized: std::collections::HashSet<String> =
            ["tls-verify".to_string(), "insecure".to_string()].into_iter().collect();
        let flags = build_option_flags(&options, Path::new("/tmp"), &recognized, &[]);
        assert_eq!(flags, vec!["--tls-verify"]);
    }

    #[test]
    fn absolute_path_options_resolve_relative_to_yaml_dir() {
        let mut options = indexmap::IndexMap::new();
        options.insert("amazonec2-ssh-keypath".to_string(), json!("keys/id_rsa"));
        let recognized: std::collections::HashSet<String> =
            ["amazonec2-ssh-keypath".to_string()].into_iter().collect();
        let flags = build_option_flags(&options, Path::new("/home/user/proj"), &recognized, &[]);
        assert_eq!(flags, vec!["--amazonec2-ssh-keypath=/home/user/proj/keys/id_rsa"]);
    }

    #[test]
    fn driver_defaults_fill_gaps_without_overriding() {
        let mut options = indexmap::IndexMap::new();
        options.insert("region".to_string(), json!("us-east-1"));
        let defaults = vec![
            ("region".to_string(), json!("us-west-2")),
            ("zone".to_string(), json!("a")),
        ];
        let recognized: std::collections::HashSet<String> =
            ["region".to_string(), "zone".to_string()].into_iter().collect();
        let flags = build_option_flags(&options, Path::new("/tmp"), &recognized, &defaults);
        assert!(flags.contains(&"--region=us-east-1".to_string()));
        assert!(flags.contains(&"--zone=a".to_string()));
    }
}
