//! # machinery-discovery
//!
//! The discovery cache (spec §4.7): a `.NAME.env` side-car giving every
//! machine's non-virtual interface addresses, namespaced under a
//! configurable prefix (default `MACHINERY`), consumed by compose/stack
//! invocations as environment.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use machinery_core::error::Result;
use machinery_core::file_system::{read_key_value_file, sidecar_path, write_key_value_file};
use tracing::debug;

pub const DEFAULT_PREFIX: &str = "MACHINERY";

/// One interface's addresses, as observed on a machine.
#[derive(Debug, Clone)]
pub struct InterfaceAddr {
    pub name: String,
    pub inet: Option<String>,
    pub inet6: Option<String>,
}

/// What's known about a machine at the moment discovery runs for it.
#[derive(Debug, Clone, Default)]
pub struct MachineObservation {
    pub running: bool,
    pub interfaces: Vec<InterfaceAddr>,
    pub main_ip: Option<String>,
    pub main_hostname: Option<String>,
}

/// The discovery cache for one cluster's side-car file.
pub struct DiscoveryCache {
    path: PathBuf,
    prefix: String,
}

impl DiscoveryCache {
    /// Opens the discovery cache next to `cluster_origin` (`.NAME.env`).
    pub fn for_cluster(cluster_origin: &Path, prefix: impl Into<String>) -> Self {
        Self {
            path: sidecar_path(cluster_origin, ".env"),
            prefix: prefix.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrites the discovery cache for one machine: first strips every key
    /// belonging to `machine_name` and its `aliases`, then — if `obs.running`
    /// — writes the fresh set of keys for each non-`v*` interface, plus the
    /// main IP/hostname, under both the machine's own name and every alias
    /// (spec §4.7).
    pub fn update(
        &self,
        machine_name: &str,
        aliases: &[String],
        obs: &MachineObservation,
    ) -> Result<()> {
        let mut map = read_key_value_file(&self.path)?;

        let mut all_names = vec![machine_name.to_string()];
        all_names.extend(aliases.iter().cloned());

        for name in &all_names {
            remove_keys_for(&mut map, &self.prefix, name);
        }

        if obs.running {
            for name in &all_names {
                write_keys_for(&mut map, &self.prefix, name, obs);
            }
        } else {
            debug!("machine '{machine_name}' not running, discovery keys removed only");
        }

        write_key_value_file(&self.path, &map)
    }

    pub fn read(&self) -> Result<IndexMap<String, String>> {
        read_key_value_file(&self.path)
    }
}

fn key_segment(name: &str) -> String {
    name.to_uppercase().replace(['-', '.'], "_")
}

fn is_virtual_interface(name: &str) -> bool {
    name.starts_with('v')
}

fn remove_keys_for(map: &mut IndexMap<String, String>, prefix: &str, name: &str) {
    let marker = format!("{}_{}_", prefix.to_uppercase(), key_segment(name));
    let exact_ip = format!("{}_{}_IP", prefix.to_uppercase(), key_segment(name));
    let exact_hostname = format!("{}_{}_HOSTNAME", prefix.to_uppercase(), key_segment(name));
    map.retain(|k, _| !(k.starts_with(&marker) || *k == exact_ip || *k == exact_hostname));
}

fn write_keys_for(
    map: &mut IndexMap<String, String>,
    prefix: &str,
    name: &str,
    obs: &MachineObservation,
) {
    let prefix_up = prefix.to_uppercase();
    let name_seg = key_segment(name);

    for iface in &obs.interfaces {
        if is_virtual_interface(&iface.name) {
            continue;
        }
        let iface_seg = key_segment(&iface.name);
        if let Some(inet) = &iface.inet {
            map.insert(format!("{prefix_up}_{name_seg}_{iface_seg}_INET"), inet.clone());
        }
        if let Some(inet6) = &iface.inet6 {
            map.insert(format!("{prefix_up}_{name_seg}_{iface_seg}_INET6"), inet6.clone());
        }
    }
    if let Some(ip) = &obs.main_ip {
        map.insert(format!("{prefix_up}_{name_seg}_IP"), ip.clone());
    }
    if let Some(hostname) = &obs.main_hostname {
        map.insert(format!("{prefix_up}_{name_seg}_HOSTNAME"), hostname.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_observation() -> MachineObservation {
        MachineObservation {
            running: true,
            interfaces: vec![
                InterfaceAddr {
                    name: "eth0".to_string(),
                    inet: Some("192.168.99.100".to_string()),
                    inet6: Some("fe80::1".to_string()),
                },
                InterfaceAddr {
                    name: "veth1".to_string(),
                    inet: Some("172.17.0.1".to_string()),
                    inet6: None,
                },
            ],
            main_ip: Some("192.168.99.100".to_string()),
            main_hostname: Some("n1.local".to_string()),
        }
    }

    #[test]
    fn discovery_round_trip_writes_non_virtual_interfaces() {
        let dir = tempfile::tempdir().unwrap();
        let origin = dir.path().join("proj.yaml");
        let cache = DiscoveryCache::for_cluster(&origin, DEFAULT_PREFIX);

        cache.update("proj-n1", &[], &sample_observation()).unwrap();
        let map = cache.read().unwrap();

        assert_eq!(map["MACHINERY_PROJ_N1_ETH0_INET"], "192.168.99.100");
        assert_eq!(map["MACHINERY_PROJ_N1_ETH0_INET6"], "fe80::1");
        assert_eq!(map["MACHINERY_PROJ_N1_IP"], "192.168.99.100");
        assert_eq!(map["MACHINERY_PROJ_N1_HOSTNAME"], "n1.local");
        assert!(!map.contains_key("MACHINERY_PROJ_N1_VETH1_INET"));
    }

    #[test]
    fn stopping_a_machine_removes_only_its_keys() {
        let dir = tempfile::tempdir().unwrap();
        let origin = dir.path().join("proj.yaml");
        let cache = DiscoveryCache::for_cluster(&origin, DEFAULT_PREFIX);

        cache.update("proj-n1", &[], &sample_observation()).unwrap();
        cache.update("proj-n2", &[], &sample_observation()).unwrap();

        cache
            .update("proj-n1", &[], &MachineObservation::default())
            .unwrap();

        let map = cache.read().unwrap();
        assert!(!map.contains_key("MACHINERY_PROJ_N1_IP"));
        assert_eq!(map["MACHINERY_PROJ_N2_IP"], "192.168.99.100");
    }

    #[test]
    fn aliases_get_the_same_keys() {
        let dir = tempfile::tempdir().unwrap();
        let origin = dir.path().join("proj.yaml");
        let cache = DiscoveryCache::for_cluster(&origin, DEFAULT_PREFIX);

        cache
            .update("proj-n1", &["proj-primary".to_string()], &sample_observation())
            .unwrap();
        let map = cache.read().unwrap();
        assert_eq!(map["MACHINERY_PROJ_PRIMARY_IP"], "192.168.99.100");
        assert_eq!(map["MACHINERY_PROJ_N1_IP"], "192.168.99.100");
    }
}
