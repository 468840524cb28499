//! Typed cluster model (spec §3): the product of parsing and resolving one
//! cluster YAML file.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// `docker swarm` (classic, token-discovery based) vs the modern built-in
/// Swarm Mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusteringMode {
    #[serde(alias = "docker swarm", alias = "classic")]
    DockerSwarm,
    #[serde(alias = "swarm mode")]
    SwarmMode,
}

impl Default for ClusteringMode {
    fn default() -> Self {
        ClusteringMode::DockerSwarm
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterOptions {
    #[serde(default)]
    pub clustering: ClusteringMode,
}

/// `swarm:` can be a bare bool or a map of per-role join options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SwarmSpec {
    Enabled(bool),
    Options(IndexMap<String, serde_json::Value>),
}

impl Default for SwarmSpec {
    fn default() -> Self {
        SwarmSpec::Enabled(false)
    }
}

impl SwarmSpec {
    pub fn is_enabled(&self) -> bool {
        match self {
            SwarmSpec::Enabled(b) => *b,
            SwarmSpec::Options(_) => true,
        }
    }

    pub fn explicitly_disabled(&self) -> bool {
        matches!(self, SwarmSpec::Enabled(false))
    }

    pub fn options(&self) -> IndexMap<String, serde_json::Value> {
        match self {
            SwarmSpec::Options(m) => m.clone(),
            SwarmSpec::Enabled(_) => IndexMap::new(),
        }
    }
}

/// A port forwarding entry, `host:guest[/protocol]` or a structured form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortSpec {
    String(String),
    Struct {
        host: u16,
        guest: u16,
        #[serde(default = "default_protocol")]
        protocol: String,
    },
}

fn default_protocol() -> String {
    "tcp".to_string()
}

/// A share spec: single path, `[host, guest, type]`, or `host:guest:type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ShareSpec {
    Path(String),
    Colon(String),
    List(Vec<String>),
}

/// An image reference in a machine's `images:` list.
pub type ImageSpec = String;

/// A `compose:` project entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeSpec {
    pub file: String,
    #[serde(default)]
    pub project: Option<String>,
}

/// A `registries:` login entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySpec {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// A `files:` copy entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSpec {
    pub source: String,
    pub destination: String,
}

/// A `prelude:`/`addendum:` exec entry: either a bare command string or a
/// structured host/guest script reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExecSpec {
    Command(String),
    Script { script: String, #[serde(default)] guest: bool },
}

/// Declarative, YAML-sourced fields of a machine (spec §3 "Machine").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MachineSpec {
    #[serde(default)]
    pub driver: Option<String>,
    #[serde(default)]
    pub cpu: Option<u32>,
    #[serde(default)]
    pub memory: Option<u32>,
    #[serde(default)]
    pub size: Option<u32>,
    #[serde(default)]
    pub master: Option<bool>,
    #[serde(default)]
    pub swarm: Option<SwarmSpec>,
    #[serde(default)]
    pub labels: IndexMap<String, String>,
    #[serde(default)]
    pub ports: Vec<PortSpec>,
    #[serde(default)]
    pub shares: Vec<ShareSpec>,
    #[serde(default)]
    pub images: Vec<ImageSpec>,
    #[serde(default)]
    pub compose: Vec<ComposeSpec>,
    #[serde(default)]
    pub registries: Vec<RegistrySpec>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub files: Vec<FileSpec>,
    #[serde(default)]
    pub prelude: Vec<ExecSpec>,
    #[serde(default)]
    pub addendum: Vec<ExecSpec>,
    #[serde(default)]
    pub environment: IndexMap<String, String>,
    #[serde(default)]
    pub env_file: Option<String>,
    #[serde(default)]
    pub options: IndexMap<String, serde_json::Value>,
    #[serde(default)]
    pub caching: Vec<String>,
    /// `extends:` references, consumed entirely during resolution; never
    /// present on the final resolved `MachineSpec`.
    #[serde(default)]
    pub extends: Vec<String>,
}

/// The reachable-state half of a Machine, filled in by `bind` (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineRunState {
    Created,
    Running,
    Stopped,
    Error,
    Timeout,
}

impl Default for MachineRunState {
    fn default() -> Self {
        MachineRunState::Created
    }
}

impl MachineRunState {
    pub fn parse(raw: &str) -> MachineRunState {
        match raw.trim().to_lowercase().as_str() {
            "running" => MachineRunState::Running,
            "stopped" | "off" => MachineRunState::Stopped,
            "error" => MachineRunState::Error,
            "timeout" => MachineRunState::Timeout,
            _ => MachineRunState::Created,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MachineState {
    pub state: Option<MachineRunState>,
    pub url: Option<String>,
    pub active: bool,
    pub swarm_role: Option<String>,
}

/// A fully resolved machine: its declarative spec plus any observed live
/// state (spec §3 "after binding").
#[derive(Debug, Clone)]
pub struct Machine {
    pub short_name: String,
    pub full_name: String,
    pub aliases: Vec<String>,
    pub origin: PathBuf,
    pub spec: MachineSpec,
    pub state: MachineState,
}

impl Machine {
    pub fn base_dir(&self) -> PathBuf {
        self.origin
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn is_master(&self) -> bool {
        self.spec.master.unwrap_or(false)
    }

    /// Role under Swarm Mode (spec §4.4): `manager` when master and
    /// swarming isn't explicitly disabled, `worker` when not master and
    /// swarming is on, `""` otherwise.
    pub fn swarm_mode_role(&self) -> &'static str {
        let swarm_on = self
            .spec
            .swarm
            .as_ref()
            .map(|s| !s.explicitly_disabled())
            .unwrap_or(true);
        if !swarm_on {
            return "";
        }
        if self.is_master() {
            "manager"
        } else {
            "worker"
        }
    }
}

/// A cluster-wide overlay network (spec §3 "Network").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    #[serde(default = "default_network_driver")]
    pub driver: String,
    #[serde(default = "default_true")]
    pub attachable: bool,
    #[serde(default = "default_network_scope")]
    pub scope: String,
    #[serde(default)]
    pub options: IndexMap<String, String>,
}

fn default_network_driver() -> String {
    "overlay".to_string()
}

fn default_network_scope() -> String {
    "swarm".to_string()
}

fn default_true() -> bool {
    true
}

/// A Swarm Mode application stack (spec §3 "Application").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub name: String,
    pub file: String,
}

/// The product of parsing one cluster YAML file (spec §3 "Cluster").
#[derive(Debug, Clone)]
pub struct Cluster {
    pub origin: PathBuf,
    pub prefix: String,
    pub machines: Vec<Machine>,
    pub networks: Vec<Network>,
    pub applications: Vec<Application>,
    pub environment: IndexMap<String, String>,
    pub options: ClusterOptions,
}

impl Cluster {
    /// Looks up a machine by either its short or fully-qualified name
    /// (spec §4.10, invariant 1).
    pub fn find(&self, name: &str) -> Option<&Machine> {
        self.machines.iter().find(|m| {
            machinery_core::name::name_eq_default(&m.full_name, name)
                || m.aliases
                    .iter()
                    .any(|a| machinery_core::name::name_eq_default(a, name))
        })
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Machine> {
        self.machines.iter_mut().find(|m| {
            machinery_core::name::name_eq_default(&m.full_name, name)
                || m.aliases
                    .iter()
                    .any(|a| machinery_core::name::name_eq_default(a, name))
        })
    }
}
