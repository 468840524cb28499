//! # machinery-model
//!
//! The YAML Model (spec §4.1, §3): parses a cluster specification file,
//! merges `include:` and `extends:` references, validates and whitelists
//! keys, and produces the typed [`types::Cluster`] the rest of the engine
//! operates on.

pub mod merge;
pub mod resolve;
pub mod types;

pub use resolve::{parse_cluster, ResolverConfig};
pub use types::{
    Application, Cluster, ClusterOptions, ClusteringMode, ComposeSpec, ExecSpec, FileSpec,
    Machine, MachineRunState, MachineSpec, MachineState, Network, PortSpec, RegistrySpec,
    ShareSpec, SwarmSpec,
};
