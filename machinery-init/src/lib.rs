//! # machinery-init
//!
//! The Init Pipeline (spec §4.3): ten independently-skippable steps run in
//! a fixed canonical order per machine, with `networks`/`labels`/
//! `applications` held back for the cluster's manager under Swarm Mode
//! until every machine has finished its worker-class steps (spec §5).

pub mod docker_env;
pub mod ops;
pub mod pipeline;
pub mod steps;

pub use pipeline::{run, InitContext};
pub use steps::{resolve_steps, InitStep, CANONICAL_ORDER};
