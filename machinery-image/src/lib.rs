//! # machinery-image
//!
//! The Image Cache (spec §4.5): resolves per-image caching hints, compares
//! image identities between a local pull and a target endpoint, and either
//! skips, transfers via `save`/`scp`/`load`, or pulls directly over SSH.

pub mod cache;
pub mod endpoint;

pub use cache::{cache_enabled, cache_image, images_identical, pull, pull_direct};
pub use endpoint::DockerEndpoint;
