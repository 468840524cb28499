//! # machinery-core
//!
//! Foundational types shared by every machinery crate: the error enum,
//! `$VAR` environment resolution with scoped overlays, name comparison
//! between short and fully-qualified machine names, a LIFO cleanup
//! registry, and KEY=VAL side-car file helpers with a retention cache.

pub mod cleanup;
pub mod environment;
pub mod error;
pub mod file_system;
pub mod name;

pub use error::{MachineryError, Result};
