//! # machinery-tool
//!
//! The Tool Runner (spec §4.9): a uniform way to invoke `docker`,
//! `docker-machine` and `docker-compose`, capture or stream their output,
//! collapse `docker-machine`'s logrus lines into leveled log records, parse
//! tabular output into records, and parse `--help` text into a recognized
//! option set.

pub mod logrus;
pub mod options;
pub mod runner;
pub mod table;
pub mod version;

pub use runner::{RunOptions, ToolRunner};
pub use table::parse_table;
