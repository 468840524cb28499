pub use anyhow::bail;
use std::fmt::{self, Display, Formatter};
use thiserror::Error;

/// The error type shared across every machinery crate.
///
/// Mirrors the shape of a typical tool-runner error enum: one variant per
/// failure class from the spec's error-handling design (configuration,
/// transient remote, tool-reported, local IO, invariant violations), plus a
/// catch-all for anything bubbled up through `anyhow`.
#[derive(Error, Debug)]
pub enum MachineryError {
    Config(String),
    Parse(String),
    Resolution(String),
    Tool(String),
    Io(#[from] std::io::Error),
    Ssh(String),
    Timeout(String),
    Internal(String),
    Other(#[from] anyhow::Error),
}

impl Display for MachineryError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            MachineryError::Config(s) => write!(f, "Configuration error: {s}"),
            MachineryError::Parse(s) => write!(f, "Parse error: {s}"),
            MachineryError::Resolution(s) => write!(f, "Resolution error: {s}"),
            MachineryError::Tool(s) => write!(f, "Tool error: {s}"),
            MachineryError::Io(e) => write!(f, "I/O error: {e}"),
            MachineryError::Ssh(s) => write!(f, "SSH error: {s}"),
            MachineryError::Timeout(s) => write!(f, "Timed out: {s}"),
            MachineryError::Internal(s) => write!(f, "Internal error: {s}"),
            MachineryError::Other(e) => write!(f, "{e}"),
        }
    }
}

impl From<serde_yaml_ng::Error> for MachineryError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        MachineryError::Parse(err.to_string())
    }
}

impl From<serde_json::Error> for MachineryError {
    fn from(err: serde_json::Error) -> Self {
        MachineryError::Parse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MachineryError>;
