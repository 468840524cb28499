//! Swarm token side-car (`.NAME.swt`, spec §6, §4.4 step 2).
//!
//! Classic Swarm stores a single discovery token; Swarm Mode stores the
//! pair `MANAGER WORKER` on one whitespace-separated line. Both clustering
//! modes read/write the same side-car path, since a cluster only ever runs
//! one mode at a time.

use std::path::{Path, PathBuf};

use machinery_core::error::{MachineryError, Result};
use machinery_core::file_system::{atomic_write, SidecarCache};

/// The pair of join tokens Swarm Mode caches after `docker swarm init`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub manager: String,
    pub worker: String,
}

/// Caches the contents of one cluster's `.swt` file for the retention
/// window (spec §5), same exclusivity semantics as the discovery cache.
pub struct TokenStore {
    path: PathBuf,
    cache: SidecarCache<Option<String>>,
}

impl TokenStore {
    pub fn for_cluster(origin: &Path) -> Self {
        Self {
            path: machinery_core::file_system::sidecar_path(origin, ".swt"),
            cache: SidecarCache::with_default_retention(),
        }
    }

    fn read_raw(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let trimmed = contents.trim();
                if trimmed.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(trimmed.to_string()))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Classic Swarm: the single cached discovery token, if one has been
    /// written yet.
    pub fn classic_token(&self) -> Result<Option<String>> {
        let path = self.path.clone();
        self.cache.get_or_load(&path, || self.read_raw())
    }

    pub fn write_classic_token(&self, token: &str) -> Result<()> {
        atomic_write(&self.path, token.as_bytes())?;
        self.cache.invalidate(&self.path);
        Ok(())
    }

    /// Swarm Mode: the cached manager/worker join-token pair, if present.
    pub fn token_pair(&self) -> Result<Option<TokenPair>> {
        let raw = self.read_raw()?;
        Ok(raw.and_then(|line| {
            let mut parts = line.split_whitespace();
            let manager = parts.next()?.to_string();
            let worker = parts.next()?.to_string();
            Some(TokenPair { manager, worker })
        }))
    }

    pub fn write_token_pair(&self, pair: &TokenPair) -> Result<()> {
        let contents = format!("{} {}\n", pair.manager, pair.worker);
        atomic_write(&self.path, contents.as_bytes())?;
        self.cache.invalidate(&self.path);
        Ok(())
    }
}

/// Generates a fresh classic Swarm discovery token via `docker run --rm
/// swarm create`, capturing the single line of output.
pub fn generate_classic_token(
    runner: &machinery_tool::runner::ToolRunner,
) -> Result<String> {
    use machinery_tool::runner::{RunOptions, Tool};
    let output = runner.run(
        Tool::Docker,
        &["run", "--rm", "swarm", "create"],
        &RunOptions::capture(),
    )?;
    output
        .lines
        .first()
        .cloned()
        .ok_or_else(|| MachineryError::Tool("swarm create produced no token".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classic_token_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let origin = dir.path().join("cluster.yaml");
        let store = TokenStore::for_cluster(&origin);
        assert_eq!(store.classic_token().unwrap(), None);
        store.write_classic_token("abcd1234").unwrap();
        assert_eq!(store.classic_token().unwrap(), Some("abcd1234".to_string()));
    }

    #[test]
    fn token_pair_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let origin = dir.path().join("cluster.yaml");
        let store = TokenStore::for_cluster(&origin);
        assert_eq!(store.token_pair().unwrap(), None);
        let pair = TokenPair {
            manager: "SWMTKN-manager".to_string(),
            worker: "SWMTKN-worker".to_string(),
        };
        store.write_token_pair(&pair).unwrap();
        assert_eq!(store.token_pair().unwrap(), Some(pair));
    }
}
