//! Tool version detection and caching (spec §6): each sub-tool's version is
//! probed once per process and cached, then branched on for backward
//! compatibility with older `docker-machine`/`docker-compose` releases.

use std::collections::HashMap;
use std::sync::Mutex;

use once_cell::sync::Lazy;
use regex::Regex;

static VERSION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\.(\d+)(?:\.(\d+))?").expect("static regex is valid"));

/// A parsed `major.minor.patch` version, comparable with the usual ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ToolVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ToolVersion {
    pub fn parse(text: &str) -> Option<ToolVersion> {
        let caps = VERSION_PATTERN.captures(text)?;
        Some(ToolVersion {
            major: caps[1].parse().ok()?,
            minor: caps[2].parse().ok()?,
            patch: caps
                .get(3)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0),
        })
    }

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }
}

/// Process-wide cache of each tool binary's detected version, keyed by the
/// binary path/name that was probed.
#[derive(Default)]
pub struct VersionCache {
    versions: Mutex<HashMap<String, ToolVersion>>,
}

impl VersionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached version for `tool`, probing with `probe` (usually
    /// `tool --version`) the first time it's needed.
    pub fn get_or_probe<F>(&self, tool: &str, probe: F) -> Option<ToolVersion>
    where
        F: FnOnce() -> Option<String>,
    {
        {
            let cache = self.versions.lock().expect("version cache lock poisoned");
            if let Some(v) = cache.get(tool) {
                return Some(*v);
            }
        }
        let version = probe().and_then(|text| ToolVersion::parse(&text))?;
        self.versions
            .lock()
            .expect("version cache lock poisoned")
            .insert(tool.to_string(), version);
        Some(version)
    }
}

/// `docker-machine scp` requires >= 0.3.
pub fn supports_machine_scp(v: ToolVersion) -> bool {
    v >= ToolVersion::new(0, 3, 0)
}

/// `docker-compose` before 1.2 requires invocation from the project's own
/// working directory rather than via `-f`/`--project-directory`.
pub fn compose_requires_cwd(v: ToolVersion) -> bool {
    v < ToolVersion::new(1, 2, 0)
}

/// `docker-compose --compatibility` landed in 1.20.
pub fn compose_supports_compatibility(v: ToolVersion) -> bool {
    v >= ToolVersion::new(1, 20, 0)
}

/// `docker-compose --remove-orphans` landed in 1.7.
pub fn compose_supports_remove_orphans(v: ToolVersion) -> bool {
    v >= ToolVersion::new(1, 7, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_typical_version_strings() {
        assert_eq!(
            ToolVersion::parse("docker-machine version 0.16.2, build ..."),
            Some(ToolVersion::new(0, 16, 2))
        );
        assert_eq!(
            ToolVersion::parse("docker-compose version 1.29"),
            Some(ToolVersion::new(1, 29, 0))
        );
    }

    #[test]
    fn feature_gates_match_spec_thresholds() {
        assert!(!supports_machine_scp(ToolVersion::new(0, 2, 0)));
        assert!(supports_machine_scp(ToolVersion::new(0, 3, 0)));

        assert!(compose_requires_cwd(ToolVersion::new(1, 1, 0)));
        assert!(!compose_requires_cwd(ToolVersion::new(1, 2, 0)));

        assert!(compose_supports_compatibility(ToolVersion::new(1, 20, 0)));
        assert!(!compose_supports_compatibility(ToolVersion::new(1, 19, 9)));

        assert!(compose_supports_remove_orphans(ToolVersion::new(1, 7, 0)));
        assert!(!compose_supports_remove_orphans(ToolVersion::new(1, 6, 9)));
    }

    #[test]
    fn version_cache_probes_once() {
        let cache = VersionCache::new();
        let mut calls = 0;
        let probe = || {
            Some("1.2.3".to_string())
        };
        let first = cache.get_or_probe("docker", probe);
        calls += 1;
        let second = cache.get_or_probe("docker", || {
            panic!("should not probe twice");
        });
        assert_eq!(first, second);
        assert_eq!(calls, 1);
    }
}
