//! The Image Cache decision and transfer pipeline (spec §4.5).

use machinery_core::error::Result;
use machinery_tool::runner::{RunOptions, ToolRunner};
use tracing::info;
use uuid::Uuid;

use crate::endpoint::DockerEndpoint;

/// Whether caching is active for one image, resolved from the first
/// matching `caching: [pattern hint ...]` entry, or disabled globally.
pub fn cache_enabled(image: &str, caching_patterns: &[String], global_disable: bool) -> bool {
    if global_disable {
        return false;
    }
    for pattern in caching_patterns {
        let (glob_pattern, hint) = match pattern.split_once(' ') {
            Some((p, h)) => (p, h),
            None => (pattern.as_str(), "on"),
        };
        if glob::Pattern::new(glob_pattern)
            .map(|p| p.matches(image))
            .unwrap_or(false)
        {
            return hint != "off";
        }
    }
    true
}

/// Reads the local and remote `--no-trunc` image ids and reports whether
/// they already match (spec §4.5 step 2: skip transfer when identical).
pub fn images_identical(
    runner: &ToolRunner,
    local: &DockerEndpoint,
    remote: &DockerEndpoint,
    image: &str,
) -> Result<bool> {
    let local_id = image_id(runner, local, image)?;
    let remote_id = image_id(runner, remote, image)?;
    Ok(!local_id.is_empty() && local_id == remote_id)
}

fn image_id(runner: &ToolRunner, endpoint: &DockerEndpoint, image: &str) -> Result<String> {
    let output = endpoint.run(
        runner,
        &["images", "-q", "--no-trunc", image],
        &RunOptions::capture(),
    )?;
    Ok(output.lines.first().cloned().unwrap_or_default())
}

/// Pulls `image` at `endpoint`.
pub fn pull(runner: &ToolRunner, endpoint: &DockerEndpoint, image: &str) -> Result<()> {
    endpoint.run(runner, &["pull", image], &RunOptions::default())?;
    Ok(())
}

/// Full caching transfer: pull locally (or at a caching machine), compare
/// ids, and only `save`/`scp`/`load` if they differ. `scp` is provided by
/// the caller since it depends on `docker-machine scp`, outside this
/// crate's remit.
pub fn cache_image<F>(
    runner: &ToolRunner,
    local: &DockerEndpoint,
    target: &DockerEndpoint,
    image: &str,
    scp: F,
) -> Result<()>
where
    F: FnOnce(&std::path::Path) -> Result<()>,
{
    pull(runner, local, image)?;

    if images_identical(runner, local, target, image)? {
        info!("image '{image}' already present at current version, skipping transfer");
        return Ok(());
    }

    let tmp_path = std::env::temp_dir().join(format!("machinery-img-{}.tar", Uuid::new_v4()));
    local.run(
        runner,
        &["save", "-o", tmp_path.to_str().unwrap_or_default(), image],
        &RunOptions::default(),
    )?;

    scp(&tmp_path)?;

    target.run(
        runner,
        &["load", "-i", tmp_path.to_str().unwrap_or_default()],
        &RunOptions::default(),
    )?;

    let _ = std::fs::remove_file(&tmp_path);
    Ok(())
}

/// Caching-off path: pull directly at the target over SSH (handled by the
/// caller's endpoint being the remote one).
pub fn pull_direct(runner: &ToolRunner, target: &DockerEndpoint, image: &str) -> Result<()> {
    pull(runner, target, image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_matching_pattern_wins() {
        let patterns = vec!["alpine:* off".to_string(), "* on".to_string()];
        assert!(!cache_enabled("alpine:3.10", &patterns, false));
        assert!(cache_enabled("redis:latest", &patterns, false));
    }

    #[test]
    fn global_disable_short_circuits() {
        let patterns = vec!["* on".to_string()];
        assert!(!cache_enabled("redis:latest", &patterns, true));
    }

    #[test]
    fn default_hint_is_on_when_unspecified() {
        let patterns = vec!["alpine:*".to_string()];
        assert!(cache_enabled("alpine:3.10", &patterns, false));
    }

    #[test]
    fn no_match_defaults_to_on() {
        assert!(cache_enabled("anything", &[], false));
    }
}
