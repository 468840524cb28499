//! KEY=VAL side-car file helpers and a small process-exclusive cache.
//!
//! Discovery (`.NAME.env`), swarm tokens (`.NAME.swt`) and machine state
//! side-cars are all flat text files the engine rewrites wholesale. §5 says
//! these are held in memory for at most `retention` milliseconds before
//! being re-read; [`SidecarCache`] implements that.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use indexmap::IndexMap;

use crate::error::Result;

/// Default retention window for cached side-car reads (spec §5).
pub const DEFAULT_RETENTION: Duration = Duration::from_millis(10_000);

/// Parses `KEY=VAL` lines, skipping blank lines and `#`-comments. Order is
/// preserved since discovery output groups keys by machine.
pub fn parse_key_value(contents: &str) -> IndexMap<String, String> {
    let mut map = IndexMap::new();
    for line in contents.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = trimmed.split_once('=') {
            map.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    map
}

/// Renders a `KEY=VAL` map back to text, one entry per line, in map order.
pub fn render_key_value(map: &IndexMap<String, String>) -> String {
    let mut out = String::new();
    for (k, v) in map {
        out.push_str(k);
        out.push('=');
        out.push_str(v);
        out.push('\n');
    }
    out
}

/// Reads and parses a `KEY=VAL` file; a missing file yields an empty map
/// rather than an error, since side-cars are created lazily.
pub fn read_key_value_file(path: &Path) -> Result<IndexMap<String, String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(parse_key_value(&contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(IndexMap::new()),
        Err(e) => Err(e.into()),
    }
}

/// Writes a `KEY=VAL` map wholesale via a temp-file-then-rename, so a reader
/// never observes a half-written side-car.
pub fn write_key_value_file(path: &Path, map: &IndexMap<String, String>) -> Result<()> {
    atomic_write(path, render_key_value(map).as_bytes())
}

/// Writes `contents` to `path` by writing to a sibling temp file and
/// renaming over the destination, so partial writes are never observable.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// A value paired with the instant it was loaded, used to bound how long a
/// side-car's in-memory contents are trusted before a caller re-reads it.
struct Entry<T> {
    value: T,
    loaded_at: Instant,
}

/// Caches the parsed contents of side-car files for up to `retention`,
/// keyed by path. Holds the process-exclusive cache semantics from §5:
/// reads within the window return the cached value, reads after it expires
/// re-invoke the loader and rewrite the cache.
pub struct SidecarCache<T: Clone> {
    retention: Duration,
    entries: Mutex<HashMap<PathBuf, Entry<T>>>,
}

impl<T: Clone> SidecarCache<T> {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_default_retention() -> Self {
        Self::new(DEFAULT_RETENTION)
    }

    /// Returns the cached value for `path` if still fresh, otherwise calls
    /// `loader`, caches the result, and returns it.
    pub fn get_or_load<F>(&self, path: &Path, loader: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        {
            let entries = self.entries.lock().expect("sidecar cache lock poisoned");
            if let Some(entry) = entries.get(path) {
                if entry.loaded_at.elapsed() < self.retention {
                    return Ok(entry.value.clone());
                }
            }
        }
        let value = loader()?;
        let mut entries = self.entries.lock().expect("sidecar cache lock poisoned");
        entries.insert(
            path.to_path_buf(),
            Entry {
                value: value.clone(),
                loaded_at: Instant::now(),
            },
        );
        Ok(value)
    }

    /// Forces the next `get_or_load` for `path` to re-invoke the loader.
    pub fn invalidate(&self, path: &Path) {
        self.entries
            .lock()
            .expect("sidecar cache lock poisoned")
            .remove(path);
    }
}

/// Derives the side-car path `.{rootname}{suffix}` next to `origin`
/// (e.g. `.mycluster.env`, `.mycluster.swt`).
pub fn sidecar_path(origin: &Path, suffix: &str) -> PathBuf {
    let dir = origin.parent().unwrap_or_else(|| Path::new("."));
    let rootname = origin
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("cluster");
    dir.join(format!(".{rootname}{suffix}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn parse_and_render_round_trip() {
        let text = "FOO=bar\n# comment\n\nBAZ=qux\n";
        let map = parse_key_value(text);
        assert_eq!(map.get("FOO").unwrap(), "bar");
        assert_eq!(map.get("BAZ").unwrap(), "qux");
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn missing_file_is_empty_map() {
        let map = read_key_value_file(Path::new("/nonexistent/does-not-exist.env")).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".cluster.env");
        let mut map = IndexMap::new();
        map.insert("A".to_string(), "1".to_string());
        map.insert("B".to_string(), "2".to_string());
        write_key_value_file(&path, &map).unwrap();

        let read_back = read_key_value_file(&path).unwrap();
        assert_eq!(read_back, map);
    }

    #[test]
    fn sidecar_path_derives_from_origin_stem() {
        let origin = Path::new("/home/user/cluster.yaml");
        assert_eq!(
            sidecar_path(origin, ".env"),
            PathBuf::from("/home/user/.cluster.env")
        );
    }

    #[test]
    fn sidecar_cache_reuses_within_retention() {
        let cache: SidecarCache<i32> = SidecarCache::new(Duration::from_secs(60));
        let calls = Cell::new(0);
        let path = Path::new("/tmp/whatever.env");

        let first = cache
            .get_or_load(path, || {
                calls.set(calls.get() + 1);
                Ok(1)
            })
            .unwrap();
        let second = cache
            .get_or_load(path, || {
                calls.set(calls.get() + 1);
                Ok(2)
            })
            .unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 1);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn sidecar_cache_invalidate_forces_reload() {
        let cache: SidecarCache<i32> = SidecarCache::new(Duration::from_secs(60));
        let path = Path::new("/tmp/other.env");
        cache.get_or_load(path, || Ok(1)).unwrap();
        cache.invalidate(path);
        let value = cache.get_or_load(path, || Ok(2)).unwrap();
        assert_eq!(value, 2);
    }
}
