//! # machinery-mount
//!
//! Mount VFS (spec §2): attaches archive sources so paths inside them are
//! transparently accessible to callers that otherwise only deal in plain
//! host paths — the YAML Model and Share Engine use this when a `shares:`
//! or `compose:` source is not a plain local path but an archive reference
//! of the form `archive:///path/to/bundle.tar.gz!relative/inner/path`.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use flate2::read::GzDecoder;
use machinery_core::error::{MachineryError, Result};
use once_cell::sync::Lazy;
use tar::Archive;

const ARCHIVE_PREFIX: &str = "archive://";

/// Caches one extraction directory per archive path for the process
/// lifetime, so resolving several inner paths from the same archive only
/// extracts it once.
static EXTRACTED: Lazy<Mutex<HashMap<PathBuf, PathBuf>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Resolves `source` to a plain filesystem path:
/// - a bare path is returned unchanged (after existence isn't checked here;
///   callers do that),
/// - `archive:///abs/path/to.tar.gz!inner/path` extracts the archive once
///   into a temp directory and returns the path to `inner/path` within it.
pub fn resolve(source: &str) -> Result<PathBuf> {
    let Some(rest) = source.strip_prefix(ARCHIVE_PREFIX) else {
        return Ok(PathBuf::from(source));
    };
    let Some((archive_path, inner_path)) = rest.split_once('!') else {
        return Err(MachineryError::Resolution(format!(
            "archive source '{source}' missing '!inner/path' suffix"
        )));
    };
    let archive_path = PathBuf::from(archive_path);
    let extracted_dir = extract_archive(&archive_path)?;
    Ok(extracted_dir.join(inner_path))
}

fn extract_archive(archive_path: &Path) -> Result<PathBuf> {
    {
        let cache = EXTRACTED.lock().expect("mount vfs cache lock poisoned");
        if let Some(dir) = cache.get(archive_path) {
            return Ok(dir.clone());
        }
    }

    let dest = tempfile::Builder::new()
        .prefix("machinery-mount-")
        .tempdir()
        .map_err(MachineryError::Io)?
        .into_path();

    let file = File::open(archive_path).map_err(|e| {
        MachineryError::Resolution(format!("cannot open archive {}: {e}", archive_path.display()))
    })?;

    if archive_path.extension().and_then(|e| e.to_str()) == Some("gz")
        || archive_path.to_string_lossy().ends_with(".tar.gz")
        || archive_path.to_string_lossy().ends_with(".tgz")
    {
        let mut archive = Archive::new(GzDecoder::new(file));
        archive.unpack(&dest).map_err(MachineryError::Io)?;
    } else {
        let mut archive = Archive::new(file);
        archive.unpack(&dest).map_err(MachineryError::Io)?;
    }

    EXTRACTED
        .lock()
        .expect("mount vfs cache lock poisoned")
        .insert(archive_path.to_path_buf(), dest.clone());
    Ok(dest)
}

/// True if `source` uses the archive-VFS syntax rather than being a plain
/// path.
pub fn is_archive_source(source: &str) -> bool {
    source.starts_with(ARCHIVE_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn plain_path_passes_through() {
        assert_eq!(resolve("/home/user/share").unwrap(), PathBuf::from("/home/user/share"));
        assert!(!is_archive_source("/home/user/share"));
    }

    #[test]
    fn archive_without_inner_path_errors() {
        assert!(resolve("archive:///tmp/bundle.tar.gz").is_err());
    }

    #[test]
    fn extracts_tar_gz_and_resolves_inner_path() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("bundle.tar.gz");

        {
            let file = File::create(&archive_path).unwrap();
            let enc = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            let mut builder = tar::Builder::new(enc);
            let src_dir = tempfile::tempdir().unwrap();
            let inner_file = src_dir.path().join("config.yaml");
            std::fs::File::create(&inner_file)
                .unwrap()
                .write_all(b"key: value")
                .unwrap();
            builder.append_path_with_name(&inner_file, "config.yaml").unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        let source = format!("archive://{}!config.yaml", archive_path.display());
        assert!(is_archive_source(&source));
        let resolved = resolve(&source).unwrap();
        assert_eq!(std::fs::read_to_string(resolved).unwrap(), "key: value");
    }
}
