//! On-disk layout shared by the producer and consumer paths.
//!
//! Metadata for an artifact at `<artifacts-dir>/<rel>` lives at
//! `<artifacts-dir>/.artimirror/torrents/<rel>.torrent`.

use std::path::{Component, Path, PathBuf};

/// Directory under an artifacts root reserved for mirror bookkeeping.
pub const METADATA_DIR_NAME: &str = ".artimirror";
/// Sub-directory of [`METADATA_DIR_NAME`] holding metadata files.
pub const TORRENTS_DIR_NAME: &str = "torrents";
/// Extension appended to a relative artifact path to name its metadata file.
pub const METADATA_EXTENSION: &str = "torrent";
/// Relative URL/path prefix of the metadata tree, `/`-separated.
pub const TORRENTS_PREFIX: &str = ".artimirror/torrents";

/// Metadata root for a build's artifacts directory.
#[must_use]
pub fn torrents_root(artifacts_dir: &Path) -> PathBuf {
    artifacts_dir.join(METADATA_DIR_NAME).join(TORRENTS_DIR_NAME)
}

/// Join a `/`-separated relative path onto `root`.
///
/// Returns `None` for empty paths and for paths with absolute, parent, or
/// current-directory components.
#[must_use]
pub fn join_relative(root: &Path, relative: &str) -> Option<PathBuf> {
    let mut joined = root.to_path_buf();
    let mut segments = 0_usize;
    for segment in relative.split('/') {
        if segment.is_empty() {
            continue;
        }
        let mut components = Path::new(segment).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => joined.push(segment),
            _ => return None,
        }
        segments += 1;
    }
    (segments > 0).then_some(joined)
}

/// Metadata file path for a relative artifact path under `torrents_root`.
#[must_use]
pub fn metadata_path(torrents_root: &Path, relative: &str) -> Option<PathBuf> {
    let trimmed = relative.trim_matches('/');
    join_relative(torrents_root, &format!("{trimmed}.{METADATA_EXTENSION}"))
}

/// `/`-separated path of `path` relative to `root`, if it lies beneath it.
#[must_use]
pub fn relative_string(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            _ => return None,
        }
    }
    (!parts.is_empty()).then(|| parts.join("/"))
}
