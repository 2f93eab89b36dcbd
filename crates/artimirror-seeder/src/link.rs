//! Metadata cache: link entries correlating an artifact with its metadata file.
//!
//! # Design
//! - A link entry lives at `<storage-root>/<typeId>/<buildId>/<rel>.link` and
//!   holds a small JSON document naming the artifact and its metadata file.
//! - Entries are staged under a unique name and hard-linked into place, so two
//!   writers racing on the same entry cannot interleave bytes. Filesystems
//!   without hard links fall back to an atomic rename.
//! - A link whose metadata file disappeared is dangling; lookups remove it and
//!   report it absent.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use artimirror_torrent_core::layout::join_relative;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::{SeederError, SeederResult};

/// Extension of link entry files.
pub const LINK_EXTENSION: &str = "link";

/// Build-specific directory under the storage root: `<typeId>/<buildId>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BuildScope {
    build_type_id: String,
    build_id: String,
}

impl BuildScope {
    /// Validate and build a scope.
    ///
    /// # Errors
    ///
    /// Returns [`SeederError::InvalidInput`] when either part is empty or is
    /// not a single plain path segment.
    pub fn new(build_type_id: &str, build_id: &str) -> SeederResult<Self> {
        Ok(Self {
            build_type_id: segment("build_type_id", build_type_id)?,
            build_id: segment("build_id", build_id)?,
        })
    }

    /// Build configuration identifier.
    #[must_use]
    pub fn build_type_id(&self) -> &str {
        &self.build_type_id
    }

    /// Build identifier.
    #[must_use]
    pub fn build_id(&self) -> &str {
        &self.build_id
    }

    fn dir(&self, storage_root: &Path) -> PathBuf {
        storage_root.join(&self.build_type_id).join(&self.build_id)
    }
}

impl fmt::Display for BuildScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.build_type_id, self.build_id)
    }
}

fn segment(field: &'static str, raw: &str) -> SeederResult<String> {
    let mut components = Path::new(raw).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !raw.contains('/') => Ok(raw.to_string()),
        _ => Err(SeederError::invalid(field, "not_a_path_segment", raw)),
    }
}

/// Parsed contents of a link entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLink {
    /// Absolute path of the artifact.
    pub artifact: PathBuf,
    /// Absolute path of its metadata file.
    pub metadata: PathBuf,
}

/// Link entries rooted at one storage directory.
#[derive(Debug, Clone)]
pub struct LinkStore {
    storage_root: PathBuf,
}

impl LinkStore {
    /// Store rooted at `storage_root`; the directory is created lazily.
    #[must_use]
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
        }
    }

    /// Root directory holding every scope.
    #[must_use]
    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Location of the link entry for `relative` in `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`SeederError::InvalidInput`] when `relative` is empty or
    /// escapes the scope directory.
    pub fn link_path(&self, relative: &str, scope: &BuildScope) -> SeederResult<PathBuf> {
        let trimmed = relative.trim_matches('/');
        join_relative(
            &scope.dir(&self.storage_root),
            &format!("{trimmed}.{LINK_EXTENSION}"),
        )
        .ok_or_else(|| SeederError::invalid("relative_path", "not_relative", relative))
    }

    /// Whether a valid link entry exists for `relative` in `scope`.
    ///
    /// A dangling entry is removed and reported absent.
    ///
    /// # Errors
    ///
    /// Returns an error when the entry exists but cannot be read or removed.
    pub fn link_exists(&self, relative: &str, scope: &BuildScope) -> SeederResult<bool> {
        Ok(self.lookup(relative, scope)?.is_some())
    }

    /// Parsed link entry for `relative` in `scope`, if present and not dangling.
    ///
    /// # Errors
    ///
    /// Returns an error when the entry exists but cannot be read or removed.
    pub fn lookup(&self, relative: &str, scope: &BuildScope) -> SeederResult<Option<FileLink>> {
        let path = self.link_path(relative, scope)?;
        let link = match self.read(&path) {
            Ok(link) => link,
            Err(SeederError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                return Ok(None);
            }
            Err(SeederError::Json { .. }) => {
                warn!(link = %path.display(), "removing unreadable link entry");
                self.remove(&path)?;
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        if link.metadata.is_file() {
            Ok(Some(link))
        } else {
            debug!(link = %path.display(), "removing dangling link entry");
            self.remove(&path)?;
            Ok(None)
        }
    }

    /// Record that `metadata` describes `artifact` for `relative` in `scope`.
    ///
    /// Creating an identical entry twice is a no-op; an entry pointing at
    /// different files is replaced atomically.
    ///
    /// # Errors
    ///
    /// Returns an error when the entry cannot be encoded, staged, or placed.
    pub fn create_link(
        &self,
        artifact: &Path,
        metadata: &Path,
        relative: &str,
        scope: &BuildScope,
    ) -> SeederResult<PathBuf> {
        let path = self.link_path(relative, scope)?;
        let link = FileLink {
            artifact: artifact.to_path_buf(),
            metadata: metadata.to_path_buf(),
        };
        let parent = path.parent().unwrap_or(&self.storage_root);
        fs::create_dir_all(parent).map_err(|err| SeederError::io("link.create_dir", parent, err))?;

        let staging = parent.join(format!(".{}.tmp", Uuid::new_v4().simple()));
        let encoded =
            serde_json::to_vec(&link).map_err(|err| SeederError::json("link.encode", &path, err))?;
        fs::write(&staging, encoded).map_err(|err| SeederError::io("link.stage", &staging, err))?;

        let placed = match fs::hard_link(&staging, &path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                if self.read(&path).ok().as_ref() == Some(&link) {
                    Ok(())
                } else {
                    fs::rename(&staging, &path)
                        .map_err(|err| SeederError::io("link.replace", &path, err))
                }
            }
            Err(_) => {
                fs::rename(&staging, &path).map_err(|err| SeederError::io("link.rename", &path, err))
            }
        };
        if staging.exists()
            && let Err(err) = fs::remove_file(&staging)
        {
            debug!(staging = %staging.display(), error = %err, "failed to remove staged link");
        }
        placed.map(|()| path)
    }

    /// Parsed contents of the link entry at `link_path`.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or does not parse.
    pub fn read(&self, link_path: &Path) -> SeederResult<FileLink> {
        let bytes =
            fs::read(link_path).map_err(|err| SeederError::io("link.read", link_path, err))?;
        serde_json::from_slice(&bytes).map_err(|err| SeederError::json("link.decode", link_path, err))
    }

    /// Metadata path named by the link entry at `link_path`.
    ///
    /// # Errors
    ///
    /// Returns an error when the entry cannot be read.
    pub fn resolve(&self, link_path: &Path) -> SeederResult<PathBuf> {
        self.read(link_path).map(|link| link.metadata)
    }

    /// Every link entry under the storage root, oldest modification first.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory walk fails.
    pub fn entries(&self) -> SeederResult<Vec<PathBuf>> {
        if !self.storage_root.exists() {
            return Ok(Vec::new());
        }
        let mut found: Vec<(SystemTime, PathBuf)> = Vec::new();
        for entry in WalkDir::new(&self.storage_root) {
            let entry = entry
                .map_err(|err| SeederError::walkdir("link.entries", &self.storage_root, err))?;
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|ext| ext.to_str()) != Some(LINK_EXTENSION)
            {
                continue;
            }
            let modified = entry
                .metadata()
                .ok()
                .and_then(|meta| meta.modified().ok())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((modified, path.to_path_buf()));
        }
        found.sort();
        Ok(found.into_iter().map(|(_, path)| path).collect())
    }

    /// Delete a link entry and prune scope directories left empty.
    ///
    /// # Errors
    ///
    /// Returns an error when the entry exists but cannot be deleted.
    pub fn remove(&self, link_path: &Path) -> SeederResult<()> {
        match fs::remove_file(link_path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(SeederError::io("link.remove", link_path, err)),
        }
        let mut current = link_path.parent();
        while let Some(dir) = current {
            if dir == self.storage_root || !dir.starts_with(&self.storage_root) {
                break;
            }
            if fs::remove_dir(dir).is_err() {
                break;
            }
            current = dir.parent();
        }
        Ok(())
    }
}
