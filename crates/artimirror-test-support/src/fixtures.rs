//! Scratch directories and artifact files for tests.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// One mebibyte, matching the seeder's size threshold unit.
pub const MIB: u64 = 1024 * 1024;

/// Write a file of exactly `len` bytes whose content is derived from `seed`.
///
/// Different seeds yield different content; parent directories are created.
///
/// # Errors
///
/// Returns any I/O error raised while creating or writing the file.
pub fn write_sized_file(path: &Path, len: u64, seed: u8) -> io::Result<PathBuf> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    let block: Vec<u8> = (0..=u8::MAX)
        .map(|byte| byte.wrapping_mul(31).wrapping_add(seed))
        .collect();
    let mut remaining = len;
    while remaining > 0 {
        let take = usize::try_from(remaining.min(block.len() as u64)).unwrap_or(block.len());
        writer.write_all(&block[..take])?;
        remaining -= take as u64;
    }
    writer.flush()?;
    Ok(path.to_path_buf())
}

/// Temporary directory laid out like a host: a storage root plus build artifact roots.
pub struct TempWorkspace {
    dir: TempDir,
}

impl TempWorkspace {
    /// Create a fresh workspace.
    ///
    /// # Errors
    ///
    /// Returns an error when the temporary directory cannot be created.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            dir: TempDir::new()?,
        })
    }

    /// Root of the workspace.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Storage root where link entries live.
    #[must_use]
    pub fn storage_root(&self) -> PathBuf {
        self.dir.path().join("storage")
    }

    /// Artifacts directory for a build.
    #[must_use]
    pub fn artifacts_dir(&self, build_type: &str, build_id: &str) -> PathBuf {
        self.dir
            .path()
            .join("artifacts")
            .join(build_type)
            .join(build_id)
    }

    /// Write an artifact of `len` bytes at `<artifacts_dir>/<relative>`.
    ///
    /// # Errors
    ///
    /// Returns any I/O error raised while writing the file.
    pub fn artifact(
        &self,
        build_type: &str,
        build_id: &str,
        relative: &str,
        len: u64,
        seed: u8,
    ) -> io::Result<PathBuf> {
        let mut path = self.artifacts_dir(build_type, build_id);
        for segment in relative.split('/').filter(|segment| !segment.is_empty()) {
            path.push(segment);
        }
        write_sized_file(&path, len, seed)
    }
}
