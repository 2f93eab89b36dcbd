//! Piece-by-piece copy of an object from peer source files.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use artimirror_torrent_core::{TorrentError, TorrentMetadata, TorrentResult};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

pub(crate) struct Transfer<'a> {
    pub(crate) metadata: &'a TorrentMetadata,
    pub(crate) sources: Vec<PathBuf>,
    pub(crate) work_dir: &'a Path,
    pub(crate) target: &'a Path,
    pub(crate) running: Arc<AtomicBool>,
    pub(crate) piece_delay: Duration,
}

impl Transfer<'_> {
    pub(crate) async fn run(self) -> TorrentResult<()> {
        fs::create_dir_all(self.work_dir)
            .await
            .map_err(|err| TorrentError::io("fetch.work_dir", self.work_dir, err))?;
        let partial = PartialFile::new(
            self.work_dir
                .join(format!("{}.part", self.metadata.info_hash().to_hex())),
        );

        self.copy_pieces(partial.path()).await?;

        if let Some(parent) = self.target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| TorrentError::io("fetch.target_dir", parent, err))?;
        }
        if fs::rename(partial.path(), self.target).await.is_ok() {
            partial.placed();
        } else {
            fs::copy(partial.path(), self.target)
                .await
                .map_err(|err| TorrentError::io("fetch.place", self.target, err))?;
        }
        Ok(())
    }

    async fn copy_pieces(&self, partial: &Path) -> TorrentResult<()> {
        let mut output = File::create(partial)
            .await
            .map_err(|err| TorrentError::io("fetch.create_partial", partial, err))?;
        let mut handles: Vec<Option<File>> = self.sources.iter().map(|_| None).collect();

        for index in 0..self.metadata.piece_count() {
            if !self.running.load(Ordering::SeqCst) {
                return Err(TorrentError::Interrupted { operation: "fetch" });
            }
            let Some((offset, len)) = self.metadata.piece_span(index) else {
                return Err(TorrentError::Corrupt { piece: index });
            };
            let piece = self.verified_piece(&mut handles, index, offset, len).await?;
            output
                .write_all(&piece)
                .await
                .map_err(|err| TorrentError::io("fetch.write", partial, err))?;
            if !self.piece_delay.is_zero() {
                tokio::time::sleep(self.piece_delay).await;
            }
        }

        output
            .flush()
            .await
            .and(output.sync_all().await)
            .map_err(|err| TorrentError::io("fetch.sync", partial, err))
    }

    async fn verified_piece(
        &self,
        handles: &mut [Option<File>],
        index: usize,
        offset: u64,
        len: u64,
    ) -> TorrentResult<Vec<u8>> {
        let count = self.sources.len();
        for attempt in 0..count {
            let position = (index + attempt) % count;
            let source = &self.sources[position];
            match read_piece(&mut handles[position], source, offset, len).await {
                Ok(data) if self.metadata.verify_piece(index, &data) => return Ok(data),
                Ok(_) => debug!(piece = index, source = %source.display(), "piece failed verification"),
                Err(err) => {
                    debug!(piece = index, source = %source.display(), error = %err, "piece read failed");
                    handles[position] = None;
                }
            }
        }
        Err(TorrentError::Corrupt { piece: index })
    }
}

/// Partial download removed on drop unless it was moved into place, so a
/// fetch cancelled by dropping its future leaves nothing in the work dir.
struct PartialFile {
    path: PathBuf,
    placed: bool,
}

impl PartialFile {
    const fn new(path: PathBuf) -> Self {
        Self {
            path,
            placed: false,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn placed(mut self) {
        self.placed = true;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.placed {
            return;
        }
        if let Err(err) = std::fs::remove_file(&self.path)
            && err.kind() != io::ErrorKind::NotFound
        {
            debug!(partial = %self.path.display(), error = %err, "failed to remove partial download");
        }
    }
}

async fn read_piece(
    handle: &mut Option<File>,
    source: &Path,
    offset: u64,
    len: u64,
) -> io::Result<Vec<u8>> {
    if handle.is_none() {
        *handle = Some(File::open(source).await?);
    }
    let file = handle
        .as_mut()
        .ok_or_else(|| io::Error::other("source handle unavailable"))?;
    file.seek(SeekFrom::Start(offset)).await?;
    let len = usize::try_from(len).map_err(io::Error::other)?;
    let mut buffer = vec![0_u8; len];
    file.read_exact(&mut buffer).await?;
    Ok(buffer)
}
