//! Distribution metadata ("torrent file") model.
//!
//! # Design
//! - Single-file metadata with fixed 512 KiB pieces hashed with SHA-256.
//! - No creation timestamp is written, so identical input yields identical bytes.
//! - Identity covers only the `info` dictionary; the announce endpoint and the
//!   storage location never affect it.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::bencode::BencodeValue;
use crate::error::{TorrentError, TorrentResult};
use crate::info_hash::InfoHash;

/// Fixed piece size for every metadata file.
pub const PIECE_LENGTH: u64 = 512 * 1024;
/// Creator tag recorded in each metadata file.
pub const CREATOR_TAG: &str = "artimirror";
/// Size of one piece digest.
pub const PIECE_HASH_LEN: usize = 32;

/// Parsed single-file distribution metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentMetadata {
    announce: String,
    created_by: String,
    name: String,
    length: u64,
    piece_length: u64,
    pieces: Vec<[u8; PIECE_HASH_LEN]>,
}

impl TorrentMetadata {
    /// Hash `file` into metadata announcing to `announce`.
    ///
    /// Blocking: callers on the async runtime should run this under
    /// `spawn_blocking`.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::Io`] when the file cannot be opened or read and
    /// [`TorrentError::InvalidRequest`] when it has no usable file name.
    pub fn create(file: &Path, announce: &str, creator: &str) -> TorrentResult<Self> {
        let name = file
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or(TorrentError::InvalidRequest {
                operation: "metadata.create",
                reason: "file_name_not_utf8",
            })?
            .to_string();
        let mut handle =
            File::open(file).map_err(|err| TorrentError::io("metadata.open", file, err))?;

        let piece_len = usize::try_from(PIECE_LENGTH).unwrap_or(usize::MAX);
        let mut buffer = vec![0_u8; piece_len];
        let mut pieces: Vec<[u8; PIECE_HASH_LEN]> = Vec::new();
        let mut length = 0_u64;
        loop {
            let filled = read_full(&mut handle, &mut buffer)
                .map_err(|err| TorrentError::io("metadata.hash", file, err))?;
            if filled == 0 {
                break;
            }
            pieces.push(Sha256::digest(&buffer[..filled]).into());
            length += filled as u64;
            if filled < buffer.len() {
                break;
            }
        }

        Ok(Self {
            announce: announce.to_string(),
            created_by: creator.to_string(),
            name,
            length,
            piece_length: PIECE_LENGTH,
            pieces,
        })
    }

    /// Decode metadata from its bencoded bytes.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::Bencode`] for malformed bytes and
    /// [`TorrentError::InvalidMetadata`] when a required key is missing or
    /// the piece table does not match the declared length.
    pub fn from_bytes(bytes: &[u8]) -> TorrentResult<Self> {
        let root = BencodeValue::decode(bytes)?;
        let info = root
            .get("info")
            .ok_or(TorrentError::InvalidMetadata {
                reason: "missing_info",
            })?;
        let announce = root
            .get("announce")
            .and_then(BencodeValue::as_str)
            .unwrap_or_default()
            .to_string();
        let created_by = root
            .get("created by")
            .and_then(BencodeValue::as_str)
            .unwrap_or_default()
            .to_string();
        let name = info
            .get("name")
            .and_then(BencodeValue::as_str)
            .filter(|name| !name.is_empty())
            .ok_or(TorrentError::InvalidMetadata {
                reason: "missing_name",
            })?
            .to_string();
        let length = non_negative(info.get("length"), "missing_length")?;
        let piece_length = non_negative(info.get("piece length"), "missing_piece_length")?;
        if piece_length == 0 {
            return Err(TorrentError::InvalidMetadata {
                reason: "zero_piece_length",
            });
        }
        let raw_pieces = info
            .get("pieces")
            .and_then(BencodeValue::as_bytes)
            .ok_or(TorrentError::InvalidMetadata {
                reason: "missing_pieces",
            })?;
        if raw_pieces.len() % PIECE_HASH_LEN != 0 {
            return Err(TorrentError::InvalidMetadata {
                reason: "pieces_not_aligned",
            });
        }
        let pieces: Vec<[u8; PIECE_HASH_LEN]> = raw_pieces
            .chunks_exact(PIECE_HASH_LEN)
            .filter_map(|chunk| chunk.try_into().ok())
            .collect();
        if pieces.len() as u64 != length.div_ceil(piece_length) {
            return Err(TorrentError::InvalidMetadata {
                reason: "piece_count_mismatch",
            });
        }

        Ok(Self {
            announce,
            created_by,
            name,
            length,
            piece_length,
            pieces,
        })
    }

    /// Read and decode a metadata file.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::Io`] when the file cannot be read, otherwise the
    /// errors of [`TorrentMetadata::from_bytes`].
    pub fn load(path: &Path) -> TorrentResult<Self> {
        let bytes = fs::read(path).map_err(|err| TorrentError::io("metadata.load", path, err))?;
        Self::from_bytes(&bytes)
    }

    /// Canonical bencoded bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        BencodeValue::dict()
            .insert("announce", BencodeValue::string(&self.announce))
            .insert("created by", BencodeValue::string(&self.created_by))
            .insert("info", self.info_dict())
            .encode()
    }

    /// Persist the metadata at `path`, creating parent directories.
    ///
    /// The bytes are written to a sibling temporary file first and renamed into
    /// place, so readers never observe a partial file.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::Io`] when any filesystem step fails.
    pub fn save(&self, path: &Path) -> TorrentResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| TorrentError::io("metadata.create_dir", parent, err))?;
        }
        let mut staging = path.as_os_str().to_owned();
        staging.push(".partial");
        let staging = Path::new(&staging);
        {
            let mut file = File::create(staging)
                .map_err(|err| TorrentError::io("metadata.stage", staging, err))?;
            file.write_all(&self.to_bytes())
                .and_then(|()| file.sync_all())
                .map_err(|err| TorrentError::io("metadata.write", staging, err))?;
        }
        fs::rename(staging, path).map_err(|err| TorrentError::io("metadata.rename", path, err))
    }

    /// Content identity over the canonical `info` dictionary.
    #[must_use]
    pub fn info_hash(&self) -> InfoHash {
        InfoHash::from_bytes(Sha256::digest(self.info_dict().encode()).into())
    }

    /// Announce endpoint recorded in the file.
    #[must_use]
    pub fn announce(&self) -> &str {
        &self.announce
    }

    /// Creator tag recorded in the file.
    #[must_use]
    pub fn created_by(&self) -> &str {
        &self.created_by
    }

    /// File name of the described artifact.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared artifact size in bytes.
    #[must_use]
    pub const fn length(&self) -> u64 {
        self.length
    }

    /// Piece size in bytes.
    #[must_use]
    pub const fn piece_length(&self) -> u64 {
        self.piece_length
    }

    /// Number of pieces.
    #[must_use]
    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Byte offset and length of piece `index`, if it exists.
    #[must_use]
    pub fn piece_span(&self, index: usize) -> Option<(u64, u64)> {
        if index >= self.pieces.len() {
            return None;
        }
        let offset = (index as u64).checked_mul(self.piece_length)?;
        let len = self.piece_length.min(self.length.saturating_sub(offset));
        Some((offset, len))
    }

    /// Whether `data` hashes to the recorded digest of piece `index`.
    #[must_use]
    pub fn verify_piece(&self, index: usize, data: &[u8]) -> bool {
        self.pieces
            .get(index)
            .is_some_and(|expected| Sha256::digest(data).as_slice() == expected)
    }

    fn info_dict(&self) -> BencodeValue {
        let pieces: Vec<u8> = self.pieces.iter().flatten().copied().collect();
        BencodeValue::dict()
            .insert("length", int_value(self.length))
            .insert("name", BencodeValue::string(&self.name))
            .insert("piece length", int_value(self.piece_length))
            .insert("pieces", BencodeValue::Bytes(pieces))
    }
}

fn int_value(value: u64) -> BencodeValue {
    BencodeValue::integer(i64::try_from(value).unwrap_or(i64::MAX))
}

fn non_negative(value: Option<&BencodeValue>, reason: &'static str) -> TorrentResult<u64> {
    value
        .and_then(BencodeValue::as_integer)
        .and_then(|raw| u64::try_from(raw).ok())
        .ok_or(TorrentError::InvalidMetadata { reason })
}

fn read_full(reader: &mut impl Read, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::TempDir;

    fn write_bytes(dir: &TempDir, name: &str, len: usize) -> Result<std::path::PathBuf> {
        let path = dir.path().join(name);
        let data: Vec<u8> = (0..len)
            .map(|i| u8::try_from(i % 251).unwrap_or_default())
            .collect();
        fs::write(&path, data)?;
        Ok(path)
    }

    #[test]
    fn create_hashes_every_piece() -> Result<()> {
        let dir = TempDir::new()?;
        let len = usize::try_from(PIECE_LENGTH)? * 2 + 17;
        let path = write_bytes(&dir, "app.zip", len)?;

        let metadata = TorrentMetadata::create(&path, "http://tracker/announce", CREATOR_TAG)?;
        assert_eq!(metadata.name(), "app.zip");
        assert_eq!(metadata.length(), len as u64);
        assert_eq!(metadata.piece_count(), 3);
        assert_eq!(metadata.piece_span(2), Some((2 * PIECE_LENGTH, 17)));
        assert_eq!(metadata.piece_span(3), None);

        let data = fs::read(&path)?;
        let tail = &data[usize::try_from(2 * PIECE_LENGTH)?..];
        assert!(metadata.verify_piece(2, tail));
        assert!(!metadata.verify_piece(1, tail));
        Ok(())
    }

    #[test]
    fn identity_ignores_announce_and_location() -> Result<()> {
        let first = TempDir::new()?;
        let second = TempDir::new()?;
        let a = write_bytes(&first, "lib.zip", 1_000)?;
        let b = write_bytes(&second, "lib.zip", 1_000)?;

        let left = TorrentMetadata::create(&a, "http://one/announce", CREATOR_TAG)?;
        let right = TorrentMetadata::create(&b, "udp://two:6969", CREATOR_TAG)?;
        assert_eq!(left.info_hash(), right.info_hash());
        assert_ne!(left.to_bytes(), right.to_bytes());
        Ok(())
    }

    #[test]
    fn save_and_load_preserve_bytes_and_identity() -> Result<()> {
        let dir = TempDir::new()?;
        let artifact = write_bytes(&dir, "app.zip", 70_000)?;
        let metadata = TorrentMetadata::create(&artifact, "http://tracker/announce", CREATOR_TAG)?;
        let target = dir.path().join("nested").join("app.zip.torrent");

        metadata.save(&target)?;
        let reloaded = TorrentMetadata::load(&target)?;
        assert_eq!(reloaded, metadata);
        assert_eq!(reloaded.info_hash(), metadata.info_hash());
        assert_eq!(fs::read(&target)?, metadata.to_bytes());
        assert_eq!(reloaded.created_by(), "artimirror");
        Ok(())
    }

    #[test]
    fn empty_file_has_no_pieces() -> Result<()> {
        let dir = TempDir::new()?;
        let path = write_bytes(&dir, "empty.bin", 0)?;
        let metadata = TorrentMetadata::create(&path, "http://tracker/announce", CREATOR_TAG)?;
        assert_eq!(metadata.piece_count(), 0);
        assert_eq!(TorrentMetadata::from_bytes(&metadata.to_bytes())?, metadata);
        Ok(())
    }

    #[test]
    fn from_bytes_rejects_inconsistent_piece_table() {
        let bytes = BencodeValue::dict()
            .insert(
                "info",
                BencodeValue::dict()
                    .insert("length", BencodeValue::integer(10))
                    .insert("name", BencodeValue::string("a"))
                    .insert("piece length", BencodeValue::integer(4))
                    .insert("pieces", BencodeValue::Bytes(vec![0; PIECE_HASH_LEN])),
            )
            .encode();
        assert!(matches!(
            TorrentMetadata::from_bytes(&bytes),
            Err(TorrentError::InvalidMetadata {
                reason: "piece_count_mismatch"
            })
        ));
        assert!(matches!(
            TorrentMetadata::from_bytes(b"not bencode"),
            Err(TorrentError::Bencode { .. })
        ));
    }
}
