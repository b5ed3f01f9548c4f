//! Snapshot file format.
//!
//! A snapshot is a header, a CBOR-encoded table and a CRC32 footer:
//!
//! ```text
//! | magic (4) | version (2) | timestamp (8) | entry_count (4) | body... | crc32 (4) |
//! ```
//!
//! All integers are little-endian. The checksum covers everything before
//! the footer. Files are written to `<name>.tmp` and renamed into place, so
//! a reader never observes a partially written snapshot under its final
//! name.

use crate::kv::Table;
use dbeekeeper_core::DbeeError;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Magic bytes for snapshot files.
const SNAPSHOT_MAGIC: [u8; 4] = *b"DBEE";
/// Current snapshot format version.
const SNAPSHOT_VERSION: u16 = 1;
/// Header size (magic + version + timestamp + entry_count).
const HEADER_SIZE: usize = 4 + 2 + 8 + 4;
/// Footer size (checksum).
const FOOTER_SIZE: usize = 4;

#[derive(Serialize, Deserialize)]
struct SnapshotBody<'a> {
    entries: Cow<'a, Table>,
}

/// Metadata about a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotMetadata {
    /// When the snapshot was encoded (Unix timestamp in milliseconds).
    pub timestamp: u64,
    /// Number of entries in the table.
    pub entry_count: u32,
    /// Size of the encoded snapshot in bytes.
    pub size: usize,
}

/// Encodes a table into snapshot bytes.
pub fn encode(table: &Table) -> Result<Vec<u8>, DbeeError> {
    let entry_count = u32::try_from(table.len())
        .map_err(|_| DbeeError::Codec(format!("too many entries: {}", table.len())))?;
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;

    let mut data = Vec::with_capacity(HEADER_SIZE + FOOTER_SIZE + table.len() * 16);
    data.extend_from_slice(&SNAPSHOT_MAGIC);
    data.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    data.extend_from_slice(&timestamp.to_le_bytes());
    data.extend_from_slice(&entry_count.to_le_bytes());

    let body = SnapshotBody {
        entries: Cow::Borrowed(table),
    };
    ciborium::into_writer(&body, &mut data).map_err(|e| DbeeError::Codec(e.to_string()))?;

    let checksum = crc32fast::hash(&data);
    data.extend_from_slice(&checksum.to_le_bytes());
    Ok(data)
}

/// Reads snapshot metadata after validating the header and checksum.
pub fn read_metadata(data: &[u8]) -> Result<SnapshotMetadata, DbeeError> {
    if data.len() < HEADER_SIZE + FOOTER_SIZE {
        return Err(DbeeError::corrupted("snapshot too small"));
    }

    if data[0..4] != SNAPSHOT_MAGIC {
        return Err(DbeeError::corrupted("invalid snapshot magic"));
    }

    let version = u16::from_le_bytes([data[4], data[5]]);
    if version != SNAPSHOT_VERSION {
        return Err(DbeeError::corrupted(format!(
            "unsupported snapshot version: {version}"
        )));
    }

    let checksum_offset = data.len() - FOOTER_SIZE;
    let stored = u32::from_le_bytes(le_array(&data[checksum_offset..]));
    let computed = crc32fast::hash(&data[..checksum_offset]);
    if stored != computed {
        return Err(DbeeError::ChecksumMismatch {
            expected: stored,
            actual: computed,
        });
    }

    Ok(SnapshotMetadata {
        timestamp: u64::from_le_bytes(le_array(&data[6..14])),
        entry_count: u32::from_le_bytes(le_array(&data[14..18])),
        size: data.len(),
    })
}

/// Decodes snapshot bytes into a table.
pub fn decode(data: &[u8]) -> Result<(SnapshotMetadata, Table), DbeeError> {
    let metadata = read_metadata(data)?;
    let body: SnapshotBody<'static> =
        ciborium::from_reader(&data[HEADER_SIZE..data.len() - FOOTER_SIZE])
            .map_err(|e| DbeeError::Codec(e.to_string()))?;
    let table = body.entries.into_owned();

    if table.len() != metadata.entry_count as usize {
        return Err(DbeeError::corrupted(format!(
            "entry count mismatch: expected {}, got {}",
            metadata.entry_count,
            table.len()
        )));
    }
    Ok((metadata, table))
}

/// Writes a snapshot file atomically.
pub fn write_file(path: &Path, table: &Table, sync: bool) -> Result<SnapshotMetadata, DbeeError> {
    let data = encode(table)?;
    let temp = temp_path(path);
    {
        let mut file = File::create(&temp)?;
        file.write_all(&data)?;
        if sync {
            file.sync_all()?;
        }
    }
    fs::rename(&temp, path)?;
    read_metadata(&data)
}

/// Reads and validates a snapshot file.
pub fn read_file(path: &Path) -> Result<(SnapshotMetadata, Table), DbeeError> {
    decode(&fs::read(path)?)
}

/// Returns the temporary name a snapshot is written under.
#[must_use]
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Copies a little-endian integer field out of a validated slice.
fn le_array<const N: usize>(slice: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&slice[..N]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Table {
        let mut t = Table::new();
        t.insert("a".into(), "1".into());
        t.insert("b".into(), "two words".into());
        t
    }

    #[test]
    fn encode_decode() {
        let data = encode(&table()).unwrap();
        let (metadata, decoded) = decode(&data).unwrap();
        assert_eq!(decoded, table());
        assert_eq!(metadata.entry_count, 2);
        assert_eq!(metadata.size, data.len());
        assert_eq!(&data[0..4], b"DBEE");
    }

    #[test]
    fn empty_table() {
        let data = encode(&Table::new()).unwrap();
        let (metadata, decoded) = decode(&data).unwrap();
        assert!(decoded.is_empty());
        assert_eq!(metadata.entry_count, 0);
    }

    #[test]
    fn detects_bit_flip() {
        let mut data = encode(&table()).unwrap();
        let mid = HEADER_SIZE + 2;
        data[mid] ^= 0xff;
        assert!(matches!(
            decode(&data),
            Err(DbeeError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn rejects_bad_magic_and_version() {
        let mut data = encode(&table()).unwrap();
        data[0] = b'X';
        assert!(matches!(decode(&data), Err(DbeeError::Corrupted { .. })));

        let mut data = encode(&table()).unwrap();
        data[4] = 9;
        assert!(matches!(decode(&data), Err(DbeeError::Corrupted { .. })));
    }

    #[test]
    fn rejects_truncated_data() {
        let data = encode(&table()).unwrap();
        assert!(decode(&data[..10]).is_err());
        assert!(decode(&data[..data.len() - 1]).is_err());
    }

    #[test]
    fn file_write_is_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.dbee");
        let metadata = write_file(&path, &table(), true).unwrap();
        assert!(path.exists());
        assert!(!temp_path(&path).exists());

        let (read_back, decoded) = read_file(&path).unwrap();
        assert_eq!(read_back, metadata);
        assert_eq!(decoded, table());
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_file(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, DbeeError::Io(_)));
    }
}
