use crate::error::{Result, StorageError};
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use telemon_common::compress::{compress_with, decompress_with};

/// Full contents of the memory backend.
///
/// Encoded with bincode inside a gzip stream. Ordered maps keep the encoding
/// byte-for-byte deterministic for identical contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub counters: BTreeMap<String, i64>,
    pub gauges: BTreeMap<String, f64>,
}

impl Snapshot {
    pub fn encode(&self) -> Result<Vec<u8>> {
        compress_with(self, Vec::new(), Compression::default(), |snap, enc| {
            bincode::serialize_into(enc, snap).map_err(StorageError::from)
        })
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        decompress_with(data, |dec| {
            bincode::deserialize_from(dec).map_err(StorageError::from)
        })
    }

    /// Writes the snapshot to `path`, creating the parent directory with
    /// mode 0700 if needed. The file is replaced atomically.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            create_private_dir(dir)?;
        }
        let tmp = path.with_extension("tmp");
        {
            let file = BufWriter::new(File::create(&tmp)?);
            let mut file = compress_with(self, file, Compression::default(), |snap, enc| {
                bincode::serialize_into(enc, snap).map_err(StorageError::from)
            })?;
            file.flush()?;
            file.get_ref().sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Loads a snapshot; `Ok(None)` when the file does not exist.
    pub fn read_from(path: &Path) -> Result<Option<Self>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let snap = decompress_with(BufReader::new(file), |dec| {
            bincode::deserialize_from(dec).map_err(StorageError::from)
        })?;
        Ok(Some(snap))
    }
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Snapshot {
        let mut snap = Snapshot::default();
        snap.counters.insert("PollCount".into(), 42);
        snap.counters.insert("neg".into(), -7);
        snap.gauges.insert("Alloc".into(), 1024.5);
        snap.gauges.insert("RandomValue".into(), 0.25);
        snap
    }

    #[test]
    fn test_encode_is_deterministic() {
        let a = sample().encode().unwrap();
        let b = sample().encode().unwrap();
        assert_eq!(a, b);
        assert_eq!(Snapshot::decode(&a).unwrap(), sample());
    }

    #[test]
    fn test_write_and_read_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/deeper/metrics.db");
        sample().write_to(&path).unwrap();
        assert_eq!(Snapshot::read_from(&path).unwrap(), Some(sample()));
        assert!(!path.with_extension("tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_parent_dir_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let parent = dir.path().join("state");
        Snapshot::default().write_to(&parent.join("m.db")).unwrap();
        let mode = std::fs::metadata(&parent).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        assert_eq!(Snapshot::read_from(&dir.path().join("absent")).unwrap(), None);
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.db");
        std::fs::write(&path, b"definitely not gzip").unwrap();
        assert!(Snapshot::read_from(&path).is_err());
    }
}
