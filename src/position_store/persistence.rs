// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use super::StoredPosition;
use crate::estimation::PositionSnapshot;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not encode positions: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("could not decode positions: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

/// Lower priority source, only consulted for runs memory does not hold.
pub trait OverflowStore: Send + Sync {
    fn get(&self, rid: &str) -> Option<Arc<PositionSnapshot>>;

    fn all(&self) -> Vec<StoredPosition>;

    /// Merges `latest` over what is held and drops anything whose freshness
    /// is before `cutoff`. Returns the number kept.
    fn write_through(
        &self,
        latest: Vec<StoredPosition>,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, PersistenceError>;
}

pub struct ZlibFileOverflow {
    path: PathBuf,
    cached: DashMap<String, StoredPosition>,
}

impl ZlibFileOverflow {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        let cached = DashMap::new();

        for stored in load_positions(&path)?.unwrap_or_default() {
            cached.insert(stored.snapshot.rid.clone(), stored);
        }

        tracing::info!(path = %path.display(), count = cached.len(), "loaded persisted positions");

        Ok(Self { path, cached })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OverflowStore for ZlibFileOverflow {
    fn get(&self, rid: &str) -> Option<Arc<PositionSnapshot>> {
        self.cached.get(rid).map(|entry| entry.snapshot.clone())
    }

    fn all(&self) -> Vec<StoredPosition> {
        self.cached.iter().map(|entry| entry.value().clone()).collect()
    }

    fn write_through(
        &self,
        latest: Vec<StoredPosition>,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, PersistenceError> {
        for stored in latest {
            self.cached.insert(stored.snapshot.rid.clone(), stored);
        }
        self.cached.retain(|_, stored| stored.freshness() >= cutoff);

        let positions: Vec<StoredPosition> = self
            .cached
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        save_positions(&self.path, &positions)?;

        Ok(positions.len())
    }
}

pub fn save_positions(path: &Path, positions: &[StoredPosition]) -> Result<(), PersistenceError> {
    let io_err = |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(io_err)?;
    }

    let mut temp_path = path.as_os_str().to_owned();
    temp_path.push(".tmp");
    let temp_path = PathBuf::from(temp_path);

    let bytes = crate::bincode_serialize(&positions)?;

    let file = File::create(&temp_path).map_err(io_err)?;
    let writer = BufWriter::new(file);
    let mut encoder = flate2::write::ZlibEncoder::new(writer, flate2::Compression::default());
    encoder.write_all(&bytes).map_err(io_err)?;
    let mut writer = encoder.finish().map_err(io_err)?;
    writer.flush().map_err(io_err)?;

    std::fs::rename(&temp_path, path).map_err(io_err)?;

    Ok(())
}

pub fn load_positions(path: &Path) -> Result<Option<Vec<StoredPosition>>, PersistenceError> {
    if !path.exists() {
        return Ok(None);
    }

    let io_err = |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(io_err)?;
    let mut decoder = flate2::read::ZlibDecoder::new(BufReader::new(file));
    let mut buffer = Vec::new();
    decoder.read_to_end(&mut buffer).map_err(io_err)?;

    Ok(Some(crate::bincode_deserialize(&buffer)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimation::MovementState;
    use chrono::{FixedOffset, TimeZone};

    fn snapshot(rid: &str, minute: u32) -> PositionSnapshot {
        PositionSnapshot {
            rid: rid.to_string(),
            uid: Some("L1".to_string()),
            ts: FixedOffset::east_opt(3600)
                .unwrap()
                .with_ymd_and_hms(2025, 9, 5, 10, minute, 0)
                .unwrap(),
            from_tpl: "A".to_string(),
            to_tpl: "B".to_string(),
            lat: 52.5,
            lon: -1.25,
            ratio: 0.5,
            state: MovementState::Enroute,
            platform: Some("3".to_string()),
        }
    }

    fn stored(rid: &str, minute: u32, written_minute: u32) -> StoredPosition {
        StoredPosition {
            snapshot: Arc::new(snapshot(rid, minute)),
            updated_at: snapshot("x", written_minute).ts.with_timezone(&Utc),
        }
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.bin.zlib");

        let positions = vec![stored("R1", 0, 0), stored("R2", 5, 6)];
        save_positions(&path, &positions).unwrap();

        let loaded = load_positions(&path).unwrap().unwrap();
        assert_eq!(loaded, positions);
        assert!(!dir.path().join("positions.bin.zlib.tmp").exists());
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let overflow = ZlibFileOverflow::open(dir.path().join("nothing-here")).unwrap();
        assert!(overflow.all().is_empty());
    }

    #[test]
    fn write_through_merges_and_prunes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("positions.bin.zlib");

        let overflow = ZlibFileOverflow::open(&path).unwrap();
        let cutoff = snapshot("x", 3).ts.with_timezone(&Utc);

        let kept = overflow
            .write_through(vec![stored("OLD", 0, 0), stored("NEW", 5, 5)], cutoff)
            .unwrap();
        assert_eq!(kept, 1);
        assert!(overflow.get("OLD").is_none());

        let reopened = ZlibFileOverflow::open(&path).unwrap();
        assert_eq!(reopened.get("NEW").as_deref(), Some(&snapshot("NEW", 5)));
    }

    #[test]
    fn recently_written_replay_survives_pruning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.bin.zlib");

        let overflow = ZlibFileOverflow::open(&path).unwrap();
        let cutoff = snapshot("x", 3).ts.with_timezone(&Utc);

        // observed at :00, written at :10
        let kept = overflow
            .write_through(vec![stored("REPLAY", 0, 10)], cutoff)
            .unwrap();
        assert_eq!(kept, 1);

        let reopened = ZlibFileOverflow::open(&path).unwrap();
        assert_eq!(reopened.all(), vec![stored("REPLAY", 0, 10)]);
    }

    #[test]
    fn corrupt_file_is_a_decode_or_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.bin.zlib");
        std::fs::write(&path, b"definitely not zlib").unwrap();

        assert!(ZlibFileOverflow::open(&path).is_err());
    }
}
