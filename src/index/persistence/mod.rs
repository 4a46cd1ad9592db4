
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::IndexConfig;
use crate::chunking::Chunk;
use crate::{RagError, Result};

pub(crate) const SNAPSHOT_VERSION: u32 = 1;

/// On-disk form of an index: configuration plus live entries in insertion order. The
/// graph itself is not stored and is rebuilt on load.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct IndexSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub config: IndexConfig,
    pub dimension: Option<usize>,
    pub records: Vec<SnapshotRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct SnapshotRecord {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
    pub indexed_at: DateTime<Utc>,
}

impl IndexSnapshot {
    pub(crate) fn new(
        config: IndexConfig,
        dimension: Option<usize>,
        records: Vec<SnapshotRecord>,
    ) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            config,
            dimension,
            records,
        }
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write to a sibling temp file, then rename over `path`.
pub(crate) fn write_snapshot(path: &Path, snapshot: &IndexSnapshot) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let temp = temp_path(path);
    let write = || -> Result<()> {
        let file = fs::File::create(&temp)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, snapshot).map_err(|e| {
            RagError::Persistence(format!("Failed to serialize index snapshot: {e}"))
        })?;
        writer.flush()?;
        writer
            .into_inner()
            .map_err(|e| RagError::Io(e.into_error()))?
            .sync_all()?;
        fs::rename(&temp, path)?;
        Ok(())
    };

    write().inspect_err(|_| {
        let _ = fs::remove_file(&temp);
    })
}

pub(crate) fn read_snapshot(path: &Path) -> Result<IndexSnapshot> {
    let file = fs::File::open(path).map_err(|e| {
        RagError::Persistence(format!("Failed to open index snapshot {}: {e}", path.display()))
    })?;
    let snapshot: IndexSnapshot =
        serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            RagError::Persistence(format!(
                "Failed to parse index snapshot {}: {e}",
                path.display()
            ))
        })?;

    if snapshot.version != SNAPSHOT_VERSION {
        return Err(RagError::Persistence(format!(
            "Unsupported index snapshot version {} (expected {})",
            snapshot.version, SNAPSHOT_VERSION
        )));
    }
    Ok(snapshot)
}
