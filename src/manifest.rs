//! Manifest codec (C4): the durable placement map and integrity oracle
//! (spec.md §3, §4.3, §6).

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::chunk::{now_unix, Chunk};
use crate::error::{NetChunkError, Result};

pub const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub manifest_id: String,
    pub original_filename: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub chunk_count: u64,
    pub file_hash: String,
    pub created_timestamp: i64,
    pub last_accessed: i64,
    pub last_modified: i64,
    pub last_verified: Option<i64>,
    pub replication_factor: u32,
    pub min_replicas_required: u32,
    #[serde(default)]
    pub creator_info: String,
    #[serde(default)]
    pub comment: String,
    pub chunks: Vec<Chunk>,
}

impl Manifest {
    pub fn new(
        original_filename: impl Into<String>,
        total_size: u64,
        chunk_size: u64,
        file_hash: impl Into<String>,
        replication_factor: u32,
        min_replicas_required: u32,
    ) -> Self {
        let now = now_unix();
        let chunk_count = (total_size + chunk_size - 1) / chunk_size;
        Self {
            version: MANIFEST_VERSION,
            manifest_id: uuid::Uuid::new_v4().to_string(),
            original_filename: original_filename.into(),
            total_size,
            chunk_size,
            chunk_count,
            file_hash: file_hash.into(),
            created_timestamp: now,
            last_accessed: now,
            last_modified: now,
            last_verified: None,
            replication_factor,
            min_replicas_required,
            creator_info: String::new(),
            comment: String::new(),
            chunks: Vec::new(),
        }
    }

    /// Asserts the invariants from spec.md §3 / §8.3. A failure maps to
    /// `ManifestCorrupt` at every read boundary (local parse, remote
    /// fetch, post-repair rewrite).
    pub fn validate(&self) -> Result<()> {
        if self.version > MANIFEST_VERSION {
            return Err(NetChunkError::ManifestCorrupt(format!(
                "manifest version {} is newer than supported version {MANIFEST_VERSION}",
                self.version
            )));
        }
        let expected_count = (self.total_size + self.chunk_size - 1) / self.chunk_size;
        if self.chunk_count != expected_count {
            return Err(NetChunkError::ManifestCorrupt(format!(
                "chunk_count {} does not match ceil(total_size/chunk_size) = {expected_count}",
                self.chunk_count
            )));
        }
        if self.chunks.len() as u64 != self.chunk_count {
            return Err(NetChunkError::ManifestCorrupt(format!(
                "chunks array has {} entries, expected {}",
                self.chunks.len(),
                self.chunk_count
            )));
        }
        let sum: u64 = self.chunks.iter().map(|c| c.size).sum();
        if sum != self.total_size {
            return Err(NetChunkError::ManifestCorrupt(format!(
                "sum of chunk sizes {sum} does not match total_size {}",
                self.total_size
            )));
        }
        for (i, chunk) in self.chunks.iter().enumerate() {
            if chunk.sequence != i as u64 {
                return Err(NetChunkError::ManifestCorrupt(format!(
                    "chunk at index {i} has sequence {}, expected {i}",
                    chunk.sequence
                )));
            }
            let mut seen = HashSet::new();
            for loc in &chunk.locations {
                if !seen.insert(&loc.server_id) {
                    return Err(NetChunkError::ManifestCorrupt(format!(
                        "chunk {} has duplicate server_id {} in locations",
                        chunk.id, loc.server_id
                    )));
                }
            }
            if chunk.locations.len() > Chunk::MAX_REPLICAS {
                return Err(NetChunkError::ManifestCorrupt(format!(
                    "chunk {} has {} locations, exceeding MAX_REPLICAS",
                    chunk.id,
                    chunk.locations.len()
                )));
            }
        }
        if self.min_replicas_required > self.replication_factor {
            return Err(NetChunkError::ManifestCorrupt(format!(
                "min_replicas_required {} exceeds replication_factor {}",
                self.min_replicas_required, self.replication_factor
            )));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| NetChunkError::ManifestCorrupt(format!("failed to serialize: {e}")))
    }

    pub fn from_json(data: &str) -> Result<Self> {
        let manifest: Manifest = serde_json::from_str(data)
            .map_err(|e| NetChunkError::ManifestCorrupt(format!("failed to parse: {e}")))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Writes `path.tmp`, flushes, then renames onto `path` — readers only
    /// ever observe the pre- or post-image (spec.md §4.3, §8.6). If backups
    /// are enabled and a previous manifest exists, it is copied aside first
    /// and the backup retention policy is enforced.
    pub fn write_local_atomic(
        &self,
        path: &Path,
        backups_enabled: bool,
        max_backups: usize,
    ) -> Result<()> {
        if backups_enabled && path.exists() {
            backup_existing(path, max_backups)?;
        }
        let json = self.to_json()?;
        let tmp_path = path.with_extension("manifest.tmp");
        let parent = path
            .parent()
            .ok_or_else(|| NetChunkError::InvalidArgument("manifest path has no parent".into()))?;
        fs::create_dir_all(parent)?;

        {
            use std::io::Write;
            let mut tmp = fs::File::create(&tmp_path)?;
            tmp.write_all(json.as_bytes())?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    pub fn read_local(path: &Path) -> Result<Self> {
        let data =
            fs::read_to_string(path).map_err(|_| NetChunkError::FileNotFound(path.to_path_buf()))?;
        Self::from_json(&data)
    }

    /// Human-readable `created_timestamp`, for CLI output (`netchunk list`,
    /// `netchunk verify`).
    pub fn created_at_human(&self) -> String {
        chrono::DateTime::from_timestamp(self.created_timestamp, 0)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| self.created_timestamp.to_string())
    }
}

/// Copies `path` to `path.backup.<unix_ts>` and unlinks all but the most
/// recent `max_backups` such files in the same directory (spec.md §4.3).
fn backup_existing(path: &Path, max_backups: usize) -> Result<()> {
    let ts = now_unix();
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| NetChunkError::InvalidArgument("manifest path has no file name".into()))?;
    let backup_path = path.with_file_name(format!("{file_name}.backup.{ts}"));
    fs::copy(path, &backup_path)?;

    if max_backups == 0 {
        return Ok(());
    }
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let prefix = format!("{file_name}.backup.");
    let mut backups: Vec<_> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_name()
                .to_str()
                .map(|n| n.starts_with(&prefix))
                .unwrap_or(false)
        })
        .collect();
    backups.sort_by_key(|e| e.file_name());
    if backups.len() > max_backups {
        for entry in &backups[..backups.len() - max_backups] {
            let _ = fs::remove_file(entry.path());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Location;

    fn sample_manifest() -> Manifest {
        let mut m = Manifest::new("file.bin", 10, 5, "deadbeef", 3, 1);
        m.chunks.push(Chunk {
            id: "chunk0".into(),
            sequence: 0,
            size: 5,
            hash: "h0".into(),
            created_at: now_unix(),
            locations: vec![Location::new("s1", "chunks/chunk0")],
        });
        m.chunks.push(Chunk {
            id: "chunk1".into(),
            sequence: 1,
            size: 5,
            hash: "h1".into(),
            created_at: now_unix(),
            locations: vec![Location::new("s2", "chunks/chunk1")],
        });
        m
    }

    #[test]
    fn validates_a_well_formed_manifest() {
        assert!(sample_manifest().validate().is_ok());
    }

    #[test]
    fn rejects_sequence_gap() {
        let mut m = sample_manifest();
        m.chunks[1].sequence = 5;
        assert!(matches!(
            m.validate(),
            Err(NetChunkError::ManifestCorrupt(_))
        ));
    }

    #[test]
    fn rejects_size_mismatch() {
        let mut m = sample_manifest();
        m.chunks[0].size = 999;
        assert!(matches!(
            m.validate(),
            Err(NetChunkError::ManifestCorrupt(_))
        ));
    }

    #[test]
    fn rejects_duplicate_server_in_one_chunk() {
        let mut m = sample_manifest();
        m.chunks[0]
            .locations
            .push(Location::new("s1", "chunks/chunk0-dup"));
        assert!(matches!(
            m.validate(),
            Err(NetChunkError::ManifestCorrupt(_))
        ));
    }

    #[test]
    fn round_trips_through_json() {
        let m = sample_manifest();
        let json = m.to_json().unwrap();
        let back = Manifest::from_json(&json).unwrap();
        assert_eq!(back.manifest_id, m.manifest_id);
        assert_eq!(back.chunks.len(), m.chunks.len());
    }

    #[test]
    fn ignores_unknown_fields_for_forward_compatibility() {
        let m = sample_manifest();
        let mut value: serde_json::Value = serde_json::from_str(&m.to_json().unwrap()).unwrap();
        value["some_future_field"] = serde_json::json!("ignored");
        let json = serde_json::to_string(&value).unwrap();
        assert!(Manifest::from_json(&json).is_ok());
    }

    #[test]
    fn atomic_write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.manifest");
        let m = sample_manifest();
        m.write_local_atomic(&path, false, 0).unwrap();
        assert!(!path.with_extension("manifest.tmp").exists());
        let back = Manifest::read_local(&path).unwrap();
        assert_eq!(back.manifest_id, m.manifest_id);
    }

    #[test]
    fn backup_retention_keeps_only_max_backups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.manifest");
        let m = sample_manifest();
        m.write_local_atomic(&path, false, 0).unwrap();
        for _ in 0..3 {
            std::thread::sleep(std::time::Duration::from_millis(1100));
            m.write_local_atomic(&path, true, 2).unwrap();
        }
        let backups: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_str().unwrap().contains(".backup."))
            .collect();
        assert!(backups.len() <= 2);
    }
}
