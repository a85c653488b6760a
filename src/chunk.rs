//! Chunker (C2): splits a file into fixed-size, sequence-numbered,
//! content-hashed chunks (spec.md §4.1).

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{NetChunkError, Result};
use crate::hash;

/// One replica's placement record, owned by its chunk's `locations`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Location {
    pub server_id: String,
    pub remote_path: String,
    pub upload_time: i64,
    pub verified: bool,
    pub last_verified: Option<i64>,
}

impl Location {
    pub fn new(server_id: impl Into<String>, remote_path: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            remote_path: remote_path.into(),
            upload_time: now_unix(),
            verified: true,
            last_verified: Some(now_unix()),
        }
    }
}

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// A single chunk record as tracked by the manifest (spec.md §3, §6). Field
/// names follow Rust convention internally; the wire names from the §6
/// manifest JSON schema (`sequence_number`, `created_timestamp`) are kept on
/// the wire via `serde(rename)` so on-disk manifests match the spec exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    #[serde(rename = "sequence_number")]
    pub sequence: u64,
    pub size: u64,
    pub hash: String,
    #[serde(rename = "created_timestamp")]
    pub created_at: i64,
    pub locations: Vec<Location>,
}

impl Chunk {
    /// `locations[]` cardinality is bounded by MAX_REPLICAS and `server_id`
    /// values within one chunk are pairwise distinct (spec.md §3).
    pub const MAX_REPLICAS: usize = 16;

    pub fn has_server(&self, server_id: &str) -> bool {
        self.locations.iter().any(|l| l.server_id == server_id)
    }

    pub fn healthy_locations(&self) -> impl Iterator<Item = &Location> {
        self.locations.iter().filter(|l| l.verified)
    }
}

/// The payload and sequence number produced by one `Chunker::next_chunk` call.
pub struct ChunkPayload {
    pub sequence: u64,
    pub id: String,
    pub hash: String,
    pub data: Vec<u8>,
}

/// Streaming, restartable splitter over a single input file (C2).
///
/// Construction pre-passes the whole file through SHA-256 (spec.md §4.1);
/// the file handle used for the main pass is reopened so the pre-pass and
/// main pass never contend over one cursor.
pub struct Chunker {
    path: PathBuf,
    chunk_size: u64,
    file_hash: String,
    total_size: u64,
    reader: BufReader<File>,
    next_sequence: u64,
}

impl Chunker {
    pub fn open(path: &Path, chunk_size: u64) -> Result<Self> {
        if chunk_size == 0 {
            return Err(NetChunkError::InvalidArgument(
                "chunk_size must be non-zero".into(),
            ));
        }
        let meta = std::fs::metadata(path).map_err(|_| {
            NetChunkError::FileNotFound(path.to_path_buf())
        })?;
        let total_size = meta.len();
        if total_size == 0 {
            return Err(NetChunkError::InvalidArgument(
                "cannot chunk a zero-byte file".into(),
            ));
        }

        let file_hash = hash::file(path)?;
        let file = File::open(path).map_err(|_| NetChunkError::FileNotFound(path.to_path_buf()))?;

        Ok(Self {
            path: path.to_path_buf(),
            chunk_size,
            file_hash,
            total_size,
            reader: BufReader::new(file),
            next_sequence: 0,
        })
    }

    pub fn file_hash(&self) -> &str {
        &self.file_hash
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn chunk_count(&self) -> u64 {
        (self.total_size + self.chunk_size - 1) / self.chunk_size
    }

    /// Reopens the underlying file, restarting the main pass from sequence 0.
    /// The precomputed file hash is reused (spec.md §4.1: "restartable by
    /// reopening the file").
    pub fn restart(&mut self) -> Result<()> {
        let file = File::open(&self.path)
            .map_err(|_| NetChunkError::FileNotFound(self.path.clone()))?;
        self.reader = BufReader::new(file);
        self.next_sequence = 0;
        Ok(())
    }

    /// Returns the next chunk, or `None` at end-of-sequence (spec.md §9
    /// ambiguity #2: a single EOS signal distinct from any real error).
    pub fn next_chunk(&mut self) -> Result<Option<ChunkPayload>> {
        let mut data = vec![0u8; self.chunk_size as usize];
        let mut filled = 0usize;
        while filled < data.len() {
            let n = self.reader.read(&mut data[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            return Ok(None);
        }
        data.truncate(filled);

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let chunk_hash = hash::bytes(&data);
        let id = make_chunk_id(sequence, &self.file_hash, &chunk_hash);

        Ok(Some(ChunkPayload {
            sequence,
            id,
            hash: chunk_hash,
            data,
        }))
    }
}

/// 8 hex digits of sequence + 4 hex digits of file-hash prefix + 12 hex
/// digits of randomness (spec.md §4.1). Per-file unique only; never used
/// as an integrity oracle (that's `hash`, see spec.md §9 ambiguity #1).
fn make_chunk_id(sequence: u64, file_hash: &str, _chunk_hash: &str) -> String {
    let seq_part = format!("{:08x}", sequence & 0xFFFF_FFFF);
    let file_prefix: String = file_hash.chars().take(4).collect();
    let mut rand_bytes = [0u8; 6];
    rand::rngs::OsRng.fill_bytes(&mut rand_bytes);
    let rand_part = hex::encode(rand_bytes);
    format!("{seq_part}{file_prefix}{rand_part}")
}
