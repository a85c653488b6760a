//! Upload/download/delete orchestrator (C6, spec.md §4.5). Drives the
//! chunker, placement engine, transport, and manifest codec for whole-file
//! operations.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::warn;

use crate::chunk::{now_unix, Chunker, Location};
use crate::error::{NetChunkError, Result};
use crate::hash;
use crate::manifest::Manifest;
use crate::placement::{self, PlacementLoad, PlacementServer};
use crate::transport::Transport;

/// Returned by `upload` for `netchunk upload -s` / stats reporting
/// (spec.md §4.5 step 5).
#[derive(Debug, Default, Clone)]
pub struct UploadStats {
    pub bytes_uploaded: u64,
    pub chunk_count: u64,
    pub servers_touched: usize,
    pub retries_incurred: u64,
}

#[derive(Debug, Default, Clone)]
pub struct DownloadStats {
    pub bytes_downloaded: u64,
    pub chunk_count: u64,
    pub retries_incurred: u64,
}

pub struct Orchestrator {
    pub transport: Arc<dyn Transport>,
    pub servers: Vec<PlacementServer>,
    pub replication_factor: u32,
    pub min_replicas_required: u32,
    pub backups_enabled: bool,
    pub max_backups: usize,
    /// Directory manifests are cached into on every write, alongside the
    /// remote copies (spec.md §4.3: "Local persistence writes to
    /// `path.tmp`... Remote persistence reuses the transport's atomic
    /// upload"). Caching locally lets `list`/`verify` work against the last
    /// known manifest even when every server is briefly unreachable.
    pub local_storage_path: PathBuf,
}

impl Orchestrator {
    fn local_manifest_path(&self, remote_name: &str) -> PathBuf {
        self.local_storage_path
            .join(format!("{remote_name}.manifest"))
    }

    /// Ensures the `chunks/` and `manifests/` directories exist under each
    /// server's `base_path` (spec.md §4.2, §6 "on-the-wire layout"). Best
    /// effort: a server that already has them (every run after the first)
    /// reports "already exists" or equivalent, which `FtpTransport::mkdir`
    /// already treats as success; any other failure is logged and does not
    /// block the upload, since the subsequent `upload`/rename will surface
    /// a clearer error if the directory genuinely isn't there.
    fn ensure_layout(&self, server: &PlacementServer) {
        for dir in ["chunks", "manifests"] {
            if let Err(e) = self.transport.mkdir(&server.descriptor, dir) {
                warn!(
                    "could not ensure directory {dir} exists on server {}: {e}",
                    server.descriptor.server_id
                );
            }
        }
    }
}

impl Orchestrator {
    /// spec.md §4.5 Upload, steps 1-5.
    pub fn upload(
        &self,
        local_path: &Path,
        remote_name: &str,
        chunk_size: u64,
    ) -> Result<(Manifest, UploadStats)> {
        let mut chunker = Chunker::open(local_path, chunk_size)?;
        let file_hash = chunker.file_hash().to_string();
        let total_size = chunker.total_size();

        let mut manifest = Manifest::new(
            remote_name,
            total_size,
            chunk_size,
            file_hash,
            self.replication_factor,
            self.min_replicas_required,
        );

        let mut stats = UploadStats::default();
        let mut load = PlacementLoad::new();
        let mut touched = std::collections::HashSet::new();

        for server in &self.servers {
            self.ensure_layout(server);
        }

        while let Some(payload) = chunker.next_chunk()? {
            let targets = match placement::select_servers(
                &self.servers,
                self.replication_factor,
                &mut load,
                &[],
            ) {
                Ok(targets) => targets,
                Err(NetChunkError::InsufficientServers { found, .. }) => {
                    // Placement surfaces partial availability; take what's
                    // healthy and let upload fan-out decide the outcome
                    // (spec.md §4.4 guarantees).
                    if found == 0 {
                        return Err(NetChunkError::UploadFailed(
                            "no healthy servers available".into(),
                        ));
                    }
                    placement::select_servers(&self.servers, found as u32, &mut load, &[])?
                }
                Err(e) => return Err(e),
            };

            let remote_path = format!("chunks/{}", payload.id);
            let results: Vec<Result<()>> = std::thread::scope(|scope| {
                let handles: Vec<_> = targets
                    .iter()
                    .map(|target| {
                        let transport = Arc::clone(&self.transport);
                        let descriptor = target.descriptor.clone();
                        let data = payload.data.clone();
                        let remote_path = remote_path.clone();
                        scope.spawn(move || transport.upload(&descriptor, &remote_path, &data, None))
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().expect("upload thread panicked")).collect()
            });

            let mut locations = Vec::new();
            for (target, result) in targets.iter().zip(results.into_iter()) {
                match result {
                    Ok(()) => {
                        locations.push(Location::new(&target.descriptor.server_id, &remote_path));
                        touched.insert(target.descriptor.server_id.clone());
                    }
                    Err(e) => warn!(
                        "upload of chunk {} to server {} failed: {e}",
                        payload.id, target.descriptor.server_id
                    ),
                }
            }

            if locations.is_empty() {
                return Err(NetChunkError::UploadFailed(format!(
                    "chunk {} failed on every target server",
                    payload.id
                )));
            }

            stats.bytes_uploaded += payload.data.len() as u64;
            stats.chunk_count += 1;

            manifest.chunks.push(crate::chunk::Chunk {
                id: payload.id,
                sequence: payload.sequence,
                size: payload.data.len() as u64,
                hash: payload.hash,
                created_at: now_unix(),
                locations,
            });
        }

        stats.servers_touched = touched.len();

        self.persist_manifest_everywhere(&manifest, remote_name)?;
        Ok((manifest, stats))
    }

    /// spec.md §4.5 Download, steps 1-4.
    pub fn download(&self, remote_name: &str, local_path: &Path) -> Result<DownloadStats> {
        let manifest = self.fetch_manifest(remote_name)?;
        let mut stats = DownloadStats::default();

        let tmp_path = local_path.with_extension("netchunk.download.tmp");
        let mut out = File::create(&tmp_path)?;

        for chunk in &manifest.chunks {
            let mut found = None;
            for location in &chunk.locations {
                let Some(server) = self
                    .servers
                    .iter()
                    .find(|s| s.descriptor.server_id == location.server_id)
                else {
                    continue;
                };
                match self
                    .transport
                    .download(&server.descriptor, &location.remote_path, None)
                {
                    Ok(data) => {
                        if hash::bytes(&data) == chunk.hash {
                            found = Some(data);
                            break;
                        }
                        warn!(
                            "replica of chunk {} on server {} failed integrity check",
                            chunk.id, location.server_id
                        );
                    }
                    Err(e) => {
                        stats.retries_incurred += 1;
                        warn!(
                            "download of chunk {} from server {} failed: {e}",
                            chunk.id, location.server_id
                        );
                    }
                }
            }

            let Some(data) = found else {
                drop(out);
                let _ = std::fs::remove_file(&tmp_path);
                return Err(NetChunkError::DownloadFailed(format!(
                    "no verified replica available for chunk {}",
                    chunk.id
                )));
            };

            out.write_all(&data)?;
            stats.bytes_downloaded += data.len() as u64;
            stats.chunk_count += 1;
        }
        out.sync_all()?;
        drop(out);
        std::fs::rename(&tmp_path, local_path)?;
        Ok(stats)
    }

    /// spec.md §4.5 Delete. Best-effort on chunks, logged not fatal.
    pub fn delete(&self, remote_name: &str) -> Result<()> {
        let manifest = self.fetch_manifest(remote_name)?;
        for chunk in &manifest.chunks {
            for location in &chunk.locations {
                if let Some(server) = self
                    .servers
                    .iter()
                    .find(|s| s.descriptor.server_id == location.server_id)
                {
                    if let Err(e) = self
                        .transport
                        .delete(&server.descriptor, &location.remote_path)
                    {
                        warn!(
                            "failed to delete replica of chunk {} on server {}: {e}",
                            chunk.id, location.server_id
                        );
                    }
                }
            }
        }
        let manifest_path = format!("manifests/{remote_name}.manifest");
        for server in &self.servers {
            let _ = self.transport.delete(&server.descriptor, &manifest_path);
        }
        let _ = std::fs::remove_file(self.local_manifest_path(remote_name));
        Ok(())
    }

    /// Fetches and validates the manifest from the first server that
    /// responds with one (spec.md §4.5 Download step 1). Falls back to the
    /// local cache only once every server has been tried and failed, so a
    /// briefly unreachable pool doesn't strand `list`/`verify` entirely.
    pub fn fetch_manifest(&self, remote_name: &str) -> Result<Manifest> {
        let manifest_path = format!("manifests/{remote_name}.manifest");
        for server in &self.servers {
            match self.transport.download(&server.descriptor, &manifest_path, None) {
                Ok(bytes) => {
                    let text = String::from_utf8_lossy(&bytes);
                    if let Ok(manifest) = Manifest::from_json(&text) {
                        return Ok(manifest);
                    }
                }
                Err(e) => warn!(
                    "could not fetch manifest {remote_name} from {}: {e}",
                    server.descriptor.server_id
                ),
            }
        }
        if let Ok(manifest) = Manifest::read_local(&self.local_manifest_path(remote_name)) {
            warn!("falling back to local manifest cache for {remote_name}");
            return Ok(manifest);
        }
        Err(NetChunkError::DownloadFailed(format!(
            "no server returned a valid manifest for {remote_name}"
        )))
    }

    /// Writes the manifest to every configured server and to the local
    /// cache; at least one remote success is required (spec.md §4.5 Upload
    /// step 4; local cache per §4.3's local-persistence contract).
    pub fn persist_manifest_everywhere(&self, manifest: &Manifest, remote_name: &str) -> Result<()> {
        let manifest_path = format!("manifests/{remote_name}.manifest");
        let json = manifest.to_json()?;
        let mut successes = 0;
        for server in &self.servers {
            match self
                .transport
                .upload(&server.descriptor, &manifest_path, json.as_bytes(), None)
            {
                Ok(()) => successes += 1,
                Err(e) => warn!(
                    "failed to persist manifest to server {}: {e}",
                    server.descriptor.server_id
                ),
            }
        }
        if successes == 0 {
            return Err(NetChunkError::UploadFailed(
                "manifest could not be persisted to any server".into(),
            ));
        }
        if let Err(e) = manifest.write_local_atomic(
            &self.local_manifest_path(remote_name),
            self.backups_enabled,
            self.max_backups,
        ) {
            warn!("failed to update local manifest cache for {remote_name}: {e}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{ServerDescriptor, ServerHealth};
    use crate::testing::MockTransport;
    use std::io::Write as _;

    fn descriptor(id: &str) -> ServerDescriptor {
        ServerDescriptor {
            server_id: id.into(),
            host: format!("{id}.example.com"),
            port: 21,
            username: "u".into(),
            password: "p".into(),
            base_path: "/".into(),
            tls: false,
            passive: true,
            priority: 0,
        }
    }

    fn orchestrator(transport: Arc<MockTransport>, servers: &[&str]) -> Orchestrator {
        Orchestrator {
            transport,
            servers: servers
                .iter()
                .map(|id| PlacementServer {
                    descriptor: descriptor(id),
                    health: Arc::new(ServerHealth::new()),
                })
                .collect(),
            replication_factor: 3,
            min_replicas_required: 1,
            backups_enabled: false,
            max_backups: 0,
            local_storage_path: tempfile::tempdir().unwrap().into_path(),
        }
    }

    #[test]
    fn upload_then_download_round_trips_bytes() {
        let transport = Arc::new(MockTransport::new());
        let orch = orchestrator(transport, &["s1", "s2", "s3"]);

        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("input.bin");
        let data = vec![42u8; 10_485_760];
        File::create(&input_path).unwrap().write_all(&data).unwrap();

        let (manifest, stats) = orch.upload(&input_path, "myfile", 4 * 1024 * 1024).unwrap();
        assert_eq!(manifest.chunk_count, 3);
        assert_eq!(stats.chunk_count, 3);

        let output_path = dir.path().join("output.bin");
        orch.download("myfile", &output_path).unwrap();
        let roundtrip = std::fs::read(&output_path).unwrap();
        assert_eq!(roundtrip, data);
    }

    #[test]
    fn every_chunk_gets_three_distinct_locations() {
        let transport = Arc::new(MockTransport::new());
        let orch = orchestrator(transport, &["s1", "s2", "s3"]);

        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("input.bin");
        File::create(&input_path).unwrap().write_all(&vec![1u8; 100]).unwrap();

        let (manifest, _) = orch.upload(&input_path, "f", 50).unwrap();
        for chunk in &manifest.chunks {
            assert_eq!(chunk.locations.len(), 3);
            let mut ids: Vec<_> = chunk.locations.iter().map(|l| &l.server_id).collect();
            ids.sort();
            ids.dedup();
            assert_eq!(ids.len(), 3);
        }
    }

    #[test]
    fn zero_byte_file_is_rejected() {
        let transport = Arc::new(MockTransport::new());
        let orch = orchestrator(transport, &["s1", "s2", "s3"]);
        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("empty.bin");
        File::create(&input_path).unwrap();
        let err = orch.upload(&input_path, "f", 1024).unwrap_err();
        assert!(matches!(err, NetChunkError::InvalidArgument(_)));
    }

    #[test]
    fn fetch_manifest_falls_back_to_local_cache_when_every_server_is_down() {
        let transport = Arc::new(MockTransport::new());
        let orch = orchestrator(transport.clone(), &["s1", "s2", "s3"]);

        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("input.bin");
        File::create(&input_path).unwrap().write_all(&vec![9u8; 1000]).unwrap();
        let (manifest, _) = orch.upload(&input_path, "cachedfile", 400).unwrap();

        transport.mark_unreachable("s1");
        transport.mark_unreachable("s2");
        transport.mark_unreachable("s3");

        let fetched = orch.fetch_manifest("cachedfile").unwrap();
        assert_eq!(fetched.manifest_id, manifest.manifest_id);
    }
}
