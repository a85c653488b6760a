//! Verify / repair / rebalance engine (C7, spec.md §4.6). Classifies chunk
//! health, removes corrupted replicas, re-replicates, and rebalances load
//! across servers — never at the cost of a chunk's last known-good replica.

use std::collections::HashMap;
use std::sync::Arc;

use log::{info, warn};
use serde::Serialize;

use crate::chunk::Location;
use crate::error::{NetChunkError, Result};
use crate::hash;
use crate::manifest::Manifest;
use crate::orchestrator::Orchestrator;
use crate::placement::{self, PlacementLoad};

/// Per-chunk classification after probing every recorded replica
/// (spec.md §4.6 table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChunkHealth {
    Healthy,
    Degraded,
    Critical,
    Lost,
}

impl ChunkHealth {
    fn classify(healthy_replicas: usize, replication_factor: u32) -> Self {
        match healthy_replicas {
            0 => ChunkHealth::Lost,
            1 => ChunkHealth::Critical,
            n if n as u32 >= replication_factor => ChunkHealth::Healthy,
            _ => ChunkHealth::Degraded,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkReport {
    pub chunk_id: String,
    pub sequence: u64,
    pub health: ChunkHealth,
    pub healthy_replicas: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub chunks_verified: u64,
    pub healthy: u64,
    pub degraded: u64,
    pub critical: u64,
    pub lost: u64,
    pub chunks: Vec<ChunkReport>,
}

/// Probes every replica of every chunk. A transport failure to reach a
/// server is not corruption; only a downloaded-but-mismatched hash is
/// (spec.md §4.6: "A failure to reach the server does NOT count as
/// corruption").
pub fn verify(orchestrator: &Orchestrator, manifest: &Manifest) -> VerifyReport {
    let mut report = VerifyReport {
        chunks_verified: 0,
        healthy: 0,
        degraded: 0,
        critical: 0,
        lost: 0,
        chunks: Vec::new(),
    };

    for chunk in &manifest.chunks {
        let healthy_replicas = probe_chunk(orchestrator, chunk).healthy.len();
        let health = ChunkHealth::classify(healthy_replicas, manifest.replication_factor);
        match health {
            ChunkHealth::Healthy => report.healthy += 1,
            ChunkHealth::Degraded => report.degraded += 1,
            ChunkHealth::Critical => report.critical += 1,
            ChunkHealth::Lost => report.lost += 1,
        }
        report.chunks_verified += 1;
        report.chunks.push(ChunkReport {
            chunk_id: chunk.id.clone(),
            sequence: chunk.sequence,
            health,
            healthy_replicas,
        });
    }
    report
}

/// Result of probing every recorded replica of one chunk. `unreachable`
/// replicas are locations the probe simply couldn't confirm this pass — a
/// downed server, a timeout — and are distinct from `corrupted` replicas,
/// which downloaded successfully but with the wrong hash (spec.md §4.6:
/// "A failure to reach the server does NOT count as corruption"). Only
/// `corrupted` locations are ever deleted or dropped from the manifest;
/// `unreachable` ones are kept so a replica that comes back later is
/// reintegrated rather than orphaned.
struct ProbeResult<'a> {
    healthy: Vec<&'a Location>,
    corrupted: Vec<&'a Location>,
    unreachable: Vec<&'a Location>,
}

/// Probes every replica of every chunk, classifying each as healthy
/// (reachable and hash-verified), corrupted (reachable but hash mismatch),
/// or unreachable (transport error).
fn probe_chunk<'a>(orchestrator: &Orchestrator, chunk: &'a crate::chunk::Chunk) -> ProbeResult<'a> {
    let mut result = ProbeResult {
        healthy: Vec::new(),
        corrupted: Vec::new(),
        unreachable: Vec::new(),
    };
    for location in &chunk.locations {
        let Some(server) = orchestrator
            .servers
            .iter()
            .find(|s| s.descriptor.server_id == location.server_id)
        else {
            result.unreachable.push(location);
            continue;
        };
        match orchestrator
            .transport
            .download(&server.descriptor, &location.remote_path, None)
        {
            Ok(data) if hash::bytes(&data) == chunk.hash => result.healthy.push(location),
            Ok(_) => {
                warn!(
                    "replica of chunk {} on server {} is corrupted",
                    chunk.id, location.server_id
                );
                result.corrupted.push(location);
            }
            Err(e) => {
                warn!(
                    "could not reach server {} for chunk {}: {e}",
                    location.server_id, chunk.id
                );
                result.unreachable.push(location);
            }
        }
    }
    result
}

/// Auto-repair (spec.md §4.6 Auto-repair / Force mode). `force` re-uploads
/// to every target even when the replica already reads healthy, modeling a
/// server previously thought lost coming back with stale/missing data.
/// Returns the rewritten manifest; callers persist it afterward.
pub fn repair(orchestrator: &Orchestrator, mut manifest: Manifest, force: bool) -> Result<Manifest> {
    let mut load = PlacementLoad::new();
    let mut any_repaired = false;

    for chunk in &mut manifest.chunks {
        let probe = probe_chunk(orchestrator, chunk);
        let healthy_locations: Vec<Location> = probe.healthy.into_iter().cloned().collect();
        let corrupted_locations: Vec<Location> = probe.corrupted.into_iter().cloned().collect();
        let unreachable_locations: Vec<Location> = probe.unreachable.into_iter().cloned().collect();
        let health = ChunkHealth::classify(healthy_locations.len(), manifest.replication_factor);

        if health == ChunkHealth::Lost {
            // Terminal for this pass (spec.md §4.6); manifest kept intact
            // so replicas that resurface can be reintegrated.
            continue;
        }
        if health == ChunkHealth::Healthy && !force {
            continue;
        }

        // CLEANUP: delete and drop only replicas that downloaded with the
        // wrong hash. `classify` above guarantees at least one healthy
        // replica whenever we reach this point (Lost is the only 0-healthy
        // case, and it already `continue`d), so every corrupted replica has
        // a confirmed known-good copy elsewhere before it is removed
        // (spec.md §4.6 Failure semantics). Unreachable replicas are merely
        // unconfirmed this pass and stay in the manifest so they can be
        // reintegrated once the server is back.
        for bad in &corrupted_locations {
            if let Some(server) = orchestrator
                .servers
                .iter()
                .find(|s| s.descriptor.server_id == bad.server_id)
            {
                if let Err(e) = orchestrator.transport.delete(&server.descriptor, &bad.remote_path) {
                    warn!("failed to delete corrupted replica on {}: {e}", bad.server_id);
                }
            }
            any_repaired = true;
        }
        chunk.locations = healthy_locations
            .iter()
            .chain(unreachable_locations.iter())
            .cloned()
            .collect();

        // REFILL: top up to the replication factor using a known-good payload.
        let deficit = (manifest.replication_factor as usize).saturating_sub(chunk.locations.len());
        if deficit == 0 && !force {
            continue;
        }
        // Source from a hash-verified replica only; an unreachable location
        // can't be read reliably, and this chunk is guaranteed at least one
        // healthy location per the classification above.
        let Some(source_location) = healthy_locations.first().cloned() else {
            continue;
        };
        let Some(source_server) = orchestrator
            .servers
            .iter()
            .find(|s| s.descriptor.server_id == source_location.server_id)
        else {
            continue;
        };
        let payload = match orchestrator
            .transport
            .download(&source_server.descriptor, &source_location.remote_path, None)
        {
            Ok(data) => data,
            Err(e) => {
                warn!("could not read surviving replica for chunk {}: {e}", chunk.id);
                continue;
            }
        };

        let exclude: Vec<String> = chunk.locations.iter().map(|l| l.server_id.clone()).collect();
        let wanted = if force {
            manifest.replication_factor
        } else {
            deficit as u32
        };
        let targets = match placement::select_servers(&orchestrator.servers, wanted, &mut load, &exclude) {
            Ok(t) => t,
            Err(NetChunkError::InsufficientServers { found, .. }) if found > 0 => {
                placement::select_servers(&orchestrator.servers, found as u32, &mut load, &exclude)?
            }
            Err(_) => continue,
        };

        let remote_path = format!("chunks/{}", chunk.id);
        for target in targets {
            match orchestrator
                .transport
                .upload(&target.descriptor, &remote_path, &payload, None)
            {
                Ok(()) => {
                    chunk.locations.push(Location::new(&target.descriptor.server_id, &remote_path));
                    any_repaired = true;
                }
                Err(e) => warn!(
                    "refill upload of chunk {} to {} failed: {e}",
                    chunk.id, target.descriptor.server_id
                ),
            }
        }
    }

    if any_repaired {
        manifest.last_verified = Some(crate::chunk::now_unix());
        info!("repair pass modified manifest {}", manifest.manifest_id);
    }
    Ok(manifest)
}

/// Rebalances chunk placement across servers (spec.md §4.6 Rebalance):
/// computes per-server target holdings, then greedily moves chunks from
/// overloaded to underloaded servers without ever dropping a chunk below
/// its replication factor.
pub fn rebalance(orchestrator: &Orchestrator, mut manifest: Manifest) -> Result<Manifest> {
    let server_count = orchestrator.servers.len();
    if server_count == 0 {
        return Ok(manifest);
    }
    let total_chunks = manifest.chunks.len();
    let base_target = total_chunks / server_count;
    let remainder = total_chunks % server_count;

    let targets: HashMap<String, usize> = orchestrator
        .servers
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let target = if i < remainder { base_target + 1 } else { base_target };
            (s.descriptor.server_id.clone(), target)
        })
        .collect();

    loop {
        let mut holdings: HashMap<String, usize> = HashMap::new();
        for s in &orchestrator.servers {
            holdings.insert(s.descriptor.server_id.clone(), 0);
        }
        for chunk in &manifest.chunks {
            for loc in &chunk.locations {
                *holdings.entry(loc.server_id.clone()).or_insert(0) += 1;
            }
        }

        let overloaded = orchestrator
            .servers
            .iter()
            .map(|s| s.descriptor.server_id.clone())
            .filter(|id| holdings[id] > *targets.get(id).unwrap_or(&0))
            .max_by_key(|id| holdings[id] as i64 - *targets.get(id).unwrap_or(&0) as i64);
        let underloaded = orchestrator
            .servers
            .iter()
            .map(|s| s.descriptor.server_id.clone())
            .filter(|id| holdings[id] < *targets.get(id).unwrap_or(&0))
            .max_by_key(|id| *targets.get(id).unwrap_or(&0) as i64 - holdings[id] as i64);

        let (Some(source), Some(sink)) = (overloaded, underloaded) else {
            break;
        };
        if source == sink {
            break;
        }

        let move_candidate = manifest.chunks.iter_mut().find(|c| {
            c.locations.iter().any(|l| l.server_id == source)
                && !c.locations.iter().any(|l| l.server_id == sink)
        });
        let Some(chunk) = move_candidate else {
            break;
        };

        let Some(sink_server) = orchestrator
            .servers
            .iter()
            .find(|s| s.descriptor.server_id == sink)
        else {
            break;
        };
        let Some(source_location) = chunk.locations.iter().find(|l| l.server_id == source).cloned()
        else {
            break;
        };
        let Some(source_server) = orchestrator
            .servers
            .iter()
            .find(|s| s.descriptor.server_id == source)
        else {
            break;
        };

        let payload = match orchestrator
            .transport
            .download(&source_server.descriptor, &source_location.remote_path, None)
        {
            Ok(data) => data,
            Err(e) => {
                warn!("rebalance could not read chunk {} from {source}: {e}", chunk.id);
                break;
            }
        };

        let remote_path = format!("chunks/{}", chunk.id);
        if orchestrator
            .transport
            .upload(&sink_server.descriptor, &remote_path, &payload, None)
            .is_err()
        {
            break;
        }
        chunk.locations.push(Location::new(&sink, &remote_path));

        // Only drop the source replica if the chunk still meets R afterward
        // (spec.md §4.6 Rebalance: never below R as a result of a move).
        if chunk.locations.len() as u32 > manifest.replication_factor {
            if orchestrator
                .transport
                .delete(&source_server.descriptor, &source_location.remote_path)
                .is_ok()
            {
                chunk.locations.retain(|l| l.server_id != source);
            }
        }
    }

    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Write;
    use std::sync::Arc;

    use crate::orchestrator::Orchestrator;
    use crate::placement::PlacementServer;
    use crate::server::{ServerDescriptor, ServerHealth};
    use crate::testing::MockTransport;

    use super::*;

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

    fn orchestrator(transport: Arc<MockTransport>, ids: &[&str], replication_factor: u32) -> Orchestrator {
        Orchestrator {
            transport,
            servers: ids
                .iter()
                .map(|id| PlacementServer {
                    descriptor: descriptor(id),
                    health: Arc::new(ServerHealth::new()),
                })
                .collect(),
            replication_factor,
            min_replicas_required: 1,
            backups_enabled: false,
            max_backups: 0,
            local_storage_path: tempfile::tempdir().unwrap().into_path(),
        }
    }

    /// A replica that merely failed to download must not be treated as
    /// corrupted: it should survive CLEANUP untouched, and never be handed
    /// to `transport.delete`.
    #[test]
    fn unreachable_replica_is_kept_not_deleted() {
        let transport = Arc::new(MockTransport::new());
        let orch = orchestrator(transport.clone(), &["s1", "s2", "s3"], 3);

        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("input.bin");
        let data = vec![7u8; 100_000];
        File::create(&input_path).unwrap().write_all(&data).unwrap();
        let (manifest, _) = orch.upload(&input_path, "unreachfile", 50_000).unwrap();

        let chunk = &manifest.chunks[0];
        let unreachable_location = chunk.locations[0].clone();
        transport.mark_unreachable(&unreachable_location.server_id);

        let repaired = repair(&orch, manifest, false).unwrap();
        let chunk = &repaired.chunks[0];
        assert!(
            chunk
                .locations
                .iter()
                .any(|l| l.server_id == unreachable_location.server_id),
            "unreachable-but-unconfirmed replica must stay in the manifest"
        );
        transport.mark_reachable(&unreachable_location.server_id);
        assert!(
            transport
                .stored_chunk_ids(&unreachable_location.server_id)
                .contains(&unreachable_location.remote_path),
            "unreachable replica's object must not have been deleted"
        );
    }

    /// A replica that downloads with the wrong hash is corrupted: CLEANUP
    /// must delete it remotely and drop it from the manifest.
    #[test]
    fn corrupted_replica_is_deleted_and_dropped() {
        let transport = Arc::new(MockTransport::new());
        let orch = orchestrator(transport.clone(), &["s1", "s2", "s3", "s4"], 3);

        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("input.bin");
        let data = vec![4u8; 150_000];
        File::create(&input_path).unwrap().write_all(&data).unwrap();
        let (manifest, _) = orch.upload(&input_path, "corruptfile", 150_000).unwrap();

        let chunk = &manifest.chunks[0];
        let corrupted_location = chunk.locations[0].clone();
        transport
            .upload(
                &descriptor(&corrupted_location.server_id),
                &corrupted_location.remote_path,
                b"garbage",
                None,
            )
            .unwrap();

        let repaired = repair(&orch, manifest, false).unwrap();
        let chunk = &repaired.chunks[0];
        assert!(
            !chunk
                .locations
                .iter()
                .any(|l| l.server_id == corrupted_location.server_id
                    && l.remote_path == corrupted_location.remote_path),
            "corrupted replica must be dropped from the manifest"
        );
        assert!(
            !transport
                .stored_chunk_ids(&corrupted_location.server_id)
                .contains(&corrupted_location.remote_path),
            "corrupted replica's object must have been deleted remotely"
        );
    }

    #[test]
    fn classify_thresholds() {
        assert_eq!(ChunkHealth::classify(0, 3), ChunkHealth::Lost);
        assert_eq!(ChunkHealth::classify(1, 3), ChunkHealth::Critical);
        assert_eq!(ChunkHealth::classify(2, 3), ChunkHealth::Degraded);
        assert_eq!(ChunkHealth::classify(3, 3), ChunkHealth::Healthy);
    }
}
