//! Placement engine (C5, spec.md §4.4): picks which servers host each
//! chunk's replicas.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{NetChunkError, Result};
use crate::server::{ServerDescriptor, ServerHealth};

/// One server plus its live health, as seen by the placement engine.
pub struct PlacementServer {
    pub descriptor: ServerDescriptor,
    pub health: Arc<ServerHealth>,
}

/// Tracks how many chunks have already been placed on each server during the
/// current upload, so placement load-balances within one run rather than
/// just picking the same "best" server for every chunk (spec.md §4.4 rule 2).
#[derive(Default)]
pub struct PlacementLoad {
    counts: HashMap<String, u64>,
}

impl PlacementLoad {
    pub fn new() -> Self {
        Self::default()
    }

    fn count(&self, server_id: &str) -> u64 {
        *self.counts.get(server_id).unwrap_or(&0)
    }

    fn record(&mut self, server_id: &str) {
        *self.counts.entry(server_id.to_string()).or_insert(0) += 1;
    }
}

/// Selects `replication_factor` distinct servers for one chunk (spec.md
/// §4.4). Ranking, in order: healthy before unhealthy, fewer chunks placed
/// so far (load balance), lower last-observed latency, higher configured
/// priority, then `server_id` for a deterministic tiebreak. Already-used
/// server ids (e.g. from a partially-placed chunk being repaired) are
/// excluded via `exclude`.
pub fn select_servers<'a>(
    servers: &'a [PlacementServer],
    replication_factor: u32,
    load: &mut PlacementLoad,
    exclude: &[String],
) -> Result<Vec<&'a PlacementServer>> {
    let mut candidates: Vec<&PlacementServer> = servers
        .iter()
        .filter(|s| !exclude.contains(&s.descriptor.server_id))
        .collect();

    candidates.sort_by(|a, b| {
        let healthy_a = a.health.is_healthy();
        let healthy_b = b.health.is_healthy();
        healthy_b
            .cmp(&healthy_a)
            .then_with(|| load.count(&a.descriptor.server_id).cmp(&load.count(&b.descriptor.server_id)))
            .then_with(|| a.health.last_latency_ms().cmp(&b.health.last_latency_ms()))
            .then_with(|| b.descriptor.priority.cmp(&a.descriptor.priority))
            .then_with(|| a.descriptor.server_id.cmp(&b.descriptor.server_id))
    });

    let healthy_count = candidates.iter().filter(|s| s.health.is_healthy()).count();
    if healthy_count < replication_factor as usize {
        return Err(NetChunkError::InsufficientServers {
            needed: replication_factor as usize,
            found: healthy_count,
        });
    }

    let chosen: Vec<&PlacementServer> = candidates
        .into_iter()
        .take(replication_factor as usize)
        .collect();
    for s in &chosen {
        load.record(&s.descriptor.server_id);
    }
    Ok(chosen)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(id: &str, healthy: bool, priority: u32) -> PlacementServer {
        let health = Arc::new(ServerHealth::new());
        if !healthy {
            health.record_failure(0);
        }
        PlacementServer {
            descriptor: ServerDescriptor {
                server_id: id.into(),
                host: format!("{id}.example.com"),
                port: 21,
                username: "u".into(),
                password: "p".into(),
                base_path: "/".into(),
                tls: false,
                passive: true,
                priority,
            },
            health,
        }
    }

    #[test]
    fn picks_only_healthy_servers() {
        let servers = vec![
            server("s1", true, 0),
            server("s2", false, 0),
            server("s3", true, 0),
        ];
        let mut load = PlacementLoad::new();
        let chosen = select_servers(&servers, 2, &mut load, &[]).unwrap();
        assert_eq!(chosen.len(), 2);
        assert!(chosen.iter().all(|s| s.health.is_healthy()));
    }

    #[test]
    fn fails_when_not_enough_healthy_servers() {
        let servers = vec![server("s1", true, 0), server("s2", false, 0)];
        let mut load = PlacementLoad::new();
        let err = select_servers(&servers, 2, &mut load, &[]).unwrap_err();
        assert!(matches!(err, NetChunkError::InsufficientServers { .. }));
    }

    #[test]
    fn balances_load_across_successive_calls() {
        let servers = vec![server("s1", true, 0), server("s2", true, 0), server("s3", true, 0)];
        let mut load = PlacementLoad::new();
        let first = select_servers(&servers, 1, &mut load, &[]).unwrap();
        let second = select_servers(&servers, 1, &mut load, &[]).unwrap();
        assert_ne!(first[0].descriptor.server_id, second[0].descriptor.server_id);
    }

    #[test]
    fn excludes_servers_already_holding_a_replica() {
        let servers = vec![server("s1", true, 0), server("s2", true, 0), server("s3", true, 0)];
        let mut load = PlacementLoad::new();
        let chosen = select_servers(&servers, 2, &mut load, &["s1".to_string()]).unwrap();
        assert!(chosen.iter().all(|s| s.descriptor.server_id != "s1"));
    }
}
