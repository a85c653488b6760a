//! In-memory `Transport` for the test suite (spec.md §8). Gated behind the
//! `test-util` feature so it is never compiled into a release binary but is
//! usable from both this crate's unit tests and the integration tests under
//! `tests/`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{NetChunkError, Result};
use crate::server::ServerDescriptor;
use crate::transport::{ProgressCallback, Transport};

/// Per-server in-memory object store, keyed by remote path.
#[derive(Default)]
struct ServerStore {
    objects: HashMap<String, Vec<u8>>,
}

/// Simulates a pool of FTP servers without touching the network. Supports
/// injecting a deterministic failure for a given `(server_id, remote_path)`
/// pair so repair/retry paths can be exercised.
#[derive(Default)]
pub struct MockTransport {
    servers: Mutex<HashMap<String, ServerStore>>,
    failures: Mutex<HashMap<(String, String), NetChunkError>>,
    unreachable: Mutex<std::collections::HashSet<String>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call to `remote_path` on `server_id` fails once with `err`,
    /// then the injected failure is cleared (simulates a transient fault).
    pub fn fail_once(&self, server_id: &str, remote_path: &str, err: NetChunkError) {
        self.failures
            .lock()
            .unwrap()
            .insert((server_id.to_string(), remote_path.to_string()), err);
    }

    /// Marks a server as entirely unreachable until `mark_reachable` is called.
    pub fn mark_unreachable(&self, server_id: &str) {
        self.unreachable.lock().unwrap().insert(server_id.to_string());
    }

    pub fn mark_reachable(&self, server_id: &str) {
        self.unreachable.lock().unwrap().remove(server_id);
    }

    /// Directly inspects what is stored on one server, for test assertions.
    pub fn stored_chunk_ids(&self, server_id: &str) -> Vec<String> {
        let servers = self.servers.lock().unwrap();
        servers
            .get(server_id)
            .map(|s| s.objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn check_unreachable(&self, server_id: &str) -> Result<()> {
        if self.unreachable.lock().unwrap().contains(server_id) {
            return Err(NetChunkError::ServerUnavailable(server_id.to_string()));
        }
        Ok(())
    }

    fn take_injected_failure(&self, server_id: &str, remote_path: &str) -> Option<NetChunkError> {
        self.failures
            .lock()
            .unwrap()
            .remove(&(server_id.to_string(), remote_path.to_string()))
    }
}

impl Transport for MockTransport {
    fn upload(
        &self,
        server: &ServerDescriptor,
        remote_path: &str,
        data: &[u8],
        _progress: Option<&dyn ProgressCallback>,
    ) -> Result<()> {
        self.check_unreachable(&server.server_id)?;
        if let Some(e) = self.take_injected_failure(&server.server_id, remote_path) {
            return Err(e);
        }
        let mut servers = self.servers.lock().unwrap();
        let store = servers.entry(server.server_id.clone()).or_default();
        store.objects.insert(remote_path.to_string(), data.to_vec());
        Ok(())
    }

    fn download(
        &self,
        server: &ServerDescriptor,
        remote_path: &str,
        _progress: Option<&dyn ProgressCallback>,
    ) -> Result<Vec<u8>> {
        self.check_unreachable(&server.server_id)?;
        if let Some(e) = self.take_injected_failure(&server.server_id, remote_path) {
            return Err(e);
        }
        let servers = self.servers.lock().unwrap();
        servers
            .get(&server.server_id)
            .and_then(|s| s.objects.get(remote_path))
            .cloned()
            .ok_or_else(|| NetChunkError::Network(format!(
                "{remote_path} not found on {}",
                server.server_id
            )))
    }

    fn delete(&self, server: &ServerDescriptor, remote_path: &str) -> Result<()> {
        self.check_unreachable(&server.server_id)?;
        let mut servers = self.servers.lock().unwrap();
        if let Some(store) = servers.get_mut(&server.server_id) {
            store.objects.remove(remote_path);
        }
        Ok(())
    }

    fn exists(&self, server: &ServerDescriptor, remote_path: &str) -> Result<bool> {
        self.check_unreachable(&server.server_id)?;
        let servers = self.servers.lock().unwrap();
        Ok(servers
            .get(&server.server_id)
            .map(|s| s.objects.contains_key(remote_path))
            .unwrap_or(false))
    }

    fn size(&self, server: &ServerDescriptor, remote_path: &str) -> Result<u64> {
        self.check_unreachable(&server.server_id)?;
        let servers = self.servers.lock().unwrap();
        servers
            .get(&server.server_id)
            .and_then(|s| s.objects.get(remote_path))
            .map(|d| d.len() as u64)
            .ok_or_else(|| NetChunkError::Network(format!(
                "{remote_path} not found on {}",
                server.server_id
            )))
    }

    fn mkdir(&self, server: &ServerDescriptor, _remote_path: &str) -> Result<()> {
        self.check_unreachable(&server.server_id)?;
        self.servers
            .lock()
            .unwrap()
            .entry(server.server_id.clone())
            .or_default();
        Ok(())
    }

    fn list(&self, server: &ServerDescriptor, remote_path: &str) -> Result<Vec<String>> {
        self.check_unreachable(&server.server_id)?;
        let servers = self.servers.lock().unwrap();
        Ok(servers
            .get(&server.server_id)
            .map(|s| {
                s.objects
                    .keys()
                    .filter(|k| k.starts_with(remote_path))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn ping(&self, server: &ServerDescriptor) -> Result<Duration> {
        self.check_unreachable(&server.server_id)?;
        Ok(Duration::from_millis(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn srv(id: &str) -> ServerDescriptor {
        ServerDescriptor {
            server_id: id.into(),
            host: "mock".into(),
            port: 21,
            username: "u".into(),
            password: "p".into(),
            base_path: "/".into(),
            tls: false,
            passive: true,
            priority: 0,
        }
    }

    #[test]
    fn round_trips_uploaded_data() {
        let transport = MockTransport::new();
        let server = srv("s1");
        transport.upload(&server, "chunks/a", b"hello", None).unwrap();
        let data = transport.download(&server, "chunks/a", None).unwrap();
        assert_eq!(data, b"hello");
    }

    #[test]
    fn unreachable_server_fails_every_call() {
        let transport = MockTransport::new();
        let server = srv("s1");
        transport.mark_unreachable("s1");
        let err = transport.upload(&server, "chunks/a", b"x", None).unwrap_err();
        assert!(matches!(err, NetChunkError::ServerUnavailable(_)));
    }

    #[test]
    fn injected_failure_fires_exactly_once() {
        let transport = MockTransport::new();
        let server = srv("s1");
        transport.fail_once("s1", "chunks/a", NetChunkError::Network("reset".into()));
        assert!(transport.upload(&server, "chunks/a", b"x", None).is_err());
        assert!(transport.upload(&server, "chunks/a", b"x", None).is_ok());
    }
}
