//! FTP transport substrate (C3, spec.md §4.2) and the shared error
//! classification / retry policy it and the repair engine both use (C8,
//! spec.md §4.2, §4.6, §7).

mod ftp;
mod pool;
mod retry;

pub use ftp::FtpTransport;
pub use pool::ConnectionPool;
pub use retry::{classify, RetryClass, RetryPolicy};

use std::time::Duration;

use crate::error::Result;
use crate::server::ServerDescriptor;

/// What a progress callback tells the transport to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressSignal {
    Continue,
    Cancel,
}

/// Invoked from inside a transfer with `(bytes_done, bytes_total)`.
/// Cancellation is cooperative: honored at the next byte boundary
/// (spec.md §4.2, §5).
pub trait ProgressCallback: Fn(u64, u64) -> ProgressSignal + Send + Sync {}
impl<T: Fn(u64, u64) -> ProgressSignal + Send + Sync> ProgressCallback for T {}

/// Per-server byte-stream primitives (spec.md §4.2). All calls block the
/// caller until complete or until the primitive's wall-clock timeout
/// elapses. Implemented by `FtpTransport` for real servers and by
/// `testing::MockTransport` (feature `test-util`) for the test suite.
pub trait Transport: Send + Sync {
    fn upload(
        &self,
        server: &ServerDescriptor,
        remote_path: &str,
        data: &[u8],
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<()>;

    fn download(
        &self,
        server: &ServerDescriptor,
        remote_path: &str,
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<Vec<u8>>;

    fn delete(&self, server: &ServerDescriptor, remote_path: &str) -> Result<()>;

    fn exists(&self, server: &ServerDescriptor, remote_path: &str) -> Result<bool>;

    fn size(&self, server: &ServerDescriptor, remote_path: &str) -> Result<u64>;

    fn mkdir(&self, server: &ServerDescriptor, remote_path: &str) -> Result<()>;

    /// Lists entries under `remote_path` (used for `list_manifests`,
    /// spec.md §4.2).
    fn list(&self, server: &ServerDescriptor, remote_path: &str) -> Result<Vec<String>>;

    fn ping(&self, server: &ServerDescriptor) -> Result<Duration>;
}
