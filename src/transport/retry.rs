//! Retry policy and error classification shared by the transport and repair
//! layers (C8, spec.md §4.2, §4.6, §7).

use std::thread;
use std::time::Duration;

use crate::error::{NetChunkError, Result};

/// Whether a failed transport primitive is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Transient: connection reset, timeout, temporary server busy.
    Retryable,
    /// Permanent: auth failure, disk full, not found, integrity mismatch.
    Fatal,
}

/// Buckets an error from a transport primitive into retryable vs fatal
/// (spec.md §7). Integrity and configuration errors are never retried;
/// network-shaped errors are retried up to the configured attempt limit.
/// `Ftp` errors carry their own classification, decided at the primitive
/// boundary from the underlying FTP reply (spec.md §4.2: auth failure,
/// not-found, access-denied, storage-full, and integrity mismatch are
/// fatal; connect-refused/timeout/transient send-recv/name-resolution are
/// retryable).
pub fn classify(err: &NetChunkError) -> RetryClass {
    match err {
        NetChunkError::Network(_)
        | NetChunkError::ServerUnavailable(_)
        | NetChunkError::Timeout(_) => RetryClass::Retryable,
        NetChunkError::Ftp { retryable, .. } => {
            if *retryable {
                RetryClass::Retryable
            } else {
                RetryClass::Fatal
            }
        }
        _ => RetryClass::Fatal,
    }
}

/// Bounded retry with linear backoff (spec.md §4.2: "3 attempts, linear
/// backoff"). `base_delay * attempt` is slept between attempts; the final
/// attempt's error (or the first fatal error encountered) is returned.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Runs `op` until it succeeds, a fatal error is returned, or
    /// `max_attempts` is exhausted.
    pub fn run<T>(&self, mut op: impl FnMut(u32) -> Result<T>) -> Result<T> {
        let mut last_err = None;
        for attempt in 1..=self.max_attempts {
            match op(attempt) {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if classify(&e) == RetryClass::Fatal || attempt == self.max_attempts {
                        return Err(e);
                    }
                    last_err = Some(e);
                    thread::sleep(self.base_delay * attempt);
                }
            }
        }
        Err(last_err.unwrap_or(NetChunkError::Unknown("retry loop exited without a result".into())))
    }
}
