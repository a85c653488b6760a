//! Blocking FTP/FTPS transport (C3, spec.md §4.2) built on `suppaftp`. Every
//! primitive opens a fresh control connection, does its work, and closes it;
//! concurrency is bounded by the shared `ConnectionPool`, not by a cached
//! session per server.

use std::io::Cursor;
use std::time::{Duration, Instant};

use suppaftp::{FtpStream, FtpResult};
use suppaftp::native_tls::TlsConnector;
use suppaftp::types::FileType;

use crate::error::{NetChunkError, Result};
use crate::server::ServerDescriptor;

use super::pool::ConnectionPool;
use super::retry::RetryPolicy;
use super::{ProgressCallback, ProgressSignal, Transport};

/// A connected, authenticated control channel, plain or TLS.
enum Session {
    Plain(FtpStream),
    Secure(Box<suppaftp::ImplFtpStream<suppaftp::native_tls::TlsStream<std::net::TcpStream>>>),
}

impl Session {
    fn cwd(&mut self, path: &str) -> FtpResult<()> {
        match self {
            Session::Plain(s) => s.cwd(path),
            Session::Secure(s) => s.cwd(path),
        }
    }

    fn mkdir(&mut self, path: &str) -> FtpResult<()> {
        match self {
            Session::Plain(s) => s.mkdir(path),
            Session::Secure(s) => s.mkdir(path),
        }
    }

    fn put(&mut self, name: &str, data: &[u8]) -> FtpResult<u64> {
        let mut cursor = Cursor::new(data.to_vec());
        match self {
            Session::Plain(s) => s.put_file(name, &mut cursor),
            Session::Secure(s) => s.put_file(name, &mut cursor),
        }
    }

    fn retr(&mut self, name: &str) -> FtpResult<Vec<u8>> {
        match self {
            Session::Plain(s) => s.retr_as_buffer(name).map(|c| c.into_inner()),
            Session::Secure(s) => s.retr_as_buffer(name).map(|c| c.into_inner()),
        }
    }

    fn rm(&mut self, name: &str) -> FtpResult<()> {
        match self {
            Session::Plain(s) => s.rm(name),
            Session::Secure(s) => s.rm(name),
        }
    }

    fn size(&mut self, name: &str) -> FtpResult<usize> {
        match self {
            Session::Plain(s) => s.size(name),
            Session::Secure(s) => s.size(name),
        }
    }

    fn list(&mut self, path: &str) -> FtpResult<Vec<String>> {
        match self {
            Session::Plain(s) => s.list(Some(path)),
            Session::Secure(s) => s.list(Some(path)),
        }
    }

    fn quit(self) {
        match self {
            Session::Plain(mut s) => {
                let _ = s.quit();
            }
            Session::Secure(mut s) => {
                let _ = s.quit();
            }
        }
    }
}

pub struct FtpTransport {
    pool: ConnectionPool,
    ftp_timeout_secs: u64,
    verify_ssl_certificates: bool,
    retry: RetryPolicy,
}

impl FtpTransport {
    pub fn new(max_concurrent_operations: usize, ftp_timeout_secs: u64) -> Self {
        Self {
            pool: ConnectionPool::new(max_concurrent_operations),
            ftp_timeout_secs,
            verify_ssl_certificates: true,
            retry: RetryPolicy::default(),
        }
    }

    /// `security.verify_ssl_certificates = false` (spec.md §6) disables
    /// certificate validation on `ftps://` connections, for servers with
    /// self-signed certificates the operator has separately trusted.
    pub fn with_ssl_verification(mut self, verify: bool) -> Self {
        self.verify_ssl_certificates = verify;
        self
    }

    /// Per-primitive wall-clock timeout, doubled for TLS connections
    /// (spec.md §4.2: "30 s, doubled if TLS is on").
    fn timeout_for(&self, server: &ServerDescriptor) -> Duration {
        let secs = if server.tls {
            self.ftp_timeout_secs * 2
        } else {
            self.ftp_timeout_secs
        };
        Duration::from_secs(secs)
    }

    fn connect(&self, server: &ServerDescriptor) -> Result<Session> {
        let addr = format!("{}:{}", server.host, server.port);
        let to_net_err = |e: suppaftp::FtpError| Self::ftp_err(server, e);

        let mut plain = FtpStream::connect_timeout(&addr, self.timeout_for(server))
            .map_err(to_net_err)?;
        plain
            .login(&server.username, &server.password)
            .map_err(to_net_err)?;
        plain.transfer_type(FileType::Binary).map_err(to_net_err)?;
        if server.passive {
            plain.set_mode(suppaftp::Mode::Passive);
        } else {
            plain.set_mode(suppaftp::Mode::Active);
        }

        let mut session = if server.tls {
            let connector = TlsConnector::builder()
                .danger_accept_invalid_certs(!self.verify_ssl_certificates)
                .danger_accept_invalid_hostnames(!self.verify_ssl_certificates)
                .build()
                .map_err(|e| NetChunkError::Crypto(e.to_string()))?;
            let secure = plain
                .into_secure(connector, &server.host)
                .map_err(to_net_err)?;
            Session::Secure(Box::new(secure))
        } else {
            Session::Plain(plain)
        };

        session
            .cwd(&server.normalized_base_path())
            .map_err(to_net_err)?;
        Ok(session)
    }

    fn ftp_err(server: &ServerDescriptor, e: suppaftp::FtpError) -> NetChunkError {
        let retryable = classify_ftp_error(&e);
        NetChunkError::Ftp {
            server_id: server.server_id.clone(),
            message: e.to_string(),
            retryable,
        }
    }
}

/// Classifies a `suppaftp::FtpError` as retryable vs. fatal at the primitive
/// boundary (spec.md §4.2, §7, §4.6). `ConnectionError` wraps the underlying
/// `std::io::Error` from the control channel — connect-refused, timeout, and
/// name-resolution failures all surface this way and are retryable, except
/// `PermissionDenied`, which no retry will fix. `UnexpectedResponse` carries
/// the server's three-digit FTP reply code (`Status` is a field-less enum
/// whose discriminants are the RFC 959 codes themselves); 530 (not logged
/// in / auth failure), 550 (file unavailable / not found / access denied),
/// 552 (exceeded storage allocation), and 553 (bad filename) are permanent
/// protocol-level rejections and are never retried, while everything else
/// (4xx transient busy/service-not-ready codes) is. A malformed or missing
/// reply (`BadResponse`), a TLS handshake failure (`SecureError`), and an
/// unparsable address (`InvalidAddress`) are all fatal — no retry changes
/// them.
fn classify_ftp_error(e: &suppaftp::FtpError) -> bool {
    match e {
        suppaftp::FtpError::ConnectionError(io_err) => {
            io_err.kind() != std::io::ErrorKind::PermissionDenied
        }
        suppaftp::FtpError::UnexpectedResponse(response) => {
            let code = response.status as u32;
            !matches!(code, 530 | 550 | 551 | 552 | 553)
        }
        suppaftp::FtpError::SecureError(_)
        | suppaftp::FtpError::BadResponse
        | suppaftp::FtpError::InvalidAddress(_) => false,
    }
}

impl Transport for FtpTransport {
    fn upload(
        &self,
        server: &ServerDescriptor,
        remote_path: &str,
        data: &[u8],
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<()> {
        self.retry.run(|_attempt| {
            self.pool.with_slot(|| {
                let mut session = self.connect(server)?;
                let tmp_name = format!("{remote_path}.tmp");
                session
                    .put(&tmp_name, data)
                    .map_err(|e| Self::ftp_err(server, e))?;
                if let Some(cb) = progress {
                    if cb(data.len() as u64, data.len() as u64) == ProgressSignal::Cancel {
                        let _ = session.rm(&tmp_name);
                        session.quit();
                        return Err(NetChunkError::Cancelled);
                    }
                }
                // suppaftp has no atomic rename primitive across all servers;
                // approximate atomicity with upload-to-temp-name then RNFR/RNTO.
                match &mut session {
                    Session::Plain(s) => s
                        .rename(&tmp_name, remote_path)
                        .map_err(|e| Self::ftp_err(server, e))?,
                    Session::Secure(s) => s
                        .rename(&tmp_name, remote_path)
                        .map_err(|e| Self::ftp_err(server, e))?,
                }
                session.quit();
                Ok(())
            })
        })
    }

    fn download(
        &self,
        server: &ServerDescriptor,
        remote_path: &str,
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<Vec<u8>> {
        self.retry.run(|_attempt| {
            self.pool.with_slot(|| {
                let mut session = self.connect(server)?;
                let data = session
                    .retr(remote_path)
                    .map_err(|e| Self::ftp_err(server, e))?;
                if let Some(cb) = progress {
                    if cb(data.len() as u64, data.len() as u64) == ProgressSignal::Cancel {
                        session.quit();
                        return Err(NetChunkError::Cancelled);
                    }
                }
                session.quit();
                Ok(data)
            })
        })
    }

    fn delete(&self, server: &ServerDescriptor, remote_path: &str) -> Result<()> {
        self.retry.run(|_attempt| {
            self.pool.with_slot(|| {
                let mut session = self.connect(server)?;
                let result = session.rm(remote_path).map_err(|e| Self::ftp_err(server, e));
                session.quit();
                result
            })
        })
    }

    fn exists(&self, server: &ServerDescriptor, remote_path: &str) -> Result<bool> {
        match self.size(server, remote_path) {
            Ok(_) => Ok(true),
            Err(NetChunkError::Ftp { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn size(&self, server: &ServerDescriptor, remote_path: &str) -> Result<u64> {
        self.retry.run(|_attempt| {
            self.pool.with_slot(|| {
                let mut session = self.connect(server)?;
                let result = session
                    .size(remote_path)
                    .map(|n| n as u64)
                    .map_err(|e| Self::ftp_err(server, e));
                session.quit();
                result
            })
        })
    }

    fn mkdir(&self, server: &ServerDescriptor, remote_path: &str) -> Result<()> {
        self.retry.run(|_attempt| {
            self.pool.with_slot(|| {
                let mut session = self.connect(server)?;
                let result = session
                    .mkdir(remote_path)
                    .map_err(|e| Self::ftp_err(server, e));
                session.quit();
                // Treat "already exists" permissively; servers differ on the
                // status text for this case.
                match result {
                    Ok(()) => Ok(()),
                    Err(NetChunkError::Ftp { message, .. })
                        if message.to_lowercase().contains("exist") =>
                    {
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            })
        })
    }

    fn list(&self, server: &ServerDescriptor, remote_path: &str) -> Result<Vec<String>> {
        self.retry.run(|_attempt| {
            self.pool.with_slot(|| {
                let mut session = self.connect(server)?;
                let result = session
                    .list(remote_path)
                    .map_err(|e| Self::ftp_err(server, e));
                session.quit();
                result
            })
        })
    }

    fn ping(&self, server: &ServerDescriptor) -> Result<Duration> {
        self.retry.run(|_attempt| {
            self.pool.with_slot(|| {
                let start = Instant::now();
                let session = self.connect(server)?;
                session.quit();
                Ok(start.elapsed())
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ServerDescriptor;

    fn srv(tls: bool) -> ServerDescriptor {
        ServerDescriptor {
            server_id: "s1".into(),
            host: "ftp.example.com".into(),
            port: 21,
            username: "u".into(),
            password: "p".into(),
            base_path: "/".into(),
            tls,
            passive: true,
            priority: 0,
        }
    }

    #[test]
    fn tls_doubles_the_configured_timeout() {
        let transport = FtpTransport::new(4, 30);
        assert_eq!(transport.timeout_for(&srv(false)), Duration::from_secs(30));
        assert_eq!(transport.timeout_for(&srv(true)), Duration::from_secs(60));
    }
}
