//! Process-wide logger (C11, spec.md §9 "Global logger"). A single
//! `flexi_logger` handle is initialized once at process start and handed
//! off to the `log` facade; callers everywhere else just use `log::info!`
//! etc. rather than threading a handle through every call site.

use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};

use crate::config::GeneralConfig;
use crate::error::{NetChunkError, Result};

/// Rotates at 10 MiB, keeps the 10 most recent rotated files, and fsyncs
/// after every record (spec.md §9: "leveled logging, size-based rotation,
/// fsync after each record").
pub fn init(general: &GeneralConfig) -> Result<LoggerHandle> {
    let spec = FileSpec::default()
        .directory(
            general
                .log_file
                .parent()
                .unwrap_or_else(|| std::path::Path::new("."))
                .to_path_buf(),
        )
        .basename(
            general
                .log_file
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("netchunk")
                .to_string(),
        );

    Logger::try_with_str(&general.log_level)
        .map_err(|e| NetChunkError::ConfigValidation {
            section: "general".into(),
            key: "log_level".into(),
            reason: e.to_string(),
        })?
        .log_to_file(spec)
        .write_mode(WriteMode::Direct)
        .rotate(
            Criterion::Size(10 * 1024 * 1024),
            Naming::Numbers,
            Cleanup::KeepLogFiles(10),
        )
        .start()
        .map_err(|e| NetChunkError::Unknown(format!("failed to start logger: {e}")))
}
