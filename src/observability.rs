//! Import outcome observers.
//!
//! The [`crate::pipeline::Importer`] reports each import attempt to an optional
//! [`ImportObserver`]: `on_success` with layer/chunk stats, `on_failure` with a computed
//! [`ImportSeverity`], and `on_alert` when that severity reaches the configured threshold.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::detect::HandlerKind;
use crate::error::ImportError;

/// Severity classification used for observer callbacks and alerting thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportSeverity {
    /// Informational event.
    Info,
    /// Expected rejection the caller can act on (limits, sizes).
    Warning,
    /// The import failed.
    Error,
    /// Infrastructure failure (I/O, worker pool).
    Critical,
}

impl ImportSeverity {
    /// Severity of an import failure.
    pub fn for_error(e: &ImportError) -> Self {
        match e {
            ImportError::Io(_) | ImportError::TaskQueue { .. } => Self::Critical,
            ImportError::ParallelismLimitExceeded { .. } | ImportError::UploadTooLarge { .. } => {
                Self::Warning
            }
            ImportError::UnsupportedFormat { .. }
            | ImportError::InvalidFile { .. }
            | ImportError::UnreadableLegacyFile { .. }
            | ImportError::SchemaDispatchPartialFailure { .. }
            | ImportError::Config { .. }
            | ImportError::Spreadsheet(_)
            | ImportError::Json(_) => Self::Error,
        }
    }
}

/// Context about an import attempt.
#[derive(Debug, Clone)]
pub struct ImportContext {
    pub filename: String,
    pub user: String,
    /// `None` when detection itself failed.
    pub handler: Option<HandlerKind>,
    pub execution_id: String,
}

/// Stats reported on a successful import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportStats {
    pub layers: usize,
    pub chunks: usize,
}

/// Observer interface for import outcomes.
pub trait ImportObserver: Send + Sync {
    fn on_success(&self, _ctx: &ImportContext, _stats: ImportStats) {}

    fn on_failure(&self, _ctx: &ImportContext, _severity: ImportSeverity, _error: &ImportError) {}

    /// Default behavior forwards to [`Self::on_failure`].
    fn on_alert(&self, ctx: &ImportContext, severity: ImportSeverity, error: &ImportError) {
        self.on_failure(ctx, severity, error)
    }
}

/// Fans out callbacks to a list of observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn ImportObserver>>,
}

impl CompositeObserver {
    pub fn new(observers: Vec<Arc<dyn ImportObserver>>) -> Self {
        Self { observers }
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers_len", &self.observers.len())
            .finish()
    }
}

impl ImportObserver for CompositeObserver {
    fn on_success(&self, ctx: &ImportContext, stats: ImportStats) {
        for o in &self.observers {
            o.on_success(ctx, stats);
        }
    }

    fn on_failure(&self, ctx: &ImportContext, severity: ImportSeverity, error: &ImportError) {
        for o in &self.observers {
            o.on_failure(ctx, severity, error);
        }
    }

    fn on_alert(&self, ctx: &ImportContext, severity: ImportSeverity, error: &ImportError) {
        for o in &self.observers {
            o.on_alert(ctx, severity, error);
        }
    }
}

/// Emits import outcomes as `tracing` events.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl ImportObserver for TracingObserver {
    fn on_success(&self, ctx: &ImportContext, stats: ImportStats) {
        tracing::info!(
            filename = %ctx.filename,
            user = %ctx.user,
            handler = ?ctx.handler,
            execution = %ctx.execution_id,
            layers = stats.layers,
            chunks = stats.chunks,
            "import finished"
        );
    }

    fn on_failure(&self, ctx: &ImportContext, severity: ImportSeverity, error: &ImportError) {
        tracing::warn!(
            filename = %ctx.filename,
            user = %ctx.user,
            handler = ?ctx.handler,
            execution = %ctx.execution_id,
            ?severity,
            kind = %error.kind(),
            "import failed: {error}"
        );
    }

    fn on_alert(&self, ctx: &ImportContext, severity: ImportSeverity, error: &ImportError) {
        tracing::error!(
            filename = %ctx.filename,
            user = %ctx.user,
            handler = ?ctx.handler,
            execution = %ctx.execution_id,
            ?severity,
            kind = %error.kind(),
            "import alert: {error}"
        );
    }
}

/// Appends import outcomes to a local log file.
#[derive(Debug)]
pub struct FileObserver {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileObserver {
    /// Writes are best-effort; failures to open/write the log file are ignored.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn append_line(&self, line: &str) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(f, "{line}");
        }
    }
}

impl ImportObserver for FileObserver {
    fn on_success(&self, ctx: &ImportContext, stats: ImportStats) {
        self.append_line(&format!(
            "{} ok file={} user={} execution={} layers={} chunks={}",
            unix_ts(),
            ctx.filename,
            ctx.user,
            ctx.execution_id,
            stats.layers,
            stats.chunks
        ));
    }

    fn on_failure(&self, ctx: &ImportContext, severity: ImportSeverity, error: &ImportError) {
        self.append_line(&format!(
            "{} fail severity={:?} kind={} file={} user={} err={}",
            unix_ts(),
            severity,
            error.kind(),
            ctx.filename,
            ctx.user,
            error
        ));
    }

    fn on_alert(&self, ctx: &ImportContext, severity: ImportSeverity, error: &ImportError) {
        self.append_line(&format!(
            "{} ALERT severity={:?} kind={} file={} user={} err={}",
            unix_ts(),
            severity,
            error.kind(),
            ctx.filename,
            ctx.user,
            error
        ));
    }
}

fn unix_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LimitReason;

    fn ctx() -> ImportContext {
        ImportContext {
            filename: "a.xlsx".to_string(),
            user: "alice".to_string(),
            handler: Some(HandlerKind::Spreadsheet),
            execution_id: "exec-1".to_string(),
        }
    }

    #[test]
    fn severity_ordering_drives_alert_thresholds() {
        assert!(ImportSeverity::Critical > ImportSeverity::Error);
        let limit = ImportError::ParallelismLimitExceeded {
            reason: LimitReason::LayerCountExceedsMax,
            layer_count: 5,
            active: 0,
            max: 5,
        };
        assert_eq!(ImportSeverity::for_error(&limit), ImportSeverity::Warning);
        let io = ImportError::Io(std::io::Error::other("disk"));
        assert_eq!(ImportSeverity::for_error(&io), ImportSeverity::Critical);
    }

    #[test]
    fn file_observer_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("import.log");
        let obs = FileObserver::new(&log);
        obs.on_success(&ctx(), ImportStats { layers: 2, chunks: 3 });
        obs.on_failure(
            &ctx(),
            ImportSeverity::Error,
            &ImportError::invalid_file("no layers"),
        );

        let text = std::fs::read_to_string(&log).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("layers=2 chunks=3"));
        assert!(lines[1].contains("kind=invalid_file"));
    }
}
