use std::fmt;

use thiserror::Error;

/// Convenience result type for import operations.
pub type ImportResult<T> = Result<T, ImportError>;

/// Why the upload limit guard refused an admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitReason {
    /// The file alone fans out into at least `max` layers.
    LayerCountExceedsMax,
    /// The file's layers plus the user's active uploads would reach `max`.
    WouldExceedParallelism,
}

/// A schema chunk that failed after it was submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFailure {
    /// Zero-based chunk index within the layer.
    pub chunk_index: usize,
    /// Task id the chunk was submitted under.
    pub task_id: String,
    /// Failure detail reported by the worker.
    pub message: String,
}

/// Error type returned by the import pipeline.
///
/// This is a single error enum shared by detection, validation, normalization and dispatch.
#[derive(Debug, Error)]
pub enum ImportError {
    /// No handler matches the upload.
    #[error("unsupported format: {message}")]
    UnsupportedFormat { message: String },

    /// The driver cannot open the file, or the file contains no layers.
    #[error("invalid file: {message}")]
    InvalidFile { message: String },

    /// The upload would exceed the parallel upload budget.
    #[error("{}", parallelism_detail(*reason, *layer_count, *active, *max))]
    ParallelismLimitExceeded {
        reason: LimitReason,
        layer_count: usize,
        active: usize,
        max: usize,
    },

    /// Conversion of a legacy binary spreadsheet failed.
    #[error("unreadable legacy file: {message}")]
    UnreadableLegacyFile { message: String },

    /// One or more schema chunks failed after submission.
    #[error("schema dispatch for layer '{layer}' failed for {} chunk(s): {}", failed.len(), describe_failures(failed))]
    SchemaDispatchPartialFailure {
        layer: String,
        failed: Vec<ChunkFailure>,
    },

    /// The upload is larger than the configured maximum.
    #[error("upload of {size} bytes exceeds the maximum of {max} bytes")]
    UploadTooLarge { size: u64, max: u64 },

    /// The task queue could not be built or refused work.
    #[error("task queue error: {message}")]
    TaskQueue { message: String },

    /// Invalid import options.
    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// Underlying I/O error (e.g. file not found, permission denied).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Spreadsheet reader error.
    #[error("spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),

    /// JSON error (GeoJSON sources, option documents).
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Machine-readable classification of an [`ImportError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportErrorKind {
    UnsupportedFormat,
    InvalidFile,
    ParallelismLimitExceeded,
    UnreadableLegacyFile,
    SchemaDispatchPartialFailure,
    UploadTooLarge,
    TaskQueue,
    Config,
    Io,
}

impl ImportErrorKind {
    /// Stable snake_case code for API responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnsupportedFormat => "unsupported_format",
            Self::InvalidFile => "invalid_file",
            Self::ParallelismLimitExceeded => "parallelism_limit_exceeded",
            Self::UnreadableLegacyFile => "unreadable_legacy_file",
            Self::SchemaDispatchPartialFailure => "schema_dispatch_partial_failure",
            Self::UploadTooLarge => "upload_too_large",
            Self::TaskQueue => "task_queue",
            Self::Config => "invalid_configuration",
            Self::Io => "io",
        }
    }
}

impl fmt::Display for ImportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ImportError {
    /// Machine-readable kind of this error.
    ///
    /// Spreadsheet and JSON parse failures surface as [`ImportErrorKind::InvalidFile`].
    pub fn kind(&self) -> ImportErrorKind {
        match self {
            Self::UnsupportedFormat { .. } => ImportErrorKind::UnsupportedFormat,
            Self::InvalidFile { .. } | Self::Spreadsheet(_) | Self::Json(_) => {
                ImportErrorKind::InvalidFile
            }
            Self::ParallelismLimitExceeded { .. } => ImportErrorKind::ParallelismLimitExceeded,
            Self::UnreadableLegacyFile { .. } => ImportErrorKind::UnreadableLegacyFile,
            Self::SchemaDispatchPartialFailure { .. } => {
                ImportErrorKind::SchemaDispatchPartialFailure
            }
            Self::UploadTooLarge { .. } => ImportErrorKind::UploadTooLarge,
            Self::TaskQueue { .. } => ImportErrorKind::TaskQueue,
            Self::Config { .. } => ImportErrorKind::Config,
            Self::Io(_) => ImportErrorKind::Io,
        }
    }

    /// Whether the caller may reasonably retry the same upload later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ParallelismLimitExceeded { .. } | Self::TaskQueue { .. }
        )
    }

    pub(crate) fn invalid_file(message: impl Into<String>) -> Self {
        Self::InvalidFile {
            message: message.into(),
        }
    }
}

fn parallelism_detail(reason: LimitReason, layer_count: usize, active: usize, max: usize) -> String {
    match reason {
        LimitReason::LayerCountExceedsMax => format!(
            "the number of layers in the file ({layer_count}) is greater than or equal to the max parallel uploads permitted ({max}); please upload a smaller file"
        ),
        LimitReason::WouldExceedParallelism => format!(
            "with {layer_count} new layer(s) and {active} active upload(s) the limit of {max} parallel uploads would be exceeded"
        ),
    }
}

fn describe_failures(failed: &[ChunkFailure]) -> String {
    failed
        .iter()
        .map(|f| format!("#{} ({}): {}", f.chunk_index, f.task_id, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}
