//! Error types.
//!
//! Only snapshot I/O and deserialization, backend failures, and page-work
//! failures are errors. A cache miss is a normal return value everywhere.

use std::path::PathBuf;

use thiserror::Error;

// =============================================================================
// Backend
// =============================================================================

/// Failure reported by an external backend (conversion, rasterization,
/// text recognition, captioning).
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The backend cannot run at all (missing dependency, model not loaded).
    #[error("backend unavailable: {reason}")]
    Unavailable {
        /// Why the backend is unavailable.
        reason: String,
    },

    /// The backend ran and failed.
    #[error("{stage} failed: {message}")]
    Failed {
        /// Which backend operation failed (e.g. "conversion", "rasterize").
        stage: &'static str,
        /// Message from the backend.
        message: String,
    },
}

impl BackendError {
    /// Create an unavailable error.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Create a failure for the given backend stage.
    pub fn failed(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Failed {
            stage,
            message: message.into(),
        }
    }
}

// =============================================================================
// Snapshot / Ingestion
// =============================================================================

/// Error reading or decoding a persisted conversion snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The snapshot file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The snapshot is not valid JSON or does not match the document shape.
    #[error("invalid snapshot: {0}")]
    Parse(#[from] serde_json::Error),

    /// The snapshot was written with an unsupported schema version.
    #[error("unsupported snapshot schema version {found} (expected {expected})")]
    Schema {
        /// Version found in the file.
        found: u64,
        /// Version this crate writes.
        expected: u64,
    },
}

/// Error from [`ConversionCache::acquire`](crate::ingest::ConversionCache::acquire).
///
/// The variant names the stage that failed so callers can report whether a
/// fresh conversion or a cache load went wrong.
#[derive(Debug, Error)]
pub enum IngestError {
    /// A snapshot exists but could not be loaded, and fallback was not allowed.
    #[error("failed to load conversion cache {}: {source}", path.display())]
    CacheLoad {
        /// Snapshot location.
        path: PathBuf,
        /// Underlying decode error.
        source: SnapshotError,
    },

    /// The conversion backend failed. No document handle is produced.
    #[error("conversion of {input} failed: {source}")]
    Conversion {
        /// Input identity.
        input: String,
        /// Backend error.
        source: BackendError,
    },

    /// The converted document could not be persisted.
    #[error("failed to write conversion cache {}: {source}", path.display())]
    CacheWrite {
        /// Snapshot location.
        path: PathBuf,
        /// Underlying I/O or encode error.
        source: SnapshotError,
    },
}

impl IngestError {
    /// Stage label used in user-facing reports.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::CacheLoad { .. } => "cache load",
            Self::Conversion { .. } => "conversion",
            Self::CacheWrite { .. } => "cache write",
        }
    }
}

// =============================================================================
// Page work / Scheduling
// =============================================================================

/// Failure of a single unit of page work.
#[derive(Debug, Error)]
pub enum PageError {
    /// A backend call made while processing the page failed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Writing extracted assets failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding an image asset failed.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// The unit panicked.
    #[error("worker panicked: {0}")]
    Panicked(String),
}

/// Error from [`PageScheduler::process_pages`](crate::process::PageScheduler::process_pages).
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// A page failed during sequential execution.
    #[error("page {page_no} failed: {source}")]
    Page {
        /// 1-based page number.
        page_no: u32,
        /// Underlying failure.
        source: PageError,
    },

    /// The sequential rerun after a parallel failure also failed.
    #[error(
        "sequential fallback failed on page {page_no} (parallel run first failed on page {first_failed_page}): {source}"
    )]
    FallbackFailed {
        /// Page that first failed in parallel mode.
        first_failed_page: u32,
        /// Page that failed during the sequential rerun.
        page_no: u32,
        /// Underlying failure.
        source: PageError,
    },
}

impl ScheduleError {
    /// Page number the failure is attributed to.
    ///
    /// For a failed fallback this is the page that first failed in parallel
    /// mode, which is the useful one for diagnostics.
    pub fn page_no(&self) -> u32 {
        match self {
            Self::Page { page_no, .. } => *page_no,
            Self::FallbackFailed {
                first_failed_page, ..
            } => *first_failed_page,
        }
    }
}

// =============================================================================
// Options / Pipeline
// =============================================================================

/// Invalid option value or page selection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionsError {
    /// Unknown value for an enumerated option.
    #[error("invalid {option} '{value}'. Valid values: {valid}")]
    InvalidValue {
        /// Option name.
        option: &'static str,
        /// Value supplied.
        value: String,
        /// Comma-separated accepted values.
        valid: String,
    },

    /// Malformed page specification.
    #[error("invalid page spec '{spec}': {reason}")]
    PageSpec {
        /// The offending token or spec.
        spec: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A selected page is beyond the document.
    #[error("Requested page {page} exceeds document length {total}")]
    PageOutOfRange {
        /// Highest offending page.
        page: u32,
        /// Document page count.
        total: usize,
    },
}

/// Error from an end-to-end [`Pipeline`](crate::pipeline::Pipeline) run.
#[derive(Debug, Error)]
pub enum RunError {
    /// Acquiring the document failed.
    #[error(transparent)]
    Ingest(#[from] IngestError),

    /// Page selection was invalid for the document.
    #[error(transparent)]
    Options(#[from] OptionsError),

    /// Page processing failed.
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}
