//! # page-batch
//!
//! Page-level batch ingestion for document-to-HTML conversion.
//!
//! Converting a document (layout analysis, OCR, table structure) is the
//! expensive step of a run. This crate keeps it to a single pass and spreads
//! the per-page work that follows over a bounded worker pool:
//!
//! - **Conversion**: at most once per normalized request, shared in-process
//!   and persisted as a deterministic JSON snapshot across runs
//! - **Rasters**: page images, region crops and recognition results cached
//!   in bounded LRU tiers keyed by content hash
//! - **Workers**: capability detection decides whether page work may run in
//!   parallel and how wide
//! - **Scheduling**: results always come back in the caller's page order,
//!   with a full sequential rerun when any parallel page fails
//!
//! ## Quick Start
//!
//! ```ignore
//! use page_batch::prelude::*;
//!
//! let cache = ConversionCache::new(my_backend);
//! let output = Pipeline::new(&cache, "out/assets")
//!     .with_snapshot(SnapshotOptions::at("out/doc.json"))
//!     .with_workers(4)
//!     .run("paper.pdf")?;
//!
//! println!("{} pages, {} images", output.content.pages.len(), output.content.images.len());
//! ```
//!
//! ## Building Blocks
//!
//! - [`ingest`]: [`ConversionCache`] and the snapshot codec
//! - [`mod@image`]: [`SharedImageCache`]
//! - [`caps`]: capability detection and worker resolution
//! - [`process`]: [`ContentExtractor`] and [`PageScheduler`]
//! - [`config`]: process-wide defaults
//!
//! A conversion backend is plugged in by implementing
//! [`ConversionBackend`] and [`DocumentHandle`]; recognition engines by
//! implementing [`TextRecognizer`] and [`Captioner`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod caps;
pub mod config;
pub mod error;
pub mod image;
pub mod ingest;
pub mod key;
pub mod options;
pub mod pipeline;
pub mod process;

#[cfg(test)]
pub(crate) mod test_support;

// =============================================================================
// Prelude - import commonly used items with a single `use`
// =============================================================================

/// Prelude module for convenient imports.
///
/// ```ignore
/// use page_batch::prelude::*;
/// ```
pub mod prelude {
    // Pipeline
    pub use crate::{Pipeline, RunOutput};

    // Backends
    pub use crate::{Captioner, ConversionBackend, DocumentHandle, HtmlOptions, OcrLine, TextRecognizer};

    // Options
    pub use crate::{ConversionRequest, OcrMode, PipelineOptions, TableMode, parse_page_spec};

    // Caches
    pub use crate::{CacheLimits, ConversionCache, IngestEvent, SharedImageCache, SnapshotOptions};

    // Processing
    pub use crate::{ContentExtractor, PageScheduler, PageWorker, ParsedContent};

    // Errors
    pub use crate::{BackendError, IngestError, PageError, RunError, ScheduleError};
}

// =============================================================================
// High-Level API
// =============================================================================

pub use crate::pipeline::{Pipeline, RunOutput};

pub use crate::backend::{
    BackendProbe, Captioner, ConversionBackend, DocumentHandle, HtmlOptions, OcrLine, TextRecognizer,
};
pub use crate::options::{
    ConversionRequest, OcrMode, PipelineOptions, TableMode, parse_page_spec, resolve_selected_pages,
};

// =============================================================================
// Components
// =============================================================================

pub use crate::caps::{
    BackendCapabilities, CapabilityProbe, StartMode, log_worker_resolution, resolve_effective_workers,
};
pub use crate::image::{BBox, CacheLimits, CacheMetrics, SharedImageCache, TierMetrics};
pub use crate::ingest::{ConversionCache, IngestEvent, SnapshotOptions};
pub use crate::key::CacheKey;
pub use crate::process::{
    ContentExtractor, ExecutionMode, PageScheduler, PageWorker, ParsedContent, ScheduleOutcome,
};

// =============================================================================
// Infrastructure
// =============================================================================

pub use crate::config::{Config, ConfigBuilder, EnvOverrides};
pub use crate::error::{
    BackendError, IngestError, OptionsError, PageError, RunError, ScheduleError, SnapshotError,
};
