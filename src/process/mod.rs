//! Page-level processing.
//!
//! - [`PageProcessingContext`] - Self-contained description of one page of work
//! - [`ContentExtractor`] - Turns one page of a converted document into content
//! - [`PageScheduler`] - Runs page work sequentially or on a pool, in caller order
//!
//! ```text
//! selected pages ──► contexts ──► PageScheduler ──► PageWorker::process_page
//!   [3, 1, 2]                          │                    (ContentExtractor)
//!                                      ▼
//!                       results placed by list index ──► ParsedContent
//! ```

mod context;
mod extract;
mod schedule;

pub use context::{
    HtmlPage, ImageAsset, LinkKind, LinkRef, PageProcessingContext, PageProcessingResult, ParsedContent,
    TableContent, TableKind,
};
pub use extract::{ContentExtractor, compute_text_coverage, needs_ocr};
pub use schedule::{
    ExecutionMode, PageScheduler, PageWorker, ParallelFailure, ScheduleOutcome, SequentialReason,
};
