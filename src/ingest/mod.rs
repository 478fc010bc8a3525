//! Document ingestion: convert once, reuse everywhere.
//!
//! [`ConversionCache`] guarantees the conversion backend runs at most once
//! per normalized [`ConversionRequest`](crate::options::ConversionRequest):
//!
//! 1. within the process, through the owned [`ConversionMemo`];
//! 2. across runs, through a deterministic JSON snapshot (see [`snapshot`]).
//!
//! Every call site in one run receives the same `Arc` handle.

mod cache;
mod memo;
pub mod snapshot;

pub use cache::{ConversionCache, IngestEvent, SnapshotOptions};
pub use memo::ConversionMemo;
