//! In-memory image caching shared by recognition sub-steps.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    SharedImageCache                      │
//! │  ┌────────────┐   crop    ┌──────────────┐               │
//! │  │ page tier  │ ────────► │ region tier  │               │
//! │  │ (idx, dpi) │           │ (idx, bbox)  │               │
//! │  └────────────┘           └──────────────┘               │
//! │  ┌────────────┐           ┌──────────────┐               │
//! │  │ ocr tier   │           │ caption tier │  pixel-hashed │
//! │  └────────────┘           └──────────────┘               │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Each tier is an independent LRU; eviction in one never touches another.
//! Only the region tier reads from another tier.

mod bbox;
mod cache;
mod tier;

pub use bbox::BBox;
pub use cache::{
    CacheLimits, CacheMetrics, CachedPageImage, CachedRegionImage, Lookup, SharedImageCache,
    needs_page_rasterization,
};
pub use tier::TierMetrics;
