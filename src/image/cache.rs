//! Shared multi-tier image cache.

use std::sync::Arc;

use image::DynamicImage;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::bbox::BBox;
use super::tier::{LruTier, TierMetrics};
use crate::backend::{DocumentHandle, OcrLine};
use crate::config;
use crate::error::BackendError;
use crate::key::CacheKey;
use crate::options::{OcrMode, PipelineOptions, TableMode};

// =============================================================================
// Entries
// =============================================================================

/// A rasterized page. Identity is `(page_index, dpi)`.
#[derive(Debug, Clone)]
pub struct CachedPageImage {
    /// 0-based page index.
    pub page_index: usize,
    /// Rasterization resolution.
    pub dpi: u32,
    /// Pixel content hash.
    pub content_hash: CacheKey,
    /// The raster, shared by every hit.
    pub image: Arc<DynamicImage>,
}

/// A region cropped from a cached page raster.
#[derive(Debug, Clone)]
pub struct CachedRegionImage {
    /// 0-based page index of the source page.
    pub page_index: usize,
    /// Normalized crop box.
    pub bbox: BBox,
    /// Pixel content hash of the crop.
    pub content_hash: CacheKey,
    /// The crop, shared by every hit.
    pub image: Arc<DynamicImage>,
}

/// Result of a recognition-tier lookup.
///
/// `Cached(None)` records that the backend ran and produced nothing, which
/// must not be confused with never having asked.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<V> {
    /// No result recorded for this image.
    Unattempted,
    /// A recorded result, possibly empty.
    Cached(Option<V>),
}

impl<V> Lookup<V> {
    /// Whether a result (possibly empty) is recorded.
    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Cached(_))
    }
}

// =============================================================================
// Limits & Metrics
// =============================================================================

/// Per-tier maximum entry counts. Zero disables a tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheLimits {
    /// Page rasters.
    pub page_raster_capacity: usize,
    /// Region crops.
    pub region_capacity: usize,
    /// Text-recognition results.
    pub ocr_capacity: usize,
    /// Caption results.
    pub caption_capacity: usize,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            page_raster_capacity: 32,
            region_capacity: 256,
            ocr_capacity: 1024,
            caption_capacity: 1024,
        }
    }
}

/// Consistent snapshot of every tier's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheMetrics {
    /// Page-raster tier. `backend_calls` counts rasterizations.
    pub page: TierMetrics,
    /// Region tier. `backend_calls` counts crops.
    pub region: TierMetrics,
    /// Text-recognition tier. `backend_calls` counts recognizer runs.
    pub ocr: TierMetrics,
    /// Caption tier. `backend_calls` counts captioner runs.
    pub caption: TierMetrics,
}

// =============================================================================
// SharedImageCache
// =============================================================================

type PageKey = (usize, u32);
type RegionKey = (usize, [u32; 4]);

struct CacheState {
    pages: LruTier<PageKey, CachedPageImage>,
    regions: LruTier<RegionKey, CachedRegionImage>,
    ocr: LruTier<CacheKey, Option<Vec<OcrLine>>>,
    captions: LruTier<CacheKey, Option<String>>,
}

/// Bounded in-memory cache of page rasters, region crops and recognition
/// results for one run.
///
/// ```text
///   get_page ──► pages ◄── get_region ──► regions
///                                │
///                           crop_imm
///
///   get_ocr / set_ocr ──► ocr        (keyed by pixel hash)
///   get_caption / ...  ──► captions
/// ```
///
/// All tiers sit behind one lock so [`get_metrics`](Self::get_metrics) and
/// [`clear`](Self::clear) see every tier at the same instant. Misses are
/// populated while the lock is held, so no caller ever sees a partially
/// built entry.
pub struct SharedImageCache {
    state: Mutex<CacheState>,
    default_dpi: u32,
}

impl SharedImageCache {
    /// Cache with the given limits, cropping regions at the configured
    /// default DPI.
    pub fn new(limits: CacheLimits) -> Self {
        Self::with_dpi(limits, config::get().default_dpi)
    }

    /// Cache cropping regions from rasters at `default_dpi`.
    pub fn with_dpi(limits: CacheLimits, default_dpi: u32) -> Self {
        Self {
            state: Mutex::new(CacheState {
                pages: LruTier::new(limits.page_raster_capacity),
                regions: LruTier::new(limits.region_capacity),
                ocr: LruTier::new(limits.ocr_capacity),
                captions: LruTier::new(limits.caption_capacity),
            }),
            default_dpi,
        }
    }

    /// Cache for a run with these options, or `None` when no enabled
    /// feature rasterizes pages.
    pub fn for_pipeline(options: &PipelineOptions) -> Option<Self> {
        needs_page_rasterization(options).then(|| Self::new(config::get().cache_limits.clone()))
    }

    /// DPI used for region crops.
    pub fn default_dpi(&self) -> u32 {
        self.default_dpi
    }

    /// Page raster at `dpi`, rasterizing only on a miss.
    pub fn get_page<D>(&self, doc: &D, page_index: usize, dpi: u32) -> Result<CachedPageImage, BackendError>
    where
        D: DocumentHandle + ?Sized,
    {
        let mut state = self.state.lock();
        page_entry(&mut state, doc, page_index, dpi)
    }

    /// Region of a page, cropped from the page raster at the default DPI.
    ///
    /// A region miss reuses a cached page raster when one exists; the page
    /// lookup is counted in the page tier either way.
    pub fn get_region<D>(&self, doc: &D, page_index: usize, bbox: BBox) -> Result<CachedRegionImage, BackendError>
    where
        D: DocumentHandle + ?Sized,
    {
        let bbox = bbox.normalized();
        let key = (page_index, bbox.key());

        let mut state = self.state.lock();
        if let Some(hit) = state.regions.get(&key) {
            return Ok(hit);
        }

        let page = page_entry(&mut state, doc, page_index, self.default_dpi)?;
        let (x, y, w, h) = bbox.pixel_rect(page.image.width(), page.image.height());
        let crop = page.image.crop_imm(x, y, w, h);
        state.regions.record_backend_call();

        let entry = CachedRegionImage {
            page_index,
            bbox,
            content_hash: CacheKey::of_image(&crop),
            image: Arc::new(crop),
        };
        state.regions.insert(key, entry.clone());
        Ok(entry)
    }

    // -------------------------------------------------------------------------
    // Recognition tiers
    // -------------------------------------------------------------------------

    /// Recorded recognition result for an image.
    pub fn get_ocr(&self, image: &DynamicImage) -> Lookup<Vec<OcrLine>> {
        lookup(&mut self.state.lock().ocr, &CacheKey::of_image(image))
    }

    /// Record a recognition result (possibly empty) for an image.
    pub fn set_ocr(&self, image: &DynamicImage, lines: Option<Vec<OcrLine>>) {
        self.state.lock().ocr.insert(CacheKey::of_image(image), lines);
    }

    /// Recorded result, or run `recognize` once and record what it returns.
    ///
    /// A failing recognizer records nothing, so a later call may retry.
    pub fn ocr_or_else<F>(&self, image: &DynamicImage, recognize: F) -> Result<Option<Vec<OcrLine>>, BackendError>
    where
        F: FnOnce(&DynamicImage) -> Result<Option<Vec<OcrLine>>, BackendError>,
    {
        let key = CacheKey::of_image(image);
        if let Lookup::Cached(hit) = lookup(&mut self.state.lock().ocr, &key) {
            return Ok(hit);
        }
        let result = recognize(image)?;
        let mut state = self.state.lock();
        state.ocr.record_backend_call();
        state.ocr.insert(key, result.clone());
        Ok(result)
    }

    /// Recorded caption for an image.
    pub fn get_caption(&self, image: &DynamicImage) -> Lookup<String> {
        lookup(&mut self.state.lock().captions, &CacheKey::of_image(image))
    }

    /// Record a caption (possibly empty) for an image.
    pub fn set_caption(&self, image: &DynamicImage, caption: Option<String>) {
        self.state.lock().captions.insert(CacheKey::of_image(image), caption);
    }

    /// Recorded caption, or run `caption` once and record what it returns.
    pub fn caption_or_else<F>(&self, image: &DynamicImage, caption: F) -> Result<Option<String>, BackendError>
    where
        F: FnOnce(&DynamicImage) -> Result<Option<String>, BackendError>,
    {
        let key = CacheKey::of_image(image);
        if let Lookup::Cached(hit) = lookup(&mut self.state.lock().captions, &key) {
            return Ok(hit);
        }
        let result = caption(image)?;
        let mut state = self.state.lock();
        state.captions.record_backend_call();
        state.captions.insert(key, result.clone());
        Ok(result)
    }

    // -------------------------------------------------------------------------
    // Bookkeeping
    // -------------------------------------------------------------------------

    /// Snapshot of all counters and sizes.
    pub fn get_metrics(&self) -> CacheMetrics {
        let state = self.state.lock();
        CacheMetrics {
            page: state.pages.metrics(),
            region: state.regions.metrics(),
            ocr: state.ocr.metrics(),
            caption: state.captions.metrics(),
        }
    }

    /// Drop every entry and reset every counter.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.pages.clear();
        state.regions.clear();
        state.ocr.clear();
        state.captions.clear();
    }

    /// Emit the current metrics at debug level.
    pub fn log_metrics(&self) {
        let m = self.get_metrics();
        tracing::debug!(
            page_hits = m.page.hits,
            page_misses = m.page.misses,
            rasterize_calls = m.page.backend_calls,
            region_hits = m.region.hits,
            region_misses = m.region.misses,
            ocr_hits = m.ocr.hits,
            ocr_calls = m.ocr.backend_calls,
            caption_hits = m.caption.hits,
            caption_calls = m.caption.backend_calls,
            "image cache metrics"
        );
    }
}

fn page_entry<D>(state: &mut CacheState, doc: &D, page_index: usize, dpi: u32) -> Result<CachedPageImage, BackendError>
where
    D: DocumentHandle + ?Sized,
{
    let key = (page_index, dpi);
    if let Some(hit) = state.pages.get(&key) {
        return Ok(hit);
    }

    let raster = doc.render_page_raster(page_index, dpi)?;
    state.pages.record_backend_call();

    let entry = CachedPageImage {
        page_index,
        dpi,
        content_hash: CacheKey::of_image(&raster),
        image: Arc::new(raster),
    };
    state.pages.insert(key, entry.clone());
    Ok(entry)
}

fn lookup<V: Clone>(tier: &mut LruTier<CacheKey, Option<V>>, key: &CacheKey) -> Lookup<V> {
    match tier.get(key) {
        Some(value) => Lookup::Cached(value),
        None => Lookup::Unattempted,
    }
}

/// Whether any enabled feature needs page rasters.
pub fn needs_page_rasterization(options: &PipelineOptions) -> bool {
    options.tables_mode != TableMode::Off || options.ocr_mode != OcrMode::Off || options.picture_descriptions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::GradientDocument;

    fn small_cache() -> SharedImageCache {
        SharedImageCache::with_dpi(
            CacheLimits {
                page_raster_capacity: 5,
                region_capacity: 10,
                ocr_capacity: 20,
                caption_capacity: 20,
            },
            150,
        )
    }

    #[test]
    fn test_page_hit_returns_same_image() {
        let doc = GradientDocument::new(3);
        let cache = small_cache();

        let a = cache.get_page(&doc, 0, 150).unwrap();
        let b = cache.get_page(&doc, 0, 150).unwrap();
        assert!(Arc::ptr_eq(&a.image, &b.image));
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(doc.raster_calls(), 1);

        let m = cache.get_metrics();
        assert_eq!((m.page.hits, m.page.misses, m.page.backend_calls), (1, 1, 1));
    }

    #[test]
    fn test_distinct_dpi_are_distinct_entries() {
        let doc = GradientDocument::new(1);
        let cache = small_cache();

        let low = cache.get_page(&doc, 0, 150).unwrap();
        let high = cache.get_page(&doc, 0, 300).unwrap();
        assert!(!Arc::ptr_eq(&low.image, &high.image));
        assert_ne!(low.content_hash, high.content_hash);
        assert_eq!(high.image.width(), low.image.width() * 2);

        let m = cache.get_metrics();
        assert_eq!((m.page.hits, m.page.misses, m.page.backend_calls), (0, 2, 2));
    }

    #[test]
    fn test_region_reuses_page_raster() {
        let doc = GradientDocument::new(1);
        let cache = small_cache();

        let r1 = cache.get_region(&doc, 0, BBox::new(100.0, 100.0, 300.0, 300.0)).unwrap();
        let r2 = cache.get_region(&doc, 0, BBox::new(100.0, 100.0, 300.0, 300.0)).unwrap();
        assert!(Arc::ptr_eq(&r1.image, &r2.image));

        let r3 = cache.get_region(&doc, 0, BBox::new(200.0, 200.0, 400.0, 400.0)).unwrap();
        assert_ne!(r3.content_hash, r1.content_hash);

        let m = cache.get_metrics();
        assert_eq!(m.page.hits, 1);
        assert_eq!(m.page.misses, 1);
        assert_eq!(m.page.backend_calls, 1);
        assert_eq!(m.region.hits, 1);
        assert_eq!(m.region.misses, 2);
        assert_eq!(doc.raster_calls(), 1);
    }

    #[test]
    fn test_swapped_bbox_hits_same_entry() {
        let doc = GradientDocument::new(1);
        let cache = small_cache();

        let a = cache.get_region(&doc, 0, BBox::new(100.0, 100.0, 300.0, 300.0)).unwrap();
        let b = cache.get_region(&doc, 0, BBox::new(300.0, 300.0, 100.0, 100.0)).unwrap();
        assert!(Arc::ptr_eq(&a.image, &b.image));
        assert_eq!(a.image.width(), 200);

        let m = cache.get_metrics();
        assert_eq!((m.region.hits, m.region.misses), (1, 1));
    }

    #[test]
    fn test_signed_zero_corner_hits_same_region() {
        let doc = GradientDocument::new(1);
        let cache = small_cache();

        cache.get_region(&doc, 0, BBox::new(0.0, 0.0, 10.0, 10.0)).unwrap();
        cache.get_region(&doc, 0, BBox::new(10.0, 10.0, -0.0, -0.0)).unwrap();

        let m = cache.get_metrics().region;
        assert_eq!((m.hits, m.misses, m.size), (1, 1, 1));
    }

    #[test]
    fn test_page_lru_eviction_order() {
        let doc = GradientDocument::new(3);
        let cache = SharedImageCache::with_dpi(
            CacheLimits {
                page_raster_capacity: 2,
                ..CacheLimits::default()
            },
            150,
        );

        cache.get_page(&doc, 0, 150).unwrap();
        cache.get_page(&doc, 1, 150).unwrap();
        cache.get_page(&doc, 0, 150).unwrap();
        cache.get_page(&doc, 2, 150).unwrap();
        assert_eq!(cache.get_metrics().page.evictions, 1);

        let before = cache.get_metrics().page;
        cache.get_page(&doc, 0, 150).unwrap();
        let after = cache.get_metrics().page;
        assert_eq!(after.hits, before.hits + 1);

        cache.get_page(&doc, 1, 150).unwrap();
        let last = cache.get_metrics().page;
        assert_eq!(last.misses, after.misses + 1);
        assert_eq!(last.size, 2);
    }

    #[test]
    fn test_metrics_accounting() {
        let doc = GradientDocument::new(1);
        let cache = small_cache();
        let bbox = BBox::new(10.0, 10.0, 50.0, 50.0);

        cache.get_page(&doc, 0, 150).unwrap(); // page miss
        cache.get_page(&doc, 0, 150).unwrap(); // page hit
        cache.get_region(&doc, 0, bbox).unwrap(); // region miss, page hit
        cache.get_region(&doc, 0, bbox).unwrap(); // region hit

        let m = cache.get_metrics();
        assert_eq!(m.page.hits, 2);
        assert_eq!(m.page.misses, 1);
        assert_eq!(m.region.hits, 1);
        assert_eq!(m.region.misses, 1);
        assert!((m.page.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
        assert!((m.region.hit_rate() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_cached_none_is_not_unattempted() {
        let doc = GradientDocument::new(1);
        let cache = small_cache();
        let page = cache.get_page(&doc, 0, 150).unwrap();

        assert_eq!(cache.get_ocr(&page.image), Lookup::Unattempted);
        cache.set_ocr(&page.image, None);
        assert_eq!(cache.get_ocr(&page.image), Lookup::Cached(None));

        let mut runs = 0;
        for _ in 0..3 {
            let out = cache
                .caption_or_else(&page.image, |_| {
                    runs += 1;
                    Ok(None)
                })
                .unwrap();
            assert_eq!(out, None);
        }
        assert_eq!(runs, 1);
        assert_eq!(cache.get_metrics().caption.backend_calls, 1);
    }

    #[test]
    fn test_ocr_failure_is_not_recorded() {
        let doc = GradientDocument::new(1);
        let cache = small_cache();
        let page = cache.get_page(&doc, 0, 150).unwrap();

        let err = cache.ocr_or_else(&page.image, |_| Err(BackendError::failed("ocr", "engine crashed")));
        assert!(err.is_err());
        assert!(!cache.get_ocr(&page.image).is_cached());

        let lines = cache
            .ocr_or_else(&page.image, |_| Ok(Some(vec![OcrLine::new("hello")])))
            .unwrap();
        assert_eq!(lines.map(|l| l.len()), Some(1));
    }

    #[test]
    fn test_zero_capacity_tier_always_misses() {
        let doc = GradientDocument::new(1);
        let cache = SharedImageCache::with_dpi(
            CacheLimits {
                page_raster_capacity: 0,
                ..CacheLimits::default()
            },
            150,
        );
        cache.get_page(&doc, 0, 150).unwrap();
        cache.get_page(&doc, 0, 150).unwrap();

        let m = cache.get_metrics().page;
        assert_eq!((m.hits, m.misses, m.backend_calls, m.size), (0, 2, 2, 0));
    }

    #[test]
    fn test_clear_resets_everything() {
        let doc = GradientDocument::new(2);
        let cache = small_cache();
        cache.get_page(&doc, 0, 150).unwrap();
        cache.get_region(&doc, 1, BBox::new(0.0, 0.0, 10.0, 10.0)).unwrap();
        cache.clear();

        let m = cache.get_metrics();
        assert_eq!(m.page.size + m.region.size, 0);
        assert_eq!(m.page.misses + m.page.hits + m.region.misses, 0);
    }

    #[test]
    fn test_feature_gate() {
        let off = PipelineOptions::default().with_tables(TableMode::Off);
        assert!(!needs_page_rasterization(&off));
        assert!(SharedImageCache::for_pipeline(&off).is_none());

        assert!(needs_page_rasterization(&off.clone().with_ocr(OcrMode::Auto)));
        assert!(needs_page_rasterization(&off.clone().with_picture_descriptions(true)));
        for mode in [TableMode::Structured, TableMode::Auto, TableMode::ImageOnly] {
            assert!(needs_page_rasterization(&PipelineOptions::default().with_tables(mode)));
        }
    }
}
