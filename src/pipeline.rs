//! One whole conversion run, wired end to end.
//!
//! # Example
//!
//! ```ignore
//! use page_batch::prelude::*;
//!
//! let cache = ConversionCache::new(my_backend);
//! let output = Pipeline::new(&cache, "out/assets")
//!     .with_options(PipelineOptions::from_cli("auto", "auto", "off", None, 0.05)?)
//!     .with_snapshot(SnapshotOptions::at("out/doc.json").with_fallback(true))
//!     .with_pages(Some(parse_page_spec("1,3,5-7")?))
//!     .with_workers(4)
//!     .run("paper.pdf")?;
//!
//! for page in &output.content.pages {
//!     println!("{}: {} bytes", page.page_no, page.html.len());
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::{Captioner, ConversionBackend, DocumentHandle, HtmlOptions, TextRecognizer};
use crate::caps::{self, BackendCapabilities, CapabilityProbe};
use crate::error::RunError;
use crate::image::{CacheMetrics, SharedImageCache};
use crate::ingest::{ConversionCache, IngestEvent, SnapshotOptions};
use crate::options::{self, ConversionRequest, OcrMode, PipelineOptions};
use crate::process::{ContentExtractor, ExecutionMode, PageScheduler, ParallelFailure, ParsedContent};

/// Everything a finished run produced.
#[derive(Debug)]
pub struct RunOutput<D> {
    /// The shared document handle.
    pub document: Arc<D>,
    /// 1-based pages processed, in output order.
    pub selected_pages: Vec<u32>,
    /// Assembled page content.
    pub content: ParsedContent,
    /// Detected backend capabilities.
    pub capabilities: BackendCapabilities,
    /// Worker count actually used.
    pub effective_workers: usize,
    /// Clamps applied to the requested worker count.
    pub worker_reasons: Vec<String>,
    /// How pages were executed.
    pub mode: ExecutionMode,
    /// First failure of a discarded parallel attempt, if any.
    pub fallback: Option<ParallelFailure>,
    /// Image-cache counters, when the cache was enabled.
    pub cache_metrics: Option<CacheMetrics>,
    /// Wall time of the run.
    pub elapsed: Duration,
}

/// Builder for a single conversion run.
///
/// ```text
/// acquire ──► select pages ──► detect caps ──► resolve workers
///                                                    │
///              ParsedContent ◄── schedule pages ◄── gate image cache
/// ```
pub struct Pipeline<'a, B: ConversionBackend> {
    cache: &'a ConversionCache<B>,
    assets_dir: PathBuf,
    options: PipelineOptions,
    snapshot: SnapshotOptions,
    pages: Option<Vec<u32>>,
    workers: usize,
    images: bool,
    probe: CapabilityProbe,
    html_options: HtmlOptions,
    recognizer: Option<&'a dyn TextRecognizer>,
    captioner: Option<&'a dyn Captioner>,
}

impl<'a, B: ConversionBackend> Pipeline<'a, B> {
    /// Run over `cache`, writing assets to `assets_dir`.
    pub fn new(cache: &'a ConversionCache<B>, assets_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache,
            assets_dir: assets_dir.into(),
            options: PipelineOptions::default(),
            snapshot: SnapshotOptions::none(),
            pages: None,
            workers: 1,
            images: true,
            probe: CapabilityProbe::new(),
            html_options: HtmlOptions::default(),
            recognizer: None,
            captioner: None,
        }
    }

    /// Set feature options.
    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// Set conversion-snapshot options.
    pub fn with_snapshot(mut self, snapshot: SnapshotOptions) -> Self {
        self.snapshot = snapshot;
        self
    }

    /// Restrict the run to 1-based pages. `None` means every page.
    pub fn with_pages(mut self, pages: Option<Vec<u32>>) -> Self {
        self.pages = pages;
        self
    }

    /// Set the requested worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set whether page and picture images are generated.
    pub fn with_images(mut self, images: bool) -> Self {
        self.images = images;
        self
    }

    /// Replace the capability probe (platform, overrides, CPU count).
    ///
    /// The backend part is always taken from the conversion backend.
    pub fn with_probe(mut self, probe: CapabilityProbe) -> Self {
        self.probe = probe;
        self
    }

    /// Options passed to per-page HTML export.
    pub fn with_html_options(mut self, options: HtmlOptions) -> Self {
        self.html_options = options;
        self
    }

    /// Text recognizer, used when OCR is not off.
    pub fn with_recognizer(mut self, recognizer: &'a dyn TextRecognizer) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    /// Captioner, used when picture descriptions are on.
    pub fn with_captioner(mut self, captioner: &'a dyn Captioner) -> Self {
        self.captioner = Some(captioner);
        self
    }

    /// Asset directory of this run.
    pub fn assets_dir(&self) -> &Path {
        &self.assets_dir
    }

    /// The normalized request this run converts.
    pub fn request(&self, input: &str) -> ConversionRequest {
        ConversionRequest::from_options(input, &self.options)
            .with_pages(self.pages.clone())
            .with_workers(self.workers)
            .with_images(self.images)
    }

    /// Run without progress reporting.
    pub fn run(&self, input: &str) -> Result<RunOutput<B::Document>, RunError> {
        self.run_with_progress(input, |_| {})
    }

    /// Run, forwarding ingestion events to `on_event`.
    pub fn run_with_progress(
        &self,
        input: &str,
        on_event: impl Fn(&IngestEvent),
    ) -> Result<RunOutput<B::Document>, RunError> {
        let start = Instant::now();

        let request = self.request(input);
        let document = self.cache.acquire_with_progress(&request, &self.snapshot, on_event)?;
        let selected_pages = options::resolve_selected_pages(document.page_count(), self.pages.as_deref())?;

        let capabilities = self.probe.clone().backend(self.cache.backend().probe()).detect();
        let (effective_workers, worker_reasons) =
            caps::resolve_effective_workers(self.workers, &capabilities, Some(selected_pages.len()));
        caps::log_worker_resolution(
            self.workers,
            effective_workers,
            &worker_reasons,
            &capabilities,
            Some(selected_pages.len()),
        );

        let image_cache = SharedImageCache::for_pipeline(&self.options);
        let mut extractor = ContentExtractor::new(&*document)
            .with_image_cache(image_cache.as_ref())
            .with_html_options(self.html_options);
        if let Some(recognizer) = self.recognizer
            && self.options.ocr_mode != OcrMode::Off
        {
            extractor = extractor.with_recognizer(recognizer);
        }
        if let Some(captioner) = self.captioner
            && self.options.picture_descriptions
        {
            extractor = extractor.with_captioner(captioner);
        }

        let outcome = PageScheduler::new(&extractor, effective_workers).process_pages(
            &selected_pages,
            &self.assets_dir,
            &self.options,
        )?;

        if let Some(cache) = &image_cache {
            cache.log_metrics();
        }
        tracing::info!(
            input,
            pages = selected_pages.len(),
            workers = effective_workers,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "conversion run finished"
        );

        Ok(RunOutput {
            document,
            selected_pages,
            content: outcome.content,
            capabilities,
            effective_workers,
            worker_reasons,
            mode: outcome.mode,
            fallback: outcome.fallback,
            cache_metrics: image_cache.map(|c| c.get_metrics()),
            elapsed: start.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::OcrLine;
    use crate::config::EnvOverrides;
    use crate::error::{IngestError, OptionsError};
    use crate::options::TableMode;
    use crate::process::SequentialReason;
    use crate::test_support::{CountingRecognizer, FakeBackend};
    use tempfile::TempDir;

    fn linux_probe(cpus: usize) -> CapabilityProbe {
        CapabilityProbe::new()
            .platform("linux")
            .overrides(EnvOverrides::default())
            .cpu_count(Some(cpus))
            .ceiling(8)
    }

    fn text_only() -> PipelineOptions {
        PipelineOptions::default().with_tables(TableMode::Off)
    }

    #[test]
    fn test_run_all_pages() {
        let dir = TempDir::new().unwrap();
        let cache = ConversionCache::new(FakeBackend::new(4));
        let output = Pipeline::new(&cache, dir.path())
            .with_options(text_only())
            .with_probe(linux_probe(4))
            .run("doc.pdf")
            .unwrap();

        assert_eq!(output.selected_pages, vec![1, 2, 3, 4]);
        assert_eq!(output.content.page_numbers(), vec![1, 2, 3, 4]);
        assert!(output.content.pages[2].html.contains("Page 3"));
        assert_eq!(output.effective_workers, 1);
        assert_eq!(output.mode, ExecutionMode::Sequential(SequentialReason::SingleWorker));
        assert!(output.cache_metrics.is_none());
    }

    #[test]
    fn test_selection_is_sorted_and_deduplicated() {
        let dir = TempDir::new().unwrap();
        let cache = ConversionCache::new(FakeBackend::new(5));
        let output = Pipeline::new(&cache, dir.path())
            .with_options(text_only())
            .with_pages(Some(vec![4, 2, 4]))
            .with_probe(linux_probe(4))
            .run("doc.pdf")
            .unwrap();
        assert_eq!(output.content.page_numbers(), vec![2, 4]);
    }

    #[test]
    fn test_page_beyond_document_fails() {
        let dir = TempDir::new().unwrap();
        let cache = ConversionCache::new(FakeBackend::new(2));
        let err = Pipeline::new(&cache, dir.path())
            .with_pages(Some(vec![1, 9]))
            .run("doc.pdf")
            .unwrap_err();
        assert!(matches!(err, RunError::Options(OptionsError::PageOutOfRange { page: 9, total: 2 })));
    }

    #[test]
    fn test_page_zero_fails() {
        let dir = TempDir::new().unwrap();
        let cache = ConversionCache::new(FakeBackend::new(2));
        let err = Pipeline::new(&cache, dir.path())
            .with_pages(Some(vec![0, 1]))
            .run("doc.pdf")
            .unwrap_err();
        assert!(matches!(err, RunError::Options(OptionsError::PageSpec { .. })));
    }

    #[test]
    fn test_conversion_failure_surfaces() {
        let dir = TempDir::new().unwrap();
        let cache = ConversionCache::new(FakeBackend::failing("no models"));
        let err = Pipeline::new(&cache, dir.path()).run("doc.pdf").unwrap_err();
        assert!(matches!(err, RunError::Ingest(IngestError::Conversion { .. })));
    }

    #[test]
    fn test_worker_clamps_reported() {
        let dir = TempDir::new().unwrap();
        let cache = ConversionCache::new(FakeBackend::new(3));
        let output = Pipeline::new(&cache, dir.path())
            .with_options(text_only())
            .with_workers(16)
            .with_probe(linux_probe(4))
            .run("doc.pdf")
            .unwrap();

        assert_eq!(output.effective_workers, 3);
        assert_eq!(
            output.worker_reasons,
            vec!["Clamped to backend maximum of 4 workers", "Clamped to page count of 3"]
        );
        assert_eq!(output.content.page_numbers(), vec![1, 2, 3]);
        if cfg!(feature = "batch") {
            assert_eq!(output.mode, ExecutionMode::Parallel { workers: 3 });
        }
    }

    #[test]
    fn test_unsafe_platform_runs_sequentially() {
        let dir = TempDir::new().unwrap();
        let cache = ConversionCache::new(FakeBackend::new(3));
        let output = Pipeline::new(&cache, dir.path())
            .with_options(text_only())
            .with_workers(4)
            .with_probe(linux_probe(4).platform("darwin"))
            .run("doc.pdf")
            .unwrap();
        assert_eq!(output.effective_workers, 1);
        assert_eq!(output.worker_reasons, vec!["Backend does not support parallel page extraction"]);
    }

    #[test]
    fn test_second_run_reuses_document() {
        let dir = TempDir::new().unwrap();
        let cache = ConversionCache::new(FakeBackend::new(2));
        let pipeline = Pipeline::new(&cache, dir.path()).with_options(text_only());

        let first = pipeline.run("doc.pdf").unwrap();
        let second = pipeline.run("doc.pdf").unwrap();
        assert!(Arc::ptr_eq(&first.document, &second.document));
        assert_eq!(cache.backend().conversions(), 1);
    }

    #[test]
    fn test_recognizer_only_attached_when_ocr_enabled() {
        let dir = TempDir::new().unwrap();
        let cache = ConversionCache::new(FakeBackend::new(2));
        let recognizer = CountingRecognizer::new(vec![OcrLine::new("text")]);

        let off = Pipeline::new(&cache, dir.path())
            .with_options(text_only())
            .with_workers(2)
            .with_probe(linux_probe(4))
            .with_recognizer(&recognizer)
            .run("doc.pdf")
            .unwrap();
        assert_ne!(off.mode, ExecutionMode::Sequential(SequentialReason::RecognitionActive));
        assert_eq!(recognizer.calls(), 0);

        let on = Pipeline::new(&cache, dir.path())
            .with_options(text_only().with_ocr(OcrMode::On))
            .with_workers(2)
            .with_probe(linux_probe(4))
            .with_recognizer(&recognizer)
            .run("doc.pdf")
            .unwrap();
        assert_eq!(on.mode, ExecutionMode::Sequential(SequentialReason::RecognitionActive));
        assert_eq!(recognizer.calls(), 2);
        assert!(on.content.pages.iter().all(|p| p.html.contains("data-ocr")));
        let metrics = on.cache_metrics.unwrap();
        assert_eq!(metrics.page.backend_calls, 2);
    }

    #[test]
    fn test_snapshot_written_by_run() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        let cache = ConversionCache::new(FakeBackend::new(1));
        let events = parking_lot::Mutex::new(Vec::new());

        Pipeline::new(&cache, dir.path().join("assets"))
            .with_options(text_only())
            .with_snapshot(SnapshotOptions::at(&path))
            .run_with_progress("doc.pdf", |e| events.lock().push(e.clone()))
            .unwrap();

        assert!(path.exists());
        assert!(matches!(events.lock().last(), Some(IngestEvent::SnapshotSaved { .. })));
    }
}
