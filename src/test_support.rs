//! In-memory backends and documents shared by unit tests.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use image::{DynamicImage, Rgb, RgbImage};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::backend::{Captioner, ConversionBackend, DocumentHandle, HtmlOptions, OcrLine, TextRecognizer};
use crate::error::BackendError;
use crate::options::ConversionRequest;

/// Deterministic raster: 600x800 at 150 dpi, scaled linearly with dpi.
fn gradient(page_index: usize, dpi: u32) -> DynamicImage {
    let width = 600 * dpi / 150;
    let height = 800 * dpi / 150;
    let page = page_index as u32;
    let raster = RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            ((x + page * 50) % 256) as u8,
            ((y + dpi) % 256) as u8,
            ((x + y + page * 30) % 256) as u8,
        ])
    });
    DynamicImage::ImageRgb8(raster)
}

fn out_of_range(page_index: usize, total: usize) -> BackendError {
    BackendError::failed("render", format!("page index {page_index} out of range for {total} pages"))
}

// =============================================================================
// Documents
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FakePage {
    pub html: String,
}

/// Serializable document with fixed per-page HTML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FakeDocument {
    pub input: String,
    pub pages: Vec<FakePage>,
}

impl FakeDocument {
    pub fn sample(input: &str, pages: usize) -> Self {
        let pages = (1..=pages)
            .map(|n| format!("<html><body><h1>Page {n}</h1><p>Body text of page {n}.</p></body></html>"))
            .collect();
        Self::with_pages(input, pages)
    }

    pub fn with_pages(input: &str, pages: Vec<String>) -> Self {
        Self {
            input: input.to_string(),
            pages: pages.into_iter().map(|html| FakePage { html }).collect(),
        }
    }
}

impl DocumentHandle for FakeDocument {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn render_page_raster(&self, page_index: usize, dpi: u32) -> Result<DynamicImage, BackendError> {
        if page_index >= self.pages.len() {
            return Err(out_of_range(page_index, self.pages.len()));
        }
        Ok(gradient(page_index, dpi))
    }

    fn render_page_html(&self, page_index: usize, _options: &HtmlOptions) -> Result<String, BackendError> {
        self.pages
            .get(page_index)
            .map(|p| p.html.clone())
            .ok_or_else(|| out_of_range(page_index, self.pages.len()))
    }
}

/// Raster-only document counting rasterizations.
#[derive(Debug, Default)]
pub struct GradientDocument {
    pages: usize,
    raster_calls: AtomicUsize,
}

impl GradientDocument {
    pub fn new(pages: usize) -> Self {
        Self {
            pages,
            raster_calls: AtomicUsize::new(0),
        }
    }

    pub fn raster_calls(&self) -> usize {
        self.raster_calls.load(Ordering::SeqCst)
    }
}

impl DocumentHandle for GradientDocument {
    fn page_count(&self) -> usize {
        self.pages
    }

    fn render_page_raster(&self, page_index: usize, dpi: u32) -> Result<DynamicImage, BackendError> {
        if page_index >= self.pages {
            return Err(out_of_range(page_index, self.pages));
        }
        self.raster_calls.fetch_add(1, Ordering::SeqCst);
        Ok(gradient(page_index, dpi))
    }

    fn render_page_html(&self, page_index: usize, _options: &HtmlOptions) -> Result<String, BackendError> {
        if page_index >= self.pages {
            return Err(out_of_range(page_index, self.pages));
        }
        Ok(format!("<p>page {}</p>", page_index + 1))
    }
}

// =============================================================================
// Backends
// =============================================================================

/// Conversion backend producing [`FakeDocument::sample`] documents.
#[derive(Debug)]
pub struct FakeBackend {
    pages: usize,
    failure: Option<String>,
    conversions: AtomicUsize,
}

impl FakeBackend {
    pub fn new(pages: usize) -> Self {
        Self {
            pages,
            failure: None,
            conversions: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::new(0)
        }
    }

    pub fn conversions(&self) -> usize {
        self.conversions.load(Ordering::SeqCst)
    }
}

impl ConversionBackend for FakeBackend {
    type Document = FakeDocument;

    fn convert(&self, request: &ConversionRequest) -> Result<FakeDocument, BackendError> {
        self.conversions.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(message) => Err(BackendError::failed("conversion", message.clone())),
            None => Ok(FakeDocument::sample(&request.input, self.pages)),
        }
    }
}

/// Recognizer returning fixed lines.
pub struct CountingRecognizer {
    lines: Vec<OcrLine>,
    calls: AtomicUsize,
}

impl CountingRecognizer {
    pub fn new(lines: Vec<OcrLine>) -> Self {
        Self {
            lines,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TextRecognizer for CountingRecognizer {
    fn is_available(&self) -> bool {
        true
    }

    fn run(&self, _image: &DynamicImage) -> Result<Option<Vec<OcrLine>>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(self.lines.clone()))
    }
}

/// Captioner returning a fixed caption.
pub struct CountingCaptioner {
    caption: Option<String>,
    calls: AtomicUsize,
}

impl CountingCaptioner {
    pub fn new(caption: Option<&str>) -> Self {
        Self {
            caption: caption.map(str::to_string),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Captioner for CountingCaptioner {
    fn is_available(&self) -> bool {
        true
    }

    fn run(&self, _image: &DynamicImage) -> Result<Option<String>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.caption.clone())
    }
}

// =============================================================================
// Log Capture
// =============================================================================

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl io::Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `f` with a debug-level subscriber installed for this thread and
/// return the formatted lines, e.g. `" WARN page_batch::caps: ..."`.
pub fn capture_logs(f: impl FnOnce()) -> Vec<String> {
    let buf = SharedBuf::default();
    let writer = buf.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .without_time()
        .with_writer(move || writer.clone())
        .finish();
    tracing::subscriber::with_default(subscriber, f);

    let bytes = buf.0.lock().clone();
    String::from_utf8_lossy(&bytes).lines().map(str::to_string).collect()
}

/// Whether some captured line has `level` and contains `needle`.
pub fn logged(lines: &[String], level: &str, needle: &str) -> bool {
    lines
        .iter()
        .any(|line| line.trim_start().starts_with(level) && line.contains(needle))
}
