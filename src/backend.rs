//! Interfaces to the external document-conversion and recognition backends.
//!
//! The crate never looks inside a backend. It needs exactly this surface:
//!
//! ```text
//! ConversionBackend ──convert──► Document: DocumentHandle + serde
//!                                  ├─ page_count()
//!                                  ├─ render_page_raster(page, dpi)
//!                                  └─ render_page_html(page, options)
//!
//! TextRecognizer / Captioner ──run(image)──► Option<result>
//! ```
//!
//! Any concrete adapter implements these traits; snapshots are produced and
//! read through the document's `serde` implementation.

use image::DynamicImage;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::options::ConversionRequest;

// =============================================================================
// Document Handle
// =============================================================================

/// Options passed through to per-page HTML rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtmlOptions {
    /// Render a split (side-by-side) page view.
    pub split_page_view: bool,
    /// Embed images as `data:` URIs instead of referencing files.
    pub embed_images: bool,
}

impl Default for HtmlOptions {
    fn default() -> Self {
        Self {
            split_page_view: false,
            embed_images: true,
        }
    }
}

/// A converted document.
///
/// Owned by the caller for the duration of a run and never mutated after
/// creation, so a shared reference may be used from any worker thread.
pub trait DocumentHandle: Send + Sync {
    /// Number of pages.
    fn page_count(&self) -> usize;

    /// Rasterize a page (0-based index) at the given resolution.
    fn render_page_raster(&self, page_index: usize, dpi: u32) -> Result<DynamicImage, BackendError>;

    /// Render a page (0-based index) as HTML.
    fn render_page_html(&self, page_index: usize, options: &HtmlOptions) -> Result<String, BackendError>;
}

// =============================================================================
// Conversion Backend
// =============================================================================

/// Result of probing whether a backend can be used at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendProbe {
    /// Whether a converter instance can be constructed.
    pub constructible: bool,
    /// Backend version, when known.
    pub version: Option<String>,
}

impl Default for BackendProbe {
    fn default() -> Self {
        Self {
            constructible: true,
            version: None,
        }
    }
}

impl BackendProbe {
    /// A backend that cannot be constructed.
    pub fn unavailable() -> Self {
        Self {
            constructible: false,
            version: None,
        }
    }

    /// A constructible backend with a known version.
    pub fn with_version(version: impl Into<String>) -> Self {
        Self {
            constructible: true,
            version: Some(version.into()),
        }
    }
}

/// The expensive layout/OCR conversion step.
pub trait ConversionBackend: Send + Sync {
    /// Document type produced by this backend.
    ///
    /// Its `serde` round trip must be lossless: deserializing a snapshot and
    /// serializing it again has to yield the same value.
    type Document: DocumentHandle + Serialize + DeserializeOwned;

    /// Convert one input. Called at most once per normalized request per
    /// [`ConversionCache`](crate::ingest::ConversionCache).
    fn convert(&self, request: &ConversionRequest) -> Result<Self::Document, BackendError>;

    /// Report whether the backend can be constructed, and its version.
    fn probe(&self) -> BackendProbe {
        BackendProbe::default()
    }
}

// =============================================================================
// Recognition Backends
// =============================================================================

/// One recognized line of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrLine {
    /// Recognized text.
    pub text: String,
    /// Confidence in `0.0..=1.0`; zero when unknown.
    pub confidence: f32,
    /// Detected or requested language code.
    pub language: Option<String>,
    /// `(x, y, width, height)` in raster pixels.
    pub bbox: Option<(f32, f32, f32, f32)>,
}

impl OcrLine {
    /// Line with text only.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            confidence: 0.0,
            language: None,
            bbox: None,
        }
    }

    /// Render as an HTML span carrying recognition metadata.
    pub fn to_html_span(&self) -> String {
        let mut attrs = vec![r#"data-ocr="true""#.to_string()];
        if self.confidence > 0.0 {
            attrs.push(format!(r#"data-ocr-confidence="{:.3}""#, self.confidence));
        }
        if let Some(lang) = &self.language {
            attrs.push(format!(r#"data-ocr-language="{}""#, html_escape::encode_quoted_attribute(lang)));
        }
        if let Some((x, y, w, h)) = self.bbox {
            attrs.push(format!(r#"data-bbox="{x},{y},{w},{h}""#));
        }
        format!("<span {}>{}</span>", attrs.join(" "), html_escape::encode_quoted_attribute(&self.text))
    }
}

/// Text recognition over a raster.
///
/// Implementations typically hold process-local model state. Their presence
/// forces sequential page scheduling.
pub trait TextRecognizer: Send + Sync {
    /// Whether the engine is installed and functional.
    fn is_available(&self) -> bool;

    /// Recognize text. `Ok(None)` means the engine produced no result.
    fn run(&self, image: &DynamicImage) -> Result<Option<Vec<OcrLine>>, BackendError>;
}

/// Image captioning (vision-language model).
pub trait Captioner: Send + Sync {
    /// Whether the model is loaded and functional.
    fn is_available(&self) -> bool;

    /// Caption an image. `Ok(None)` means no caption was generated.
    fn run(&self, image: &DynamicImage) -> Result<Option<String>, BackendError>;
}
