//! Pipeline options, conversion requests, and page selection.
//!
//! Values here arrive already typed from an outer CLI layer; the string
//! parsers exist so that layer can stay thin.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::OptionsError;
use crate::key::CacheKey;

// =============================================================================
// Modes
// =============================================================================

/// Table handling mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TableMode {
    /// Always attempt structural extraction.
    Structured,
    /// Try structured, keep HTML otherwise.
    #[default]
    Auto,
    /// Always replace tables with images.
    ImageOnly,
    /// Leave tables untouched and unrecorded.
    Off,
}

impl TableMode {
    const ALL: [Self; 4] = [Self::Structured, Self::Auto, Self::ImageOnly, Self::Off];

    /// CLI spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::Auto => "auto",
            Self::ImageOnly => "image-only",
            Self::Off => "off",
        }
    }
}

/// Text-recognition mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OcrMode {
    /// Only on pages with insufficient text coverage.
    Auto,
    /// On every page.
    On,
    /// Never.
    #[default]
    Off,
}

impl OcrMode {
    const ALL: [Self; 3] = [Self::Auto, Self::On, Self::Off];

    /// CLI spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::On => "on",
            Self::Off => "off",
        }
    }
}

macro_rules! impl_mode_str {
    ($ty:ty, $option:literal) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = OptionsError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                <$ty>::ALL
                    .into_iter()
                    .find(|mode| mode.as_str() == s)
                    .ok_or_else(|| OptionsError::InvalidValue {
                        option: $option,
                        value: s.to_string(),
                        valid: <$ty>::ALL
                            .iter()
                            .map(|m| m.as_str())
                            .collect::<Vec<_>>()
                            .join(", "),
                    })
            }
        }
    };
}

impl_mode_str!(TableMode, "tables mode");
impl_mode_str!(OcrMode, "OCR mode");

// =============================================================================
// Pipeline Options
// =============================================================================

/// Default text-coverage threshold below which `OcrMode::Auto` runs OCR.
pub const DEFAULT_TEXT_COVERAGE_THRESHOLD: f64 = 0.05;

/// Per-run feature configuration.
///
/// Defaults leave every optional feature off except automatic table handling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOptions {
    /// Table handling.
    pub tables_mode: TableMode,
    /// Text recognition.
    pub ocr_mode: OcrMode,
    /// Generate captions for extracted pictures.
    pub picture_descriptions: bool,
    /// Vision model identifier for captions.
    pub vlm_repo_id: Option<String>,
    /// Coverage threshold for `OcrMode::Auto`.
    pub text_coverage_threshold: f64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            tables_mode: TableMode::Auto,
            ocr_mode: OcrMode::Off,
            picture_descriptions: false,
            vlm_repo_id: None,
            text_coverage_threshold: DEFAULT_TEXT_COVERAGE_THRESHOLD,
        }
    }
}

impl PipelineOptions {
    /// Build options from CLI argument strings.
    ///
    /// # Example
    ///
    /// ```
    /// use page_batch::options::{OcrMode, PipelineOptions, TableMode};
    ///
    /// let opts = PipelineOptions::from_cli("image-only", "auto", "off", None, 0.05).unwrap();
    /// assert_eq!(opts.tables_mode, TableMode::ImageOnly);
    /// assert_eq!(opts.ocr_mode, OcrMode::Auto);
    /// ```
    pub fn from_cli(
        tables: &str,
        ocr: &str,
        picture_descriptions: &str,
        vlm_repo_id: Option<&str>,
        text_coverage_threshold: f64,
    ) -> Result<Self, OptionsError> {
        let picture_descriptions = match picture_descriptions {
            "on" => true,
            "off" => false,
            other => {
                return Err(OptionsError::InvalidValue {
                    option: "picture_descriptions",
                    value: other.to_string(),
                    valid: "on, off".to_string(),
                });
            }
        };

        Ok(Self {
            tables_mode: tables.parse()?,
            ocr_mode: ocr.parse()?,
            picture_descriptions,
            vlm_repo_id: vlm_repo_id.map(str::to_string),
            text_coverage_threshold,
        })
    }

    /// Builder-style setter for the table mode.
    pub fn with_tables(mut self, mode: TableMode) -> Self {
        self.tables_mode = mode;
        self
    }

    /// Builder-style setter for the OCR mode.
    pub fn with_ocr(mut self, mode: OcrMode) -> Self {
        self.ocr_mode = mode;
        self
    }

    /// Builder-style setter for picture descriptions.
    pub fn with_picture_descriptions(mut self, enabled: bool) -> Self {
        self.picture_descriptions = enabled;
        self
    }
}

// =============================================================================
// Conversion Request
// =============================================================================

/// The normalized parameter tuple identifying one backend conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionRequest {
    /// Document identity (usually the input path).
    pub input: String,
    /// Generate page and picture images.
    pub images: bool,
    /// Text-recognition mode.
    pub ocr: OcrMode,
    /// Table handling mode.
    pub tables: TableMode,
    /// Vision model identifier.
    pub vlm: Option<String>,
    /// Page selection, in caller order.
    pub pages: Option<Vec<u32>>,
    /// Requested worker count.
    pub workers: usize,
}

impl ConversionRequest {
    /// Request with default flags for the given input.
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            images: true,
            ocr: OcrMode::Off,
            tables: TableMode::Auto,
            vlm: None,
            pages: None,
            workers: 0,
        }
    }

    /// Request carrying the feature flags of `options`.
    pub fn from_options(input: impl Into<String>, options: &PipelineOptions) -> Self {
        Self {
            ocr: options.ocr_mode,
            tables: options.tables_mode,
            vlm: options.vlm_repo_id.clone(),
            ..Self::new(input)
        }
    }

    /// Set the page selection.
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

    /// Key deduplicating conversions of this request.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::from_params(&json!({
            "input": self.input,
            "images": self.images,
            "ocr": self.ocr.as_str(),
            "tables": self.tables.as_str(),
            "vlm": self.vlm,
            "pages": self.pages,
            "workers": self.workers,
        }))
    }
}

// =============================================================================
// Page Selection
// =============================================================================

/// Upper bound on the number of pages one page specification may select.
pub const MAX_SELECTED_PAGES: usize = 100_000;

/// Parse a page specification such as `"1,3,5-7"`.
///
/// Pages are 1-based. The result is sorted and deduplicated. Ranges are
/// limited to [`MAX_SELECTED_PAGES`] pages in total.
pub fn parse_page_spec(spec: &str) -> Result<Vec<u32>, OptionsError> {
    let invalid = |token: &str, reason: &str| OptionsError::PageSpec {
        spec: token.to_string(),
        reason: reason.to_string(),
    };

    let mut pages = Vec::new();
    for token in spec.split(',').map(str::trim) {
        if token.is_empty() {
            return Err(invalid(spec, "empty page entry"));
        }
        match token.split_once('-') {
            Some((start, end)) => {
                let start = parse_page_number(start).ok_or_else(|| invalid(token, "invalid range start"))?;
                let end = parse_page_number(end).ok_or_else(|| invalid(token, "invalid range end"))?;
                if start > end {
                    return Err(invalid(token, "range start is after range end"));
                }
                let span = (end - start) as usize + 1;
                if pages.len() + span > MAX_SELECTED_PAGES {
                    return Err(invalid(token, &format!("selects more than {MAX_SELECTED_PAGES} pages")));
                }
                pages.extend(start..=end);
            }
            None => {
                let page = parse_page_number(token).ok_or_else(|| invalid(token, "pages start at 1"))?;
                pages.push(page);
            }
        }
    }

    pages.sort_unstable();
    pages.dedup();
    Ok(pages)
}

fn parse_page_number(token: &str) -> Option<u32> {
    token.trim().parse::<u32>().ok().filter(|&p| p >= 1)
}

/// Resolve the pages to process.
///
/// `None` selects every page. An explicit selection is sorted and
/// deduplicated. Page 0 is an error, as is a page beyond the document (the
/// error names the highest offending page).
pub fn resolve_selected_pages(total_pages: usize, selection: Option<&[u32]>) -> Result<Vec<u32>, OptionsError> {
    let Some(selection) = selection else {
        return Ok((1..=total_pages as u32).collect());
    };

    let mut pages = selection.to_vec();
    pages.sort_unstable();
    pages.dedup();

    if pages.first() == Some(&0) {
        return Err(OptionsError::PageSpec {
            spec: "0".to_string(),
            reason: "pages start at 1".to_string(),
        });
    }
    if let Some(&max) = pages.last()
        && max as usize > total_pages
    {
        return Err(OptionsError::PageOutOfRange {
            page: max,
            total: total_pages,
        });
    }
    Ok(pages)
}
