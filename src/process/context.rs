//! Per-page work descriptions, results, and the assembled content model.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::options::PipelineOptions;

// =============================================================================
// Unit of Work
// =============================================================================

/// Everything one unit of page work needs.
///
/// Plain data only: no document handle, cache or backend reference, so a
/// context can be cloned, serialized and handed to any worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageProcessingContext {
    /// 1-based page number.
    pub page_no: u32,
    /// Directory extracted assets are written to.
    pub output_asset_path: PathBuf,
    /// Prefix for generated asset file names.
    pub name_prefix: String,
    /// Feature configuration for the run.
    pub pipeline_options: PipelineOptions,
}

impl PageProcessingContext {
    /// Context for `page_no` with the standard `page-NNNN` prefix.
    pub fn new(page_no: u32, output_asset_path: &Path, pipeline_options: &PipelineOptions) -> Self {
        Self {
            page_no,
            output_asset_path: output_asset_path.to_path_buf(),
            name_prefix: format!("page-{page_no:04}"),
            pipeline_options: pipeline_options.clone(),
        }
    }

    /// 0-based page index.
    pub fn page_index(&self) -> usize {
        self.page_no.saturating_sub(1) as usize
    }
}

/// Output of one unit of page work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageProcessingResult {
    /// 1-based page number.
    pub page_no: u32,
    /// Final page HTML.
    pub page_content: HtmlPage,
    /// Images written for this page.
    pub extracted_images: Vec<ImageAsset>,
    /// Tables found on this page.
    pub extracted_tables: Vec<TableContent>,
    /// Links found on this page.
    pub extracted_links: Vec<LinkRef>,
    /// Wall time spent on the page.
    pub elapsed: Duration,
}

// =============================================================================
// Content Model
// =============================================================================

/// HTML of one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtmlPage {
    /// Page HTML with asset references rewritten.
    pub html: String,
    /// 1-based page number.
    pub page_no: u32,
}

/// An image written to the asset directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAsset {
    /// Source as referenced from the page HTML (`assets/<name>`).
    pub src: String,
    /// 1-based page number.
    pub page_no: u32,
    /// File name inside the asset directory.
    pub name: String,
    /// Generated description, when captioning ran.
    pub caption: Option<String>,
}

impl ImageAsset {
    /// Asset without a caption.
    pub fn new(name: impl Into<String>, page_no: u32) -> Self {
        let name = name.into();
        Self {
            src: format!("assets/{name}"),
            page_no,
            name,
            caption: None,
        }
    }

    /// Alternative text: the caption, or empty.
    pub fn alt_text(&self) -> &str {
        self.caption.as_deref().unwrap_or("")
    }
}

/// How a table was kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    /// Kept as an HTML `<table>`.
    Html,
    /// Replaced by an image.
    Image,
}

/// A table found on a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableContent {
    /// How the table was kept.
    pub kind: TableKind,
    /// 1-based page number.
    pub page_no: u32,
    /// Table markup, for [`TableKind::Html`].
    pub html: Option<String>,
    /// Asset file name, for [`TableKind::Image`].
    pub image_name: Option<String>,
}

/// Link target class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    /// Points inside the document.
    Internal,
    /// `http`, `https` or `mailto`.
    External,
}

/// A hyperlink found on a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRef {
    /// Target class.
    pub kind: LinkKind,
    /// 1-based page the link appears on.
    pub source_page: u32,
    /// Raw `href`.
    pub target: String,
}

/// Content of every processed page, in page-list order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedContent {
    /// Page HTML.
    pub pages: Vec<HtmlPage>,
    /// All extracted images.
    pub images: Vec<ImageAsset>,
    /// All tables.
    pub tables: Vec<TableContent>,
    /// All links.
    pub links: Vec<LinkRef>,
    /// Asset directory, when assets were written.
    pub assets_dir: Option<PathBuf>,
}

impl ParsedContent {
    /// Concatenate page results in the given order.
    pub fn from_results(results: Vec<PageProcessingResult>, assets_dir: &Path) -> Self {
        let mut content = Self {
            assets_dir: Some(assets_dir.to_path_buf()),
            ..Self::default()
        };
        for result in results {
            content.pages.push(result.page_content);
            content.images.extend(result.extracted_images);
            content.tables.extend(result.extracted_tables);
            content.links.extend(result.extracted_links);
        }
        content
    }

    /// Page numbers in assembled order.
    pub fn page_numbers(&self) -> Vec<u32> {
        self.pages.iter().map(|p| p.page_no).collect()
    }
}
