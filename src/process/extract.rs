//! Content extraction for one page.
//!
//! Per page, in order:
//!
//! 1. export HTML (failure yields an empty page)
//! 2. append recognized text when the page needs it
//! 3. write embedded `data:` images to the asset directory
//! 4. copy referenced local images to the asset directory
//! 5. caption extracted images
//! 6. handle tables per [`TableMode`]
//! 7. collect links

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Instant;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::{ImageFormat, RgbaImage};
use regex::{Captures, Regex};

use super::context::{
    HtmlPage, ImageAsset, LinkKind, LinkRef, PageProcessingContext, PageProcessingResult, TableContent, TableKind,
};
use super::schedule::PageWorker;
use crate::backend::{Captioner, DocumentHandle, HtmlOptions, OcrLine, TextRecognizer};
use crate::config;
use crate::error::{BackendError, PageError};
use crate::image::SharedImageCache;
use crate::options::{OcrMode, TableMode};

static EMBEDDED_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"src="data:image/(?P<ext>[^;"]+);base64,(?P<data>[^"]+)""#).expect("static regex")
});
static IMAGE_SRC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"(?i)src="(?P<src>[^"]+)""#).expect("static regex"));
static TABLE_BLOCK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<table[\s\S]*?</table>").expect("static regex"));
static ANCHOR_HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)<a\s+[^>]*href="(?P<href>[^"]+)""#).expect("static regex"));
static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("static regex"));
static MEANINGFUL_CHAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-zA-Z0-9.,;:!?\-\s]").expect("static regex"));

/// Characters a typical page holds; coverage is measured against this.
const ESTIMATED_PAGE_CAPACITY: f64 = 3000.0;

// =============================================================================
// Text Coverage
// =============================================================================

/// Share of a typical page's text present in `html`, capped at 1.0.
///
/// Tags are replaced by spaces before counting letters, digits, basic
/// punctuation and whitespace.
pub fn compute_text_coverage(html: &str) -> f64 {
    let text = HTML_TAG.replace_all(html, " ");
    let meaningful = MEANINGFUL_CHAR.find_iter(&text).count() as f64;
    (meaningful / ESTIMATED_PAGE_CAPACITY).min(1.0)
}

/// Whether a page should go through text recognition.
pub fn needs_ocr(html: &str, mode: OcrMode, threshold: f64) -> bool {
    match mode {
        OcrMode::Off => false,
        OcrMode::On => true,
        OcrMode::Auto => compute_text_coverage(html) < threshold,
    }
}

// =============================================================================
// ContentExtractor
// =============================================================================

/// Extracts the content of single pages from a converted document.
///
/// Shared read-only by every worker. Recognition backends are optional;
/// attaching an available one makes [`PageWorker::recognition_active`] true,
/// which keeps the scheduler sequential.
pub struct ContentExtractor<'a, D: DocumentHandle + ?Sized> {
    doc: &'a D,
    image_cache: Option<&'a SharedImageCache>,
    recognizer: Option<&'a dyn TextRecognizer>,
    captioner: Option<&'a dyn Captioner>,
    html_options: HtmlOptions,
}

impl<'a, D: DocumentHandle + ?Sized> ContentExtractor<'a, D> {
    /// Extractor over `doc` with no cache or recognition backends.
    pub fn new(doc: &'a D) -> Self {
        Self {
            doc,
            image_cache: None,
            recognizer: None,
            captioner: None,
            html_options: HtmlOptions::default(),
        }
    }

    /// Route rasterization and recognition through `cache`.
    pub fn with_image_cache(mut self, cache: Option<&'a SharedImageCache>) -> Self {
        self.image_cache = cache;
        self
    }

    /// Attach a text recognizer.
    pub fn with_recognizer(mut self, recognizer: &'a dyn TextRecognizer) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    /// Attach a captioner.
    pub fn with_captioner(mut self, captioner: &'a dyn Captioner) -> Self {
        self.captioner = Some(captioner);
        self
    }

    /// Options passed to HTML export.
    pub fn with_html_options(mut self, options: HtmlOptions) -> Self {
        self.html_options = options;
        self
    }

    fn export_html(&self, ctx: &PageProcessingContext) -> String {
        match self.doc.render_page_html(ctx.page_index(), &self.html_options) {
            Ok(html) => html,
            Err(err) => {
                tracing::warn!(page = ctx.page_no, error = %err, "HTML export failed, continuing with an empty page");
                String::new()
            }
        }
    }

    // -------------------------------------------------------------------------
    // Recognition
    // -------------------------------------------------------------------------

    fn apply_ocr(&self, ctx: &PageProcessingContext, html: String) -> String {
        let Some(recognizer) = self.recognizer.filter(|r| r.is_available()) else {
            tracing::debug!(page = ctx.page_no, "text recognizer unavailable, skipping OCR");
            return html;
        };

        match self.recognize_page(ctx.page_index(), recognizer) {
            Ok(Some(lines)) if !lines.is_empty() => {
                tracing::debug!(page = ctx.page_no, lines = lines.len(), "appended recognized text");
                append_ocr_spans(html, &lines)
            }
            Ok(_) => html,
            Err(err) => {
                tracing::warn!(page = ctx.page_no, error = %err, "OCR failed");
                html
            }
        }
    }

    fn recognize_page(
        &self,
        page_index: usize,
        recognizer: &dyn TextRecognizer,
    ) -> Result<Option<Vec<OcrLine>>, BackendError> {
        match self.image_cache {
            Some(cache) => {
                let page = cache.get_page(self.doc, page_index, cache.default_dpi())?;
                cache.ocr_or_else(&page.image, |image| recognizer.run(image))
            }
            None => {
                let raster = self.doc.render_page_raster(page_index, config::get().default_dpi)?;
                recognizer.run(&raster)
            }
        }
    }

    fn caption_images(&self, ctx: &PageProcessingContext, images: &mut [ImageAsset]) {
        if images.is_empty() {
            return;
        }
        let Some(captioner) = self.captioner.filter(|c| c.is_available()) else {
            tracing::warn!(page = ctx.page_no, "caption engine not available, skipping image captioning");
            return;
        };

        let mut captioned = 0;
        for asset in images.iter_mut() {
            let path = ctx.output_asset_path.join(&asset.name);
            let image = match image::open(&path) {
                Ok(image) => image,
                Err(err) => {
                    tracing::warn!(image = %asset.name, error = %err, "failed to load image for captioning");
                    continue;
                }
            };
            let caption = match self.image_cache {
                Some(cache) => cache.caption_or_else(&image, |i| captioner.run(i)),
                None => captioner.run(&image),
            };
            match caption {
                Ok(Some(text)) if !text.is_empty() => {
                    asset.caption = Some(text);
                    captioned += 1;
                }
                Ok(_) => tracing::debug!(image = %asset.name, "no caption generated"),
                Err(err) => tracing::warn!(image = %asset.name, error = %err, "failed to caption image"),
            }
        }
        tracing::info!(page = ctx.page_no, "captioned {captioned}/{} images", images.len());
    }
}

impl<D: DocumentHandle + ?Sized> PageWorker for ContentExtractor<'_, D> {
    fn process_page(&self, ctx: &PageProcessingContext) -> Result<PageProcessingResult, PageError> {
        let start = Instant::now();
        let options = &ctx.pipeline_options;

        let mut html = self.export_html(ctx);
        if needs_ocr(&html, options.ocr_mode, options.text_coverage_threshold) {
            html = self.apply_ocr(ctx, html);
        }

        let (html, mut images) = extract_embedded_images(&html, ctx)?;
        let (html, copied) = copy_referenced_images(&html, ctx)?;
        images.extend(copied);

        if options.picture_descriptions {
            self.caption_images(ctx, &mut images);
        }

        let (html, tables) = process_tables(&html, ctx, options.tables_mode)?;
        let links = detect_links(&html, ctx.page_no);

        Ok(PageProcessingResult {
            page_no: ctx.page_no,
            page_content: HtmlPage {
                html,
                page_no: ctx.page_no,
            },
            extracted_images: images,
            extracted_tables: tables,
            extracted_links: links,
            elapsed: start.elapsed(),
        })
    }

    fn recognition_active(&self) -> bool {
        self.recognizer.is_some_and(|r| r.is_available()) || self.captioner.is_some_and(|c| c.is_available())
    }
}

// =============================================================================
// HTML Rewriting
// =============================================================================

/// Replace each regex match with `f(captures)`, stopping at the first error.
fn try_replace_all<E>(
    re: &Regex,
    text: &str,
    mut f: impl FnMut(&Captures<'_>) -> Result<String, E>,
) -> Result<String, E> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in re.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&text[last..whole.start()]);
        out.push_str(&f(&caps)?);
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

fn append_ocr_spans(mut html: String, lines: &[OcrLine]) -> String {
    let spans: String = lines.iter().map(OcrLine::to_html_span).collect();
    let block = format!(r#"<div class="ocr-text">{spans}</div>"#);
    match html.rfind("</body>") {
        Some(pos) => html.insert_str(pos, &block),
        None => html.push_str(&block),
    }
    html
}

fn image_extension(raw: &str) -> String {
    let ext = raw.trim().to_ascii_lowercase();
    if ext == "jpeg" {
        "jpg".to_string()
    } else if ext.contains("svg") {
        "svg".to_string()
    } else {
        ext
    }
}

fn extract_embedded_images(
    html: &str,
    ctx: &PageProcessingContext,
) -> Result<(String, Vec<ImageAsset>), PageError> {
    let mut images = Vec::new();
    let updated = try_replace_all(&EMBEDDED_IMAGE, html, |caps| -> Result<String, PageError> {
        let name = format!(
            "{}_img_{:04}.{}",
            ctx.name_prefix,
            images.len() + 1,
            image_extension(&caps["ext"])
        );
        let bytes = BASE64.decode(&caps["data"]).unwrap_or_else(|err| {
            tracing::warn!(image = %name, error = %err, "invalid base64 image data, writing empty file");
            Vec::new()
        });
        fs::create_dir_all(&ctx.output_asset_path)?;
        fs::write(ctx.output_asset_path.join(&name), bytes)?;

        let asset = ImageAsset::new(name, ctx.page_no);
        let src = format!(r#"src="{}""#, asset.src);
        images.push(asset);
        Ok(src)
    })?;
    Ok((updated, images))
}

fn local_image_path(src: &str) -> Option<PathBuf> {
    let lower = src.to_ascii_lowercase();
    if ["data:", "http://", "https://", "mailto:", "assets/"]
        .iter()
        .any(|prefix| lower.starts_with(prefix))
    {
        return None;
    }
    let path = if lower.starts_with("file://") { &src[7..] } else { src };
    Some(PathBuf::from(path))
}

fn copy_referenced_images(
    html: &str,
    ctx: &PageProcessingContext,
) -> Result<(String, Vec<ImageAsset>), PageError> {
    let mut images = Vec::new();
    let updated = try_replace_all(&IMAGE_SRC, html, |caps| -> Result<String, PageError> {
        let original = caps[0].to_string();
        let Some(source) = local_image_path(&caps["src"]).filter(|p| p.is_file()) else {
            return Ok(original);
        };

        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}_img_{:04}.bin", ctx.name_prefix, images.len() + 1));
        fs::create_dir_all(&ctx.output_asset_path)?;
        if let Err(err) = fs::copy(&source, ctx.output_asset_path.join(&name)) {
            tracing::warn!(source = %source.display(), error = %err, "failed to copy referenced image");
            return Ok(original);
        }

        let asset = ImageAsset::new(name, ctx.page_no);
        let src = format!(r#"src="{}""#, asset.src);
        images.push(asset);
        Ok(src)
    })?;
    Ok((updated, images))
}

fn write_table_placeholder(dir: &Path, name: &str) -> Result<(), PageError> {
    fs::create_dir_all(dir)?;
    RgbaImage::new(1, 1).save_with_format(dir.join(name), ImageFormat::Png)?;
    Ok(())
}

fn process_tables(
    html: &str,
    ctx: &PageProcessingContext,
    mode: TableMode,
) -> Result<(String, Vec<TableContent>), PageError> {
    if mode == TableMode::Off {
        return Ok((html.to_string(), Vec::new()));
    }

    let mut tables = Vec::new();
    let updated = try_replace_all(&TABLE_BLOCK, html, |caps| -> Result<String, PageError> {
        let block = &caps[0];
        if mode == TableMode::ImageOnly {
            let name = format!("{}_table_{:04}.png", ctx.name_prefix, tables.len() + 1);
            write_table_placeholder(&ctx.output_asset_path, &name)?;
            let img = format!(r#"<img src="assets/{name}">"#);
            tables.push(TableContent {
                kind: TableKind::Image,
                page_no: ctx.page_no,
                html: None,
                image_name: Some(name),
            });
            return Ok(img);
        }
        tables.push(TableContent {
            kind: TableKind::Html,
            page_no: ctx.page_no,
            html: Some(block.to_string()),
            image_name: None,
        });
        Ok(block.to_string())
    })?;

    if mode == TableMode::Structured && !tables.is_empty() {
        tracing::warn!(
            page = ctx.page_no,
            "structured table data unavailable, keeping {} HTML tables",
            tables.len()
        );
    }
    Ok((updated, tables))
}

fn detect_links(html: &str, page_no: u32) -> Vec<LinkRef> {
    ANCHOR_HREF
        .captures_iter(html)
        .map(|caps| {
            let target = caps["href"].to_string();
            let kind = if ["http://", "https://", "mailto:"].iter().any(|p| target.starts_with(p)) {
                LinkKind::External
            } else {
                LinkKind::Internal
            };
            LinkRef {
                kind,
                source_page: page_no,
                target,
            }
        })
        .collect()
}
