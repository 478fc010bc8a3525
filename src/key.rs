//! Content-derived cache keys.
//!
//! Two kinds of key share one type:
//!
//! - **Parameter keys** hash a normalized parameter tuple (document identity,
//!   feature flags, page selection, worker count). They deduplicate backend
//!   conversions within a process.
//! - **Pixel keys** hash raw image content. They identify rasters and crops
//!   independent of how they were produced.
//!
//! The two are domain-separated, so a parameter key never equals a pixel key.

use std::fmt;

use image::DynamicImage;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Width of a key in bytes (rendered as 16 hex characters).
const KEY_LEN: usize = 8;

const PARAMS_DOMAIN: &[u8] = b"params\0";
const PIXELS_DOMAIN: &[u8] = b"pixels\0";

/// Immutable, fixed-width cache key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey([u8; KEY_LEN]);

impl CacheKey {
    /// Key for a normalized parameter tuple.
    ///
    /// `serde_json` object maps are ordered by key, so two values that differ
    /// only in field insertion order produce the same key.
    pub fn from_params(params: &Value) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(PARAMS_DOMAIN);
        hasher.update(params.to_string().as_bytes());
        Self::from_digest(&hasher.finalize())
    }

    /// Key for raw pixel bytes with their geometry and layout.
    pub fn from_pixels(width: u32, height: u32, layout: &str, bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(PIXELS_DOMAIN);
        hasher.update(width.to_le_bytes());
        hasher.update(height.to_le_bytes());
        hasher.update(layout.as_bytes());
        hasher.update([0u8]);
        hasher.update(bytes);
        Self::from_digest(&hasher.finalize())
    }

    /// Key for an image's pixel content.
    pub fn of_image(image: &DynamicImage) -> Self {
        let layout = format!("{:?}", image.color());
        Self::from_pixels(image.width(), image.height(), &layout, image.as_bytes())
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    fn from_digest(digest: &[u8]) -> Self {
        let mut out = [0u8; KEY_LEN];
        out.copy_from_slice(&digest[..KEY_LEN]);
        Self(out)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self.to_hex())
    }
}
