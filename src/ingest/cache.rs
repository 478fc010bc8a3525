//! Single-pass document acquisition.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::{ConversionBackend, DocumentHandle};
use crate::error::IngestError;
use crate::options::ConversionRequest;

use super::memo::ConversionMemo;
use super::snapshot;

// =============================================================================
// Options & Events
// =============================================================================

/// Where and how a conversion snapshot is read and written.
#[derive(Debug, Clone)]
pub struct SnapshotOptions {
    /// Explicit snapshot location.
    pub path: Option<PathBuf>,
    /// Persist a snapshot even without an explicit path (uses `default_path`).
    pub write: bool,
    /// Reconvert instead of failing when the snapshot cannot be decoded.
    pub fallback_on_corruption: bool,
    /// Pretty-print the JSON.
    pub pretty: bool,
    /// Location used when `write` is set and `path` is not.
    pub default_path: Option<PathBuf>,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            path: None,
            write: false,
            fallback_on_corruption: false,
            pretty: true,
            default_path: None,
        }
    }
}

impl SnapshotOptions {
    /// No snapshot reading or writing.
    pub fn none() -> Self {
        Self::default()
    }

    /// Read from and write to `path`.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Set whether a snapshot is written without an explicit path.
    pub fn with_write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    /// Set whether a corrupt snapshot falls back to reconversion.
    pub fn with_fallback(mut self, fallback: bool) -> Self {
        self.fallback_on_corruption = fallback;
        self
    }

    /// Set the location used by `write` without an explicit path.
    pub fn with_default_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.default_path = Some(path.into());
        self
    }

    /// Effective snapshot location, if any.
    pub fn location(&self) -> Option<&Path> {
        match (&self.path, self.write) {
            (Some(path), _) => Some(path),
            (None, true) => self.default_path.as_deref(),
            (None, false) => None,
        }
    }
}

/// Progress reported by [`ConversionCache::acquire_with_progress`].
///
/// A single call emits exactly one of:
/// `Converting` then `Converted`, `LoadedFromCache`, or `Reused`;
/// optionally followed by `SnapshotSaved`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestEvent {
    /// The backend is about to run.
    Converting {
        /// Input identity.
        input: String,
    },
    /// The backend finished.
    Converted {
        /// Pages in the converted document.
        page_count: usize,
    },
    /// A snapshot was decoded; the backend did not run.
    LoadedFromCache {
        /// Snapshot location.
        path: PathBuf,
        /// Pages in the loaded document.
        page_count: usize,
    },
    /// An earlier call in this process already produced the document.
    Reused {
        /// Pages in the shared document.
        page_count: usize,
    },
    /// A snapshot was written.
    SnapshotSaved {
        /// Snapshot location.
        path: PathBuf,
    },
}

enum Origin {
    Converted,
    Loaded(PathBuf),
}

// =============================================================================
// ConversionCache
// =============================================================================

/// Acquires document handles, invoking the backend at most once per
/// normalized request for the lifetime of this value.
///
/// ```text
/// acquire(request)
///   │
///   ├─ memo hit ─────────────────────────────► Reused
///   ├─ snapshot decodes ─────────────────────► LoadedFromCache
///   ├─ snapshot corrupt, no fallback ────────► Err(CacheLoad)
///   └─ backend.convert ──► Converting/Converted ──► save ──► SnapshotSaved
/// ```
///
/// The memo is owned here rather than kept as process-wide state, so tests
/// and long-running hosts can inspect and reset it.
pub struct ConversionCache<B: ConversionBackend> {
    backend: B,
    memo: ConversionMemo<B::Document>,
}

impl<B: ConversionBackend> ConversionCache<B> {
    /// Cache over `backend` with an empty memo.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            memo: ConversionMemo::new(),
        }
    }

    /// The wrapped backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The in-process memo.
    pub fn memo(&self) -> &ConversionMemo<B::Document> {
        &self.memo
    }

    /// Acquire a document without progress reporting.
    pub fn acquire(&self, request: &ConversionRequest, options: &SnapshotOptions) -> Result<Arc<B::Document>, IngestError> {
        self.acquire_with_progress(request, options, |_| {})
    }

    /// Acquire a document, reporting progress events in order.
    pub fn acquire_with_progress(
        &self,
        request: &ConversionRequest,
        options: &SnapshotOptions,
        on_event: impl Fn(&IngestEvent),
    ) -> Result<Arc<B::Document>, IngestError> {
        let location = options.location();
        let mut origin = Origin::Converted;

        let (document, fresh) = self.memo.get_or_try_init(request.cache_key(), || {
            if let Some(path) = location
                && path.exists()
            {
                match snapshot::load(path) {
                    Ok(document) => {
                        origin = Origin::Loaded(path.to_path_buf());
                        return Ok(document);
                    }
                    Err(source) if options.fallback_on_corruption => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %source,
                            "conversion cache is unreadable, reconverting"
                        );
                    }
                    Err(source) => {
                        return Err(IngestError::CacheLoad {
                            path: path.to_path_buf(),
                            source,
                        });
                    }
                }
            }

            on_event(&IngestEvent::Converting {
                input: request.input.clone(),
            });
            tracing::info!(input = %request.input, "converting document");
            self.backend
                .convert(request)
                .map_err(|source| IngestError::Conversion {
                    input: request.input.clone(),
                    source,
                })
        })?;

        let page_count = document.page_count();
        let persist = match (fresh, origin) {
            (false, _) => {
                tracing::debug!(input = %request.input, "reusing converted document");
                on_event(&IngestEvent::Reused { page_count });
                location.filter(|path| !path.exists())
            }
            (true, Origin::Loaded(path)) => {
                tracing::info!(path = %path.display(), pages = page_count, "loaded conversion cache");
                on_event(&IngestEvent::LoadedFromCache { path, page_count });
                None
            }
            (true, Origin::Converted) => {
                tracing::info!(input = %request.input, pages = page_count, "converted document");
                on_event(&IngestEvent::Converted { page_count });
                location
            }
        };

        if let Some(path) = persist {
            snapshot::save(&*document, path, options.pretty).map_err(|source| IngestError::CacheWrite {
                path: path.to_path_buf(),
                source,
            })?;
            tracing::info!(path = %path.display(), "saved conversion cache");
            on_event(&IngestEvent::SnapshotSaved {
                path: path.to_path_buf(),
            });
        } else if options.write && location.is_none() {
            tracing::debug!("snapshot write requested without a location");
        }

        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeBackend;
    use parking_lot::Mutex;
    use std::fs;
    use tempfile::TempDir;

    fn recorded(
        cache: &ConversionCache<FakeBackend>,
        request: &ConversionRequest,
        options: &SnapshotOptions,
    ) -> (Result<Arc<crate::test_support::FakeDocument>, IngestError>, Vec<IngestEvent>) {
        let events = Mutex::new(Vec::new());
        let result = cache.acquire_with_progress(request, options, |e| events.lock().push(e.clone()));
        (result, events.into_inner())
    }

    #[test]
    fn test_at_most_one_conversion_without_path() {
        let cache = ConversionCache::new(FakeBackend::new(3));
        let request = ConversionRequest::new("doc.pdf");

        let first = cache.acquire(&request, &SnapshotOptions::none()).unwrap();
        for _ in 0..4 {
            let again = cache.acquire(&request, &SnapshotOptions::none()).unwrap();
            assert!(Arc::ptr_eq(&first, &again));
        }
        assert_eq!(cache.backend().conversions(), 1);
        assert_eq!(cache.memo().len(), 1);
    }

    #[test]
    fn test_distinct_requests_convert_separately() {
        let cache = ConversionCache::new(FakeBackend::new(3));
        cache.acquire(&ConversionRequest::new("a.pdf"), &SnapshotOptions::none()).unwrap();
        cache
            .acquire(&ConversionRequest::new("a.pdf").with_workers(4), &SnapshotOptions::none())
            .unwrap();
        assert_eq!(cache.backend().conversions(), 2);
    }

    #[test]
    fn test_fresh_conversion_events_and_save() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/doc.json");
        let cache = ConversionCache::new(FakeBackend::new(2));

        let (result, events) = recorded(&cache, &ConversionRequest::new("doc.pdf"), &SnapshotOptions::at(&path));
        result.unwrap();
        assert_eq!(
            events,
            vec![
                IngestEvent::Converting {
                    input: "doc.pdf".into()
                },
                IngestEvent::Converted { page_count: 2 },
                IngestEvent::SnapshotSaved { path: path.clone() },
            ]
        );
        assert!(path.exists());
    }

    #[test]
    fn test_snapshot_hit_skips_backend() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        let request = ConversionRequest::new("doc.pdf");

        let first = ConversionCache::new(FakeBackend::new(2));
        first.acquire(&request, &SnapshotOptions::at(&path)).unwrap();
        let bytes = fs::read(&path).unwrap();

        let second = ConversionCache::new(FakeBackend::new(2));
        let (result, events) = recorded(&second, &request, &SnapshotOptions::at(&path));
        assert_eq!(result.unwrap().page_count(), 2);
        assert_eq!(second.backend().conversions(), 0);
        assert_eq!(
            events,
            vec![IngestEvent::LoadedFromCache {
                path: path.clone(),
                page_count: 2
            }]
        );
        assert_eq!(fs::read(&path).unwrap(), bytes);
    }

    #[test]
    fn test_loaded_snapshot_is_shared_by_later_calls() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        let request = ConversionRequest::new("doc.pdf");
        ConversionCache::new(FakeBackend::new(2))
            .acquire(&request, &SnapshotOptions::at(&path))
            .unwrap();

        let cache = ConversionCache::new(FakeBackend::new(2));
        let a = cache.acquire(&request, &SnapshotOptions::at(&path)).unwrap();
        let (b, events) = recorded(&cache, &request, &SnapshotOptions::at(&path));
        assert!(Arc::ptr_eq(&a, &b.unwrap()));
        assert_eq!(events, vec![IngestEvent::Reused { page_count: 2 }]);
        assert_eq!(cache.backend().conversions(), 0);
    }

    #[test]
    fn test_corruption_with_fallback_regenerates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        let request = ConversionRequest::new("doc.pdf");

        let reference = ConversionCache::new(FakeBackend::new(3));
        let uncached = reference.acquire(&request, &SnapshotOptions::at(&path)).unwrap();
        let full = fs::read(&path).unwrap();
        fs::write(&path, &full[..full.len() / 3]).unwrap();
        let truncated_len = fs::metadata(&path).unwrap().len();

        let cache = ConversionCache::new(FakeBackend::new(3));
        let options = SnapshotOptions::at(&path).with_fallback(true);
        let (result, events) = recorded(&cache, &request, &options);
        let document = result.unwrap();

        assert_eq!(cache.backend().conversions(), 1);
        assert!(fs::metadata(&path).unwrap().len() > truncated_len);
        assert_eq!(*document, *uncached);
        assert!(matches!(events[0], IngestEvent::Converting { .. }));
        assert!(matches!(events.last(), Some(IngestEvent::SnapshotSaved { .. })));
    }

    #[test]
    fn test_corruption_without_fallback_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        fs::write(&path, b"{ not json").unwrap();

        let cache = ConversionCache::new(FakeBackend::new(3));
        let err = cache
            .acquire(&ConversionRequest::new("doc.pdf"), &SnapshotOptions::at(&path))
            .unwrap_err();
        assert_eq!(err.stage(), "cache load");
        assert!(err.to_string().contains("doc.json"));
        assert_eq!(cache.backend().conversions(), 0);
    }

    #[test]
    fn test_backend_failure_is_conversion_error() {
        let cache = ConversionCache::new(FakeBackend::failing("model missing"));
        let (result, events) = recorded(&cache, &ConversionRequest::new("doc.pdf"), &SnapshotOptions::none());
        let err = result.unwrap_err();
        assert_eq!(err.stage(), "conversion");
        assert!(err.to_string().contains("model missing"));
        assert_eq!(events.len(), 1);
        assert!(cache.memo().is_empty());
    }

    #[test]
    fn test_write_flag_uses_default_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache/default.json");
        let options = SnapshotOptions::none().with_write(true).with_default_path(&path);
        assert_eq!(options.location(), Some(path.as_path()));

        let cache = ConversionCache::new(FakeBackend::new(1));
        cache.acquire(&ConversionRequest::new("doc.pdf"), &options).unwrap();
        assert!(path.exists());

        assert_eq!(SnapshotOptions::none().with_default_path(&path).location(), None);
    }

    #[test]
    fn test_memo_hit_writes_missing_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("late.json");
        let request = ConversionRequest::new("doc.pdf");
        let cache = ConversionCache::new(FakeBackend::new(1));

        cache.acquire(&request, &SnapshotOptions::none()).unwrap();
        let (result, events) = recorded(&cache, &request, &SnapshotOptions::at(&path));
        result.unwrap();
        assert!(path.exists());
        assert_eq!(
            events,
            vec![
                IngestEvent::Reused { page_count: 1 },
                IngestEvent::SnapshotSaved { path: path.clone() },
            ]
        );
        assert_eq!(cache.backend().conversions(), 1);
    }
}
