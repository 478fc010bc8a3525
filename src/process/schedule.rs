//! Page scheduling: sequential or pooled, always in caller order.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::time::{Duration, Instant};

use super::context::{PageProcessingContext, PageProcessingResult, ParsedContent};
use crate::error::{PageError, ScheduleError};
use crate::options::PipelineOptions;

// =============================================================================
// Worker Trait
// =============================================================================

/// Processes one page from a self-contained context.
///
/// Implementations are shared by reference across pool threads and must not
/// rely on per-call mutable state.
pub trait PageWorker: Sync {
    /// Process one page.
    fn process_page(&self, ctx: &PageProcessingContext) -> Result<PageProcessingResult, PageError>;

    /// Whether a recognition backend with process-local state is in use.
    ///
    /// When true the scheduler never builds a pool.
    fn recognition_active(&self) -> bool {
        false
    }
}

// =============================================================================
// Execution Mode
// =============================================================================

/// Why a run is sequential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequentialReason {
    /// One effective worker.
    SingleWorker,
    /// A recognition backend is active.
    RecognitionActive,
    /// The worker pool could not be built.
    PoolUnavailable(String),
}

/// How a run's pages are executed. Chosen once, before any work starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Pages run one after another on the calling thread.
    Sequential(SequentialReason),
    /// Pages run on a pool of `workers` threads.
    Parallel {
        /// Pool size.
        workers: usize,
    },
}

impl ExecutionMode {
    /// Whether pages run on a pool.
    pub fn is_parallel(&self) -> bool {
        matches!(self, Self::Parallel { .. })
    }
}

/// The first failure seen in a discarded parallel attempt.
#[derive(Debug)]
pub struct ParallelFailure {
    /// 1-based page that failed first (in completion order).
    pub page_no: u32,
    /// What went wrong.
    pub error: PageError,
}

/// Result of [`PageScheduler::process_pages`].
#[derive(Debug)]
pub struct ScheduleOutcome {
    /// Assembled content, in the order of the selected page list.
    pub content: ParsedContent,
    /// Mode the run was planned with (or degraded to, if the pool failed).
    pub mode: ExecutionMode,
    /// Set when a parallel attempt was discarded in favor of a sequential rerun.
    pub fallback: Option<ParallelFailure>,
    /// Number of sequential passes over the page list.
    pub sequential_runs: usize,
    /// Wall time of the whole call.
    pub elapsed: Duration,
}

enum ParallelError {
    Pool(String),
    Page(ParallelFailure),
}

// =============================================================================
// PageScheduler
// =============================================================================

/// Fans page work out to a pool or runs it in order.
///
/// ```text
///             plan()
///               │
///   workers ≤ 1 ├──────────────► Sequential(SingleWorker)
///   recognition ├──────────────► Sequential(RecognitionActive)
///               └─► Parallel ──► pool build fails ──► Sequential(PoolUnavailable)
///                      │
///                      └─ any page fails ──► discard all, rerun everything sequentially
/// ```
///
/// Output order always equals the order of the selected page list.
pub struct PageScheduler<'w, W: PageWorker + ?Sized> {
    worker: &'w W,
    workers: usize,
}

impl<'w, W: PageWorker + ?Sized> PageScheduler<'w, W> {
    /// Scheduler for `worker` with an already resolved worker count.
    pub fn new(worker: &'w W, effective_workers: usize) -> Self {
        Self {
            worker,
            workers: effective_workers.max(1),
        }
    }

    /// Execution mode this scheduler will start in.
    pub fn plan(&self) -> ExecutionMode {
        if self.workers <= 1 {
            ExecutionMode::Sequential(SequentialReason::SingleWorker)
        } else if self.worker.recognition_active() {
            ExecutionMode::Sequential(SequentialReason::RecognitionActive)
        } else {
            ExecutionMode::Parallel { workers: self.workers }
        }
    }

    /// Process `selected` pages (1-based) and assemble their content.
    pub fn process_pages(
        &self,
        selected: &[u32],
        out_assets: &Path,
        options: &PipelineOptions,
    ) -> Result<ScheduleOutcome, ScheduleError> {
        let start = Instant::now();
        let contexts: Vec<_> = selected
            .iter()
            .map(|&page_no| PageProcessingContext::new(page_no, out_assets, options))
            .collect();

        let mut mode = self.plan();
        tracing::debug!(mode = ?mode, pages = contexts.len(), "page execution mode");

        let mut fallback = None;
        let mut sequential_runs = 0;
        let results = match mode {
            ExecutionMode::Sequential(_) => {
                sequential_runs += 1;
                self.run_sequential(&contexts)
                    .map_err(|(page_no, source)| ScheduleError::Page { page_no, source })?
            }
            ExecutionMode::Parallel { workers } => match self.run_parallel(&contexts, workers) {
                Ok(results) => results,
                Err(ParallelError::Pool(reason)) => {
                    tracing::warn!("worker pool unavailable ({reason}), processing pages sequentially");
                    mode = ExecutionMode::Sequential(SequentialReason::PoolUnavailable(reason));
                    sequential_runs += 1;
                    self.run_sequential(&contexts)
                        .map_err(|(page_no, source)| ScheduleError::Page { page_no, source })?
                }
                Err(ParallelError::Page(failure)) => {
                    tracing::warn!(
                        "Parallel processing failed, falling back to sequential processing of all {} pages",
                        contexts.len()
                    );
                    sequential_runs += 1;
                    let results = self.run_sequential(&contexts).map_err(|(page_no, source)| {
                        ScheduleError::FallbackFailed {
                            first_failed_page: failure.page_no,
                            page_no,
                            source,
                        }
                    })?;
                    fallback = Some(failure);
                    results
                }
            },
        };

        Ok(ScheduleOutcome {
            content: ParsedContent::from_results(results, out_assets),
            mode,
            fallback,
            sequential_runs,
            elapsed: start.elapsed(),
        })
    }

    fn run_sequential(
        &self,
        contexts: &[PageProcessingContext],
    ) -> Result<Vec<PageProcessingResult>, (u32, PageError)> {
        contexts
            .iter()
            .map(|ctx| run_unit(self.worker, ctx).map_err(|err| (ctx.page_no, err)))
            .collect()
    }

    #[cfg(feature = "batch")]
    fn run_parallel(
        &self,
        contexts: &[PageProcessingContext],
        workers: usize,
    ) -> Result<Vec<PageProcessingResult>, ParallelError> {
        use std::sync::mpsc;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("page-worker-{i}"))
            .build()
            .map_err(|e| ParallelError::Pool(e.to_string()))?;

        let (tx, rx) = mpsc::channel();
        let worker = self.worker;
        pool.scope(|scope| {
            for (index, ctx) in contexts.iter().cloned().enumerate() {
                let tx = tx.clone();
                scope.spawn(move |_| {
                    let result = run_unit(worker, &ctx);
                    // The receiver outlives the scope.
                    let _ = tx.send((index, ctx.page_no, result));
                });
            }
        });
        drop(tx);

        let mut completed = Vec::with_capacity(contexts.len());
        let mut first_failure = None;
        for (index, page_no, result) in rx {
            match result {
                Ok(result) => completed.push((index, result)),
                Err(error) => {
                    tracing::error!("Page {page_no} failed: {error}");
                    first_failure.get_or_insert(ParallelFailure { page_no, error });
                }
            }
        }

        match first_failure {
            Some(failure) => Err(ParallelError::Page(failure)),
            None => Ok(assemble(contexts.len(), completed)),
        }
    }

    #[cfg(not(feature = "batch"))]
    fn run_parallel(
        &self,
        _contexts: &[PageProcessingContext],
        _workers: usize,
    ) -> Result<Vec<PageProcessingResult>, ParallelError> {
        Err(ParallelError::Pool("built without the `batch` feature".to_string()))
    }
}

fn run_unit<W: PageWorker + ?Sized>(
    worker: &W,
    ctx: &PageProcessingContext,
) -> Result<PageProcessingResult, PageError> {
    panic::catch_unwind(AssertUnwindSafe(|| worker.process_page(ctx)))
        .unwrap_or_else(|payload| Err(PageError::Panicked(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Place results by their index in the selected page list.
///
/// `completed` may arrive in any order; the output follows the indices.
fn assemble<T>(len: usize, completed: impl IntoIterator<Item = (usize, T)>) -> Vec<T> {
    let mut slots: Vec<Option<T>> = (0..len).map(|_| None).collect();
    for (index, item) in completed {
        if let Some(slot) = slots.get_mut(index) {
            *slot = Some(item);
        }
    }
    slots.into_iter().flatten().collect()
}
