//! Backend capability detection and worker-count resolution.
//!
//! Detection is pure given its inputs: platform name, backend probe,
//! environment overrides and CPU count are all injectable, and
//! [`CapabilityProbe::new`] fills them from the running process.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::BackendProbe;
use crate::config::{self, EnvOverrides};

// =============================================================================
// Types
// =============================================================================

/// How the platform creates workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartMode {
    /// Workers start as duplicates of the running process, sharing loaded state.
    Fork,
    /// Workers bootstrap fresh and cannot assume any parent state.
    Spawn,
}

impl StartMode {
    /// Start mode used on `platform` (`std::env::consts::OS` or a Python-style
    /// platform tag such as `win32`).
    pub fn for_platform(platform: &str) -> Self {
        match platform {
            "macos" | "darwin" | "windows" | "win32" | "ios" => Self::Spawn,
            _ => Self::Fork,
        }
    }

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fork => "fork",
            Self::Spawn => "spawn",
        }
    }
}

impl fmt::Display for StartMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the backend and platform allow for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendCapabilities {
    /// Whether pages may be extracted by parallel workers.
    pub parallel_safe: bool,
    /// Upper bound on useful workers.
    pub max_workers: usize,
    /// Worker start mode of the platform.
    pub start_mode: StartMode,
    /// Platform name.
    pub platform: String,
    /// Backend version, when known.
    pub backend_version: Option<String>,
    /// Human-readable explanations of each decision.
    pub notes: Vec<String>,
}

impl BackendCapabilities {
    /// Capabilities with the given safety and bound on the current platform.
    pub fn new(parallel_safe: bool, max_workers: usize) -> Self {
        let platform = std::env::consts::OS;
        Self {
            parallel_safe,
            max_workers,
            start_mode: StartMode::for_platform(platform),
            platform: platform.to_string(),
            backend_version: None,
            notes: Vec::new(),
        }
    }
}

// =============================================================================
// Detection
// =============================================================================

/// Inputs to capability detection.
#[derive(Debug, Clone)]
pub struct CapabilityProbe {
    platform: String,
    backend: BackendProbe,
    overrides: EnvOverrides,
    cpu_count: Option<usize>,
    ceiling: usize,
}

impl Default for CapabilityProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityProbe {
    /// Probe of the running process, with a default (constructible) backend.
    pub fn new() -> Self {
        Self {
            platform: std::env::consts::OS.to_string(),
            backend: BackendProbe::default(),
            overrides: EnvOverrides::from_env(),
            cpu_count: std::thread::available_parallelism().ok().map(|n| n.get()),
            ceiling: config::get().max_workers_ceiling,
        }
    }

    /// Use a specific platform name.
    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    /// Use the result of probing the backend.
    pub fn backend(mut self, probe: BackendProbe) -> Self {
        self.backend = probe;
        self
    }

    /// Declare the backend version.
    pub fn backend_version(mut self, version: impl Into<String>) -> Self {
        self.backend.version = Some(version.into());
        self
    }

    /// Use explicit environment overrides.
    pub fn overrides(mut self, overrides: EnvOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Use a specific CPU count (`None` when undeterminable).
    pub fn cpu_count(mut self, count: Option<usize>) -> Self {
        self.cpu_count = count;
        self
    }

    /// Use a specific worker ceiling.
    pub fn ceiling(mut self, ceiling: usize) -> Self {
        self.ceiling = ceiling;
        self
    }

    /// Decide parallel safety and the worker bound.
    pub fn detect(&self) -> BackendCapabilities {
        let mut notes = Vec::new();
        let start_mode = StartMode::for_platform(&self.platform);

        let mut parallel_safe = start_mode == StartMode::Fork;
        if !parallel_safe {
            notes.push(format!("Parallel workers not safe on platform {}", self.platform));
        }
        if let Some(forced) = self.overrides.safe_fork {
            parallel_safe = forced;
            notes.push(format!("Parallel safety overridden by environment: {forced}"));
        }

        if !self.backend.constructible {
            parallel_safe = false;
            notes.push("Conversion backend cannot be constructed; parallel extraction disabled".to_string());
        }
        if self.backend.version.is_none() {
            notes.push("Backend version not available".to_string());
        }

        let max_workers = match self.cpu_count {
            Some(cpus) => cpus.min(self.ceiling),
            None => {
                notes.push("Could not determine CPU count, defaulting to 1 worker".to_string());
                1
            }
        };

        BackendCapabilities {
            parallel_safe,
            max_workers,
            start_mode,
            platform: self.platform.clone(),
            backend_version: self.backend.version.clone(),
            notes,
        }
    }
}

/// Detect capabilities for `platform` with the running process's CPU count.
pub fn detect(platform: &str, backend: &BackendProbe, overrides: &EnvOverrides) -> BackendCapabilities {
    CapabilityProbe::new()
        .platform(platform)
        .backend(backend.clone())
        .overrides(overrides.clone())
        .detect()
}

// =============================================================================
// Worker Resolution
// =============================================================================

/// Clamp a requested worker count against capabilities and page count.
///
/// Returns the effective count (always at least 1) and every clamp that
/// applied, in order.
pub fn resolve_effective_workers(
    requested: usize,
    caps: &BackendCapabilities,
    total_pages: Option<usize>,
) -> (usize, Vec<String>) {
    if requested <= 1 {
        return (1, Vec::new());
    }
    if !caps.parallel_safe {
        return (1, vec!["Backend does not support parallel page extraction".to_string()]);
    }

    let mut effective = requested;
    let mut reasons = Vec::new();

    if effective > caps.max_workers {
        effective = caps.max_workers;
        reasons.push(format!("Clamped to backend maximum of {} workers", caps.max_workers));
    }
    if let Some(total) = total_pages
        && effective > total
    {
        effective = total;
        reasons.push(format!("Clamped to page count of {total}"));
    }
    if effective < 1 {
        effective = 1;
        reasons.push("Forced minimum of 1 worker".to_string());
    }

    (effective, reasons)
}

fn worker_summary(requested: usize, effective: usize) -> String {
    let noun = if effective == 1 { "worker" } else { "workers" };
    if requested == effective {
        format!("Workers: using {effective} {noun} for page-level CPU-bound stages")
    } else {
        format!("Workers: requested {requested}, using {effective} {noun} for page-level CPU-bound stages")
    }
}

/// Log the outcome of [`resolve_effective_workers`].
///
/// Reasons are warnings when parallelism was lost entirely and informational
/// otherwise; capability notes go to debug.
pub fn log_worker_resolution(
    requested: usize,
    effective: usize,
    reasons: &[String],
    caps: &BackendCapabilities,
    pages: Option<usize>,
) {
    tracing::info!("{}", worker_summary(requested, effective));

    let downgraded = requested > 1 && effective == 1;
    for reason in reasons {
        if downgraded {
            tracing::warn!("Worker downgrade: {reason}");
        } else {
            tracing::info!("Worker adjustment: {reason}");
        }
    }

    tracing::debug!(
        platform = %caps.platform,
        start_mode = %caps.start_mode,
        backend = caps.backend_version.as_deref().unwrap_or("unknown"),
        pages = ?pages,
        "worker resolution context"
    );
    for note in &caps.notes {
        tracing::debug!("Backend capability note: {note}");
    }
}
