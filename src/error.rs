//! Error types for the edgequake-pdfprep library.
//!
//! Errors are split by how far they are allowed to travel:
//!
//! * [`PrepError`] — **Fatal**: the batch cannot run at all (unreadable
//!   workspace root, invalid configuration, broken driver config). Returned
//!   as `Err(PrepError)` from [`crate::batch::run_batch`].
//!
//! * [`ItemError`] — **Per item**: one document failed somewhere in its
//!   pipeline. Caught at the batch boundary and recorded in the
//!   [`crate::output::BatchReport`]; the batch moves on to the next document.
//!
//! * [`StageError`] — a single stage invocation failed after the stage
//!   runner's retries (or immediately, for automation failures).
//!
//! * [`DriverError`] / [`ViewerError`] — reported by the external
//!   collaborators. A [`ViewerError::Timeout`] is kept distinct because the
//!   render controller escalates on it instead of failing.
//!
//! * [`RenderError`] — a non-timeout viewer failure that escapes the render
//!   controller. Timeouts never do: past the give-up ceiling they turn into a
//!   `None` page result.

use crate::pipeline::Step;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdfprep library.
#[derive(Debug, Error)]
pub enum PrepError {
    /// The workspace root could not be listed.
    #[error("Cannot read workspace root '{path}': {source}")]
    WorkspaceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The final-output directory could not be created.
    #[error("Cannot create final output directory '{path}': {source}")]
    FinalDirUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The transform driver configuration file is missing or malformed.
    #[error("Invalid driver configuration '{path}': {detail}")]
    DriverConfig { path: PathBuf, detail: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Failure of one work item. Never aborts the batch.
#[derive(Debug, Error)]
pub enum ItemError {
    /// A stage failed; `step` names where the pipeline stopped.
    #[error("{step} failed: {source}")]
    Stage {
        step: Step,
        #[source]
        source: StageError,
    },

    /// A stage directory could not be scanned, created or removed.
    #[error("Workspace error at '{path}': {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The split stage produced an unusable page-part set.
    #[error("Split produced no usable page parts in '{dir}': {detail}")]
    InvalidSplit { dir: PathBuf, detail: String },

    /// Querying the page count of a part failed.
    #[error("Cannot count pages of '{path}': {detail}")]
    PageCount { path: PathBuf, detail: String },

    /// The input file name is not valid UTF-8 and cannot name stage directories.
    #[error("Input file name '{path}' cannot be used as an item name")]
    InvalidName { path: PathBuf },

    /// The pipeline code (or a driver) panicked while processing the item.
    #[error("Processing panicked: {0}")]
    Panicked(String),
}

impl ItemError {
    /// The pipeline step the item stopped at, when known.
    pub fn step(&self) -> Option<Step> {
        match self {
            ItemError::Stage { step, .. } => Some(*step),
            _ => None,
        }
    }
}

/// Typed failure of one [`crate::stage::StageRunner::run`] call.
#[derive(Debug, Error)]
pub enum StageError {
    /// The operation returned but did not produce its declared outputs,
    /// on every attempt.
    #[error("{stage}: {} expected output(s) missing after {attempts} attempt(s), first: '{}'",
        .missing.len(), first_path(.missing))]
    ExpectedOutputMissing {
        stage: String,
        missing: Vec<PathBuf>,
        attempts: u32,
    },

    /// The external driver reported an unrecoverable condition. Not retried.
    #[error("{stage}: {source}")]
    Automation {
        stage: String,
        #[source]
        source: DriverError,
    },

    /// A stage was declared with an empty expected-output set, which would
    /// make it indistinguishable from an already-completed stage.
    #[error("{stage}: no expected outputs declared")]
    NoExpectedOutputs { stage: String },

    /// Checking or finalising outputs hit an I/O error.
    #[error("{stage}: I/O error on '{path}': {source}")]
    Io {
        stage: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure reported by the document-transform driver (collaborator A).
#[derive(Debug, Error)]
pub enum DriverError {
    /// The operation ran and reported failure.
    #[error("{operation} failed: {detail}")]
    Failed { operation: String, detail: String },

    /// The operation did not finish within its hard wall-clock limit and
    /// was abandoned.
    #[error("{operation} did not finish within {secs}s")]
    TimedOut { operation: String, secs: u64 },

    /// The driver has no way to perform this operation.
    #[error("{operation} is not configured")]
    Unsupported { operation: String },

    /// Launching the external tool failed.
    #[error("{operation}: cannot launch '{program}': {source}")]
    Launch {
        operation: String,
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failure reported by the viewer driver (collaborator B).
#[derive(Debug, Error)]
pub enum ViewerError {
    /// Page load (or another wait) did not complete in time.
    #[error("Viewer timed out: {0}")]
    Timeout(String),

    /// The viewer refused an action or the page state could not be read.
    #[error("Viewer failure: {0}")]
    Failed(String),
}

impl ViewerError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ViewerError::Timeout(_))
    }
}

/// Non-timeout failure escaping [`crate::render::RenderController`].
#[derive(Debug, Error)]
pub enum RenderError {
    /// Launching a viewer session failed for a reason other than a timeout.
    #[error("Cannot open '{path}' in the viewer: {source}")]
    Launch {
        path: PathBuf,
        #[source]
        source: ViewerError,
    },

    /// The viewer failed on a page for a reason other than a timeout.
    #[error("Page {page}: {source}")]
    Page {
        page: usize,
        #[source]
        source: ViewerError,
    },

    /// The page count could not be read from the viewer.
    #[error("Cannot read page count: {0}")]
    PageCount(#[source] ViewerError),

    /// Opening the document kept timing out past the give-up ceiling.
    #[error("Gave up opening '{path}' after {attempts} timeouts")]
    GaveUpLaunch { path: PathBuf, attempts: u32 },
}

fn first_path(paths: &[PathBuf]) -> String {
    paths
        .first()
        .map(|p| p.display().to_string())
        .unwrap_or_default()
}

/// Render an error and its whole `source()` chain on one line.
///
/// Used when logging item failures so the root cause is never lost behind a
/// wrapper variant. Sources whose message is already embedded in the outer
/// message are not repeated.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut cur = err.source();
    while let Some(src) = cur {
        let msg = src.to_string();
        if !out.contains(&msg) {
            out.push_str(": ");
            out.push_str(&msg);
        }
        cur = src.source();
    }
    out
}
