//! # edgequake-pdfprep
//!
//! Resumable batch preprocessing of PDF documents through external tools.
//!
//! ## Why this crate?
//!
//! Preparing scanned or mixed-content PDFs for downstream use takes a long
//! chain of heavyweight transformations (color normalisation, layer
//! separation, text extraction, rasterisation, merging, optimisation), each
//! performed by an external tool that can be slow, flaky or simply hang.
//! A batch of hundreds of documents will crash part-way through. This crate
//! makes that survivable: every intermediate result lives in a
//! rediscoverable per-stage directory, every stage is judged by whether its
//! expected output files exist, and a restarted batch picks up exactly where
//! the previous one stopped.
//!
//! ## Pipeline Overview
//!
//! ```text
//! source.pdf
//!  │
//!  ├─ 1. Split            fixed-size parts 0001.pdf, 0002.pdf, …
//!  ├─ 2. Normalise        sRGB, then vector/text/image layers (per part)
//!  ├─ 3. Foreground       text-only parts → text.pdf
//!  ├─ 4. Background       text removed, rasterised → back.pdf
//!  ├─ 5. Merge layers     text.pdf over back.pdf → merged.pdf
//!  └─ 6. Optimise         final/{source}_final.pdf (written atomically)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdfprep::{run_batch, CommandDriver, PdfiumPageCounter, PipelineConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let driver = CommandDriver::from_file("driver.json").await?;
//!     let config = PipelineConfig::default();
//!     let report = run_batch(
//!         "/data/scans",
//!         &config,
//!         Arc::new(driver),
//!         Arc::new(PdfiumPageCounter::new()),
//!     )
//!     .await?;
//!     eprintln!("{} completed, {} failed", report.completed(), report.failed());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfprep` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-pdfprep = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod driver;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod render;
pub mod stage;
pub mod wait;
pub mod workspace;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{discover_inputs, run_batch};
pub use config::{
    BackoffPolicy, PageSelection, PipelineConfig, PipelineConfigBuilder, RenderConfig,
    RenderConfigBuilder, RetryPolicy, Scale,
};
pub use driver::{
    CommandDriver, CommandSpec, Operation, PageCounter, PdfiumPageCounter, TransformDriver,
};
pub use error::{DriverError, ItemError, PrepError, RenderError, StageError, ViewerError};
pub use output::{BatchReport, ItemOutcome, ItemReport, PageRender, RenderedDocument, RenderedPage};
pub use pipeline::{Pipeline, Step};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use render::{Escalation, RenderAttemptState, RenderController, ViewerLauncher, ViewerSession};
pub use stage::{ExpectedOutputs, StageRun, StageRunner};
pub use workspace::{StageKey, WorkspaceManager};
