//! The document-transform driver boundary.
//!
//! The pipeline never touches PDF bytes itself. Every transformation is an
//! opaque operation behind [`TransformDriver`]: the pipeline names the
//! operation, its input and where its output must land, then judges success
//! only by whether the expected files exist afterwards.
//!
//! Two implementations ship with the crate:
//!
//! * [`CommandDriver`] — runs one external command per operation from a JSON
//!   table of argv templates.
//! * [`PdfiumPageCounter`] — a [`PageCounter`] backed by pdfium, used to
//!   compute the expected raster outputs of each part.

pub mod command;
pub mod pdfium;

pub use command::{CommandDriver, CommandSpec};
pub use pdfium::PdfiumPageCounter;

use crate::error::DriverError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Operations a [`TransformDriver`] performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Split,
    ConvertSrgb,
    SplitLayers,
    ExtractText,
    RemoveText,
    Rasterize,
    Merge,
    Overlay,
    Optimize,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Split => "split",
            Operation::ConvertSrgb => "convert_srgb",
            Operation::SplitLayers => "split_layers",
            Operation::ExtractText => "extract_text",
            Operation::RemoveText => "remove_text",
            Operation::Rasterize => "rasterize",
            Operation::Merge => "merge",
            Operation::Overlay => "overlay",
            Operation::Optimize => "optimize",
        }
    }

    /// True for operations that [`TransformDriver::transform`] accepts.
    pub fn is_per_part(&self) -> bool {
        matches!(
            self,
            Operation::ConvertSrgb
                | Operation::SplitLayers
                | Operation::ExtractText
                | Operation::Rasterize
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Performs the opaque document operations of the pipeline.
///
/// Contract for implementations:
///
/// * write outputs only to the paths (or directory) given, under the file
///   names the pipeline documents for each operation;
/// * fail closed: on failure leave either every output of the call or none;
/// * never block without bound. A hung external tool must surface as
///   [`DriverError::TimedOut`].
///
/// Returning `Ok` is not taken as proof of success; the stage runner checks
/// the expected outputs regardless.
#[async_trait]
pub trait TransformDriver: Send + Sync {
    /// Split `source` into fixed-size parts `0001.pdf`, `0002.pdf`, … in
    /// `output_dir`. Returns the number of parts written.
    async fn split(&self, source: &Path, output_dir: &Path) -> Result<usize, DriverError>;

    /// Apply a per-part operation to `input`, writing into `output_dir`.
    ///
    /// For [`Operation::ConvertSrgb`], [`Operation::SplitLayers`] and
    /// [`Operation::ExtractText`] the output keeps the input's file name.
    /// For [`Operation::Rasterize`] part `i` with `n` pages yields
    /// `{i:04}_{label}_{1..=n}.pdf`.
    async fn transform(
        &self,
        op: Operation,
        input: &Path,
        output_dir: &Path,
    ) -> Result<(), DriverError>;

    /// Remove the text layer of `part` in place.
    async fn remove_text(&self, part: &Path) -> Result<(), DriverError>;

    /// Concatenate `inputs`, in order, into `output`.
    async fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<(), DriverError>;

    /// Lay `foreground` over `background` page by page into `output`.
    async fn overlay(
        &self,
        foreground: &Path,
        background: &Path,
        output: &Path,
    ) -> Result<(), DriverError>;

    /// Optimise `input` for size, writing `output`.
    async fn optimize(&self, input: &Path, output: &Path) -> Result<(), DriverError>;
}

/// Reports how many pages a PDF has.
#[async_trait]
pub trait PageCounter: Send + Sync {
    async fn page_count(&self, pdf: &Path) -> Result<usize, DriverError>;
}
