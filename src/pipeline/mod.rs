//! The per-document preprocessing pipeline.
//!
//! One work item is one input PDF. Its pipeline is a fixed sequence of
//! [`Step`]s, each of which runs the transform driver through the
//! [`crate::stage::StageRunner`] so that a restarted batch skips whatever a
//! previous run already produced.
//!
//! ## Data Flow
//!
//! ```text
//!                    ┌─▶ text-extract ──▶ merge-foreground ─┐
//! source ─▶ split ─▶ color-normalize ─▶ layer-split          ├─▶ merge-layers ─▶ optimize ─▶ final
//!                    └─▶ remove-text ─▶ rasterize ─▶ merge-background ─┘
//! ```
//!
//! Text extraction reads the layer-split parts *before* text removal runs.
//! Removal strips a copy of each part and renames it into `vti/background/`,
//! so the `vti` parts themselves are never edited.
//!
//! 1. [`parts`] — part and raster naming, the split manifest
//! 2. [`item`]  — [`Pipeline`], the per-item orchestrator

pub mod item;
pub mod parts;

pub use item::Pipeline;

use serde::{Deserialize, Serialize};
use std::fmt;

/// One step of the per-item pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    /// Source document → fixed-size page parts.
    Split,
    /// Part → sRGB color space.
    ColorNormalize,
    /// Part → vector, text and image layers.
    LayerSplit,
    /// Layered part → text-only part.
    TextExtract,
    /// Text-only parts → one foreground document.
    MergeForeground,
    /// Layered part → copy without its text layer, in `vti/background/`.
    RemoveText,
    /// Text-free part → one raster page file per page.
    Rasterize,
    /// Raster pages → one background document.
    MergeBackground,
    /// Foreground over background → merged document.
    MergeLayers,
    /// Merged document → final artifact.
    Optimize,
}

impl Step {
    /// Every step, in execution order.
    pub const ALL: [Step; 10] = [
        Step::Split,
        Step::ColorNormalize,
        Step::LayerSplit,
        Step::TextExtract,
        Step::MergeForeground,
        Step::RemoveText,
        Step::Rasterize,
        Step::MergeBackground,
        Step::MergeLayers,
        Step::Optimize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Split => "split",
            Step::ColorNormalize => "color-normalize",
            Step::LayerSplit => "layer-split",
            Step::TextExtract => "text-extract",
            Step::MergeForeground => "merge-foreground",
            Step::RemoveText => "remove-text",
            Step::Rasterize => "rasterize",
            Step::MergeBackground => "merge-background",
            Step::MergeLayers => "merge-layers",
            Step::Optimize => "optimize",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
