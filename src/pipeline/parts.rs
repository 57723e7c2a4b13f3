//! Page-part naming and the split manifest.
//!
//! Ordering across stages is carried by file names alone: part `i` is
//! `{i:04}.pdf` in every per-part stage directory, and the rasterised pages
//! of part `i` are `{i:04}_{label}_{j}.pdf`. No stage stores ordering
//! metadata; downstream stages rebuild the ordered path lists from the part
//! count recorded by the split.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Matches part file names: `0001.pdf`, `0042.pdf`, `10000.pdf`.
static PART_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4,})\.pdf$").unwrap_or_else(|e| unreachable!("{e}")));

/// File name of the manifest the split stage leaves in the page directory.
pub const SPLIT_MANIFEST: &str = "parts.json";

/// `%04d.pdf` for a 1-based part index.
pub fn part_file_name(index: usize) -> String {
    format!("{index:04}.pdf")
}

/// `%04d_<label>_%d.pdf` for page `page` (1-based) of part `part`.
pub fn raster_file_name(part: usize, label: &str, page: usize) -> String {
    format!("{part:04}_{label}_{page}.pdf")
}

/// Paths of parts `1..=count` in `dir`, in part order.
pub fn part_paths(dir: &Path, count: usize) -> Vec<PathBuf> {
    (1..=count).map(|i| dir.join(part_file_name(i))).collect()
}

/// Subdirectory of the layer-split stage directory holding the text-free
/// copies of the parts.
pub const BACKGROUND_SUBDIR: &str = "background";

/// Where the text-free copy of every part lives, `{vti}/background/`.
///
/// Text removal edits a copy of the part and renames it into this directory
/// when done, so the layer-split parts are never modified and an interrupted
/// removal restarts from the untouched part.
pub fn background_dir(vti_dir: &Path) -> PathBuf {
    vti_dir.join(BACKGROUND_SUBDIR)
}

/// Working copy of part `index` while its text layer is being removed.
pub fn stripping_file_name(index: usize) -> String {
    format!("{index:04}.stripping.pdf")
}

/// List the part files in `dir` as `(index, path)`, sorted by index.
pub async fn list_parts(dir: &Path) -> std::io::Result<Vec<(usize, PathBuf)>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut parts = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(caps) = PART_NAME.captures(name) else {
            continue;
        };
        if let Ok(index) = caps[1].parse::<usize>() {
            parts.push((index, entry.path()));
        }
    }
    parts.sort_by_key(|(i, _)| *i);
    Ok(parts)
}

/// Check that `dir` holds exactly the parts `1..=expected`.
pub async fn verify_parts(dir: &Path, expected: usize) -> Result<(), String> {
    let parts = list_parts(dir)
        .await
        .map_err(|e| format!("cannot list '{}': {e}", dir.display()))?;
    let indices: Vec<usize> = parts.iter().map(|(i, _)| *i).collect();
    let wanted: Vec<usize> = (1..=expected).collect();
    if indices == wanted {
        Ok(())
    } else {
        Err(format!(
            "expected parts 1..={expected}, found {} part file(s)",
            indices.len()
        ))
    }
}

/// Written by the split stage once every part is on disk.
///
/// Its presence is the split's completion marker, so a resumed run never
/// re-splits (and thereby never re-creates parts later stages depend on).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitManifest {
    pub parts: usize,
}

impl SplitManifest {
    pub fn path(dir: &Path) -> PathBuf {
        dir.join(SPLIT_MANIFEST)
    }

    pub async fn load(dir: &Path) -> std::io::Result<Self> {
        let raw = tokio::fs::read_to_string(Self::path(dir)).await?;
        serde_json::from_str(&raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Write the manifest atomically (temp file + rename).
    pub async fn store(&self, dir: &Path) -> std::io::Result<()> {
        let path = Self::path(dir);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!("Recorded {} parts in {}", self.parts, path.display());
        Ok(())
    }
}
