//! Per-stage intermediate directories that survive restarts.
//!
//! Every (work item, stage) pair owns one directory directly under the
//! workspace root, named `{prefix}_{stage}_{token}` where `token` is 32
//! lowercase hex digits. The token only prevents collisions between runs; a
//! directory is always *found* by scanning for the `{prefix}_{stage}_` shape,
//! never by remembering its token. That is what makes a crashed run
//! resumable: the next run rediscovers the same directories and the stage
//! runner skips whatever they already contain.
//!
//! Directories are released only after the item's final artifact is on disk.

use crate::error::ItemError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identifies one intermediate directory of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StageKey {
    /// Page parts produced by the split (`0001.pdf`, …).
    Page,
    /// Color-normalised parts.
    Srgb,
    /// Parts with vector, text and image objects on separate layers.
    Vti,
    /// Text-only parts.
    Text,
    /// Rasterised background parts.
    Tiff,
    /// Foreground, background and merged documents.
    Merge,
}

impl StageKey {
    /// Every key, in pipeline order.
    pub const ALL: [StageKey; 6] = [
        StageKey::Page,
        StageKey::Srgb,
        StageKey::Vti,
        StageKey::Text,
        StageKey::Tiff,
        StageKey::Merge,
    ];

    /// The stage fragment used in directory names.
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKey::Page => "page",
            StageKey::Srgb => "srgb",
            StageKey::Vti => "vti",
            StageKey::Text => "text",
            StageKey::Tiff => "tiff",
            StageKey::Merge => "merge",
        }
    }
}

impl fmt::Display for StageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Allocates and rediscovers stage directories under one workspace root.
///
/// One instance is scoped to one batch run and passed to the pipeline by
/// reference; there is no process-wide directory state.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Regex matching directory names of `(prefix, key)`.
    pub fn dir_pattern(prefix: &str, key: StageKey) -> Regex {
        let pattern = format!("^{}_{}_[0-9a-f]{{32}}$", regex::escape(prefix), key.as_str());
        // An escaped literal followed by a fixed suffix is always a valid pattern.
        Regex::new(&pattern).unwrap_or_else(|e| unreachable!("invalid stage pattern {pattern}: {e}"))
    }

    /// Find every existing directory of `(prefix, key)`, sorted by name.
    async fn scan(&self, prefix: &str, key: StageKey) -> Result<Vec<PathBuf>, ItemError> {
        let pattern = Self::dir_pattern(prefix, key);
        let workspace_err = |source| ItemError::Workspace {
            path: self.root.clone(),
            source,
        };

        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(workspace_err)?;
        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(workspace_err)? {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if !pattern.is_match(&name) {
                continue;
            }
            if entry.file_type().await.map_err(workspace_err)?.is_dir() {
                found.push(entry.path());
            }
        }
        found.sort();
        Ok(found)
    }

    /// The canonical directory of `(prefix, key)`, if one exists.
    ///
    /// When several match (e.g. two runs raced), the lexicographically first
    /// one is canonical.
    pub async fn find(&self, prefix: &str, key: StageKey) -> Result<Option<PathBuf>, ItemError> {
        let found = self.scan(prefix, key).await?;
        if found.len() > 1 {
            warn!(
                "{} directories match {}_{}; using {}",
                found.len(),
                prefix,
                key,
                found[0].display()
            );
        }
        Ok(found.into_iter().next())
    }

    /// Return the directory of `(prefix, key)`, creating it if none exists.
    pub async fn acquire(&self, prefix: &str, key: StageKey) -> Result<PathBuf, ItemError> {
        if let Some(existing) = self.find(prefix, key).await? {
            debug!("Reusing stage directory {}", existing.display());
            return Ok(existing);
        }

        let token = Uuid::new_v4().simple().to_string();
        let dir = self.root.join(format!("{prefix}_{key}_{token}"));
        tokio::fs::create_dir(&dir)
            .await
            .map_err(|source| ItemError::Workspace {
                path: dir.clone(),
                source,
            })?;
        debug!("Created stage directory {}", dir.display());
        Ok(dir)
    }

    /// Recursively remove every directory of `prefix` for the given keys.
    ///
    /// Only call this once the item's final artifact is durably written.
    /// Returns the number of directories removed.
    pub async fn release(&self, prefix: &str, keys: &[StageKey]) -> Result<usize, ItemError> {
        let mut removed = 0;
        for &key in keys {
            for dir in self.scan(prefix, key).await? {
                tokio::fs::remove_dir_all(&dir)
                    .await
                    .map_err(|source| ItemError::Workspace {
                        path: dir.clone(),
                        source,
                    })?;
                removed += 1;
            }
        }
        info!("Released {} stage directories for {}", removed, prefix);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_directory_matches_naming_pattern() {
        let root = tempfile::tempdir().unwrap();
        let ws = WorkspaceManager::new(root.path());

        let dir = ws.acquire("doc1", StageKey::Srgb).await.unwrap();
        let name = dir.file_name().unwrap().to_str().unwrap().to_string();

        let re = Regex::new("^doc1_srgb_[0-9a-f]{32}$").unwrap();
        assert!(re.is_match(&name), "got: {name}");
        assert!(dir.is_dir());
    }

    #[tokio::test]
    async fn second_acquire_reuses_directory() {
        let root = tempfile::tempdir().unwrap();
        let ws = WorkspaceManager::new(root.path());

        let first = ws.acquire("doc1", StageKey::Srgb).await.unwrap();
        let second = ws.acquire("doc1", StageKey::Srgb).await.unwrap();
        assert_eq!(first, second);

        let count = std::fs::read_dir(root.path()).unwrap().count();
        assert_eq!(count, 1, "no duplicate directory may be created");
    }

    #[tokio::test]
    async fn prefixes_and_stages_do_not_collide() {
        let root = tempfile::tempdir().unwrap();
        let ws = WorkspaceManager::new(root.path());

        let a = ws.acquire("doc1", StageKey::Srgb).await.unwrap();
        let b = ws.acquire("doc10", StageKey::Srgb).await.unwrap();
        let c = ws.acquire("doc1", StageKey::Vti).await.unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn regex_metacharacters_in_prefix_are_literal() {
        let root = tempfile::tempdir().unwrap();
        let ws = WorkspaceManager::new(root.path());

        let token = "0123456789abcdef0123456789abcdef";
        std::fs::create_dir(root.path().join(format!("reportXv2_page_{token}"))).unwrap();

        assert!(ws.find("report.v2", StageKey::Page).await.unwrap().is_none());
        let dir = ws.acquire("report.v2", StageKey::Page).await.unwrap();
        assert!(dir.file_name().unwrap().to_str().unwrap().starts_with("report.v2_page_"));
    }

    #[tokio::test]
    async fn files_and_short_tokens_are_ignored() {
        let root = tempfile::tempdir().unwrap();
        let ws = WorkspaceManager::new(root.path());

        let token = "0123456789abcdef0123456789abcdef";
        std::fs::write(root.path().join(format!("doc_text_{token}")), b"not a dir").unwrap();
        std::fs::create_dir(root.path().join("doc_text_abc")).unwrap();

        assert!(ws.find("doc", StageKey::Text).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn release_removes_only_requested_item() {
        let root = tempfile::tempdir().unwrap();
        let ws = WorkspaceManager::new(root.path());

        for key in StageKey::ALL {
            let dir = ws.acquire("doc", key).await.unwrap();
            std::fs::write(dir.join("0001.pdf"), b"%PDF").unwrap();
        }
        let other = ws.acquire("other", StageKey::Page).await.unwrap();

        let removed = ws.release("doc", &StageKey::ALL).await.unwrap();
        assert_eq!(removed, StageKey::ALL.len());
        for key in StageKey::ALL {
            assert!(ws.find("doc", key).await.unwrap().is_none());
        }
        assert!(other.is_dir());
    }
}
