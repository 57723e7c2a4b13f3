//! Result types: the batch report and rendered-page results.

use crate::pipeline::Step;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ── Batch ────────────────────────────────────────────────────────────────

/// How one work item ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    /// The pipeline ran (possibly resuming) and wrote the final artifact.
    Completed {
        final_artifact: PathBuf,
        /// Steps whose outputs were all found on disk from a previous run.
        resumed_steps: Vec<Step>,
    },
    /// The final artifact already existed; nothing ran.
    Skipped { final_artifact: PathBuf },
    /// The item stopped. Its intermediates are left in place for the next run.
    Failed {
        /// Step the pipeline stopped at, when the failure was a stage failure.
        step: Option<Step>,
        error: String,
    },
}

impl ItemOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, ItemOutcome::Failed { .. })
    }
}

/// Report entry for one input document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemReport {
    /// Work item name (the input file stem).
    pub item: String,
    pub source: PathBuf,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
    pub duration_ms: u64,
}

/// Result of [`crate::batch::run_batch`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub root: PathBuf,
    pub items: Vec<ItemReport>,
    pub total_duration_ms: u64,
}

impl BatchReport {
    pub fn completed(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Completed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(ItemOutcome::is_failed)
    }

    fn count(&self, pred: impl Fn(&ItemOutcome) -> bool) -> usize {
        self.items.iter().filter(|i| pred(&i.outcome)).count()
    }
}

// ── Rendering ────────────────────────────────────────────────────────────

/// A page the viewer reported as fully rendered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedPage {
    /// 1-indexed page number.
    pub page_num: usize,
    /// Rendered size in pixels, as reported by the viewer.
    pub width: u32,
    pub height: u32,
    /// Text layer of the page, when the viewer exposes one.
    pub text: Option<String>,
}

/// Outcome of rendering one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRender {
    /// 1-indexed page number.
    pub page_num: usize,
    /// `None` when the page kept timing out past the give-up ceiling.
    pub page: Option<RenderedPage>,
    /// Attempts spent on this page, including the successful one.
    pub attempts: u32,
}

impl PageRender {
    pub fn gave_up(&self) -> bool {
        self.page.is_none()
    }
}

/// Result of [`crate::render::RenderController::render_document`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedDocument {
    pub document: PathBuf,
    /// Page count reported by the viewer.
    pub total_pages: usize,
    /// Selected pages, in page order.
    pub pages: Vec<PageRender>,
}

impl RenderedDocument {
    /// Pages that were abandoned after repeated timeouts.
    pub fn abandoned_pages(&self) -> Vec<usize> {
        self.pages
            .iter()
            .filter(|p| p.gave_up())
            .map(|p| p.page_num)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(outcomes: Vec<ItemOutcome>) -> BatchReport {
        BatchReport {
            root: PathBuf::from("/w"),
            items: outcomes
                .into_iter()
                .enumerate()
                .map(|(i, outcome)| ItemReport {
                    item: format!("doc{i}"),
                    source: PathBuf::from(format!("/w/doc{i}.pdf")),
                    outcome,
                    duration_ms: 1,
                })
                .collect(),
            total_duration_ms: 3,
        }
    }

    #[test]
    fn counts_by_outcome() {
        let r = report(vec![
            ItemOutcome::Completed {
                final_artifact: "/w/final/doc0_final.pdf".into(),
                resumed_steps: vec![],
            },
            ItemOutcome::Skipped {
                final_artifact: "/w/final/doc1_final.pdf".into(),
            },
            ItemOutcome::Failed {
                step: Some(Step::Rasterize),
                error: "boom".into(),
            },
        ]);
        assert_eq!((r.completed(), r.skipped(), r.failed()), (1, 1, 1));
    }

    #[test]
    fn report_serialises_flat_status() {
        let r = report(vec![ItemOutcome::Failed {
            step: Some(Step::MergeLayers),
            error: "overlay failed".into(),
        }]);
        let json = serde_json::to_value(&r).unwrap();
        let item = &json["items"][0];
        assert_eq!(item["status"], "failed");
        assert_eq!(item["step"], "merge-layers");
        assert_eq!(item["item"], "doc0");
    }

    #[test]
    fn abandoned_pages_are_listed() {
        let doc = RenderedDocument {
            document: "/w/a.pdf".into(),
            total_pages: 3,
            pages: vec![
                PageRender {
                    page_num: 1,
                    page: None,
                    attempts: 5,
                },
                PageRender {
                    page_num: 2,
                    page: Some(RenderedPage {
                        page_num: 2,
                        width: 10,
                        height: 10,
                        text: None,
                    }),
                    attempts: 1,
                },
            ],
        };
        assert_eq!(doc.abandoned_pages(), vec![1]);
    }
}
