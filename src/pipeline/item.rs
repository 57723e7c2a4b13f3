//! Per-item orchestration.
//!
//! [`Pipeline::process_item`] walks one input document through every
//! [`Step`]. It holds no state of its own between runs: progress lives
//! entirely in the stage directories, so calling it again after a crash
//! picks up at the first step whose outputs are missing.

use super::parts::{
    background_dir, part_file_name, part_paths, raster_file_name, stripping_file_name,
    verify_parts, SplitManifest,
};
use super::Step;
use crate::config::PipelineConfig;
use crate::driver::{Operation, PageCounter, TransformDriver};
use crate::error::{DriverError, ItemError, StageError};
use crate::output::ItemOutcome;
use crate::progress::BatchProgressCallback;
use crate::stage::{exists, ExpectedOutputs, StageRunner};
use crate::workspace::{StageKey, WorkspaceManager};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Suffix of final artifacts: `{item}_final.pdf`.
pub const FINAL_SUFFIX: &str = "_final.pdf";

/// Foreground (text-only) document in the merge directory.
pub const FOREGROUND_FILE: &str = "text.pdf";
/// Background (rasterised) document in the merge directory.
pub const BACKGROUND_FILE: &str = "back.pdf";
/// Foreground laid over background, before optimisation.
pub const MERGED_FILE: &str = "merged.pdf";

/// Runs work items through the preprocessing steps.
///
/// One instance serves a whole batch; items are processed one at a time.
pub struct Pipeline {
    workspace: WorkspaceManager,
    runner: StageRunner,
    driver: Arc<dyn TransformDriver>,
    counter: Arc<dyn PageCounter>,
    config: PipelineConfig,
    final_dir: PathBuf,
}

impl Pipeline {
    pub fn new(
        workspace: WorkspaceManager,
        driver: Arc<dyn TransformDriver>,
        counter: Arc<dyn PageCounter>,
        config: PipelineConfig,
    ) -> Self {
        let runner = StageRunner::new(
            config.retry.clone(),
            config.output_wait,
            config.poll_interval,
        );
        let final_dir = config
            .final_dir
            .clone()
            .unwrap_or_else(|| workspace.root().join("final"));
        Self {
            workspace,
            runner,
            driver,
            counter,
            config,
            final_dir,
        }
    }

    pub fn workspace(&self) -> &WorkspaceManager {
        &self.workspace
    }

    pub fn final_dir(&self) -> &Path {
        &self.final_dir
    }

    /// Where the final artifact of `item` is written.
    pub fn final_artifact_path(&self, item: &str) -> PathBuf {
        self.final_dir.join(format!("{item}{FINAL_SUFFIX}"))
    }

    /// The work item name of an input document: its file stem.
    pub fn item_name(source: &Path) -> Option<String> {
        source.file_stem()?.to_str().map(str::to_owned)
    }

    /// Run every step for `source`, skipping whatever is already done.
    ///
    /// Returns [`ItemOutcome::Skipped`] without touching the workspace when
    /// the final artifact already exists. On error the item's stage
    /// directories are left as they are, so the next run resumes.
    pub async fn process_item(&self, source: &Path) -> Result<ItemOutcome, ItemError> {
        let item = Self::item_name(source).ok_or_else(|| ItemError::InvalidName {
            path: source.to_path_buf(),
        })?;

        let final_artifact = self.final_artifact_path(&item);
        if exists(&final_artifact).await {
            info!(
                "{} already exists, skipping {}",
                final_artifact.display(),
                item
            );
            return Ok(ItemOutcome::Skipped { final_artifact });
        }

        info!("Preprocessing {}", source.display());
        let mut resumed = Vec::new();
        let ws = &self.workspace;

        // ── Step 1: Split into parts ─────────────────────────────────────
        let page_dir = ws.acquire(&item, StageKey::Page).await?;
        let parts = self
            .step(&item, Step::Split, &mut resumed, self.split(source, &page_dir))
            .await?;
        info!("{}: {} part(s)", item, parts);

        // ── Step 2: Per-part color normalisation and layer split ─────────
        let srgb_dir = ws.acquire(&item, StageKey::Srgb).await?;
        self.step(
            &item,
            Step::ColorNormalize,
            &mut resumed,
            self.per_part(Step::ColorNormalize, Operation::ConvertSrgb, &page_dir, &srgb_dir, parts),
        )
        .await?;

        let vti_dir = ws.acquire(&item, StageKey::Vti).await?;
        self.step(
            &item,
            Step::LayerSplit,
            &mut resumed,
            self.per_part(Step::LayerSplit, Operation::SplitLayers, &srgb_dir, &vti_dir, parts),
        )
        .await?;

        // ── Step 3: Foreground (text) branch ─────────────────────────────
        // Runs before text removal, which starts from the same vti parts.
        let text_dir = ws.acquire(&item, StageKey::Text).await?;
        self.step(
            &item,
            Step::TextExtract,
            &mut resumed,
            self.per_part(Step::TextExtract, Operation::ExtractText, &vti_dir, &text_dir, parts),
        )
        .await?;

        let merge_dir = ws.acquire(&item, StageKey::Merge).await?;
        let foreground = merge_dir.join(FOREGROUND_FILE);
        let text_parts = part_paths(&text_dir, parts);
        self.step(
            &item,
            Step::MergeForeground,
            &mut resumed,
            self.merge(Step::MergeForeground, &text_parts, &foreground),
        )
        .await?;

        // ── Step 4: Background (raster) branch ───────────────────────────
        let back_dir = self
            .step(
                &item,
                Step::RemoveText,
                &mut resumed,
                self.remove_text(&vti_dir, parts),
            )
            .await?;

        let tiff_dir = ws.acquire(&item, StageKey::Tiff).await?;
        let rasters = self
            .step(
                &item,
                Step::Rasterize,
                &mut resumed,
                self.rasterize(&back_dir, &tiff_dir, parts),
            )
            .await?;

        let background = merge_dir.join(BACKGROUND_FILE);
        self.step(
            &item,
            Step::MergeBackground,
            &mut resumed,
            self.merge(Step::MergeBackground, &rasters, &background),
        )
        .await?;

        // ── Step 5: Combine and optimise ─────────────────────────────────
        let merged = merge_dir.join(MERGED_FILE);
        self.step(
            &item,
            Step::MergeLayers,
            &mut resumed,
            self.merge_layers(&foreground, &background, &merged),
        )
        .await?;

        self.step(
            &item,
            Step::Optimize,
            &mut resumed,
            self.optimize(&merged, &final_artifact),
        )
        .await?;
        info!("Wrote {}", final_artifact.display());

        // ── Step 6: Release intermediates ────────────────────────────────
        if self.config.keep_intermediates {
            debug!("Keeping stage directories of {}", item);
        } else if let Err(e) = ws.release(&item, &StageKey::ALL).await {
            // The final artifact is durable; a later run skips this item.
            warn!("{}: could not release stage directories: {}", item, e);
        }

        Ok(ItemOutcome::Completed {
            final_artifact,
            resumed_steps: resumed,
        })
    }

    /// Run one step body, with logging and progress events around it.
    ///
    /// The body returns its value plus whether every invocation was skipped.
    async fn step<T>(
        &self,
        item: &str,
        step: Step,
        resumed: &mut Vec<Step>,
        body: impl Future<Output = Result<(T, bool), ItemError>>,
    ) -> Result<T, ItemError> {
        self.notify(|cb| cb.on_step_start(item, step));
        debug!("{}: {}", item, step);

        let (value, skipped) = body.await?;
        if skipped {
            debug!("{}: {} already done", item, step);
            resumed.push(step);
        }
        self.notify(|cb| cb.on_step_complete(item, step, skipped));
        Ok(value)
    }

    fn notify(&self, f: impl FnOnce(&dyn BatchProgressCallback)) {
        if let Some(ref cb) = self.config.progress_callback {
            f(cb.as_ref());
        }
    }

    /// Split `source` into `page_dir` and return the part count.
    ///
    /// The manifest is only written once the driver's parts are verified
    /// contiguous, so a half-finished split is retried instead of trusted.
    async fn split(&self, source: &Path, page_dir: &Path) -> Result<(usize, bool), ItemError> {
        let driver = self.driver.as_ref();
        let expected = ExpectedOutputs::single(SplitManifest::path(page_dir));

        let run = self
            .runner
            .run(Step::Split.as_str(), &expected, move || async move {
                let count = driver.split(source, page_dir).await?;
                if count == 0 {
                    return Err(DriverError::Failed {
                        operation: Operation::Split.to_string(),
                        detail: format!("no parts written for '{}'", source.display()),
                    });
                }
                match verify_parts(page_dir, count).await {
                    Ok(()) => SplitManifest { parts: count }
                        .store(page_dir)
                        .await
                        .map_err(|e| DriverError::Failed {
                            operation: Operation::Split.to_string(),
                            detail: format!("cannot record part manifest: {e}"),
                        }),
                    Err(detail) => {
                        warn!("split of {}: {}", source.display(), detail);
                        Ok(())
                    }
                }
            })
            .await
            .map_err(stage_err(Step::Split))?;

        let manifest = SplitManifest::load(page_dir)
            .await
            .map_err(|e| ItemError::InvalidSplit {
                dir: page_dir.to_path_buf(),
                detail: e.to_string(),
            })?;
        if manifest.parts == 0 {
            return Err(ItemError::InvalidSplit {
                dir: page_dir.to_path_buf(),
                detail: "manifest records zero parts".into(),
            });
        }
        Ok((manifest.parts, run.was_skipped()))
    }

    /// Apply `op` to every part, `input_dir/{i:04}.pdf` → `output_dir/{i:04}.pdf`.
    async fn per_part(
        &self,
        step: Step,
        op: Operation,
        input_dir: &Path,
        output_dir: &Path,
        parts: usize,
    ) -> Result<((), bool), ItemError> {
        let driver = self.driver.as_ref();
        let mut all_skipped = true;

        for index in 1..=parts {
            let name = part_file_name(index);
            let input = input_dir.join(&name);
            let expected = ExpectedOutputs::single(output_dir.join(&name));
            let input = input.as_path();

            let run = self
                .runner
                .run(&format!("{step} {index:04}"), &expected, move || {
                    driver.transform(op, input, output_dir)
                })
                .await
                .map_err(stage_err(step))?;
            all_skipped &= run.was_skipped();
        }
        Ok(((), all_skipped))
    }

    async fn merge(&self, step: Step, inputs: &[PathBuf], output: &Path) -> Result<((), bool), ItemError> {
        let driver = self.driver.as_ref();
        let run = self
            .runner
            .run(step.as_str(), &ExpectedOutputs::single(output), move || {
                driver.merge(inputs, output)
            })
            .await
            .map_err(stage_err(step))?;
        Ok(((), run.was_skipped()))
    }

    /// Strip the text layer of every vti part into `{vti}/background/`.
    ///
    /// Each part is copied to a working file, stripped there and renamed to
    /// `background/{i:04}.pdf`. The rename is the step's completion record,
    /// so a part is never stripped twice and the vti parts stay as the text
    /// branch read them.
    async fn remove_text(&self, vti_dir: &Path, parts: usize) -> Result<(PathBuf, bool), ItemError> {
        let driver = self.driver.as_ref();
        let back_dir = background_dir(vti_dir);
        tokio::fs::create_dir_all(&back_dir)
            .await
            .map_err(|source| ItemError::Workspace {
                path: back_dir.clone(),
                source,
            })?;
        let mut all_skipped = true;

        for index in 1..=parts {
            let part = vti_dir.join(part_file_name(index));
            let working = back_dir.join(stripping_file_name(index));
            let stripped = back_dir.join(part_file_name(index));
            let expected = ExpectedOutputs::single(&stripped);
            let (part, working, stripped) = (part.as_path(), working.as_path(), stripped.as_path());

            let run = self
                .runner
                .run(
                    &format!("{} {index:04}", Step::RemoveText),
                    &expected,
                    move || async move {
                        let io_failed = |what: &str, e: std::io::Error| DriverError::Failed {
                            operation: Operation::RemoveText.to_string(),
                            detail: format!("cannot {what} '{}': {e}", working.display()),
                        };
                        // A leftover working file may already be stripped.
                        tokio::fs::copy(part, working)
                            .await
                            .map_err(|e| io_failed("create", e))?;
                        driver.remove_text(working).await?;
                        tokio::fs::rename(working, stripped)
                            .await
                            .map_err(|e| io_failed("rename", e))
                    },
                )
                .await
                .map_err(stage_err(Step::RemoveText))?;
            all_skipped &= run.was_skipped();
        }
        Ok((back_dir, all_skipped))
    }

    /// Rasterise every text-free part and return all raster pages in
    /// (part, page) order.
    ///
    /// The expected outputs of part `i` come from its page count, not from
    /// listing the directory, so a missing page is detected.
    async fn rasterize(
        &self,
        back_dir: &Path,
        tiff_dir: &Path,
        parts: usize,
    ) -> Result<(Vec<PathBuf>, bool), ItemError> {
        let driver = self.driver.as_ref();
        let label = self.config.raster_label.as_str();
        let mut rasters = Vec::new();
        let mut all_skipped = true;

        for index in 1..=parts {
            let part = back_dir.join(part_file_name(index));
            let pages = self
                .counter
                .page_count(&part)
                .await
                .map_err(|e| ItemError::PageCount {
                    path: part.clone(),
                    detail: e.to_string(),
                })?;
            let outputs: Vec<PathBuf> = (1..=pages)
                .map(|page| tiff_dir.join(raster_file_name(index, label, page)))
                .collect();
            let expected = ExpectedOutputs::new(outputs.iter());
            let part = part.as_path();

            let run = self
                .runner
                .run(&format!("{} {index:04}", Step::Rasterize), &expected, move || {
                    driver.transform(Operation::Rasterize, part, tiff_dir)
                })
                .await
                .map_err(stage_err(Step::Rasterize))?;
            all_skipped &= run.was_skipped();
            rasters.extend(outputs);
        }
        Ok((rasters, all_skipped))
    }

    async fn merge_layers(
        &self,
        foreground: &Path,
        background: &Path,
        merged: &Path,
    ) -> Result<((), bool), ItemError> {
        let driver = self.driver.as_ref();
        let run = self
            .runner
            .run(
                Step::MergeLayers.as_str(),
                &ExpectedOutputs::single(merged),
                move || driver.overlay(foreground, background, merged),
            )
            .await
            .map_err(stage_err(Step::MergeLayers))?;
        Ok(((), run.was_skipped()))
    }

    /// Optimise into a staging file, then rename it into place.
    ///
    /// The final artifact path only ever holds a complete file, which is
    /// what lets the entry guard trust its existence.
    async fn optimize(&self, merged: &Path, final_artifact: &Path) -> Result<((), bool), ItemError> {
        tokio::fs::create_dir_all(&self.final_dir)
            .await
            .map_err(|source| ItemError::Workspace {
                path: self.final_dir.clone(),
                source,
            })?;

        let driver = self.driver.as_ref();
        let staging = final_artifact.with_extension("pdf.tmp");
        let staging_ref = staging.as_path();
        let run = self
            .runner
            .run(
                Step::Optimize.as_str(),
                &ExpectedOutputs::single(&staging),
                move || driver.optimize(merged, staging_ref),
            )
            .await
            .map_err(stage_err(Step::Optimize))?;

        tokio::fs::rename(&staging, final_artifact)
            .await
            .map_err(|source| ItemError::Stage {
                step: Step::Optimize,
                source: StageError::Io {
                    stage: Step::Optimize.to_string(),
                    path: final_artifact.to_path_buf(),
                    source,
                },
            })?;
        Ok(((), run.was_skipped()))
    }
}

fn stage_err(step: Step) -> impl FnOnce(StageError) -> ItemError {
    move |source| ItemError::Stage { step, source }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_name_is_file_stem() {
        assert_eq!(
            Pipeline::item_name(Path::new("/w/report.v2.pdf")).as_deref(),
            Some("report.v2")
        );
        assert_eq!(Pipeline::item_name(Path::new("/")), None);
    }

    #[test]
    fn staging_path_keeps_final_name() {
        let final_artifact = PathBuf::from("/w/final/report.v2_final.pdf");
        assert_eq!(
            final_artifact.with_extension("pdf.tmp"),
            PathBuf::from("/w/final/report.v2_final.pdf.tmp")
        );
    }
}
