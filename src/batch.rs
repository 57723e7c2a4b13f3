//! Batch entry point: every `*.pdf` directly under a workspace root.
//!
//! Items run one after another. A failing item (error or panic) is logged
//! with its full error chain, recorded in the [`BatchReport`], and the batch
//! moves on; only problems that make the whole batch impossible surface as
//! [`PrepError`].

use crate::config::PipelineConfig;
use crate::driver::{PageCounter, TransformDriver};
use crate::error::{error_chain, ItemError, PrepError};
use crate::output::{BatchReport, ItemOutcome, ItemReport};
use crate::pipeline::Pipeline;
use crate::workspace::WorkspaceManager;
use futures::FutureExt;
use once_cell::sync::Lazy;
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// List the input documents of a batch: regular files directly under `root`
/// with a `.pdf` extension (any case), sorted by name.
pub async fn discover_inputs(root: &Path) -> Result<Vec<PathBuf>, PrepError> {
    let unreadable = |source| PrepError::WorkspaceUnreadable {
        path: root.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(root).await.map_err(unreadable)?;
    let mut inputs = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(unreadable)? {
        let path = entry.path();
        let is_pdf = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
        if !is_pdf || !entry.file_type().await.map_err(unreadable)?.is_file() {
            continue;
        }
        if Pipeline::item_name(&path).is_none() {
            warn!("Skipping {}: file name is not valid UTF-8", path.display());
            continue;
        }
        inputs.push(path);
    }
    inputs.sort();
    Ok(inputs)
}

/// Preprocess every input document under `root`.
///
/// # Errors
/// Returns `Err(PrepError)` only when the batch cannot run at all: the root
/// cannot be listed or the final-output directory cannot be created.
/// Per-item failures are reported in the returned [`BatchReport`].
pub async fn run_batch(
    root: impl AsRef<Path>,
    config: &PipelineConfig,
    driver: Arc<dyn TransformDriver>,
    counter: Arc<dyn PageCounter>,
) -> Result<BatchReport, PrepError> {
    let batch_start = Instant::now();
    let root = root.as_ref();
    info!("Starting batch in {}", root.display());

    let inputs = discover_inputs(root).await?;
    let pipeline = Pipeline::new(WorkspaceManager::new(root), driver, counter, config.clone());

    tokio::fs::create_dir_all(pipeline.final_dir())
        .await
        .map_err(|source| PrepError::FinalDirUnavailable {
            path: pipeline.final_dir().to_path_buf(),
            source,
        })?;

    install_panic_capture();
    let total = inputs.len();
    info!("Found {} input document(s)", total);
    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(total);
    }

    let mut items = Vec::with_capacity(total);
    for (i, source) in inputs.into_iter().enumerate() {
        let item = Pipeline::item_name(&source).unwrap_or_default();
        if let Some(ref cb) = config.progress_callback {
            cb.on_item_start(&item, i + 1, total);
        }

        let item_start = Instant::now();
        let mut backtrace = None;
        let result = match AssertUnwindSafe(pipeline.process_item(&source))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => {
                backtrace = Some(take_panic_backtrace().unwrap_or_else(Backtrace::force_capture));
                Err(ItemError::Panicked(panic_message(payload.as_ref())))
            }
        };

        let outcome = match result {
            Ok(outcome) => {
                if let Some(ref cb) = config.progress_callback {
                    match outcome {
                        ItemOutcome::Skipped { .. } => cb.on_item_skipped(&item),
                        _ => cb.on_item_complete(&item),
                    }
                }
                outcome
            }
            Err(e) => {
                let chain = error_chain(&e);
                match backtrace {
                    Some(ref bt) => error!("{}: preprocessing failed: {}\n{}", item, chain, bt),
                    None => error!("{}: preprocessing failed: {}", item, chain),
                }
                if let Some(ref cb) = config.progress_callback {
                    cb.on_item_error(&item, &chain);
                }
                ItemOutcome::Failed {
                    step: e.step(),
                    error: chain,
                }
            }
        };

        items.push(ItemReport {
            item,
            source,
            outcome,
            duration_ms: item_start.elapsed().as_millis() as u64,
        });
    }

    let report = BatchReport {
        root: root.to_path_buf(),
        items,
        total_duration_ms: batch_start.elapsed().as_millis() as u64,
    };
    info!(
        "Batch complete: {} completed, {} skipped, {} failed in {}ms",
        report.completed(),
        report.skipped(),
        report.failed(),
        report.total_duration_ms
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_complete(total, report.failed());
    }
    Ok(report)
}

thread_local! {
    static PANIC_BACKTRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

/// Chains a panic hook that records where the panic happened, so an item
/// that panics is logged with the stack of the panic, not of the catch.
static PANIC_CAPTURE: Lazy<()> = Lazy::new(|| {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        PANIC_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(Backtrace::force_capture()));
        previous(info);
    }));
});

fn install_panic_capture() {
    Lazy::force(&PANIC_CAPTURE);
}

/// Backtrace of the last panic on this thread, if the hook saw one.
fn take_panic_backtrace() -> Option<Backtrace> {
    PANIC_BACKTRACE.with(|slot| slot.borrow_mut().take())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
