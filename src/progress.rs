//! Progress-callback trait for batch, item and step events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the batch walks through its documents.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdfprep::{BatchProgressCallback, PipelineConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct FailureCounter {
//!     failed: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for FailureCounter {
//!     fn on_item_error(&self, item: &str, error: &str) {
//!         self.failed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{item}: {error}");
//!     }
//! }
//!
//! let counter = Arc::new(FailureCounter { failed: AtomicUsize::new(0) });
//! let config = PipelineConfig::builder()
//!     .progress_callback(counter as Arc<dyn BatchProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::pipeline::Step;
use std::sync::Arc;

/// Called by the batch driver and the per-item pipeline.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Items are processed one at a time, but the trait is
/// `Send + Sync` so a callback can be shared with other threads (a progress
/// bar ticker, a status server).
pub trait BatchProgressCallback: Send + Sync {
    /// Called once after input discovery.
    fn on_batch_start(&self, total_items: usize) {
        let _ = total_items;
    }

    /// Called before an item's entry guard is evaluated.
    ///
    /// # Arguments
    /// * `item`  — work item name (input file stem)
    /// * `index` — 1-indexed position in the batch
    /// * `total` — number of items in the batch
    fn on_item_start(&self, item: &str, index: usize, total: usize) {
        let _ = (item, index, total);
    }

    /// Called when an item's final artifact already exists.
    fn on_item_skipped(&self, item: &str) {
        let _ = item;
    }

    /// Called when a pipeline step begins.
    fn on_step_start(&self, item: &str, step: Step) {
        let _ = (item, step);
    }

    /// Called when a pipeline step finishes.
    ///
    /// `resumed` is true when every invocation of the step was skipped because
    /// its outputs were already on disk.
    fn on_step_complete(&self, item: &str, step: Step, resumed: bool) {
        let _ = (item, step, resumed);
    }

    /// Called when an item's final artifact has been written.
    fn on_item_complete(&self, item: &str) {
        let _ = item;
    }

    /// Called when an item failed. The batch continues.
    fn on_item_error(&self, item: &str, error: &str) {
        let _ = (item, error);
    }

    /// Called once after every item has been attempted.
    ///
    /// # Arguments
    /// * `total_items`  — items in the batch
    /// * `failed_items` — items that ended in failure
    fn on_batch_complete(&self, total_items: usize, failed_items: usize) {
        let _ = (total_items, failed_items);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        steps: Mutex<Vec<(Step, bool)>>,
        errors: AtomicUsize,
        skipped: AtomicUsize,
    }

    impl BatchProgressCallback for TrackingCallback {
        fn on_item_skipped(&self, _item: &str) {
            self.skipped.fetch_add(1, Ordering::SeqCst);
        }

        fn on_step_complete(&self, _item: &str, step: Step, resumed: bool) {
            self.steps.lock().unwrap().push((step, resumed));
        }

        fn on_item_error(&self, _item: &str, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(2);
        cb.on_item_start("doc", 1, 2);
        cb.on_step_start("doc", Step::Split);
        cb.on_step_complete("doc", Step::Split, false);
        cb.on_item_error("doc", "boom");
        cb.on_batch_complete(2, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_step_complete("doc", Step::Split, true);
        tracker.on_step_complete("doc", Step::ColorNormalize, false);
        tracker.on_item_error("other", "driver failed");
        tracker.on_item_skipped("done");

        assert_eq!(
            *tracker.steps.lock().unwrap(),
            vec![(Step::Split, true), (Step::ColorNormalize, false)]
        );
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.skipped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: Arc<dyn BatchProgressCallback> = Arc::new(NoopProgressCallback);
        cb.on_batch_start(10);
        cb.on_item_complete("doc");
    }
}
