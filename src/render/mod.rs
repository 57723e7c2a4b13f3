//! Page rendering through an external document viewer.
//!
//! A viewer is slow and unreliable: pages sometimes never finish loading,
//! and the viewer itself sometimes hangs on the way out. The
//! [`RenderController`] wraps a [`ViewerLauncher`] with a per-page timeout
//! that grows after each consecutive timeout, a hard give-up ceiling, and
//! bounded session teardown.
//!
//! ## Data Flow
//!
//! ```text
//! document ──▶ launch(scale) ──▶ page_count ──▶ render_page(1..n) ──▶ close
//!                 ▲                                    │ timeout
//!                 └──────── teardown + escalate ◀──────┘
//! ```

pub mod controller;

pub use crate::config::Scale;
pub use controller::{Escalation, RenderAttemptState, RenderController};

use crate::error::ViewerError;
use crate::output::RenderedPage;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// One open viewer instance showing one document.
///
/// Every method takes the time it may wait. Implementations report a load
/// that did not complete in time as [`ViewerError::Timeout`]; anything else
/// is [`ViewerError::Failed`]. Dropping a session must release its
/// resources (kill the process) even if [`ViewerSession::close`] was never
/// called or did not finish.
#[async_trait]
pub trait ViewerSession: Send {
    /// Number of pages in the open document.
    async fn page_count(&mut self, timeout: Duration) -> Result<usize, ViewerError>;

    /// Navigate to `page_num` (1-indexed) and wait until it is fully rendered.
    async fn render_page(
        &mut self,
        page_num: usize,
        timeout: Duration,
    ) -> Result<RenderedPage, ViewerError>;

    /// Close the viewer.
    async fn close(&mut self) -> Result<(), ViewerError>;
}

/// Opens viewer sessions.
#[async_trait]
pub trait ViewerLauncher: Send + Sync {
    /// Open `document` at `scale`, waiting at most `timeout` for it to load.
    async fn launch(
        &self,
        document: &Path,
        scale: Scale,
        timeout: Duration,
    ) -> Result<Box<dyn ViewerSession>, ViewerError>;
}
