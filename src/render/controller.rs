//! Adaptive per-page timeouts for viewer rendering.
//!
//! The timeout ceiling starts at the configured base. After the n-th
//! consecutive timeout the viewer session is torn down and the ceiling grows
//! by `unit * 2^n`; once it exceeds the give-up ceiling the page is
//! abandoned (a `None` result), never retried forever. A successful page
//! resets the ceiling to the base, so a slow stretch of pages does not make
//! every later page wait longer.

use super::{ViewerLauncher, ViewerSession};
use crate::config::RenderConfig;
use crate::error::{RenderError, ViewerError};
use crate::output::{PageRender, RenderedDocument, RenderedPage};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::error::Elapsed;
use tracing::{debug, error, info, warn};

/// What to do after a timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Try again with this (larger) timeout.
    Retry(Duration),
    /// The next ceiling would exceed the give-up limit.
    GiveUp { failures: u32 },
}

/// Timeout escalation state of one rendering session.
///
/// Owned by a [`RenderController`]; nothing here is global.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderAttemptState {
    base: Duration,
    give_up: Duration,
    unit: Duration,
    timeout: Duration,
    failures: u32,
}

impl RenderAttemptState {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            base: config.base_timeout,
            give_up: config.give_up_timeout,
            unit: config.escalation_unit.max(Duration::from_millis(1)),
            timeout: config.base_timeout,
            failures: 0,
        }
    }

    /// Current timeout ceiling.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Consecutive timeouts since the last success or reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Count one more consecutive timeout and grow the ceiling.
    ///
    /// A ceiling that can no longer grow (the step or the sum overflows) is
    /// a give-up too, whatever the configured limit.
    pub fn record_timeout(&mut self) -> Escalation {
        self.failures = self.failures.saturating_add(1);
        let next = 2u32
            .checked_pow(self.failures)
            .and_then(|factor| self.unit.checked_mul(factor))
            .and_then(|step| self.timeout.checked_add(step));
        match next {
            Some(timeout) if timeout <= self.give_up => {
                self.timeout = timeout;
                Escalation::Retry(timeout)
            }
            _ => Escalation::GiveUp {
                failures: self.failures,
            },
        }
    }

    /// A page rendered: back to the base ceiling.
    pub fn record_success(&mut self) {
        if self.failures > 0 {
            debug!(
                "Timeout back to {:.1}s after {} consecutive timeout(s)",
                self.base.as_secs_f64(),
                self.failures
            );
        }
        self.reset();
    }

    pub fn reset(&mut self) {
        self.timeout = self.base;
        self.failures = 0;
    }
}

enum AttemptError {
    TimedOut(String),
    Launch(ViewerError),
    Viewer(ViewerError),
}

/// Renders the pages of one document, escalating timeouts as it goes.
pub struct RenderController<L> {
    launcher: L,
    document: PathBuf,
    config: RenderConfig,
    state: RenderAttemptState,
    session: Option<Box<dyn ViewerSession>>,
    pages_in_session: usize,
}

impl<L: ViewerLauncher> RenderController<L> {
    pub fn new(launcher: L, document: impl Into<PathBuf>, config: RenderConfig) -> Self {
        let state = RenderAttemptState::new(&config);
        Self {
            launcher,
            document: document.into(),
            config,
            state,
            session: None,
            pages_in_session: 0,
        }
    }

    pub fn document(&self) -> &Path {
        &self.document
    }

    pub fn state(&self) -> &RenderAttemptState {
        &self.state
    }

    /// Page count of the document, opening a session if needed.
    ///
    /// Opening is subject to the same escalation as page loads; a document
    /// that never opens within the give-up ceiling is an error.
    pub async fn page_count(&mut self) -> Result<usize, RenderError> {
        loop {
            match self.attempt_page_count().await {
                Ok(n) => {
                    self.state.record_success();
                    return Ok(n);
                }
                Err(AttemptError::TimedOut(detail)) => {
                    warn!("Opening {} timed out: {}", self.document.display(), detail);
                    self.teardown().await;
                    if let Escalation::GiveUp { failures } = self.state.record_timeout() {
                        self.state.reset();
                        return Err(RenderError::GaveUpLaunch {
                            path: self.document.clone(),
                            attempts: failures,
                        });
                    }
                }
                Err(AttemptError::Launch(source)) => {
                    return Err(RenderError::Launch {
                        path: self.document.clone(),
                        source,
                    })
                }
                Err(AttemptError::Viewer(source)) => return Err(RenderError::PageCount(source)),
            }
        }
    }

    /// Render `page_num` (1-indexed).
    ///
    /// Returns `Ok` with `page: None` when the page kept timing out past the
    /// give-up ceiling. Non-timeout viewer failures are errors.
    pub async fn render_page(&mut self, page_num: usize) -> Result<PageRender, RenderError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.attempt_page(page_num).await {
                Ok(page) => {
                    if self.state.failures() > 0 {
                        info!(
                            "Page {} rendered after {} timeout(s)",
                            page_num,
                            self.state.failures()
                        );
                    }
                    self.state.record_success();
                    self.pages_in_session += 1;
                    self.maybe_recycle().await;
                    return Ok(PageRender {
                        page_num,
                        page: Some(page),
                        attempts,
                    });
                }
                Err(AttemptError::TimedOut(detail)) => {
                    warn!(
                        "Render page {} timed out at {:.1}s: {}",
                        page_num,
                        self.state.timeout().as_secs_f64(),
                        detail
                    );
                    self.teardown().await;
                    match self.state.record_timeout() {
                        Escalation::Retry(next) => {
                            info!("Extending timeout to {:.1}s", next.as_secs_f64());
                        }
                        Escalation::GiveUp { failures } => {
                            error!("Can't render page {} after {} timeouts", page_num, failures);
                            self.state.reset();
                            return Ok(PageRender {
                                page_num,
                                page: None,
                                attempts,
                            });
                        }
                    }
                }
                Err(AttemptError::Launch(source)) => {
                    return Err(RenderError::Launch {
                        path: self.document.clone(),
                        source,
                    })
                }
                Err(AttemptError::Viewer(source)) => {
                    return Err(RenderError::Page {
                        page: page_num,
                        source,
                    })
                }
            }
        }
    }

    /// Render the configured page selection, calling `on_page` after each
    /// page. The session is always shut down before returning.
    pub async fn render_document<F>(&mut self, mut on_page: F) -> Result<RenderedDocument, RenderError>
    where
        F: FnMut(&PageRender),
    {
        let result = self.render_selected(&mut on_page).await;
        self.shutdown().await;
        result
    }

    async fn render_selected<F>(&mut self, on_page: &mut F) -> Result<RenderedDocument, RenderError>
    where
        F: FnMut(&PageRender),
    {
        let total_pages = self.page_count().await?;
        let indices = self.config.pages.to_indices(total_pages);
        info!(
            "{}: rendering {} of {} page(s) at scale {}",
            self.document.display(),
            indices.len(),
            total_pages,
            self.config.scale
        );

        let mut pages = Vec::with_capacity(indices.len());
        for idx in indices {
            let render = self.render_page(idx + 1).await?;
            on_page(&render);
            pages.push(render);
        }
        Ok(RenderedDocument {
            document: self.document.clone(),
            total_pages,
            pages,
        })
    }

    /// Close the current session, if any, within the teardown limit.
    pub async fn shutdown(&mut self) {
        self.teardown().await;
    }

    async fn ensure_session(&mut self, timeout: Duration) -> Result<(), AttemptError> {
        if self.session.is_some() {
            return Ok(());
        }
        let limit = timeout.saturating_add(self.config.load_grace);
        let launched = tokio::time::timeout(
            limit,
            self.launcher.launch(&self.document, self.config.scale, timeout),
        )
        .await;
        let session = match classify(launched, || format!("launch exceeded {:.1}s", limit.as_secs_f64())) {
            Ok(session) => session,
            Err(AttemptError::Viewer(e)) => return Err(AttemptError::Launch(e)),
            Err(e) => return Err(e),
        };
        debug!("Opened {} in the viewer", self.document.display());
        self.session = Some(session);
        self.pages_in_session = 0;
        Ok(())
    }

    async fn attempt_page_count(&mut self) -> Result<usize, AttemptError> {
        let timeout = self.state.timeout();
        self.ensure_session(timeout).await?;
        let limit = timeout.saturating_add(self.config.load_grace);
        let Some(session) = self.session.as_mut() else {
            return Err(AttemptError::Viewer(ViewerError::Failed("no viewer session".into())));
        };
        let outcome = tokio::time::timeout(limit, session.page_count(timeout)).await;
        classify(outcome, || format!("page count exceeded {:.1}s", limit.as_secs_f64()))
    }

    async fn attempt_page(&mut self, page_num: usize) -> Result<RenderedPage, AttemptError> {
        let timeout = self.state.timeout();
        self.ensure_session(timeout).await?;
        let limit = timeout.saturating_add(self.config.load_grace);
        let Some(session) = self.session.as_mut() else {
            return Err(AttemptError::Viewer(ViewerError::Failed("no viewer session".into())));
        };
        let outcome = tokio::time::timeout(limit, session.render_page(page_num, timeout)).await;
        classify(outcome, || {
            format!("page {page_num} exceeded {:.1}s", limit.as_secs_f64())
        })
    }

    async fn maybe_recycle(&mut self) {
        if let Some(limit) = self.config.recycle_after_pages {
            if self.pages_in_session >= limit {
                info!("Recycling viewer after {} page(s)", self.pages_in_session);
                self.teardown().await;
            }
        }
    }

    async fn teardown(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        match tokio::time::timeout(self.config.teardown_timeout, session.close()).await {
            Ok(Ok(())) => debug!("Viewer closed"),
            Ok(Err(e)) => debug!("Viewer close reported: {}", e),
            Err(_) => warn!(
                "Viewer did not close within {:.1}s, abandoning it",
                self.config.teardown_timeout.as_secs_f64()
            ),
        }
        self.pages_in_session = 0;
    }
}

/// Fold the outer wall-clock cutoff and the viewer's own timeout into one
/// timeout class.
fn classify<T>(
    outcome: Result<Result<T, ViewerError>, Elapsed>,
    cutoff: impl FnOnce() -> String,
) -> Result<T, AttemptError> {
    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) if e.is_timeout() => Err(AttemptError::TimedOut(e.to_string())),
        Ok(Err(e)) => Err(AttemptError::Viewer(e)),
        Err(_) => Err(AttemptError::TimedOut(cutoff())),
    }
}
