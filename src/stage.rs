//! Skip-if-done, retry-until-verified execution of one opaque operation.
//!
//! A stage invocation is judged only by its [`ExpectedOutputs`]:
//!
//! 1. every expected path already exists → the invocation is complete,
//!    return without calling the operation;
//! 2. otherwise call the operation, then poll (bounded) for the outputs;
//! 3. outputs still missing → retry per [`RetryPolicy`], then fail with
//!    [`StageError::ExpectedOutputMissing`].
//!
//! An operation that reports an error itself ([`DriverError`]) is not
//! retried: that is an automation failure and ends the work item.
//!
//! Operations must fail closed (all expected outputs or none) for the
//! existence check to be a sound completion marker.

use crate::config::RetryPolicy;
use crate::error::{DriverError, StageError};
use crate::wait::poll_until;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// The files a stage invocation must produce to count as successful.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedOutputs(Vec<PathBuf>);

impl ExpectedOutputs {
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self(paths.into_iter().map(Into::into).collect())
    }

    pub fn single(path: impl Into<PathBuf>) -> Self {
        Self(vec![path.into()])
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Expected paths that do not exist yet.
    pub async fn missing(&self) -> Result<Vec<PathBuf>, (PathBuf, std::io::Error)> {
        let mut missing = Vec::new();
        for path in &self.0 {
            match tokio::fs::try_exists(path).await {
                Ok(true) => {}
                Ok(false) => missing.push(path.clone()),
                Err(e) => return Err((path.clone(), e)),
            }
        }
        Ok(missing)
    }

    /// True when every expected path exists.
    pub async fn is_satisfied(&self) -> bool {
        matches!(self.missing().await, Ok(m) if m.is_empty())
    }
}

/// How a successful [`StageRunner::run`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageRun {
    /// Outputs were already present; the operation was not invoked.
    Skipped,
    /// The operation ran and its outputs were verified.
    Completed { attempts: u32 },
}

impl StageRun {
    pub fn was_skipped(&self) -> bool {
        matches!(self, StageRun::Skipped)
    }
}

/// Runs operations against their expected outputs.
#[derive(Debug, Clone)]
pub struct StageRunner {
    retry: RetryPolicy,
    output_wait: Duration,
    poll_interval: Duration,
}

impl StageRunner {
    pub fn new(retry: RetryPolicy, output_wait: Duration, poll_interval: Duration) -> Self {
        Self {
            retry,
            output_wait,
            poll_interval,
        }
    }

    /// Run `operation` unless `expected` is already satisfied.
    ///
    /// `stage` is a short label used in logs and errors
    /// (e.g. `"srgb 0003"`). The operation closure captures its own inputs
    /// and is called once per attempt.
    pub async fn run<F, Fut>(
        &self,
        stage: &str,
        expected: &ExpectedOutputs,
        mut operation: F,
    ) -> Result<StageRun, StageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), DriverError>>,
    {
        if expected.is_empty() {
            return Err(StageError::NoExpectedOutputs {
                stage: stage.to_string(),
            });
        }

        if self.missing(stage, expected).await?.is_empty() {
            debug!("{}: outputs present, skipping", stage);
            return Ok(StageRun::Skipped);
        }

        let attempts = self.retry.max_attempts.max(1);
        let mut missing = Vec::new();

        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay = self.retry.backoff.delay_for_retry(attempt - 2);
                warn!(
                    "{}: retry {}/{} after {}ms",
                    stage,
                    attempt - 1,
                    attempts - 1,
                    delay.as_millis()
                );
                if !delay.is_zero() {
                    sleep(delay).await;
                }
            }

            operation()
                .await
                .map_err(|source| StageError::Automation {
                    stage: stage.to_string(),
                    source,
                })?;

            poll_until(self.output_wait, self.poll_interval, move || expected.is_satisfied()).await;

            missing = self.missing(stage, expected).await?;
            if missing.is_empty() {
                debug!("{}: verified after {} attempt(s)", stage, attempt);
                return Ok(StageRun::Completed { attempts: attempt });
            }
            warn!(
                "{}: attempt {} left {} expected output(s) missing",
                stage,
                attempt,
                missing.len()
            );
        }

        Err(StageError::ExpectedOutputMissing {
            stage: stage.to_string(),
            missing,
            attempts,
        })
    }

    async fn missing(&self, stage: &str, expected: &ExpectedOutputs) -> Result<Vec<PathBuf>, StageError> {
        expected
            .missing()
            .await
            .map_err(|(path, source)| StageError::Io {
                stage: stage.to_string(),
                path,
                source,
            })
    }
}

/// True when `path` exists; I/O errors count as "no".
pub async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}
