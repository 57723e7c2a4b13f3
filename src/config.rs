//! Configuration types for the preprocessing pipeline and the page renderer.
//!
//! Pipeline behaviour is controlled through [`PipelineConfig`], rendering
//! behaviour through [`RenderConfig`]; both are built via their builders.
//! Keeping every knob in one struct makes it trivial to log the effective
//! settings of a run and to diff two runs that behaved differently.

use crate::error::PrepError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Configuration for a preprocessing batch.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_pdfprep::{PipelineConfig, RetryPolicy};
/// use std::time::Duration;
///
/// let config = PipelineConfig::builder()
///     .retry(RetryPolicy::immediate(5))
///     .output_wait(Duration::from_secs(30))
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Directory that receives `{basename}_final.pdf`. Default: `<root>/final`.
    pub final_dir: Option<PathBuf>,

    /// How often a stage invocation is retried when its expected outputs are
    /// missing. Default: 3 immediate attempts.
    ///
    /// Automation failures reported by the driver are never retried here;
    /// they end the item.
    pub retry: RetryPolicy,

    /// How long to keep polling for expected outputs after an operation
    /// returns. Default: 10 s.
    ///
    /// External tools often return before the file they write is visible on
    /// disk (save dialogs, background exporters). Zero means a single check.
    pub output_wait: Duration,

    /// Interval between output polls. Default: 250 ms.
    pub poll_interval: Duration,

    /// Label embedded in rasterised part names: `%04d_<label>_%d.pdf`.
    /// Default: `"page"`.
    pub raster_label: String,

    /// Keep stage directories after the final artifact is written. Default: false.
    pub keep_intermediates: bool,

    /// Optional progress callback for batch/item/step events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            final_dir: None,
            retry: RetryPolicy::default(),
            output_wait: Duration::from_secs(10),
            poll_interval: Duration::from_millis(250),
            raster_label: "page".to_string(),
            keep_intermediates: false,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("final_dir", &self.final_dir)
            .field("retry", &self.retry)
            .field("output_wait", &self.output_wait)
            .field("poll_interval", &self.poll_interval)
            .field("raster_label", &self.raster_label)
            .field("keep_intermediates", &self.keep_intermediates)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn final_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.final_dir = Some(dir.into());
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.retry.max_attempts = n.max(1);
        self
    }

    pub fn output_wait(mut self, wait: Duration) -> Self {
        self.config.output_wait = wait;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn raster_label(mut self, label: impl Into<String>) -> Self {
        self.config.raster_label = label.into();
        self
    }

    pub fn keep_intermediates(mut self, v: bool) -> Self {
        self.config.keep_intermediates = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PrepError> {
        let c = &self.config;
        if c.retry.max_attempts == 0 {
            return Err(PrepError::InvalidConfig(
                "max_attempts must be ≥ 1".into(),
            ));
        }
        if c.raster_label.is_empty() || c.raster_label.contains(['/', '\\']) {
            return Err(PrepError::InvalidConfig(format!(
                "raster label must be a non-empty file-name fragment, got {:?}",
                c.raster_label
            )));
        }
        Ok(self.config)
    }
}

// ── Retry ────────────────────────────────────────────────────────────────

/// Bounded retry of a stage whose outputs did not appear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Default: 3.
    pub max_attempts: u32,
    /// Delay between attempts. Default: none.
    pub backoff: BackoffPolicy,
}

impl RetryPolicy {
    /// `n` attempts with no delay in between.
    pub fn immediate(n: u32) -> Self {
        Self {
            max_attempts: n.max(1),
            backoff: BackoffPolicy::None,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::immediate(3)
    }
}

/// Backoff policy controlling the delay between retry attempts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BackoffPolicy {
    /// No delay between retries.
    #[default]
    None,
    /// Fixed delay between retries.
    Fixed(Duration),
    /// Exponential backoff: base * 2^retry, capped at max.
    Exponential { base: Duration, max: Duration },
}

impl BackoffPolicy {
    /// Delay before retry number `retry` (0-indexed: the delay before the
    /// second attempt is `delay_for_retry(0)`).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        match self {
            BackoffPolicy::None => Duration::ZERO,
            BackoffPolicy::Fixed(d) => *d,
            BackoffPolicy::Exponential { base, max } => {
                let millis = (base.as_millis() as u64).saturating_mul(2u64.saturating_pow(retry));
                Duration::from_millis(millis).min(*max)
            }
        }
    }
}

// ── Rendering ────────────────────────────────────────────────────────────

/// Configuration for [`crate::render::RenderController`].
///
/// The timeout ceiling starts at `base_timeout`. After the n-th consecutive
/// timeout it grows by `escalation_unit * 2^n`; once it exceeds
/// `give_up_timeout` the page is abandoned. With the defaults
/// (15 s base, 1 s unit, 60 s give-up) the ceilings are
/// 17 → 21 → 29 → 45 s, and the fifth timeout gives up.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Initial timeout ceiling for one page load. Default: 15 s.
    pub base_timeout: Duration,
    /// A page whose ceiling would exceed this is abandoned. Default: 60 s.
    pub give_up_timeout: Duration,
    /// Unit multiplied by `2^n` on the n-th consecutive timeout. Default: 1 s.
    pub escalation_unit: Duration,
    /// Extra wall-clock slack on top of the ceiling before the attempt is
    /// cut off from outside, in case the driver's own wait hangs. Default: 1 s.
    pub load_grace: Duration,
    /// Hard limit on tearing a session down. Default: 1 s.
    pub teardown_timeout: Duration,
    /// Viewer zoom. Default: 1.
    pub scale: Scale,
    /// Which pages to render. Default: all.
    pub pages: PageSelection,
    /// Tear the session down and start a fresh one after this many pages.
    /// Default: never.
    ///
    /// Long-running viewer instances leak memory; recycling them bounds it.
    pub recycle_after_pages: Option<usize>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            base_timeout: Duration::from_secs(15),
            give_up_timeout: Duration::from_secs(60),
            escalation_unit: Duration::from_secs(1),
            load_grace: Duration::from_secs(1),
            teardown_timeout: Duration::from_secs(1),
            scale: Scale::default(),
            pages: PageSelection::default(),
            recycle_after_pages: None,
        }
    }
}

impl RenderConfig {
    /// Create a new builder for `RenderConfig`.
    pub fn builder() -> RenderConfigBuilder {
        RenderConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`RenderConfig`].
#[derive(Debug)]
pub struct RenderConfigBuilder {
    config: RenderConfig,
}

impl RenderConfigBuilder {
    pub fn base_timeout(mut self, d: Duration) -> Self {
        self.config.base_timeout = d;
        self
    }

    pub fn give_up_timeout(mut self, d: Duration) -> Self {
        self.config.give_up_timeout = d;
        self
    }

    pub fn escalation_unit(mut self, d: Duration) -> Self {
        self.config.escalation_unit = d;
        self
    }

    pub fn load_grace(mut self, d: Duration) -> Self {
        self.config.load_grace = d;
        self
    }

    pub fn teardown_timeout(mut self, d: Duration) -> Self {
        self.config.teardown_timeout = d;
        self
    }

    pub fn scale(mut self, scale: Scale) -> Self {
        self.config.scale = scale;
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn recycle_after_pages(mut self, n: usize) -> Self {
        self.config.recycle_after_pages = Some(n.max(1));
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<RenderConfig, PrepError> {
        let c = &self.config;
        if c.base_timeout.is_zero() {
            return Err(PrepError::InvalidConfig("base timeout must be > 0".into()));
        }
        if c.escalation_unit.is_zero() {
            return Err(PrepError::InvalidConfig(
                "escalation unit must be > 0".into(),
            ));
        }
        if c.base_timeout > c.give_up_timeout {
            return Err(PrepError::InvalidConfig(format!(
                "base timeout {:?} exceeds give-up timeout {:?}",
                c.base_timeout, c.give_up_timeout
            )));
        }
        if c.give_up_timeout.checked_add(c.load_grace).is_none() {
            return Err(PrepError::InvalidConfig(
                "give-up timeout plus load grace overflows".into(),
            ));
        }
        Ok(self.config)
    }
}

/// Zoom levels the viewer offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Scale {
    Half,
    ThreeQuarters,
    #[default]
    One,
    OneAndQuarter,
    OneAndHalf,
    Two,
}

impl Scale {
    /// The option value the viewer's zoom selector uses.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scale::Half => "0.5",
            Scale::ThreeQuarters => "0.75",
            Scale::One => "1",
            Scale::OneAndQuarter => "1.25",
            Scale::OneAndHalf => "1.5",
            Scale::Two => "2",
        }
    }

    pub fn factor(&self) -> f32 {
        match self {
            Scale::Half => 0.5,
            Scale::ThreeQuarters => 0.75,
            Scale::One => 1.0,
            Scale::OneAndQuarter => 1.25,
            Scale::OneAndHalf => 1.5,
            Scale::Two => 2.0,
        }
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scale {
    type Err = PrepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "0.5" => Ok(Scale::Half),
            "0.75" => Ok(Scale::ThreeQuarters),
            "1" | "1.0" => Ok(Scale::One),
            "1.25" => Ok(Scale::OneAndQuarter),
            "1.5" => Ok(Scale::OneAndHalf),
            "2" | "2.0" => Ok(Scale::Two),
            other => Err(PrepError::InvalidConfig(format!(
                "scale {other} is not supported (use 0.5, 0.75, 1, 1.25, 1.5 or 2)"
            ))),
        }
    }
}

/// Specifies which pages of a document to render.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum PageSelection {
    /// Render all pages (default).
    #[default]
    All,
    /// Render a single page (1-indexed).
    Single(usize),
    /// Render a contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Render specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}
