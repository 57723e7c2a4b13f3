//! A [`TransformDriver`] that shells out to one external command per
//! operation.
//!
//! Commands come from a JSON file of argv templates:
//!
//! ```json
//! {
//!   "timeout_secs": 600,
//!   "commands": {
//!     "split":        ["split-parts", "{input}", "{output_dir}"],
//!     "convert_srgb": ["gs", "-o", "{output}", "-sDEVICE=pdfwrite",
//!                      "-sColorConversionStrategy=RGB", "{input}"],
//!     "rasterize":    ["gs", "-o", "{output_dir}/{stem}_{label}_%d.pdf",
//!                      "-sDEVICE=pdfimage24", "-r300", "{input}"],
//!     "merge":        ["qpdf", "--empty", "--pages", "{inputs}", "--", "{output}"],
//!     "overlay":      ["qpdf", "{background}", "--overlay", "{foreground}", "--", "{output}"]
//!   }
//! }
//! ```
//!
//! `split` must leave the parts as `0001.pdf`, `0002.pdf`, … in
//! `{output_dir}`; anything else there is ignored. Splitters that name their
//! output differently (`qpdf --split-pages` writes `name-01-10.pdf`) need a
//! wrapper that renames the parts, like `split-parts` above.
//!
//! Placeholders are replaced inside each argument:
//!
//! | Placeholder    | Value |
//! |----------------|-------|
//! | `{input}`      | input document |
//! | `{output}`     | output document (per-part operations: `output_dir/<input name>`) |
//! | `{output_dir}` | output directory |
//! | `{stem}`       | input file name without extension |
//! | `{label}`      | raster label (per-part operations); rasterize must write `{stem}_{label}_N.pdf`, N from 1 |
//! | `{foreground}` / `{background}` | overlay operands |
//! | `{inputs}`     | merge inputs; an argument that is exactly `{inputs}` expands to one argument per input |
//!
//! Every command runs under a hard wall-clock limit and is killed when it
//! exceeds it.

use super::{Operation, TransformDriver};
use crate::error::{DriverError, PrepError};
use crate::pipeline::parts::list_parts;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

const DEFAULT_RASTER_LABEL: &str = "page";

fn default_timeout_secs() -> u64 {
    600
}

/// The JSON command table loaded by [`CommandDriver::from_file`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Hard limit for any single command. Default: 600 s.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Per-operation overrides of `timeout_secs`.
    #[serde(default)]
    pub timeouts: BTreeMap<Operation, u64>,

    /// argv template per operation. Operations without a template are
    /// reported as unsupported when the pipeline needs them.
    #[serde(default)]
    pub commands: BTreeMap<Operation, Vec<String>>,
}

impl Default for CommandSpec {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            timeouts: BTreeMap::new(),
            commands: BTreeMap::new(),
        }
    }
}

impl CommandSpec {
    fn validate(&self) -> Result<(), String> {
        if self.timeout_secs == 0 || self.timeouts.values().any(|&s| s == 0) {
            return Err("timeouts must be at least 1 second".into());
        }
        if let Some((op, _)) = self.commands.iter().find(|(_, argv)| argv.is_empty()) {
            return Err(format!("command for {op} is empty"));
        }
        Ok(())
    }

    fn timeout_for(&self, op: Operation) -> Duration {
        Duration::from_secs(self.timeouts.get(&op).copied().unwrap_or(self.timeout_secs))
    }
}

/// Runs external commands from a [`CommandSpec`].
#[derive(Debug, Clone)]
pub struct CommandDriver {
    spec: CommandSpec,
    raster_label: String,
}

impl CommandDriver {
    pub fn new(spec: CommandSpec) -> Result<Self, PrepError> {
        spec.validate().map_err(PrepError::InvalidConfig)?;
        Ok(Self::with_spec(spec))
    }

    fn with_spec(spec: CommandSpec) -> Self {
        Self {
            spec,
            raster_label: DEFAULT_RASTER_LABEL.to_string(),
        }
    }

    /// Label substituted for `{label}`. Must match
    /// [`crate::config::PipelineConfig::raster_label`]. Default: `"page"`.
    pub fn with_raster_label(mut self, label: impl Into<String>) -> Self {
        self.raster_label = label.into();
        self
    }

    pub fn raster_label(&self) -> &str {
        &self.raster_label
    }

    /// Load the command table from a JSON file.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, PrepError> {
        let path = path.as_ref();
        let config_err = |detail: String| PrepError::DriverConfig {
            path: path.to_path_buf(),
            detail,
        };

        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| config_err(e.to_string()))?;
        let spec: CommandSpec = serde_json::from_str(&raw).map_err(|e| config_err(e.to_string()))?;
        spec.validate().map_err(config_err)?;
        debug!(
            "Loaded {} command template(s) from {}",
            spec.commands.len(),
            path.display()
        );
        Ok(Self::with_spec(spec))
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    async fn run(&self, op: Operation, vars: &[(&str, &Path)], inputs: &[PathBuf]) -> Result<(), DriverError> {
        let template = self
            .spec
            .commands
            .get(&op)
            .ok_or_else(|| DriverError::Unsupported {
                operation: op.to_string(),
            })?;
        let argv = expand(template, vars, inputs);
        let Some((program, args)) = argv.split_first() else {
            return Err(DriverError::Unsupported {
                operation: op.to_string(),
            });
        };
        debug!("{}: {}", op, argv.join(" "));

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DriverError::Launch {
                operation: op.to_string(),
                program: program.clone(),
                source,
            })?;

        let limit = self.spec.timeout_for(op);
        // Dropping the wait future drops the child, which kills it.
        let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| DriverError::Failed {
                operation: op.to_string(),
                detail: format!("waiting for '{program}': {e}"),
            })?,
            Err(_) => {
                warn!("{}: '{}' killed after {}s", op, program, limit.as_secs());
                return Err(DriverError::TimedOut {
                    operation: op.to_string(),
                    secs: limit.as_secs(),
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DriverError::Failed {
                operation: op.to_string(),
                detail: format!(
                    "'{}' exited with {}: {}",
                    program,
                    output
                        .status
                        .code()
                        .map_or_else(|| "signal".to_string(), |c| c.to_string()),
                    last_line(&stderr)
                ),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl TransformDriver for CommandDriver {
    async fn split(&self, source: &Path, output_dir: &Path) -> Result<usize, DriverError> {
        let stem = stem(source);
        self.run(
            Operation::Split,
            &[("input", source), ("output_dir", output_dir), ("stem", stem.as_path())],
            &[],
        )
        .await?;
        let parts = list_parts(output_dir)
            .await
            .map_err(|e| DriverError::Failed {
                operation: Operation::Split.to_string(),
                detail: format!("cannot list '{}': {e}", output_dir.display()),
            })?;
        Ok(parts.len())
    }

    async fn transform(&self, op: Operation, input: &Path, output_dir: &Path) -> Result<(), DriverError> {
        if !op.is_per_part() {
            return Err(DriverError::Unsupported {
                operation: op.to_string(),
            });
        }
        let output = match input.file_name() {
            Some(name) => output_dir.join(name),
            None => output_dir.to_path_buf(),
        };
        let stem = stem(input);
        self.run(
            op,
            &[
                ("input", input),
                ("output", output.as_path()),
                ("output_dir", output_dir),
                ("stem", stem.as_path()),
                ("label", Path::new(self.raster_label.as_str())),
            ],
            &[],
        )
        .await
    }

    async fn remove_text(&self, part: &Path) -> Result<(), DriverError> {
        let stem = stem(part);
        self.run(
            Operation::RemoveText,
            &[("input", part), ("output", part), ("stem", stem.as_path())],
            &[],
        )
        .await
    }

    async fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<(), DriverError> {
        self.run(Operation::Merge, &[("output", output)], inputs).await
    }

    async fn overlay(&self, foreground: &Path, background: &Path, output: &Path) -> Result<(), DriverError> {
        self.run(
            Operation::Overlay,
            &[
                ("foreground", foreground),
                ("background", background),
                ("output", output),
            ],
            &[],
        )
        .await
    }

    async fn optimize(&self, input: &Path, output: &Path) -> Result<(), DriverError> {
        self.run(Operation::Optimize, &[("input", input), ("output", output)], &[])
            .await
    }
}

fn stem(path: &Path) -> PathBuf {
    path.file_stem().map(PathBuf::from).unwrap_or_default()
}

fn last_line(s: &str) -> &str {
    s.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("").trim()
}

/// Substitute placeholders in an argv template.
fn expand(template: &[String], vars: &[(&str, &Path)], inputs: &[PathBuf]) -> Vec<String> {
    let mut argv = Vec::with_capacity(template.len() + inputs.len());
    for arg in template {
        if arg == "{inputs}" {
            argv.extend(inputs.iter().map(|p| p.to_string_lossy().into_owned()));
            continue;
        }
        let mut out = arg.clone();
        for (name, value) in vars {
            out = out.replace(&format!("{{{name}}}"), &value.to_string_lossy());
        }
        argv.push(out);
    }
    argv
}
