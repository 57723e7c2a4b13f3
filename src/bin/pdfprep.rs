//! CLI binary for edgequake-pdfprep.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, runs the batch and prints the report.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdfprep::{
    run_batch, BatchProgressCallback, CommandDriver, ItemOutcome, PdfiumPageCounter,
    PipelineConfig, ProgressCallback, Step,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const DEFAULT_DRIVER_FILE: &str = "driver.json";

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar over the batch's documents, with a
/// log line per finished document and the current step as the bar message.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Per-item wall-clock start times for elapsed reporting.
    start_times: Mutex<HashMap<String, Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} documents  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        bar.set_style(style);
        bar.set_prefix("Preprocessing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed(&self, item: &str) -> String {
        let ms = self
            .start_times
            .lock()
            .ok()
            .and_then(|mut t| t.remove(item))
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);
        dim(&format!("{:.1}s", ms as f64 / 1000.0))
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_items: usize) {
        self.bar.set_length(total_items as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Found {total_items} document(s)"))
        ));
    }

    fn on_item_start(&self, item: &str, _index: usize, _total: usize) {
        if let Ok(mut t) = self.start_times.lock() {
            t.insert(item.to_string(), Instant::now());
        }
        self.bar.set_message(item.to_string());
    }

    fn on_item_skipped(&self, item: &str) {
        self.bar
            .println(format!("  {} {:<32}  {}", dim("·"), item, dim("already done")));
        self.elapsed(item);
        self.bar.inc(1);
    }

    fn on_step_start(&self, item: &str, step: Step) {
        self.bar.set_message(format!("{item}: {step}"));
    }

    fn on_item_complete(&self, item: &str) {
        self.bar.println(format!(
            "  {} {:<32}  {}",
            green("✓"),
            item,
            self.elapsed(item)
        ));
        self.bar.inc(1);
    }

    fn on_item_error(&self, item: &str, error: &str) {
        // Truncate very long error chains to keep output tidy.
        let msg = if error.chars().count() > 100 {
            format!("{}\u{2026}", error.chars().take(99).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:<32}  {}  {}",
            red("✗"),
            item,
            red(&msg),
            self.elapsed(item)
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, _total_items: usize, _failed_items: usize) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Preprocess every PDF in the current directory (commands from ./driver.json)
  pdfprep

  # Resume an interrupted batch (same command; finished work is skipped)
  pdfprep /data/scans --driver driver.json

  # Keep stage directories for inspection, print a JSON report
  pdfprep /data/scans --driver driver.json --keep-intermediates --json > report.json

DRIVER FILE:
  JSON table of argv templates, one per operation:
    split, convert_srgb, split_layers, extract_text, remove_text,
    rasterize, merge, overlay, optimize
  Default: <root>/driver.json
  Placeholders: {input} {output} {output_dir} {stem} {label} {inputs}
                {foreground} {background}
  Rasterize must write {output_dir}/{stem}_{label}_N.pdf for N = 1..pages;
  {label} is --raster-label.

WORKSPACE LAYOUT:
  <root>/<name>.pdf                   input documents
  <root>/<name>_<stage>_<32 hex>/     stage directories (removed on success)
  <root>/final/<name>_final.pdf       final artifacts

ENVIRONMENT VARIABLES:
  PDFIUM_LIB_PATH   Path to the pdfium shared library (page counting)
  RUST_LOG          Override the log filter
"#;

/// Resumable batch preprocessing of PDF documents through external tools.
#[derive(Parser, Debug)]
#[command(
    name = "pdfprep",
    version,
    about = "Resumable batch preprocessing of PDF documents through external tools",
    long_about = "Run every PDF under a workspace directory through split, color \
normalisation, layer separation, text/background separation, rasterisation, merging and \
optimisation. Intermediate results persist between runs, so an interrupted batch resumes \
where it stopped.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Workspace root holding the input PDFs.
    #[arg(default_value = ".", env = "PDFPREP_ROOT")]
    root: PathBuf,

    /// JSON file mapping each operation to a command template
    /// (default: <root>/driver.json).
    #[arg(short, long, env = "PDFPREP_DRIVER")]
    driver: Option<PathBuf>,

    /// Directory for final artifacts (default: <root>/final).
    #[arg(long, env = "PDFPREP_FINAL_DIR")]
    final_dir: Option<PathBuf>,

    /// Attempts per stage invocation when expected outputs are missing.
    #[arg(long, env = "PDFPREP_MAX_ATTEMPTS", default_value_t = 3,
          value_parser = clap::value_parser!(u32).range(1..))]
    max_attempts: u32,

    /// Seconds to keep polling for outputs after an operation returns.
    #[arg(long, env = "PDFPREP_OUTPUT_WAIT", default_value_t = 10)]
    output_wait: u64,

    /// Label in rasterised part names: NNNN_<label>_N.pdf.
    #[arg(long, env = "PDFPREP_RASTER_LABEL", default_value = "page")]
    raster_label: String,

    /// Keep stage directories after the final artifact is written.
    #[arg(long, env = "PDFPREP_KEEP_INTERMEDIATES")]
    keep_intermediates: bool,

    /// Path to the pdfium shared library (overrides PDFIUM_LIB_PATH).
    #[arg(long)]
    pdfium_lib: Option<PathBuf>,

    /// Print the batch report as JSON on stdout.
    #[arg(long, env = "PDFPREP_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDFPREP_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDFPREP_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDFPREP_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // With the progress bar active only errors are logged; the bar and its
    // per-document lines carry the rest.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Collaborators ────────────────────────────────────────────────────
    let driver_path = driver_file(&cli);
    if !driver_path.is_file() {
        anyhow::bail!(
            "Driver file {} not found; create it or pass --driver",
            driver_path.display()
        );
    }
    let driver = CommandDriver::from_file(&driver_path)
        .await
        .context("Failed to load driver configuration")?
        .with_raster_label(cli.raster_label.clone());
    let counter = match cli.pdfium_lib {
        Some(ref lib) => PdfiumPageCounter::with_library(lib),
        None => PdfiumPageCounter::new(),
    };

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Run batch ────────────────────────────────────────────────────────
    let report = run_batch(&cli.root, &config, Arc::new(driver), Arc::new(counter))
        .await
        .context("Batch failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    }

    if !cli.quiet {
        for item in &report.items {
            if let ItemOutcome::Failed { step, error } = &item.outcome {
                let at = step.map(|s| format!(" at {s}")).unwrap_or_default();
                eprintln!("  {} {}{}: {}", red("✗"), bold(&item.item), at, error);
            }
        }
        let mark = if report.failed() == 0 {
            green("✔")
        } else {
            cyan("⚠")
        };
        eprintln!(
            "{}  {} completed, {} skipped, {} failed  {}",
            mark,
            bold(&report.completed().to_string()),
            report.skipped(),
            if report.failed() == 0 {
                "0".to_string()
            } else {
                red(&report.failed().to_string())
            },
            dim(&format!("{}ms", report.total_duration_ms)),
        );
    }

    // Item failures are reported, not fatal: the next run resumes them.
    Ok(())
}

/// The driver file: `--driver`, else `driver.json` in the workspace root.
fn driver_file(cli: &Cli) -> PathBuf {
    cli.driver
        .clone()
        .unwrap_or_else(|| cli.root.join(DEFAULT_DRIVER_FILE))
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .max_attempts(cli.max_attempts)
        .output_wait(Duration::from_secs(cli.output_wait))
        .raster_label(cli.raster_label.clone())
        .keep_intermediates(cli.keep_intermediates);

    if let Some(ref dir) = cli.final_dir {
        builder = builder.final_dir(dir);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
