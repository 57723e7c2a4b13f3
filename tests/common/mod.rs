//! Shared fakes for the integration tests.
//!
//! Documents are plain text files with one line per page. Every fake
//! operation rewrites lines in a recognisable way, so the final artifact
//! shows whether pages stayed in order and whether text was extracted
//! before it was removed.

#![allow(dead_code)]

use async_trait::async_trait;
use edgequake_pdfprep::pipeline::parts::{part_file_name, raster_file_name};
use edgequake_pdfprep::{
    DriverError, Operation, PageCounter, PipelineConfig, TransformDriver,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Report failure.
    Error,
    /// Return success without writing anything.
    NoOutput,
    /// Panic inside the driver.
    Panic,
}

pub struct FakeDriver {
    pages_per_part: usize,
    calls: Mutex<Vec<(Operation, String)>>,
    faults: Mutex<Vec<(Operation, String, Fault)>>,
}

impl FakeDriver {
    pub fn new(pages_per_part: usize) -> Arc<Self> {
        Arc::new(Self {
            pages_per_part,
            calls: Mutex::new(Vec::new()),
            faults: Mutex::new(Vec::new()),
        })
    }

    /// Inject `fault` for `op` on files whose name contains `name`.
    pub fn fail(&self, op: Operation, name: &str, fault: Fault) {
        self.faults.lock().unwrap().push((op, name.to_string(), fault));
    }

    pub fn clear_faults(&self) {
        self.faults.lock().unwrap().clear();
    }

    /// File names `op` was invoked on, in call order.
    pub fn calls(&self, op: Operation) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(o, _)| *o == op)
            .map(|(_, n)| n.clone())
            .collect()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Record the call; `Ok(false)` means "pretend success, write nothing".
    fn record(&self, op: Operation, path: &Path) -> Result<bool, DriverError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.calls.lock().unwrap().push((op, name.clone()));

        let fault = self
            .faults
            .lock()
            .unwrap()
            .iter()
            .find(|(o, n, _)| *o == op && name.contains(n.as_str()))
            .map(|(_, _, f)| *f);
        match fault {
            Some(Fault::Error) => Err(DriverError::Failed {
                operation: op.to_string(),
                detail: format!("injected failure on {name}"),
            }),
            Some(Fault::Panic) => panic!("injected panic on {name}"),
            Some(Fault::NoOutput) => Ok(false),
            None => Ok(true),
        }
    }
}

pub fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("cannot read {}: {e}", path.display()))
        .lines()
        .map(str::to_owned)
        .collect()
}

fn write_lines(path: &Path, lines: &[String]) {
    std::fs::write(path, lines.join("\n")).unwrap();
}

#[async_trait]
impl TransformDriver for FakeDriver {
    async fn split(&self, source: &Path, output_dir: &Path) -> Result<usize, DriverError> {
        if !self.record(Operation::Split, source)? {
            return Ok(0);
        }
        let lines = read_lines(source);
        let chunks: Vec<&[String]> = lines.chunks(self.pages_per_part).collect();
        for (i, chunk) in chunks.iter().enumerate() {
            write_lines(&output_dir.join(part_file_name(i + 1)), chunk);
        }
        Ok(chunks.len())
    }

    async fn transform(&self, op: Operation, input: &Path, output_dir: &Path) -> Result<(), DriverError> {
        if !self.record(op, input)? {
            return Ok(());
        }
        let lines = read_lines(input);
        let name = input.file_name().unwrap();
        match op {
            Operation::ConvertSrgb | Operation::SplitLayers => {
                write_lines(&output_dir.join(name), &lines);
            }
            Operation::ExtractText => {
                let text: Vec<String> = lines.iter().map(|l| format!("T:{l}")).collect();
                write_lines(&output_dir.join(name), &text);
            }
            Operation::Rasterize => {
                let index: usize = input
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.parse().ok())
                    .unwrap();
                for (j, line) in lines.iter().enumerate() {
                    let out = output_dir.join(raster_file_name(index, "page", j + 1));
                    write_lines(&out, &[format!("R:{line}")]);
                }
            }
            other => panic!("transform called with {other}"),
        }
        Ok(())
    }

    async fn remove_text(&self, part: &Path) -> Result<(), DriverError> {
        if !self.record(Operation::RemoveText, part)? {
            return Ok(());
        }
        let stripped: Vec<String> = read_lines(part).iter().map(|l| format!("B:{l}")).collect();
        write_lines(part, &stripped);
        Ok(())
    }

    async fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<(), DriverError> {
        if !self.record(Operation::Merge, output)? {
            return Ok(());
        }
        let lines: Vec<String> = inputs.iter().flat_map(|p| read_lines(p)).collect();
        write_lines(output, &lines);
        Ok(())
    }

    async fn overlay(&self, foreground: &Path, background: &Path, output: &Path) -> Result<(), DriverError> {
        if !self.record(Operation::Overlay, output)? {
            return Ok(());
        }
        let fg = read_lines(foreground);
        let bg = read_lines(background);
        if fg.len() != bg.len() {
            return Err(DriverError::Failed {
                operation: "overlay".into(),
                detail: format!("{} foreground vs {} background pages", fg.len(), bg.len()),
            });
        }
        let merged: Vec<String> = fg.iter().zip(&bg).map(|(f, b)| format!("{f}|{b}")).collect();
        write_lines(output, &merged);
        Ok(())
    }

    async fn optimize(&self, input: &Path, output: &Path) -> Result<(), DriverError> {
        if !self.record(Operation::Optimize, output)? {
            return Ok(());
        }
        std::fs::copy(input, output).unwrap();
        Ok(())
    }
}

#[async_trait]
impl PageCounter for FakeDriver {
    async fn page_count(&self, pdf: &Path) -> Result<usize, DriverError> {
        Ok(read_lines(pdf).len())
    }
}

/// Write `name.pdf` with `pages` lines `page1..pageN` into `root`.
pub fn write_document(root: &Path, name: &str, pages: usize) -> PathBuf {
    let path = root.join(format!("{name}.pdf"));
    let lines: Vec<String> = (1..=pages).map(|p| format!("page{p}")).collect();
    write_lines(&path, &lines);
    path
}

/// What the final artifact of a `pages`-page document must contain.
pub fn expected_final(pages: usize) -> Vec<String> {
    (1..=pages).map(|p| format!("T:page{p}|R:B:page{p}")).collect()
}

/// Stage directories of `item` currently under `root`.
pub fn stage_dirs(root: &Path, item: &str) -> Vec<String> {
    let prefix = format!("{item}_");
    let mut dirs: Vec<String> = std::fs::read_dir(root)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with(&prefix))
        .collect();
    dirs.sort();
    dirs
}

/// Config with no output wait, so failing stages fail fast.
pub fn fast_config() -> PipelineConfig {
    PipelineConfig::builder()
        .output_wait(Duration::ZERO)
        .poll_interval(Duration::from_millis(1))
        .build()
        .unwrap()
}
