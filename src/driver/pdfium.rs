//! Page counting via pdfium.
//!
//! The rasterize step must know, before it runs, how many page files each
//! part will produce. pdfium gives that without rendering anything.
//!
//! pdfium is bound at runtime: `PDFIUM_LIB_PATH` (path to the shared
//! library) if set, otherwise the system library search path. Calls run in
//! `spawn_blocking` because pdfium is synchronous and not async-safe.

use super::PageCounter;
use crate::error::DriverError;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::debug;

const OPERATION: &str = "page_count";

/// A [`PageCounter`] backed by the pdfium library.
#[derive(Debug, Clone, Default)]
pub struct PdfiumPageCounter {
    library: Option<PathBuf>,
}

impl PdfiumPageCounter {
    /// Bind to `PDFIUM_LIB_PATH` when set, else the system library.
    pub fn new() -> Self {
        Self {
            library: std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from),
        }
    }

    /// Bind to the pdfium shared library at `path`.
    pub fn with_library(path: impl Into<PathBuf>) -> Self {
        Self {
            library: Some(path.into()),
        }
    }
}

#[async_trait]
impl PageCounter for PdfiumPageCounter {
    async fn page_count(&self, pdf: &Path) -> Result<usize, DriverError> {
        let library = self.library.clone();
        let path = pdf.to_path_buf();

        tokio::task::spawn_blocking(move || count_pages_blocking(library.as_deref(), &path))
            .await
            .map_err(|e| failed(format!("page count task panicked: {e}")))?
    }
}

fn count_pages_blocking(library: Option<&Path>, pdf: &Path) -> Result<usize, DriverError> {
    let bindings = match library {
        Some(lib) => Pdfium::bind_to_library(lib),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| failed(format!("cannot bind pdfium: {:?}", e)))?;
    let pdfium = Pdfium::new(bindings);

    let document = pdfium
        .load_pdf_from_file(pdf, None)
        .map_err(|e| failed(format!("cannot open '{}': {:?}", pdf.display(), e)))?;
    let pages = document.pages().len() as usize;
    debug!("{} has {} page(s)", pdf.display(), pages);
    Ok(pages)
}

fn failed(detail: String) -> DriverError {
    DriverError::Failed {
        operation: OPERATION.to_string(),
        detail,
    }
}
