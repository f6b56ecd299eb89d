//! Local text extraction through pdfium.
//!
//! pdfium is CPU-bound and not async-safe, so every call runs inside
//! `spawn_blocking`. The document bytes are handed to pdfium directly.

use super::{TextExtractor, PAGE_BREAK};
use crate::error::BackendError;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::debug;

/// [`TextExtractor`] over the text layer of a PDF.
///
/// Scanned documents without a text layer produce (nearly) empty text, which
/// the strategy engine then treats as insufficient.
#[derive(Debug, Clone, Default)]
pub struct PdfiumTextExtractor {
    library_dir: Option<PathBuf>,
    password: Option<String>,
}

impl PdfiumTextExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look for libpdfium in `dir` before falling back to the system library.
    pub fn with_library_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.library_dir = Some(dir.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

fn bind(library_dir: Option<&Path>) -> Result<Pdfium, BackendError> {
    let bindings = match library_dir {
        Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir))
            .or_else(|_| Pdfium::bind_to_system_library()),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| BackendError::Failed(format!("pdfium library not available: {e:?}")))?;
    Ok(Pdfium::new(bindings))
}

fn extract_blocking(
    bytes: Vec<u8>,
    library_dir: Option<PathBuf>,
    password: Option<String>,
) -> Result<String, BackendError> {
    let pdfium = bind(library_dir.as_deref())?;
    let document = pdfium
        .load_pdf_from_byte_vec(bytes, password.as_deref())
        .map_err(|e| BackendError::Malformed(format!("{e:?}")))?;

    let mut pages = Vec::new();
    for page in document.pages().iter() {
        let text = page
            .text()
            .map_err(|e| BackendError::Failed(format!("{e:?}")))?
            .all();
        pages.push(text);
    }
    debug!("Extracted text layer of {} page(s)", pages.len());
    Ok(pages.join(&PAGE_BREAK.to_string()))
}

#[async_trait]
impl TextExtractor for PdfiumTextExtractor {
    async fn extract_text(&self, bytes: &[u8]) -> Result<String, BackendError> {
        if !bytes.starts_with(b"%PDF") {
            return Err(BackendError::Malformed("not a PDF (missing %PDF magic)".into()));
        }
        let bytes = bytes.to_vec();
        let library_dir = self.library_dir.clone();
        let password = self.password.clone();
        tokio::task::spawn_blocking(move || extract_blocking(bytes, library_dir, password))
            .await
            .map_err(|e| BackendError::Failed(format!("text extraction task panicked: {e}")))?
    }
}
