//! PDF text extraction.
//!
//! Every page is read in document order. A page that cannot be read fails
//! the whole extraction.

use std::sync::Arc;

use lopdf::content::Content;
use lopdf::{Document, Object, ObjectId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::OnceCell;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("pdf engine failed to initialize: {0}")]
    EngineLoad(String),
    #[error("not a pdf document")]
    UnsupportedFormat,
    #[error("pdf document could not be opened: {0}")]
    UnreadableDocument(String),
    #[error("page {page} could not be read: {reason}")]
    PageExtraction { page: usize, reason: String },
    #[error("pdf document contains no extractable text ({pages} pages)")]
    NoText { pages: usize },
}

/// How page boundaries appear in the corpus text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageAnnotation {
    /// `--- Página N ---` before each page.
    #[default]
    Marker,
    /// Pages separated by a newline only.
    None,
}

/// Rendering capability: opens documents and yields per-page text fragments.
pub trait PdfEngine: Send + Sync + 'static {
    /// One-time setup. Called at most once successfully per extractor.
    fn initialize(&self) -> Result<(), ExtractError>;

    fn open(&self, bytes: &[u8]) -> Result<Box<dyn PdfDocument>, ExtractError>;
}

pub trait PdfDocument {
    fn page_count(&self) -> usize;

    /// Ordered text fragments of the page at `index` (zero-based).
    fn page_fragments(&self, index: usize) -> Result<Vec<String>, String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDocument {
    pub text: String,
    pub page_count: usize,
}

pub struct DocumentTextExtractor {
    engine: Arc<dyn PdfEngine>,
    ready: OnceCell<()>,
}

impl DocumentTextExtractor {
    pub fn new(engine: Arc<dyn PdfEngine>) -> Self {
        Self {
            engine,
            ready: OnceCell::new(),
        }
    }

    pub fn lopdf() -> Self {
        Self::new(Arc::new(LopdfEngine))
    }

    /// Initialize the engine once. Concurrent callers wait on the same
    /// initialization; a failed attempt is retried by the next caller.
    pub async fn ensure_ready(&self) -> Result<(), ExtractError> {
        self.ready
            .get_or_try_init(|| async {
                let engine = Arc::clone(&self.engine);
                tokio::task::spawn_blocking(move || engine.initialize())
                    .await
                    .map_err(|e| ExtractError::EngineLoad(e.to_string()))??;
                tracing::debug!("pdf engine initialized");
                Ok::<(), ExtractError>(())
            })
            .await
            .map(|_| ())
    }

    pub async fn extract(
        &self,
        bytes: Vec<u8>,
        annotation: PageAnnotation,
    ) -> Result<ExtractedDocument, ExtractError> {
        if !looks_like_pdf(&bytes) {
            return Err(ExtractError::UnsupportedFormat);
        }
        self.ensure_ready().await?;

        let engine = Arc::clone(&self.engine);
        let extracted = tokio::task::spawn_blocking(move || {
            read_all_pages(engine.as_ref(), &bytes, annotation)
        })
        .await
        .map_err(|e| ExtractError::UnreadableDocument(format!("extraction task failed: {e}")))??;

        tracing::info!(
            page_count = extracted.page_count,
            chars = extracted.text.len(),
            "document text extracted"
        );
        Ok(extracted)
    }
}

/// Whether `bytes` carry a `%PDF-` header.
pub fn looks_like_pdf(bytes: &[u8]) -> bool {
    // Readers accept the header anywhere in the first KiB.
    let window = &bytes[..bytes.len().min(1024)];
    window.windows(5).any(|w| w == b"%PDF-")
}

fn read_all_pages(
    engine: &dyn PdfEngine,
    bytes: &[u8],
    annotation: PageAnnotation,
) -> Result<ExtractedDocument, ExtractError> {
    let document = engine.open(bytes)?;
    let page_count = document.page_count();

    let mut pages = Vec::with_capacity(page_count);
    for index in 0..page_count {
        let fragments = document
            .page_fragments(index)
            .map_err(|reason| ExtractError::PageExtraction {
                page: index + 1,
                reason,
            })?;
        pages.push(join_fragments(&fragments));
    }

    if pages.iter().all(|p| p.trim().is_empty()) {
        return Err(ExtractError::NoText { pages: page_count });
    }

    Ok(ExtractedDocument {
        text: join_pages(&pages, annotation),
        page_count,
    })
}

fn join_fragments(fragments: &[String]) -> String {
    fragments
        .iter()
        .map(|f| f.trim())
        .filter(|f| !f.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn join_pages(pages: &[String], annotation: PageAnnotation) -> String {
    match annotation {
        PageAnnotation::None => pages.join("\n"),
        PageAnnotation::Marker => pages
            .iter()
            .enumerate()
            .map(|(i, text)| format!("--- Página {} ---\n{}", i + 1, text))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

// ============================================================
// lopdf engine
// ============================================================

/// Pure-Rust engine backed by `lopdf`. Needs no native setup.
#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfEngine;

impl PdfEngine for LopdfEngine {
    fn initialize(&self) -> Result<(), ExtractError> {
        Ok(())
    }

    fn open(&self, bytes: &[u8]) -> Result<Box<dyn PdfDocument>, ExtractError> {
        let document =
            Document::load_mem(bytes).map_err(|e| ExtractError::UnreadableDocument(e.to_string()))?;
        if document.is_encrypted() {
            return Err(ExtractError::UnreadableDocument(
                "document is encrypted".into(),
            ));
        }
        let pages: Vec<(u32, ObjectId)> = document.get_pages().into_iter().collect();
        Ok(Box::new(LopdfDocument { document, pages }))
    }
}

struct LopdfDocument {
    document: Document,
    pages: Vec<(u32, ObjectId)>,
}

impl PdfDocument for LopdfDocument {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_fragments(&self, index: usize) -> Result<Vec<String>, String> {
        let &(number, page_id) = self
            .pages
            .get(index)
            .ok_or_else(|| format!("page index {index} out of range"))?;

        match self.document.extract_text(&[number]) {
            Ok(text) => Ok(text.lines().map(str::to_string).collect()),
            Err(e) => {
                tracing::debug!(page = number, "font-aware extraction failed, scanning operators: {e}");
                scan_text_operators(&self.document, page_id)
            }
        }
    }
}

/// Collect string operands of the text-showing operators of a page.
fn scan_text_operators(document: &Document, page_id: ObjectId) -> Result<Vec<String>, String> {
    let bytes = document.get_page_content(page_id).map_err(|e| e.to_string())?;
    let content = Content::decode(&bytes).map_err(|e| e.to_string())?;

    let mut fragments = Vec::new();
    for operation in &content.operations {
        if matches!(operation.operator.as_str(), "Tj" | "TJ" | "'" | "\"") {
            for operand in &operation.operands {
                if let Some(text) = decode_pdf_string(operand) {
                    fragments.push(text);
                }
            }
        }
    }
    Ok(fragments)
}

fn decode_pdf_string(obj: &Object) -> Option<String> {
    match obj {
        Object::String(bytes, _) => {
            if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
                let utf16: Vec<u16> = bytes[2..]
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                String::from_utf16(&utf16).ok()
            } else {
                // PDFDocEncoding agrees with Latin-1 for printable text.
                Some(bytes.iter().map(|&b| b as char).collect())
            }
        }
        Object::Array(items) => {
            let joined: String = items.iter().filter_map(decode_pdf_string).collect();
            (!joined.is_empty()).then_some(joined)
        }
        _ => None,
    }
}
