//! Page-tagged text extraction.
//!
//! Every extracted page is emitted as a single line prefixed with a
//! `[Page k]` marker. Answers cite pages by that number, so the marker format
//! is part of the contract with the answer service and must stay verbatim.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::engine::{EngineError, OwnedHandle, PdfEngine};

/// Default number of pages indexed per document.
pub const DEFAULT_MAX_PAGES: u32 = 50;

/// Text returned for a document that opens but has no pages.
pub const NO_READABLE_PAGES: &str = "[No readable pages]";

/// Placeholder emitted after the marker of a page whose text could not be read.
pub const FAILED_PAGE_PLACEHOLDER: &str = "[extraction failed]";

#[derive(Error, Debug)]
pub enum ExtractionError {
    /// The buffer could not be opened as a PDF at all.
    #[error("could not read document: {0}")]
    Failure(#[source] EngineError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Upper bound on extracted pages. Always at least 1.
    pub max_pages: u32,
}

impl ExtractOptions {
    pub fn new(max_pages: u32) -> Self {
        Self {
            max_pages: max_pages.max(1),
        }
    }
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAGES)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    /// Page-tagged text, one `[Page k] ...` segment per extracted page.
    pub text: String,
    pub total_pages: u32,
    pub extracted_pages: u32,
    /// Pages that produced a placeholder instead of text.
    pub failed_pages: Vec<u32>,
    pub truncated: bool,
}

/// A page recovered from page-tagged text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSegment<'a> {
    pub page: u32,
    pub text: &'a str,
}

pub fn page_marker(page: u32) -> String {
    format!("[Page {page}]")
}

pub fn truncation_notice(extracted: u32, total: u32) -> String {
    format!("[Truncated: only the first {extracted} of {total} pages were indexed]")
}

/// Extract page-tagged text from a PDF buffer.
///
/// Pages past `options.max_pages` are skipped and a truncation notice is
/// appended. A page that fails is replaced by a placeholder; only a buffer
/// that cannot be opened fails the whole extraction. The document handle is
/// released before returning on every path.
pub async fn extract_text(
    engine: &dyn PdfEngine,
    bytes: &[u8],
    options: ExtractOptions,
) -> Result<ExtractedText, ExtractionError> {
    let handle = engine
        .open(bytes.to_vec())
        .await
        .map_err(ExtractionError::Failure)?;
    let handle = OwnedHandle::new(handle);

    let total_pages = handle.page_count();
    if total_pages == 0 {
        tracing::debug!("document has no pages");
        return Ok(ExtractedText {
            text: NO_READABLE_PAGES.to_string(),
            total_pages: 0,
            extracted_pages: 0,
            failed_pages: Vec::new(),
            truncated: false,
        });
    }

    let limit = total_pages.min(options.max_pages);
    let mut segments = Vec::with_capacity(limit as usize + 1);
    let mut failed_pages = Vec::new();

    for number in 1..=limit {
        let marker = page_marker(number);
        match page_text(&handle, number).await {
            Ok(text) if text.is_empty() => segments.push(marker),
            Ok(text) => segments.push(format!("{marker} {text}")),
            Err(e) => {
                tracing::warn!(page = number, error = %e, "page text extraction failed");
                failed_pages.push(number);
                segments.push(format!("{marker} {FAILED_PAGE_PLACEHOLDER}"));
            }
        }
    }

    let truncated = total_pages > limit;
    if truncated {
        segments.push(truncation_notice(limit, total_pages));
    }

    tracing::debug!(
        total_pages,
        extracted = limit,
        failed = failed_pages.len(),
        "extraction complete"
    );

    Ok(ExtractedText {
        text: segments.join("\n\n"),
        total_pages,
        extracted_pages: limit,
        failed_pages,
        truncated,
    })
}

async fn page_text(handle: &OwnedHandle, number: u32) -> Result<String, EngineError> {
    let page = handle.page(number).await?;
    let runs = page.text_runs().await?;
    Ok(join_runs(&runs))
}

/// Join text runs with single spaces.
///
/// Whitespace inside a run is collapsed too, line breaks included, not only
/// the gaps between runs. A page's text therefore always sits on its
/// `[Page k]` line, which is what [`page_segments`] parses.
fn join_runs(runs: &[String]) -> String {
    runs.iter()
        .flat_map(|run| run.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

static PAGE_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\[Page (\d+)\](?: (.*))?$").unwrap());

/// Recover `(page, text)` pairs from page-tagged text, in document order.
pub fn page_segments(text: &str) -> Vec<PageSegment<'_>> {
    PAGE_LINE_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let page = caps.get(1)?.as_str().parse().ok()?;
            let text = caps.get(2).map_or("", |m| m.as_str());
            Some(PageSegment { page, text })
        })
        .collect()
}

/// Text of a single page, if it was extracted.
pub fn page_text_of(text: &str, page: u32) -> Option<&str> {
    page_segments(text)
        .into_iter()
        .find(|s| s.page == page)
        .map(|s| s.text)
}
