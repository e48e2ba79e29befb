//! The PDF engine seam.
//!
//! Parsing and rasterization are delegated to an external engine (MuPDF in
//! `citedoc-pdf-mupdf`, [`mock::MockEngine`] in tests). The traits mirror the
//! engine's own object model: a document handle, 1-indexed pages, and a
//! cancellable render primitive. Futures are `!Send`; everything in this crate
//! runs on a single-threaded cooperative executor.

use std::cell::Cell;

use futures_util::future::LocalBoxFuture;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub mod mock;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("failed to open PDF: {0}")]
    OpenError(String),
    #[error("failed to load page {page}: {message}")]
    PageError { page: u32, message: String },
    #[error("failed to extract text: {0}")]
    ExtractionError(String),
    #[error("failed to render page: {0}")]
    RenderError(String),
    #[error("render cancelled")]
    Cancelled,
    #[error("document handle already released")]
    Released,
}

/// Page dimensions in PDF points at scale 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

/// Target geometry handed to [`PdfPage::render`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderViewport {
    /// Points-to-pixels factor, already multiplied by the display density.
    pub scale: f32,
    pub width: u32,
    pub height: u32,
}

/// A rasterized page: tightly packed RGBA8 rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Entry point of a PDF engine.
pub trait PdfEngine {
    /// Open a document from an in-memory buffer. The engine takes ownership
    /// of the bytes; no streaming or on-demand fetching is involved.
    fn open(&self, bytes: Vec<u8>) -> LocalBoxFuture<'_, Result<Box<dyn PdfHandle>, EngineError>>;
}

/// An open document. Owns the engine's native memory until [`destroy`](PdfHandle::destroy).
pub trait PdfHandle {
    fn page_count(&self) -> u32;

    /// Fetch a page by 1-based number.
    fn page(&self, number: u32) -> LocalBoxFuture<'_, Result<Box<dyn PdfPage>, EngineError>>;

    /// Release the native document. Further calls return [`EngineError::Released`].
    fn destroy(&self);
}

pub trait PdfPage {
    fn size(&self) -> PageSize;

    /// Text runs in reading order.
    fn text_runs(&self) -> LocalBoxFuture<'_, Result<Vec<String>, EngineError>>;

    /// Rasterize the page. Implementations must stop early and return
    /// [`EngineError::Cancelled`] once `cancel` fires.
    fn render(
        &self,
        viewport: RenderViewport,
        cancel: CancellationToken,
    ) -> LocalBoxFuture<'_, Result<Raster, EngineError>>;
}

/// Owning wrapper that calls [`PdfHandle::destroy`] exactly once: either on an
/// explicit [`release`](OwnedHandle::release) or when dropped.
pub struct OwnedHandle {
    inner: Box<dyn PdfHandle>,
    released: Cell<bool>,
}

impl OwnedHandle {
    pub fn new(inner: Box<dyn PdfHandle>) -> Self {
        Self {
            inner,
            released: Cell::new(false),
        }
    }

    pub fn page_count(&self) -> u32 {
        self.inner.page_count()
    }

    pub async fn page(&self, number: u32) -> Result<Box<dyn PdfPage>, EngineError> {
        if self.is_released() {
            return Err(EngineError::Released);
        }
        self.inner.page(number).await
    }

    pub fn release(&self) {
        if !self.released.replace(true) {
            self.inner.destroy();
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.get()
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{MockEngine, MockPage};
    use super::*;

    #[tokio::test]
    async fn owned_handle_destroys_once() {
        let engine = MockEngine::new(vec![MockPage::text(&["a"])]);
        let stats = engine.stats();
        let handle = OwnedHandle::new(engine.open(b"%PDF".to_vec()).await.unwrap());

        handle.release();
        handle.release();
        drop(handle);

        assert_eq!(stats.destroyed(), 1);
    }

    #[tokio::test]
    async fn released_handle_refuses_pages() {
        let engine = MockEngine::new(vec![MockPage::text(&["a"])]);
        let handle = OwnedHandle::new(engine.open(b"%PDF".to_vec()).await.unwrap());
        handle.release();

        assert!(matches!(handle.page(1).await, Err(EngineError::Released)));
    }

    #[tokio::test]
    async fn drop_releases_handle() {
        let engine = MockEngine::new(vec![MockPage::text(&["a"])]);
        let stats = engine.stats();
        {
            let _handle = OwnedHandle::new(engine.open(b"%PDF".to_vec()).await.unwrap());
            assert_eq!(stats.destroyed(), 0);
        }
        assert_eq!(stats.destroyed(), 1);
    }
}
