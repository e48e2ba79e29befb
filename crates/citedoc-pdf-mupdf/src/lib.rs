use std::cell::RefCell;

use futures_util::future::{FutureExt, LocalBoxFuture};
use mupdf::{Colorspace, Document, Matrix, Page, Pixmap, TextPageFlags};
use tokio_util::sync::CancellationToken;

use citedoc_core::engine::{PageSize, Raster, RenderViewport};
use citedoc_core::{EngineError, PdfEngine, PdfHandle, PdfPage};

const PDF_MIME: &str = "application/pdf";

/// MuPDF-based implementation of [`PdfEngine`].
///
/// This crate is the sole AGPL island: it isolates the mupdf dependency
/// (which is AGPL-3.0) so that the core library and its tests do not
/// transitively depend on it.
///
/// MuPDF calls are synchronous. Each engine call runs to completion on the
/// current thread; rendering checks the cancellation token before and after
/// rasterizing and yields once so a superseding request can be observed.
#[derive(Debug, Default, Clone, Copy)]
pub struct MupdfEngine;

impl MupdfEngine {
    pub fn new() -> Self {
        Self
    }
}

impl PdfEngine for MupdfEngine {
    fn open(&self, bytes: Vec<u8>) -> LocalBoxFuture<'_, Result<Box<dyn PdfHandle>, EngineError>> {
        futures_util::future::ready(open_document(&bytes)).boxed_local()
    }
}

fn open_document(bytes: &[u8]) -> Result<Box<dyn PdfHandle>, EngineError> {
    let document =
        Document::from_bytes(bytes, PDF_MIME).map_err(|e| EngineError::OpenError(e.to_string()))?;

    if document
        .needs_password()
        .map_err(|e| EngineError::OpenError(e.to_string()))?
    {
        return Err(EngineError::OpenError("document is password protected".into()));
    }

    let page_count = document
        .page_count()
        .map_err(|e| EngineError::OpenError(e.to_string()))?;
    let page_count = u32::try_from(page_count).unwrap_or(0);
    tracing::debug!(page_count, bytes = bytes.len(), "mupdf document opened");

    Ok(Box::new(MupdfHandle {
        document: RefCell::new(Some(document)),
        page_count,
    }))
}

struct MupdfHandle {
    /// `None` once destroyed.
    document: RefCell<Option<Document>>,
    page_count: u32,
}

impl MupdfHandle {
    fn load_page(&self, number: u32) -> Result<Box<dyn PdfPage>, EngineError> {
        let document = self.document.borrow();
        let document = document.as_ref().ok_or(EngineError::Released)?;
        let page_error = |message: String| EngineError::PageError {
            page: number,
            message,
        };

        if number == 0 || number > self.page_count {
            return Err(page_error("page out of range".into()));
        }

        let page = document
            .load_page((number - 1) as i32)
            .map_err(|e| page_error(e.to_string()))?;
        let bounds = page.bounds().map_err(|e| page_error(e.to_string()))?;
        let size = PageSize {
            width: bounds.x1 - bounds.x0,
            height: bounds.y1 - bounds.y0,
        };

        Ok(Box::new(MupdfPage { page, size }))
    }
}

impl PdfHandle for MupdfHandle {
    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn page(&self, number: u32) -> LocalBoxFuture<'_, Result<Box<dyn PdfPage>, EngineError>> {
        futures_util::future::ready(self.load_page(number)).boxed_local()
    }

    fn destroy(&self) {
        if self.document.borrow_mut().take().is_some() {
            tracing::debug!("mupdf document released");
        }
    }
}

struct MupdfPage {
    page: Page,
    size: PageSize,
}

impl MupdfPage {
    /// One run per text line, in the order MuPDF lays out blocks.
    fn lines(&self) -> Result<Vec<String>, EngineError> {
        let text_page = self
            .page
            .to_text_page(TextPageFlags::empty())
            .map_err(|e| EngineError::ExtractionError(e.to_string()))?;

        let mut runs = Vec::new();
        for block in text_page.blocks() {
            for line in block.lines() {
                let text: String = line
                    .chars()
                    .map(|c| c.char().unwrap_or('\u{FFFD}'))
                    .collect();
                if !text.trim().is_empty() {
                    runs.push(text);
                }
            }
        }
        Ok(runs)
    }

    /// Only `viewport.scale` is applied. MuPDF rounds the pixmap bounds
    /// itself, so the raster can be a pixel off the requested size; callers
    /// take the size from the returned [`Raster`].
    fn rasterize(&self, viewport: RenderViewport) -> Result<Raster, EngineError> {
        let transform = Matrix::new_scale(viewport.scale, viewport.scale);
        let pixmap = self
            .page
            .to_pixmap(&transform, &Colorspace::device_rgb(), false, false)
            .map_err(|e| EngineError::RenderError(e.to_string()))?;
        pixmap_to_rgba(&pixmap)
    }
}

impl PdfPage for MupdfPage {
    fn size(&self) -> PageSize {
        self.size
    }

    fn text_runs(&self) -> LocalBoxFuture<'_, Result<Vec<String>, EngineError>> {
        futures_util::future::ready(self.lines()).boxed_local()
    }

    fn render(
        &self,
        viewport: RenderViewport,
        cancel: CancellationToken,
    ) -> LocalBoxFuture<'_, Result<Raster, EngineError>> {
        async move {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            tokio::task::yield_now().await;
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let raster = self.rasterize(viewport)?;
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            Ok(raster)
        }
        .boxed_local()
    }
}

/// Copy a pixmap into tightly packed RGBA rows, dropping row padding and
/// adding an opaque alpha channel when the pixmap has none.
fn pixmap_to_rgba(pixmap: &Pixmap) -> Result<Raster, EngineError> {
    let n = pixmap.n() as usize;
    if n < 3 {
        return Err(EngineError::RenderError(format!(
            "unsupported pixmap format: {n} channels"
        )));
    }

    let width = pixmap.width() as usize;
    let height = pixmap.height() as usize;
    let stride = pixmap.stride() as usize;
    let samples = pixmap.samples();
    let row_bytes = width * n;
    if samples.len() < stride.saturating_mul(height) || row_bytes > stride {
        return Err(EngineError::RenderError("pixmap buffer size mismatch".into()));
    }

    let mut pixels = Vec::with_capacity(width * height * 4);
    for y in 0..height {
        let row = &samples[y * stride..y * stride + row_bytes];
        for px in row.chunks_exact(n) {
            pixels.extend_from_slice(&px[..3]);
            pixels.push(if n >= 4 { px[3] } else { u8::MAX });
        }
    }

    Ok(Raster {
        width: width as u32,
        height: height as u32,
        pixels,
    })
}

#[cfg(test)]
mod tests {
    use citedoc_core::engine::OwnedHandle;
    use citedoc_core::extract::{ExtractOptions, page_segments};
    use citedoc_core::extract_text;

    use super::*;

    /// A minimal uncompressed PDF with one Helvetica text line per page.
    fn minimal_pdf(pages: &[&str]) -> Vec<u8> {
        let font_id = 3;
        let first_page_id = 4;
        let page_ids: Vec<usize> = (0..pages.len()).map(|i| first_page_id + 2 * i).collect();

        let mut objects = vec![
            "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
            format!(
                "<< /Type /Pages /Kids [{}] /Count {} >>",
                page_ids
                    .iter()
                    .map(|id| format!("{id} 0 R"))
                    .collect::<Vec<_>>()
                    .join(" "),
                pages.len()
            ),
            "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
        ];
        for (text, id) in pages.iter().zip(&page_ids) {
            objects.push(format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 200 100] \
                 /Resources << /Font << /F1 {font_id} 0 R >> >> /Contents {} 0 R >>",
                id + 1
            ));
            let stream = format!("BT /F1 12 Tf 20 50 Td ({text}) Tj ET");
            objects.push(format!(
                "<< /Length {} >>\nstream\n{stream}\nendstream",
                stream.len()
            ));
        }

        let mut out = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::new();
        for (i, body) in objects.iter().enumerate() {
            offsets.push(out.len());
            out.extend_from_slice(format!("{} 0 obj\n{body}\nendobj\n", i + 1).as_bytes());
        }
        let xref = out.len();
        out.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
        for offset in offsets {
            out.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
        }
        out.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref}\n%%EOF\n",
                objects.len() + 1
            )
            .as_bytes(),
        );
        out
    }

    #[tokio::test]
    async fn garbage_fails_to_open() {
        let result = MupdfEngine::new().open(b"definitely not a pdf".to_vec()).await;
        assert!(matches!(result, Err(EngineError::OpenError(_))));
    }

    #[tokio::test]
    async fn extracts_page_tagged_text() {
        let pdf = minimal_pdf(&["Clause one applies", "Clause two applies"]);
        let out = extract_text(&MupdfEngine::new(), &pdf, ExtractOptions::default())
            .await
            .unwrap();

        assert_eq!(out.total_pages, 2);
        let segments = page_segments(&out.text);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].page, 1);
        assert!(segments[0].text.contains("Clause one"));
        assert!(segments[1].text.contains("Clause two"));
    }

    #[tokio::test]
    async fn renders_page_at_scale() {
        let pdf = minimal_pdf(&["Hello"]);
        let handle = OwnedHandle::new(MupdfEngine::new().open(pdf).await.unwrap());
        let page = handle.page(1).await.unwrap();
        assert_eq!(page.size(), PageSize { width: 200.0, height: 100.0 });

        let viewport = RenderViewport {
            scale: 2.0,
            width: 400,
            height: 200,
        };
        let raster = page.render(viewport, CancellationToken::new()).await.unwrap();
        assert_eq!((raster.width, raster.height), (400, 200));
        assert_eq!(raster.pixels.len(), 400 * 200 * 4);
        assert!(raster.pixels.chunks_exact(4).all(|px| px[3] == u8::MAX));
    }

    #[tokio::test]
    async fn cancelled_render_returns_cancelled() {
        let handle = OwnedHandle::new(MupdfEngine::new().open(minimal_pdf(&["x"])).await.unwrap());
        let page = handle.page(1).await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let viewport = RenderViewport {
            scale: 1.0,
            width: 200,
            height: 100,
        };
        assert!(matches!(
            page.render(viewport, cancel).await,
            Err(EngineError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn released_handle_refuses_pages() {
        let handle = MupdfEngine::new().open(minimal_pdf(&["x"])).await.unwrap();
        handle.destroy();
        assert!(matches!(handle.page(1).await, Err(EngineError::Released)));
        assert!(matches!(
            handle.page(0).await,
            Err(EngineError::Released)
        ));
    }
}
