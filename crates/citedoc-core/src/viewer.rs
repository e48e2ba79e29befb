//! The citation viewer: one [`ViewTarget`] at a time, shown through a
//! [`PageRenderer`] inside a [`ViewportController`] window.

use std::rc::Rc;

use crate::render::{PageRenderer, RenderTask, SessionState, ViewerError};
use crate::viewport::{Size, ViewportConfig, ViewportController, ZoomLevel};
use crate::{Config, PdfEngine, ViewTarget};

pub struct Viewer {
    renderer: PageRenderer,
    viewport: Option<ViewportController>,
    zoom: ZoomLevel,
    target: Option<ViewTarget>,
    viewport_config: ViewportConfig,
}

impl Viewer {
    pub fn new(engine: Rc<dyn PdfEngine>, config: &Config) -> Self {
        Self {
            renderer: PageRenderer::new(engine)
                .with_device_pixel_ratio(config.viewer.device_pixel_ratio),
            viewport: None,
            zoom: ZoomLevel::new(&config.viewer),
            target: None,
            viewport_config: config.viewport,
        }
    }

    /// Show `target`, replacing whatever was open.
    ///
    /// The previous session is torn down before the new document is loaded.
    /// On success the window is laid out in `available` and the returned task
    /// renders the cited page.
    pub async fn open(
        &mut self,
        target: ViewTarget,
        available: Size,
    ) -> Result<RenderTask, ViewerError> {
        self.close();
        tracing::debug!(
            document = %target.document_name,
            clause = %target.clause,
            page = target.page,
            "opening citation"
        );

        self.renderer.open(&target.raw_bytes, target.page).await?;
        let page = self.renderer.current_page().ok_or(ViewerError::NoSession)?;

        self.viewport = Some(ViewportController::open(available, self.viewport_config));
        self.target = Some(target);
        self.renderer.render_page(page, self.zoom.scale())
    }

    /// Render `page` (clamped) at the current zoom.
    pub fn show(&mut self, page: u32) -> Result<RenderTask, ViewerError> {
        self.renderer.render_page(page, self.zoom.scale())
    }

    pub fn next_page(&mut self) -> Result<RenderTask, ViewerError> {
        let page = self.current_page()?;
        self.show(page.saturating_add(1))
    }

    pub fn prev_page(&mut self) -> Result<RenderTask, ViewerError> {
        let page = self.current_page()?;
        self.show(page.saturating_sub(1))
    }

    pub fn zoom_in(&mut self) -> Result<RenderTask, ViewerError> {
        self.zoom.zoom_in();
        self.rerender()
    }

    pub fn zoom_out(&mut self) -> Result<RenderTask, ViewerError> {
        self.zoom.zoom_out();
        self.rerender()
    }

    pub fn set_zoom(&mut self, scale: f32) -> Result<RenderTask, ViewerError> {
        self.zoom.set(scale);
        self.rerender()
    }

    fn rerender(&mut self) -> Result<RenderTask, ViewerError> {
        let page = self.current_page()?;
        self.show(page)
    }

    fn current_page(&self) -> Result<u32, ViewerError> {
        self.renderer.current_page().ok_or(ViewerError::NoSession)
    }

    /// Dismiss the viewer. Cancels a pending render and releases the document.
    pub fn close(&mut self) {
        if let Some(target) = self.target.take() {
            tracing::debug!(document = %target.document_name, "closing viewer");
        }
        self.viewport = None;
        self.renderer.close();
    }

    pub fn state(&self) -> SessionState {
        self.renderer.state()
    }

    /// True while a document is loading or a page is being drawn.
    pub fn is_busy(&self) -> bool {
        matches!(self.state(), SessionState::Opening | SessionState::Rendering)
    }

    pub fn target(&self) -> Option<&ViewTarget> {
        self.target.as_ref()
    }

    pub fn renderer(&self) -> &PageRenderer {
        &self.renderer
    }

    pub fn viewport(&self) -> Option<&ViewportController> {
        self.viewport.as_ref()
    }

    pub fn viewport_mut(&mut self) -> Option<&mut ViewportController> {
        self.viewport.as_mut()
    }

    pub fn zoom(&self) -> f32 {
        self.zoom.scale()
    }
}
