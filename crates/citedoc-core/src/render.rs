//! Page render engine.
//!
//! A [`PageRenderer`] owns at most one open document (the session) and the
//! surface pages are drawn into. Renders are last-request-wins: issuing a new
//! render cancels the pending one, and a render only writes to the surface if
//! its generation is still the newest when it completes.
//!
//! ```text
//! Closed -> Opening -> Ready <-> Rendering -> ... -> Closed
//!              |                     |
//!              +------> Failed <-----+
//! ```
//!
//! `Failed` ends one attempt only. A failed render leaves the document open
//! and the next [`PageRenderer::render_page`] may succeed.

use std::cell::{Ref, RefCell};
use std::future::IntoFuture;
use std::rc::Rc;

use futures_util::future::{FutureExt, LocalBoxFuture};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::engine::{EngineError, OwnedHandle, PageSize, PdfEngine, Raster, RenderViewport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Opening,
    Ready,
    Rendering,
    Failed,
}

#[derive(Error, Debug)]
pub enum ViewerError {
    #[error("could not load document: {0}")]
    DocumentLoad(#[source] EngineError),
    #[error("could not render page {page}: {source}")]
    PageRender {
        page: u32,
        #[source]
        source: EngineError,
    },
    #[error("no document is open")]
    NoSession,
    #[error("invalid scale {0}: must be a positive number")]
    InvalidScale(f32),
}

/// Geometry of a rendered page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceLayout {
    /// Size in layout units: page size in points times the zoom scale.
    pub logical_width: f32,
    pub logical_height: f32,
    /// Backing-store size: logical size times the display pixel density.
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub scale: f32,
    pub device_pixel_ratio: f32,
}

impl SurfaceLayout {
    pub fn compute(page: PageSize, scale: f32, device_pixel_ratio: f32) -> Self {
        let logical_width = page.width * scale;
        let logical_height = page.height * scale;
        Self {
            logical_width,
            logical_height,
            pixel_width: backing_pixels(logical_width, device_pixel_ratio),
            pixel_height: backing_pixels(logical_height, device_pixel_ratio),
            scale,
            device_pixel_ratio,
        }
    }

    /// Engine viewport producing a raster of exactly the backing size.
    pub fn viewport(&self) -> RenderViewport {
        RenderViewport {
            scale: self.scale * self.device_pixel_ratio,
            width: self.pixel_width,
            height: self.pixel_height,
        }
    }
}

fn backing_pixels(logical: f32, device_pixel_ratio: f32) -> u32 {
    (logical * device_pixel_ratio).ceil().max(1.0) as u32
}

/// Resets a session left in `Opening` when [`PageRenderer::open`] is dropped
/// before the engine answers.
struct OpeningGuard {
    shared: Rc<RefCell<Shared>>,
}

impl Drop for OpeningGuard {
    fn drop(&mut self) {
        if let Ok(mut shared) = self.shared.try_borrow_mut()
            && shared.state == SessionState::Opening
        {
            tracing::debug!("document open abandoned");
            shared.state = SessionState::Closed;
        }
    }
}

/// The raster the open session draws into.
#[derive(Debug, Clone, Default)]
pub struct RenderSurface {
    /// Page currently shown, if any.
    pub page: Option<u32>,
    pub layout: Option<SurfaceLayout>,
    /// RGBA8, `pixel_width * pixel_height * 4` bytes.
    pub pixels: Vec<u8>,
    /// Number of completed writes since the session opened.
    pub writes: u64,
}

impl RenderSurface {
    /// Store `raster` and return the layout as written. Engines may round the
    /// requested viewport, so the pixel size is taken from the raster.
    fn write(&mut self, page: u32, layout: SurfaceLayout, raster: Raster) -> SurfaceLayout {
        let layout = SurfaceLayout {
            pixel_width: raster.width,
            pixel_height: raster.height,
            ..layout
        };
        self.page = Some(page);
        self.layout = Some(layout);
        self.pixels = raster.pixels;
        self.writes += 1;
        layout
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RenderOutcome {
    /// The page reached the surface.
    Rendered { page: u32, layout: SurfaceLayout },
    /// A newer request or a close made this render obsolete. Nothing was written.
    Superseded { page: u32 },
}

struct Session {
    handle: Rc<OwnedHandle>,
    current_page: u32,
    total_pages: u32,
    scale: Option<f32>,
}

struct InFlight {
    generation: u64,
    cancel: CancellationToken,
}

struct Shared {
    state: SessionState,
    session: Option<Session>,
    /// Bumped on every render request; never reset, so a render issued
    /// against an earlier session is stale after a reopen.
    generation: u64,
    in_flight: Option<InFlight>,
    surface: RenderSurface,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|f| f.generation == generation && !f.cancel.is_cancelled())
    }

    fn cancel_in_flight(&mut self) -> bool {
        match self.in_flight.take() {
            Some(prev) => {
                prev.cancel.cancel();
                tracing::debug!(generation = prev.generation, "render superseded");
                true
            }
            None => false,
        }
    }
}

pub struct PageRenderer {
    engine: Rc<dyn PdfEngine>,
    device_pixel_ratio: f32,
    shared: Rc<RefCell<Shared>>,
}

impl PageRenderer {
    pub fn new(engine: Rc<dyn PdfEngine>) -> Self {
        Self {
            engine,
            device_pixel_ratio: 1.0,
            shared: Rc::new(RefCell::new(Shared {
                state: SessionState::Closed,
                session: None,
                generation: 0,
                in_flight: None,
                surface: RenderSurface::default(),
            })),
        }
    }

    pub fn with_device_pixel_ratio(mut self, device_pixel_ratio: f32) -> Self {
        self.set_device_pixel_ratio(device_pixel_ratio);
        self
    }

    /// Takes effect from the next render. Non-positive values fall back to 1.
    pub fn set_device_pixel_ratio(&mut self, device_pixel_ratio: f32) {
        self.device_pixel_ratio = if device_pixel_ratio.is_finite() && device_pixel_ratio > 0.0 {
            device_pixel_ratio
        } else {
            1.0
        };
    }

    pub fn device_pixel_ratio(&self) -> f32 {
        self.device_pixel_ratio
    }

    pub fn state(&self) -> SessionState {
        self.shared.borrow().state
    }

    pub fn is_open(&self) -> bool {
        self.shared.borrow().session.is_some()
    }

    pub fn current_page(&self) -> Option<u32> {
        self.shared.borrow().session.as_ref().map(|s| s.current_page)
    }

    pub fn total_pages(&self) -> Option<u32> {
        self.shared.borrow().session.as_ref().map(|s| s.total_pages)
    }

    /// Scale of the most recent render request.
    pub fn scale(&self) -> Option<f32> {
        self.shared.borrow().session.as_ref().and_then(|s| s.scale)
    }

    pub fn is_rendering(&self) -> bool {
        self.shared.borrow().in_flight.is_some()
    }

    pub fn surface(&self) -> Ref<'_, RenderSurface> {
        Ref::map(self.shared.borrow(), |s| &s.surface)
    }

    /// Open a document, closing the current one first.
    ///
    /// The bytes are copied since the engine takes ownership of its input.
    /// Returns the page count. The initial page is clamped into range and
    /// becomes [`current_page`](Self::current_page); nothing is rendered yet.
    pub async fn open(&mut self, bytes: &[u8], initial_page: u32) -> Result<u32, ViewerError> {
        self.close();
        self.shared.borrow_mut().state = SessionState::Opening;
        let _opening = OpeningGuard {
            shared: Rc::clone(&self.shared),
        };
        tracing::debug!(bytes = bytes.len(), "opening document");

        let handle = match self.engine.open(bytes.to_vec()).await {
            Ok(handle) => OwnedHandle::new(handle),
            Err(e) => return Err(self.fail_open(e)),
        };

        let total_pages = handle.page_count();
        if total_pages == 0 {
            handle.release();
            return Err(self.fail_open(EngineError::OpenError("document has no pages".into())));
        }

        let current_page = initial_page.clamp(1, total_pages);
        let mut shared = self.shared.borrow_mut();
        shared.session = Some(Session {
            handle: Rc::new(handle),
            current_page,
            total_pages,
            scale: None,
        });
        shared.state = SessionState::Ready;
        tracing::debug!(total_pages, current_page, "document opened");
        Ok(total_pages)
    }

    fn fail_open(&self, error: EngineError) -> ViewerError {
        tracing::warn!(error = %error, "document load failed");
        self.shared.borrow_mut().state = SessionState::Failed;
        ViewerError::DocumentLoad(error)
    }

    /// Request a render of `page` at `scale`.
    ///
    /// The page is clamped into `[1, total_pages]`. Any render still in flight
    /// is cancelled before this one is issued. The returned task does the work
    /// when awaited; dropping it unawaited cancels it.
    pub fn render_page(&mut self, page: u32, scale: f32) -> Result<RenderTask, ViewerError> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(ViewerError::InvalidScale(scale));
        }

        let mut guard = self.shared.borrow_mut();
        let shared = &mut *guard;
        let session = shared.session.as_mut().ok_or(ViewerError::NoSession)?;

        let page = page.clamp(1, session.total_pages);
        session.current_page = page;
        session.scale = Some(scale);
        let handle = Rc::clone(&session.handle);

        shared.cancel_in_flight();
        shared.generation += 1;
        let generation = shared.generation;
        let cancel = CancellationToken::new();
        shared.in_flight = Some(InFlight {
            generation,
            cancel: cancel.clone(),
        });
        shared.state = SessionState::Rendering;
        tracing::debug!(page, scale, generation, "render requested");

        Ok(RenderTask {
            shared: Rc::clone(&self.shared),
            handle,
            page,
            scale,
            device_pixel_ratio: self.device_pixel_ratio,
            generation,
            cancel,
            finished: false,
        })
    }

    /// Cancel any pending render and release the document. Idempotent.
    pub fn close(&mut self) {
        let mut shared = self.shared.borrow_mut();
        shared.cancel_in_flight();
        if let Some(session) = shared.session.take() {
            session.handle.release();
            tracing::debug!(total_pages = session.total_pages, "session closed");
        }
        shared.surface = RenderSurface::default();
        shared.state = SessionState::Closed;
    }
}

impl Drop for PageRenderer {
    fn drop(&mut self) {
        self.close();
    }
}

/// A pending page render issued by [`PageRenderer::render_page`].
#[must_use = "a render task does nothing unless awaited"]
pub struct RenderTask {
    shared: Rc<RefCell<Shared>>,
    handle: Rc<OwnedHandle>,
    page: u32,
    scale: f32,
    device_pixel_ratio: f32,
    generation: u64,
    cancel: CancellationToken,
    finished: bool,
}

impl std::fmt::Debug for RenderTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTask")
            .field("page", &self.page)
            .field("scale", &self.scale)
            .field("device_pixel_ratio", &self.device_pixel_ratio)
            .field("generation", &self.generation)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl RenderTask {
    /// The clamped page this task renders.
    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub async fn run(mut self) -> Result<RenderOutcome, ViewerError> {
        let result = self.rasterize().await;
        self.finish(result)
    }

    async fn rasterize(&self) -> Result<(SurfaceLayout, Raster), EngineError> {
        let page = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(EngineError::Cancelled),
            page = self.handle.page(self.page) => page?,
        };
        let layout = SurfaceLayout::compute(page.size(), self.scale, self.device_pixel_ratio);
        let raster = page.render(layout.viewport(), self.cancel.clone()).await?;
        Ok((layout, raster))
    }

    fn finish(
        &mut self,
        result: Result<(SurfaceLayout, Raster), EngineError>,
    ) -> Result<RenderOutcome, ViewerError> {
        self.finished = true;
        let page = self.page;
        let mut shared = self.shared.borrow_mut();

        // A stale render never touches the surface or the session state,
        // whatever the engine returned.
        if !shared.is_current(self.generation) {
            tracing::debug!(page, generation = self.generation, "discarding stale render");
            return Ok(RenderOutcome::Superseded { page });
        }
        shared.in_flight = None;

        match result {
            Ok((layout, raster)) => {
                let layout = shared.surface.write(page, layout, raster);
                shared.state = SessionState::Ready;
                tracing::debug!(
                    page,
                    width = layout.pixel_width,
                    height = layout.pixel_height,
                    "page rendered"
                );
                Ok(RenderOutcome::Rendered { page, layout })
            }
            Err(EngineError::Cancelled) => {
                shared.state = SessionState::Ready;
                Ok(RenderOutcome::Superseded { page })
            }
            Err(e) => {
                tracing::warn!(page, error = %e, "page render failed");
                shared.state = SessionState::Failed;
                Err(ViewerError::PageRender { page, source: e })
            }
        }
    }
}

impl IntoFuture for RenderTask {
    type Output = Result<RenderOutcome, ViewerError>;
    type IntoFuture = LocalBoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        self.run().boxed_local()
    }
}

impl Drop for RenderTask {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.cancel.cancel();
        if let Ok(mut shared) = self.shared.try_borrow_mut()
            && shared
                .in_flight
                .as_ref()
                .is_some_and(|f| f.generation == self.generation)
        {
            shared.in_flight = None;
            if shared.state == SessionState::Rendering {
                shared.state = SessionState::Ready;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::engine::mock::{MockEngine, MockPage};

    fn renderer(engine: MockEngine) -> PageRenderer {
        PageRenderer::new(Rc::new(engine))
    }

    #[test]
    fn layout_scales_backing_store_by_pixel_ratio() {
        let page = PageSize {
            width: 612.0,
            height: 792.0,
        };
        let layout = SurfaceLayout::compute(page, 1.5, 2.0);
        assert_eq!(layout.logical_width, 918.0);
        assert_eq!(layout.logical_height, 1188.0);
        assert_eq!(layout.pixel_width, 1836);
        assert_eq!(layout.pixel_height, 2376);

        let viewport = layout.viewport();
        assert_eq!(viewport.scale, 3.0);
        assert_eq!((viewport.width, viewport.height), (1836, 2376));
    }

    #[test]
    fn layout_rounds_fractional_pixels_up() {
        let page = PageSize {
            width: 10.0,
            height: 10.0,
        };
        let layout = SurfaceLayout::compute(page, 1.0, 1.25);
        assert_eq!(layout.pixel_width, 13);
    }

    #[tokio::test]
    async fn open_clamps_initial_page() {
        let mut r = renderer(MockEngine::with_pages(4));
        assert_eq!(r.state(), SessionState::Closed);

        assert_eq!(r.open(b"%PDF", 9).await.unwrap(), 4);
        assert_eq!(r.state(), SessionState::Ready);
        assert_eq!(r.current_page(), Some(4));

        r.open(b"%PDF", 0).await.unwrap();
        assert_eq!(r.current_page(), Some(1));
    }

    #[tokio::test]
    async fn open_failure_sets_failed() {
        let mut r = renderer(MockEngine::failing_open("password required"));
        let err = r.open(b"%PDF", 1).await.unwrap_err();
        assert!(matches!(err, ViewerError::DocumentLoad(EngineError::OpenError(_))));
        assert_eq!(r.state(), SessionState::Failed);
        assert!(!r.is_open());
    }

    #[tokio::test]
    async fn zero_page_document_fails_and_releases_handle() {
        let engine = MockEngine::new(Vec::new());
        let stats = engine.stats();
        let mut r = renderer(engine);
        assert!(matches!(
            r.open(b"%PDF", 1).await,
            Err(ViewerError::DocumentLoad(_))
        ));
        assert_eq!(r.state(), SessionState::Failed);
        assert_eq!(stats.destroyed(), 1);
    }

    #[tokio::test]
    async fn render_writes_surface() {
        let mut r = renderer(MockEngine::with_pages(3)).with_device_pixel_ratio(2.0);
        r.open(b"%PDF", 1).await.unwrap();

        let task = r.render_page(2, 1.0).unwrap();
        assert_eq!(r.state(), SessionState::Rendering);
        let outcome = task.await.unwrap();

        let RenderOutcome::Rendered { page, layout } = outcome else {
            panic!("expected a rendered page, got {outcome:?}");
        };
        assert_eq!(page, 2);
        assert_eq!((layout.pixel_width, layout.pixel_height), (40, 60));
        assert_eq!(r.state(), SessionState::Ready);

        let surface = r.surface();
        assert_eq!(surface.page, Some(2));
        assert_eq!(surface.pixels.len(), 40 * 60 * 4);
        assert!(surface.pixels.iter().all(|&b| b == 2));
        assert_eq!(surface.writes, 1);
    }

    #[tokio::test]
    async fn outcome_reports_the_raster_size_the_engine_produced() {
        let engine = MockEngine::new(vec![
            MockPage::text(&["x"])
                .with_size(50.0, 40.0)
                .with_raster_overshoot(1, 0),
        ]);
        let mut r = renderer(engine);
        r.open(b"%PDF", 1).await.unwrap();

        let outcome = r.render_page(1, 2.0).unwrap().await.unwrap();
        let RenderOutcome::Rendered { layout, .. } = outcome else {
            panic!("expected a rendered page, got {outcome:?}");
        };
        assert_eq!((layout.pixel_width, layout.pixel_height), (101, 80));
        assert_eq!(layout.logical_width, 100.0);

        let surface = r.surface();
        assert_eq!(surface.layout, Some(layout));
        assert_eq!(
            surface.pixels.len(),
            (layout.pixel_width * layout.pixel_height * 4) as usize
        );
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_open_does_not_stay_opening() {
        let engine = MockEngine::with_pages(2).with_open_delay(Duration::from_millis(50));
        let stats = engine.stats();
        let mut r = renderer(engine);

        tokio::select! {
            _ = r.open(b"%PDF", 1) => panic!("open should still be pending"),
            _ = tokio::time::sleep(Duration::from_millis(10)) => {}
        }
        assert_eq!(r.state(), SessionState::Closed);
        assert!(!r.is_open());
        assert_eq!(stats.live_handles(), 0);

        assert_eq!(r.open(b"%PDF", 2).await.unwrap(), 2);
        assert_eq!(r.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn render_requires_open_session_and_valid_scale() {
        let mut r = renderer(MockEngine::with_pages(1));
        assert!(matches!(r.render_page(1, 1.0), Err(ViewerError::NoSession)));

        r.open(b"%PDF", 1).await.unwrap();
        assert!(matches!(r.render_page(1, 0.0), Err(ViewerError::InvalidScale(_))));
        assert!(matches!(r.render_page(1, -1.0), Err(ViewerError::InvalidScale(_))));
        assert!(matches!(
            r.render_page(1, f32::NAN),
            Err(ViewerError::InvalidScale(_))
        ));
        assert_eq!(r.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn render_failure_is_reported_and_session_survives() {
        let engine = MockEngine::new(vec![
            MockPage::text(&["ok"]),
            MockPage::failing_render("corrupt image stream"),
        ]);
        let mut r = renderer(engine);
        r.open(b"%PDF", 1).await.unwrap();

        let err = r.render_page(2, 1.0).unwrap().await.unwrap_err();
        assert!(matches!(
            err,
            ViewerError::PageRender {
                page: 2,
                source: EngineError::RenderError(_)
            }
        ));
        assert_eq!(r.state(), SessionState::Failed);
        assert!(r.is_open());

        let outcome = r.render_page(1, 1.0).unwrap().await.unwrap();
        assert!(matches!(outcome, RenderOutcome::Rendered { page: 1, .. }));
        assert_eq!(r.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn dropped_task_cancels_and_returns_to_ready() {
        let mut r = renderer(MockEngine::with_pages(2));
        r.open(b"%PDF", 1).await.unwrap();

        let task = r.render_page(2, 1.0).unwrap();
        assert!(r.is_rendering());
        drop(task);

        assert!(!r.is_rendering());
        assert_eq!(r.state(), SessionState::Ready);
        assert_eq!(r.surface().writes, 0);
    }

    #[tokio::test]
    async fn unawaited_task_is_superseded_by_newer_request() {
        let mut r = renderer(MockEngine::with_pages(5));
        r.open(b"%PDF", 1).await.unwrap();

        let old = r.render_page(3, 1.0).unwrap();
        let new = r.render_page(5, 1.0).unwrap();

        assert_eq!(old.await.unwrap(), RenderOutcome::Superseded { page: 3 });
        assert_eq!(r.state(), SessionState::Rendering);
        assert!(matches!(new.await.unwrap(), RenderOutcome::Rendered { page: 5, .. }));
        assert_eq!(r.surface().page, Some(5));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_clears_surface() {
        let engine = MockEngine::with_pages(2);
        let stats = engine.stats();
        let mut r = renderer(engine);
        r.open(b"%PDF", 1).await.unwrap();
        r.render_page(1, 1.0).unwrap().await.unwrap();

        r.close();
        r.close();
        assert_eq!(r.state(), SessionState::Closed);
        assert_eq!(r.surface().page, None);
        assert_eq!(r.current_page(), None);
        assert_eq!(stats.destroyed(), 1);

        drop(r);
        assert_eq!(stats.destroyed(), 1);
    }
}
