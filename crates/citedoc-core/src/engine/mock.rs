//! Scriptable in-memory engine for testing.

use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::future::{FutureExt, LocalBoxFuture};
use tokio_util::sync::CancellationToken;

use super::{EngineError, PageSize, PdfEngine, PdfHandle, PdfPage, Raster, RenderViewport};

const DEFAULT_PAGE_SIZE: PageSize = PageSize {
    width: 20.0,
    height: 30.0,
};

/// A configurable page for [`MockEngine`].
#[derive(Clone, Debug)]
pub struct MockPage {
    runs: Result<Vec<String>, String>,
    render_error: Option<String>,
    size: PageSize,
    /// Extra pixels added to every raster, like an engine that rounds the
    /// requested viewport up.
    raster_overshoot: (u32, u32),
}

impl MockPage {
    /// A page whose text retrieval yields `runs`.
    pub fn text(runs: &[&str]) -> Self {
        Self {
            runs: Ok(runs.iter().map(|r| r.to_string()).collect()),
            render_error: None,
            size: DEFAULT_PAGE_SIZE,
            raster_overshoot: (0, 0),
        }
    }

    /// A page whose text retrieval fails.
    pub fn failing_text(message: &str) -> Self {
        Self {
            runs: Err(message.to_string()),
            render_error: None,
            size: DEFAULT_PAGE_SIZE,
            raster_overshoot: (0, 0),
        }
    }

    /// A page whose rasterization fails.
    pub fn failing_render(message: &str) -> Self {
        Self {
            runs: Ok(Vec::new()),
            render_error: Some(message.to_string()),
            size: DEFAULT_PAGE_SIZE,
            raster_overshoot: (0, 0),
        }
    }

    pub fn with_size(mut self, width: f32, height: f32) -> Self {
        self.size = PageSize { width, height };
        self
    }

    /// Rasters come back `width` x `height` pixels larger than requested.
    pub fn with_raster_overshoot(mut self, width: u32, height: u32) -> Self {
        self.raster_overshoot = (width, height);
        self
    }
}

/// Counters shared between a [`MockEngine`] and every handle it opened.
#[derive(Debug, Default)]
pub struct MockStats {
    opened: AtomicUsize,
    destroyed: AtomicUsize,
    renders_started: AtomicUsize,
    renders_completed: AtomicUsize,
    renders_cancelled: AtomicUsize,
}

impl MockStats {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Handles opened but not yet destroyed.
    pub fn live_handles(&self) -> usize {
        self.opened().saturating_sub(self.destroyed())
    }

    pub fn renders_started(&self) -> usize {
        self.renders_started.load(Ordering::SeqCst)
    }

    pub fn renders_completed(&self) -> usize {
        self.renders_completed.load(Ordering::SeqCst)
    }

    pub fn renders_cancelled(&self) -> usize {
        self.renders_cancelled.load(Ordering::SeqCst)
    }
}

/// A hand-rolled engine implementing [`PdfEngine`] for tests.
///
/// Supports:
/// - Per-page text runs, text failures and render failures.
/// - A failing `open` to simulate corrupt or encrypted input.
/// - Optional per-render latency that honours cancellation.
/// - Call counting via [`stats()`](MockEngine::stats).
///
/// A rendered raster has every byte set to the page number, so tests can tell
/// which page reached the surface.
pub struct MockEngine {
    pages: Rc<Vec<MockPage>>,
    open_error: Option<String>,
    open_delay: Option<Duration>,
    render_delay: Option<Duration>,
    stats: Arc<MockStats>,
}

impl MockEngine {
    pub fn new(pages: Vec<MockPage>) -> Self {
        Self {
            pages: Rc::new(pages),
            open_error: None,
            open_delay: None,
            render_delay: None,
            stats: Arc::new(MockStats::default()),
        }
    }

    /// `count` pages whose text is `"content of page k"`.
    pub fn with_pages(count: u32) -> Self {
        let pages = (1..=count)
            .map(|k| MockPage::text(&["content of", &format!("page {k}")]))
            .collect();
        Self::new(pages)
    }

    /// An engine that refuses every buffer.
    pub fn failing_open(message: &str) -> Self {
        let mut engine = Self::new(Vec::new());
        engine.open_error = Some(message.to_string());
        engine
    }

    /// Delay before `open` resolves.
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    pub fn with_render_delay(mut self, delay: Duration) -> Self {
        self.render_delay = Some(delay);
        self
    }

    pub fn stats(&self) -> Arc<MockStats> {
        Arc::clone(&self.stats)
    }
}

impl PdfEngine for MockEngine {
    fn open(&self, _bytes: Vec<u8>) -> LocalBoxFuture<'_, Result<Box<dyn PdfHandle>, EngineError>> {
        async move {
            if let Some(delay) = self.open_delay {
                tokio::time::sleep(delay).await;
            }
            match &self.open_error {
                Some(message) => Err(EngineError::OpenError(message.clone())),
                None => {
                    self.stats.opened.fetch_add(1, Ordering::SeqCst);
                    Ok(Box::new(MockHandle {
                        pages: Rc::clone(&self.pages),
                        render_delay: self.render_delay,
                        stats: Arc::clone(&self.stats),
                    }) as Box<dyn PdfHandle>)
                }
            }
        }
        .boxed_local()
    }
}

struct MockHandle {
    pages: Rc<Vec<MockPage>>,
    render_delay: Option<Duration>,
    stats: Arc<MockStats>,
}

impl PdfHandle for MockHandle {
    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn page(&self, number: u32) -> LocalBoxFuture<'_, Result<Box<dyn PdfPage>, EngineError>> {
        let result = number
            .checked_sub(1)
            .and_then(|index| self.pages.get(index as usize))
            .map(|page| {
                Box::new(MockPageHandle {
                    number,
                    page: page.clone(),
                    render_delay: self.render_delay,
                    stats: Arc::clone(&self.stats),
                }) as Box<dyn PdfPage>
            })
            .ok_or_else(|| EngineError::PageError {
                page: number,
                message: "page out of range".into(),
            });
        futures_util::future::ready(result).boxed_local()
    }

    fn destroy(&self) {
        self.stats.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

struct MockPageHandle {
    number: u32,
    page: MockPage,
    render_delay: Option<Duration>,
    stats: Arc<MockStats>,
}

impl PdfPage for MockPageHandle {
    fn size(&self) -> PageSize {
        self.page.size
    }

    fn text_runs(&self) -> LocalBoxFuture<'_, Result<Vec<String>, EngineError>> {
        let result = self
            .page
            .runs
            .clone()
            .map_err(EngineError::ExtractionError);
        futures_util::future::ready(result).boxed_local()
    }

    fn render(
        &self,
        viewport: RenderViewport,
        cancel: CancellationToken,
    ) -> LocalBoxFuture<'_, Result<Raster, EngineError>> {
        self.stats.renders_started.fetch_add(1, Ordering::SeqCst);

        async move {
            if let Some(delay) = self.render_delay {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            if cancel.is_cancelled() {
                self.stats.renders_cancelled.fetch_add(1, Ordering::SeqCst);
                return Err(EngineError::Cancelled);
            }

            if let Some(message) = &self.page.render_error {
                return Err(EngineError::RenderError(message.clone()));
            }

            self.stats.renders_completed.fetch_add(1, Ordering::SeqCst);
            let (extra_width, extra_height) = self.page.raster_overshoot;
            let width = viewport.width + extra_width;
            let height = viewport.height + extra_height;
            let len = width as usize * height as usize * 4;
            Ok(Raster {
                width,
                height,
                pixels: vec![self.number as u8; len],
            })
        }
        .boxed_local()
    }
}
