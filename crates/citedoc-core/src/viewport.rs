//! Movable, resizable viewer window geometry.
//!
//! A pure state machine over pointer events; the host feeds it positions in
//! screen coordinates and reads back the window rect. Pointer tracking during a
//! gesture is global: the host hands over a [`PointerCapture`] when the gesture
//! starts and the controller releases it when the gesture ends for any reason.

use crate::ViewerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// Limits for the viewer window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportConfig {
    /// Absolute size cap for the initial window.
    pub max_width: f32,
    pub max_height: f32,
    /// Fraction of the available area the initial window may cover.
    pub max_fraction: f32,
    /// Resize floors, applied to each axis independently.
    pub min_width: f32,
    pub min_height: f32,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            max_width: 1000.0,
            max_height: 900.0,
            max_fraction: 0.9,
            min_width: 320.0,
            min_height: 240.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureMode {
    Idle,
    Dragging,
    Resizing,
}

/// A global pointer subscription held for the duration of a gesture.
pub trait PointerCapture {
    /// Stop delivering pointer events. Called exactly once.
    fn release(&mut self);
}

/// For hosts that deliver pointer events globally without a subscription.
impl PointerCapture for () {
    fn release(&mut self) {}
}

/// Releases the wrapped capture when dropped.
struct CaptureGuard(Box<dyn PointerCapture>);

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        self.0.release();
    }
}

#[derive(Debug, Clone, Copy)]
enum Gesture {
    Idle,
    Dragging {
        offset: Point,
    },
    Resizing {
        start_pointer: Point,
        start_size: Size,
    },
}

pub struct ViewportController {
    config: ViewportConfig,
    position: Point,
    size: Size,
    gesture: Gesture,
    capture: Option<CaptureGuard>,
}

impl ViewportController {
    /// Center a window in `available`, capped to the configured maximum size
    /// and fraction and never larger than `available` itself.
    pub fn open(available: Size, config: ViewportConfig) -> Self {
        let fraction = config.max_fraction.clamp(0.0, 1.0);
        let fit = |max: f32, avail: f32| {
            let avail = avail.max(0.0);
            max.min(avail * fraction).min(avail).max(0.0)
        };
        let size = Size {
            width: fit(config.max_width, available.width),
            height: fit(config.max_height, available.height),
        };
        let position = Point {
            x: (available.width.max(0.0) - size.width) / 2.0,
            y: (available.height.max(0.0) - size.height) / 2.0,
        };

        Self {
            config,
            position,
            size,
            gesture: Gesture::Idle,
            capture: None,
        }
    }

    pub fn position(&self) -> Point {
        self.position
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn config(&self) -> &ViewportConfig {
        &self.config
    }

    pub fn mode(&self) -> GestureMode {
        match self.gesture {
            Gesture::Idle => GestureMode::Idle,
            Gesture::Dragging { .. } => GestureMode::Dragging,
            Gesture::Resizing { .. } => GestureMode::Resizing,
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_some()
    }

    pub fn begin_drag(&mut self, pointer: Point, capture: impl PointerCapture + 'static) {
        if !pointer.is_finite() {
            return;
        }
        let offset = Point {
            x: pointer.x - self.position.x,
            y: pointer.y - self.position.y,
        };
        self.start(Gesture::Dragging { offset }, capture);
    }

    pub fn begin_resize(&mut self, pointer: Point, capture: impl PointerCapture + 'static) {
        if !pointer.is_finite() {
            return;
        }
        let gesture = Gesture::Resizing {
            start_pointer: pointer,
            start_size: self.size,
        };
        self.start(gesture, capture);
    }

    fn start(&mut self, gesture: Gesture, capture: impl PointerCapture + 'static) {
        // Dropping the previous guard releases its capture first.
        self.capture = None;
        self.capture = Some(CaptureGuard(Box::new(capture)));
        self.gesture = gesture;
    }

    /// Apply a pointer position. The pointer may be anywhere on screen,
    /// including outside the window or the screen itself.
    pub fn on_pointer_move(&mut self, pointer: Point) {
        if !pointer.is_finite() {
            return;
        }
        match self.gesture {
            Gesture::Idle => {}
            Gesture::Dragging { offset } => {
                self.position = Point {
                    x: pointer.x - offset.x,
                    y: pointer.y - offset.y,
                };
            }
            Gesture::Resizing {
                start_pointer,
                start_size,
            } => {
                let width = start_size.width + (pointer.x - start_pointer.x);
                let height = start_size.height + (pointer.y - start_pointer.y);
                self.size = Size {
                    width: width.max(self.config.min_width),
                    height: height.max(self.config.min_height),
                };
            }
        }
    }

    pub fn on_pointer_up(&mut self) {
        self.end_gesture();
    }

    /// Abort the current gesture, e.g. when the host loses focus mid-drag.
    /// The geometry reached so far is kept.
    pub fn cancel_gesture(&mut self) {
        self.end_gesture();
    }

    fn end_gesture(&mut self) {
        self.gesture = Gesture::Idle;
        self.capture = None;
    }
}

/// Zoom factor stepped in fixed increments within `[min_scale, max_scale]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomLevel {
    scale: f32,
    step: f32,
    min: f32,
    max: f32,
}

impl ZoomLevel {
    pub fn new(config: &ViewerConfig) -> Self {
        let min = config.min_scale.max(f32::MIN_POSITIVE);
        let max = config.max_scale.max(min);
        let mut zoom = Self {
            scale: min,
            step: config.zoom_step.abs(),
            min,
            max,
        };
        zoom.set(config.default_scale);
        zoom
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Set the scale, clamped to the configured range. Non-finite values are ignored.
    pub fn set(&mut self, scale: f32) -> f32 {
        if scale.is_finite() {
            self.scale = scale.clamp(self.min, self.max);
        }
        self.scale
    }

    pub fn zoom_in(&mut self) -> f32 {
        self.set(self.scale + self.step)
    }

    pub fn zoom_out(&mut self) -> f32 {
        self.set(self.scale - self.step)
    }
}
