use egui::{Pos2, Rect, Vec2};

use crate::geometry::NaturalSize;
use crate::observe::{SubscriptionId, Subscribers};

/// Free pan/zoom bounds (scroll-wheel viewer).
pub const ZOOM_MIN: f32 = 0.1;
pub const ZOOM_MAX: f32 = 5.0;
/// Bounds for the simple slider-controlled edit mode.
pub const SLIDER_ZOOM_MIN: f32 = 1.0;
pub const SLIDER_ZOOM_MAX: f32 = 3.0;
/// Multiplicative zoom step per wheel notch / toolbar click.
pub const WHEEL_ZOOM_STEP: f32 = 1.1;

/// Event published to viewport subscribers; the transform changed, redraw.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewportChanged;

// ============================================================================
// VIEWPORT CONTROLLER: pan/zoom state for the annotated-image viewer
// ============================================================================

/// Owns the zoom factor and pan offset of the annotated-image viewer and the
/// natural size of the image being displayed. Resets whenever a new image
/// source is loaded.
pub struct ViewportController {
    zoom: f32,
    pan: Vec2,
    natural: NaturalSize,
    /// Last pointer position while a pan drag is live, `None` otherwise.
    pan_drag: Option<Pos2>,
    /// Monotonically increasing counter, bumped on each transform change.
    revision: u64,
    subscribers: Subscribers<ViewportChanged>,
}

impl Default for ViewportController {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            pan: Vec2::ZERO,
            natural: NaturalSize::default(),
            pan_drag: None,
            revision: 0,
            subscribers: Subscribers::default(),
        }
    }
}

impl ViewportController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn pan(&self) -> Vec2 {
        self.pan
    }

    pub fn natural_size(&self) -> NaturalSize {
        self.natural
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn subscribe(&mut self, listener: Box<dyn FnMut(&ViewportChanged)>) -> SubscriptionId {
        self.subscribers.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscribers.unsubscribe(id);
    }

    fn changed(&mut self) {
        self.revision += 1;
        self.subscribers.notify(&ViewportChanged);
    }

    /// Record the image's intrinsic size and reset the view; called whenever
    /// a new image source finishes loading.
    pub fn set_image(&mut self, natural: NaturalSize) {
        self.natural = natural;
        self.pan_drag = None;
        self.reset_view();
    }

    // ---- zoom ----------------------------------------------------------

    /// Multiply the zoom by `factor`, clamped to the free-viewer bounds.
    ///
    /// With a pivot (e.g. the cursor during wheel input), the pan offset is
    /// corrected so the content point under the pivot stays visually fixed.
    /// Without one, pan is left alone.
    pub fn zoom_by(&mut self, factor: f32, pivot: Option<Pos2>, container: Rect) {
        let old_zoom = self.zoom;
        self.zoom = (self.zoom * factor).clamp(ZOOM_MIN, ZOOM_MAX);
        if let Some(pivot) = pivot {
            // Clamping may have absorbed part of the request; use the factor
            // that actually applied.
            let k = self.zoom / old_zoom;
            let local = pivot - container.min - self.pan;
            self.pan -= local * (k - 1.0);
        }
        self.changed();
    }

    /// One wheel notch: ×1.1 in for scroll-up, ×1/1.1 out for scroll-down,
    /// pivoted at the cursor.
    pub fn handle_wheel(&mut self, scroll_y: f32, cursor: Pos2, container: Rect) {
        if scroll_y == 0.0 {
            return;
        }
        let factor = if scroll_y > 0.0 {
            WHEEL_ZOOM_STEP
        } else {
            1.0 / WHEEL_ZOOM_STEP
        };
        self.zoom_by(factor, Some(cursor), container);
    }

    /// Scale so the image width fills the container, clamped to `[0.1, 3]`,
    /// and drop any pan. No-op until the natural size is known.
    pub fn fit_to_width(&mut self, container_width: f32) {
        if !self.natural.is_known() {
            return;
        }
        self.zoom = (container_width / self.natural.w).clamp(ZOOM_MIN, SLIDER_ZOOM_MAX);
        self.pan = Vec2::ZERO;
        self.changed();
    }

    pub fn reset_view(&mut self) {
        self.zoom = 1.0;
        self.pan = Vec2::ZERO;
        self.changed();
    }

    /// Direct zoom assignment from the edit-mode slider (narrower bounds,
    /// pan untouched).
    pub fn set_slider_zoom(&mut self, zoom: f32) {
        let clamped = zoom.clamp(SLIDER_ZOOM_MIN, SLIDER_ZOOM_MAX);
        if clamped != self.zoom {
            self.zoom = clamped;
            self.changed();
        }
    }

    // ---- pan drag --------------------------------------------------------
    //
    // The gesture is driven by global pointer state for its whole duration:
    // panning keeps working when the cursor leaves the viewer element
    // mid-drag. `end_pan` runs on every exit path.

    pub fn begin_pan(&mut self, pointer: Pos2) {
        self.pan_drag = Some(pointer);
    }

    pub fn pan_move(&mut self, pointer: Pos2) {
        if let Some(last) = self.pan_drag {
            self.pan += pointer - last;
            self.pan_drag = Some(pointer);
            self.changed();
        }
    }

    pub fn end_pan(&mut self) {
        self.pan_drag = None;
    }

    pub fn is_panning(&self) -> bool {
        self.pan_drag.is_some()
    }

    /// Screen rectangle the image occupies under the current transform:
    /// the container origin shifted by pan, scaled by zoom.
    pub fn image_rect(&self, container: Rect) -> Rect {
        Rect::from_min_size(
            container.min + self.pan,
            egui::vec2(self.natural.w, self.natural.h) * self.zoom,
        )
    }
}
