use egui::{Pos2, Rect, pos2, vec2};
use uuid::Uuid;

use crate::annotations::{AnnotationStore, MIN_BOX_SIZE};

/// Drags smaller than this (both axes, natural pixels) are discarded as
/// accidental clicks rather than committed as boxes.
pub const DRAW_THRESHOLD: f32 = 5.0;
/// Corner-handle hit tolerance in *display* pixels; divided by the current
/// scale before hit-testing in natural space so handles stay grabbable at
/// any zoom.
pub const HANDLE_HIT_RADIUS: f32 = 8.0;

/// The four corner resize handles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Handle {
    Nw,
    Ne,
    Sw,
    Se,
}

impl Handle {
    pub fn all() -> &'static [Handle] {
        &[Handle::Nw, Handle::Ne, Handle::Sw, Handle::Se]
    }

    /// The handle's own corner on `rect`.
    pub fn corner(&self, rect: Rect) -> Pos2 {
        match self {
            Handle::Nw => rect.left_top(),
            Handle::Ne => rect.right_top(),
            Handle::Sw => rect.left_bottom(),
            Handle::Se => rect.right_bottom(),
        }
    }

    /// The diagonally opposite corner, the fixed anchor while resizing.
    pub fn anchor(&self, rect: Rect) -> Pos2 {
        match self {
            Handle::Nw => rect.right_bottom(),
            Handle::Ne => rect.left_bottom(),
            Handle::Sw => rect.right_top(),
            Handle::Se => rect.left_top(),
        }
    }
}

/// Active pointer gesture. At most one record is ever being dragged or
/// resized; the single variant is the exclusive lock.
#[derive(Clone, Copy, Debug, PartialEq)]
enum Gesture {
    Idle,
    Drawing { origin: Pos2 },
    Dragging { id: Uuid },
    Resizing { id: Uuid, handle: Handle },
}

// ============================================================================
// BOX INTERACTION CONTROLLER
// ============================================================================

/// Turns pointer events (already converted to natural image pixels) into
/// annotation-store mutations: drawing new boxes in armed add-mode,
/// selecting, dragging, and corner-resizing existing ones.
///
/// While a gesture is live the app feeds it global pointer moves/ups, so
/// manipulation keeps tracking outside the viewer bounds; the capture ends
/// on every exit path (`pointer_up` and `cancel` alike).
pub struct BoxInteractionController {
    gesture: Gesture,
    selected: Option<Uuid>,
    /// Add-mode flag; must be explicitly armed before a drag draws a box.
    armed: bool,
}

impl Default for BoxInteractionController {
    fn default() -> Self {
        Self {
            gesture: Gesture::Idle,
            selected: None,
            armed: false,
        }
    }
}

impl BoxInteractionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected(&self) -> Option<Uuid> {
        self.selected
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// True while a gesture holds the pointer (the app should route global
    /// move/up events here until it releases).
    pub fn gesture_active(&self) -> bool {
        self.gesture != Gesture::Idle
    }

    pub fn is_drawing(&self) -> bool {
        matches!(self.gesture, Gesture::Drawing { .. })
    }

    /// Arm add-mode: the next pointer-down starts drawing a new box.
    pub fn arm_draw(&mut self) {
        self.armed = true;
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }

    /// Rubber-band preview of the box being drawn, for overlay painting.
    pub fn drawing_preview(&self, current: Pos2) -> Option<Rect> {
        match self.gesture {
            Gesture::Drawing { origin } => Some(Rect::from_two_pos(origin, current)),
            _ => None,
        }
    }

    // ---- transitions -------------------------------------------------------

    /// Pointer pressed at `point` (natural pixels). `scale` is the current
    /// display-pixels-per-natural-pixel factor, used only for handle hit
    /// tolerance.
    pub fn pointer_down(&mut self, store: &AnnotationStore, point: Pos2, scale: f32) {
        if self.gesture != Gesture::Idle {
            // Defensive: a stray second press while a gesture is live is
            // ignored; the lock is exclusive.
            return;
        }
        if self.armed {
            self.gesture = Gesture::Drawing { origin: point };
            return;
        }

        // Handles are only offered on the selected box.
        if let Some(id) = self.selected
            && let Some(record) = store.get(id)
            && !record.deleted
            && let Some(handle) = handle_at(record.rect(), point, scale)
        {
            self.gesture = Gesture::Resizing { id, handle };
            return;
        }

        match topmost_visible_at(store, point) {
            Some(id) => {
                self.selected = Some(id);
                self.gesture = Gesture::Dragging { id };
            }
            None => {
                // Pointer-down on empty area deselects.
                self.selected = None;
            }
        }
    }

    /// Pointer moved to `point` (natural pixels) while a gesture may be live.
    pub fn pointer_move(&mut self, store: &mut AnnotationStore, point: Pos2) {
        match self.gesture {
            Gesture::Idle | Gesture::Drawing { .. } => {}
            Gesture::Dragging { id } => {
                let Some(record) = store.get(id) else {
                    // Record vanished mid-gesture (e.g. replace-all landed):
                    // drop the lock instead of panicking.
                    self.gesture = Gesture::Idle;
                    self.selected = None;
                    return;
                };
                // The box recenters under the cursor, clamped to the image
                // origin.
                let size = vec2(record.w, record.h);
                let min = pos2(
                    (point.x - size.x / 2.0).max(0.0),
                    (point.y - size.y / 2.0).max(0.0),
                );
                store.update_geometry(id, Rect::from_min_size(min, size));
            }
            Gesture::Resizing { id, handle } => {
                let Some(record) = store.get(id) else {
                    self.gesture = Gesture::Idle;
                    self.selected = None;
                    return;
                };
                let resized = resize_from_anchor(record.rect(), handle, point);
                store.update_geometry(id, resized);
            }
        }
    }

    /// Pointer released at `point`. Commits a drawn box when it clears the
    /// gesture threshold; manipulation gestures end with selection kept.
    pub fn pointer_up(&mut self, store: &mut AnnotationStore, point: Pos2) -> Option<Uuid> {
        let gesture = std::mem::replace(&mut self.gesture, Gesture::Idle);
        match gesture {
            Gesture::Idle => None,
            Gesture::Drawing { origin } => {
                self.armed = false;
                let dx = (point.x - origin.x).abs();
                let dy = (point.y - origin.y).abs();
                if dx > DRAW_THRESHOLD && dy > DRAW_THRESHOLD {
                    let min = pos2(
                        origin.x.min(point.x).max(0.0),
                        origin.y.min(point.y).max(0.0),
                    );
                    let size = vec2(dx.max(MIN_BOX_SIZE), dy.max(MIN_BOX_SIZE));
                    let id = store.add_user_box(Rect::from_min_size(min, size));
                    self.selected = Some(id);
                    Some(id)
                } else {
                    // Degenerate drag: discard, no store mutation.
                    None
                }
            }
            Gesture::Dragging { id } | Gesture::Resizing { id, .. } => {
                self.selected = Some(id);
                None
            }
        }
    }

    /// Abort whatever gesture is in progress without committing anything
    /// further. Selection survives.
    pub fn cancel(&mut self) {
        self.gesture = Gesture::Idle;
        self.armed = false;
    }
}

// ---- hit testing -----------------------------------------------------------

/// Which corner handle of `rect` the point lands on, if any. `scale` converts
/// the display-space tolerance into natural pixels.
pub fn handle_at(rect: Rect, point: Pos2, scale: f32) -> Option<Handle> {
    if scale <= 0.0 {
        return None;
    }
    let tolerance = HANDLE_HIT_RADIUS / scale;
    Handle::all()
        .iter()
        .copied()
        .find(|h| h.corner(rect).distance(point) <= tolerance)
}

/// The topmost (= most recently inserted) visible record containing `point`.
fn topmost_visible_at(store: &AnnotationStore, point: Pos2) -> Option<Uuid> {
    store
        .all()
        .iter()
        .rev()
        .find(|a| !a.deleted && a.rect().contains(point))
        .map(|a| a.id)
}

/// Recompute a rect during a resize: the handle's diagonally opposite corner
/// stays fixed, the dragged corner follows the pointer, and both edges clamp
/// to the minimum box size.
fn resize_from_anchor(rect: Rect, handle: Handle, point: Pos2) -> Rect {
    let anchor = handle.anchor(rect);
    let (w, h) = match handle {
        Handle::Se => (point.x - anchor.x, point.y - anchor.y),
        Handle::Nw => (anchor.x - point.x, anchor.y - point.y),
        Handle::Ne => (point.x - anchor.x, anchor.y - point.y),
        Handle::Sw => (anchor.x - point.x, point.y - anchor.y),
    };
    let w = w.max(MIN_BOX_SIZE);
    let h = h.max(MIN_BOX_SIZE);
    let min = match handle {
        Handle::Se => anchor,
        Handle::Nw => pos2(anchor.x - w, anchor.y - h),
        Handle::Ne => pos2(anchor.x, anchor.y - h),
        Handle::Sw => pos2(anchor.x - w, anchor.y),
    };
    Rect::from_min_size(min, vec2(w, h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::test_support::ai_record;
    use crate::annotations::Source;

    fn store_with_box(x: f32, y: f32, w: f32, h: f32) -> (AnnotationStore, Uuid) {
        let mut store = AnnotationStore::new();
        let id = store.add_user_box(Rect::from_min_size(pos2(x, y), vec2(w, h)));
        (store, id)
    }

    #[test]
    fn armed_drag_commits_a_normalized_user_box() {
        let mut store = AnnotationStore::new();
        let mut ctl = BoxInteractionController::new();
        ctl.arm_draw();
        ctl.pointer_down(&store, pos2(100.0, 100.0), 1.0);
        assert!(ctl.is_drawing());
        let id = ctl.pointer_up(&mut store, pos2(150.0, 160.0)).unwrap();

        let a = store.get(id).unwrap();
        assert_eq!((a.x, a.y, a.w, a.h), (100.0, 100.0, 50.0, 60.0));
        assert_eq!(a.source, Source::User);
        assert!(!a.deleted);
        assert!(!ctl.is_armed(), "add mode disarms after commit");
        assert_eq!(ctl.selected(), Some(id));
    }

    #[test]
    fn reversed_drag_normalizes_to_min_corner() {
        let mut store = AnnotationStore::new();
        let mut ctl = BoxInteractionController::new();
        ctl.arm_draw();
        ctl.pointer_down(&store, pos2(150.0, 160.0), 1.0);
        let id = ctl.pointer_up(&mut store, pos2(100.0, 100.0)).unwrap();
        let a = store.get(id).unwrap();
        assert_eq!((a.x, a.y, a.w, a.h), (100.0, 100.0, 50.0, 60.0));
    }

    #[test]
    fn sub_threshold_drag_is_discarded_silently() {
        let mut store = AnnotationStore::new();
        let mut ctl = BoxInteractionController::new();
        ctl.arm_draw();
        ctl.pointer_down(&store, pos2(100.0, 100.0), 1.0);
        // 5 px exactly is not > 5.
        assert!(ctl.pointer_up(&mut store, pos2(105.0, 104.0)).is_none());
        assert!(store.is_empty());
        assert!(!ctl.gesture_active());
    }

    #[test]
    fn unarmed_press_on_box_selects_and_drags() {
        let (mut store, id) = store_with_box(100.0, 100.0, 40.0, 20.0);
        let mut ctl = BoxInteractionController::new();
        ctl.pointer_down(&store, pos2(120.0, 110.0), 1.0);
        assert_eq!(ctl.selected(), Some(id));
        assert!(ctl.gesture_active());

        // Box recenters under the cursor.
        ctl.pointer_move(&mut store, pos2(200.0, 200.0));
        let a = store.get(id).unwrap();
        assert_eq!((a.x, a.y), (180.0, 190.0));
        assert_eq!((a.w, a.h), (40.0, 20.0));

        // Release keeps selection.
        ctl.pointer_up(&mut store, pos2(200.0, 200.0));
        assert_eq!(ctl.selected(), Some(id));
        assert!(!ctl.gesture_active());
    }

    #[test]
    fn drag_clamps_at_image_origin() {
        let (mut store, id) = store_with_box(100.0, 100.0, 40.0, 20.0);
        let mut ctl = BoxInteractionController::new();
        ctl.pointer_down(&store, pos2(120.0, 110.0), 1.0);
        ctl.pointer_move(&mut store, pos2(5.0, 3.0));
        let a = store.get(id).unwrap();
        assert_eq!((a.x, a.y), (0.0, 0.0));
    }

    #[test]
    fn press_on_empty_area_deselects() {
        let (mut store, id) = store_with_box(100.0, 100.0, 40.0, 20.0);
        let mut ctl = BoxInteractionController::new();
        ctl.pointer_down(&store, pos2(120.0, 110.0), 1.0);
        ctl.pointer_up(&mut store, pos2(120.0, 110.0));
        assert_eq!(ctl.selected(), Some(id));

        ctl.pointer_down(&store, pos2(500.0, 500.0), 1.0);
        assert_eq!(ctl.selected(), None);
    }

    #[test]
    fn overlapping_boxes_pick_the_topmost() {
        let mut store = AnnotationStore::new();
        let _bottom = store.add_user_box(Rect::from_min_size(pos2(100.0, 100.0), vec2(200.0, 200.0)));
        let top = store.add_user_box(Rect::from_min_size(pos2(150.0, 150.0), vec2(200.0, 200.0)));
        let mut ctl = BoxInteractionController::new();
        ctl.pointer_down(&store, pos2(200.0, 200.0), 1.0);
        assert_eq!(ctl.selected(), Some(top));
    }

    #[test]
    fn se_resize_follows_pointer_and_clamps_to_min() {
        let (mut store, id) = store_with_box(100.0, 100.0, 50.0, 50.0);
        let mut ctl = BoxInteractionController::new();
        // Select first, then grab the SE handle (corner at 150,150).
        ctl.pointer_down(&store, pos2(120.0, 120.0), 1.0);
        ctl.pointer_up(&mut store, pos2(120.0, 120.0));
        ctl.pointer_down(&store, pos2(149.0, 151.0), 1.0);

        ctl.pointer_move(&mut store, pos2(180.0, 170.0));
        let a = store.get(id).unwrap();
        assert_eq!((a.x, a.y, a.w, a.h), (100.0, 100.0, 80.0, 70.0));

        // Pointer pulled within 10 px of the anchor corner: exactly 10×10.
        ctl.pointer_move(&mut store, pos2(104.0, 103.0));
        let a = store.get(id).unwrap();
        assert_eq!((a.x, a.y, a.w, a.h), (100.0, 100.0, 10.0, 10.0));
    }

    #[test]
    fn nw_resize_keeps_the_se_corner_anchored() {
        let (mut store, id) = store_with_box(100.0, 100.0, 50.0, 50.0);
        let mut ctl = BoxInteractionController::new();
        ctl.pointer_down(&store, pos2(120.0, 120.0), 1.0);
        ctl.pointer_up(&mut store, pos2(120.0, 120.0));
        ctl.pointer_down(&store, pos2(101.0, 99.0), 1.0);

        ctl.pointer_move(&mut store, pos2(80.0, 90.0));
        let a = store.get(id).unwrap();
        assert_eq!((a.x, a.y, a.w, a.h), (80.0, 90.0, 70.0, 60.0));
        // SE corner unchanged.
        assert_eq!((a.x + a.w, a.y + a.h), (150.0, 150.0));
    }

    #[test]
    fn handle_tolerance_scales_with_zoom() {
        let rect = Rect::from_min_size(pos2(100.0, 100.0), vec2(50.0, 50.0));
        // At 2x zoom the 8-display-px radius is 4 natural px.
        assert_eq!(handle_at(rect, pos2(152.0, 152.0), 2.0), Some(Handle::Se));
        assert_eq!(handle_at(rect, pos2(155.0, 155.0), 2.0), None);
        // Zoomed out to 0.4x the radius widens to 20 natural px.
        assert_eq!(handle_at(rect, pos2(112.0, 112.0), 0.4), Some(Handle::Nw));
    }

    #[test]
    fn cancel_discards_an_in_progress_drawing() {
        let mut store = AnnotationStore::new();
        let mut ctl = BoxInteractionController::new();
        ctl.arm_draw();
        ctl.pointer_down(&store, pos2(10.0, 10.0), 1.0);
        ctl.cancel();
        assert!(!ctl.gesture_active());
        assert!(!ctl.is_armed());
        // A later release must not commit the aborted box.
        assert!(ctl.pointer_up(&mut store, pos2(300.0, 300.0)).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn gesture_lock_ignores_second_press() {
        let (mut store, id) = store_with_box(100.0, 100.0, 40.0, 40.0);
        let other = store.add_user_box(Rect::from_min_size(pos2(300.0, 300.0), vec2(40.0, 40.0)));
        let mut ctl = BoxInteractionController::new();
        ctl.pointer_down(&store, pos2(110.0, 110.0), 1.0);
        assert_eq!(ctl.selected(), Some(id));
        // Second press while dragging: swallowed by the exclusive lock.
        ctl.pointer_down(&store, pos2(310.0, 310.0), 1.0);
        assert_eq!(ctl.selected(), Some(id));
        ctl.pointer_up(&mut store, pos2(110.0, 110.0));
        let _ = other;
    }

    #[test]
    fn gesture_survives_record_disappearing() {
        let (mut store, _id) = store_with_box(100.0, 100.0, 40.0, 40.0);
        let mut ctl = BoxInteractionController::new();
        ctl.pointer_down(&store, pos2(110.0, 110.0), 1.0);
        // An AI run replaces the whole set mid-drag.
        store.replace_all(vec![ai_record(0.0, 0.0, 20.0, 20.0, 0.9)]);
        ctl.pointer_move(&mut store, pos2(200.0, 200.0));
        assert!(!ctl.gesture_active());
        assert_eq!(ctl.selected(), None);
    }

    #[test]
    fn deleted_boxes_are_not_hit() {
        let (mut store, id) = store_with_box(100.0, 100.0, 40.0, 40.0);
        store.soft_delete(id).unwrap();
        let mut ctl = BoxInteractionController::new();
        ctl.pointer_down(&store, pos2(110.0, 110.0), 1.0);
        assert_eq!(ctl.selected(), None);
        assert!(!ctl.gesture_active());
    }
}
