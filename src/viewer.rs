use eframe::egui;
use egui::{Align2, Color32, CursorIcon, FontId, Rect, Sense, Stroke, TextureHandle, vec2};
use uuid::Uuid;

use crate::annotations::{AnnotationStore, Severity};
use crate::geometry::{self, NaturalSize};
use crate::interaction::{BoxInteractionController, Handle};
use crate::viewport::ViewportController;

/// How the annotated image is presented.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ViewMode {
    /// Free pan/zoom viewer: read-only overlays, scroll to zoom, drag to pan.
    #[default]
    Zoom,
    /// Edit mode: slider zoom, box drawing/dragging/resizing enabled.
    Edit,
}

impl ViewMode {
    pub fn label(&self) -> &'static str {
        match self {
            ViewMode::Zoom => "View (Zoom/Pan)",
            ViewMode::Edit => "Edit Annotations",
        }
    }
}

/// Overlay stroke color per severity, matching the review palette: red for
/// faulty, orange for potential, green for normal, blue when unset.
pub fn severity_color(severity: Option<Severity>) -> Color32 {
    match severity {
        Some(Severity::Faulty) => Color32::from_rgb(229, 57, 53),
        Some(Severity::PotentiallyFaulty) => Color32::from_rgb(251, 140, 0),
        Some(Severity::Normal) => Color32::from_rgb(67, 160, 71),
        None => Color32::from_rgb(25, 118, 210),
    }
}

// ============================================================================
// ANNOTATED-IMAGE VIEWER
// ============================================================================

/// The interactive viewport: paints the inspection image under the current
/// pan/zoom transform, draws anomaly overlays on top, and feeds pointer
/// input to the gesture state machine (edit mode) or the pan/zoom controller
/// (zoom mode).
#[derive(Default)]
pub struct Viewer {
    /// Record to emphasize because its log-table row is hovered.
    pub highlight: Option<Uuid>,
    /// Record whose overlay the pointer is over this frame (drives the
    /// reverse table highlight).
    pub hovered_box: Option<Uuid>,
}

impl Viewer {
    pub fn show(
        &mut self,
        ui: &mut egui::Ui,
        texture: Option<&TextureHandle>,
        mode: ViewMode,
        store: &mut AnnotationStore,
        viewport: &mut ViewportController,
        interaction: &mut BoxInteractionController,
    ) {
        let sense = Sense::click_and_drag().union(Sense::hover());
        let (response, painter) = ui.allocate_painter(ui.available_size(), sense);
        let viewer_rect = response.rect;
        let painter = painter.with_clip_rect(viewer_rect);
        painter.rect_filled(viewer_rect, 0.0, Color32::from_gray(24));

        let Some(texture) = texture else {
            painter.text(
                viewer_rect.center(),
                Align2::CENTER_CENTER,
                "No image loaded",
                FontId::proportional(14.0),
                Color32::from_gray(140),
            );
            self.hovered_box = None;
            return;
        };

        let natural = viewport.natural_size();
        // The rectangle the image is contain-fit into. In zoom mode that is
        // the image surface itself (pan offset + natural size × zoom, so the
        // fit is exact); in edit mode it is the viewer scaled by the slider
        // zoom from its top-left, with letterboxing inside.
        let rendered = match mode {
            ViewMode::Zoom => viewport.image_rect(viewer_rect),
            ViewMode::Edit => {
                Rect::from_min_size(viewer_rect.min, viewer_rect.size() * viewport.zoom())
            }
        };
        let (scale, offset) = geometry::contain_fit(rendered, natural);
        let image_rect = Rect::from_min_size(
            rendered.min + offset,
            vec2(natural.w, natural.h) * scale,
        );
        painter.image(
            texture.id(),
            image_rect,
            Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
            Color32::WHITE,
        );

        match mode {
            ViewMode::Zoom => self.handle_pan_zoom(ui, &response, viewer_rect, viewport),
            ViewMode::Edit => {
                self.handle_editing(ui, &response, rendered, natural, scale, store, interaction)
            }
        }

        self.paint_overlays(&painter, rendered, natural, mode, store, interaction);

        // Live rubber band while drawing.
        if interaction.is_drawing()
            && let Some(pointer) = ui.input(|i| i.pointer.latest_pos())
        {
            let current = geometry::display_to_natural(pointer, rendered, natural);
            if let Some(preview) = interaction.drawing_preview(current) {
                let display = geometry::rect_natural_to_display(preview, rendered, natural);
                painter.rect_stroke(display, 0.0, Stroke::new(1.5, Color32::YELLOW));
            }
        }

        // Hover link back to the log table.
        self.hovered_box = response.hover_pos().and_then(|p| {
            store
                .all()
                .iter()
                .rev()
                .find(|a| {
                    !a.deleted
                        && geometry::rect_natural_to_display(a.rect(), rendered, natural)
                            .contains(p)
                })
                .map(|a| a.id)
        });

        if mode == ViewMode::Zoom {
            painter.text(
                viewer_rect.left_bottom() + vec2(8.0, -8.0),
                Align2::LEFT_BOTTOM,
                "Scroll to zoom, drag to pan",
                FontId::proportional(11.0),
                Color32::from_gray(150),
            );
        }
    }

    /// Zoom-mode input: wheel zoom pivoted at the cursor, primary-drag pan.
    /// The pan gesture tracks the global pointer so it keeps working when
    /// the cursor leaves the viewer mid-drag.
    fn handle_pan_zoom(
        &mut self,
        ui: &egui::Ui,
        response: &egui::Response,
        viewer_rect: Rect,
        viewport: &mut ViewportController,
    ) {
        if response.hovered() {
            let scroll = ui.input(|i| i.raw_scroll_delta.y);
            if scroll != 0.0
                && let Some(cursor) = response.hover_pos()
            {
                viewport.handle_wheel(scroll, cursor, viewer_rect);
            }
        }

        let (pressed, released, pointer, moved) = ui.input(|i| {
            (
                i.pointer.primary_pressed(),
                i.pointer.primary_released(),
                i.pointer.latest_pos(),
                i.pointer.delta() != egui::Vec2::ZERO,
            )
        });
        if pressed
            && response.hovered()
            && let Some(p) = pointer
        {
            viewport.begin_pan(p);
        }
        if viewport.is_panning() {
            ui.ctx().set_cursor_icon(CursorIcon::Grabbing);
            if moved && let Some(p) = pointer {
                viewport.pan_move(p);
            }
            if released {
                viewport.end_pan();
            }
        }
    }

    /// Edit-mode input: route pointer events, converted to natural pixels,
    /// into the gesture state machine. While a gesture is live the global
    /// pointer is consumed regardless of hover.
    fn handle_editing(
        &mut self,
        ui: &egui::Ui,
        response: &egui::Response,
        rendered: Rect,
        natural: NaturalSize,
        scale: f32,
        store: &mut AnnotationStore,
        interaction: &mut BoxInteractionController,
    ) {
        if interaction.is_armed() && response.hovered() {
            ui.ctx().set_cursor_icon(CursorIcon::Crosshair);
        }

        let (pressed, released, pointer, moved) = ui.input(|i| {
            (
                i.pointer.primary_pressed(),
                i.pointer.primary_released(),
                i.pointer.latest_pos(),
                i.pointer.delta() != egui::Vec2::ZERO,
            )
        });

        if pressed
            && response.hovered()
            && let Some(p) = pointer
        {
            let point = geometry::display_to_natural(p, rendered, natural);
            interaction.pointer_down(store, point, scale);
        }

        if interaction.gesture_active()
            && let Some(p) = pointer
        {
            let point = geometry::display_to_natural(p, rendered, natural);
            if moved {
                interaction.pointer_move(store, point);
            }
            if released {
                interaction.pointer_up(store, point);
            }
        }
    }

    fn paint_overlays(
        &self,
        painter: &egui::Painter,
        rendered: Rect,
        natural: NaturalSize,
        mode: ViewMode,
        store: &AnnotationStore,
        interaction: &BoxInteractionController,
    ) {
        for (index, record) in store.visible().enumerate() {
            let display = geometry::rect_natural_to_display(record.rect(), rendered, natural);
            let color = severity_color(record.severity);
            let selected = interaction.selected() == Some(record.id);
            let emphasized = selected || self.highlight == Some(record.id);
            let width = if emphasized { 3.0 } else { 2.0 };
            painter.rect_stroke(display, 0.0, Stroke::new(width, color));

            // Numbered tag, matching the log-table row numbers.
            let tag_pos = display.left_top() + vec2(0.0, -14.0);
            let galley = painter.layout_no_wrap(
                format!("{}", index + 1),
                FontId::monospace(11.0),
                Color32::WHITE,
            );
            let tag_rect =
                Rect::from_min_size(tag_pos, galley.size() + vec2(8.0, 3.0));
            painter.rect_filled(tag_rect, 2.0, color);
            painter.galley(tag_rect.min + vec2(4.0, 1.5), galley, Color32::WHITE);

            // Corner handles only on the selected box, only when editable.
            if selected && mode == ViewMode::Edit {
                for handle in Handle::all() {
                    let natural_corner = handle.corner(record.rect());
                    let corner =
                        geometry::natural_to_display(natural_corner, rendered, natural);
                    painter.circle_filled(corner, 4.0, Color32::WHITE);
                    painter.circle_stroke(corner, 4.0, Stroke::new(2.0, color));
                }
            }
        }
    }
}
