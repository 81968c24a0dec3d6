use egui::{Pos2, Rect, Vec2, pos2, vec2};

// ============================================================================
// NATURAL ↔ DISPLAY COORDINATE MAPPING
// ============================================================================
//
// "Natural" space is the image's intrinsic pixel grid. "Display" space is the
// on-screen rectangle the image is rendered into with aspect-preserving
// ("contain") scaling: the shorter axis gets symmetric letterbox margins.
// All anomaly geometry is stored in natural pixels; everything on screen is
// derived through these conversions.

/// Intrinsic pixel dimensions of the displayed image.
///
/// Zero until the image has finished decoding; every mapping function treats
/// that state as "unknown" and fails safe.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NaturalSize {
    pub w: f32,
    pub h: f32,
}

impl NaturalSize {
    pub fn new(w: f32, h: f32) -> Self {
        Self { w, h }
    }

    /// True once real dimensions are known.
    pub fn is_known(&self) -> bool {
        self.w > 0.0 && self.h > 0.0
    }
}

/// Contain-fit parameters for an image of `natural` size rendered into
/// `rendered`: the uniform scale factor and the letterbox offset of the
/// image's top-left corner inside the rectangle.
pub fn contain_fit(rendered: Rect, natural: NaturalSize) -> (f32, Vec2) {
    if !natural.is_known() || rendered.width() <= 0.0 || rendered.height() <= 0.0 {
        return (0.0, Vec2::ZERO);
    }
    let scale = (rendered.width() / natural.w).min(rendered.height() / natural.h);
    let offset = vec2(
        (rendered.width() - natural.w * scale) / 2.0,
        (rendered.height() - natural.h * scale) / 2.0,
    );
    (scale, offset)
}

/// Map a point in natural image pixels to screen coordinates.
/// Returns the origin while the natural size is still unknown.
pub fn natural_to_display(p: Pos2, rendered: Rect, natural: NaturalSize) -> Pos2 {
    let (scale, offset) = contain_fit(rendered, natural);
    if scale <= 0.0 {
        return Pos2::ZERO;
    }
    rendered.min + offset + p.to_vec2() * scale
}

/// Map a screen point back to natural image pixels, the algebraic inverse
/// of [`natural_to_display`]. Returns the origin while the natural size is
/// still unknown.
pub fn display_to_natural(p: Pos2, rendered: Rect, natural: NaturalSize) -> Pos2 {
    let (scale, offset) = contain_fit(rendered, natural);
    if scale <= 0.0 {
        return Pos2::ZERO;
    }
    let local = p - rendered.min - offset;
    pos2(local.x / scale, local.y / scale)
}

/// Map a whole rectangle from natural to display space (used when painting
/// anomaly overlays).
pub fn rect_natural_to_display(r: Rect, rendered: Rect, natural: NaturalSize) -> Rect {
    Rect::from_min_max(
        natural_to_display(r.min, rendered, natural),
        natural_to_display(r.max, rendered, natural),
    )
}
