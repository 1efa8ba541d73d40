//! Native-to-display coordinate transform.
//!
//! Detection boxes arrive in native video pixels. The overlay is drawn over the
//! video element as it is laid out on screen, so every box is scaled by
//! `display / native` on each axis independently. No letterbox or aspect-ratio
//! correction is applied: the overlay matches the element's rendered box.
//!
//! Scale factors are derived per render from the frame being drawn and the
//! current display size. They are never cached across frames, so a resize or
//! orientation change takes effect on the next redraw.

use crate::detect::BoundingBox;
use crate::Dimensions;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScaleFactors {
    pub scale_x: f32,
    pub scale_y: f32,
}

impl ScaleFactors {
    pub const IDENTITY: Self = Self {
        scale_x: 1.0,
        scale_y: 1.0,
    };

    /// `display / native` per axis. `None` when native has a zero axis.
    pub fn between(native: Dimensions, display: Dimensions) -> Option<Self> {
        if native.is_empty() {
            return None;
        }
        Some(Self {
            scale_x: display.width as f32 / native.width as f32,
            scale_y: display.height as f32 / native.height as f32,
        })
    }
}

/// Map a native-space box into display space.
pub fn to_display_box(native: BoundingBox, scale: ScaleFactors) -> BoundingBox {
    BoundingBox {
        x: native.x * scale.scale_x,
        y: native.y * scale.scale_y,
        width: native.width * scale.scale_x,
        height: native.height * scale.scale_y,
    }
}
