//! Mapping detections from frame pixels to display coordinates.

use crate::types::BoundingBox;
use serde::{Deserialize, Serialize};

/// Size of the surface the presentation layer draws overlays on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplaySize {
    pub width: u32,
    pub height: u32,
}

impl Default for DisplaySize {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

/// Rescale a box detected in a `frame_width × frame_height` frame onto `display`.
///
/// Each axis is scaled independently, so a display with a different aspect
/// ratio stretches the box the same way it stretches the video.
pub fn resize_to_display(
    bbox: &BoundingBox,
    frame_width: u32,
    frame_height: u32,
    display: DisplaySize,
) -> BoundingBox {
    if frame_width == 0 || frame_height == 0 {
        return bbox.clone();
    }
    let sx = display.width as f32 / frame_width as f32;
    let sy = display.height as f32 / frame_height as f32;
    bbox.scaled(sx, sy)
}
