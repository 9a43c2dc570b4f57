//! Hover previews of selected pages.

use doc_model::{PageSize, PixelPoint, RasterSize};

/// Preview raster size relative to the page size in points.
pub const PREVIEW_SCALE: f64 = 0.8;

const OFFSET_X: f64 = 20.0;
const OFFSET_Y: f64 = 50.0;
/// Height kept free below the preview's top edge.
const RESERVED_HEIGHT: f64 = 300.0;

/// Top-left corner of the preview popup for a pointer in viewport coordinates.
///
/// Only the vertical position is clamped to the viewport.
pub fn preview_position(pointer: PixelPoint, viewport_height: f64) -> PixelPoint {
    let y = (pointer.y - OFFSET_Y).min(viewport_height - RESERVED_HEIGHT);
    PixelPoint::new(pointer.x + OFFSET_X, y)
}

pub fn preview_size(page: PageSize) -> RasterSize {
    RasterSize::new(
        f64::from(page.width_pt) * PREVIEW_SCALE,
        f64::from(page.height_pt) * PREVIEW_SCALE,
    )
}
