//! Annotation rasterizer shared by the live page canvases and export.
//!
//! The same [`AnnotationRenderer::paint`] call draws onto an on-screen canvas
//! at display resolution and onto the offscreen export surface, so both
//! agree on what a page's ink looks like.

pub mod fonts;
pub mod painter;

pub use fonts::FontBook;
pub use painter::{to_rgba_image, AnnotationRenderer, DEFAULT_STROKE_WIDTH};

pub use tiny_skia::{Pixmap, Transform};

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("cannot allocate a {width}x{height} surface")]
    SurfaceSize { width: u32, height: u32 },
    #[error("font data could not be parsed: {0}")]
    Font(String),
}

pub type RenderResult<T> = Result<T, RenderError>;

/// Allocates a fully transparent surface.
pub fn transparent_surface(width: u32, height: u32) -> RenderResult<Pixmap> {
    Pixmap::new(width, height).ok_or(RenderError::SurfaceSize { width, height })
}
