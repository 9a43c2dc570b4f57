use crate::fonts::FontBook;
use crate::{transparent_surface, RenderResult};
use doc_model::{
    Annotation, NormalizedPoint, PixelPoint, RasterSize, Rgb, StrokeAnnotation, TextAnnotation,
    LINE_HEIGHT_FACTOR,
};
use image::{Rgba, RgbaImage};
use tiny_skia::{
    Color, FillRule, LineCap, LineJoin, Paint, PathBuilder, Pixmap, Stroke, Transform,
};

/// Ink width in target pixels.
pub const DEFAULT_STROKE_WIDTH: f32 = 2.0;

/// Paints annotation lists onto raster surfaces.
#[derive(Debug, Clone)]
pub struct AnnotationRenderer {
    fonts: FontBook,
    stroke_width: f32,
}

impl AnnotationRenderer {
    pub fn new(fonts: FontBook) -> Self {
        Self { fonts, stroke_width: DEFAULT_STROKE_WIDTH }
    }

    pub fn with_stroke_width(mut self, width: f32) -> Self {
        self.stroke_width = width;
        self
    }

    pub fn fonts(&self) -> &FontBook {
        &self.fonts
    }

    pub fn stroke_width(&self) -> f32 {
        self.stroke_width
    }

    /// Paints `annotations` in order, denormalizing against `target`.
    ///
    /// `transform` maps target space onto the surface; live canvases pass the
    /// identity, export passes its resolution multiplier.
    pub fn paint(
        &self,
        surface: &mut Pixmap,
        annotations: &[Annotation],
        target: RasterSize,
        transform: Transform,
    ) {
        for annotation in annotations {
            match annotation {
                Annotation::Stroke(stroke) => self.paint_stroke(surface, stroke, target, transform),
                Annotation::Text(text) => self.paint_text(surface, text, target, transform),
            }
        }
    }

    /// Clears the surface and paints everything again at surface resolution.
    pub fn repaint(&self, surface: &mut Pixmap, annotations: &[Annotation]) {
        surface.fill(Color::TRANSPARENT);
        let target = RasterSize::new(f64::from(surface.width()), f64::from(surface.height()));
        self.paint(surface, annotations, target, Transform::identity());
    }

    /// Paints the ink of one freshly placed pointer position.
    pub fn paint_dot(&self, surface: &mut Pixmap, at: PixelPoint, color: Rgb) {
        let (x, y) = pixel(at);
        if let Some(path) = PathBuilder::from_circle(x, y, self.stroke_width / 2.0) {
            let paint = paint_for(color);
            surface.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
        }
    }

    /// Paints one segment of an in-progress stroke.
    pub fn paint_segment(
        &self,
        surface: &mut Pixmap,
        from: PixelPoint,
        to: PixelPoint,
        color: Rgb,
    ) {
        let mut builder = PathBuilder::new();
        let (x, y) = pixel(from);
        builder.move_to(x, y);
        let (x, y) = pixel(to);
        builder.line_to(x, y);

        if let Some(path) = builder.finish() {
            let paint = paint_for(color);
            surface.stroke_path(&path, &paint, &self.stroke(), Transform::identity(), None);
        }
    }

    /// Renders one page's annotations onto a new transparent surface of
    /// `page × scale` pixels, painting in page space.
    pub fn render_layer(
        &self,
        annotations: &[Annotation],
        page: RasterSize,
        scale: f32,
    ) -> RenderResult<Pixmap> {
        let width = (page.width as f32 * scale).round().max(1.0) as u32;
        let height = (page.height as f32 * scale).round().max(1.0) as u32;

        let mut surface = transparent_surface(width, height)?;
        self.paint(&mut surface, annotations, page, Transform::from_scale(scale, scale));
        Ok(surface)
    }

    fn stroke(&self) -> Stroke {
        Stroke {
            width: self.stroke_width,
            line_cap: LineCap::Round,
            line_join: LineJoin::Round,
            ..Stroke::default()
        }
    }

    /// Strokes a polyline, or fills a dot of the line width for a single point.
    fn paint_stroke(
        &self,
        surface: &mut Pixmap,
        stroke: &StrokeAnnotation,
        target: RasterSize,
        transform: Transform,
    ) {
        let paint = paint_for(stroke.color);
        let mut points = stroke.points.iter().map(|p| denormalize(*p, target));
        let Some((x, y)) = points.next() else {
            return;
        };

        if stroke.points.len() == 1 {
            if let Some(dot) = PathBuilder::from_circle(x, y, self.stroke_width / 2.0) {
                surface.fill_path(&dot, &paint, FillRule::Winding, transform, None);
            }
            return;
        }

        let mut builder = PathBuilder::new();
        builder.move_to(x, y);
        for (x, y) in points {
            builder.line_to(x, y);
        }

        if let Some(path) = builder.finish() {
            surface.stroke_path(&path, &paint, &self.stroke(), transform, None);
        }
    }

    fn paint_text(
        &self,
        surface: &mut Pixmap,
        text: &TextAnnotation,
        target: RasterSize,
        transform: Transform,
    ) {
        let font_size = text.font_size_fraction * target.height;
        let (x, top) = denormalize(NormalizedPoint::new(text.x, text.y), target);

        let mut builder = PathBuilder::new();
        for (index, line) in text.lines().enumerate() {
            let line_top = top + (index as f64 * font_size * LINE_HEIGHT_FACTOR) as f32;
            if !self.fonts.outline_line(&mut builder, line, x, line_top, font_size as f32) {
                return;
            }
        }

        if let Some(path) = builder.finish() {
            surface.fill_path(&path, &paint_for(text.color), FillRule::Winding, transform, None);
        }
    }
}

/// Target-space position of a normalized point.
pub fn denormalize(point: NormalizedPoint, target: RasterSize) -> (f32, f32) {
    pixel(point.to_pixels(target))
}

fn pixel(point: PixelPoint) -> (f32, f32) {
    (point.x as f32, point.y as f32)
}

fn paint_for(color: Rgb) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color_rgba8(color.r, color.g, color.b, 255);
    paint.anti_alias = true;
    paint
}

/// Copies a premultiplied surface into a straight-alpha RGBA image.
pub fn to_rgba_image(surface: &Pixmap) -> RgbaImage {
    let mut image = RgbaImage::new(surface.width(), surface.height());
    for (target, source) in image.pixels_mut().zip(surface.pixels()) {
        let color = source.demultiply();
        *target = Rgba([color.red(), color.green(), color.blue(), color.alpha()]);
    }
    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use doc_model::{AnnotationSet, DocumentId, PageKey};

    fn renderer() -> AnnotationRenderer {
        AnnotationRenderer::new(FontBook::empty())
    }

    fn alpha_at(surface: &Pixmap, x: u32, y: u32) -> u8 {
        surface.pixel(x, y).map(|p| p.alpha()).unwrap_or(0)
    }

    fn horizontal(y: f64) -> Annotation {
        Annotation::Stroke(StrokeAnnotation {
            points: vec![NormalizedPoint::new(0.1, y), NormalizedPoint::new(0.9, y)],
            color: Rgb::STROKE_RED,
        })
    }

    #[test]
    fn denormalize_is_exact_multiplication() {
        let target = RasterSize::new(612.0, 792.0);
        for (x, y) in [(0.0, 0.0), (0.25, 0.75), (1.0, 1.0), (0.5, 0.125)] {
            let first = denormalize(NormalizedPoint::new(x, y), target);
            let second = denormalize(NormalizedPoint::new(x, y), target);
            assert_eq!(first, ((x * 612.0) as f32, (y * 792.0) as f32));
            assert_eq!(first, second);
        }
    }

    #[test]
    fn stroke_paints_along_its_denormalized_path() {
        let mut surface = transparent_surface(100, 100).expect("surface");
        renderer().paint(
            &mut surface,
            &[horizontal(0.5)],
            RasterSize::new(100.0, 100.0),
            Transform::identity(),
        );

        assert!(alpha_at(&surface, 50, 50) > 0);
        assert_eq!(alpha_at(&surface, 50, 10), 0);
        assert_eq!(alpha_at(&surface, 2, 50), 0);

        let pixel = surface.pixel(50, 50).expect("in bounds").demultiply();
        assert!(pixel.red() > pixel.blue());
    }

    #[test]
    fn repaint_is_idempotent() {
        let annotations = vec![horizontal(0.3), horizontal(0.6)];
        let mut surface = transparent_surface(64, 48).expect("surface");

        renderer().repaint(&mut surface, &annotations);
        let first = surface.data().to_vec();
        renderer().repaint(&mut surface, &annotations);

        assert_eq!(surface.data(), first.as_slice());
    }

    #[test]
    fn single_point_stroke_paints_a_dot() {
        let mut surface = transparent_surface(20, 20).expect("surface");
        let dot = Annotation::Stroke(StrokeAnnotation {
            points: vec![NormalizedPoint::new(0.5, 0.5)],
            color: Rgb::BLACK,
        });
        renderer().repaint(&mut surface, &[dot]);
        assert!(alpha_at(&surface, 10, 10) > 0 || alpha_at(&surface, 9, 9) > 0);
    }

    #[test]
    fn export_layer_scales_page_space_onto_larger_surface() {
        let layer = renderer()
            .render_layer(&[horizontal(0.5)], RasterSize::new(100.0, 50.0), 2.0)
            .expect("layer");

        assert_eq!((layer.width(), layer.height()), (200, 100));
        assert!(alpha_at(&layer, 100, 50) > 0);
        assert_eq!(alpha_at(&layer, 100, 10), 0);
    }

    #[test]
    fn empty_layer_is_fully_transparent() {
        let mut set = AnnotationSet::new();
        set.append_text(
            PageKey::new(DocumentId(1), 1),
            NormalizedPoint::new(0.1, 0.1),
            "ignored without a face",
            0.05,
            Rgb::BLACK,
        );

        let page = set.page(PageKey::new(DocumentId(1), 1));
        let layer =
            renderer().render_layer(page, RasterSize::new(40.0, 40.0), 2.0).expect("layer");
        assert!(layer.pixels().iter().all(|p| p.alpha() == 0));
    }

    #[test]
    fn live_segments_match_full_repaint_region() {
        let mut live = transparent_surface(100, 100).expect("surface");
        let r = renderer();
        let (from, to) = (PixelPoint::new(10.0, 50.0), PixelPoint::new(90.0, 50.0));
        r.paint_segment(&mut live, from, to, Rgb::BLACK);

        let mut repainted = transparent_surface(100, 100).expect("surface");
        r.repaint(
            &mut repainted,
            &[Annotation::Stroke(StrokeAnnotation {
                points: vec![NormalizedPoint::new(0.1, 0.5), NormalizedPoint::new(0.9, 0.5)],
                color: Rgb::BLACK,
            })],
        );

        assert_eq!(live.data(), repainted.data());
    }

    #[test]
    fn rgba_conversion_unpremultiplies() {
        let mut surface = transparent_surface(8, 8).expect("surface");
        renderer().with_stroke_width(4.0).paint_dot(
            &mut surface,
            PixelPoint::new(4.0, 4.0),
            Rgb::new(0, 0, 255),
        );

        let image = to_rgba_image(&surface);
        assert_eq!(image.dimensions(), (8, 8));
        let painted = image.pixels().find(|p| p.0[3] == 255).expect("an opaque pixel");
        assert_eq!(painted.0[..3], [0, 0, 255]);
        assert_eq!(image.get_pixel(0, 0).0[3], 0);
    }
}
