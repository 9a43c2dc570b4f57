//! Sans-serif face lookup, text measurement and glyph outlines.

use crate::{RenderError, RenderResult};
use doc_model::{ApproxTextMeasure, TextMeasure};
use fontdb::{Database, Family, Query};
use std::sync::Arc;
use tiny_skia::PathBuilder;
use ttf_parser::{Face, GlyphId};

const PREFERRED_FAMILIES: [&str; 5] =
    ["Arial", "Helvetica", "Liberation Sans", "DejaVu Sans", "Noto Sans"];

#[derive(Debug, Clone)]
struct FaceData {
    data: Arc<Vec<u8>>,
    index: u32,
}

/// The single text face used for labels, or nothing when the system has no
/// usable sans-serif font.
#[derive(Debug, Clone, Default)]
pub struct FontBook {
    face: Option<FaceData>,
}

impl FontBook {
    /// Looks up a sans-serif face among the installed system fonts.
    pub fn system() -> Self {
        let mut db = Database::new();
        db.load_system_fonts();

        let mut families: Vec<Family<'_>> =
            PREFERRED_FAMILIES.iter().map(|&name| Family::Name(name)).collect();
        families.push(Family::SansSerif);

        let query = Query { families: &families, ..Query::default() };
        let face = db.query(&query).and_then(|id| {
            db.with_face_data(id, |data, index| FaceData { data: Arc::new(data.to_vec()), index })
        });

        match &face {
            Some(_) => tracing::debug!("loaded system sans-serif face"),
            None => {
                tracing::warn!("no system sans-serif face found, text labels will not be painted")
            }
        }

        Self { face }
    }

    /// Uses the given font file (TTF/OTF, or one face of a collection).
    pub fn from_data(data: Vec<u8>, index: u32) -> RenderResult<Self> {
        Face::parse(&data, index).map_err(|err| RenderError::Font(err.to_string()))?;
        Ok(Self { face: Some(FaceData { data: Arc::new(data), index }) })
    }

    /// A book without any face: text is measured approximately and not painted.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn has_face(&self) -> bool {
        self.face.is_some()
    }

    fn face(&self) -> Option<Face<'_>> {
        let face = self.face.as_ref()?;
        Face::parse(&face.data, face.index).ok()
    }

    /// Appends the outline of `line` to `builder`, with the em-box top of the
    /// first glyph at `(x, top)`.
    ///
    /// Returns `false` when no face is available.
    pub(crate) fn outline_line(
        &self,
        builder: &mut PathBuilder,
        line: &str,
        x: f32,
        top: f32,
        font_size: f32,
    ) -> bool {
        let Some(face) = self.face() else {
            return false;
        };

        let scale = font_size / f32::from(face.units_per_em().max(1));
        let baseline = top + f32::from(face.ascender()) * scale;
        let mut pen_x = x;

        for c in line.chars() {
            let glyph = face.glyph_index(c).unwrap_or(GlyphId(0));
            let mut pen = GlyphPen { builder: &mut *builder, origin_x: pen_x, baseline, scale };
            face.outline_glyph(glyph, &mut pen);
            pen_x += f32::from(face.glyph_hor_advance(glyph).unwrap_or(0)) * scale;
        }

        true
    }
}

impl TextMeasure for FontBook {
    fn line_width(&self, line: &str, font_size: f64) -> f64 {
        let Some(face) = self.face() else {
            return ApproxTextMeasure.line_width(line, font_size);
        };

        let units: u64 = line
            .chars()
            .map(|c| {
                let glyph = face.glyph_index(c).unwrap_or(GlyphId(0));
                u64::from(face.glyph_hor_advance(glyph).unwrap_or(0))
            })
            .sum();

        units as f64 * font_size / f64::from(face.units_per_em().max(1))
    }
}

// Font units are y-up; the surface is y-down.
struct GlyphPen<'a> {
    builder: &'a mut PathBuilder,
    origin_x: f32,
    baseline: f32,
    scale: f32,
}

impl GlyphPen<'_> {
    fn map(&self, x: f32, y: f32) -> (f32, f32) {
        (self.origin_x + x * self.scale, self.baseline - y * self.scale)
    }
}

impl ttf_parser::OutlineBuilder for GlyphPen<'_> {
    fn move_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.builder.move_to(x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.builder.line_to(x, y);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x, y) = self.map(x, y);
        self.builder.quad_to(x1, y1, x, y);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x2, y2) = self.map(x2, y2);
        let (x, y) = self.map(x, y);
        self.builder.cubic_to(x1, y1, x2, y2, x, y);
    }

    fn close(&mut self) {
        self.builder.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_book_falls_back_to_approximate_width() {
        let book = FontBook::empty();
        assert!(!book.has_face());
        assert_eq!(book.line_width("abcde", 10.0), ApproxTextMeasure.line_width("abcde", 10.0));
    }

    #[test]
    fn empty_book_does_not_outline_text() {
        let mut builder = PathBuilder::new();
        assert!(!FontBook::empty().outline_line(&mut builder, "hi", 0.0, 0.0, 12.0));
        assert!(builder.finish().is_none());
    }

    #[test]
    fn garbage_font_data_is_rejected() {
        assert!(matches!(FontBook::from_data(vec![0, 1, 2, 3], 0), Err(RenderError::Font(_))));
    }

    #[test]
    fn system_face_widths_grow_with_text() {
        let book = FontBook::system();
        if !book.has_face() {
            return;
        }
        let short = book.line_width("ab", 16.0);
        let long = book.line_width("abab", 16.0);
        assert!(short > 0.0);
        assert!(long > short);
        assert!((book.line_width("ab", 32.0) - 2.0 * short).abs() < 1e-6);
    }
}
