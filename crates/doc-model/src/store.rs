//! Per-page annotation lists and the edit operations that mutate them.

use crate::annotation::{Annotation, Rgb, StrokeAnnotation, TextAnnotation};
use crate::geometry::{distance_point_to_segment, NormalizedPoint, PixelPoint, RasterSize};
use crate::DocumentId;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Line advance used when laying out and hit-testing multi-line text.
pub const LINE_HEIGHT_FACTOR: f64 = 1.2;

/// One page of one source document. Page numbers are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageKey {
    pub document_id: DocumentId,
    pub page_number: u32,
}

impl PageKey {
    pub fn new(document_id: DocumentId, page_number: u32) -> Self {
        Self { document_id, page_number }
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.document_id.0, self.page_number)
    }
}

// Persisted as the map key `"<document>-<page>"`.
impl Serialize for PageKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PageKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let parsed = raw.rsplit_once('-').and_then(|(document, page)| {
            Some(PageKey::new(DocumentId(document.parse().ok()?), page.parse().ok()?))
        });

        parsed.ok_or_else(|| serde::de::Error::custom(format!("invalid page key {raw:?}")))
    }
}

/// Width of a single line of text at a given font size, in the same pixel
/// space as the font size.
pub trait TextMeasure {
    fn line_width(&self, line: &str, font_size: f64) -> f64;
}

/// Fixed-advance estimate used when no font face is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproxTextMeasure;

impl ApproxTextMeasure {
    pub const ADVANCE_EM: f64 = 0.6;
}

impl TextMeasure for ApproxTextMeasure {
    fn line_width(&self, line: &str, font_size: f64) -> f64 {
        line.chars().count() as f64 * Self::ADVANCE_EM * font_size
    }
}

/// Annotations of every page, keyed by [`PageKey`]. List order is z-order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationSet {
    pages: BTreeMap<PageKey, Vec<Annotation>>,
}

impl AnnotationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Annotations of one page in paint order; empty when the page has none.
    pub fn page(&self, key: PageKey) -> &[Annotation] {
        self.pages.get(&key).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn has_annotations(&self, key: PageKey) -> bool {
        !self.page(key).is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = PageKey> + '_ {
        self.pages.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.values().all(Vec::is_empty)
    }

    /// Appends a stroke. An empty point list is dropped and reports `false`.
    pub fn append_stroke(
        &mut self,
        key: PageKey,
        points: Vec<NormalizedPoint>,
        color: Rgb,
    ) -> bool {
        if points.is_empty() {
            return false;
        }

        let stroke = Annotation::Stroke(StrokeAnnotation { points, color });
        self.pages.entry(key).or_default().push(stroke);
        true
    }

    /// Appends a text label. Whitespace-only text is dropped and reports `false`.
    pub fn append_text(
        &mut self,
        key: PageKey,
        at: NormalizedPoint,
        text: &str,
        font_size_fraction: f64,
        color: Rgb,
    ) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }

        self.pages.entry(key).or_default().push(Annotation::Text(TextAnnotation {
            x: at.x,
            y: at.y,
            text: text.to_owned(),
            font_size_fraction,
            color,
        }));
        true
    }

    /// Removes every annotation of the page whose geometry, denormalized
    /// against `raster`, lies within `threshold` pixels of `hit`.
    ///
    /// Returns whether anything was removed.
    pub fn erase_near(
        &mut self,
        key: PageKey,
        hit: PixelPoint,
        raster: RasterSize,
        threshold: f64,
        measure: &dyn TextMeasure,
    ) -> bool {
        let Some(entries) = self.pages.get_mut(&key) else {
            return false;
        };

        let before = entries.len();
        entries.retain(|annotation| !annotation_hit(annotation, hit, raster, threshold, measure));
        entries.len() != before
    }

    pub fn clear_page(&mut self, key: PageKey) -> bool {
        self.pages.remove(&key).is_some_and(|entries| !entries.is_empty())
    }

    pub fn clear_document(&mut self, document_id: DocumentId) -> bool {
        let before = self.pages.len();
        self.pages.retain(|key, _| key.document_id != document_id);
        self.pages.len() != before
    }
}

fn annotation_hit(
    annotation: &Annotation,
    hit: PixelPoint,
    raster: RasterSize,
    threshold: f64,
    measure: &dyn TextMeasure,
) -> bool {
    match annotation {
        Annotation::Stroke(stroke) => stroke_hit(stroke, hit, raster, threshold),
        Annotation::Text(text) => text_hit(text, hit, raster, threshold, measure),
    }
}

/// A stroke is hit within `threshold` px of any segment. A single-point stroke
/// is painted as a dot, so it is hit by distance to that point.
fn stroke_hit(
    stroke: &StrokeAnnotation,
    hit: PixelPoint,
    raster: RasterSize,
    threshold: f64,
) -> bool {
    let points: Vec<PixelPoint> = stroke.points.iter().map(|p| p.to_pixels(raster)).collect();

    match points.as_slice() {
        [] => false,
        [only] => hit.distance_to(*only) <= threshold,
        _ => points
            .windows(2)
            .any(|pair| distance_point_to_segment(hit, pair[0], pair[1]) <= threshold),
    }
}

fn text_hit(
    text: &TextAnnotation,
    hit: PixelPoint,
    raster: RasterSize,
    threshold: f64,
    measure: &dyn TextMeasure,
) -> bool {
    let left = text.x * raster.width;
    let top = text.y * raster.height;
    let font_size = text.font_size_fraction * raster.height;
    let width = measure.line_width(text.first_line(), font_size);
    let height = text.line_count() as f64 * font_size * LINE_HEIGHT_FACTOR;

    hit.x >= left - threshold
        && hit.x <= left + width + threshold
        && hit.y >= top - threshold
        && hit.y <= top + height + threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(document: u64, page: u32) -> PageKey {
        PageKey::new(DocumentId(document), page)
    }

    fn diagonal() -> Vec<NormalizedPoint> {
        [0.0, 0.5, 1.0].into_iter().map(|t| NormalizedPoint::new(t, t)).collect()
    }

    const RASTER: RasterSize = RasterSize { width: 400.0, height: 600.0 };

    fn erase_at(set: &mut AnnotationSet, page: PageKey, x: f64, y: f64, threshold: f64) -> bool {
        set.erase_near(page, PixelPoint::new(x, y), RASTER, threshold, &ApproxTextMeasure)
    }

    fn label(set: &mut AnnotationSet, text: &str) -> bool {
        set.append_text(key(1, 1), NormalizedPoint::new(0.1, 0.1), text, 0.02, Rgb::BLACK)
    }

    #[test]
    fn empty_stroke_is_not_persisted() {
        let mut set = AnnotationSet::new();
        assert!(!set.append_stroke(key(1, 1), Vec::new(), Rgb::BLACK));
        assert!(set.page(key(1, 1)).is_empty());
        assert!(set.is_empty());
    }

    #[test]
    fn whitespace_text_is_never_committed() {
        let mut set = AnnotationSet::new();
        assert!(!label(&mut set, "   "));
        assert_eq!(set, AnnotationSet::new());
    }

    #[test]
    fn text_is_stored_trimmed() {
        let mut set = AnnotationSet::new();
        assert!(label(&mut set, "  note \n"));
        let Annotation::Text(text) = &set.page(key(1, 1))[0] else { panic!("expected text") };
        assert_eq!(text.text, "note");
    }

    #[test]
    fn erase_on_empty_page_reports_nothing_removed() {
        let mut set = AnnotationSet::new();
        for _ in 0..2 {
            assert!(!erase_at(&mut set, key(1, 1), 5.0, 5.0, 10.0));
        }
    }

    #[test]
    fn erase_on_segment_removes_stroke_even_with_zero_threshold() {
        let mut set = AnnotationSet::new();
        set.append_stroke(key(1, 1), diagonal(), Rgb::STROKE_RED);

        let center = PixelPoint::new(RASTER.width / 2.0, RASTER.height / 2.0);
        assert!(set.erase_near(key(1, 1), center, RASTER, 0.0, &ApproxTextMeasure));
        assert!(set.page(key(1, 1)).is_empty());
    }

    #[test]
    fn erase_misses_outside_threshold_and_other_pages() {
        let mut set = AnnotationSet::new();
        set.append_stroke(key(1, 1), diagonal(), Rgb::STROKE_RED);

        assert!(!erase_at(&mut set, key(1, 1), 380.0, 20.0, 10.0));
        assert!(!erase_at(&mut set, key(1, 2), 200.0, 300.0, 10.0));
        assert_eq!(set.page(key(1, 1)).len(), 1);
    }

    #[test]
    fn erase_keeps_unhit_entries_in_order() {
        let mut set = AnnotationSet::new();
        let page = key(1, 1);
        let short = vec![NormalizedPoint::new(0.1, 0.1), NormalizedPoint::new(0.2, 0.1)];
        set.append_stroke(page, short, Rgb::BLACK);
        set.append_stroke(page, diagonal(), Rgb::STROKE_RED);
        set.append_stroke(page, vec![NormalizedPoint::new(0.9, 0.1)], Rgb::new(0, 0, 255));

        assert!(erase_at(&mut set, page, 200.0, 300.0, 1.0));
        let colors: Vec<Rgb> = set.page(page).iter().map(Annotation::color).collect();
        assert_eq!(colors, vec![Rgb::BLACK, Rgb::new(0, 0, 255)]);
    }

    #[test]
    fn single_point_stroke_is_erasable() {
        let mut set = AnnotationSet::new();
        set.append_stroke(key(1, 1), vec![NormalizedPoint::new(0.5, 0.5)], Rgb::BLACK);
        assert!(erase_at(&mut set, key(1, 1), 205.0, 300.0, 10.0));
    }

    #[test]
    fn text_hit_box_uses_measured_width_and_line_height() {
        let mut set = AnnotationSet::new();
        let page = key(1, 1);
        // 30 px font on a 600 px tall raster, two lines -> 72 px tall box.
        set.append_text(page, NormalizedPoint::new(0.25, 0.5), "abcd\nx", 0.05, Rgb::BLACK);

        // Width of "abcd" is 4 * 0.6 * 30 = 72 px, box spans x 100..172.
        assert!(!erase_at(&mut set, page, 185.0, 310.0, 10.0));
        assert!(!erase_at(&mut set, page, 120.0, 385.0, 10.0));
        assert!(erase_at(&mut set, page, 180.0, 380.0, 10.0));
    }

    #[test]
    fn clear_document_only_touches_that_document() {
        let mut set = AnnotationSet::new();
        set.append_stroke(key(1, 1), diagonal(), Rgb::BLACK);
        set.append_stroke(key(1, 3), diagonal(), Rgb::BLACK);
        set.append_stroke(key(12, 1), diagonal(), Rgb::BLACK);

        assert!(set.clear_document(DocumentId(1)));
        assert!(!set.has_annotations(key(1, 1)));
        assert!(!set.has_annotations(key(1, 3)));
        assert!(set.has_annotations(key(12, 1)));
        assert!(!set.clear_document(DocumentId(1)));
    }

    #[test]
    fn clear_page_reports_whether_anything_was_there() {
        let mut set = AnnotationSet::new();
        set.append_stroke(key(2, 4), diagonal(), Rgb::BLACK);
        assert!(set.clear_page(key(2, 4)));
        assert!(!set.clear_page(key(2, 4)));
    }

    #[test]
    fn page_keys_serialize_as_document_dash_page() {
        let mut set = AnnotationSet::new();
        set.append_stroke(key(3, 7), vec![NormalizedPoint::new(0.0, 1.0)], Rgb::BLACK);

        let json = serde_json::to_value(&set).expect("serialize");
        assert!(json.get("3-7").is_some());

        let restored: AnnotationSet = serde_json::from_value(json).expect("deserialize");
        assert_eq!(restored, set);
    }

    #[test]
    fn malformed_page_key_is_rejected() {
        let result: Result<AnnotationSet, _> = serde_json::from_str(r#"{"nope":[]}"#);
        assert!(result.is_err());
    }
}
