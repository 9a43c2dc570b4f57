//! Annotation objects burned into exported pages.
//!
//! Every coordinate is a page fraction (see [`NormalizedPoint`]), so an
//! annotation reads the same at any zoom level or export resolution.

use crate::geometry::NormalizedPoint;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque RGB colour, persisted as a `#rrggbb` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    /// Default ink for freehand strokes.
    pub const STROKE_RED: Rgb = Rgb { r: 0xef, g: 0x44, b: 0x44 };
    pub const BLACK: Rgb = Rgb { r: 0, g: 0, b: 0 };

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid colour {0:?}, expected #rgb or #rrggbb")]
pub struct ColorParseError(pub String);

impl FromStr for Rgb {
    type Err = ColorParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ColorParseError(value.to_owned());
        let hex = value.trim().strip_prefix('#').ok_or_else(invalid)?;
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        let channel = |digits: &str| u8::from_str_radix(digits, 16).map_err(|_| invalid());
        match hex.len() {
            6 => Ok(Rgb {
                r: channel(&hex[0..2])?,
                g: channel(&hex[2..4])?,
                b: channel(&hex[4..6])?,
            }),
            3 => {
                let short = |i: usize| channel(&hex[i..i + 1]).map(|v| v * 17);
                Ok(Rgb { r: short(0)?, g: short(1)?, b: short(2)? })
            }
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for Rgb {
    type Error = ColorParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Rgb> for String {
    fn from(value: Rgb) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

fn default_stroke_color() -> Rgb {
    Rgb::STROKE_RED
}

fn default_text_color() -> Rgb {
    Rgb::BLACK
}

/// Freehand polyline. Holds at least one point once committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokeAnnotation {
    pub points: Vec<NormalizedPoint>,
    #[serde(default = "default_stroke_color")]
    pub color: Rgb,
}

/// Multi-line text label anchored at its top-left corner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextAnnotation {
    pub x: f64,
    pub y: f64,
    pub text: String,
    /// Font size as a fraction of the page height.
    #[serde(rename = "size")]
    pub font_size_fraction: f64,
    #[serde(default = "default_text_color")]
    pub color: Rgb,
}

impl TextAnnotation {
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.text.split('\n')
    }

    pub fn line_count(&self) -> usize {
        self.lines().count()
    }

    pub fn first_line(&self) -> &str {
        self.lines().next().unwrap_or_default()
    }
}

/// One entry of a page's paint list; later entries are drawn on top.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Annotation {
    Stroke(StrokeAnnotation),
    Text(TextAnnotation),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum TaggedAnnotation {
    Stroke(StrokeAnnotation),
    Text(TextAnnotation),
}

// Older sessions wrote strokes without a `type` tag, and the oldest ones
// stored a stroke as a bare point array.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredAnnotation {
    Tagged(TaggedAnnotation),
    UntaggedStroke(StrokeAnnotation),
    BarePoints(Vec<NormalizedPoint>),
}

impl<'de> Deserialize<'de> for Annotation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match StoredAnnotation::deserialize(deserializer)? {
            StoredAnnotation::Tagged(TaggedAnnotation::Stroke(stroke))
            | StoredAnnotation::UntaggedStroke(stroke) => Annotation::Stroke(stroke),
            StoredAnnotation::Tagged(TaggedAnnotation::Text(text)) => Annotation::Text(text),
            StoredAnnotation::BarePoints(points) => {
                Annotation::Stroke(StrokeAnnotation { points, color: default_stroke_color() })
            }
        })
    }
}

impl Annotation {
    pub fn color(&self) -> Rgb {
        match self {
            Annotation::Stroke(stroke) => stroke.color,
            Annotation::Text(text) => text.color,
        }
    }
}
