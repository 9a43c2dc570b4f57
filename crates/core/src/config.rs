//! Tunables shared by the editor, the renderer and the export compositor.
//!
//! Configuration is built programmatically or read from environment variables.

use doc_model::Rgb;

/// Environment variable overriding [`StitchConfig::export_scale`].
pub const EXPORT_SCALE_VAR: &str = "PAGESTITCH_EXPORT_SCALE";
/// Environment variable overriding [`StitchConfig::erase_threshold`].
pub const ERASE_THRESHOLD_VAR: &str = "PAGESTITCH_ERASE_THRESHOLD";

/// Settings for editing and export.
#[derive(Debug, Clone, PartialEq)]
pub struct StitchConfig {
    /// Overlay raster resolution in pixels per page point
    pub export_scale: f32,
    /// Eraser hit distance in live-canvas pixels
    pub erase_threshold: f64,
    /// Ink width in target pixels (page points at export)
    pub stroke_width: f32,
    /// Text size in live-canvas pixels, converted to a page fraction on commit
    pub text_size: f64,
    /// Ink colour of a fresh session
    pub stroke_color: Rgb,
    /// Name given to the exported file
    pub output_file_name: String,
}

impl Default for StitchConfig {
    fn default() -> Self {
        Self {
            export_scale: 2.0,
            erase_threshold: 10.0,
            stroke_width: 2.0,
            text_size: 16.0,
            stroke_color: Rgb::STROKE_RED,
            output_file_name: "stitched_pro.pdf".to_owned(),
        }
    }
}

impl StitchConfig {
    /// Sets the overlay resolution multiplier.
    pub fn with_export_scale(mut self, scale: f32) -> Self {
        self.export_scale = scale;
        self
    }

    /// Sets the eraser hit distance in pixels.
    pub fn with_erase_threshold(mut self, threshold: f64) -> Self {
        self.erase_threshold = threshold;
        self
    }

    /// Sets the ink colour a fresh session starts with.
    pub fn with_stroke_color(mut self, color: Rgb) -> Self {
        self.stroke_color = color;
        self
    }

    pub fn with_output_file_name(mut self, name: impl Into<String>) -> Self {
        self.output_file_name = name.into();
        self
    }

    /// Loads configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PAGESTITCH_EXPORT_SCALE`: overlay pixels per page point (default: 2)
    /// - `PAGESTITCH_ERASE_THRESHOLD`: eraser distance in pixels (default: 10)
    ///
    /// # Errors
    /// Returns an error if any variable is not a positive finite number.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup(EXPORT_SCALE_VAR) {
            config.export_scale = parse_positive(EXPORT_SCALE_VAR, &value)? as f32;
        }

        if let Some(value) = lookup(ERASE_THRESHOLD_VAR) {
            config.erase_threshold = parse_positive(ERASE_THRESHOLD_VAR, &value)?;
        }

        Ok(config)
    }
}

fn parse_positive(key: &str, value: &str) -> Result<f64, ConfigError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|parsed| parsed.is_finite() && *parsed > 0.0)
        .ok_or_else(|| ConfigError::InvalidValue(key.to_owned()))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = StitchConfig::default();
        assert_eq!(config.export_scale, 2.0);
        assert_eq!(config.erase_threshold, 10.0);
        assert_eq!(config.stroke_width, 2.0);
        assert_eq!(config.text_size, 16.0);
        assert_eq!(config.stroke_color.to_string(), "#ef4444");
        assert_eq!(config.output_file_name, "stitched_pro.pdf");
    }

    #[test]
    fn builders_override_fields() {
        let config = StitchConfig::default().with_export_scale(3.0).with_erase_threshold(4.5);
        assert_eq!(config.export_scale, 3.0);
        assert_eq!(config.erase_threshold, 4.5);
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = StitchConfig::from_lookup(lookup(&[
            (EXPORT_SCALE_VAR, "1.5"),
            (ERASE_THRESHOLD_VAR, " 12 "),
        ]))
        .expect("valid values");

        assert_eq!(config.export_scale, 1.5);
        assert_eq!(config.erase_threshold, 12.0);
    }

    #[test]
    fn invalid_environment_values_are_rejected() {
        for bad in ["abc", "0", "-2", "NaN", "inf"] {
            let err = StitchConfig::from_lookup(lookup(&[(EXPORT_SCALE_VAR, bad)]))
                .expect_err("should reject");
            assert!(matches!(err, ConfigError::InvalidValue(ref key) if key == EXPORT_SCALE_VAR));
        }
    }
}
