//! Parameter types for certificate rendering.
//!
//! These structs describe *what* to draw, not *how*. The
//! [`compose`](super::compose) module fits text and fills them in; a
//! [`RasterBackend`](super::backend::RasterBackend) turns them into pixels.
//! Keeping the two apart lets the pipeline run against a mock backend.
//!
//! ## Types
//!
//! - [`TemplateMime`]: accepted template encodings (PNG, JPEG), sniffed from magic bytes.
//! - [`OutputFormat`]: raster format of the finished certificate.
//! - [`Quality`]: JPEG quality (1–100, default 90). Clamped on construction.
//! - [`TextColor`]: `#rrggbb` fill for all text.
//! - [`FontMultipliers`]: per-role scale applied to the template's base font.
//! - [`TextBlock`] / [`OverlayParams`]: the fully positioned text layer.

use crate::fields::{Align, FieldName};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Encoding of an uploaded template image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemplateMime {
    #[serde(rename = "image/png")]
    Png,
    #[serde(rename = "image/jpeg")]
    Jpeg,
}

impl TemplateMime {
    /// Detect PNG or JPEG from the leading bytes. Anything else is `None`.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match image::guess_format(bytes).ok()? {
            image::ImageFormat::Png => Some(Self::Png),
            image::ImageFormat::Jpeg => Some(Self::Jpeg),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }

    pub fn image_format(self) -> image::ImageFormat {
        match self {
            Self::Png => image::ImageFormat::Png,
            Self::Jpeg => image::ImageFormat::Jpeg,
        }
    }
}

impl fmt::Display for TemplateMime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raster format of rendered certificates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    #[serde(alias = "jpeg")]
    Jpg,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpg => "jpg",
        }
    }
}

/// Quality setting for JPEG output (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}

/// Solid text fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextColor(pub [u8; 3]);

impl TextColor {
    /// Parse `#rrggbb` (the leading `#` is optional).
    pub fn parse(s: &str) -> Option<Self> {
        let hex = s.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        Some(Self([channel(0)?, channel(2)?, channel(4)?]))
    }
}

impl Default for TextColor {
    fn default() -> Self {
        Self([0x11, 0x11, 0x11])
    }
}

impl fmt::Display for TextColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b] = self.0;
        write!(f, "#{r:02x}{g:02x}{b:02x}")
    }
}

/// Scale applied to the template's base font for each role.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FontMultipliers {
    pub person_name: f64,
    pub course: f64,
    pub record_id: f64,
}

impl FontMultipliers {
    pub fn get(&self, name: FieldName) -> f64 {
        match name {
            FieldName::PersonName => self.person_name,
            FieldName::Course => self.course,
            FieldName::RecordId => self.record_id,
        }
    }
}

impl Default for FontMultipliers {
    fn default() -> Self {
        Self {
            person_name: 1.0,
            course: 1.0,
            record_id: 0.75,
        }
    }
}

/// One field's wrapped text, positioned in canvas pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct TextBlock {
    pub field: FieldName,
    pub lines: Vec<String>,
    pub font_px: u32,
    pub align: Align,
    /// Horizontal anchor shared by every line (left edge, midpoint or right edge).
    pub anchor_x: f64,
    /// Baseline y of each line, same length as `lines`.
    pub baselines: Vec<f64>,
    /// Whether the fitter managed to fit the box.
    pub fits: bool,
}

/// The whole text layer for one certificate.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayParams {
    pub width: u32,
    pub height: u32,
    pub font_family: String,
    pub color: TextColor,
    pub blocks: Vec<TextBlock>,
}
