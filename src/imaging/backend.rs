//! Raster backend trait and shared types.
//!
//! The [`RasterBackend`] trait defines the two operations every backend must
//! support: prepare (decode a template once) and render (flatten a text layer
//! onto a prepared template and encode the result).
//!
//! The production implementation is
//! [`SvgBackend`](super::svg_backend::SvgBackend): `image` for decode and
//! encode, `resvg` for the text layer.

use super::params::{OutputFormat, OverlayParams, TemplateMime};
use image::RgbaImage;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Invalid template: {0}")]
    InvalidTemplate(String),
    #[error("Text layer failed: {0}")]
    Overlay(String),
    #[error("Encoding failed: {0}")]
    Encode(String),
    #[error("Cannot load font {}: {source}", path.display())]
    Font {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Pixel size of a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// A decoded template, shared read-only by every job of a batch.
#[derive(Debug, Clone)]
pub struct PreparedTemplate {
    pub dimensions: Dimensions,
    pub pixels: RgbaImage,
}

/// Trait for raster backends.
///
/// `Sync` so one backend can serve every worker thread of a batch.
pub trait RasterBackend: Sync {
    /// Decode template bytes.
    fn prepare(&self, bytes: &[u8], mime: TemplateMime) -> Result<PreparedTemplate, RenderError>;

    /// Flatten the text layer onto a copy of the template and encode it.
    fn render(
        &self,
        template: &PreparedTemplate,
        overlay: &OverlayParams,
        format: OutputFormat,
    ) -> Result<Vec<u8>, RenderError>;
}
