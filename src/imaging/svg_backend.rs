//! Production raster backend: `image` for pixels, `resvg` for text.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (PNG, JPEG) | `image::load_from_memory_with_format` |
//! | Text layer | SVG `<text>`/`<tspan>` string → `usvg::Tree` → `resvg::render` into a transparent `tiny_skia::Pixmap` |
//! | Flatten | `image::imageops::overlay` (single alpha-composite pass) |
//! | Encode → PNG | `image::codecs::png::PngEncoder` via `write_to` |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder`, alpha dropped |
//!
//! Fonts are loaded once into a `fontdb::Database` when the backend is built
//! and shared by every render. With no matching face, resvg silently skips
//! the text; the certificate still renders.

use super::backend::{Dimensions, PreparedTemplate, RasterBackend, RenderError};
use super::params::{OutputFormat, OverlayParams, Quality, TemplateMime, TextBlock};
use crate::fields::Align;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use resvg::{tiny_skia, usvg};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

/// Backend that draws text through an SVG layer.
pub struct SvgBackend {
    fontdb: Arc<usvg::fontdb::Database>,
    jpeg_quality: Quality,
}

impl SvgBackend {
    /// Build a backend, loading `font_files` first and then (optionally) the
    /// system fonts.
    pub fn new(
        font_files: &[PathBuf],
        system_fonts: bool,
        jpeg_quality: Quality,
    ) -> Result<Self, RenderError> {
        let mut db = usvg::fontdb::Database::new();
        for path in font_files {
            db.load_font_file(path).map_err(|source| RenderError::Font {
                path: path.clone(),
                source,
            })?;
        }
        if system_fonts {
            db.load_system_fonts();
        }
        tracing::debug!(faces = db.len(), "font database ready");
        Ok(Self {
            fontdb: Arc::new(db),
            jpeg_quality,
        })
    }

    /// Backend with no fonts at all. Text is skipped; used where only the
    /// pixel pipeline matters.
    pub fn without_fonts() -> Self {
        Self {
            fontdb: Arc::new(usvg::fontdb::Database::new()),
            jpeg_quality: Quality::default(),
        }
    }

    /// Rasterise an SVG document into a straight-alpha RGBA layer.
    fn rasterize(&self, svg: &str, width: u32, height: u32) -> Result<RgbaImage, RenderError> {
        let mut opt = usvg::Options::default();
        opt.fontdb = Arc::clone(&self.fontdb);
        let tree =
            usvg::Tree::from_str(svg, &opt).map_err(|e| RenderError::Overlay(e.to_string()))?;

        let mut pixmap = tiny_skia::Pixmap::new(width, height).ok_or_else(|| {
            RenderError::Overlay(format!("cannot allocate {width}x{height} layer"))
        })?;
        resvg::render(&tree, tiny_skia::Transform::identity(), &mut pixmap.as_mut());

        let mut layer = RgbaImage::new(width, height);
        for (dst, src) in layer.pixels_mut().zip(pixmap.pixels()) {
            let c = src.demultiply();
            *dst = Rgba([c.red(), c.green(), c.blue(), c.alpha()]);
        }
        Ok(layer)
    }

    fn encode(&self, canvas: RgbaImage, format: OutputFormat) -> Result<Vec<u8>, RenderError> {
        let mut out = Cursor::new(Vec::new());
        let image = DynamicImage::ImageRgba8(canvas);
        match format {
            OutputFormat::Png => image.write_to(&mut out, ImageFormat::Png),
            OutputFormat::Jpg => {
                let quality = self.jpeg_quality.value() as u8;
                JpegEncoder::new_with_quality(&mut out, quality).encode_image(&image.to_rgb8())
            }
        }
        .map_err(|e| RenderError::Encode(e.to_string()))?;
        Ok(out.into_inner())
    }
}

impl RasterBackend for SvgBackend {
    fn prepare(&self, bytes: &[u8], mime: TemplateMime) -> Result<PreparedTemplate, RenderError> {
        let image = image::load_from_memory_with_format(bytes, mime.image_format())
            .map_err(|e| RenderError::InvalidTemplate(e.to_string()))?;
        let dimensions = Dimensions {
            width: image.width(),
            height: image.height(),
        };
        Ok(PreparedTemplate {
            dimensions,
            pixels: image.to_rgba8(),
        })
    }

    fn render(
        &self,
        template: &PreparedTemplate,
        overlay: &OverlayParams,
        format: OutputFormat,
    ) -> Result<Vec<u8>, RenderError> {
        let mut canvas = template.pixels.clone();
        if overlay.blocks.iter().any(|b| !b.lines.is_empty()) {
            let svg = overlay_svg(overlay);
            let layer = self.rasterize(&svg, canvas.width(), canvas.height())?;
            image::imageops::overlay(&mut canvas, &layer, 0, 0);
        }
        self.encode(canvas, format)
    }
}

fn escape_xml(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn text_anchor(align: Align) -> &'static str {
    match align {
        Align::Left => "start",
        Align::Center => "middle",
        Align::Right => "end",
    }
}

fn text_element(block: &TextBlock, family: &str, fill: &str) -> String {
    let tspans: String = block
        .lines
        .iter()
        .zip(&block.baselines)
        .map(|(line, y)| {
            format!(
                r#"<tspan x="{:.2}" y="{:.2}">{}</tspan>"#,
                block.anchor_x,
                y,
                escape_xml(line)
            )
        })
        .collect();
    format!(
        r#"<text font-family="{}" font-size="{}" fill="{}" text-anchor="{}">{}</text>"#,
        escape_xml(family),
        block.font_px,
        fill,
        text_anchor(block.align),
        tspans
    )
}

/// Build the full-canvas SVG text layer: one `<text>` per field, one
/// `<tspan>` per line.
pub fn overlay_svg(overlay: &OverlayParams) -> String {
    let fill = overlay.color.to_string();
    let body: String = overlay
        .blocks
        .iter()
        .filter(|b| !b.lines.is_empty())
        .map(|b| text_element(b, &overlay.font_family, &fill))
        .collect();
    format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">{body}</svg>"#,
        w = overlay.width,
        h = overlay.height,
    )
}
