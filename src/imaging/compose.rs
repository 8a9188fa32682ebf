//! Compositor: fit every field and flatten the text onto the template.
//!
//! These functions combine the fitter, the geometry in
//! [`calculations`](super::calculations) and a [`RasterBackend`]. They never
//! write anywhere; the only output is the encoded bytes.

use super::backend::{Dimensions, PreparedTemplate, RasterBackend, RenderError};
use super::calculations::{anchor_x, base_font, baselines, max_font_for_field};
use super::params::{
    FontMultipliers, OutputFormat, OverlayParams, TemplateMime, TextBlock, TextColor,
};
use crate::fields::{FieldBox, FieldValues};
use crate::fit::{self, MIN_FONT_PX};

/// Result type for compositing.
pub type Result<T> = std::result::Result<T, RenderError>;

/// Everything about drawing that does not depend on the record.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSettings {
    pub format: OutputFormat,
    pub color: TextColor,
    pub font_family: String,
    pub min_font_px: u32,
    pub multipliers: FontMultipliers,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            format: OutputFormat::default(),
            color: TextColor::default(),
            font_family: "Noto Sans, DejaVu Sans, Arial, sans-serif".to_string(),
            min_font_px: MIN_FONT_PX,
            multipliers: FontMultipliers::default(),
        }
    }
}

/// Fit and position every field's text for a template of `dims`.
///
/// Boxes keep their order; a box whose value is blank yields a block with
/// no lines.
pub fn plan_overlay(
    dims: Dimensions,
    fields: &[FieldBox],
    values: &FieldValues,
    settings: &RenderSettings,
) -> OverlayParams {
    let base = base_font(dims);
    let blocks = fields
        .iter()
        .map(|field| {
            let max_font = max_font_for_field(
                base,
                settings.multipliers.get(field.name),
                settings.min_font_px,
            );
            let fitted = fit::fit_with_min(
                values.get(field.name),
                field.w,
                field.h,
                max_font,
                settings.min_font_px,
            );
            if !fitted.fits {
                tracing::debug!(
                    field = %field.name,
                    font_px = fitted.font_px,
                    "text overflows its box at the minimum size"
                );
            }
            TextBlock {
                field: field.name,
                baselines: baselines(field, fitted.lines.len(), fitted.font_px),
                anchor_x: anchor_x(field),
                align: field.align,
                font_px: fitted.font_px,
                fits: fitted.fits,
                lines: fitted.lines,
            }
        })
        .collect();

    OverlayParams {
        width: dims.width,
        height: dims.height,
        font_family: settings.font_family.clone(),
        color: settings.color,
        blocks,
    }
}

/// Render one certificate from an already decoded template.
pub fn render_prepared(
    backend: &impl RasterBackend,
    template: &PreparedTemplate,
    fields: &[FieldBox],
    values: &FieldValues,
    settings: &RenderSettings,
) -> Result<Vec<u8>> {
    let dims = template.dimensions;
    if dims.is_empty() {
        return Err(RenderError::InvalidTemplate(format!(
            "template has no usable size ({}x{})",
            dims.width, dims.height
        )));
    }
    let overlay = plan_overlay(dims, fields, values, settings);
    backend.render(template, &overlay, settings.format)
}

/// Decode the template and validate its size.
pub fn prepare(
    backend: &impl RasterBackend,
    bytes: &[u8],
    mime: TemplateMime,
) -> Result<PreparedTemplate> {
    let template = backend.prepare(bytes, mime)?;
    if template.dimensions.is_empty() {
        return Err(RenderError::InvalidTemplate(format!(
            "template has no usable size ({}x{})",
            template.dimensions.width, template.dimensions.height
        )));
    }
    Ok(template)
}

/// Decode, fit, flatten and encode in one call.
pub fn render(
    backend: &impl RasterBackend,
    bytes: &[u8],
    mime: TemplateMime,
    fields: &[FieldBox],
    values: &FieldValues,
    settings: &RenderSettings,
) -> Result<Vec<u8>> {
    let template = prepare(backend, bytes, mime)?;
    render_prepared(backend, &template, fields, values, settings)
}
