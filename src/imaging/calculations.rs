//! Pure geometry for placing text on a template.
//!
//! All functions here are pure and testable without any I/O or images.

use super::backend::Dimensions;
use crate::fields::{Align, FieldBox};
use crate::fit::LINE_HEIGHT_EM;

/// Template pixels per base-font pixel along the short edge.
const BASE_FONT_DIVISOR: f64 = 18.0;

/// Offset from a line box's vertical centre to its baseline, in ems.
///
/// Roughly half the x-height of a sans-serif face, so lowercase text looks
/// centred in its line.
const BASELINE_SHIFT_EM: f64 = 0.35;

/// Default maximum font for a template: one eighteenth of the short edge.
///
/// ```text
/// 1800×1200 → 67px
/// 800×600   → 33px
/// ```
pub fn base_font(dims: Dimensions) -> u32 {
    (f64::from(dims.width.min(dims.height)) / BASE_FONT_DIVISOR).round() as u32
}

/// Maximum font for one field: base font scaled by the role multiplier,
/// never below `floor`.
pub fn max_font_for_field(base_font: u32, multiplier: f64, floor: u32) -> u32 {
    let scaled = (f64::from(base_font) * multiplier).round();
    let scaled = if scaled.is_finite() && scaled > 0.0 {
        scaled as u32
    } else {
        0
    };
    scaled.max(floor)
}

/// Horizontal anchor for every line of a field.
pub fn anchor_x(field: &FieldBox) -> f64 {
    let x = f64::from(field.x);
    let w = f64::from(field.w);
    match field.align {
        Align::Left => x,
        Align::Center => x + w / 2.0,
        Align::Right => x + w,
    }
}

/// Distance between consecutive baselines.
pub fn line_pitch(font_px: u32) -> u32 {
    (f64::from(font_px) * LINE_HEIGHT_EM).round() as u32
}

/// Baselines for `line_count` lines, with the block centred vertically in the box.
///
/// An overflowing block (taller than the box) stays centred and spills
/// evenly above and below.
pub fn baselines(field: &FieldBox, line_count: usize, font_px: u32) -> Vec<f64> {
    let pitch = f64::from(line_pitch(font_px));
    let block = pitch * line_count as f64;
    let top = f64::from(field.y) + (f64::from(field.h) - block) / 2.0;
    let shift = f64::from(font_px) * BASELINE_SHIFT_EM;
    (0..line_count)
        .map(|i| top + pitch * (i as f64 + 0.5) + shift)
        .collect()
}
