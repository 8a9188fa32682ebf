//! Certificate rasterisation.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Decode** | `image::load_from_memory_with_format` (PNG, JPEG) |
//! | **Fit** | [`crate::fit`] (average-advance model, binary search) |
//! | **Text layer** | SVG `<text>` rasterised by `resvg` |
//! | **Flatten + encode** | `image::imageops::overlay`, PNG or JPEG encoder |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for font size and line placement (unit testable)
//! - **Parameters**: Data structures describing the text layer
//! - **Backend**: [`RasterBackend`] trait + [`SvgBackend`]
//! - **Compose**: High-level functions combining calculations + backend

pub mod backend;
mod calculations;
pub mod compose;
mod params;
pub mod svg_backend;

pub use backend::{Dimensions, PreparedTemplate, RasterBackend, RenderError};
pub use compose::{RenderSettings, plan_overlay, prepare, render, render_prepared};
pub use params::{
    FontMultipliers, OutputFormat, OverlayParams, Quality, TemplateMime, TextBlock, TextColor,
};
pub use svg_backend::SvgBackend;
