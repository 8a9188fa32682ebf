//! # certpress
//!
//! Fills named boxes on a certificate template with a person's name, a
//! course title and a record identifier, then flattens the text into a new
//! PNG or JPEG. Runs one record at a time or as a batch over a CSV file that
//! yields one zip archive and one audit line per certificate.
//!
//! # Architecture: Fit, Compose, Collect
//!
//! ```text
//! 1. Fit       text + box       →  font size + lines   (pure arithmetic)
//! 2. Compose   template + lines →  encoded raster      (backend trait)
//! 3. Collect   rendered files   →  zip + JSONL log     (single writer)
//! ```
//!
//! The fitter never measures glyphs. It estimates every character as a fixed
//! fraction of the font size, so a layout is a pure function of text, box and
//! size, and tests can assert exact font sizes and line breaks.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`fit`] | Font-size search and greedy word wrap against a box |
//! | [`fields`] | Field roles, boxes and their normalization |
//! | [`imaging`] | Overlay planning, the raster backend trait and the resvg backend |
//! | [`records`] | CSV rows, column aliases and row → job expansion |
//! | [`ident`] | `{prefix}-{YYYYMMDD}-{hex}` record identifiers |
//! | [`naming`] | Slugs and certificate file names |
//! | [`store`] | Template bytes, versions and saved fields |
//! | [`archive`] | Zip assembly and archive delivery |
//! | [`audit`] | JSONL audit entries and sinks |
//! | [`pipeline`] | Batch and single-request orchestration |
//! | [`config`] | `config.toml` loading and validation |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Backend Trait at the Pixel Boundary
//!
//! Everything up to the positioned text layer ([`imaging::OverlayParams`]) is
//! computed in plain Rust. Only decoding, drawing and encoding go through
//! [`imaging::RasterBackend`]. The production [`imaging::SvgBackend`] builds a
//! small SVG of `<text>` elements and rasterizes it with resvg; the tests swap
//! in a mock that records what it was asked to draw.
//!
//! ## One Writer per Archive
//!
//! Workers render in a rayon pool and send finished files over a channel.
//! The thread that runs the batch is the only one that touches the archive
//! and the audit buffer. A name collision inside a batch replaces the earlier
//! entry, and the result reports both rendered jobs and distinct entries.
//!
//! ## Failing Whole
//!
//! A batch either delivers a complete archive or nothing. The first render
//! error stops new jobs; the partial archive is dropped and no audit lines
//! are written. Writing the audit log itself is best-effort.

pub mod archive;
pub mod audit;
pub mod config;
pub mod fields;
pub mod fit;
pub mod ident;
pub mod imaging;
pub mod naming;
pub mod output;
pub mod pipeline;
pub mod records;
pub mod store;

#[cfg(test)]
pub(crate) mod test_helpers;
