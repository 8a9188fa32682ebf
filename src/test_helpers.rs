//! Shared test utilities for the certpress test suite.
//!
//! Synthetic templates are built in memory with `image`, so no fixture
//! files are needed.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let store = MemoryStore::new();
//! let id = seeded_template(&store, 1800, 1200);
//! assert_eq!(store.fields(&id).unwrap().len(), 3);
//! ```

use image::{ExtendedColorType, ImageEncoder, RgbImage};

use crate::fields::{Align, FieldBox, FieldName};
use crate::store::TemplateStore;

// =========================================================================
// Synthetic images
// =========================================================================

fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 251) as u8, (y % 241) as u8, 180])
    })
}

/// A small PNG with a deterministic gradient.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = gradient(width, height);
    let mut buf = Vec::new();
    image::codecs::png::PngEncoder::new(&mut buf)
        .write_image(img.as_raw(), width, height, ExtendedColorType::Rgb8)
        .unwrap();
    buf
}

/// A small JPEG with a deterministic gradient.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = gradient(width, height);
    let mut buf = Vec::new();
    image::codecs::jpeg::JpegEncoder::new(&mut buf)
        .write_image(img.as_raw(), width, height, ExtendedColorType::Rgb8)
        .unwrap();
    buf
}

// =========================================================================
// Fields
// =========================================================================

/// One box per role, laid out for a 1800×1200 landscape certificate.
pub fn certificate_fields() -> Vec<FieldBox> {
    vec![
        FieldBox {
            name: FieldName::PersonName,
            x: 300,
            y: 420,
            w: 1200,
            h: 120,
            align: Align::Center,
        },
        FieldBox {
            name: FieldName::Course,
            x: 300,
            y: 600,
            w: 1200,
            h: 100,
            align: Align::Center,
        },
        FieldBox {
            name: FieldName::RecordId,
            x: 60,
            y: 1100,
            w: 600,
            h: 40,
            align: Align::Left,
        },
    ]
}

/// Store a PNG template with [`certificate_fields`] and return its id.
pub fn seeded_template(store: &dyn TemplateStore, width: u32, height: u32) -> String {
    let id = store.put(&png_bytes(width, height)).unwrap();
    store.save_fields(&id, certificate_fields()).unwrap();
    id
}
