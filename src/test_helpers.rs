//! Shared test utilities for the chan-image test suite.
//!
//! Fixture builders that write real, decodable images to disk, plus a
//! hand-assembled EXIF segment for orientation tests.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! let owner = test_owner();
//! let path = tmp.path().join(&owner.images_subdir).join("cat.jpg");
//! create_test_jpeg(&path, 100, 100);
//! ```

use image::{DynamicImage, Rgb, RgbImage};
use std::path::Path;

use crate::resolve::OwnerDirs;

// =========================================================================
// Image fixtures
// =========================================================================

/// A gradient, so lossy encoders have something to chew on and quality
/// settings produce measurably different outputs.
fn gradient(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            ((x + y) % 256) as u8,
        ])
    }))
}

fn ensure_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
}

/// Write a baseline JPEG, regardless of the path's extension.
pub fn create_test_jpeg(path: &Path, width: u32, height: u32) {
    ensure_parent(path);
    gradient(width, height)
        .save_with_format(path, image::ImageFormat::Jpeg)
        .unwrap();
}

/// Write a PNG, regardless of the path's extension.
pub fn create_test_png(path: &Path, width: u32, height: u32) {
    ensure_parent(path);
    gradient(width, height)
        .save_with_format(path, image::ImageFormat::Png)
        .unwrap();
}

// =========================================================================
// EXIF fixtures
// =========================================================================

/// A complete APP1 segment (`FF E1`, length, `Exif\0\0`, TIFF) holding a
/// single IFD0 entry: Orientation = `orientation`.
pub fn exif_app1_segment(orientation: u16, big_endian: bool) -> Vec<u8> {
    let u16_bytes = |v: u16| {
        if big_endian {
            v.to_be_bytes()
        } else {
            v.to_le_bytes()
        }
    };
    let u32_bytes = |v: u32| {
        if big_endian {
            v.to_be_bytes()
        } else {
            v.to_le_bytes()
        }
    };

    let mut tiff = Vec::new();
    tiff.extend_from_slice(if big_endian { b"MM" } else { b"II" });
    tiff.extend_from_slice(&u16_bytes(42));
    tiff.extend_from_slice(&u32_bytes(8));
    // IFD0: one entry
    tiff.extend_from_slice(&u16_bytes(1));
    tiff.extend_from_slice(&u16_bytes(0x0112));
    tiff.extend_from_slice(&u16_bytes(3));
    tiff.extend_from_slice(&u32_bytes(1));
    tiff.extend_from_slice(&u16_bytes(orientation));
    tiff.extend_from_slice(&[0, 0]);
    // No next IFD
    tiff.extend_from_slice(&u32_bytes(0));

    let payload_len = (2 + 6 + tiff.len()) as u16;
    let mut segment = vec![0xFF, 0xE1];
    segment.extend_from_slice(&payload_len.to_be_bytes());
    segment.extend_from_slice(b"Exif\0\0");
    segment.extend_from_slice(&tiff);
    segment
}

/// Write a JPEG carrying an EXIF orientation tag, right after SOI.
pub fn jpeg_with_exif_orientation(
    path: &Path,
    width: u32,
    height: u32,
    orientation: u16,
    big_endian: bool,
) {
    let mut encoded = std::io::Cursor::new(Vec::new());
    gradient(width, height)
        .write_to(&mut encoded, image::ImageFormat::Jpeg)
        .unwrap();
    let encoded = encoded.into_inner();

    let mut bytes = encoded[..2].to_vec();
    bytes.extend_from_slice(&exif_app1_segment(orientation, big_endian));
    bytes.extend_from_slice(&encoded[2..]);

    ensure_parent(path);
    std::fs::write(path, bytes).unwrap();
}

// =========================================================================
// Owner fixtures
// =========================================================================

/// A local owner with distinct board and images subdirectories.
pub fn test_owner() -> OwnerDirs {
    OwnerDirs::new("g", "g/12345", true)
}

/// Names of all entries in `dir`, sorted. Empty when `dir` does not exist.
pub fn dir_listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}
