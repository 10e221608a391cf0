//! Pure Rust codec backend built on the `image` crate.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Identify | `ImageReader::into_dimensions`, format guessed from content |
//! | Decode (JPEG, PNG) | `ImageReader` with format guessed from content |
//! | Display downsample | `DynamicImage::resize` with `Triangle` filter |
//! | EXIF orientation | `ImageDecoder::orientation` on the content-guessed decoder |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` with quality |
//! | Encode → PNG | `image::codecs::png::PngEncoder` (lossless) |

use super::backend::{BackendError, Dimensions, ImageBackend};
use super::calculations::fit_within;
use super::params::{Quality, SizeHint};
use crate::sniff::ImageFormat;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader};
use std::io::Write;
use std::path::Path;
use tracing::trace;

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Load and decode an image from disk, trusting content over extension.
fn load_image(path: &Path) -> Result<DynamicImage, BackendError> {
    ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| BackendError::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// JPEG has no alpha channel and no 16-bit mode; flatten to RGB8 unless the
/// buffer is already something the encoder accepts.
fn jpeg_compatible(img: &DynamicImage) -> std::borrow::Cow<'_, DynamicImage> {
    match img {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageLuma8(_) => std::borrow::Cow::Borrowed(img),
        other => std::borrow::Cow::Owned(DynamicImage::ImageRgb8(other.to_rgb8())),
    }
}

impl ImageBackend for RustBackend {
    fn identify(&self, path: &Path) -> Result<Dimensions, BackendError> {
        let (width, height) = ImageReader::open(path)?
            .with_guessed_format()?
            .into_dimensions()
            .map_err(|e| BackendError::Decode {
                path: path.to_path_buf(),
                reason: format!("failed to read dimensions: {e}"),
            })?;
        Ok(Dimensions { width, height })
    }

    fn decode(&self, path: &Path) -> Result<DynamicImage, BackendError> {
        load_image(path)
    }

    fn decode_for_display(
        &self,
        path: &Path,
        hint: SizeHint,
    ) -> Result<DynamicImage, BackendError> {
        let img = load_image(path)?;
        if !hint.is_set() {
            return Ok(img);
        }
        match fit_within((img.width(), img.height()), (hint.width, hint.height)) {
            Some((w, h)) => {
                trace!(
                    path = %path.display(),
                    from_width = img.width(),
                    from_height = img.height(),
                    to_width = w,
                    to_height = h,
                    "Downsampling for display"
                );
                Ok(img.resize(w, h, FilterType::Triangle))
            }
            None => Ok(img),
        }
    }

    fn read_orientation(&self, path: &Path) -> Result<Option<u16>, BackendError> {
        let orientation = ImageReader::open(path)?
            .with_guessed_format()?
            .into_decoder()
            .and_then(|mut decoder| decoder.orientation())
            .map_err(|e| BackendError::Decode {
                path: path.to_path_buf(),
                reason: format!("failed to read orientation: {e}"),
            })?;
        Ok(match orientation {
            Orientation::NoTransforms => None,
            other => Some(u16::from(other.to_exif())),
        })
    }

    fn encode(
        &self,
        image: &DynamicImage,
        format: ImageFormat,
        quality: Quality,
        output: &mut dyn Write,
    ) -> Result<(), BackendError> {
        match format {
            ImageFormat::Jpeg => {
                let encoder = JpegEncoder::new_with_quality(output, quality.as_u8());
                jpeg_compatible(image)
                    .write_with_encoder(encoder)
                    .map_err(|e| BackendError::Encode(format!("JPEG encode failed: {e}")))
            }
            ImageFormat::Png => {
                let encoder = PngEncoder::new(output);
                image
                    .write_with_encoder(encoder)
                    .map_err(|e| BackendError::Encode(format!("PNG encode failed: {e}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{create_test_jpeg, create_test_png, jpeg_with_exif_orientation};

    #[test]
    fn identify_synthetic_jpeg() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("test.jpg");
        create_test_jpeg(&path, 200, 150);

        let dims = RustBackend::new().identify(&path).unwrap();
        assert_eq!(dims.width, 200);
        assert_eq!(dims.height, 150);
    }

    #[test]
    fn identify_nonexistent_file_errors() {
        let result = RustBackend::new().identify(Path::new("/nonexistent/image.jpg"));
        assert!(result.is_err());
    }

    #[test]
    fn decode_png_with_misleading_extension() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("actually-png.jpg");
        create_test_png(&path, 12, 8);

        let img = RustBackend::new().decode(&path).unwrap();
        assert_eq!((img.width(), img.height()), (12, 8));
    }

    #[test]
    fn decode_garbage_is_decode_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("garbage.png");
        std::fs::write(&path, b"\x89PNG\r\n\x1a\nnot really a png").unwrap();

        let err = RustBackend::new().decode(&path).unwrap_err();
        assert!(matches!(err, BackendError::Decode { .. }), "{err:?}");
    }

    #[test]
    fn decode_for_display_downsamples_large_image() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("large.png");
        create_test_png(&path, 400, 200);

        let img = RustBackend::new()
            .decode_for_display(&path, SizeHint::new(100, 40))
            .unwrap();
        assert_eq!((img.width(), img.height()), (100, 50));
    }

    #[test]
    fn decode_for_display_without_hint_keeps_size() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("large.png");
        create_test_png(&path, 400, 200);

        let img = RustBackend::new()
            .decode_for_display(&path, SizeHint::default())
            .unwrap();
        assert_eq!((img.width(), img.height()), (400, 200));
    }

    #[test]
    fn read_orientation_from_exif() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("rotated.jpg");
        jpeg_with_exif_orientation(&path, 16, 8, 6, false);

        assert_eq!(RustBackend::new().read_orientation(&path).unwrap(), Some(6));
    }

    #[test]
    fn read_orientation_big_endian_exif() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("rotated.jpg");
        jpeg_with_exif_orientation(&path, 16, 8, 8, true);

        assert_eq!(RustBackend::new().read_orientation(&path).unwrap(), Some(8));
    }

    #[test]
    fn read_orientation_without_exif_is_none() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("plain.jpg");
        create_test_jpeg(&path, 16, 8);

        assert_eq!(RustBackend::new().read_orientation(&path).unwrap(), None);
    }

    #[test]
    fn read_orientation_of_png_is_none() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("plain.png");
        create_test_png(&path, 16, 8);

        assert_eq!(RustBackend::new().read_orientation(&path).unwrap(), None);
    }

    #[test]
    fn read_orientation_missing_file_errors() {
        let result = RustBackend::new().read_orientation(Path::new("/nonexistent/image.jpg"));
        assert!(matches!(result, Err(BackendError::Io(_))), "{result:?}");
    }

    #[test]
    fn encode_jpeg_from_rgba_flattens_alpha() {
        let img = DynamicImage::new_rgba8(10, 10);
        let mut out = Vec::new();
        RustBackend::new()
            .encode(&img, ImageFormat::Jpeg, Quality::new(70), &mut out)
            .unwrap();
        assert!(out.starts_with(&[0xFF, 0xD8]));
    }

    #[test]
    fn encode_png_roundtrips_dimensions() {
        let img = DynamicImage::new_rgb8(7, 3);
        let mut out = Vec::new();
        RustBackend::new()
            .encode(&img, ImageFormat::Png, Quality::default(), &mut out)
            .unwrap();

        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (7, 3));
    }

    #[test]
    fn lower_jpeg_quality_is_smaller() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("src.jpg");
        create_test_jpeg(&path, 64, 64);
        let backend = RustBackend::new();
        let img = backend.decode(&path).unwrap();

        let mut high = Vec::new();
        let mut low = Vec::new();
        backend
            .encode(&img, ImageFormat::Jpeg, Quality::new(100), &mut high)
            .unwrap();
        backend
            .encode(&img, ImageFormat::Jpeg, Quality::new(10), &mut low)
            .unwrap();
        assert!(low.len() < high.len());
    }
}
