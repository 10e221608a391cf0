//! Image codec backend trait and shared types.
//!
//! The [`ImageBackend`] trait is the decode/encode *capability* the rest of
//! the crate orchestrates: identify, decode (full or display-sized), read the
//! EXIF orientation, and encode. Nothing outside a backend touches a codec.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), built on the `image`
//! crate. Tests swap in `MockBackend` to inject decode and encode failures.

use super::params::{Quality, SizeHint};
use crate::sniff::ImageFormat;
use image::DynamicImage;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not decode {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },
    #[error("Encode failed: {0}")]
    Encode(String),
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Trait for image codec backends.
///
/// Backends are shared between the caller and the bridge worker thread, so
/// they must be `Send + Sync`.
pub trait ImageBackend: Send + Sync {
    /// Get image dimensions without decoding pixel data.
    fn identify(&self, path: &Path) -> Result<Dimensions, BackendError>;

    /// Decode the full image into a mutable pixel buffer.
    fn decode(&self, path: &Path) -> Result<DynamicImage, BackendError>;

    /// Decode for display, downsampling towards `hint` when the source is
    /// larger. The returned size is not guaranteed to match the hint.
    fn decode_for_display(&self, path: &Path, hint: SizeHint)
    -> Result<DynamicImage, BackendError>;

    /// Read the EXIF orientation tag (1–8), if present.
    fn read_orientation(&self, path: &Path) -> Result<Option<u16>, BackendError>;

    /// Encode `image` into `output` as `format`. JPEG honours `quality`;
    /// PNG is lossless and ignores it.
    fn encode(
        &self,
        image: &DynamicImage,
        format: ImageFormat,
        quality: Quality,
        output: &mut dyn Write,
    ) -> Result<(), BackendError>;
}
