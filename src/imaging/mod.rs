//! Image processing: orchestration over a pluggable codec backend.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `ImageReader::into_dimensions` (header only) |
//! | **Decode / encode** | `image` crate JPEG + PNG codecs |
//! | **EXIF orientation** | `ImageDecoder::orientation` |
//! | **Scale + rotate** | `resize_exact` (Lanczos3) + lossless quarter turns |
//! | **Checksum perturbation** | escalating nudges from an injected [`RandomSource`], checked against the unperturbed encode |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension and orientation math (unit testable)
//! - **Parameters**: Settings types, clamped on construction
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Operations**: Planning and pixel transforms combining the above

pub mod backend;
mod calculations;
pub mod operations;
mod params;
pub mod random;
pub mod rust_backend;

use std::path::Path;

pub use backend::{BackendError, Dimensions, ImageBackend};
pub use calculations::{Nudge, PIXEL_DIFF, Rotation, rotation_for_orientation};
pub use operations::{CHECKSUM_ESCALATION, TransformPlan, plan_transform};
pub use params::{Quality, ReducePercent, ReencodeSettings, ReencodeType, SizeHint};
pub use random::{RandomSource, XorShift};
pub use rust_backend::RustBackend;

/// Get image dimensions using the backend.
pub fn image_dimensions(backend: &dyn ImageBackend, path: &Path) -> Result<(u32, u32), BackendError> {
    let dims = backend.identify(path)?;
    Ok((dims.width, dims.height))
}
