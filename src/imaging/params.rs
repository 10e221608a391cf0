//! Parameter types for re-encoding.
//!
//! These types describe *what* the re-encoder should produce, not *how*. They
//! are the interface between the caller (CLI flags, `config.toml`, a "re-save"
//! dialog) and the [`reencode`](crate::reencode) pipeline, which turns them
//! into pixel work on a [`backend`](super::backend).
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality (1–100, default 100). Clamped on construction.
//! - [`ReducePercent`]: How much to shrink each dimension (0–100, default 0). Clamped.
//! - [`ReencodeType`]: Keep the source format, or force JPEG / PNG.
//! - [`ReencodeSettings`]: The three above, bundled. The default is the no-op.
//! - [`SizeHint`]: Caller-tolerant decode size for display loads.

use serde::{Deserialize, Serialize};

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub struct Quality(u32);

impl Quality {
    pub const MIN: u32 = 1;
    pub const MAX: u32 = 100;

    pub fn new(value: u32) -> Self {
        Self(value.clamp(Self::MIN, Self::MAX))
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// JPEG encoders take quality as a byte; the clamp keeps this lossless.
    pub fn as_u8(self) -> u8 {
        self.0 as u8
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(Self::MAX)
    }
}

impl From<u32> for Quality {
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

impl From<Quality> for u32 {
    fn from(q: Quality) -> Self {
        q.0
    }
}

/// Percentage to shave off each dimension (0-100).
///
/// `0` keeps the original size, `50` halves both width and height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub struct ReducePercent(u32);

impl ReducePercent {
    pub const MIN: u32 = 0;
    pub const MAX: u32 = 100;

    pub fn new(value: u32) -> Self {
        Self(value.clamp(Self::MIN, Self::MAX))
    }

    pub fn value(self) -> u32 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == Self::MIN
    }

    /// Uniform scale factor applied to both dimensions: `(100 - reduce) / 100`.
    pub fn scale(self) -> f32 {
        (100.0 - self.0 as f32) / 100.0
    }
}

impl From<u32> for ReducePercent {
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

impl From<ReducePercent> for u32 {
    fn from(r: ReducePercent) -> Self {
        r.0
    }
}

/// Target container for the re-encoded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ReencodeType {
    /// Keep whatever format the input was sniffed as.
    #[default]
    AsIs,
    AsJpeg,
    AsPng,
}

/// User-chosen re-encode settings.
///
/// Constructed through [`ReencodeSettings::new`] (or deserialized), so quality
/// and reduce are always within range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReencodeSettings {
    pub quality: Quality,
    pub reduce_percent: ReducePercent,
    pub reencode_type: ReencodeType,
}

impl ReencodeSettings {
    pub fn new(quality: u32, reduce_percent: u32, reencode_type: ReencodeType) -> Self {
        Self {
            quality: Quality::new(quality),
            reduce_percent: ReducePercent::new(reduce_percent),
            reencode_type,
        }
    }

    /// True for `{quality = 100, reduce = 0, type = as-is}`.
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

/// Requested decode size for display. Zero in either axis means "no hint".
///
/// The decoder may downsample while staying at least as large as the hint
/// on both axes; callers must tolerate getting back a different size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SizeHint {
    pub width: u32,
    pub height: u32,
}

impl SizeHint {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_set(self) -> bool {
        self.width > 0 && self.height > 0
    }
}
