//! Pure calculation functions for the re-encode transforms.
//!
//! All functions here are pure and testable without any I/O or images.

/// How much one channel of the perturbed pixel moves.
///
/// A difference of 1 is not always enough: JPEG's block compression can even
/// the pixel out with its neighbours so the output ends up identical.
pub const PIXEL_DIFF: u8 = 5;

/// Clockwise rotation applied while transforming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    pub fn degrees(self) -> u32 {
        match self {
            Rotation::None => 0,
            Rotation::Cw90 => 90,
            Rotation::Cw180 => 180,
            Rotation::Cw270 => 270,
        }
    }

    /// Quarter turns swap width and height.
    pub fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Cw90 | Rotation::Cw270)
    }
}

/// Map an EXIF `Orientation` tag value to the rotation that displays the
/// image upright.
///
/// Only the three pure rotations are honoured:
/// - `6` (rotate 90 CW) → 90°
/// - `3` (rotate 180) → 180°
/// - `8` (rotate 270 CW) → 270°
///
/// Mirrored orientations (2, 4, 5, 7), `1`, and unknown values rotate by 0.
pub fn rotation_for_orientation(orientation: u16) -> Rotation {
    match orientation {
        8 => Rotation::Cw270,
        3 => Rotation::Cw180,
        6 => Rotation::Cw90,
        _ => Rotation::None,
    }
}

/// Scale both dimensions uniformly, rounding to the nearest pixel.
///
/// Never returns a zero dimension: a 100% reduction still yields a 1×1 image.
pub fn scaled_dimensions(source: (u32, u32), scale: f32) -> (u32, u32) {
    let (w, h) = source;
    let scale = scale.max(0.0) as f64;
    let sw = ((w as f64 * scale).round() as u32).max(1);
    let sh = ((h as f64 * scale).round() as u32).max(1);
    (sw, sh)
}

/// Final output dimensions after scaling and rotating.
pub fn transformed_dimensions(source: (u32, u32), scale: f32, rotation: Rotation) -> (u32, u32) {
    let (w, h) = scaled_dimensions(source, scale);
    if rotation.swaps_axes() { (h, w) } else { (w, h) }
}

/// Nudge a single channel value by [`PIXEL_DIFF`].
///
/// Subtracts when that stays non-negative, adds otherwise, so the result
/// always differs from the input.
pub fn perturb_channel(value: u8) -> u8 {
    if value >= PIXEL_DIFF {
        value - PIXEL_DIFF
    } else {
        value + PIXEL_DIFF
    }
}

/// How hard a perturbation pushes each colour channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nudge {
    /// Move by [`PIXEL_DIFF`] on the 8-bit scale.
    Slight,
    /// Jump to the far end of the channel's range.
    Flip,
}

/// A subpixel type that can be nudged without changing its precision.
pub trait Channel: Copy {
    fn nudged(self, nudge: Nudge) -> Self;
}

impl Channel for u8 {
    fn nudged(self, nudge: Nudge) -> Self {
        match nudge {
            Nudge::Slight => perturb_channel(self),
            Nudge::Flip if self < 0x80 => u8::MAX,
            Nudge::Flip => 0,
        }
    }
}

impl Channel for u16 {
    fn nudged(self, nudge: Nudge) -> Self {
        // 257 maps the 8-bit step onto the 16-bit range exactly
        let step = u16::from(PIXEL_DIFF) * 257;
        match nudge {
            Nudge::Slight if self >= step => self - step,
            Nudge::Slight => self + step,
            Nudge::Flip if self < 0x8000 => u16::MAX,
            Nudge::Flip => 0,
        }
    }
}

impl Channel for f32 {
    fn nudged(self, nudge: Nudge) -> Self {
        let step = f32::from(PIXEL_DIFF) / 255.0;
        match nudge {
            Nudge::Slight if self >= step => self - step,
            Nudge::Slight => self + step,
            Nudge::Flip if self < 0.5 => 1.0,
            Nudge::Flip => 0.0,
        }
    }
}

/// Smallest dimensions, keeping the aspect ratio of `source`, that still
/// cover `bounds` on both axes.
///
/// Returns `None` when the source is already within bounds on at least one
/// axis, i.e. no downsampling is needed for display.
pub fn fit_within(source: (u32, u32), bounds: (u32, u32)) -> Option<(u32, u32)> {
    let (src_w, src_h) = source;
    let (max_w, max_h) = bounds;

    if max_w == 0 || max_h == 0 || src_w <= max_w || src_h <= max_h {
        return None;
    }

    let ratio = (max_w as f64 / src_w as f64).max(max_h as f64 / src_h as f64);
    let w = ((src_w as f64 * ratio).round() as u32).max(1);
    let h = ((src_h as f64 * ratio).round() as u32).max(1);
    Some((w, h))
}
