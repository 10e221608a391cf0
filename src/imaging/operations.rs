//! High-level pixel operations for the re-encoder.
//!
//! These functions combine the pure [`calculations`](super::calculations) with
//! actual pixel buffers. Planning is split from execution so the decisions
//! (target format, scale, rotation) are testable without decoding anything.

use super::calculations::{
    Channel, Nudge, Rotation, rotation_for_orientation, transformed_dimensions,
};
use super::params::{Quality, ReencodeSettings, ReencodeType};
use super::random::RandomSource;
use crate::sniff::ImageFormat;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageBuffer, Pixel};

/// Everything the re-encoder decided to do to one image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformPlan {
    pub target: ImageFormat,
    pub quality: Quality,
    /// Uniform scale factor; `1.0` means no resampling.
    pub scale: f32,
    pub rotation: Rotation,
    pub change_checksum: bool,
}

impl TransformPlan {
    /// Whether the geometry changes at all (scale or rotation).
    pub fn is_geometric(&self) -> bool {
        self.scale != 1.0 || self.rotation != Rotation::None
    }

    pub fn output_dimensions(&self, source: (u32, u32)) -> (u32, u32) {
        transformed_dimensions(source, self.scale, self.rotation)
    }
}

/// Pick the encode format: forced by the settings, else the sniffed source format.
pub fn target_format(reencode_type: ReencodeType, sniffed: ImageFormat) -> ImageFormat {
    match reencode_type {
        ReencodeType::AsJpeg => ImageFormat::Jpeg,
        ReencodeType::AsPng => ImageFormat::Png,
        ReencodeType::AsIs => sniffed,
    }
}

/// Plan a re-encode without executing it.
///
/// `orientation` is only consulted when the target is JPEG and `fix_exif` is
/// set; EXIF rotation is a JPEG concern.
pub fn plan_transform(
    settings: &ReencodeSettings,
    sniffed: ImageFormat,
    fix_exif: bool,
    change_checksum: bool,
    orientation: Option<u16>,
) -> TransformPlan {
    let target = target_format(settings.reencode_type, sniffed);

    let rotation = if target == ImageFormat::Jpeg && fix_exif {
        orientation.map(rotation_for_orientation).unwrap_or_default()
    } else {
        Rotation::None
    };

    TransformPlan {
        target,
        quality: settings.quality,
        scale: settings.reduce_percent.scale(),
        rotation,
        change_checksum,
    }
}

/// Perturbation steps tried in order until the encoded bytes change: one
/// pixel nudged slightly, one pixel flipped, then flipped squares of growing
/// side, and finally the whole image.
///
/// Each entry is `(side, nudge)`; a side larger than the image covers all of it.
pub const CHECKSUM_ESCALATION: [(u32, Nudge); 5] = [
    (1, Nudge::Slight),
    (1, Nudge::Flip),
    (8, Nudge::Flip),
    (32, Nudge::Flip),
    (u32::MAX, Nudge::Flip),
];

/// Nudge one randomly chosen pixel so the encoded bytes change.
///
/// Colour channels move by [`PIXEL_DIFF`](super::calculations::PIXEL_DIFF)
/// on the 8-bit scale; alpha is left alone. Returns the perturbed
/// coordinate, or `None` for an empty image.
pub fn perturb_random_pixel(
    img: &mut DynamicImage,
    rng: &mut dyn RandomSource,
) -> Option<(u32, u32)> {
    perturb_random_region(img, rng, 1, Nudge::Slight)
}

/// Nudge every pixel of a `side` x `side` square centred on a random pixel.
///
/// The buffer keeps its pixel type: 16-bit and float images are nudged in
/// their own precision. Returns the centre, or `None` for an empty image.
pub fn perturb_random_region(
    img: &mut DynamicImage,
    rng: &mut dyn RandomSource,
    side: u32,
    nudge: Nudge,
) -> Option<(u32, u32)> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return None;
    }

    let x = rng.next_below(width);
    let y = rng.next_below(height);
    let region = Region::around((x, y), side.max(1), (width, height));

    match img {
        DynamicImage::ImageLuma8(buf) => nudge_region(buf, region, 1, nudge),
        DynamicImage::ImageLumaA8(buf) => nudge_region(buf, region, 1, nudge),
        DynamicImage::ImageRgb8(buf) => nudge_region(buf, region, 3, nudge),
        DynamicImage::ImageRgba8(buf) => nudge_region(buf, region, 3, nudge),
        DynamicImage::ImageLuma16(buf) => nudge_region(buf, region, 1, nudge),
        DynamicImage::ImageLumaA16(buf) => nudge_region(buf, region, 1, nudge),
        DynamicImage::ImageRgb16(buf) => nudge_region(buf, region, 3, nudge),
        DynamicImage::ImageRgba16(buf) => nudge_region(buf, region, 3, nudge),
        DynamicImage::ImageRgb32F(buf) => nudge_region(buf, region, 3, nudge),
        DynamicImage::ImageRgba32F(buf) => nudge_region(buf, region, 3, nudge),
        other => {
            let mut buf = other.to_rgba32f();
            nudge_region(&mut buf, region, 3, nudge);
            *other = DynamicImage::ImageRgba32F(buf);
        }
    }

    Some((x, y))
}

/// Half-open pixel rectangle, clamped to the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Region {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

impl Region {
    fn around(centre: (u32, u32), side: u32, bounds: (u32, u32)) -> Self {
        let (x, y) = centre;
        let (width, height) = bounds;
        let x0 = x.saturating_sub(side / 2);
        let y0 = y.saturating_sub(side / 2);
        Self {
            x0,
            y0,
            x1: x0.saturating_add(side).min(width),
            y1: y0.saturating_add(side).min(height),
        }
    }
}

fn nudge_region<P>(
    buf: &mut ImageBuffer<P, Vec<P::Subpixel>>,
    region: Region,
    color_channels: usize,
    nudge: Nudge,
) where
    P: Pixel,
    P::Subpixel: Channel,
{
    for y in region.y0..region.y1 {
        for x in region.x0..region.x1 {
            let pixel = buf.get_pixel_mut(x, y);
            for channel in pixel.channels_mut().iter_mut().take(color_channels) {
                *channel = channel.nudged(nudge);
            }
        }
    }
}

/// Apply scale and rotation in one pass, producing a new buffer.
///
/// Scaling resamples once with Lanczos3; quarter-turn rotations move pixels
/// without resampling, so the combined transform filters exactly once.
pub fn apply_transform(img: &DynamicImage, plan: &TransformPlan) -> DynamicImage {
    let scaled = if plan.scale != 1.0 {
        let (w, h) = transformed_dimensions(img.dimensions(), plan.scale, Rotation::None);
        img.resize_exact(w, h, FilterType::Lanczos3)
    } else {
        img.clone()
    };

    match plan.rotation {
        Rotation::None => scaled,
        Rotation::Cw90 => scaled.rotate90(),
        Rotation::Cw180 => scaled.rotate180(),
        Rotation::Cw270 => scaled.rotate270(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::random::XorShift;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    fn settings(quality: u32, reduce: u32, ty: ReencodeType) -> ReencodeSettings {
        ReencodeSettings::new(quality, reduce, ty)
    }

    // =========================================================================
    // target_format / plan_transform
    // =========================================================================

    #[test]
    fn target_format_forced_by_settings() {
        assert_eq!(
            target_format(ReencodeType::AsJpeg, ImageFormat::Png),
            ImageFormat::Jpeg
        );
        assert_eq!(
            target_format(ReencodeType::AsPng, ImageFormat::Jpeg),
            ImageFormat::Png
        );
        assert_eq!(
            target_format(ReencodeType::AsIs, ImageFormat::Png),
            ImageFormat::Png
        );
    }

    #[test]
    fn plan_scales_by_reduce_percent() {
        let plan = plan_transform(
            &settings(50, 50, ReencodeType::AsIs),
            ImageFormat::Jpeg,
            false,
            false,
            None,
        );
        assert_eq!(plan.scale, 0.5);
        assert_eq!(plan.quality.value(), 50);
        assert_eq!(plan.rotation, Rotation::None);
        assert_eq!(plan.output_dimensions((100, 100)), (50, 50));
    }

    #[test]
    fn plan_rotates_jpeg_with_fix_exif() {
        let plan = plan_transform(
            &ReencodeSettings::default(),
            ImageFormat::Jpeg,
            true,
            false,
            Some(6),
        );
        assert_eq!(plan.rotation, Rotation::Cw90);
        assert!(plan.is_geometric());
    }

    #[test]
    fn plan_ignores_orientation_without_fix_exif() {
        let plan = plan_transform(
            &ReencodeSettings::default(),
            ImageFormat::Jpeg,
            false,
            false,
            Some(6),
        );
        assert_eq!(plan.rotation, Rotation::None);
        assert!(!plan.is_geometric());
    }

    #[test]
    fn plan_ignores_orientation_for_png_target() {
        let plan = plan_transform(
            &settings(100, 0, ReencodeType::AsPng),
            ImageFormat::Jpeg,
            true,
            false,
            Some(3),
        );
        assert_eq!(plan.target, ImageFormat::Png);
        assert_eq!(plan.rotation, Rotation::None);
    }

    // =========================================================================
    // perturb_random_pixel
    // =========================================================================

    #[test]
    fn perturb_changes_exactly_one_pixel() {
        let original = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 6, Rgb([100, 2, 255])));
        let mut img = original.clone();
        let (x, y) = perturb_random_pixel(&mut img, &mut XorShift::new(7)).unwrap();

        let mut changed = 0;
        for (px, py, pixel) in img.pixels() {
            if pixel != original.get_pixel(px, py) {
                changed += 1;
                assert_eq!((px, py), (x, y));
                assert_eq!(pixel.0, [95, 7, 250, 255]);
            }
        }
        assert_eq!(changed, 1);
    }

    #[test]
    fn perturb_leaves_alpha_alone() {
        let mut img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(1, 1, Rgba([10, 10, 10, 128])));
        perturb_random_pixel(&mut img, &mut XorShift::new(1)).unwrap();
        assert_eq!(img.get_pixel(0, 0).0, [5, 5, 5, 128]);
    }

    #[test]
    fn perturb_same_seed_same_pixel() {
        let mut a = DynamicImage::new_rgb8(50, 50);
        let mut b = DynamicImage::new_rgb8(50, 50);
        let pa = perturb_random_pixel(&mut a, &mut XorShift::new(99));
        let pb = perturb_random_pixel(&mut b, &mut XorShift::new(99));
        assert_eq!(pa, pb);
    }

    #[test]
    fn perturb_keeps_sixteen_bit_buffers() {
        let mut img = DynamicImage::new_rgb16(3, 3);
        let (x, y) = perturb_random_pixel(&mut img, &mut XorShift::new(3)).unwrap();

        let DynamicImage::ImageRgb16(buf) = &img else {
            panic!("expected a 16-bit buffer, got {:?}", img.color());
        };
        assert_eq!(buf.get_pixel(x, y).0, [1285, 1285, 1285]);
        let changed = buf.pixels().filter(|p| p.0 != [0, 0, 0]).count();
        assert_eq!(changed, 1);
    }

    #[test]
    fn perturb_keeps_float_buffers() {
        let mut img = DynamicImage::ImageRgba32F(image::Rgba32FImage::from_pixel(
            2,
            2,
            Rgba([0.5, 0.5, 0.5, 0.25]),
        ));
        let (x, y) = perturb_random_pixel(&mut img, &mut XorShift::new(5)).unwrap();

        let DynamicImage::ImageRgba32F(buf) = &img else {
            panic!("expected a float buffer, got {:?}", img.color());
        };
        let pixel = buf.get_pixel(x, y).0;
        assert!(pixel[0] < 0.5);
        assert_eq!(pixel[3], 0.25);
    }

    #[test]
    fn region_flip_covers_a_clamped_square() {
        let original = DynamicImage::ImageRgb8(RgbImage::from_pixel(20, 20, Rgb([10, 200, 10])));
        let mut img = original.clone();
        let (x, y) = perturb_random_region(&mut img, &mut XorShift::new(11), 8, Nudge::Flip).unwrap();

        let region = Region::around((x, y), 8, (20, 20));
        let mut changed = 0;
        for (px, py, pixel) in img.pixels() {
            let inside = (region.x0..region.x1).contains(&px) && (region.y0..region.y1).contains(&py);
            if inside {
                assert_eq!(pixel.0, [255, 0, 255, 255]);
                changed += 1;
            } else {
                assert_eq!(pixel, original.get_pixel(px, py));
            }
        }
        assert!(changed > 0 && changed <= 64, "{changed}");
    }

    #[test]
    fn region_larger_than_image_covers_everything() {
        let mut img = DynamicImage::ImageLuma8(image::GrayImage::from_pixel(5, 3, image::Luma([0])));
        perturb_random_region(&mut img, &mut XorShift::new(2), u32::MAX, Nudge::Flip).unwrap();
        assert!(img.to_luma8().pixels().all(|p| p.0 == [255]));
    }

    #[test]
    fn region_around_clamps_at_edges() {
        assert_eq!(
            Region::around((0, 0), 8, (20, 20)),
            Region { x0: 0, y0: 0, x1: 8, y1: 8 }
        );
        assert_eq!(
            Region::around((19, 19), 8, (20, 20)),
            Region { x0: 15, y0: 15, x1: 20, y1: 20 }
        );
        assert_eq!(
            Region::around((3, 4), 1, (20, 20)),
            Region { x0: 3, y0: 4, x1: 4, y1: 5 }
        );
    }

    #[test]
    fn perturb_empty_image_is_noop() {
        let mut img = DynamicImage::new_rgb8(0, 0);
        assert_eq!(perturb_random_pixel(&mut img, &mut XorShift::new(3)), None);
    }

    // =========================================================================
    // apply_transform
    // =========================================================================

    #[test]
    fn transform_scales_and_rotates() {
        let img = DynamicImage::new_rgb8(200, 100);
        let plan = TransformPlan {
            target: ImageFormat::Png,
            quality: Quality::default(),
            scale: 0.5,
            rotation: Rotation::Cw90,
            change_checksum: false,
        };
        let out = apply_transform(&img, &plan);
        assert_eq!(out.dimensions(), (50, 100));
    }

    #[test]
    fn transform_rotation_moves_pixels_clockwise() {
        // Marker in the top-left corner ends up top-right after 90° clockwise
        let mut buf = RgbImage::new(4, 2);
        buf.put_pixel(0, 0, Rgb([255, 0, 0]));
        let img = DynamicImage::ImageRgb8(buf);
        let plan = TransformPlan {
            target: ImageFormat::Png,
            quality: Quality::default(),
            scale: 1.0,
            rotation: Rotation::Cw90,
            change_checksum: false,
        };
        let out = apply_transform(&img, &plan);
        assert_eq!(out.dimensions(), (2, 4));
        assert_eq!(out.get_pixel(1, 0).0, [255, 0, 0, 255]);
    }

    #[test]
    fn transform_identity_keeps_pixels() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(3, 3, Rgb([1, 2, 3])));
        let plan = TransformPlan {
            target: ImageFormat::Png,
            quality: Quality::default(),
            scale: 1.0,
            rotation: Rotation::None,
            change_checksum: true,
        };
        assert_eq!(apply_transform(&img, &plan), img);
    }
}
