//! Image preprocessing: enhancement, size clamping and rotation correction.
//!
//! Every transform here is a pure `image → image` function. They compose in
//! the order the page orchestrator calls them:
//!
//! ```text
//! rendered ──▶ clamp_size ──▶ enhance ──▶ (pre-check) ──▶ correct_rotation
//! ```
//!
//! Rotation correction runs after the pre-check because only the pre-check
//! knows the page is sideways. It borrows the input when there is nothing to
//! do, so an upright page reaches the extractor byte for byte as classified.

use crate::config::ImageLimits;
use crate::model::Rotation;
use image::imageops::FilterType;
use image::DynamicImage;
use std::borrow::Cow;
use tracing::debug;

/// Contrast boost applied by [`enhance`]. Scanned tables are often grey-on-grey.
const CONTRAST: f32 = 20.0;
/// Unsharp-mask radius and threshold.
const SHARPEN_SIGMA: f32 = 1.0;
const SHARPEN_THRESHOLD: i32 = 4;

/// Contrast and sharpen, keeping the colour model of the input.
///
/// Legends and highlighted cells are often told apart by colour alone, and
/// the pre-check reports them, so the page is never reduced to grayscale.
pub fn enhance(img: &DynamicImage) -> DynamicImage {
    img.adjust_contrast(CONTRAST)
        .unsharpen(SHARPEN_SIGMA, SHARPEN_THRESHOLD)
}

/// Scale factor that brings `(width, height)` within `limits`.
///
/// The short side is raised to `min_dimension`, then the long side is capped
/// at `max_dimension`; the cap wins when both cannot hold.
pub fn clamp_scale(width: u32, height: u32, limits: &ImageLimits) -> f64 {
    let short = width.min(height).max(1) as f64;
    let long = width.max(height).max(1) as f64;

    let mut scale = 1.0;
    if short < limits.min_dimension as f64 {
        scale = limits.min_dimension as f64 / short;
    }
    if long * scale > limits.max_dimension as f64 {
        scale = limits.max_dimension as f64 / long;
    }
    scale
}

/// Resize so the image respects `limits`. Borrows when already in bounds.
pub fn clamp_size<'a>(img: &'a DynamicImage, limits: &ImageLimits) -> Cow<'a, DynamicImage> {
    let scale = clamp_scale(img.width(), img.height(), limits);
    if (scale - 1.0).abs() < 1e-6 {
        return Cow::Borrowed(img);
    }
    let w = ((img.width() as f64 * scale).round() as u32).max(1);
    let h = ((img.height() as f64 * scale).round() as u32).max(1);
    debug!(
        "Resizing {}x{} → {}x{} (scale {:.2})",
        img.width(),
        img.height(),
        w,
        h,
        scale
    );
    Cow::Owned(img.resize_exact(w, h, FilterType::Lanczos3))
}

/// Clamp, then optionally enhance.
pub fn prepare(img: &DynamicImage, limits: &ImageLimits, enhance_image: bool) -> DynamicImage {
    let clamped = clamp_size(img, limits);
    if enhance_image {
        enhance(&clamped)
    } else {
        clamped.into_owned()
    }
}

/// Rotate clockwise by `rotation`. Borrows the input for [`Rotation::None`].
///
/// Idempotent in the sense that matters: correcting an image the pre-check
/// reports as upright is a no-op.
pub fn correct_rotation(img: &DynamicImage, rotation: Rotation) -> Cow<'_, DynamicImage> {
    match rotation {
        Rotation::None => Cow::Borrowed(img),
        Rotation::Cw90 => Cow::Owned(img.rotate90()),
        Rotation::Cw180 => Cow::Owned(img.rotate180()),
        Rotation::Cw270 => Cow::Owned(img.rotate270()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn marked(w: u32, h: u32) -> DynamicImage {
        let mut img = RgbaImage::from_pixel(w, h, Rgba([255, 255, 255, 255]));
        img.put_pixel(0, 0, Rgba([0, 0, 0, 255]));
        DynamicImage::ImageRgba8(img)
    }

    #[test]
    fn zero_rotation_is_byte_identical() {
        let img = marked(40, 20);
        let out = correct_rotation(&img, Rotation::None);
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(out.as_bytes(), img.as_bytes());
    }

    #[test]
    fn quarter_turn_swaps_dimensions() {
        let img = marked(40, 20);
        let out = correct_rotation(&img, Rotation::Cw90);
        assert_eq!((out.width(), out.height()), (20, 40));
        // Top-left pixel moves to the top-right corner.
        assert_eq!(out.to_rgba8().get_pixel(19, 0), &Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn half_turn_twice_restores_image() {
        let img = marked(30, 10);
        let once = correct_rotation(&img, Rotation::Cw180).into_owned();
        let twice = correct_rotation(&once, Rotation::Cw180).into_owned();
        assert_eq!(twice.as_bytes(), img.as_bytes());
    }

    #[test]
    fn small_images_are_upscaled() {
        let limits = ImageLimits {
            min_dimension: 800,
            max_dimension: 3000,
            max_bytes: 1 << 20,
        };
        let scale = clamp_scale(400, 600, &limits);
        assert!((scale - 2.0).abs() < 1e-9);
    }

    #[test]
    fn long_side_cap_wins() {
        let limits = ImageLimits {
            min_dimension: 800,
            max_dimension: 3000,
            max_bytes: 1 << 20,
        };
        // 100x6000 would need ×8 for the short side but the long side caps at 3000.
        let scale = clamp_scale(100, 6000, &limits);
        assert!((scale - 0.5).abs() < 1e-9);
    }

    #[test]
    fn in_bounds_image_is_borrowed() {
        let limits = ImageLimits {
            min_dimension: 10,
            max_dimension: 100,
            max_bytes: 1 << 20,
        };
        let img = marked(50, 20);
        assert!(matches!(clamp_size(&img, &limits), Cow::Borrowed(_)));
    }

    #[test]
    fn prepare_keeps_colour() {
        let limits = ImageLimits {
            min_dimension: 10,
            max_dimension: 100,
            max_bytes: 1 << 20,
        };
        let red = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(50, 20, image::Rgb([200, 40, 40])));
        let out = prepare(&red, &limits, true);
        assert_eq!(out.color(), image::ColorType::Rgb8);
        assert_eq!((out.width(), out.height()), (50, 20));
        let px = out.to_rgb8().get_pixel(25, 10).0;
        assert!(px[0] > 200, "{px:?}");
        assert!(px[1] < 40 && px[2] < 40, "{px:?}");
    }
}
