//! Photo and signature preparation before embedding in the report.

use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

use crate::error::{ReportError, Result};
use crate::model::{Photo, Signature};

/// Photos are shrunk to fit a square of this side, keeping aspect ratio.
pub const PHOTO_MAX_SIDE: u32 = 400;

/// Signature is scaled to this fraction of its captured size.
pub const SIGNATURE_SCALE: f64 = 0.9;
/// Contrast factor; 1.0 leaves the image unchanged.
pub const SIGNATURE_CONTRAST: f32 = 1.5;
/// Sharpness factor; 1.0 leaves the image unchanged.
pub const SIGNATURE_SHARPNESS: f32 = 1.3;

/// A PNG ready to embed, with its pixel size.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// 3x3 smoothing kernel the sharpness boost blends away from.
const SMOOTH_KERNEL: [f32; 9] = [
    1.0 / 13.0,
    1.0 / 13.0,
    1.0 / 13.0,
    1.0 / 13.0,
    5.0 / 13.0,
    1.0 / 13.0,
    1.0 / 13.0,
    1.0 / 13.0,
    1.0 / 13.0,
];

/// Size that fits `(width, height)` inside a `max`×`max` box. Images that
/// already fit are left alone.
pub fn fit_within(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width <= max && height <= max {
        return (width, height);
    }
    let scale = f64::from(max) / f64::from(width.max(height));
    let scaled = |side: u32| ((f64::from(side) * scale).round() as u32).clamp(1, max);
    (scaled(width), scaled(height))
}

/// Decodes an uploaded photo, shrinks it to the photo box and re-encodes it
/// as PNG.
pub fn prepare_photo(photo: &Photo, slot: &'static str) -> Result<PreparedImage> {
    let image = image::load_from_memory(&photo.bytes).map_err(|e| ReportError::Asset {
        slot,
        reason: e.to_string(),
    })?;
    let (width, height) = fit_within(image.width(), image.height(), PHOTO_MAX_SIDE);
    let image = if (width, height) == (image.width(), image.height()) {
        image
    } else {
        image.resize_exact(width, height, FilterType::CatmullRom)
    };
    encode_png(&image, slot)
}

/// Scales the captured signature, boosts contrast and sharpness and
/// re-encodes it as PNG.
pub fn prepare_signature(signature: &Signature) -> Result<PreparedImage> {
    const SLOT: &str = "firma";
    let expected = signature.width as usize * signature.height as usize * 4;
    if signature.width == 0 || signature.height == 0 || signature.rgba.len() != expected {
        return Err(ReportError::Asset {
            slot: SLOT,
            reason: format!(
                "buffer of {} bytes does not match {}x{} RGBA",
                signature.rgba.len(),
                signature.width,
                signature.height
            ),
        });
    }
    let captured = RgbaImage::from_raw(signature.width, signature.height, signature.rgba.clone())
        .ok_or_else(|| ReportError::Asset {
            slot: SLOT,
            reason: "invalid pixel buffer".to_string(),
        })?;

    let width = ((f64::from(signature.width) * SIGNATURE_SCALE) as u32).max(1);
    let height = ((f64::from(signature.height) * SIGNATURE_SCALE) as u32).max(1);
    let scaled = imageops::resize(&captured, width, height, FilterType::Lanczos3);
    let enhanced = sharpen(&contrast(&scaled, SIGNATURE_CONTRAST), SIGNATURE_SHARPNESS);

    encode_png(&DynamicImage::ImageRgba8(enhanced), SLOT)
}

/// Pushes colour channels away from the mean grey level by `factor`.
/// Alpha is kept.
pub fn contrast(image: &RgbaImage, factor: f32) -> RgbaImage {
    let mean = mean_luma(image);
    let grey = Rgba([mean, mean, mean, 0]);
    blend_from(image, |_, _| grey, factor)
}

/// Pushes the image away from a smoothed copy of itself by `factor`.
/// Alpha is kept.
pub fn sharpen(image: &RgbaImage, factor: f32) -> RgbaImage {
    let smooth: RgbaImage = imageops::filter3x3(image, &SMOOTH_KERNEL);
    blend_from(image, |x, y| *smooth.get_pixel(x, y), factor)
}

/// `degenerate + factor * (image - degenerate)` on the colour channels.
fn blend_from<F>(image: &RgbaImage, degenerate: F, factor: f32) -> RgbaImage
where
    F: Fn(u32, u32) -> Rgba<u8>,
{
    let mut out = image.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let base = degenerate(x, y);
        for c in 0..3 {
            let d = f32::from(base.0[c]);
            let v = d + factor * (f32::from(pixel.0[c]) - d);
            pixel.0[c] = v.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

fn mean_luma(image: &RgbaImage) -> u8 {
    let count = u64::from(image.width()) * u64::from(image.height());
    if count == 0 {
        return 0;
    }
    let total: f64 = image
        .pixels()
        .map(|p| {
            let [r, g, b, _] = p.0;
            (f64::from(r) * 299.0 + f64::from(g) * 587.0 + f64::from(b) * 114.0) / 1000.0
        })
        .sum();
    (total / count as f64).round() as u8
}

fn encode_png(image: &DynamicImage, slot: &'static str) -> Result<PreparedImage> {
    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| ReportError::Asset {
            slot,
            reason: e.to_string(),
        })?;
    Ok(PreparedImage {
        png,
        width: image.width(),
        height: image.height(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::png_bytes;

    fn decoded(bytes: &[u8]) -> DynamicImage {
        image::load_from_memory(bytes).unwrap()
    }

    #[test]
    fn fit_keeps_aspect_ratio() {
        assert_eq!(fit_within(800, 600, 400), (400, 300));
        assert_eq!(fit_within(600, 1200, 400), (200, 400));
        assert_eq!(fit_within(4000, 10, 400), (400, 1));
    }

    #[test]
    fn small_images_are_not_enlarged() {
        assert_eq!(fit_within(320, 240, 400), (320, 240));
        assert_eq!(fit_within(400, 400, 400), (400, 400));
    }

    #[test]
    fn photo_is_thumbnailed_to_png() {
        let photo = Photo {
            bytes: png_bytes(1000, 500),
        };
        let prepared = prepare_photo(&photo, "foto antes").unwrap();
        assert_eq!((prepared.width, prepared.height), (400, 200));
        let out = decoded(&prepared.png);
        assert_eq!((out.width(), out.height()), (400, 200));
    }

    #[test]
    fn corrupt_photo_is_asset_fault() {
        let photo = Photo {
            bytes: b"not an image".to_vec(),
        };
        match prepare_photo(&photo, "foto después") {
            Err(ReportError::Asset { slot, .. }) => assert_eq!(slot, "foto después"),
            other => panic!("expected asset error, got {other:?}"),
        }
    }

    #[test]
    fn signature_is_scaled_to_ninety_percent() {
        let signature = Signature {
            width: 500,
            height: 148,
            rgba: vec![255; 500 * 148 * 4],
        };
        let out = decoded(&prepare_signature(&signature).unwrap().png);
        assert_eq!((out.width(), out.height()), (450, 133));
    }

    #[test]
    fn signature_buffer_must_match_dimensions() {
        let signature = Signature {
            width: 10,
            height: 10,
            rgba: vec![0; 10 * 10 * 3],
        };
        assert!(matches!(
            prepare_signature(&signature),
            Err(ReportError::Asset { slot: "firma", .. })
        ));
    }

    #[test]
    fn contrast_spreads_values_and_keeps_alpha() {
        let mut image = RgbaImage::new(2, 1);
        image.put_pixel(0, 0, Rgba([100, 100, 100, 255]));
        image.put_pixel(1, 0, Rgba([200, 200, 200, 40]));

        let out = contrast(&image, 1.5);
        // mean grey is 150
        assert_eq!(out.get_pixel(0, 0).0, [75, 75, 75, 255]);
        assert_eq!(out.get_pixel(1, 0).0, [225, 225, 225, 40]);
    }

    #[test]
    fn unit_factors_leave_image_unchanged() {
        let mut image = RgbaImage::new(3, 3);
        image.put_pixel(1, 1, Rgba([0, 0, 0, 255]));
        assert_eq!(contrast(&image, 1.0), image);
        assert_eq!(sharpen(&image, 1.0), image);
    }

    #[test]
    fn sharpen_deepens_a_dark_stroke() {
        let mut image = RgbaImage::from_pixel(3, 3, Rgba([255, 255, 255, 255]));
        image.put_pixel(1, 1, Rgba([0, 0, 0, 255]));

        let out = sharpen(&image, 1.3);
        assert_eq!(out.get_pixel(1, 1).0[0], 0);
        assert_eq!(out.get_pixel(1, 1).0[3], 255);
    }
}
