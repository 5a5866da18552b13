//! Cropping the rasterized desktop down to a capture rectangle.
//!
//! Takes a rasterized virtual desktop in, returns an encoded capture out.
//! No OS access happens here.

use image::{DynamicImage, RgbaImage};

use super::captured::CapturedImage;
use super::geometry::{CaptureRect, VirtualDesktopBounds};
use super::CaptureError;

/// Crops a whole-desktop bitmap to `rect` and returns it PNG-encoded.
///
/// `desktop` must be the rasterization of `bounds`: pixel (0,0) of the bitmap is
/// the device point `(bounds.x, bounds.y)`. The crop rectangle is translated
/// into bitmap-local coordinates before cropping.
pub fn crop_to_capture(
    desktop: &RgbaImage,
    bounds: VirtualDesktopBounds,
    rect: CaptureRect,
) -> Result<CapturedImage, CaptureError> {
    if rect.is_empty() {
        return Err(CaptureError::InvalidRegion);
    }

    let local = rect.relative_to(bounds.origin());
    let (img_width, img_height) = desktop.dimensions();

    if local.x < 0
        || local.y < 0
        || local.right() as i64 > img_width as i64
        || local.bottom() as i64 > img_height as i64
    {
        return Err(CaptureError::OutOfBounds {
            requested: (local.x, local.y, local.width, local.height),
            image_size: (img_width, img_height),
        });
    }

    let cropped = image::imageops::crop_imm(
        desktop,
        local.x as u32,
        local.y as u32,
        local.width as u32,
        local.height as u32,
    )
    .to_image();

    CapturedImage::encode(&DynamicImage::ImageRgba8(cropped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::geometry::DeviceRect;
    use image::Rgba;

    #[test]
    fn crop_valid_region() {
        let img = RgbaImage::new(100, 100);
        let bounds = DeviceRect::new(0, 0, 100, 100);
        let captured = crop_to_capture(&img, bounds, DeviceRect::new(10, 10, 50, 40)).unwrap();
        assert_eq!((captured.width(), captured.height()), (50, 40));
        // PNG magic bytes
        assert_eq!(&captured.png_bytes()[..4], &[0x89, 0x50, 0x4E, 0x47]);
    }

    #[test]
    fn crop_translates_negative_origin() {
        // Desktop starts at device (-100, -50); paint the device pixel (-90, -40) red.
        let mut img = RgbaImage::new(200, 100);
        img.put_pixel(10, 10, Rgba([255, 0, 0, 255]));
        let bounds = DeviceRect::new(-100, -50, 200, 100);

        let captured = crop_to_capture(&img, bounds, DeviceRect::new(-90, -40, 5, 5)).unwrap();
        let decoded = image::load_from_memory(captured.png_bytes()).unwrap().to_rgba8();
        assert_eq!(decoded.get_pixel(0, 0), &Rgba([255, 0, 0, 255]));
        assert_eq!(decoded.dimensions(), (5, 5));
    }

    #[test]
    fn crop_zero_dimension_fails() {
        let img = RgbaImage::new(100, 100);
        let bounds = DeviceRect::new(0, 0, 100, 100);
        let result = crop_to_capture(&img, bounds, DeviceRect::new(0, 0, 0, 50));
        assert!(matches!(result, Err(CaptureError::InvalidRegion)));
    }

    #[test]
    fn crop_out_of_bounds_fails() {
        let img = RgbaImage::new(100, 100);
        let bounds = DeviceRect::new(0, 0, 100, 100);
        let result = crop_to_capture(&img, bounds, DeviceRect::new(80, 80, 30, 30));
        assert!(matches!(result, Err(CaptureError::OutOfBounds { .. })));
    }
}
