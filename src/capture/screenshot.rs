//! Whole-desktop capture using the `xcap` crate.
//!
//! Only `DesktopSource` is visible above this file; the geometry and cropping
//! code never touch `xcap` directly.

use image::RgbaImage;
use xcap::Monitor;

use super::geometry::{DeviceRect, UiRect, VirtualDesktopBounds};
use super::layout::{MonitorInfo, MonitorLayout};
use super::CaptureError;

/// Windowing-layer collaborator for capture.
pub trait DesktopSource {
    /// Current monitor configuration. Queried fresh on every call.
    fn layout(&self) -> Result<MonitorLayout, CaptureError>;

    /// Rasterize the whole virtual desktop. Pixel (0,0) of the result is the
    /// device point `(bounds.x, bounds.y)` and the bitmap is `bounds` sized.
    fn rasterize(&self, bounds: VirtualDesktopBounds) -> Result<RgbaImage, CaptureError>;
}

/// `xcap` backed desktop: captures each monitor and composites them into one
/// virtual-desktop bitmap.
#[derive(Debug, Clone, Copy, Default)]
pub struct XcapDesktop;

impl XcapDesktop {
    /// Place every monitor in logical and device space. Rasterization uses the
    /// same placement, so the bitmap always matches `layout()`.
    fn layout_of(monitors: &[Monitor]) -> Result<MonitorLayout, CaptureError> {
        let mut reported = Vec::with_capacity(monitors.len());
        for monitor in monitors {
            let name = monitor.name().unwrap_or_else(|_| "unknown".to_string());
            let x = monitor.x().map_err(enumeration_error)?;
            let y = monitor.y().map_err(enumeration_error)?;
            let width = monitor.width().map_err(enumeration_error)? as i32;
            let height = monitor.height().map_err(enumeration_error)? as i32;
            let scale = monitor.scale_factor().unwrap_or(1.0) as f64;
            let is_primary = monitor.is_primary().unwrap_or(false);
            reported.push((name, DeviceRect::new(x, y, width, height), scale, is_primary));
        }

        // macOS reports geometry in points; everywhere else it is already pixels.
        if cfg!(target_os = "macos") {
            Ok(MonitorLayout::from_points(
                reported
                    .into_iter()
                    .map(|(name, r, scale, primary)| {
                        let points = UiRect::new(r.x as f64, r.y as f64, r.width as f64, r.height as f64);
                        (name, points, scale, primary)
                    })
                    .collect(),
            ))
        } else {
            Ok(MonitorLayout::new(
                reported
                    .iter()
                    .map(|(name, device, scale, primary)| {
                        MonitorInfo::from_device(name, *device, *scale, *primary)
                    })
                    .collect(),
            ))
        }
    }
}

impl DesktopSource for XcapDesktop {
    fn layout(&self) -> Result<MonitorLayout, CaptureError> {
        let monitors = Monitor::all().map_err(enumeration_error)?;
        let layout = Self::layout_of(&monitors)?;

        log::debug!("[CAPTURE] {} monitor(s) detected", layout.monitors().len());
        Ok(layout)
    }

    fn rasterize(&self, bounds: VirtualDesktopBounds) -> Result<RgbaImage, CaptureError> {
        if bounds.is_empty() {
            return Err(CaptureError::CaptureUnavailable(
                "virtual desktop has no area".to_string(),
            ));
        }

        let monitors = Monitor::all().map_err(enumeration_error)?;
        let layout = Self::layout_of(&monitors)?;
        let mut canvas = RgbaImage::new(bounds.width as u32, bounds.height as u32);
        let mut captured = 0usize;

        for (monitor, info) in monitors.iter().zip(layout.monitors()) {
            match monitor.capture_image() {
                Ok(shot) => {
                    let local = info.device.relative_to(bounds.origin());
                    image::imageops::replace(&mut canvas, &shot, local.x as i64, local.y as i64);
                    captured += 1;
                }
                Err(e) => log::warn!("[CAPTURE] Monitor '{}' capture failed: {}", info.name, e),
            }
        }

        if captured == 0 {
            return Err(CaptureError::CaptureUnavailable(
                "no monitor could be captured".to_string(),
            ));
        }
        Ok(canvas)
    }
}

fn enumeration_error(e: xcap::XCapError) -> CaptureError {
    CaptureError::MonitorEnumeration(e.to_string())
}
