//! Desktop capture: selection geometry, monitor layout, and rasterizing.
//!
//! This module owns all screen capture functionality.
//! External code should only use the items exported here.

mod captured;
mod geometry;
mod layout;
mod region;
mod screenshot;

pub use captured::CapturedImage;
pub use geometry::{
    compute_capture_rect, CaptureRect, DevicePoint, DeviceRect, PointMapper, UiPoint, UiRect,
    VirtualDesktopBounds,
};
pub use layout::{MonitorInfo, MonitorLayout};
pub use region::crop_to_capture;
pub use screenshot::{DesktopSource, XcapDesktop};

/// Rasterize the full virtual desktop once, then crop `rect` out of it.
///
/// Asking the OS for an arbitrary sub-rectangle is unreliable on mixed-DPI
/// setups, so the crop always happens in memory. Desktop bounds are queried
/// again here; if the monitors changed since `rect` was computed it is
/// re-clamped to what exists now.
pub fn capture_to_image(
    source: &impl DesktopSource,
    rect: CaptureRect,
) -> Result<CapturedImage, CaptureError> {
    let start = std::time::Instant::now();

    let layout = source.layout()?;
    let bounds = layout.bounds().ok_or_else(|| {
        CaptureError::CaptureUnavailable("no active display".to_string())
    })?;

    let rect = if bounds.contains_rect(&rect) {
        rect
    } else {
        log::warn!(
            "[CAPTURE] Capture rect {:?} no longer inside desktop {:?}, clamping",
            rect,
            bounds
        );
        let clamped = rect.intersect(&bounds);
        if clamped.is_empty() {
            return Err(CaptureError::InvalidRegion);
        }
        clamped
    };

    let desktop = source.rasterize(bounds)?;
    let capture_ms = start.elapsed().as_millis();
    log::info!(
        "[CAPTURE] Desktop {}x{} rasterized in {}ms",
        desktop.width(),
        desktop.height(),
        capture_ms
    );

    let image = crop_to_capture(&desktop, bounds, rect)?;
    log::info!(
        "[CAPTURE] Cropped {}x{} at {},{} in {}ms total, {} bytes",
        rect.width,
        rect.height,
        rect.x,
        rect.y,
        start.elapsed().as_millis(),
        image.png_bytes().len()
    );

    Ok(image)
}

/// Capture the region a selection describes, or the whole desktop for `None`.
pub fn capture_selection(
    source: &impl DesktopSource,
    selection: Option<&UiRect>,
) -> Result<CapturedImage, CaptureError> {
    let layout = source.layout()?;
    let bounds = layout.bounds().ok_or_else(|| {
        CaptureError::CaptureUnavailable("no active display".to_string())
    })?;
    let rect = compute_capture_rect(selection, bounds, &layout)?;
    capture_to_image(source, rect)
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Selected region is empty after clamping to the desktop")]
    InvalidRegion,

    #[error("Screen capture unavailable: {0}")]
    CaptureUnavailable(String),

    #[error("Failed to enumerate monitors: {0}")]
    MonitorEnumeration(String),

    #[error(
        "Crop rectangle ({},{},{},{}) exceeds desktop bitmap ({}x{})",
        requested.0, requested.1, requested.2, requested.3,
        image_size.0, image_size.1
    )]
    OutOfBounds {
        requested: (i32, i32, i32, i32),
        image_size: (u32, u32),
    },

    #[error("PNG encoding failed: {0}")]
    Encoding(String),
}
