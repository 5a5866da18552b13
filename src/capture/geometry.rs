//! Coordinate spaces for region capture.
//!
//! Two spaces are involved:
//! - UI space: the overlay's own logical units (`UiPoint`, `UiRect`).
//! - Device space: physical pixels of the virtual desktop (`DevicePoint`, `DeviceRect`).
//!
//! There is no single scale factor between them. Each monitor can have its own,
//! so UI points are converted one at a time through a `PointMapper` supplied by
//! the windowing layer.

use super::CaptureError;

/// A point in overlay UI space (logical units, overlay-local).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UiPoint {
    pub x: f64,
    pub y: f64,
}

impl UiPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// An axis-aligned rectangle in overlay UI space. This is the selection
/// produced by the rubber-band gesture; always normalized (non-negative size).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UiRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl UiRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::from_corners(UiPoint::new(x, y), UiPoint::new(x + width, y + height))
    }

    /// Bounding box of two arbitrary points, in any drag direction.
    pub fn from_corners(a: UiPoint, b: UiPoint) -> Self {
        Self {
            x: a.x.min(b.x),
            y: a.y.min(b.y),
            width: (a.x - b.x).abs(),
            height: (a.y - b.y).abs(),
        }
    }

    pub fn top_left(&self) -> UiPoint {
        UiPoint::new(self.x, self.y)
    }

    pub fn bottom_right(&self) -> UiPoint {
        UiPoint::new(self.x + self.width, self.y + self.height)
    }

    /// Half-open containment: the right and bottom edges belong to the neighbour.
    pub fn contains(&self, p: UiPoint) -> bool {
        p.x >= self.x && p.x < self.x + self.width && p.y >= self.y && p.y < self.y + self.height
    }

    /// Squared distance from `p` to the nearest point of this rectangle (0 when inside).
    pub fn distance_sq(&self, p: UiPoint) -> f64 {
        let dx = (self.x - p.x).max(0.0).max(p.x - (self.x + self.width));
        let dy = (self.y - p.y).max(0.0).max(p.y - (self.y + self.height));
        dx * dx + dy * dy
    }

    /// Smallest rectangle covering both.
    pub fn union(&self, other: &UiRect) -> UiRect {
        let left = self.x.min(other.x);
        let top = self.y.min(other.y);
        let right = (self.x + self.width).max(other.x + other.width);
        let bottom = (self.y + self.height).max(other.y + other.height);
        UiRect {
            x: left,
            y: top,
            width: right - left,
            height: bottom - top,
        }
    }
}

/// A point in device pixels on the virtual desktop. May be negative when a
/// monitor sits left of or above the primary one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevicePoint {
    pub x: i32,
    pub y: i32,
}

impl DevicePoint {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// An axis-aligned rectangle in device pixels.
///
/// Used both for the virtual desktop bounds (union of all monitors) and for
/// the final capture rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// Union of all monitors in device pixels. Query it fresh for every capture.
pub type VirtualDesktopBounds = DeviceRect;

/// Device-pixel rectangle to capture, always inside `VirtualDesktopBounds`.
pub type CaptureRect = DeviceRect;

impl DeviceRect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Bounding box of two device points.
    pub fn from_points(a: DevicePoint, b: DevicePoint) -> Self {
        let left = a.x.min(b.x);
        let top = a.y.min(b.y);
        Self {
            x: left,
            y: top,
            width: a.x.max(b.x) - left,
            height: a.y.max(b.y) - top,
        }
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn contains_rect(&self, other: &DeviceRect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Overlap of two rectangles. The result may be empty (zero or negative size).
    pub fn intersect(&self, other: &DeviceRect) -> DeviceRect {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        DeviceRect {
            x: left,
            y: top,
            width: self.right().min(other.right()) - left,
            height: self.bottom().min(other.bottom()) - top,
        }
    }

    pub fn union(&self, other: &DeviceRect) -> DeviceRect {
        let left = self.x.min(other.x);
        let top = self.y.min(other.y);
        DeviceRect {
            x: left,
            y: top,
            width: self.right().max(other.right()) - left,
            height: self.bottom().max(other.bottom()) - top,
        }
    }

    /// Translate into a coordinate space whose origin is `origin`.
    pub fn relative_to(&self, origin: DevicePoint) -> DeviceRect {
        DeviceRect {
            x: self.x - origin.x,
            y: self.y - origin.y,
            width: self.width,
            height: self.height,
        }
    }

    pub fn origin(&self) -> DevicePoint {
        DevicePoint::new(self.x, self.y)
    }
}

/// Maps a single overlay UI point to a device-pixel screen point.
///
/// Implemented by the windowing layer (see `MonitorLayout`). Closures work too,
/// which keeps the geometry testable without any monitors attached.
pub trait PointMapper {
    fn to_screen(&self, point: UiPoint) -> DevicePoint;
}

impl<F> PointMapper for F
where
    F: Fn(UiPoint) -> DevicePoint,
{
    fn to_screen(&self, point: UiPoint) -> DevicePoint {
        self(point)
    }
}

/// Translate a selection into the device-pixel rectangle to capture.
///
/// With no selection the whole desktop is captured. Otherwise the two opposite
/// corners are mapped independently and the result is their bounding box,
/// clamped to `desktop`. A corner on a 200% monitor and a corner on a 100%
/// monitor cannot share one scale factor, hence the per-corner mapping.
pub fn compute_capture_rect(
    selection: Option<&UiRect>,
    desktop: VirtualDesktopBounds,
    mapper: &impl PointMapper,
) -> Result<CaptureRect, CaptureError> {
    let Some(selection) = selection else {
        if desktop.is_empty() {
            return Err(CaptureError::InvalidRegion);
        }
        return Ok(desktop);
    };

    let first = mapper.to_screen(selection.top_left());
    let second = mapper.to_screen(selection.bottom_right());
    let rect = DeviceRect::from_points(first, second).intersect(&desktop);

    log::debug!(
        "[CAPTURE] Selection {:?} mapped to ({},{}) / ({},{}) -> {:?}",
        selection,
        first.x,
        first.y,
        second.x,
        second.y,
        rect
    );

    if rect.is_empty() {
        return Err(CaptureError::InvalidRegion);
    }
    Ok(rect)
}
