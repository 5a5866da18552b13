//! Monitor layout: where each monitor sits in logical and device space.
//!
//! The overlay covers the whole virtual desktop in logical units. A point on it
//! is converted by finding the monitor under it and applying that monitor's
//! own scale factor.

use super::geometry::{DevicePoint, DeviceRect, PointMapper, UiPoint, UiRect};

/// One physical display.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorInfo {
    pub name: String,
    /// Position and size in logical units (the space windows are laid out in).
    pub logical: UiRect,
    /// Position and size in device pixels.
    pub device: DeviceRect,
    pub scale_factor: f64,
    pub is_primary: bool,
}

impl MonitorInfo {
    /// Build from a device-pixel rectangle, anchoring the logical origin at the
    /// device origin and shrinking the size by the scale factor.
    pub fn from_device(name: &str, device: DeviceRect, scale_factor: f64, is_primary: bool) -> Self {
        let scale = if scale_factor > 0.0 { scale_factor } else { 1.0 };
        Self {
            name: name.to_string(),
            logical: UiRect::new(
                device.x as f64,
                device.y as f64,
                device.width as f64 / scale,
                device.height as f64 / scale,
            ),
            device,
            scale_factor: scale,
            is_primary,
        }
    }

    /// Build from a rectangle reported in points. The device size is the
    /// point size times this monitor's scale; the device origin is the point
    /// origin times `origin_scale`, which must be at least every monitor's
    /// scale so neighbouring monitors stay apart in pixel space.
    pub fn from_points(
        name: &str,
        logical: UiRect,
        scale_factor: f64,
        origin_scale: f64,
        is_primary: bool,
    ) -> Self {
        let scale = if scale_factor > 0.0 { scale_factor } else { 1.0 };
        Self {
            name: name.to_string(),
            logical,
            device: DeviceRect::new(
                (logical.x * origin_scale).round() as i32,
                (logical.y * origin_scale).round() as i32,
                (logical.width * scale).round() as i32,
                (logical.height * scale).round() as i32,
            ),
            scale_factor: scale,
            is_primary,
        }
    }

    /// Map a global logical point onto this monitor's device pixels.
    fn logical_to_device(&self, p: UiPoint) -> DevicePoint {
        let dx = (p.x - self.logical.x) * self.scale_factor;
        let dy = (p.y - self.logical.y) * self.scale_factor;
        DevicePoint::new(
            self.device.x + dx.round() as i32,
            self.device.y + dy.round() as i32,
        )
    }
}

/// Snapshot of the monitor configuration. Build a fresh one for every capture;
/// monitors can be attached, removed or rescaled at any time.
#[derive(Debug, Clone, Default)]
pub struct MonitorLayout {
    monitors: Vec<MonitorInfo>,
}

impl MonitorLayout {
    pub fn new(monitors: Vec<MonitorInfo>) -> Self {
        Self { monitors }
    }

    /// Layout for monitors reported as `(name, rect in points, scale, primary)`.
    ///
    /// Pixel origins come from the largest scale present. A gap can open
    /// next to a lower-density monitor; it rasterizes as empty pixels.
    pub fn from_points(monitors: Vec<(String, UiRect, f64, bool)>) -> Self {
        let origin_scale = monitors
            .iter()
            .map(|(_, _, scale, _)| *scale)
            .filter(|scale| *scale > 0.0)
            .fold(1.0, f64::max);
        Self::new(
            monitors
                .into_iter()
                .map(|(name, logical, scale, is_primary)| {
                    MonitorInfo::from_points(&name, logical, scale, origin_scale, is_primary)
                })
                .collect(),
        )
    }

    pub fn monitors(&self) -> &[MonitorInfo] {
        &self.monitors
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }

    /// Virtual desktop bounds in device pixels, or `None` with no monitors.
    pub fn bounds(&self) -> Option<DeviceRect> {
        self.monitors
            .iter()
            .map(|m| m.device)
            .reduce(|acc, r| acc.union(&r))
    }

    /// Logical rectangle the overlay window must cover.
    pub fn overlay_rect(&self) -> Option<UiRect> {
        self.monitors
            .iter()
            .map(|m| m.logical)
            .reduce(|acc, r| acc.union(&r))
    }

    pub fn primary(&self) -> Option<&MonitorInfo> {
        self.monitors
            .iter()
            .find(|m| m.is_primary)
            .or_else(|| self.monitors.first())
    }

    /// Monitor containing the given device point, if any.
    pub fn monitor_at_device(&self, p: DevicePoint) -> Option<&MonitorInfo> {
        self.monitors.iter().find(|m| {
            p.x >= m.device.x && p.x < m.device.right() && p.y >= m.device.y && p.y < m.device.bottom()
        })
    }

    /// Monitor under a global logical point. Points in gaps between monitors
    /// (or just past the outer edge) snap to the nearest one.
    fn monitor_for_logical(&self, p: UiPoint) -> Option<&MonitorInfo> {
        self.monitors
            .iter()
            .find(|m| m.logical.contains(p))
            .or_else(|| {
                self.monitors.iter().min_by(|a, b| {
                    a.logical
                        .distance_sq(p)
                        .total_cmp(&b.logical.distance_sq(p))
                })
            })
    }
}

impl PointMapper for MonitorLayout {
    /// `point` is overlay-local: (0,0) is the top-left of `overlay_rect()`.
    fn to_screen(&self, point: UiPoint) -> DevicePoint {
        let Some(origin) = self.overlay_rect() else {
            return DevicePoint::new(point.x.round() as i32, point.y.round() as i32);
        };
        let global = UiPoint::new(point.x + origin.x, point.y + origin.y);
        match self.monitor_for_logical(global) {
            Some(monitor) => monitor.logical_to_device(global),
            None => DevicePoint::new(global.x.round() as i32, global.y.round() as i32),
        }
    }
}
