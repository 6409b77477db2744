//! Window geometry shared by the window watcher and the fullscreen check

/// Rectangle in root window coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Whether this rectangle fills `monitor` completely.
    ///
    /// Windows larger than the monitor still count, games often overshoot
    /// by their invisible borders.
    pub fn covers(&self, monitor: &Geometry) -> bool {
        let right = self.x as i64 + self.width as i64;
        let bottom = self.y as i64 + self.height as i64;
        let monitor_right = monitor.x as i64 + monitor.width as i64;
        let monitor_bottom = monitor.y as i64 + monitor.height as i64;

        self.x <= monitor.x && self.y <= monitor.y && right >= monitor_right && bottom >= monitor_bottom
    }

    /// Covers any of `monitors`
    pub fn covers_any(&self, monitors: &[Geometry]) -> bool {
        monitors.iter().any(|monitor| self.covers(monitor))
    }
}
