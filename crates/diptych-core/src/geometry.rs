//! Shared PiP inset geometry.

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use crate::consts::{CANVAS_HEIGHT, CANVAS_WIDTH, MIN_PIP_SIZE};

/// PiP inset rectangle in canvas pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipGeometry {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

impl Default for PipGeometry {
    /// Quarter-size inset anchored 10 px from the bottom-right corner.
    fn default() -> Self {
        let w = CANVAS_WIDTH / 4;
        let h = CANVAS_HEIGHT / 4;
        Self {
            x: (CANVAS_WIDTH - w) as i32 - 10,
            y: (CANVAS_HEIGHT - h) as i32 - 10,
            w,
            h,
        }
    }
}

impl PipGeometry {
    /// Clamp edge lengths to the minimum inset size.
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            w: self.w.max(MIN_PIP_SIZE),
            h: self.h.max(MIN_PIP_SIZE),
            ..self
        }
    }
}

/// Geometry shared between the host's input handler and the compositor.
///
/// Fields are written independently; no invariant spans two fields, so a
/// torn read is visible for at most one composited frame.
#[derive(Debug)]
pub struct GeometryCell {
    x: AtomicI32,
    y: AtomicI32,
    w: AtomicU32,
    h: AtomicU32,
}

impl GeometryCell {
    #[must_use]
    pub fn new(geometry: PipGeometry) -> Self {
        Self {
            x: AtomicI32::new(geometry.x),
            y: AtomicI32::new(geometry.y),
            w: AtomicU32::new(geometry.w),
            h: AtomicU32::new(geometry.h),
        }
    }

    /// Snapshot read, once per compositor tick.
    #[must_use]
    pub fn load(&self) -> PipGeometry {
        PipGeometry {
            x: self.x.load(Ordering::Relaxed),
            y: self.y.load(Ordering::Relaxed),
            w: self.w.load(Ordering::Relaxed),
            h: self.h.load(Ordering::Relaxed),
        }
        .clamped()
    }

    /// Replace the whole rectangle (drag/resize end state).
    pub fn store(&self, geometry: PipGeometry) {
        let geometry = geometry.clamped();
        self.x.store(geometry.x, Ordering::Relaxed);
        self.y.store(geometry.y, Ordering::Relaxed);
        self.w.store(geometry.w, Ordering::Relaxed);
        self.h.store(geometry.h, Ordering::Relaxed);
    }

    /// Move the inset without touching its size.
    pub fn set_position(&self, x: i32, y: i32) {
        self.x.store(x, Ordering::Relaxed);
        self.y.store(y, Ordering::Relaxed);
    }

    /// Resize the inset without touching its position.
    pub fn set_size(&self, w: u32, h: u32) {
        self.w.store(w.max(MIN_PIP_SIZE), Ordering::Relaxed);
        self.h.store(h.max(MIN_PIP_SIZE), Ordering::Relaxed);
    }
}

impl Default for GeometryCell {
    fn default() -> Self {
        Self::new(PipGeometry::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_inset_sits_inside_canvas() {
        let g = PipGeometry::default();
        assert!(g.x >= 0 && g.y >= 0);
        assert!(g.x as u32 + g.w <= CANVAS_WIDTH);
        assert!(g.y as u32 + g.h <= CANVAS_HEIGHT);
    }

    #[test]
    fn load_clamps_to_min_size() {
        let cell = GeometryCell::default();
        cell.set_size(4, 4);
        let g = cell.load();
        assert_eq!(g.w, MIN_PIP_SIZE);
        assert_eq!(g.h, MIN_PIP_SIZE);
    }

    #[test]
    fn store_round_trips() {
        let cell = GeometryCell::default();
        let g = PipGeometry {
            x: 12,
            y: 34,
            w: 160,
            h: 120,
        };
        cell.store(g);
        assert_eq!(cell.load(), g);
    }
}
