//! Camera & Viewport
//!
//! Read-only per-frame inputs: the view-projection transform, the viewport
//! rectangle a scene renders into, and (on the scene) the pending pick
//! coordinate. The renderer never moves a camera; whoever owns the scene does.

use glam::{Mat4, UVec2, Vec3};

/// Perspective camera state consumed once per frame.
#[derive(Clone, Copy, Debug)]
pub struct Camera {
    pub position: Vec3,
    pub view_proj: Mat4,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, -5.0, 2.0),
            view_proj: Mat4::IDENTITY,
        }
    }
}

impl Camera {
    /// Look-at camera with a reverse-Z perspective projection.
    #[must_use]
    pub fn look_at(position: Vec3, target: Vec3, aspect: f32) -> Self {
        let view = Mat4::look_at_rh(position, target, Vec3::Z);
        // Reverse-Z: swap near/far so depth precision concentrates far out.
        let projection = Mat4::perspective_rh(std::f32::consts::FRAC_PI_3, aspect, 1000.0, 0.1);
        Self {
            position,
            view_proj: projection * view,
        }
    }

    #[must_use]
    pub fn inverse_view_proj(&self) -> Mat4 {
        self.view_proj.inverse()
    }
}

/// Pixel rectangle a scene renders into, plus its camera.
#[derive(Clone, Copy, Debug)]
pub struct Viewport {
    pub size: UVec2,
    pub camera: Camera,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            size: UVec2::new(1280, 720),
            camera: Camera::default(),
        }
    }
}

impl Viewport {
    #[must_use]
    pub fn new(size: UVec2) -> Self {
        Self {
            size,
            camera: Camera::default(),
        }
    }

    /// Whether a pixel coordinate lies inside `[0, size)`.
    #[must_use]
    pub fn contains(&self, coord: UVec2) -> bool {
        coord.x < self.size.x && coord.y < self.size.y
    }

    #[must_use]
    pub fn aspect(&self) -> f32 {
        self.size.x.max(1) as f32 / self.size.y.max(1) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_bounds_check() {
        let viewport = Viewport::new(UVec2::new(100, 50));
        assert!(viewport.contains(UVec2::new(0, 0)));
        assert!(viewport.contains(UVec2::new(99, 49)));
        assert!(!viewport.contains(UVec2::new(100, 0)));
        assert!(!viewport.contains(UVec2::new(0, 50)));
    }
}
