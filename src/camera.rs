//! Orthographic view onto the cell plane.
//!
//! The plane lies in z = 0, centred on the origin, one world unit tall and
//! `width / height` units wide. The camera looks down -z from `EYE_DISTANCE`
//! above its pan target; zoom divides the visible half-extent.

use glam::{Mat4, Vec2, Vec3};

/// Visible half-height at zoom 1.
pub const VIEW_SIZE: f32 = 1.2;
pub const ZOOM_STEP: f32 = 1.2;
pub const DEFAULT_ZOOM: f32 = 10.0;

const EYE_DISTANCE: f32 = 10.0;
const NEAR: f32 = 0.1;
const FAR: f32 = 100.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    /// Intersection with the z = 0 plane, if the ray is not parallel to it.
    pub fn hit_plane(&self) -> Option<Vec3> {
        if self.direction.z.abs() < f32::EPSILON {
            return None;
        }
        let t = -self.origin.z / self.direction.z;
        (t >= 0.0).then(|| self.origin + self.direction * t)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Camera {
    zoom: f32,
    zoom_min: f32,
    zoom_max: f32,
    target: Vec2,
    /// Viewport width / height
    aspect: f32,
}

impl Camera {
    pub fn new(zoom_min: f32, zoom_max: f32) -> Self {
        Self {
            zoom: DEFAULT_ZOOM.clamp(zoom_min, zoom_max),
            zoom_min,
            zoom_max,
            target: Vec2::ZERO,
            aspect: 1.0,
        }
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn zoom_in(&mut self) {
        self.set_zoom(self.zoom * ZOOM_STEP);
    }

    pub fn zoom_out(&mut self) {
        self.set_zoom(self.zoom / ZOOM_STEP);
    }

    pub fn set_zoom(&mut self, zoom: f32) {
        self.zoom = zoom.clamp(self.zoom_min, self.zoom_max);
    }

    pub fn reset(&mut self) {
        self.zoom = DEFAULT_ZOOM.clamp(self.zoom_min, self.zoom_max);
        self.target = Vec2::ZERO;
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        if aspect.is_finite() && aspect > 0.0 {
            self.aspect = aspect;
        }
    }

    /// Move the pan target by a world-space offset.
    pub fn pan_by(&mut self, delta: Vec2) {
        self.target += delta;
    }

    /// Drag the view by a screen-space pixel delta so the content follows
    /// the cursor. `viewport_height` is in pixels.
    pub fn pan_by_pixels(&mut self, delta: Vec2, viewport_height: f32) {
        if viewport_height <= 0.0 {
            return;
        }
        let world_per_pixel = 2.0 * VIEW_SIZE / self.zoom / viewport_height;
        // screen y grows downwards
        self.pan_by(Vec2::new(-delta.x, delta.y) * world_per_pixel);
    }

    pub fn view_proj(&self) -> Mat4 {
        let half_h = VIEW_SIZE / self.zoom;
        let half_w = half_h * self.aspect;
        let proj = Mat4::orthographic_rh(-half_w, half_w, -half_h, half_h, NEAR, FAR);
        let eye = self.target.extend(EYE_DISTANCE);
        let view = Mat4::look_at_rh(eye, self.target.extend(0.0), Vec3::Y);
        proj * view
    }

    /// Ray through normalized device coordinates `ndc` (each axis -1 to 1,
    /// y up).
    pub fn ray(&self, ndc: Vec2) -> Ray {
        let inverse = self.view_proj().inverse();
        let near = inverse.project_point3(ndc.extend(0.0));
        let far = inverse.project_point3(ndc.extend(1.0));
        Ray {
            origin: near,
            direction: (far - near).normalize_or_zero(),
        }
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(0.5, 50.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zoom_is_clamped() {
        let mut camera = Camera::default();
        for _ in 0..100 {
            camera.zoom_in();
        }
        assert_eq!(camera.zoom(), 50.0);
        for _ in 0..100 {
            camera.zoom_out();
        }
        assert_eq!(camera.zoom(), 0.5);
    }

    #[test]
    fn reset_restores_defaults() {
        let mut camera = Camera::default();
        camera.zoom_out();
        camera.pan_by(Vec2::new(0.3, -0.1));
        camera.reset();
        assert_eq!(camera.zoom(), DEFAULT_ZOOM);
        assert_eq!(camera.target, Vec2::ZERO);
    }

    #[test]
    fn centre_ray_hits_pan_target() {
        let mut camera = Camera::default();
        camera.pan_by(Vec2::new(0.2, 0.1));
        let hit = camera.ray(Vec2::ZERO).hit_plane().unwrap();
        assert!((hit.truncate() - Vec2::new(0.2, 0.1)).length() < 1e-5);
    }

    #[test]
    fn edge_ray_reaches_view_extent() {
        let mut camera = Camera::default();
        camera.set_zoom(1.0);
        let hit = camera.ray(Vec2::new(0.0, 1.0)).hit_plane().unwrap();
        assert!((hit.y - VIEW_SIZE).abs() < 1e-4);
    }

    #[test]
    fn pixel_pan_follows_cursor() {
        let mut camera = Camera::default();
        camera.set_zoom(1.0);
        // dragging right by half the viewport height moves the view left
        camera.pan_by_pixels(Vec2::new(50.0, 0.0), 100.0);
        assert!((camera.target.x + VIEW_SIZE).abs() < 1e-5);
    }
}
