//! Screen position to normalized grid coordinate.
//!
//! Brush strokes, drag previews and drops all go through [`pick`], so a
//! preview always lands exactly where the drop will.

use glam::Vec2;

use crate::camera::Camera;

/// Size of the drawable area in physical pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn aspect(&self) -> f32 {
        if self.height > 0.0 {
            self.width / self.height
        } else {
            1.0
        }
    }

    /// Pixel position (origin top left) to NDC (y up).
    pub fn to_ndc(&self, screen: Vec2) -> Vec2 {
        Vec2::new(
            2.0 * screen.x / self.width - 1.0,
            1.0 - 2.0 * screen.y / self.height,
        )
    }
}

/// Scale a page position in CSS pixels to the physical pixels the viewport
/// is measured in. Degenerate ratios are treated as 1.
pub fn css_to_physical(css: Vec2, device_pixel_ratio: f64) -> Vec2 {
    let ratio = if device_pixel_ratio.is_finite() && device_pixel_ratio > 0.0 {
        device_pixel_ratio as f32
    } else {
        1.0
    };
    css * ratio
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(1.0, 1.0)
    }
}

/// World-space extent of the plane for a `width` x `height` grid.
pub fn plane_size(width: u32, height: u32) -> Vec2 {
    Vec2::new(width as f32 / height as f32, 1.0)
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlaneHit {
    /// Intersection in world space
    pub point: Vec2,
    /// Normalized grid coordinate, each axis in [0, 1), v = 0 at the bottom
    pub uv: Vec2,
}

impl PlaneHit {
    /// The cell under the hit.
    pub fn cell(&self, width: u32, height: u32) -> (u32, u32) {
        (
            ((self.uv.x * width as f32) as u32).min(width - 1),
            ((self.uv.y * height as f32) as u32).min(height - 1),
        )
    }
}

/// Cast a ray through `screen` and intersect it with the plane. `None` when
/// the point is outside the plane or the viewport is degenerate.
pub fn pick(
    camera: &Camera,
    viewport: Viewport,
    screen: Vec2,
    width: u32,
    height: u32,
) -> Option<PlaneHit> {
    if viewport.width <= 0.0 || viewport.height <= 0.0 || width == 0 || height == 0 {
        return None;
    }
    let point = camera.ray(viewport.to_ndc(screen)).hit_plane()?.truncate();
    let uv = point / plane_size(width, height) + 0.5;
    let inside = (0.0..1.0).contains(&uv.x) && (0.0..1.0).contains(&uv.y);
    inside.then_some(PlaneHit { point, uv })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera(aspect: f32) -> Camera {
        let mut camera = Camera::default();
        camera.set_zoom(1.0);
        camera.set_aspect(aspect);
        camera
    }

    #[test]
    fn centre_of_screen_is_centre_of_grid() {
        let viewport = Viewport::new(800.0, 600.0);
        let hit = pick(
            &camera(viewport.aspect()),
            viewport,
            Vec2::new(400.0, 300.0),
            64,
            64,
        )
        .unwrap();
        assert!((hit.uv - Vec2::splat(0.5)).length() < 1e-5);
        assert_eq!(hit.cell(64, 64), (32, 32));
    }

    #[test]
    fn screen_up_is_grid_up() {
        let viewport = Viewport::new(100.0, 100.0);
        let cam = camera(1.0);
        let low = pick(&cam, viewport, Vec2::new(50.0, 60.0), 8, 8).unwrap();
        let high = pick(&cam, viewport, Vec2::new(50.0, 40.0), 8, 8).unwrap();
        assert!(high.uv.y > low.uv.y);
    }

    #[test]
    fn outside_plane_is_no_hit() {
        // zoom 1 shows 2.4 world units of height; the plane is 1 unit tall
        let viewport = Viewport::new(100.0, 100.0);
        assert!(pick(&camera(1.0), viewport, Vec2::new(50.0, 1.0), 8, 8).is_none());
        assert!(pick(&camera(1.0), viewport, Vec2::new(1.0, 50.0), 8, 8).is_none());
    }

    #[test]
    fn wide_grids_stretch_the_plane() {
        // 2:1 grid: plane spans x in [-1, 1]
        let viewport = Viewport::new(100.0, 100.0);
        let hit = pick(&camera(1.0), viewport, Vec2::new(85.0, 50.0), 16, 8).unwrap();
        // ndc 0.7 -> world 0.84 -> u = 0.92
        assert!((hit.uv.x - 0.92).abs() < 1e-4);
    }

    #[test]
    fn css_pixels_scale_to_physical() {
        // 400 CSS px canvas on a 2x display is an 800 px viewport
        let viewport = Viewport::new(800.0, 800.0);
        let centre = css_to_physical(Vec2::new(200.0, 200.0), 2.0);
        assert_eq!(centre, Vec2::new(400.0, 400.0));
        let hit = pick(&camera(1.0), viewport, centre, 8, 8).unwrap();
        assert!((hit.uv - Vec2::splat(0.5)).length() < 1e-5);

        assert_eq!(css_to_physical(Vec2::new(3.0, 4.0), 0.0), Vec2::new(3.0, 4.0));
        assert_eq!(css_to_physical(Vec2::new(3.0, 4.0), f64::NAN), Vec2::new(3.0, 4.0));
    }

    #[test]
    fn degenerate_viewport_never_hits() {
        let cam = camera(1.0);
        assert!(pick(&cam, Viewport::new(0.0, 0.0), Vec2::ZERO, 8, 8).is_none());
    }
}
