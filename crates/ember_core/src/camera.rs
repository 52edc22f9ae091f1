//! Perspective camera with raster-space projection.
//!
//! Besides generating primary rays, the camera projects world positions
//! back onto the image plane (for light-to-camera connections) and reports
//! the solid-angle pdf of its own ray directions (for MIS initialization).

use ember_math::{Ray, Vec2, Vec3};

/// Perspective pinhole camera.
#[derive(Debug, Clone)]
pub struct PerspectiveCamera {
    width: u32,
    height: u32,
    pos: Vec3,
    look_at: Vec3,
    up: Vec3,
    vfov_degrees: f32,

    // Derived values, computed once.
    forward: Vec3,
    right: Vec3,
    up_img: Vec3,
    image_plane_dist: f32,
}

impl PerspectiveCamera {
    pub fn new(width: u32, height: u32, pos: Vec3, look_at: Vec3, up: Vec3, vfov_degrees: f32) -> Self {
        let mut cam = Self {
            width,
            height,
            pos,
            look_at,
            up,
            vfov_degrees,
            forward: Vec3::NEG_Z,
            right: Vec3::X,
            up_img: Vec3::Y,
            image_plane_dist: 1.0,
        };
        cam.initialize();
        cam
    }

    fn initialize(&mut self) {
        self.forward = (self.look_at - self.pos).normalize();
        self.right = self.forward.cross(self.up).normalize();
        self.up_img = self.right.cross(self.forward);
        let half_fov = (self.vfov_degrees * 0.5).to_radians();
        self.image_plane_dist = self.height as f32 * 0.5 / half_fov.tan();
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pos(&self) -> Vec3 {
        self.pos
    }

    /// Unit forward direction.
    pub fn dir(&self) -> Vec3 {
        self.forward
    }

    /// Distance from the pinhole to the image plane, in raster units.
    pub fn image_plane_dist(&self) -> f32 {
        self.image_plane_dist
    }

    /// Generate the primary ray through raster position `(x, y)`.
    ///
    /// Fractional positions jitter within a pixel; `(0.5, 0.5)` is the
    /// center of the top-left pixel.
    pub fn generate_ray(&self, x: f32, y: f32) -> Ray {
        let dir = self.forward * self.image_plane_dist
            + self.right * (x - self.width as f32 * 0.5)
            - self.up_img * (y - self.height as f32 * 0.5);
        Ray::new(self.pos, dir.normalize(), 0.0, f32::MAX)
    }

    /// Project a world position onto the raster plane.
    ///
    /// Only meaningful for points in front of the camera; callers check
    /// the facing first.
    pub fn world_to_raster(&self, pos: Vec3) -> Vec2 {
        let v = pos - self.pos;
        let z = v.dot(self.forward);
        let scale = self.image_plane_dist / z;
        Vec2::new(
            v.dot(self.right) * scale + self.width as f32 * 0.5,
            -v.dot(self.up_img) * scale + self.height as f32 * 0.5,
        )
    }

    /// Flat pixel index for a raster position, or -1 if outside the image.
    pub fn raster_to_id(&self, raster: Vec2) -> i32 {
        let x = raster.x.floor();
        let y = raster.y.floor();
        if x < 0.0 || y < 0.0 || x >= self.width as f32 || y >= self.height as f32 {
            return -1;
        }
        y as i32 * self.width as i32 + x as i32
    }

    /// Solid-angle pdf of generating a camera ray along `dir`.
    ///
    /// The pdf on the image plane is one per pixel by convention; this is
    /// that density converted to solid angle.
    pub fn pdf(&self, dir: Vec3) -> f32 {
        let cos_theta = dir.normalize().dot(self.forward);
        if cos_theta <= 0.0 {
            return 0.0;
        }
        let d = self.image_plane_dist / cos_theta;
        d * d / cos_theta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_camera() -> PerspectiveCamera {
        PerspectiveCamera::new(
            64,
            48,
            Vec3::new(0.0, 1.0, 5.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::Y,
            60.0,
        )
    }

    #[test]
    fn test_generate_project_round_trip() {
        let cam = test_camera();
        for (x, y) in [(0.5, 0.5), (32.0, 24.0), (63.2, 47.9), (10.7, 3.3)] {
            let ray = cam.generate_ray(x, y);
            for t in [0.5, 1.0, 10.0] {
                let raster = cam.world_to_raster(ray.at(t));
                assert!(
                    (raster.x - x).abs() < 0.5 && (raster.y - y).abs() < 0.5,
                    "({x}, {y}) round-tripped to ({}, {})",
                    raster.x,
                    raster.y
                );
            }
        }
    }

    #[test]
    fn test_raster_to_id_bounds() {
        let cam = test_camera();
        assert_eq!(cam.raster_to_id(Vec2::new(0.5, 0.5)), 0);
        assert_eq!(cam.raster_to_id(Vec2::new(63.5, 47.5)), 48 * 64 - 1);
        assert_eq!(cam.raster_to_id(Vec2::new(-0.1, 10.0)), -1);
        assert_eq!(cam.raster_to_id(Vec2::new(64.0, 10.0)), -1);
    }

    #[test]
    fn test_pdf_peaks_on_axis() {
        let cam = test_camera();
        let center = cam.generate_ray(32.0, 24.0);
        let corner = cam.generate_ray(0.5, 0.5);
        assert!(cam.pdf(center.direction()) < cam.pdf(corner.direction()));
        assert_eq!(cam.pdf(-cam.dir()), 0.0);
    }
}
