//! Direction and position sampling primitives.
//!
//! Samplers that pick a direction return a [`DirectionSample`] carrying the
//! solid-angle pdf of that direction. Local-space samplers assume the
//! surface normal is `+Z`.

use crate::{Vec2, Vec3};
use std::f32::consts::PI;

/// A sampled direction together with its solid-angle pdf.
#[derive(Debug, Copy, Clone)]
pub struct DirectionSample {
    pub dir: Vec3,
    pub pdf: f32,
}

/// Build an orthonormal tangent and binormal around a unit vector.
pub fn local_coordinates(normal: Vec3) -> (Vec3, Vec3) {
    let tangent = if normal.x.abs() > normal.z.abs() {
        Vec3::new(-normal.y, normal.x, 0.0).normalize()
    } else {
        Vec3::new(0.0, -normal.z, normal.y).normalize()
    };
    let binormal = normal.cross(tangent);
    (tangent, binormal)
}

/// Uniform direction on the local hemisphere (`+Z` up), pdf `1 / 2pi`.
pub fn sample_uniform_hemisphere(u1: f32, u2: f32) -> DirectionSample {
    let phi = 2.0 * PI * u1;
    let z = u2;
    let r = (1.0 - z * z).max(0.0).sqrt();
    DirectionSample {
        dir: Vec3::new(r * phi.cos(), r * phi.sin(), z),
        pdf: 1.0 / (2.0 * PI),
    }
}

/// Cosine-weighted direction on the local hemisphere, pdf `cos / pi`.
pub fn sample_cos_hemisphere(u1: f32, u2: f32) -> DirectionSample {
    let phi = 2.0 * PI * u1;
    let r = u2.sqrt();
    let z = (1.0 - u2).max(0.0).sqrt();
    DirectionSample {
        dir: Vec3::new(r * phi.cos(), r * phi.sin(), z),
        pdf: z / PI,
    }
}

/// Pdf of [`sample_cos_hemisphere`] for a direction with the given cosine.
#[inline]
pub fn cos_hemisphere_pdf(cos_theta: f32) -> f32 {
    cos_theta.max(0.0) / PI
}

/// Power-cosine lobe around local `+Z`, pdf `(n+1)/2pi * cos^n`.
pub fn sample_power_cos_hemisphere(exponent: f32, u1: f32, u2: f32) -> DirectionSample {
    let phi = 2.0 * PI * u1;
    let z = u2.powf(1.0 / (exponent + 1.0));
    let r = (1.0 - z * z).max(0.0).sqrt();
    DirectionSample {
        dir: Vec3::new(r * phi.cos(), r * phi.sin(), z),
        pdf: (exponent + 1.0) / (2.0 * PI) * z.powf(exponent),
    }
}

/// Pdf of [`sample_power_cos_hemisphere`] for a local direction.
#[inline]
pub fn power_cos_hemisphere_pdf(exponent: f32, dir: Vec3) -> f32 {
    if dir.z <= 0.0 {
        0.0
    } else {
        (exponent + 1.0) / (2.0 * PI) * dir.z.powf(exponent)
    }
}

/// Uniform direction on the full sphere, pdf `1 / 4pi`.
pub fn sample_uniform_sphere(u1: f32, u2: f32) -> DirectionSample {
    let phi = 2.0 * PI * u1;
    let z = 1.0 - 2.0 * u2;
    let r = (1.0 - z * z).max(0.0).sqrt();
    DirectionSample {
        dir: Vec3::new(r * phi.cos(), r * phi.sin(), z),
        pdf: 1.0 / (4.0 * PI),
    }
}

/// Uniform barycentric coordinates on a triangle.
pub fn sample_uniform_triangle(u1: f32, u2: f32) -> Vec2 {
    let sqrt_u1 = u1.sqrt();
    Vec2::new(1.0 - sqrt_u1, u2 * sqrt_u1)
}

/// Uniform point on the unit disk via the concentric mapping.
pub fn sample_concentric_disk(u1: f32, u2: f32) -> Vec2 {
    let offset = 2.0 * Vec2::new(u1, u2) - Vec2::ONE;
    if offset == Vec2::ZERO {
        return Vec2::ZERO;
    }
    let (r, theta) = if offset.x.abs() > offset.y.abs() {
        (offset.x, (PI / 4.0) * (offset.y / offset.x))
    } else {
        (offset.y, (PI / 2.0) - (PI / 4.0) * (offset.x / offset.y))
    };
    r * Vec2::new(theta.cos(), theta.sin())
}

/// Rotate a local-space direction (`+Z` up) into the frame of `normal`.
pub fn local_to_world(local: Vec3, normal: Vec3) -> Vec3 {
    let (tangent, binormal) = local_coordinates(normal);
    tangent * local.x + binormal * local.y + normal * local.z
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Rng;

    #[test]
    fn test_local_coordinates_orthonormal() {
        for n in [Vec3::Z, Vec3::X, Vec3::new(1.0, 2.0, -3.0).normalize()] {
            let (t, b) = local_coordinates(n);
            assert!(t.dot(n).abs() < 1e-5);
            assert!(b.dot(n).abs() < 1e-5);
            assert!(t.dot(b).abs() < 1e-5);
            assert!((t.length() - 1.0).abs() < 1e-5);
            assert!((b.length() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_cos_hemisphere_is_normalized() {
        // Monte-Carlo estimate of the pdf integral over the hemisphere:
        // draw uniform directions and average pdf / uniform_pdf.
        let mut rng = Rng::new(11);
        let n = 200_000;
        let mut sum = 0.0f64;
        for _ in 0..n {
            let s = sample_uniform_hemisphere(rng.random_float(), rng.random_float());
            sum += (cos_hemisphere_pdf(s.dir.z) / s.pdf) as f64;
        }
        let integral = sum / n as f64;
        assert!((integral - 1.0).abs() < 0.01, "integral = {integral}");
    }

    #[test]
    fn test_power_cos_is_normalized() {
        let mut rng = Rng::new(23);
        let exponent = 20.0;
        let n = 400_000;
        let mut sum = 0.0f64;
        for _ in 0..n {
            let s = sample_uniform_hemisphere(rng.random_float(), rng.random_float());
            sum += (power_cos_hemisphere_pdf(exponent, s.dir) / s.pdf) as f64;
        }
        let integral = sum / n as f64;
        assert!((integral - 1.0).abs() < 0.01, "integral = {integral}");
    }

    #[test]
    fn test_sampled_pdfs_match_reported() {
        let mut rng = Rng::new(3);
        for _ in 0..100 {
            let (u1, u2) = (rng.random_float(), rng.random_float());
            let s = sample_cos_hemisphere(u1, u2);
            assert!((s.pdf - cos_hemisphere_pdf(s.dir.z)).abs() < 1e-5);
            let p = sample_power_cos_hemisphere(8.0, u1, u2);
            assert!((p.pdf - power_cos_hemisphere_pdf(8.0, p.dir)).abs() < 1e-4);
        }
    }

    #[test]
    fn test_triangle_barycentrics_valid() {
        let mut rng = Rng::new(5);
        for _ in 0..1000 {
            let b = sample_uniform_triangle(rng.random_float(), rng.random_float());
            assert!(b.x >= 0.0 && b.y >= 0.0 && b.x + b.y <= 1.0 + 1e-6);
        }
    }

    #[test]
    fn test_concentric_disk_in_unit_disk() {
        let mut rng = Rng::new(9);
        for _ in 0..1000 {
            let p = sample_concentric_disk(rng.random_float(), rng.random_float());
            assert!(p.length() <= 1.0 + 1e-6);
        }
    }
}
