// Re-export glam for convenience
pub use glam::*;

// Ember math types
mod aabb;
pub use aabb::Aabb;

mod ray;
pub use ray::Ray;

pub mod rng;
pub use rng::{bernstein_seed, Rng};

pub mod sampling;
pub use sampling::DirectionSample;

/// Perceptual luminance of a linear RGB value (Rec. 709 weights).
#[inline]
pub fn luminance(c: Vec3) -> f32 {
    c.dot(Vec3::new(0.2126, 0.7152, 0.0722))
}

/// True if every component is (numerically) zero.
#[inline]
pub fn is_black(c: Vec3) -> bool {
    c.x <= 0.0 && c.y <= 0.0 && c.z <= 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_luminance_white() {
        assert!((luminance(Vec3::ONE) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_is_black() {
        assert!(is_black(Vec3::ZERO));
        assert!(!is_black(Vec3::new(0.0, 1e-3, 0.0)));
    }
}
