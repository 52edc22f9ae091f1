use crate::{Vec3, Vec4};

/// A ray in the packed wire format consumed by the traversal backend.
///
/// The near offset (`tmin`) rides in the fourth component of the origin and
/// the far bound (`tmax`) in the fourth component of the direction, so a ray
/// occupies exactly two 16-byte lanes. Live rays always have `tmax > 0`;
/// padding rays written to fill a traversal block carry a negative far bound
/// and are skipped by every traversal backend.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Ray {
    pub org: Vec4,
    pub dir: Vec4,
}

impl Ray {
    /// Create a new ray. `dir` does not have to be normalized.
    #[inline]
    pub fn new(origin: Vec3, direction: Vec3, tmin: f32, tmax: f32) -> Self {
        Self {
            org: origin.extend(tmin),
            dir: direction.extend(tmax),
        }
    }

    /// An inert padding ray, ignored by traversal.
    #[inline]
    pub fn inert() -> Self {
        Self {
            org: Vec4::ZERO,
            dir: Vec3::Z.extend(-1.0),
        }
    }

    #[inline]
    pub fn origin(&self) -> Vec3 {
        self.org.truncate()
    }

    #[inline]
    pub fn direction(&self) -> Vec3 {
        self.dir.truncate()
    }

    #[inline]
    pub fn tmin(&self) -> f32 {
        self.org.w
    }

    #[inline]
    pub fn tmax(&self) -> f32 {
        self.dir.w
    }

    #[inline]
    pub fn is_inert(&self) -> bool {
        self.dir.w < 0.0
    }

    /// Point along the ray at parameter t.
    #[inline]
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin() + self.direction() * t
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packing() {
        let ray = Ray::new(Vec3::new(1.0, 2.0, 3.0), Vec3::X, 1e-4, 100.0);
        assert_eq!(ray.origin(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(ray.direction(), Vec3::X);
        assert_eq!(ray.tmin(), 1e-4);
        assert_eq!(ray.tmax(), 100.0);
        assert!(!ray.is_inert());
    }

    #[test]
    fn test_inert() {
        assert!(Ray::inert().is_inert());
    }

    #[test]
    fn test_at() {
        let ray = Ray::new(Vec3::ZERO, Vec3::X, 0.0, f32::MAX);
        assert_eq!(ray.at(2.0), Vec3::new(2.0, 0.0, 0.0));
    }
}
