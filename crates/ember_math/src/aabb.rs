use crate::Vec3;

/// Axis-aligned bounding box.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// An empty box that grows from nothing.
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn from_points(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// The smallest box containing both inputs.
    pub fn surrounding(a: &Self, b: &Self) -> Self {
        Self {
            min: a.min.min(b.min),
            max: a.max.max(b.max),
        }
    }

    pub fn grow(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    pub fn centroid(&self) -> Vec3 {
        0.5 * (self.min + self.max)
    }

    /// Index of the longest extent (0 = x, 1 = y, 2 = z).
    pub fn longest_axis(&self) -> usize {
        let d = self.max - self.min;
        if d.x >= d.y && d.x >= d.z {
            0
        } else if d.y >= d.z {
            1
        } else {
            2
        }
    }

    /// Center and radius of the bounding sphere.
    pub fn bounding_sphere(&self) -> (Vec3, f32) {
        let center = self.centroid();
        (center, (self.max - center).length())
    }

    /// Slab test against a ray given as origin and precomputed 1/direction.
    #[inline]
    pub fn hit(&self, origin: Vec3, inv_dir: Vec3, tmin: f32, tmax: f32) -> bool {
        let t0 = (self.min - origin) * inv_dir;
        let t1 = (self.max - origin) * inv_dir;
        let near = t0.min(t1);
        let far = t0.max(t1);
        let enter = near.max_element().max(tmin);
        let exit = far.min_element().min(tmax);
        enter <= exit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surrounding() {
        let a = Aabb::from_points(Vec3::ZERO, Vec3::ONE);
        let b = Aabb::from_points(Vec3::splat(2.0), Vec3::splat(3.0));
        let c = Aabb::surrounding(&a, &b);
        assert_eq!(c.min, Vec3::ZERO);
        assert_eq!(c.max, Vec3::splat(3.0));
    }

    #[test]
    fn test_slab_hit_and_miss() {
        let b = Aabb::from_points(Vec3::new(-1.0, -1.0, -5.0), Vec3::new(1.0, 1.0, -3.0));
        let inv = Vec3::NEG_Z.recip();
        assert!(b.hit(Vec3::ZERO, inv, 0.0, f32::MAX));
        assert!(!b.hit(Vec3::new(5.0, 0.0, 0.0), inv, 0.0, f32::MAX));
        // Behind the far bound.
        assert!(!b.hit(Vec3::ZERO, inv, 0.0, 2.0));
    }

    #[test]
    fn test_longest_axis() {
        let b = Aabb::from_points(Vec3::ZERO, Vec3::new(1.0, 5.0, 2.0));
        assert_eq!(b.longest_axis(), 1);
    }
}
