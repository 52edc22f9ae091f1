//! Triangle mesh geometry.

use ember_math::{Vec2, Vec3};

/// A triangle mesh: vertex positions, optional per-vertex normals and UVs,
/// triangle indices, and one material id per triangle.
#[derive(Clone, Debug)]
pub struct TriMesh {
    pub positions: Vec<Vec3>,
    pub normals: Option<Vec<Vec3>>,
    pub uvs: Option<Vec<Vec2>>,
    pub indices: Vec<u32>,
    pub material_ids: Vec<u32>,
}

impl TriMesh {
    /// Create a mesh. `indices.len()` must be a multiple of three, and
    /// `material_ids` must hold one entry per triangle.
    pub fn new(
        positions: Vec<Vec3>,
        indices: Vec<u32>,
        material_ids: Vec<u32>,
    ) -> Self {
        assert_eq!(indices.len() % 3, 0);
        assert_eq!(material_ids.len(), indices.len() / 3);
        Self {
            positions,
            normals: None,
            uvs: None,
            indices,
            material_ids,
        }
    }

    pub fn with_normals(mut self, normals: Vec<Vec3>) -> Self {
        assert_eq!(normals.len(), self.positions.len());
        self.normals = Some(normals);
        self
    }

    pub fn with_uvs(mut self, uvs: Vec<Vec2>) -> Self {
        assert_eq!(uvs.len(), self.positions.len());
        self.uvs = Some(uvs);
        self
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// The three corner positions of triangle `tri`.
    #[inline]
    pub fn triangle(&self, tri: usize) -> [Vec3; 3] {
        let i = tri * 3;
        [
            self.positions[self.indices[i] as usize],
            self.positions[self.indices[i + 1] as usize],
            self.positions[self.indices[i + 2] as usize],
        ]
    }

    /// Unit geometric normal of triangle `tri`.
    pub fn geom_normal(&self, tri: usize) -> Vec3 {
        let [v0, v1, v2] = self.triangle(tri);
        (v1 - v0).cross(v2 - v0).normalize_or_zero()
    }

    /// Surface area of triangle `tri`.
    pub fn area(&self, tri: usize) -> f32 {
        let [v0, v1, v2] = self.triangle(tri);
        0.5 * (v1 - v0).cross(v2 - v0).length()
    }

    /// Recompute per-vertex normals as area-weighted triangle normals.
    ///
    /// The unnormalized cross product of two edges is proportional to the
    /// triangle area, so summing it per vertex weights larger triangles
    /// more, which is the usual smoothing rule.
    pub fn compute_normals(&mut self) {
        let mut normals = vec![Vec3::ZERO; self.positions.len()];
        for tri in 0..self.triangle_count() {
            let [v0, v1, v2] = self.triangle(tri);
            let weighted = (v1 - v0).cross(v2 - v0);
            for k in 0..3 {
                normals[self.indices[tri * 3 + k] as usize] += weighted;
            }
        }
        for n in &mut normals {
            *n = n.normalize_or_zero();
        }
        self.normals = Some(normals);
    }
}
