//! Traversal interface and the provided BVH collaborator.
//!
//! The rendering core only ever sees the [`Traversal`] trait: closest-hit
//! and any-hit queries over packed ray buffers. Ray buffers handed to a
//! backend must be padded to a multiple of [`TRAVERSAL_BLOCK`] with inert
//! rays so vectorized backends never read past the live range.

use ember_math::{Aabb, Ray, Vec3};

use crate::mesh::TriMesh;

/// Traversal backends consume ray buffers whose length is a multiple of
/// this block size.
pub const TRAVERSAL_BLOCK: usize = 64;

/// Result of tracing one ray.
///
/// `tri_id < 0` means the ray missed (or, after an occlusion query, that
/// the segment was unobstructed). `u`/`v` are barycentric coordinates on
/// the hit triangle and `t` the parametric distance along the ray.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Hit {
    pub tri_id: i32,
    pub inst_id: i32,
    pub u: f32,
    pub v: f32,
    pub t: f32,
}

impl Hit {
    pub const fn miss() -> Self {
        Self {
            tri_id: -1,
            inst_id: -1,
            u: 0.0,
            v: 0.0,
            t: f32::MAX,
        }
    }

    #[inline]
    pub fn is_hit(&self) -> bool {
        self.tri_id >= 0
    }
}

impl Default for Hit {
    fn default() -> Self {
        Self::miss()
    }
}

/// Bulk intersection queries over packed ray buffers.
pub trait Traversal: Send + Sync {
    /// Find the closest hit of every ray. `hits` must be at least as long
    /// as `rays`; inert rays produce misses.
    fn closest_hit(&self, rays: &[Ray], hits: &mut [Hit]);

    /// Report whether each ray segment is occluded. An occluded segment
    /// stores some hit triangle; an unobstructed one stores a miss.
    fn any_hit(&self, rays: &[Ray], hits: &mut [Hit]);
}

/// A triangle prepared for intersection: one vertex plus two edges.
#[derive(Debug, Copy, Clone)]
struct PackedTri {
    v0: Vec3,
    e1: Vec3,
    e2: Vec3,
    tri_id: u32,
}

impl PackedTri {
    /// Möller-Trumbore intersection, returning (t, u, v).
    #[inline]
    fn intersect(&self, ray: &Ray) -> Option<(f32, f32, f32)> {
        let dir = ray.direction();
        let pvec = dir.cross(self.e2);
        let det = self.e1.dot(pvec);
        if det.abs() < 1e-9 {
            return None;
        }
        let inv_det = 1.0 / det;
        let tvec = ray.origin() - self.v0;
        let u = tvec.dot(pvec) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }
        let qvec = tvec.cross(self.e1);
        let v = dir.dot(qvec) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }
        let t = self.e2.dot(qvec) * inv_det;
        if t < ray.tmin() || t > ray.tmax() {
            return None;
        }
        Some((t, u, v))
    }
}

/// Maximum triangles per leaf before splitting.
const LEAF_MAX_SIZE: usize = 4;

/// BVH node: a branch with two children or a leaf with a few triangles.
enum BvhNode {
    Branch {
        left: Box<BvhNode>,
        right: Box<BvhNode>,
        bbox: Aabb,
    },
    Leaf {
        tris: Vec<PackedTri>,
        bbox: Aabb,
    },
    Empty,
}

/// Median-split BVH over the triangles of a mesh.
///
/// This is the provided traversal collaborator; it trades build quality
/// for simplicity and is swappable behind [`Traversal`].
pub struct Bvh {
    root: BvhNode,
}

struct BuildTri {
    packed: PackedTri,
    bbox: Aabb,
    centroid: Vec3,
}

impl Bvh {
    pub fn build(mesh: &TriMesh) -> Self {
        let prims: Vec<BuildTri> = (0..mesh.triangle_count())
            .map(|tri| {
                let [v0, v1, v2] = mesh.triangle(tri);
                let mut bbox = Aabb::from_points(v0, v1);
                bbox.grow(v2);
                BuildTri {
                    packed: PackedTri {
                        v0,
                        e1: v1 - v0,
                        e2: v2 - v0,
                        tri_id: tri as u32,
                    },
                    bbox,
                    centroid: bbox.centroid(),
                }
            })
            .collect();
        log::debug!("building BVH over {} triangles", prims.len());
        Self {
            root: Self::build_node(prims),
        }
    }

    fn build_node(mut prims: Vec<BuildTri>) -> BvhNode {
        if prims.is_empty() {
            return BvhNode::Empty;
        }

        let bbox = prims
            .iter()
            .fold(Aabb::EMPTY, |acc, p| Aabb::surrounding(&acc, &p.bbox));

        if prims.len() <= LEAF_MAX_SIZE {
            return BvhNode::Leaf {
                tris: prims.into_iter().map(|p| p.packed).collect(),
                bbox,
            };
        }

        // Split at the median along the longest centroid extent.
        let mut centroid_bounds = Aabb::EMPTY;
        for p in &prims {
            centroid_bounds.grow(p.centroid);
        }
        let axis = centroid_bounds.longest_axis();
        let mid = prims.len() / 2;
        prims.sort_by(|a, b| {
            a.centroid[axis]
                .partial_cmp(&b.centroid[axis])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let right = prims.split_off(mid);

        BvhNode::Branch {
            left: Box::new(Self::build_node(prims)),
            right: Box::new(Self::build_node(right)),
            bbox,
        }
    }

    fn trace_one(&self, ray: &Ray, any: bool) -> Hit {
        let mut hit = Hit::miss();
        if ray.is_inert() {
            return hit;
        }
        let inv_dir = ray.direction().recip();
        let mut tmax = ray.tmax();
        let mut stack = Vec::with_capacity(32);
        stack.push(&self.root);

        while let Some(node) = stack.pop() {
            match node {
                BvhNode::Empty => {}
                BvhNode::Branch { left, right, bbox } => {
                    if bbox.hit(ray.origin(), inv_dir, ray.tmin(), tmax) {
                        stack.push(left);
                        stack.push(right);
                    }
                }
                BvhNode::Leaf { tris, bbox } => {
                    if !bbox.hit(ray.origin(), inv_dir, ray.tmin(), tmax) {
                        continue;
                    }
                    for tri in tris {
                        if let Some((t, u, v)) = tri.intersect(&Ray {
                            org: ray.org,
                            dir: ray.direction().extend(tmax),
                        }) {
                            hit = Hit {
                                tri_id: tri.tri_id as i32,
                                inst_id: 0,
                                u,
                                v,
                                t,
                            };
                            if any {
                                return hit;
                            }
                            tmax = t;
                        }
                    }
                }
            }
        }
        hit
    }
}

impl Traversal for Bvh {
    fn closest_hit(&self, rays: &[Ray], hits: &mut [Hit]) {
        assert!(hits.len() >= rays.len());
        for (ray, hit) in rays.iter().zip(hits.iter_mut()) {
            *hit = self.trace_one(ray, false);
        }
    }

    fn any_hit(&self, rays: &[Ray], hits: &mut [Hit]) {
        assert!(hits.len() >= rays.len());
        for (ray, hit) in rays.iter().zip(hits.iter_mut()) {
            *hit = self.trace_one(ray, true);
        }
    }
}
