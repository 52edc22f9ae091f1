//! Read-only scene view consumed by the rendering core.
//!
//! A [`Scene`] owns the flattened geometry, the material and light tables,
//! and an opaque traversal handle. The core reads it concurrently from all
//! workers; nothing here mutates during a render.

use ember_math::{Aabb, Ray, Vec2, Vec3};

use crate::light::{AreaLight, Light};
use crate::material::MaterialDesc;
use crate::mesh::TriMesh;
use crate::trace::{Bvh, Hit, Traversal};

/// Resolved world-space surface interaction.
///
/// `out_dir` points back along the ray toward the previous path vertex.
/// The shading and geometric normals agree in orientation; only refractive
/// materials see `out_dir` on opposite sides of the two.
#[derive(Debug, Copy, Clone)]
pub struct Intersection {
    pub pos: Vec3,
    pub out_dir: Vec3,
    pub distance: f32,
    pub normal: Vec3,
    pub geom_normal: Vec3,
    pub uv: Vec2,
    /// Surface area of the hit triangle, for emission pdfs.
    pub area: f32,
    pub mat_id: u32,
}

impl Default for Intersection {
    fn default() -> Self {
        Self {
            pos: Vec3::ZERO,
            out_dir: Vec3::Z,
            distance: 0.0,
            normal: Vec3::Z,
            geom_normal: Vec3::Z,
            uv: Vec2::ZERO,
            area: 0.0,
            mat_id: 0,
        }
    }
}

/// The scene: geometry, materials, lights, and the traversal handle.
pub struct Scene {
    mesh: TriMesh,
    materials: Vec<MaterialDesc>,
    lights: Vec<Light>,
    env_light: Option<usize>,
    traversal: Box<dyn Traversal>,
    center: Vec3,
    radius: f32,
}

impl Scene {
    /// Build a scene from meshes, a material table, and explicit lights.
    ///
    /// Emissive triangles automatically become area lights. Infinite
    /// lights are bound to the scene bounding sphere.
    pub fn new(meshes: Vec<TriMesh>, materials: Vec<MaterialDesc>, mut lights: Vec<Light>) -> Self {
        let mut mesh = flatten(meshes);
        if mesh.normals.is_none() {
            mesh.compute_normals();
        }

        for tri in 0..mesh.triangle_count() {
            let mat = &materials[mesh.material_ids[tri] as usize];
            if mat.is_emissive() {
                let [v0, v1, v2] = mesh.triangle(tri);
                lights.push(Light::Area(AreaLight::new(v0, v1, v2, mat.emission)));
            }
        }

        let mut bounds = Aabb::EMPTY;
        for p in &mesh.positions {
            bounds.grow(*p);
        }
        let (center, radius) = if mesh.positions.is_empty() {
            (Vec3::ZERO, 1.0)
        } else {
            bounds.bounding_sphere()
        };
        let radius = radius.max(1e-3);

        let mut env_light = None;
        for (i, light) in lights.iter_mut().enumerate() {
            light.set_scene_bounds(center, radius);
            if matches!(light, Light::Environment(_)) {
                env_light = Some(i);
            }
        }

        log::info!(
            "scene: {} triangles, {} materials, {} lights",
            mesh.triangle_count(),
            materials.len(),
            lights.len()
        );

        let traversal = Box::new(Bvh::build(&mesh));
        Self {
            mesh,
            materials,
            lights,
            env_light,
            traversal,
            center,
            radius,
        }
    }

    pub fn mesh(&self) -> &TriMesh {
        &self.mesh
    }

    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    pub fn light(&self, i: usize) -> &Light {
        &self.lights[i]
    }

    pub fn light_count(&self) -> usize {
        self.lights.len()
    }

    /// The environment light, if the scene has one.
    pub fn env_light(&self) -> Option<&Light> {
        self.env_light.map(|i| &self.lights[i])
    }

    /// Center and radius of the scene bounding sphere.
    pub fn bounding_sphere(&self) -> (Vec3, f32) {
        (self.center, self.radius)
    }

    pub fn material(&self, mat_id: u32) -> &MaterialDesc {
        &self.materials[mat_id as usize]
    }

    pub fn material_for(&self, hit: &Hit) -> &MaterialDesc {
        &self.materials[self.mesh.material_ids[hit.tri_id as usize] as usize]
    }

    /// Closest-hit traversal over a packed ray buffer.
    pub fn traverse(&self, rays: &[Ray], hits: &mut [Hit]) {
        self.traversal.closest_hit(rays, hits);
    }

    /// Any-hit (occlusion) traversal over a packed ray buffer.
    pub fn traverse_occluded(&self, rays: &[Ray], hits: &mut [Hit]) {
        self.traversal.any_hit(rays, hits);
    }

    /// Resolve a hit into a world-space interaction record.
    pub fn calculate_intersection(&self, hit: &Hit, ray: &Ray) -> Intersection {
        debug_assert!(hit.is_hit());
        let tri = hit.tri_id as usize;
        let [v0, v1, v2] = self.mesh.triangle(tri);
        let w = 1.0 - hit.u - hit.v;
        let pos = v0 * w + v1 * hit.u + v2 * hit.v;
        let out_dir = -ray.direction().normalize();
        let geom_normal = self.mesh.geom_normal(tri);

        let mut normal = match &self.mesh.normals {
            Some(normals) => {
                let i = tri * 3;
                let n0 = normals[self.mesh.indices[i] as usize];
                let n1 = normals[self.mesh.indices[i + 1] as usize];
                let n2 = normals[self.mesh.indices[i + 2] as usize];
                (n0 * w + n1 * hit.u + n2 * hit.v).normalize_or_zero()
            }
            None => geom_normal,
        };
        // Interpolation can push the shading normal across the surface
        // plane; keep it on the geometric side.
        if normal.dot(geom_normal) < 0.0 {
            normal = -normal;
        }

        let uv = match &self.mesh.uvs {
            Some(uvs) => {
                let i = tri * 3;
                let t0 = uvs[self.mesh.indices[i] as usize];
                let t1 = uvs[self.mesh.indices[i + 1] as usize];
                let t2 = uvs[self.mesh.indices[i + 2] as usize];
                t0 * w + t1 * hit.u + t2 * hit.v
            }
            None => Vec2::new(hit.u, hit.v),
        };

        Intersection {
            pos,
            out_dir,
            distance: hit.t,
            normal,
            geom_normal,
            uv,
            area: self.mesh.area(tri),
            mat_id: self.mesh.material_ids[tri],
        }
    }
}

/// Merge meshes into a single triangle list with shared index space.
fn flatten(meshes: Vec<TriMesh>) -> TriMesh {
    if meshes.len() == 1 {
        return meshes.into_iter().next().unwrap();
    }
    let all_have_normals = meshes.iter().all(|m| m.normals.is_some());
    let all_have_uvs = meshes.iter().all(|m| m.uvs.is_some());

    let mut positions = Vec::new();
    let mut normals = Vec::new();
    let mut uvs = Vec::new();
    let mut indices = Vec::new();
    let mut material_ids = Vec::new();

    for mesh in meshes {
        let base = positions.len() as u32;
        indices.extend(mesh.indices.iter().map(|i| i + base));
        material_ids.extend_from_slice(&mesh.material_ids);
        if all_have_normals {
            normals.extend_from_slice(mesh.normals.as_ref().unwrap());
        }
        if all_have_uvs {
            uvs.extend_from_slice(mesh.uvs.as_ref().unwrap());
        }
        positions.extend_from_slice(&mesh.positions);
    }

    let mut out = TriMesh::new(positions, indices, material_ids);
    if all_have_normals {
        out = out.with_normals(normals);
    }
    if all_have_uvs {
        out = out.with_uvs(uvs);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_tri_scene(mat: MaterialDesc) -> Scene {
        let mesh = TriMesh::new(
            vec![
                Vec3::new(-1.0, -1.0, -3.0),
                Vec3::new(1.0, -1.0, -3.0),
                Vec3::new(0.0, 1.0, -3.0),
            ],
            vec![0, 1, 2],
            vec![0],
        );
        Scene::new(vec![mesh], vec![mat], Vec::new())
    }

    #[test]
    fn test_emissive_triangles_become_lights() {
        let scene = single_tri_scene(MaterialDesc::emissive("lamp", Vec3::ONE));
        assert_eq!(scene.light_count(), 1);
        assert!(matches!(scene.light(0), Light::Area(_)));
    }

    #[test]
    fn test_intersection_record() {
        let scene = single_tri_scene(MaterialDesc::diffuse("white", Vec3::ONE));
        let rays = [Ray::new(Vec3::ZERO, Vec3::NEG_Z, 0.0, f32::MAX)];
        let mut hits = [Hit::miss()];
        scene.traverse(&rays, &mut hits);
        assert!(hits[0].is_hit());

        let isect = scene.calculate_intersection(&hits[0], &rays[0]);
        assert!((isect.pos.z - -3.0).abs() < 1e-5);
        assert_eq!(isect.out_dir, Vec3::Z);
        assert!((isect.distance - 3.0).abs() < 1e-5);
        // Same-side invariant between shading and geometric normal.
        assert!(isect.normal.dot(isect.geom_normal) > 0.0);
        assert!((isect.area - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_flatten_offsets_indices() {
        let tri = |z: f32| {
            TriMesh::new(
                vec![
                    Vec3::new(-1.0, -1.0, z),
                    Vec3::new(1.0, -1.0, z),
                    Vec3::new(0.0, 1.0, z),
                ],
                vec![0, 1, 2],
                vec![0],
            )
        };
        let scene = Scene::new(
            vec![tri(-3.0), tri(-5.0)],
            vec![MaterialDesc::diffuse("white", Vec3::ONE)],
            Vec::new(),
        );
        assert_eq!(scene.mesh().triangle_count(), 2);

        let rays = [Ray::new(Vec3::ZERO, Vec3::NEG_Z, 0.0, f32::MAX)];
        let mut hits = [Hit::miss()];
        scene.traverse(&rays, &mut hits);
        assert!((hits[0].t - 3.0).abs() < 1e-5);
    }
}
