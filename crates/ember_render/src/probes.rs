//! Path-length probes.
//!
//! A handful of sequential probe paths estimate the average subpath
//! length before the first iteration: the light-side estimate sizes the
//! photon storage, the camera-side estimate bounds the camera path
//! length, both without reallocation or tuning mid-render.

use ember_core::{Hit, PerspectiveCamera, Scene, TRAVERSAL_BLOCK};
use ember_math::{bernstein_seed, is_black, Ray, Rng, Vec3};

use crate::bsdf::{Bsdf, BxdfFlags};
use crate::integrator::russian_roulette;

const LIGHT_PROBE_SALT: u32 = 0x5052_4f42;
const CAM_PROBE_SALT: u32 = 0x5052_4f43;
const PROBE_MAX_BOUNCES: usize = 64;

/// Follow one probe path from `rays[0]`, counting surface vertices until
/// the path escapes, is absorbed, or runs out of bounces.
fn follow_probe(
    scene: &Scene,
    rng: &mut Rng,
    rays: &mut [Ray; TRAVERSAL_BLOCK],
    hits: &mut [Hit; TRAVERSAL_BLOCK],
    mut throughput: Vec3,
) -> u64 {
    let mut vertex_count = 0;
    for _ in 0..PROBE_MAX_BOUNCES {
        scene.traverse(rays, hits);
        if !hits[0].is_hit() {
            break;
        }
        let isect = scene.calculate_intersection(&hits[0], &rays[0]);
        vertex_count += 1;

        let Some(rr_pdf) = russian_roulette(throughput, rng.random_float()) else {
            break;
        };
        let bsdf = Bsdf::prepare(scene.material(isect.mat_id), &isect);
        let s = bsdf.sample(isect.out_dir, rng, BxdfFlags::ALL);
        if s.pdf_w == 0.0 || is_black(s.value) {
            break;
        }
        throughput *= s.value / (rr_pdf * s.pdf_w);

        let offset = 1e-4 * isect.distance.max(1e-2);
        rays[0] = Ray::new(isect.pos, s.in_dir, offset, f32::MAX);
    }
    rays[0] = Ray::inert();
    vertex_count
}

/// Average number of vertices on a light subpath, rounded up. At least 1.
pub fn estimate_light_path_len(scene: &Scene, probe_count: u32) -> u32 {
    if scene.light_count() == 0 || probe_count == 0 {
        return 1;
    }

    let mut rays = [Ray::inert(); TRAVERSAL_BLOCK];
    let mut hits = [Hit::miss(); TRAVERSAL_BLOCK];
    let mut vertex_count = 0u64;

    for probe in 0..probe_count {
        let mut rng = Rng::new(bernstein_seed(probe, LIGHT_PROBE_SALT, 0));
        let light_i = rng.random_int(0, scene.light_count() as u32);
        let sample = scene.light(light_i as usize).sample_emit(&mut rng);
        if sample.pdf_emit_w == 0.0 || is_black(sample.radiance) {
            continue;
        }
        // The emission vertex counts too.
        vertex_count += 1;
        rays[0] = Ray::new(sample.pos, sample.dir, 1e-4, f32::MAX);
        let throughput = sample.radiance * scene.light_count() as f32;
        vertex_count += follow_probe(scene, &mut rng, &mut rays, &mut hits, throughput);
    }

    ((vertex_count as f64 / probe_count as f64).ceil() as u32).max(1)
}

/// Average number of vertices on a camera subpath, rounded up. At least 1.
pub fn estimate_cam_path_len(scene: &Scene, cam: &PerspectiveCamera, probe_count: u32) -> u32 {
    if probe_count == 0 {
        return 1;
    }

    let mut rays = [Ray::inert(); TRAVERSAL_BLOCK];
    let mut hits = [Hit::miss(); TRAVERSAL_BLOCK];
    let mut vertex_count = 0u64;

    for probe in 0..probe_count {
        let mut rng = Rng::new(bernstein_seed(probe, CAM_PROBE_SALT, 0));
        let x = rng.random_float() * cam.width() as f32;
        let y = rng.random_float() * cam.height() as f32;
        rays[0] = cam.generate_ray(x, y);
        vertex_count += follow_probe(scene, &mut rng, &mut rays, &mut hits, Vec3::ONE);
    }

    ((vertex_count as f64 / probe_count as f64).ceil() as u32).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::{MaterialDesc, TriMesh};

    fn open_scene() -> Scene {
        // Emissive ceiling over a diffuse floor, open on all sides: paths
        // average a couple of vertices.
        let floor = TriMesh::new(
            vec![
                Vec3::new(-1.0, 0.0, -1.0),
                Vec3::new(1.0, 0.0, -1.0),
                Vec3::new(1.0, 0.0, 1.0),
                Vec3::new(-1.0, 0.0, 1.0),
            ],
            vec![0, 1, 2, 0, 2, 3],
            vec![0, 0],
        );
        let ceiling = TriMesh::new(
            vec![
                Vec3::new(-0.3, 1.0, -0.3),
                Vec3::new(0.3, 1.0, 0.3),
                Vec3::new(0.3, 1.0, -0.3),
            ],
            vec![0, 1, 2],
            vec![1],
        );
        Scene::new(
            vec![floor, ceiling],
            vec![
                MaterialDesc::diffuse("floor", Vec3::splat(0.7)),
                MaterialDesc::emissive("lamp", Vec3::splat(5.0)),
            ],
            Vec::new(),
        )
    }

    #[test]
    fn test_light_estimate_in_open_scene() {
        let est = estimate_light_path_len(&open_scene(), 64);
        assert!(est >= 1 && est < 16, "estimate = {est}");
    }

    #[test]
    fn test_cam_estimate_in_open_scene() {
        // Camera above the floor looking down: probes hit the floor and
        // mostly escape after a bounce or two.
        let cam = PerspectiveCamera::new(
            32,
            32,
            Vec3::new(0.0, 2.0, 2.0),
            Vec3::ZERO,
            Vec3::Y,
            60.0,
        );
        let est = estimate_cam_path_len(&open_scene(), &cam, 64);
        assert!(est >= 1 && est < 16, "estimate = {est}");
    }

    #[test]
    fn test_estimates_without_geometry_hit() {
        let mesh = TriMesh::new(
            vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            vec![0, 1, 2],
            vec![0],
        );
        let scene = Scene::new(
            vec![mesh],
            vec![MaterialDesc::diffuse("only", Vec3::ONE)],
            Vec::new(),
        );
        assert_eq!(estimate_light_path_len(&scene, 16), 1);
        // Camera looking straight away from the triangle: every probe
        // escapes without a hit.
        let cam = PerspectiveCamera::new(
            8,
            8,
            Vec3::new(0.0, 0.0, 5.0),
            Vec3::new(0.0, 0.0, 10.0),
            Vec3::Y,
            60.0,
        );
        assert_eq!(estimate_cam_path_len(&scene, &cam, 16), 1);
    }
}
