//! The vertex connection and merging integrator family.
//!
//! One implementation covers path tracing, light tracing, bidirectional
//! path tracing, SPPM, and full VCM; the [`Technique`] selects which
//! subpaths are traced and which connection strategies contribute.
//!
//! The MIS bookkeeping follows the recursive partial-weight scheme: every
//! path vertex carries `d_vcm`, `d_vc`, and `d_vm`, the summed relative
//! probabilities of the other strategies having produced the current
//! prefix. Weights at a connection event combine the stored partials with
//! the event's own pdfs, and always reduce to
//! `1 / (1 + sum of other-strategy weights)`.

use std::cell::RefCell;
use std::f32::consts::PI;
use std::sync::Arc;

use ember_core::{AtomicImage, Image, Intersection, PerspectiveCamera, Scene};
use ember_math::sampling::cos_hemisphere_pdf;
use ember_math::{is_black, Ray, Vec3};

use crate::arena::BsdfArena;
use crate::bsdf::{Bsdf, BxdfFlags};
use crate::grid::PhotonGrid;
use crate::integrator::{
    russian_roulette, shading_normal_adjoint, Integrator, MisHeuristic, PathState, Technique,
};
use crate::probes;
use crate::queue::RayQueue;
use crate::ray_gen::PixelRayGen;
use crate::scheduler::{run_shadow_pass, RayScheduler};
use crate::vertex_cache::{LightPathCache, Vertex};

/// Tuning knobs of the family.
#[derive(Debug, Clone)]
pub struct VcmSettings {
    /// Camera samples per pixel per iteration.
    pub samples_per_pixel: u32,
    /// Initial merge radius as a fraction of the scene radius.
    pub radius_scale: f32,
    /// Radius shrink exponent `alpha`.
    pub radius_alpha: f32,
    /// Bound on camera path length; 0 derives it from probe paths.
    pub max_camera_path_len: u32,
    pub max_light_path_len: u32,
    /// Photons gathered by the SPPM kNN merge.
    pub num_knn: usize,
    /// Wavefront size: target fill level of the primary queues.
    pub queue_target: usize,
    pub heuristic: MisHeuristic,
}

impl Default for VcmSettings {
    fn default() -> Self {
        Self {
            samples_per_pixel: 1,
            radius_scale: 0.003,
            radius_alpha: 0.75,
            max_camera_path_len: 0,
            max_light_path_len: 16,
            num_knn: 12,
            queue_target: 1 << 14,
            heuristic: MisHeuristic::Balance,
        }
    }
}

/// RNG salts separating the deferred passes.
const SALT_LIGHT_TO_CAMERA: u32 = 0x4c32_4341;

/// The integrator. One instance renders progressively: each call to
/// [`Integrator::render`] traces one full iteration and accumulates.
pub struct VcmIntegrator {
    scene: Arc<Scene>,
    cam: PerspectiveCamera,
    technique: Technique,
    settings: VcmSettings,

    iteration: u32,
    base_radius: f32,
    pm_radius: f32,
    mis_weight_vc: f32,
    mis_weight_vm: f32,
    light_path_count: f32,

    light_paths: LightPathCache,
    /// Global indices and positions of this iteration's cached vertices.
    light_vertices: Vec<(u32, Vec3)>,
    photon_grid: PhotonGrid,

    scheduler: RayScheduler<PathState>,
    connect_queue: RayQueue<PathState>,

    frame: AtomicImage,
    light_image: AtomicImage,
    pm_image: AtomicImage,
}

impl VcmIntegrator {
    pub fn new(
        scene: Arc<Scene>,
        cam: PerspectiveCamera,
        technique: Technique,
        mut settings: VcmSettings,
    ) -> Self {
        let width = cam.width();
        let height = cam.height();
        let pixel_count = (width * height) as usize;
        let (_, scene_radius) = scene.bounding_sphere();
        let base_radius = settings.radius_scale * scene_radius;

        // Probe a few light paths to size the photon storage.
        let expected_light_len = if technique.traces_light_paths() {
            probes::estimate_light_path_len(&scene, 128)
        } else {
            0
        };
        let mut photon_grid = PhotonGrid::new();
        photon_grid.reserve(pixel_count * expected_light_len as usize);

        // Probe a few camera paths to bound the camera path length; the
        // bound is a havoc guard well above the typical length, Russian
        // roulette does the real termination.
        if settings.max_camera_path_len == 0 {
            settings.max_camera_path_len = if technique.traces_camera_paths() {
                (4 * probes::estimate_cam_path_len(&scene, &cam, 64)).clamp(8, 64)
            } else {
                8
            };
        }
        log::info!(
            "{}: {}x{}, base radius {:.5}, expected light path length {}, camera path bound {}",
            technique.name(),
            width,
            height,
            base_radius,
            expected_light_len,
            settings.max_camera_path_len
        );

        let queue_capacity =
            settings.queue_target + settings.queue_target / 2;
        // Every shaded hit can emit one next-event ray plus one
        // connection per cached light vertex of its pixel.
        let shadow_capacity =
            settings.queue_target * (1 + settings.max_light_path_len as usize);

        Self {
            scheduler: RayScheduler::new(queue_capacity, shadow_capacity),
            connect_queue: RayQueue::new(settings.queue_target),
            light_paths: LightPathCache::new(
                pixel_count,
                settings.max_light_path_len as usize,
            ),
            light_vertices: Vec::with_capacity(pixel_count * expected_light_len as usize),
            photon_grid,
            frame: AtomicImage::new(width, height),
            light_image: AtomicImage::new(width, height),
            pm_image: AtomicImage::new(width, height),
            light_path_count: pixel_count as f32,
            iteration: 0,
            base_radius,
            pm_radius: base_radius,
            mis_weight_vc: 0.0,
            mis_weight_vm: 0.0,
            scene,
            cam,
            technique,
            settings,
        }
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Current merge radius (shrinks every iteration).
    pub fn merge_radius(&self) -> f32 {
        self.pm_radius
    }

    fn begin_iteration(&mut self) {
        self.iteration += 1;

        // Shrinking radius schedule: r_k = r_0 * k^(-(1 - alpha)/2).
        self.pm_radius = self.base_radius
            / (self.iteration as f32).powf(0.5 * (1.0 - self.settings.radius_alpha));
        self.pm_radius = self.pm_radius.max(1e-7);

        let h = self.settings.heuristic;
        let eta_vcm = PI * self.pm_radius * self.pm_radius * self.light_path_count;
        self.mis_weight_vc = h.h(1.0 / eta_vcm);
        self.mis_weight_vm = if self.technique.merging() {
            h.h(eta_vcm)
        } else {
            0.0
        };

        self.light_paths.clear();
        self.light_vertices.clear();
        self.frame.clear();
        self.light_image.clear();
        self.pm_image.clear();
    }

    fn trace_light_paths(&mut self) {
        let scene = &*self.scene;
        let cache = &self.light_paths;
        let h = self.settings.heuristic;
        let mis_vc = self.mis_weight_vc;
        let mis_vm = self.mis_weight_vm;
        let max_len = self.settings.max_light_path_len;
        let light_count = scene.light_count() as u32;
        let pdf_lightpick = 1.0 / light_count as f32;

        let mut gen = PixelRayGen::new(
            self.cam.width(),
            self.cam.height(),
            1,
            self.settings.queue_target,
        );
        gen.start_frame(self.iteration);

        self.scheduler.run_iteration(
            scene,
            &mut gen,
            |_, _, pixel_id, sample_id, mut rng| {
                // Pick one light uniformly and start a particle on it.
                let light_i = rng.random_int(0, light_count);
                let light = scene.light(light_i as usize);
                let sample = light.sample_emit(&mut rng);
                if sample.pdf_emit_w == 0.0 || is_black(sample.radiance) {
                    return None;
                }

                let mut state = PathState {
                    pixel_id,
                    sample_id,
                    throughput: sample.radiance / pdf_lightpick,
                    path_length: 1,
                    continue_prob: 1.0,
                    last_specular: false,
                    d_vcm: h.h(sample.pdf_direct_a / sample.pdf_emit_w),
                    d_vc: 0.0,
                    d_vm: 0.0,
                    ancestor: -1,
                    is_finite: light.is_finite(),
                    rng,
                };
                if !light.is_delta() {
                    state.d_vc = h.h(
                        sample.cos_out / (sample.pdf_emit_w * pdf_lightpick),
                    );
                }
                state.d_vm = state.d_vc * mis_vc;

                Some((Ray::new(sample.pos, sample.dir, 1e-4, f32::MAX), state))
            },
            |ray, hit, state, out, _shadow, arena| {
                if !hit.is_hit() {
                    return;
                }
                let isect = scene.calculate_intersection(hit, ray);
                let cos_theta_o = isect.out_dir.dot(isect.normal).abs();
                if cos_theta_o == 0.0 {
                    return;
                }

                // Finish the solid-angle to area conversion of the
                // partial weights. Infinite lights skip the squared
                // distance on their first segment.
                if state.path_length > 1 || state.is_finite {
                    state.d_vcm *= h.h(isect.distance * isect.distance);
                }
                state.d_vcm /= h.h(cos_theta_o);
                state.d_vc /= h.h(cos_theta_o);
                state.d_vm /= h.h(cos_theta_o);

                let mat = scene.material(isect.mat_id);
                let bsdf_id = arena.alloc(Bsdf::prepare(mat, &isect));
                let bsdf = *arena.get(bsdf_id);

                // Delta vertices cannot be connected or merged against.
                if !bsdf.is_specular() {
                    state.ancestor = cache.append(
                        state.pixel_id,
                        Vertex {
                            isect,
                            throughput: state.throughput,
                            continue_prob: state.continue_prob,
                            d_vc: state.d_vc,
                            d_vcm: state.d_vcm,
                            d_vm: state.d_vm,
                            path_length: state.path_length,
                            pixel_id: state.pixel_id,
                            ancestor: state.ancestor,
                        },
                    );
                }

                bounce(
                    state, &isect, &bsdf, out, true, BxdfFlags::ALL, max_len, h, mis_vc,
                    mis_vm,
                );
            },
            |_, _| {},
        );

        for (idx, v) in self.light_paths.iter() {
            self.light_vertices.push((idx, v.isect.pos));
        }
        log::debug!(
            "iteration {}: {} light vertices cached",
            self.iteration,
            self.light_vertices.len()
        );
    }

    /// Deferred pass: connect every cached light vertex to the camera.
    fn connect_to_camera(&mut self) {
        let scene = &*self.scene;
        let cam = &self.cam;
        let cache = &self.light_paths;
        let technique = self.technique;
        let h = self.settings.heuristic;
        let mis_vm = self.mis_weight_vm;
        let light_path_count = self.light_path_count;
        let light_image = &self.light_image;
        let vertices = &self.light_vertices;

        run_shadow_pass(
            scene,
            &mut self.connect_queue,
            vertices.len(),
            SALT_LIGHT_TO_CAMERA,
            self.iteration,
            |item, rng| {
                let v = cache.get(vertices[item as usize].0 as i32);

                let mut dir_to_cam = cam.pos() - v.isect.pos;
                if (-dir_to_cam).dot(cam.dir()) < 0.0 {
                    return None; // behind the camera
                }
                let raster = cam.world_to_raster(v.isect.pos);
                let pixel_id = cam.raster_to_id(raster);
                if pixel_id < 0 {
                    return None; // outside the image plane
                }

                let dist_sqr = dir_to_cam.length_squared();
                let dist = dist_sqr.sqrt();
                dir_to_cam /= dist;

                let mat = scene.material(v.isect.mat_id);
                let bsdf = Bsdf::prepare(mat, &v.isect);
                let bsdf_value = bsdf.eval(v.isect.out_dir, dir_to_cam)
                    * shading_normal_adjoint(&v.isect, dir_to_cam, v.isect.out_dir);
                if is_black(bsdf_value) {
                    return None;
                }
                let pdf_rev_w = bsdf.pdf(dir_to_cam, v.isect.out_dir);

                // Conversion between image-plane area and surface area.
                // The surface cosine is the adjoint one, matching the
                // evaluation above.
                let cos_cam = cam.dir().dot(-dir_to_cam).abs();
                let cos_surf = shading_normal_adjoint(&v.isect, dir_to_cam, v.isect.out_dir)
                    * v.isect.normal.dot(dir_to_cam).abs();
                let d_ip = cam.image_plane_dist();
                let img_to_surf =
                    d_ip * d_ip / (dist_sqr * cos_cam * cos_cam * cos_cam);
                let pdf_cam_area = img_to_surf * cos_surf;

                let mis_weight_light = h.h(pdf_cam_area / light_path_count)
                    * (mis_vm + v.d_vcm + v.d_vc * h.h(pdf_rev_w * v.continue_prob));
                let weight = if technique == Technique::LightTracing {
                    1.0
                } else {
                    1.0 / (mis_weight_light + 1.0)
                };

                // The cosine at the surface is already inside bsdf_value;
                // img_to_surf carries the rest of the conversion.
                let contrib =
                    v.throughput * bsdf_value * (weight * img_to_surf / light_path_count);
                if is_black(contrib) || !contrib.is_finite() {
                    return None;
                }

                let state = PathState {
                    pixel_id: pixel_id as u32,
                    throughput: contrib,
                    rng,
                    ..PathState::default()
                };

                let offset = 1e-4 * dist;
                Some((
                    Ray::new(v.isect.pos, dir_to_cam, offset, dist - offset),
                    state,
                ))
            },
            |state| {
                light_image.add(state.pixel_id, state.throughput);
            },
        );
    }

    fn trace_camera_paths(&mut self) {
        let scene = &*self.scene;
        let cam = &self.cam;
        let cache = &self.light_paths;
        let grid = &self.photon_grid;
        let technique = self.technique;
        let h = self.settings.heuristic;
        let mis_vc = self.mis_weight_vc;
        let mis_vm = self.mis_weight_vm;
        let pm_radius = self.pm_radius;
        let num_knn = self.settings.num_knn;
        let max_len = self.settings.max_camera_path_len;
        let light_path_count = self.light_path_count;
        let light_count = scene.light_count() as u32;
        let frame = &self.frame;
        let pm_image = &self.pm_image;
        // The frame accumulates one iteration estimate per pixel, so the
        // camera samples of an iteration are averaged, not summed.
        let inv_spp = 1.0 / self.settings.samples_per_pixel as f32;

        let mut gen = PixelRayGen::new(
            cam.width(),
            cam.height(),
            self.settings.samples_per_pixel,
            self.settings.queue_target,
        );
        gen.start_frame(self.iteration);

        self.scheduler.run_iteration(
            scene,
            &mut gen,
            |x, y, pixel_id, sample_id, mut rng| {
                let sample_x = x as f32 + rng.random_float();
                let sample_y = y as f32 + rng.random_float();
                let ray = cam.generate_ray(sample_x, sample_y);

                let pdf_cam_w = cam.pdf(ray.direction());
                let state = PathState {
                    pixel_id,
                    sample_id,
                    throughput: Vec3::splat(inv_spp),
                    path_length: 1,
                    continue_prob: 1.0,
                    last_specular: false,
                    d_vc: 0.0,
                    d_vm: 0.0,
                    d_vcm: h.h(light_path_count / pdf_cam_w),
                    ancestor: -1,
                    is_finite: true,
                    rng,
                };
                Some((ray, state))
            },
            |ray, hit, state, out, shadow, arena| {
                if !hit.is_hit() {
                    env_radiance(
                        scene, state, ray, technique, h, light_count, frame,
                    );
                    return;
                }
                let isect = scene.calculate_intersection(hit, ray);
                let cos_theta_o = isect.out_dir.dot(isect.normal).abs();
                if cos_theta_o == 0.0 {
                    return;
                }

                let mat = scene.material(isect.mat_id);
                let bsdf_id = arena.alloc(Bsdf::prepare(mat, &isect));
                let bsdf = *arena.get(bsdf_id);

                if technique.camera_specular_only() {
                    // SPPM camera pass: gather at the first non-delta
                    // vertex, extend only through delta lobes.
                    if mat.is_emissive() {
                        let cos_out = isect.normal.dot(isect.out_dir);
                        if cos_out > 0.0 {
                            frame.add(state.pixel_id, state.throughput * mat.emission);
                        }
                    }
                    if !bsdf.is_specular() {
                        vertex_merging(
                            state, &isect, &bsdf, cache, grid, technique, h, mis_vc,
                            pm_radius, num_knn, light_path_count, pm_image,
                        );
                    }
                    bounce(
                        state,
                        &isect,
                        &bsdf,
                        out,
                        false,
                        BxdfFlags::SPECULAR_ONLY,
                        max_len,
                        h,
                        mis_vc,
                        mis_vm,
                    );
                    return;
                }

                // Convert the partial weights from solid angle to area.
                state.d_vcm *=
                    h.h(isect.distance * isect.distance) / h.h(cos_theta_o);
                state.d_vc /= h.h(cos_theta_o);
                state.d_vm /= h.h(cos_theta_o);

                if mat.is_emissive() {
                    emissive_hit(
                        state, &isect, mat.emission, technique, h, light_count, frame,
                    );
                }

                if technique.next_event() && !bsdf.is_specular() {
                    direct_illum(
                        state, &isect, &bsdf, scene, technique, h, mis_vm, shadow,
                    );
                }

                if technique.connections() && !bsdf.is_specular() {
                    connect(
                        state, &isect, bsdf_id, arena, scene, cache, h, mis_vm,
                        pm_radius, shadow,
                    );
                }

                if technique.merging() && !bsdf.is_specular() {
                    vertex_merging(
                        state, &isect, &bsdf, cache, grid, technique, h, mis_vc,
                        pm_radius, num_knn, light_path_count, pm_image,
                    );
                }

                bounce(
                    state, &isect, &bsdf, out, false, BxdfFlags::ALL, max_len, h,
                    mis_vc, mis_vm,
                );
            },
            |hit, state| {
                // Unoccluded shadow rays deliver their contribution.
                if !hit.is_hit() {
                    frame.add(state.pixel_id, state.throughput);
                }
            },
        );
    }

    fn build_photon_grid(&mut self) {
        self.photon_grid
            .build(&self.light_vertices, self.pm_radius);
    }
}

impl Integrator for VcmIntegrator {
    fn render(&mut self, img: &mut Image) {
        self.begin_iteration();

        if self.technique.traces_light_paths() {
            self.trace_light_paths();
            if self.technique.merging() {
                self.build_photon_grid();
            }
            if self.technique.light_to_camera() {
                self.connect_to_camera();
            }
        }

        if self.technique.traces_camera_paths() {
            self.trace_camera_paths();
        }

        // Merge the per-strategy accumulation targets.
        self.frame.accumulate_into(img);
        self.light_image.accumulate_into(img);
        self.pm_image.accumulate_into(img);
        log::debug!("iteration {} done", self.iteration);
    }
}

/// Extend a path by one bounce: Russian roulette, BSDF sampling, MIS
/// partial-weight update, throughput update, re-enqueue.
#[allow(clippy::too_many_arguments)]
fn bounce(
    state: &mut PathState,
    isect: &Intersection,
    bsdf: &Bsdf,
    out: &RayQueue<PathState>,
    adjoint: bool,
    flags: BxdfFlags,
    max_len: u32,
    h: MisHeuristic,
    mis_vc: f32,
    mis_vm: f32,
) {
    if state.path_length >= max_len {
        return;
    }
    let u = state.rng.random_float();
    let Some(rr_pdf) = russian_roulette(state.throughput, u) else {
        return;
    };

    let sample = bsdf.sample(isect.out_dir, &mut state.rng, flags);
    if sample.pdf_w == 0.0 || is_black(sample.value) {
        return;
    }
    let specular = sample.flags.contains(BxdfFlags::SPECULAR);

    // The reverse pdf of a delta lobe equals the forward one by symmetry
    // and cannot be evaluated.
    let pdf_rev_w = if specular {
        sample.pdf_w
    } else {
        bsdf.pdf(sample.in_dir, isect.out_dir)
    };

    let cos_theta_i = sample.in_dir.dot(isect.normal).abs();

    let mut next = state.clone();
    if specular {
        next.d_vcm = 0.0;
        next.d_vc *= h.h(cos_theta_i);
        next.d_vm *= h.h(cos_theta_i);
    } else {
        next.d_vc = h.h(cos_theta_i / (sample.pdf_w * rr_pdf))
            * (next.d_vc * h.h(pdf_rev_w * rr_pdf) + next.d_vcm + mis_vm);
        next.d_vm = h.h(cos_theta_i / (sample.pdf_w * rr_pdf))
            * (next.d_vm * h.h(pdf_rev_w * rr_pdf) + next.d_vcm + mis_vc);
        next.d_vcm = h.h(1.0 / (sample.pdf_w * rr_pdf));
    }

    let correction = if adjoint {
        shading_normal_adjoint(isect, sample.in_dir, isect.out_dir)
    } else {
        1.0
    };

    next.throughput *= sample.value * (correction / (rr_pdf * sample.pdf_w));
    if !next.throughput.is_finite() || next.throughput.min_element() < 0.0 {
        return;
    }
    next.path_length += 1;
    next.continue_prob = rr_pdf;
    next.last_specular = specular;

    let offset = 1e-4 * isect.distance.max(1e-2);
    out.push(
        Ray::new(isect.pos, sample.in_dir, offset, f32::MAX),
        next,
    );
}

/// Camera ray escaped the scene: environment light contribution.
fn env_radiance(
    scene: &Scene,
    state: &PathState,
    ray: &Ray,
    technique: Technique,
    h: MisHeuristic,
    light_count: u32,
    frame: &AtomicImage,
) {
    let Some(env) = scene.env_light() else {
        return;
    };
    let lr = env.radiance(-ray.direction());
    if is_black(lr.radiance) {
        return;
    }

    if state.path_length == 1 {
        frame.add(state.pixel_id, state.throughput * lr.radiance);
        return;
    }

    // For an infinite light both returned pdfs are already solid-angle
    // densities, matching the unconverted partials.
    let weight = if !technique.next_event()
        || (technique == Technique::PathTracing && state.last_specular)
    {
        // No competing strategy can reach the environment.
        1.0
    } else {
        let pdf_lightpick = 1.0 / light_count as f32;
        let w_camera = h.h(lr.pdf_direct_a * pdf_lightpick) * state.d_vcm
            + if technique.bidirectional_mis() {
                h.h(lr.pdf_emit_w * pdf_lightpick) * state.d_vc
            } else {
                0.0
            };
        1.0 / (1.0 + w_camera)
    };
    frame.add(state.pixel_id, state.throughput * lr.radiance * weight);
}

/// A camera ray hit an emissive surface.
#[allow(clippy::too_many_arguments)]
fn emissive_hit(
    state: &PathState,
    isect: &Intersection,
    emission: Vec3,
    technique: Technique,
    h: MisHeuristic,
    light_count: u32,
    frame: &AtomicImage,
) {
    // Emission only leaves the side the normal points into.
    let cos_out = isect.normal.dot(isect.out_dir);
    if cos_out <= 0.0 {
        return;
    }

    if state.path_length == 1 {
        // Directly visible light: the only strategy, no weighting.
        frame.add(state.pixel_id, state.throughput * emission);
        return;
    }

    let weight = if technique == Technique::PathTracing && state.last_specular {
        // After a delta bounce no other strategy could have produced
        // this path; skip the pdf evaluations.
        1.0
    } else {
        let pdf_lightpick = 1.0 / light_count as f32;
        let pdf_direct_a = 1.0 / isect.area;
        let pdf_emit_w = cos_hemisphere_pdf(cos_out) / isect.area;

        let w_camera = h.h(pdf_direct_a * pdf_lightpick) * state.d_vcm
            + if technique.bidirectional_mis() {
                h.h(pdf_emit_w * pdf_lightpick) * state.d_vc
            } else {
                0.0
            };
        1.0 / (1.0 + w_camera)
    };

    frame.add(state.pixel_id, state.throughput * emission * weight);
}

/// Next-event estimation: sample one light, queue a weighted shadow ray.
#[allow(clippy::too_many_arguments)]
fn direct_illum(
    state: &mut PathState,
    isect: &Intersection,
    bsdf: &Bsdf,
    scene: &Scene,
    technique: Technique,
    h: MisHeuristic,
    mis_vm: f32,
    shadow: &RayQueue<PathState>,
) {
    let light_count = scene.light_count() as u32;
    let light_i = state.rng.random_int(0, light_count);
    let light = scene.light(light_i as usize);
    let inv_pdf_lightpick = light_count as f32;

    let sample = light.sample_direct(isect.pos, &mut state.rng);
    if sample.pdf_direct_w == 0.0 || is_black(sample.radiance) {
        return;
    }

    let cos_theta_i = isect.normal.dot(sample.dir).abs();
    let bsdf_value = bsdf.eval(isect.out_dir, sample.dir);
    if is_black(bsdf_value) {
        return;
    }
    let pdf_dir_w = bsdf.pdf(isect.out_dir, sample.dir);
    let pdf_rev_w = bsdf.pdf(sample.dir, isect.out_dir);

    // Delta lights cannot be hit by BSDF sampling.
    let pdf_forward = if light.is_delta() {
        0.0
    } else {
        state.continue_prob * pdf_dir_w
    };
    let pdf_reverse = state.continue_prob * pdf_rev_w;

    let mis_weight_light = h.h(pdf_forward * inv_pdf_lightpick / sample.pdf_direct_w);
    let mis_weight_camera = if technique.bidirectional_mis() {
        h.h(sample.pdf_emit_w * cos_theta_i / (sample.pdf_direct_w * sample.cos_out))
            * (mis_vm + state.d_vcm + state.d_vc * h.h(pdf_reverse))
    } else {
        0.0
    };
    let weight = 1.0 / (mis_weight_camera + 1.0 + mis_weight_light);

    let contrib = state.throughput * bsdf_value * sample.radiance
        * (weight * inv_pdf_lightpick / sample.pdf_direct_w);
    if is_black(contrib) || !contrib.is_finite() {
        return;
    }

    let mut s = state.clone();
    s.throughput = contrib;

    let offset = 1e-3
        * if sample.distance == f32::MAX {
            1.0
        } else {
            sample.distance
        };
    shadow.push(
        Ray::new(isect.pos, sample.dir, offset, sample.distance - offset),
        s,
    );
}

/// Bidirectional connections: join the camera vertex with every cached
/// light vertex of its pixel's light path.
#[allow(clippy::too_many_arguments)]
fn connect(
    state: &PathState,
    isect: &Intersection,
    cam_bsdf: crate::arena::BsdfId,
    arena: &mut BsdfArena,
    scene: &Scene,
    cache: &LightPathCache,
    h: MisHeuristic,
    mis_vm: f32,
    pm_radius: f32,
    shadow: &RayQueue<PathState>,
) {
    for light_vertex in cache.path(state.pixel_id) {
        let mut connect_dir = light_vertex.isect.pos - isect.pos;
        let connect_dist_sqr = connect_dir.length_squared();
        let connect_dist = connect_dist_sqr.sqrt();
        connect_dir /= connect_dist;

        // Two points closer than the merge radius usually share a surface
        // and a near-zero cosine; connecting them produces fireflies that
        // take forever to average out.
        if connect_dist < pm_radius {
            continue;
        }

        let light_mat = scene.material(light_vertex.isect.mat_id);
        let light_bsdf_id = arena.alloc(Bsdf::prepare(light_mat, &light_vertex.isect));
        let light_bsdf = arena.get(light_bsdf_id);
        let cam_bsdf = arena.get(cam_bsdf);

        let bsdf_value_cam = cam_bsdf.eval(isect.out_dir, connect_dir);
        let pdf_dir_cam_w = cam_bsdf.pdf(isect.out_dir, connect_dir);
        let pdf_rev_cam_w = cam_bsdf.pdf(connect_dir, isect.out_dir);

        let bsdf_value_light = light_bsdf.eval(light_vertex.isect.out_dir, -connect_dir)
            * shading_normal_adjoint(
                &light_vertex.isect,
                -connect_dir,
                light_vertex.isect.out_dir,
            );
        let pdf_dir_light_w = light_bsdf.pdf(light_vertex.isect.out_dir, -connect_dir);
        let pdf_rev_light_w = light_bsdf.pdf(-connect_dir, light_vertex.isect.out_dir);

        // A zero pdf on either side means zero contribution too.
        if pdf_dir_cam_w == 0.0
            || pdf_dir_light_w == 0.0
            || is_black(bsdf_value_cam)
            || is_black(bsdf_value_light)
        {
            continue;
        }

        let cos_cam = isect.normal.dot(connect_dir).abs();
        let cos_light = light_vertex.isect.normal.dot(-connect_dir).abs();

        // Both cosines live inside the folded evaluations.
        let geom_term = 1.0 / connect_dist_sqr;

        let pdf_cam_a =
            pdf_dir_cam_w * state.continue_prob * cos_light / connect_dist_sqr;
        let pdf_light_a =
            pdf_dir_light_w * light_vertex.continue_prob * cos_cam / connect_dist_sqr;

        let mis_weight_light = h.h(pdf_cam_a)
            * (mis_vm
                + light_vertex.d_vcm
                + light_vertex.d_vc * h.h(pdf_rev_light_w * light_vertex.continue_prob));
        let mis_weight_camera = h.h(pdf_light_a)
            * (mis_vm + state.d_vcm + state.d_vc * h.h(pdf_rev_cam_w * state.continue_prob));
        let mis_weight = 1.0 / (mis_weight_camera + 1.0 + mis_weight_light);

        let contrib = state.throughput
            * light_vertex.throughput
            * bsdf_value_cam
            * bsdf_value_light
            * (mis_weight * geom_term);
        if is_black(contrib) || !contrib.is_finite() {
            continue;
        }

        let mut s = state.clone();
        s.throughput = contrib;

        let offset = 1e-4 * connect_dist;
        shadow.push(
            Ray::new(isect.pos, connect_dir, offset, connect_dist - offset),
            s,
        );
    }
}

thread_local! {
    /// Photon scratch for the merge loop, one per shading worker.
    static PHOTONS: RefCell<Vec<(u32, f32)>> = const { RefCell::new(Vec::new()) };
}

/// Vertex merging: gather cached light vertices around the camera vertex
/// and splat their density-estimated contribution.
#[allow(clippy::too_many_arguments)]
fn vertex_merging(
    state: &PathState,
    isect: &Intersection,
    bsdf: &Bsdf,
    cache: &LightPathCache,
    grid: &PhotonGrid,
    technique: Technique,
    h: MisHeuristic,
    mis_vc: f32,
    pm_radius: f32,
    num_knn: usize,
    light_path_count: f32,
    pm_image: &AtomicImage,
) {
    PHOTONS.with(|photons| {
        let mut photons = photons.borrow_mut();
        let sppm = technique == Technique::Sppm;
        if sppm {
            grid.knn(isect.pos, num_knn, &mut photons);
        } else {
            grid.range_query(isect.pos, pm_radius, &mut photons);
        }
        if photons.is_empty() {
            return;
        }

        // The kNN variant shrinks the kernel to the farthest gathered
        // photon when the neighbourhood is full.
        let radius_sqr = if sppm && photons.len() == num_knn {
            photons.last().unwrap().1
        } else {
            pm_radius * pm_radius
        };
        if radius_sqr == 0.0 {
            return;
        }

        let mut contrib = Vec3::ZERO;
        for &(idx, dist_sqr) in photons.iter() {
            let photon = cache.get(idx as i32);
            let photon_in_dir = photon.isect.out_dir;

            let bsdf_value = bsdf.eval(isect.out_dir, photon_in_dir);
            let pdf_dir_w = bsdf.pdf(isect.out_dir, photon_in_dir);
            let pdf_rev_w = bsdf.pdf(photon_in_dir, isect.out_dir);
            if pdf_dir_w == 0.0 || pdf_rev_w == 0.0 || is_black(bsdf_value) {
                continue;
            }

            let mis_weight_light = photon.d_vcm * mis_vc
                + photon.d_vm * h.h(pdf_dir_w * state.continue_prob);
            let mis_weight_camera =
                state.d_vcm * mis_vc + state.d_vm * h.h(pdf_rev_w * state.continue_prob);
            let mis_weight = if sppm {
                1.0
            } else {
                1.0 / (mis_weight_light + 1.0 + mis_weight_camera)
            };

            // Epanechnikov kernel; the 2 / (pi r^2) factor is applied once
            // outside the loop.
            let kernel = 1.0 - dist_sqr / radius_sqr;
            if kernel <= 0.0 {
                continue;
            }

            // eval folded the cosine at the photon direction, which does
            // not belong in a density estimate; divide it back out.
            let cos_photon = photon_in_dir.dot(isect.normal).abs();
            if cos_photon == 0.0 {
                continue;
            }
            contrib += bsdf_value * photon.throughput * (mis_weight * kernel / cos_photon);
        }

        contrib *= 2.0 / (PI * radius_sqr * light_path_count);
        if is_black(contrib) || !contrib.is_finite() {
            return;
        }
        pm_image.add(state.pixel_id, state.throughput * contrib);
    });
}
