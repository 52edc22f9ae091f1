//! Light sources.
//!
//! Every light answers three questions: how to sample it for next-event
//! estimation from a shade point (`sample_direct`), how to start a light
//! subpath on it (`sample_emit`), and what a ray that hits it directly sees
//! (`radiance`). The pdf bookkeeping follows the usual bidirectional
//! conventions: `pdf_direct` is the density of next-event sampling,
//! `pdf_emit` the density of emission sampling, in the measure indicated by
//! the `_w` (solid angle) or `_a` (area) suffix.

use ember_math::sampling::{
    local_coordinates, local_to_world, sample_concentric_disk, sample_cos_hemisphere,
    sample_uniform_sphere, sample_uniform_triangle,
};
use ember_math::{Rng, Vec3};
use std::f32::consts::PI;

/// Result of next-event sampling toward a light.
#[derive(Debug, Copy, Clone)]
pub struct DirectSample {
    /// Unit direction from the shade point toward the light.
    pub dir: Vec3,
    /// Distance to the sampled point (`f32::MAX` for infinite lights).
    pub distance: f32,
    /// Radiance arriving along `dir`.
    pub radiance: Vec3,
    /// Solid-angle pdf of having sampled `dir` this way.
    pub pdf_direct_w: f32,
    /// Solid-angle pdf of emission sampling producing the same connection.
    pub pdf_emit_w: f32,
    /// Cosine at the light between its normal and the outgoing direction.
    pub cos_out: f32,
}

/// Result of sampling an emitted ray from a light.
#[derive(Debug, Copy, Clone)]
pub struct EmitSample {
    pub pos: Vec3,
    pub dir: Vec3,
    /// Emitted radiance already divided by `pdf_emit_w`, so a light path
    /// starts with `throughput = radiance / pdf_lightpick`.
    pub radiance: Vec3,
    /// Area pdf of next-event sampling hitting the same point.
    pub pdf_direct_a: f32,
    /// Full emission pdf (position times direction) in solid-angle form.
    pub pdf_emit_w: f32,
    /// Cosine between the light normal and the emitted direction.
    pub cos_out: f32,
}

/// Radiance seen by a ray that hits (or escapes to) the light directly.
#[derive(Debug, Copy, Clone)]
pub struct LightRadiance {
    pub radiance: Vec3,
    pub pdf_direct_a: f32,
    pub pdf_emit_w: f32,
}

impl LightRadiance {
    pub const BLACK: Self = Self {
        radiance: Vec3::ZERO,
        pdf_direct_a: 0.0,
        pdf_emit_w: 0.0,
    };
}

/// An emissive triangle.
#[derive(Debug, Clone)]
pub struct AreaLight {
    v0: Vec3,
    v1: Vec3,
    v2: Vec3,
    normal: Vec3,
    area: f32,
    radiance: Vec3,
}

impl AreaLight {
    pub fn new(v0: Vec3, v1: Vec3, v2: Vec3, radiance: Vec3) -> Self {
        let cross = (v1 - v0).cross(v2 - v0);
        let area = 0.5 * cross.length();
        Self {
            v0,
            v1,
            v2,
            normal: cross.normalize_or_zero(),
            area,
            radiance,
        }
    }

    pub fn area(&self) -> f32 {
        self.area
    }

    fn sample_point(&self, rng: &mut Rng) -> Vec3 {
        let b = sample_uniform_triangle(rng.random_float(), rng.random_float());
        self.v0 + (self.v1 - self.v0) * b.x + (self.v2 - self.v0) * b.y
    }
}

/// A point light emitting uniformly into the full sphere.
#[derive(Debug, Clone)]
pub struct PointLight {
    pub pos: Vec3,
    /// Radiant intensity (power per solid angle).
    pub intensity: Vec3,
}

/// A directional light: parallel rays from infinity.
#[derive(Debug, Clone)]
pub struct DirectionalLight {
    /// Direction the light travels (unit).
    pub dir: Vec3,
    pub irradiance: Vec3,
    scene_center: Vec3,
    scene_radius: f32,
}

impl DirectionalLight {
    pub fn new(dir: Vec3, irradiance: Vec3) -> Self {
        Self {
            dir: dir.normalize(),
            irradiance,
            scene_center: Vec3::ZERO,
            scene_radius: 1.0,
        }
    }
}

/// Constant-radiance environment light enclosing the scene.
#[derive(Debug, Clone)]
pub struct EnvironmentLight {
    pub radiance: Vec3,
    scene_center: Vec3,
    scene_radius: f32,
}

impl EnvironmentLight {
    pub fn new(radiance: Vec3) -> Self {
        Self {
            radiance,
            scene_center: Vec3::ZERO,
            scene_radius: 1.0,
        }
    }
}

/// Any light source in the scene.
#[derive(Debug, Clone)]
pub enum Light {
    Area(AreaLight),
    Point(PointLight),
    Directional(DirectionalLight),
    Environment(EnvironmentLight),
}

impl Light {
    /// Infinite lights need the scene bounding sphere to place emitted rays.
    pub fn set_scene_bounds(&mut self, center: Vec3, radius: f32) {
        match self {
            Light::Directional(l) => {
                l.scene_center = center;
                l.scene_radius = radius;
            }
            Light::Environment(l) => {
                l.scene_center = center;
                l.scene_radius = radius;
            }
            _ => {}
        }
    }

    /// True if the light cannot be hit by a random direction.
    pub fn is_delta(&self) -> bool {
        matches!(self, Light::Point(_) | Light::Directional(_))
    }

    /// True if the light sits at a finite position.
    pub fn is_finite(&self) -> bool {
        matches!(self, Light::Area(_) | Light::Point(_))
    }

    /// Sample the light for next-event estimation from `from`.
    pub fn sample_direct(&self, from: Vec3, rng: &mut Rng) -> DirectSample {
        match self {
            Light::Area(l) => {
                let p = l.sample_point(rng);
                let to_light = p - from;
                let dist_sqr = to_light.length_squared();
                let distance = dist_sqr.sqrt();
                let dir = to_light / distance;
                let cos_out = l.normal.dot(-dir);
                if cos_out <= 1e-6 || l.area == 0.0 {
                    // Shade point is behind or in the plane of the emitter.
                    return DirectSample {
                        dir,
                        distance,
                        radiance: Vec3::ZERO,
                        pdf_direct_w: 0.0,
                        pdf_emit_w: 0.0,
                        cos_out: 0.0,
                    };
                }
                DirectSample {
                    dir,
                    distance,
                    radiance: l.radiance,
                    pdf_direct_w: dist_sqr / (cos_out * l.area),
                    pdf_emit_w: cos_out / PI / l.area,
                    cos_out,
                }
            }
            Light::Point(l) => {
                let to_light = l.pos - from;
                let dist_sqr = to_light.length_squared();
                let distance = dist_sqr.sqrt();
                DirectSample {
                    dir: to_light / distance,
                    distance,
                    radiance: l.intensity / dist_sqr,
                    pdf_direct_w: 1.0,
                    pdf_emit_w: 1.0 / (4.0 * PI),
                    cos_out: 1.0,
                }
            }
            Light::Directional(l) => DirectSample {
                dir: -l.dir,
                distance: f32::MAX,
                radiance: l.irradiance,
                pdf_direct_w: 1.0,
                pdf_emit_w: 1.0 / (PI * l.scene_radius * l.scene_radius),
                cos_out: 1.0,
            },
            Light::Environment(l) => {
                let s = sample_uniform_sphere(rng.random_float(), rng.random_float());
                let disk_pdf = 1.0 / (PI * l.scene_radius * l.scene_radius);
                DirectSample {
                    dir: s.dir,
                    distance: f32::MAX,
                    radiance: l.radiance,
                    pdf_direct_w: s.pdf,
                    pdf_emit_w: s.pdf * disk_pdf,
                    cos_out: 1.0,
                }
            }
        }
    }

    /// Sample a ray leaving the light, to start a light subpath.
    pub fn sample_emit(&self, rng: &mut Rng) -> EmitSample {
        match self {
            Light::Area(l) => {
                let pos = l.sample_point(rng);
                let local = sample_cos_hemisphere(rng.random_float(), rng.random_float());
                let cos_out = local.dir.z;
                let pdf_emit_w = local.pdf / l.area;
                if pdf_emit_w <= 0.0 {
                    return EmitSample {
                        pos,
                        dir: l.normal,
                        radiance: Vec3::ZERO,
                        pdf_direct_a: 1.0 / l.area,
                        pdf_emit_w: 0.0,
                        cos_out: 0.0,
                    };
                }
                EmitSample {
                    pos,
                    dir: local_to_world(local.dir, l.normal),
                    // L * cos / pdf_emit  ==  L * pi * area
                    radiance: l.radiance * cos_out / pdf_emit_w,
                    pdf_direct_a: 1.0 / l.area,
                    pdf_emit_w,
                    cos_out,
                }
            }
            Light::Point(l) => {
                let s = sample_uniform_sphere(rng.random_float(), rng.random_float());
                EmitSample {
                    pos: l.pos,
                    dir: s.dir,
                    radiance: l.intensity / s.pdf,
                    pdf_direct_a: 1.0,
                    pdf_emit_w: s.pdf,
                    cos_out: 1.0,
                }
            }
            Light::Directional(l) => {
                // Start on a disk that covers the scene, one radius back.
                let disk = sample_concentric_disk(rng.random_float(), rng.random_float());
                let (t, b) = local_coordinates(l.dir);
                let pos = l.scene_center - l.dir * l.scene_radius
                    + (t * disk.x + b * disk.y) * l.scene_radius;
                let pdf_emit_w = 1.0 / (PI * l.scene_radius * l.scene_radius);
                EmitSample {
                    pos,
                    dir: l.dir,
                    radiance: l.irradiance / pdf_emit_w,
                    pdf_direct_a: 1.0,
                    pdf_emit_w,
                    cos_out: 1.0,
                }
            }
            Light::Environment(l) => {
                let s = sample_uniform_sphere(rng.random_float(), rng.random_float());
                let dir = -s.dir;
                let disk = sample_concentric_disk(rng.random_float(), rng.random_float());
                let (t, b) = local_coordinates(dir);
                let pos = l.scene_center + s.dir * l.scene_radius
                    + (t * disk.x + b * disk.y) * l.scene_radius;
                let disk_pdf = 1.0 / (PI * l.scene_radius * l.scene_radius);
                let pdf_emit_w = s.pdf * disk_pdf;
                EmitSample {
                    pos,
                    dir,
                    radiance: l.radiance / pdf_emit_w,
                    pdf_direct_a: s.pdf,
                    pdf_emit_w,
                    cos_out: 1.0,
                }
            }
        }
    }

    /// Radiance seen by a ray hitting the light, with `out_dir` pointing
    /// from the light back along the ray.
    pub fn radiance(&self, out_dir: Vec3) -> LightRadiance {
        match self {
            Light::Area(l) => {
                let cos_out = l.normal.dot(out_dir);
                if cos_out <= 0.0 || l.area == 0.0 {
                    return LightRadiance::BLACK;
                }
                LightRadiance {
                    radiance: l.radiance,
                    pdf_direct_a: 1.0 / l.area,
                    pdf_emit_w: cos_out / PI / l.area,
                }
            }
            Light::Environment(l) => {
                let dir_pdf = 1.0 / (4.0 * PI);
                let disk_pdf = 1.0 / (PI * l.scene_radius * l.scene_radius);
                LightRadiance {
                    radiance: l.radiance,
                    pdf_direct_a: dir_pdf,
                    pdf_emit_w: dir_pdf * disk_pdf,
                }
            }
            // Delta lights cannot be hit.
            Light::Point(_) | Light::Directional(_) => LightRadiance::BLACK,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_area_light(radiance: Vec3) -> Light {
        Light::Area(AreaLight::new(
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 2.0, 0.0),
            radiance,
        ))
    }

    #[test]
    fn test_area_light_pdfs() {
        let light = unit_area_light(Vec3::ONE);
        let mut rng = Rng::new(1);
        // Straight above the triangle: the sampled point is on z = 0.
        let s = light.sample_direct(Vec3::new(0.2, 0.3, 2.0), &mut rng);
        assert!(s.pdf_direct_w > 0.0);
        assert!(s.cos_out > 0.0);
        // Area pdf is 1/area = 1.
        let e = light.sample_emit(&mut rng);
        assert!((e.pdf_direct_a - 1.0).abs() < 1e-5);
        // pdf_emit_w = (1/area) * cos/pi.
        assert!((e.pdf_emit_w - e.cos_out / PI).abs() < 1e-5);
    }

    #[test]
    fn test_area_light_backface_is_black() {
        let light = unit_area_light(Vec3::ONE);
        let mut rng = Rng::new(2);
        let s = light.sample_direct(Vec3::new(0.2, 0.3, -2.0), &mut rng);
        assert_eq!(s.pdf_direct_w, 0.0);
        assert!(light.radiance(Vec3::new(0.0, 0.0, -1.0)).radiance == Vec3::ZERO);
    }

    #[test]
    fn test_emit_radiance_is_prescaled() {
        // radiance field of EmitSample = L * pi * area for an area light.
        let light = unit_area_light(Vec3::splat(2.0));
        let mut rng = Rng::new(3);
        let e = light.sample_emit(&mut rng);
        let expected = 2.0 * PI * 1.0;
        assert!((e.radiance.x - expected).abs() < 1e-3);
    }

    #[test]
    fn test_point_light_falloff() {
        let light = Light::Point(PointLight {
            pos: Vec3::ZERO,
            intensity: Vec3::ONE,
        });
        let mut rng = Rng::new(4);
        let near = light.sample_direct(Vec3::new(1.0, 0.0, 0.0), &mut rng);
        let far = light.sample_direct(Vec3::new(2.0, 0.0, 0.0), &mut rng);
        assert!((near.radiance.x / far.radiance.x - 4.0).abs() < 1e-4);
        assert!(light.is_delta());
    }

    #[test]
    fn test_directional_flags() {
        let light = Light::Directional(DirectionalLight::new(-Vec3::Y, Vec3::ONE));
        assert!(light.is_delta());
        assert!(!light.is_finite());
    }

    #[test]
    fn test_environment_not_delta() {
        let light = Light::Environment(EnvironmentLight::new(Vec3::ONE));
        assert!(!light.is_delta());
        assert!(!light.is_finite());
        let r = light.radiance(Vec3::Y);
        assert_eq!(r.radiance, Vec3::ONE);
        assert!(r.pdf_direct_a > 0.0);
    }
}
