//! Individual scattering lobes, evaluated in shading space (`+Z` is the
//! shading normal).
//!
//! Lobe `eval` returns the raw BSDF value without the cosine; the [`Bsdf`]
//! container folds the cosine in. Delta lobes return zero from `eval` and
//! `pdf` and pre-divide their sampled value by the cosine, so the common
//! `value * cos / pdf` path needs no special case.
//!
//! [`Bsdf`]: super::Bsdf

use ember_math::sampling::{
    local_coordinates, power_cos_hemisphere_pdf, sample_cos_hemisphere,
    sample_power_cos_hemisphere,
};
use ember_math::{Rng, Vec3};
use std::f32::consts::PI;

use super::fresnel::{refracted_cos, Fresnel};
use super::BxdfFlags;

#[inline]
pub fn cos_theta(v: Vec3) -> f32 {
    v.z
}

#[inline]
pub fn abs_cos_theta(v: Vec3) -> f32 {
    v.z.abs()
}

#[inline]
pub fn sin_theta(v: Vec3) -> f32 {
    (1.0 - v.z * v.z).max(0.0).sqrt()
}

#[inline]
pub fn same_hemisphere(a: Vec3, b: Vec3) -> bool {
    a.z * b.z > 0.0
}

/// Mirror a direction across the shading normal.
#[inline]
fn reflect_z(v: Vec3) -> Vec3 {
    Vec3::new(-v.x, -v.y, v.z)
}

/// A direction sampled from a lobe.
#[derive(Debug, Copy, Clone)]
pub struct LobeSample {
    pub in_dir: Vec3,
    /// Raw BSDF value (delta lobes fold `1 / |cos|` in here).
    pub f: Vec3,
    /// Solid-angle pdf, or the discrete branch probability for deltas.
    pub pdf: f32,
    pub flags: BxdfFlags,
}

/// One scattering lobe. Kept `Copy` so BSDFs assemble in per-worker
/// arenas without allocation.
#[derive(Debug, Copy, Clone)]
pub enum Lobe {
    Lambertian {
        color: Vec3,
    },
    OrenNayar {
        color: Vec3,
        a: f32,
        b: f32,
    },
    Phong {
        coefficient: Vec3,
        exponent: f32,
    },
    SpecularReflection {
        scale: Vec3,
        fresnel: Fresnel,
    },
    SpecularTransmission {
        scale: Vec3,
        eta_outside: f32,
        eta_inside: f32,
    },
    /// Opacity-mask pass-through: continues straight on.
    Transparent {
        scale: Vec3,
    },
}

impl Lobe {
    /// An Oren-Nayar lobe from a roughness angle in degrees.
    pub fn oren_nayar(color: Vec3, roughness_degrees: f32) -> Self {
        let sigma = roughness_degrees.to_radians();
        let sigma2 = sigma * sigma;
        Lobe::OrenNayar {
            color,
            a: 1.0 - sigma2 / (2.0 * (sigma2 + 0.33)),
            b: 0.45 * sigma2 / (sigma2 + 0.09),
        }
    }

    pub fn flags(&self) -> BxdfFlags {
        match self {
            Lobe::Lambertian { .. } | Lobe::OrenNayar { .. } => {
                BxdfFlags::DIFFUSE | BxdfFlags::REFLECTION
            }
            Lobe::Phong { .. } => BxdfFlags::GLOSSY | BxdfFlags::REFLECTION,
            Lobe::SpecularReflection { .. } => BxdfFlags::SPECULAR | BxdfFlags::REFLECTION,
            Lobe::SpecularTransmission { .. } => {
                BxdfFlags::SPECULAR | BxdfFlags::REFLECTION | BxdfFlags::TRANSMISSION
            }
            Lobe::Transparent { .. } => BxdfFlags::SPECULAR | BxdfFlags::TRANSMISSION,
        }
    }

    /// Raw BSDF value for a pair of directions. Zero for delta lobes.
    pub fn eval(&self, out: Vec3, in_dir: Vec3) -> Vec3 {
        match *self {
            Lobe::Lambertian { color } => {
                if same_hemisphere(out, in_dir) {
                    color * (1.0 / PI)
                } else {
                    Vec3::ZERO
                }
            }
            Lobe::OrenNayar { color, a, b } => {
                if !same_hemisphere(out, in_dir) {
                    return Vec3::ZERO;
                }
                let sin_theta_in = sin_theta(in_dir);
                let sin_theta_out = sin_theta(out);

                // max(0, cos(phi_i - phi_o)) via the angle difference identity.
                let mut max_cos = 0.0;
                if sin_theta_in > 1e-4 && sin_theta_out > 1e-4 {
                    let (sin_phi_in, cos_phi_in) =
                        (in_dir.y / sin_theta_in, in_dir.x / sin_theta_in);
                    let (sin_phi_out, cos_phi_out) =
                        (out.y / sin_theta_out, out.x / sin_theta_out);
                    max_cos =
                        (cos_phi_in * cos_phi_out + sin_phi_in * sin_phi_out).max(0.0);
                }

                let (sin_alpha, tan_beta) = if abs_cos_theta(in_dir) > abs_cos_theta(out) {
                    (sin_theta_out, sin_theta_in / abs_cos_theta(in_dir))
                } else {
                    (sin_theta_in, sin_theta_out / abs_cos_theta(out))
                };

                color * (1.0 / PI) * (a + b * max_cos * sin_alpha * tan_beta)
            }
            Lobe::Phong {
                coefficient,
                exponent,
            } => {
                if !same_hemisphere(out, in_dir) {
                    return Vec3::ZERO;
                }
                let cos_r = reflect_z(out).dot(in_dir).max(0.0);
                coefficient * ((exponent + 2.0) / (2.0 * PI) * cos_r.powf(exponent))
            }
            Lobe::SpecularReflection { .. }
            | Lobe::SpecularTransmission { .. }
            | Lobe::Transparent { .. } => Vec3::ZERO,
        }
    }

    /// Solid-angle pdf of `in_dir` given `out`. Zero for delta lobes and
    /// hemisphere-mismatched pairs.
    pub fn pdf(&self, out: Vec3, in_dir: Vec3) -> f32 {
        match *self {
            Lobe::Lambertian { .. } | Lobe::OrenNayar { .. } => {
                if same_hemisphere(out, in_dir) {
                    abs_cos_theta(in_dir) / PI
                } else {
                    0.0
                }
            }
            Lobe::Phong { exponent, .. } => {
                if !same_hemisphere(out, in_dir) {
                    return 0.0;
                }
                let cos_r = reflect_z(out).dot(in_dir);
                if cos_r <= 0.0 {
                    0.0
                } else {
                    (exponent + 1.0) / (2.0 * PI) * cos_r.powf(exponent)
                }
            }
            Lobe::SpecularReflection { .. }
            | Lobe::SpecularTransmission { .. }
            | Lobe::Transparent { .. } => 0.0,
        }
    }

    /// Sample an incoming direction. Returns `pdf == 0` when the lobe
    /// cannot scatter this configuration.
    pub fn sample(&self, out: Vec3, rng: &mut Rng) -> LobeSample {
        let degenerate = LobeSample {
            in_dir: Vec3::Z,
            f: Vec3::ZERO,
            pdf: 0.0,
            flags: BxdfFlags::NONE,
        };
        match *self {
            Lobe::Lambertian { .. } | Lobe::OrenNayar { .. } => {
                if cos_theta(out) == 0.0 {
                    return degenerate;
                }
                let s = sample_cos_hemisphere(rng.random_float(), rng.random_float());
                let in_dir = Vec3::new(s.dir.x, s.dir.y, s.dir.z.copysign(out.z));
                LobeSample {
                    in_dir,
                    f: self.eval(out, in_dir),
                    pdf: s.pdf,
                    flags: self.flags(),
                }
            }
            Lobe::Phong { exponent, .. } => {
                let r = reflect_z(out);
                let s =
                    sample_power_cos_hemisphere(exponent, rng.random_float(), rng.random_float());
                let (tangent, binormal) = local_coordinates(r);
                let in_dir = tangent * s.dir.x + binormal * s.dir.y + r * s.dir.z;
                if s.pdf == 0.0 {
                    return degenerate;
                }
                LobeSample {
                    in_dir,
                    // Off-hemisphere samples evaluate to zero and die at the
                    // is_black guard.
                    f: self.eval(out, in_dir),
                    pdf: s.pdf,
                    flags: self.flags(),
                }
            }
            Lobe::SpecularReflection { scale, fresnel } => {
                let in_dir = reflect_z(out);
                if abs_cos_theta(in_dir) == 0.0 {
                    return degenerate;
                }
                LobeSample {
                    in_dir,
                    f: scale * fresnel.eval(cos_theta(out)) / abs_cos_theta(in_dir),
                    pdf: 1.0,
                    flags: self.flags(),
                }
            }
            Lobe::SpecularTransmission {
                scale,
                eta_outside,
                eta_inside,
            } => {
                let entering = cos_theta(out) >= 0.0;
                let (eta_i, eta_t) = if entering {
                    (eta_outside, eta_inside)
                } else {
                    (eta_inside, eta_outside)
                };
                let cos_i = abs_cos_theta(out);
                if cos_i == 0.0 {
                    return degenerate;
                }

                let reflect_flags = BxdfFlags::SPECULAR | BxdfFlags::REFLECTION;
                match refracted_cos(cos_i, eta_i, eta_t) {
                    None => {
                        // Total internal reflection.
                        let in_dir = reflect_z(out);
                        LobeSample {
                            in_dir,
                            f: scale / abs_cos_theta(in_dir),
                            pdf: 1.0,
                            flags: reflect_flags,
                        }
                    }
                    Some(cos_t) => {
                        let fr = super::fresnel::fresnel_dielectric(cos_i, cos_t, eta_i, eta_t);
                        if rng.random_float() < fr {
                            let in_dir = reflect_z(out);
                            LobeSample {
                                in_dir,
                                f: scale * fr / abs_cos_theta(in_dir),
                                pdf: fr,
                                flags: reflect_flags,
                            }
                        } else {
                            let ratio = eta_i / eta_t;
                            let in_dir = Vec3::new(
                                -out.x * ratio,
                                -out.y * ratio,
                                -cos_t.copysign(out.z),
                            );
                            LobeSample {
                                in_dir,
                                f: scale * (1.0 - fr) / abs_cos_theta(in_dir),
                                pdf: 1.0 - fr,
                                flags: self.flags(),
                            }
                        }
                    }
                }
            }
            Lobe::Transparent { scale } => {
                let in_dir = -out;
                if abs_cos_theta(in_dir) == 0.0 {
                    return degenerate;
                }
                LobeSample {
                    in_dir,
                    f: scale / abs_cos_theta(in_dir),
                    pdf: 1.0,
                    flags: self.flags(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hemisphere_dirs(rng: &mut Rng, n: usize) -> Vec<Vec3> {
        (0..n)
            .map(|_| {
                ember_math::sampling::sample_uniform_hemisphere(
                    rng.random_float(),
                    rng.random_float(),
                )
                .dir
            })
            .collect()
    }

    #[test]
    fn test_lambertian_reciprocity() {
        let lobe = Lobe::Lambertian {
            color: Vec3::new(0.8, 0.6, 0.2),
        };
        let mut rng = Rng::new(1);
        for _ in 0..100 {
            let dirs = hemisphere_dirs(&mut rng, 2);
            let ab = lobe.eval(dirs[0], dirs[1]);
            let ba = lobe.eval(dirs[1], dirs[0]);
            assert!((ab - ba).length() < 1e-6);
        }
    }

    #[test]
    fn test_oren_nayar_reciprocity() {
        let lobe = Lobe::oren_nayar(Vec3::splat(0.7), 30.0);
        let mut rng = Rng::new(2);
        for _ in 0..200 {
            let dirs = hemisphere_dirs(&mut rng, 2);
            let ab = lobe.eval(dirs[0], dirs[1]);
            let ba = lobe.eval(dirs[1], dirs[0]);
            let scale = ab.length().max(1e-3);
            assert!(
                (ab - ba).length() / scale < 1e-5,
                "eval asymmetry: {ab:?} vs {ba:?}"
            );
        }
    }

    #[test]
    fn test_phong_reciprocity() {
        let lobe = Lobe::Phong {
            coefficient: Vec3::ONE,
            exponent: 16.0,
        };
        let mut rng = Rng::new(3);
        for _ in 0..200 {
            let dirs = hemisphere_dirs(&mut rng, 2);
            let ab = lobe.eval(dirs[0], dirs[1]);
            let ba = lobe.eval(dirs[1], dirs[0]);
            let scale = ab.length().max(1e-3);
            assert!((ab - ba).length() / scale < 1e-5);
        }
    }

    #[test]
    fn test_phong_pdf_integrates_to_one() {
        // Monte-Carlo estimate of the pdf integral over the hemisphere.
        let lobe = Lobe::Phong {
            coefficient: Vec3::ONE,
            exponent: 10.0,
        };
        let out = Vec3::new(0.3, -0.1, 0.9).normalize();
        let mut rng = Rng::new(4);
        let n = 400_000;
        let mut sum = 0.0f64;
        for _ in 0..n {
            let s = ember_math::sampling::sample_uniform_sphere(
                rng.random_float(),
                rng.random_float(),
            );
            sum += (lobe.pdf(out, s.dir) / s.pdf) as f64;
        }
        let integral = sum / n as f64;
        assert!((integral - 1.0).abs() < 0.01, "integral = {integral}");
    }

    #[test]
    fn test_specular_lobe_contract() {
        let lobe = Lobe::SpecularReflection {
            scale: Vec3::ONE,
            fresnel: Fresnel::Conductor { eta: 0.2, kappa: 3.9 },
        };
        let out = Vec3::new(0.5, 0.0, 0.5).normalize();
        let in_dir = reflect_z(out);
        // Delta distribution: eval and pdf are zero.
        assert_eq!(lobe.eval(out, in_dir), Vec3::ZERO);
        assert_eq!(lobe.pdf(out, in_dir), 0.0);
        // The sampled direction carries the specular flag.
        let mut rng = Rng::new(5);
        let s = lobe.sample(out, &mut rng);
        assert!(s.flags.contains(BxdfFlags::SPECULAR));
        assert!((s.in_dir - in_dir).length() < 1e-6);
    }

    #[test]
    fn test_glass_branches_by_fresnel() {
        let lobe = Lobe::SpecularTransmission {
            scale: Vec3::ONE,
            eta_outside: 1.0,
            eta_inside: 1.5,
        };
        let out = Vec3::new(0.2, 0.1, 0.97).normalize();
        let mut rng = Rng::new(6);
        let mut reflected = 0;
        let mut refracted = 0;
        for _ in 0..2000 {
            let s = lobe.sample(out, &mut rng);
            assert!(s.flags.contains(BxdfFlags::SPECULAR));
            if s.in_dir.z > 0.0 {
                reflected += 1;
            } else {
                refracted += 1;
                assert!(s.flags.contains(BxdfFlags::TRANSMISSION));
            }
        }
        // Near-normal incidence on glass: a few percent reflects.
        assert!(reflected > 0 && refracted > reflected);
    }

    #[test]
    fn test_tir_always_reflects() {
        let lobe = Lobe::SpecularTransmission {
            scale: Vec3::ONE,
            eta_outside: 1.0,
            eta_inside: 1.5,
        };
        // From inside the glass at a grazing angle.
        let out = Vec3::new(0.9, 0.0, -0.2).normalize();
        let mut rng = Rng::new(7);
        for _ in 0..100 {
            let s = lobe.sample(out, &mut rng);
            assert!(s.in_dir.z < 0.0, "TIR must stay inside");
            assert_eq!(s.pdf, 1.0);
        }
    }
}
