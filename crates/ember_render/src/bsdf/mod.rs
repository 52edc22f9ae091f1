//! Surface scattering models.
//!
//! A [`Bsdf`] is a small set of weighted lobes assembled from a material
//! description at every shade point, living in a per-worker arena for the
//! duration of one shade step.
//!
//! Contract used throughout the integrators:
//! - `eval(out, in)` returns the BSDF value with the cosine at `in` folded
//!   in, so accumulation code never reapplies it;
//! - `pdf(out, in)` is the solid-angle density, zero for delta lobes and
//!   hemisphere-mismatched pairs;
//! - `sample` reports a zero pdf when no direction could be produced, and
//!   flags delta scattering through [`BxdfFlags::SPECULAR`].

pub mod fresnel;
pub mod lobes;

use ember_core::{DiffuseInput, Intersection, MaterialDesc, SurfaceModel};
use ember_math::sampling::local_coordinates;
use ember_math::{luminance, Rng, Vec3};

pub use fresnel::Fresnel;
pub use lobes::{Lobe, LobeSample};

/// Lobe classification bits: `{reflection, transmission}` crossed with
/// `{diffuse, glossy, specular}`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BxdfFlags(u8);

impl BxdfFlags {
    pub const NONE: Self = Self(0);
    pub const REFLECTION: Self = Self(1);
    pub const TRANSMISSION: Self = Self(1 << 1);
    pub const DIFFUSE: Self = Self(1 << 2);
    pub const GLOSSY: Self = Self(1 << 3);
    pub const SPECULAR: Self = Self(1 << 4);
    pub const ALL: Self = Self(0b1_1111);
    /// Everything except delta lobes, e.g. the SPPM camera pass inverts
    /// this selection.
    pub const SPECULAR_ONLY: Self =
        Self(Self::SPECULAR.0 | Self::REFLECTION.0 | Self::TRANSMISSION.0);

    #[inline]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for BxdfFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Orthonormal shading frame around a normal.
#[derive(Debug, Copy, Clone)]
pub struct Frame {
    tangent: Vec3,
    binormal: Vec3,
    normal: Vec3,
}

impl Frame {
    pub fn new(normal: Vec3) -> Self {
        let (tangent, binormal) = local_coordinates(normal);
        Self {
            tangent,
            binormal,
            normal,
        }
    }

    #[inline]
    pub fn to_local(&self, v: Vec3) -> Vec3 {
        Vec3::new(v.dot(self.tangent), v.dot(self.binormal), v.dot(self.normal))
    }

    #[inline]
    pub fn to_world(&self, v: Vec3) -> Vec3 {
        self.tangent * v.x + self.binormal * v.y + self.normal * v.z
    }

    pub fn normal(&self) -> Vec3 {
        self.normal
    }
}

/// A direction sampled from a full BSDF, in world space.
#[derive(Debug, Copy, Clone)]
pub struct BsdfSample {
    pub in_dir: Vec3,
    /// BSDF value with the cosine at `in_dir` folded in.
    pub value: Vec3,
    /// Solid-angle pdf of the sample; zero signals failure.
    pub pdf_w: f32,
    /// Flags of the lobe the direction came from.
    pub flags: BxdfFlags,
}

impl BsdfSample {
    const FAILED: Self = Self {
        in_dir: Vec3::Z,
        value: Vec3::ZERO,
        pdf_w: 0.0,
        flags: BxdfFlags::NONE,
    };
}

const MAX_LOBES: usize = 3;

/// A prepared surface scattering model: up to three weighted lobes in a
/// shading frame.
#[derive(Debug, Copy, Clone)]
pub struct Bsdf {
    frame: Frame,
    lobes: [(f32, Lobe); MAX_LOBES],
    n_lobes: usize,
}

impl Bsdf {
    /// Assemble the BSDF of a material at an intersection, resolving
    /// textures and the opacity mask.
    pub fn prepare(mat: &MaterialDesc, isect: &Intersection) -> Self {
        let diffuse_color = match &mat.diffuse {
            DiffuseInput::Color(c) => *c,
            DiffuseInput::Texture(tex) => tex.sample(isect.uv),
        };

        let mut bsdf = Self {
            frame: Frame::new(isect.normal),
            lobes: [(0.0, Lobe::Lambertian { color: Vec3::ZERO }); MAX_LOBES],
            n_lobes: 0,
        };

        // The opacity mask turns the surface into a convex mixture with a
        // pass-through lobe.
        let alpha = match &mat.opacity {
            Some(mask) => mask.sample(isect.uv),
            None => 1.0,
        };

        match mat.model() {
            SurfaceModel::Diffuse => {
                let lobe = if mat.roughness > 0.0 {
                    Lobe::oren_nayar(diffuse_color, mat.roughness)
                } else {
                    Lobe::Lambertian {
                        color: diffuse_color,
                    }
                };
                bsdf.push(alpha, lobe);
            }
            SurfaceModel::DiffuseGlossy => {
                // Texture-driven mixture: the sampled diffuse reflectance
                // sets the component weights.
                let lum_d = luminance(diffuse_color);
                let lum_s = luminance(mat.specular);
                let s = if lum_d + lum_s > 0.0 {
                    lum_d / (lum_d + lum_s)
                } else {
                    1.0
                };
                bsdf.push(
                    alpha * s,
                    Lobe::Lambertian {
                        color: diffuse_color,
                    },
                );
                bsdf.push(
                    alpha * (1.0 - s),
                    Lobe::Phong {
                        coefficient: mat.specular,
                        exponent: mat.glossiness,
                    },
                );
            }
            SurfaceModel::Mirror => {
                bsdf.push(
                    alpha,
                    Lobe::SpecularReflection {
                        scale: mat.specular,
                        fresnel: Fresnel::Conductor {
                            eta: mat.eta,
                            kappa: mat.kappa,
                        },
                    },
                );
            }
            SurfaceModel::Glass => {
                bsdf.push(
                    alpha,
                    Lobe::SpecularTransmission {
                        scale: mat.specular,
                        eta_outside: 1.0,
                        eta_inside: mat.eta,
                    },
                );
            }
        }

        if alpha < 1.0 {
            bsdf.push(1.0 - alpha, Lobe::Transparent { scale: Vec3::ONE });
        }

        bsdf
    }

    fn push(&mut self, weight: f32, lobe: Lobe) {
        if weight <= 0.0 {
            return;
        }
        self.lobes[self.n_lobes] = (weight, lobe);
        self.n_lobes += 1;
    }

    fn lobes(&self) -> &[(f32, Lobe)] {
        &self.lobes[..self.n_lobes]
    }

    /// Union of all lobe flags.
    pub fn flags(&self) -> BxdfFlags {
        self.lobes()
            .iter()
            .fold(BxdfFlags::NONE, |acc, (_, l)| acc | l.flags())
    }

    /// True if every lobe is a delta distribution.
    pub fn is_specular(&self) -> bool {
        self.lobes()
            .iter()
            .all(|(_, l)| l.flags().contains(BxdfFlags::SPECULAR))
    }

    /// BSDF value times the cosine at `in_dir` (world space).
    pub fn eval(&self, out_dir: Vec3, in_dir: Vec3) -> Vec3 {
        let out = self.frame.to_local(out_dir);
        let local_in = self.frame.to_local(in_dir);
        let f: Vec3 = self
            .lobes()
            .iter()
            .map(|(w, l)| l.eval(out, local_in) * *w)
            .sum();
        f * lobes::abs_cos_theta(local_in)
    }

    /// Solid-angle pdf of `in_dir` given `out_dir` (world space), mixing
    /// the lobe pdfs by their selection weights.
    pub fn pdf(&self, out_dir: Vec3, in_dir: Vec3) -> f32 {
        let out = self.frame.to_local(out_dir);
        let local_in = self.frame.to_local(in_dir);
        let total: f32 = self.lobes().iter().map(|(w, _)| *w).sum();
        if total <= 0.0 {
            return 0.0;
        }
        self.lobes()
            .iter()
            .map(|(w, l)| l.pdf(out, local_in) * *w)
            .sum::<f32>()
            / total
    }

    /// Sample an incoming direction from the lobes selected by `flags`.
    pub fn sample(&self, out_dir: Vec3, rng: &mut Rng, flags: BxdfFlags) -> BsdfSample {
        let out = self.frame.to_local(out_dir);

        let allowed: f32 = self
            .lobes()
            .iter()
            .filter(|(_, l)| flags.contains(l.flags()))
            .map(|(w, _)| *w)
            .sum();
        if allowed <= 0.0 {
            return BsdfSample::FAILED;
        }

        // Pick a lobe proportional to its weight.
        let mut pick = rng.random_float() * allowed;
        let mut chosen_idx = usize::MAX;
        for (i, (w, l)) in self.lobes().iter().enumerate() {
            if !flags.contains(l.flags()) {
                continue;
            }
            chosen_idx = i;
            pick -= w;
            if pick <= 0.0 {
                break;
            }
        }
        let (weight, lobe) = self.lobes[chosen_idx];

        let s = lobe.sample(out, rng);
        if s.pdf == 0.0 {
            return BsdfSample::FAILED;
        }
        let select_prob = weight / allowed;

        if s.flags.contains(BxdfFlags::SPECULAR) {
            // Delta lobes cannot be mixed with the others along a single
            // direction; the sample stands alone.
            return BsdfSample {
                in_dir: self.frame.to_world(s.in_dir),
                value: s.f * weight * lobes::abs_cos_theta(s.in_dir),
                pdf_w: s.pdf * select_prob,
                flags: s.flags,
            };
        }

        // Combine the remaining non-delta lobes into the value and pdf.
        let mut f = s.f * weight;
        let mut pdf = s.pdf * select_prob;
        for (i, (w, l)) in self.lobes().iter().enumerate() {
            if i == chosen_idx || !flags.contains(l.flags()) {
                continue;
            }
            f += l.eval(out, s.in_dir) * *w;
            pdf += l.pdf(out, s.in_dir) * (*w / allowed);
        }

        BsdfSample {
            in_dir: self.frame.to_world(s.in_dir),
            value: f * lobes::abs_cos_theta(s.in_dir),
            pdf_w: pdf,
            flags: s.flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::Intersection;

    fn flat_isect() -> Intersection {
        Intersection {
            normal: Vec3::Z,
            geom_normal: Vec3::Z,
            out_dir: Vec3::new(0.0, 0.3, 1.0).normalize(),
            ..Default::default()
        }
    }

    fn white_diffuse() -> Bsdf {
        Bsdf::prepare(&MaterialDesc::diffuse("white", Vec3::ONE), &flat_isect())
    }

    #[test]
    fn test_eval_folds_cosine() {
        let bsdf = white_diffuse();
        let out = Vec3::new(0.0, 0.0, 1.0);
        let in_dir = Vec3::new(0.0, 0.8, 0.6).normalize();
        let expected = (1.0 / std::f32::consts::PI) * in_dir.z;
        assert!((bsdf.eval(out, in_dir).x - expected).abs() < 1e-5);
    }

    #[test]
    fn test_reciprocity_of_mixture() {
        let mat = MaterialDesc::glossy("mix", Vec3::splat(0.5), Vec3::splat(0.4), 24.0);
        let bsdf = Bsdf::prepare(&mat, &flat_isect());
        let mut rng = Rng::new(1);
        for _ in 0..200 {
            let a = ember_math::sampling::sample_uniform_hemisphere(
                rng.random_float(),
                rng.random_float(),
            )
            .dir;
            let b = ember_math::sampling::sample_uniform_hemisphere(
                rng.random_float(),
                rng.random_float(),
            )
            .dir;
            // eval folds the cosine at `in`, so compare the raw values.
            let ab = bsdf.eval(a, b) / b.z.abs().max(1e-6);
            let ba = bsdf.eval(b, a) / a.z.abs().max(1e-6);
            let scale = ab.length().max(1e-3);
            assert!((ab - ba).length() / scale < 1e-4);
        }
    }

    #[test]
    fn test_mixture_pdf_integrates_to_one() {
        let mat = MaterialDesc::glossy("mix", Vec3::splat(0.5), Vec3::splat(0.4), 8.0);
        let bsdf = Bsdf::prepare(&mat, &flat_isect());
        let out = Vec3::new(0.2, 0.1, 0.97).normalize();
        let mut rng = Rng::new(2);
        let n = 400_000;
        let mut sum = 0.0f64;
        for _ in 0..n {
            let s = ember_math::sampling::sample_uniform_sphere(
                rng.random_float(),
                rng.random_float(),
            );
            sum += (bsdf.pdf(out, s.dir) / s.pdf) as f64;
        }
        let integral = sum / n as f64;
        assert!((integral - 1.0).abs() < 0.01, "integral = {integral}");
    }

    #[test]
    fn test_sample_matches_pdf() {
        let mat = MaterialDesc::glossy("mix", Vec3::splat(0.5), Vec3::splat(0.4), 24.0);
        let bsdf = Bsdf::prepare(&mat, &flat_isect());
        let out = Vec3::new(0.0, 0.3, 1.0).normalize();
        let mut rng = Rng::new(3);
        for _ in 0..200 {
            let s = bsdf.sample(out, &mut rng, BxdfFlags::ALL);
            if s.pdf_w == 0.0 {
                continue;
            }
            let pdf = bsdf.pdf(out, s.in_dir);
            assert!(
                (s.pdf_w - pdf).abs() / pdf.max(1e-4) < 1e-3,
                "sampled pdf {} vs evaluated {}",
                s.pdf_w,
                pdf
            );
            let value = bsdf.eval(out, s.in_dir);
            assert!((s.value - value).length() < 1e-4);
        }
    }

    #[test]
    fn test_specular_flag_detection() {
        let mirror = Bsdf::prepare(
            &MaterialDesc::mirror("m", Vec3::ONE, 0.2, 3.9),
            &flat_isect(),
        );
        assert!(mirror.is_specular());
        let mut rng = Rng::new(4);
        let s = mirror.sample(flat_isect().out_dir, &mut rng, BxdfFlags::ALL);
        assert!(s.flags.contains(BxdfFlags::SPECULAR));
        assert!(s.pdf_w > 0.0);
        assert_eq!(mirror.pdf(flat_isect().out_dir, s.in_dir), 0.0);

        assert!(!white_diffuse().is_specular());
    }

    #[test]
    fn test_flag_filtered_sampling() {
        let mat = MaterialDesc::glossy("mix", Vec3::splat(0.5), Vec3::splat(0.4), 24.0);
        let bsdf = Bsdf::prepare(&mat, &flat_isect());
        let mut rng = Rng::new(5);
        // Only specular lobes allowed: a diffuse+glossy surface fails.
        let s = bsdf.sample(flat_isect().out_dir, &mut rng, BxdfFlags::SPECULAR_ONLY);
        assert_eq!(s.pdf_w, 0.0);
        assert!(s.flags.is_empty());
    }

    #[test]
    fn test_opacity_mixture() {
        use ember_core::OpacityMask;
        use std::sync::Arc;
        let mat = MaterialDesc::diffuse("masked", Vec3::ONE)
            .with_opacity(Arc::new(OpacityMask::new(1, 1, vec![0.25])));
        let bsdf = Bsdf::prepare(&mat, &flat_isect());
        assert!(!bsdf.is_specular());
        assert!(bsdf.flags().contains(BxdfFlags::TRANSMISSION));

        // Sampling passes through three quarters of the time.
        let mut rng = Rng::new(6);
        let out = flat_isect().out_dir;
        let mut through = 0;
        for _ in 0..4000 {
            let s = bsdf.sample(out, &mut rng, BxdfFlags::ALL);
            if s.in_dir.z < 0.0 {
                through += 1;
            }
        }
        let ratio = through as f32 / 4000.0;
        assert!((ratio - 0.75).abs() < 0.05, "ratio = {ratio}");
    }
}
