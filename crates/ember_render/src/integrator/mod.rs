//! The integrator family.
//!
//! Every integrator is the same skeleton (camera subpaths, light
//! subpaths, next-event shadow rays, accumulation) instantiated with a
//! different set of connection strategies and the matching MIS weights.

pub mod vcm;

use ember_core::{Image, Intersection};
use ember_math::{luminance, Rng, Vec3};

/// Which path-construction strategies contribute.
///
/// | | camera | light | direct | connect | light-to-cam | merge |
/// |---|---|---|---|---|---|---|
/// | `PathTracing` | yes | | yes | | | |
/// | `LightTracing` | | yes | | | yes | |
/// | `Bidirectional` | yes | yes | yes | yes | yes | |
/// | `Sppm` | specular only | yes | | | | yes |
/// | `Vcm` | yes | yes | yes | yes | yes | yes |
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Technique {
    PathTracing,
    LightTracing,
    Bidirectional,
    Sppm,
    Vcm,
}

impl Technique {
    pub fn name(self) -> &'static str {
        match self {
            Technique::PathTracing => "path tracing",
            Technique::LightTracing => "light tracing",
            Technique::Bidirectional => "bidirectional path tracing",
            Technique::Sppm => "stochastic progressive photon mapping",
            Technique::Vcm => "vertex connection and merging",
        }
    }

    pub fn traces_camera_paths(self) -> bool {
        self != Technique::LightTracing
    }

    pub fn traces_light_paths(self) -> bool {
        self != Technique::PathTracing
    }

    /// Next-event estimation at camera vertices.
    pub fn next_event(self) -> bool {
        matches!(
            self,
            Technique::PathTracing | Technique::Bidirectional | Technique::Vcm
        )
    }

    /// Full bidirectional connections against cached light vertices.
    pub fn connections(self) -> bool {
        matches!(self, Technique::Bidirectional | Technique::Vcm)
    }

    pub fn light_to_camera(self) -> bool {
        matches!(
            self,
            Technique::LightTracing | Technique::Bidirectional | Technique::Vcm
        )
    }

    pub fn merging(self) -> bool {
        matches!(self, Technique::Sppm | Technique::Vcm)
    }

    /// The camera subpath only follows delta lobes (SPPM).
    pub fn camera_specular_only(self) -> bool {
        self == Technique::Sppm
    }

    /// Whether MIS weights include terms for light-subpath strategies.
    /// Without light paths those strategies do not exist and their terms
    /// must not dilute the weight.
    pub fn bidirectional_mis(self) -> bool {
        matches!(self, Technique::Bidirectional | Technique::Vcm)
    }
}

/// The MIS weighting function `h` applied to every partial pdf term.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum MisHeuristic {
    #[default]
    Balance,
    Power,
}

impl MisHeuristic {
    #[inline]
    pub fn h(self, x: f32) -> f32 {
        match self {
            MisHeuristic::Balance => x,
            MisHeuristic::Power => x * x,
        }
    }
}

/// Everything a ray in flight carries between wavefront stages.
#[derive(Debug, Clone)]
pub struct PathState {
    pub pixel_id: u32,
    pub sample_id: u32,
    pub rng: Rng,
    pub throughput: Vec3,
    pub path_length: u32,
    /// Survival probability of the last Russian-roulette decision.
    pub continue_prob: f32,
    pub last_specular: bool,
    /// Partial MIS quantities, see the bounce update rules.
    pub d_vc: f32,
    pub d_vcm: f32,
    pub d_vm: f32,
    /// Global cache index of the last committed vertex on this path.
    pub ancestor: i32,
    /// Light subpaths: whether the emitting light is at a finite position.
    pub is_finite: bool,
}

impl Default for PathState {
    fn default() -> Self {
        Self {
            pixel_id: 0,
            sample_id: 0,
            rng: Rng::new(0),
            throughput: Vec3::ONE,
            path_length: 1,
            continue_prob: 1.0,
            last_specular: false,
            d_vc: 0.0,
            d_vcm: 0.0,
            d_vm: 0.0,
            ancestor: -1,
            is_finite: true,
        }
    }
}

/// Render a scene, accumulating one pass into the image per call.
pub trait Integrator {
    fn render(&mut self, img: &mut Image);
}

/// Russian roulette with a luminance-scaled, clamped survival
/// probability. Returns the survival probability if the path continues.
#[inline]
pub fn russian_roulette(throughput: Vec3, u: f32) -> Option<f32> {
    let survive = (luminance(throughput) * 10.0).clamp(0.0, 1.0);
    (u < survive).then_some(survive)
}

/// Veach's shading-normal adjoint, as a correction factor on top of an
/// evaluation that already folded `|cos(in, n)|`.
///
/// Applied to every BSDF evaluation on a light subpath to prevent the
/// brightness discontinuities shading normals otherwise cause.
#[inline]
pub fn shading_normal_adjoint(isect: &Intersection, in_dir: Vec3, out_dir: Vec3) -> f32 {
    let num = isect.normal.dot(out_dir) * isect.geom_normal.dot(in_dir);
    let denom = isect.normal.dot(in_dir) * isect.geom_normal.dot(out_dir);
    if denom == 0.0 {
        0.0
    } else {
        (num / denom).abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_technique_strategy_table() {
        use Technique::*;
        assert!(PathTracing.next_event() && !PathTracing.traces_light_paths());
        assert!(LightTracing.light_to_camera() && !LightTracing.traces_camera_paths());
        assert!(Bidirectional.connections() && !Bidirectional.merging());
        assert!(Sppm.merging() && Sppm.camera_specular_only() && !Sppm.next_event());
        assert!(Vcm.connections() && Vcm.merging() && Vcm.next_event());
    }

    #[test]
    fn test_rr_survival_is_clamped() {
        // Large throughput clamps to certain survival.
        assert_eq!(russian_roulette(Vec3::splat(10.0), 0.999), Some(1.0));
        // Black throughput never survives.
        assert_eq!(russian_roulette(Vec3::ZERO, 0.0), None);
    }

    #[test]
    fn test_adjoint_is_identity_for_matching_normals() {
        let isect = Intersection {
            normal: Vec3::Z,
            geom_normal: Vec3::Z,
            ..Intersection::default()
        };
        let in_dir = Vec3::new(0.3, 0.2, 0.9).normalize();
        let out_dir = Vec3::new(-0.1, 0.4, 0.9).normalize();
        let c = shading_normal_adjoint(&isect, in_dir, out_dir);
        assert!((c - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_adjoint_corrects_bent_normal() {
        let isect = Intersection {
            normal: Vec3::new(0.2, 0.0, 1.0).normalize(),
            geom_normal: Vec3::Z,
            ..Intersection::default()
        };
        let in_dir = Vec3::new(0.0, 0.0, 1.0);
        let out_dir = Vec3::new(0.5, 0.0, 0.87).normalize();
        let c = shading_normal_adjoint(&isect, in_dir, out_dir);
        let expected = (isect.normal.dot(out_dir) * isect.geom_normal.dot(in_dir)
            / (isect.normal.dot(in_dir) * isect.geom_normal.dot(out_dir)))
        .abs();
        assert!((c - expected).abs() < 1e-6);
    }
}
