//! Render entry point.
//!
//! Validates the configuration before any rays are generated, owns the
//! accumulation image across iterations, and drives the integrator.
//! Dividing the accumulated image by the iteration count for display is
//! the caller's responsibility.

use std::sync::Arc;

use ember_core::{Image, PerspectiveCamera, RenderError, RenderResult, Scene};

use crate::integrator::vcm::{VcmIntegrator, VcmSettings};
use crate::integrator::{Integrator, Technique};

/// Full render configuration.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub technique: Technique,
    pub vcm: VcmSettings,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            technique: Technique::PathTracing,
            vcm: VcmSettings::default(),
        }
    }
}

/// A progressive render of one scene through one camera.
pub struct Renderer {
    integrator: VcmIntegrator,
    image: Image,
}

impl Renderer {
    /// Validate the configuration and set up the integrator.
    ///
    /// Fails before any rays are generated on an invalid resolution, a
    /// non-positive sample count, or an empty light set.
    pub fn new(
        scene: Arc<Scene>,
        camera: PerspectiveCamera,
        settings: RenderSettings,
    ) -> RenderResult<Self> {
        let (width, height) = (camera.width(), camera.height());
        if width == 0 || height == 0 {
            return Err(RenderError::InvalidResolution { width, height });
        }
        if settings.vcm.samples_per_pixel == 0 {
            return Err(RenderError::InvalidSampleCount);
        }
        // Every technique in the family either samples lights directly or
        // starts its paths on one.
        if scene.light_count() == 0 {
            return Err(RenderError::NoLights {
                technique: settings.technique.name(),
            });
        }

        let image = Image::new(width, height);
        let integrator = VcmIntegrator::new(scene, camera, settings.technique, settings.vcm);
        Ok(Self { integrator, image })
    }

    /// Trace one iteration and accumulate it into the image.
    pub fn render_iteration(&mut self) -> &Image {
        self.integrator.render(&mut self.image);
        &self.image
    }

    /// Iterations accumulated so far.
    pub fn iterations(&self) -> u32 {
        self.integrator.iteration()
    }

    /// The accumulated (undivided) image.
    pub fn image(&self) -> &Image {
        &self.image
    }

    pub fn into_image(self) -> Image {
        self.image
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::{MaterialDesc, TriMesh};
    use ember_math::Vec3;

    fn tiny_scene(with_light: bool) -> Arc<Scene> {
        let mesh = TriMesh::new(
            vec![
                Vec3::new(-1.0, -1.0, -3.0),
                Vec3::new(1.0, -1.0, -3.0),
                Vec3::new(0.0, 1.0, -3.0),
            ],
            vec![0, 1, 2],
            vec![0],
        );
        let mat = if with_light {
            MaterialDesc::emissive("lamp", Vec3::ONE)
        } else {
            MaterialDesc::diffuse("wall", Vec3::ONE)
        };
        Arc::new(Scene::new(vec![mesh], vec![mat], Vec::new()))
    }

    fn tiny_camera(width: u32, height: u32) -> PerspectiveCamera {
        PerspectiveCamera::new(width, height, Vec3::ZERO, Vec3::NEG_Z, Vec3::Y, 60.0)
    }

    #[test]
    fn test_rejects_zero_resolution() {
        let err = Renderer::new(
            tiny_scene(true),
            tiny_camera(0, 32),
            RenderSettings::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, RenderError::InvalidResolution { .. }));
    }

    #[test]
    fn test_rejects_zero_spp() {
        let mut settings = RenderSettings::default();
        settings.vcm.samples_per_pixel = 0;
        let err = Renderer::new(tiny_scene(true), tiny_camera(8, 8), settings)
            .err()
            .unwrap();
        assert_eq!(err, RenderError::InvalidSampleCount);
    }

    #[test]
    fn test_rejects_empty_light_set() {
        let err = Renderer::new(
            tiny_scene(false),
            tiny_camera(8, 8),
            RenderSettings::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, RenderError::NoLights { .. }));
    }

    #[test]
    fn test_accumulates_across_iterations() {
        let mut settings = RenderSettings::default();
        settings.vcm.queue_target = 256;
        let mut renderer =
            Renderer::new(tiny_scene(true), tiny_camera(8, 8), settings).unwrap();
        renderer.render_iteration();
        let one = renderer.image().get(4, 4);
        renderer.render_iteration();
        let two = renderer.image().get(4, 4);
        assert_eq!(renderer.iterations(), 2);
        // The center pixel sees the emissive triangle; accumulation grows.
        assert!(one.x > 0.0);
        assert!((two.x - 2.0 * one.x).abs() < 1e-3);
    }
}
