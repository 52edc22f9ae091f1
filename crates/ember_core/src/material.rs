//! Surface descriptions as loaded from scene input.
//!
//! A [`MaterialDesc`] is pure data; the renderer turns it into a BSDF at
//! every shade point. The `illum` integer follows the MTL convention for
//! selecting the model family.

use std::sync::Arc;

use ember_math::{is_black, Vec3};

use crate::texture::{OpacityMask, Texture};

/// Diffuse reflectance: either a constant color or a texture.
#[derive(Clone, Debug)]
pub enum DiffuseInput {
    Color(Vec3),
    Texture(Arc<Texture>),
}

/// The model family selected by the `illum` integer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SurfaceModel {
    /// Pure diffuse reflection.
    Diffuse,
    /// Diffuse base with a glossy (Phong) layer.
    DiffuseGlossy,
    /// Perfect mirror (conductor Fresnel).
    Mirror,
    /// Specular transmission and reflection (dielectric Fresnel).
    Glass,
}

/// A surface description.
#[derive(Clone, Debug)]
pub struct MaterialDesc {
    pub name: String,
    pub diffuse: DiffuseInput,
    /// Specular reflectance scale (MTL `Ks`).
    pub specular: Vec3,
    /// Fresnel index of refraction.
    pub eta: f32,
    /// Fresnel absorption (conductors only).
    pub kappa: f32,
    /// Emitted radiance; non-black makes the surface a light.
    pub emission: Vec3,
    /// Phong exponent of the glossy layer.
    pub glossiness: f32,
    /// Oren-Nayar roughness in degrees; zero selects plain Lambertian.
    pub roughness: f32,
    /// Optional single-channel opacity mask.
    pub opacity: Option<Arc<OpacityMask>>,
    /// MTL-style illumination model selector.
    pub illum: u32,
}

impl MaterialDesc {
    /// A plain diffuse material.
    pub fn diffuse(name: impl Into<String>, color: Vec3) -> Self {
        Self {
            name: name.into(),
            diffuse: DiffuseInput::Color(color),
            specular: Vec3::ZERO,
            eta: 1.0,
            kappa: 0.0,
            emission: Vec3::ZERO,
            glossiness: 1.0,
            roughness: 0.0,
            opacity: None,
            illum: 1,
        }
    }

    /// Give a diffuse material Oren-Nayar roughness (degrees).
    pub fn with_roughness(mut self, degrees: f32) -> Self {
        self.roughness = degrees;
        self
    }

    /// A diffuse emitter.
    pub fn emissive(name: impl Into<String>, radiance: Vec3) -> Self {
        Self {
            emission: radiance,
            ..Self::diffuse(name, Vec3::ZERO)
        }
    }

    /// A perfect mirror with the given conductor Fresnel parameters.
    pub fn mirror(name: impl Into<String>, scale: Vec3, eta: f32, kappa: f32) -> Self {
        Self {
            specular: scale,
            eta,
            kappa,
            illum: 5,
            ..Self::diffuse(name, Vec3::ZERO)
        }
    }

    /// A glass material with the given index of refraction.
    pub fn glass(name: impl Into<String>, scale: Vec3, eta: f32) -> Self {
        Self {
            specular: scale,
            eta,
            illum: 7,
            ..Self::diffuse(name, Vec3::ZERO)
        }
    }

    /// A diffuse material with a Phong glossy layer.
    pub fn glossy(
        name: impl Into<String>,
        diffuse: Vec3,
        specular: Vec3,
        exponent: f32,
    ) -> Self {
        Self {
            diffuse: DiffuseInput::Color(diffuse),
            specular,
            glossiness: exponent,
            illum: 2,
            ..Self::diffuse(name, Vec3::ZERO)
        }
    }

    pub fn with_diffuse_texture(mut self, tex: Arc<Texture>) -> Self {
        self.diffuse = DiffuseInput::Texture(tex);
        self
    }

    pub fn with_opacity(mut self, mask: Arc<OpacityMask>) -> Self {
        self.opacity = Some(mask);
        self
    }

    /// The model family this description selects.
    pub fn model(&self) -> SurfaceModel {
        match self.illum {
            5 => SurfaceModel::Mirror,
            6 | 7 => SurfaceModel::Glass,
            2 | 3 if !is_black(self.specular) => SurfaceModel::DiffuseGlossy,
            _ => SurfaceModel::Diffuse,
        }
    }

    pub fn is_emissive(&self) -> bool {
        !is_black(self.emission)
    }

    /// True if every lobe of this surface is a delta distribution.
    pub fn is_specular(&self) -> bool {
        matches!(self.model(), SurfaceModel::Mirror | SurfaceModel::Glass)
            && self.opacity.is_none()
    }
}
