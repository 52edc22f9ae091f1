//! Texture storage and sampling.
//!
//! Textures are decoded once into linear RGBA float and sampled nearest or
//! bilinear. Opacity masks are single-channel.

use std::path::Path;

use ember_math::{Vec2, Vec3};
use thiserror::Error;

/// Errors that can occur while loading textures.
#[derive(Error, Debug)]
pub enum TextureError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image decoding error: {0}")]
    Decode(#[from] image::ImageError),
}

pub type TextureResult<T> = Result<T, TextureError>;

/// Texture filtering mode.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Filter {
    Nearest,
    #[default]
    Bilinear,
}

/// A 2-D image of linear RGBA float pixels.
#[derive(Clone, Debug)]
pub struct Texture {
    width: u32,
    height: u32,
    pixels: Vec<[f32; 4]>,
    filter: Filter,
}

impl Texture {
    pub fn new(width: u32, height: u32, pixels: Vec<[f32; 4]>) -> Self {
        assert_eq!(pixels.len(), (width * height) as usize);
        Self {
            width,
            height,
            pixels,
            filter: Filter::default(),
        }
    }

    /// A 1x1 solid color texture.
    pub fn solid(color: Vec3) -> Self {
        Self::new(1, 1, vec![[color.x, color.y, color.z, 1.0]])
    }

    /// Decode an image file into a linear float texture.
    ///
    /// 8-bit sources are converted from sRGB; float sources are taken as
    /// already linear.
    pub fn load(path: impl AsRef<Path>) -> TextureResult<Self> {
        let img = image::open(path.as_ref())?;
        let width = img.width();
        let height = img.height();
        let pixels = match img {
            image::DynamicImage::ImageRgb32F(data) => data
                .pixels()
                .map(|p| [p.0[0], p.0[1], p.0[2], 1.0])
                .collect(),
            image::DynamicImage::ImageRgba32F(data) => {
                data.pixels().map(|p| p.0).collect()
            }
            other => other
                .to_rgba8()
                .pixels()
                .map(|p| {
                    [
                        srgb_to_linear(p.0[0]),
                        srgb_to_linear(p.0[1]),
                        srgb_to_linear(p.0[2]),
                        p.0[3] as f32 / 255.0,
                    ]
                })
                .collect(),
        };
        log::debug!(
            "loaded texture {} ({}x{})",
            path.as_ref().display(),
            width,
            height
        );
        Ok(Self::new(width, height, pixels))
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    fn texel(&self, x: u32, y: u32) -> [f32; 4] {
        self.pixels[(y.min(self.height - 1) * self.width + x.min(self.width - 1)) as usize]
    }

    /// Sample the texture at `uv`, wrapping out-of-range coordinates.
    pub fn sample(&self, uv: Vec2) -> Vec3 {
        let rgba = self.sample_rgba(uv);
        Vec3::new(rgba[0], rgba[1], rgba[2])
    }

    pub fn sample_rgba(&self, uv: Vec2) -> [f32; 4] {
        let u = uv.x.rem_euclid(1.0);
        let v = uv.y.rem_euclid(1.0);
        match self.filter {
            Filter::Nearest => {
                let x = (u * self.width as f32) as u32;
                let y = (v * self.height as f32) as u32;
                self.texel(x, y)
            }
            Filter::Bilinear => {
                let fx = u * self.width as f32 - 0.5;
                let fy = v * self.height as f32 - 0.5;
                let x0 = fx.floor();
                let y0 = fy.floor();
                let tx = fx - x0;
                let ty = fy - y0;
                let x0 = x0.max(0.0) as u32;
                let y0 = y0.max(0.0) as u32;
                let c00 = self.texel(x0, y0);
                let c10 = self.texel(x0 + 1, y0);
                let c01 = self.texel(x0, y0 + 1);
                let c11 = self.texel(x0 + 1, y0 + 1);
                let mut out = [0.0f32; 4];
                for (i, o) in out.iter_mut().enumerate() {
                    let top = c00[i] * (1.0 - tx) + c10[i] * tx;
                    let bottom = c01[i] * (1.0 - tx) + c11[i] * tx;
                    *o = top * (1.0 - ty) + bottom * ty;
                }
                out
            }
        }
    }
}

/// Single-channel opacity mask, sampled nearest.
#[derive(Clone, Debug)]
pub struct OpacityMask {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl OpacityMask {
    pub fn new(width: u32, height: u32, values: Vec<f32>) -> Self {
        assert_eq!(values.len(), (width * height) as usize);
        Self {
            width,
            height,
            values,
        }
    }

    /// Build a mask from the alpha channel of a texture.
    pub fn from_alpha(tex: &Texture) -> Self {
        let values = (0..tex.height)
            .flat_map(|y| (0..tex.width).map(move |x| tex.texel(x, y)[3]))
            .collect();
        Self::new(tex.width, tex.height, values)
    }

    pub fn sample(&self, uv: Vec2) -> f32 {
        let u = uv.x.rem_euclid(1.0);
        let v = uv.y.rem_euclid(1.0);
        let x = ((u * self.width as f32) as u32).min(self.width - 1);
        let y = ((v * self.height as f32) as u32).min(self.height - 1);
        self.values[(y * self.width + x) as usize]
    }
}

#[inline]
fn srgb_to_linear(byte: u8) -> f32 {
    let c = byte as f32 / 255.0;
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}
