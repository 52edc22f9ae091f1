//! Accumulation images.
//!
//! Renders accumulate linear RGB radiance across iterations; dividing by
//! the iteration count for display is the caller's responsibility.

use ember_math::Vec3;
use std::sync::atomic::{AtomicU32, Ordering};

/// Linear RGB float image.
#[derive(Clone)]
pub struct Image {
    width: u32,
    height: u32,
    pixels: Vec<Vec3>,
}

impl Image {
    /// Create a new image filled with black.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![Vec3::ZERO; (width * height) as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[Vec3] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [Vec3] {
        &mut self.pixels
    }

    pub fn get(&self, x: u32, y: u32) -> Vec3 {
        self.pixels[(y * self.width + x) as usize]
    }

    pub fn clear(&mut self) {
        self.pixels.fill(Vec3::ZERO);
    }
}

/// A float that supports atomic addition through a compare-and-swap loop
/// on its bit pattern.
pub struct AtomicFloat {
    bits: AtomicU32,
}

impl AtomicFloat {
    pub fn new(value: f32) -> Self {
        Self {
            bits: AtomicU32::new(value.to_bits()),
        }
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f32) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Atomically add `value`.
    pub fn add(&self, value: f32) {
        let mut old = self.bits.load(Ordering::Relaxed);
        loop {
            let new = (f32::from_bits(old) + value).to_bits();
            match self
                .bits
                .compare_exchange_weak(old, new, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(current) => old = current,
            }
        }
    }
}

/// An image whose pixels can be splatted to from many threads at once.
///
/// Light tracing and connection passes write to arbitrary pixels, so the
/// accumulation must be commutative and race-free. Additive CAS updates
/// give exactly that.
pub struct AtomicImage {
    width: u32,
    height: u32,
    pixels: Vec<[AtomicFloat; 3]>,
}

impl AtomicImage {
    pub fn new(width: u32, height: u32) -> Self {
        let n = (width * height) as usize;
        let pixels = (0..n)
            .map(|_| [AtomicFloat::new(0.0), AtomicFloat::new(0.0), AtomicFloat::new(0.0)])
            .collect();
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_count(&self) -> usize {
        self.pixels.len()
    }

    /// Add `color` to the pixel with the given flat index.
    #[inline]
    pub fn add(&self, pixel_id: u32, color: Vec3) {
        let p = &self.pixels[pixel_id as usize];
        p[0].add(color.x);
        p[1].add(color.y);
        p[2].add(color.z);
    }

    pub fn get(&self, pixel_id: u32) -> Vec3 {
        let p = &self.pixels[pixel_id as usize];
        Vec3::new(p[0].load(), p[1].load(), p[2].load())
    }

    pub fn clear(&self) {
        for p in &self.pixels {
            p[0].store(0.0);
            p[1].store(0.0);
            p[2].store(0.0);
        }
    }

    /// Add every pixel into `target`.
    pub fn accumulate_into(&self, target: &mut Image) {
        assert_eq!(self.pixels.len(), target.pixels().len());
        for (i, out) in target.pixels_mut().iter_mut().enumerate() {
            *out += self.get(i as u32);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_atomic_add_from_threads() {
        let img = Arc::new(AtomicImage::new(4, 4));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let img = Arc::clone(&img);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        img.add(5, Vec3::ONE);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        let v = img.get(5);
        assert!((v.x - 8000.0).abs() < 0.5);
        assert!((v.y - 8000.0).abs() < 0.5);
    }

    #[test]
    fn test_accumulate_into() {
        let atomic = AtomicImage::new(2, 2);
        atomic.add(3, Vec3::new(1.0, 2.0, 3.0));
        let mut img = Image::new(2, 2);
        atomic.accumulate_into(&mut img);
        atomic.accumulate_into(&mut img);
        assert_eq!(img.get(1, 1), Vec3::new(2.0, 4.0, 6.0));
    }
}
