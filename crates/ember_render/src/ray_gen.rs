//! Ray generators: sources of initial rays for the schedulers.
//!
//! A generator fills a queue tile by tile until its domain (pixels times
//! samples, or a vertex array) is exhausted. The per-ray RNG is seeded
//! from the generator indices, never from global state, which keeps the
//! sample set reproducible.

use ember_math::{bernstein_seed, Ray, Rng};

use crate::queue::RayQueue;

/// Generates one entry per `(pixel, sample)` pair, in scanline order.
///
/// Used for camera rays (one sample per pixel per call to the sampler)
/// and for light subpaths (one path per pixel id).
pub struct PixelRayGen {
    width: u32,
    height: u32,
    samples: u32,
    target: usize,
    next: u64,
    iteration: u32,
}

impl PixelRayGen {
    /// `target` is the queue fill level a single `fill_queue` call aims
    /// for; it bounds the wavefront size.
    pub fn new(width: u32, height: u32, samples: u32, target: usize) -> Self {
        Self {
            width,
            height,
            samples,
            target,
            next: 0,
            iteration: 0,
        }
    }

    pub fn start_frame(&mut self, iteration: u32) {
        self.next = 0;
        self.iteration = iteration;
    }

    fn total(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.samples as u64
    }

    pub fn is_done(&self) -> bool {
        self.next >= self.total()
    }

    /// Generate rays until the queue reaches the target fill level or the
    /// frame is exhausted. The sampler returns `None` to skip an entry.
    pub fn fill_queue<S, F>(&mut self, queue: &RayQueue<S>, mut sample: F)
    where
        S: Default + Clone + Send,
        F: FnMut(u32, u32, u32, u32, Rng) -> Option<(Ray, S)>,
    {
        if self.is_done() || queue.size() >= self.target {
            return;
        }
        let count = (self.target - queue.size()) as u64;
        let count = count.min(self.total() - self.next);

        let pixel_count = self.width as u64 * self.height as u64;
        for i in self.next..self.next + count {
            let pixel_id = (i % pixel_count) as u32;
            let sample_id = (i / pixel_count) as u32;
            let x = pixel_id % self.width;
            let y = pixel_id / self.width;
            let rng = Rng::new(bernstein_seed(pixel_id, sample_id, self.iteration));
            if let Some((ray, state)) = sample(x, y, pixel_id, sample_id, rng) {
                queue.push(ray, state);
            }
        }
        self.next += count;
    }
}

/// Enumerates the indices of an array (cached vertices, probe slots) and
/// turns each into at most one ray.
pub struct ArrayTileGen {
    count: usize,
    next: usize,
    target: usize,
    salt: u32,
    iteration: u32,
}

impl ArrayTileGen {
    /// `salt` separates the RNG streams of different deferred passes over
    /// the same array.
    pub fn new(count: usize, target: usize, salt: u32, iteration: u32) -> Self {
        Self {
            count,
            next: 0,
            target,
            salt,
            iteration,
        }
    }

    pub fn is_done(&self) -> bool {
        self.next >= self.count
    }

    pub fn fill_queue<S, F>(&mut self, queue: &RayQueue<S>, mut gen: F)
    where
        S: Default + Clone + Send,
        F: FnMut(u32, Rng) -> Option<(Ray, S)>,
    {
        if self.is_done() || queue.size() >= self.target {
            return;
        }
        let count = (self.target - queue.size()).min(self.count - self.next);
        for item in self.next..self.next + count {
            let rng = Rng::new(bernstein_seed(item as u32, self.salt, self.iteration));
            if let Some((ray, state)) = gen(item as u32, rng) {
                queue.push(ray, state);
            }
        }
        self.next += count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_math::Vec3;

    #[test]
    fn test_pixel_gen_covers_every_pixel_sample() {
        let mut gen = PixelRayGen::new(4, 3, 2, 8);
        gen.start_frame(0);
        let mut seen = vec![0u32; 4 * 3 * 2];
        while !gen.is_done() {
            let mut queue: RayQueue<u32> = RayQueue::new(64);
            gen.fill_queue(&queue, |_, _, pixel, sample, _| {
                Some((
                    Ray::new(Vec3::ZERO, Vec3::Z, 0.0, f32::MAX),
                    sample * 12 + pixel,
                ))
            });
            let (_, _, states) = queue.entries_mut();
            for &s in states.iter() {
                seen[s as usize] += 1;
            }
        }
        assert!(seen.iter().all(|&c| c == 1));
    }

    #[test]
    fn test_fill_respects_target() {
        let mut gen = PixelRayGen::new(64, 64, 1, 100);
        gen.start_frame(0);
        let queue: RayQueue<u32> = RayQueue::new(4096);
        gen.fill_queue(&queue, |_, _, _, _, _| {
            Some((Ray::new(Vec3::ZERO, Vec3::Z, 0.0, f32::MAX), 0))
        });
        assert_eq!(queue.size(), 100);
        assert!(!gen.is_done());
    }

    #[test]
    fn test_rng_streams_differ_per_pixel() {
        let mut gen = PixelRayGen::new(2, 1, 1, 8);
        gen.start_frame(3);
        let queue: RayQueue<u32> = RayQueue::new(64);
        let mut draws = Vec::new();
        gen.fill_queue(&queue, |_, _, _, _, mut rng| {
            draws.push(rng.next_u32());
            None
        });
        assert_eq!(draws.len(), 2);
        assert_ne!(draws[0], draws[1]);
        assert_eq!(queue.size(), 0);
    }

    #[test]
    fn test_array_gen_enumerates_once() {
        let mut gen = ArrayTileGen::new(10, 4, 0, 1);
        let mut items = Vec::new();
        while !gen.is_done() {
            let mut queue: RayQueue<u32> = RayQueue::new(64);
            gen.fill_queue(&queue, |item, _| {
                Some((Ray::new(Vec3::ZERO, Vec3::Z, 0.0, f32::MAX), item))
            });
            let (_, _, states) = queue.entries_mut();
            items.extend_from_slice(states);
        }
        assert_eq!(items, (0..10).collect::<Vec<u32>>());
    }
}
