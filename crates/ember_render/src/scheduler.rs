//! Ray schedulers: the traversal/shading cycle.
//!
//! The streaming scheduler double-buffers two primary queues: rays are
//! generated into one, traced, shaded (possibly appending bounces to the
//! other queue and shadow rays to a third), then the queues swap. Shading
//! runs data-parallel over disjoint index ranges; traversal and the queue
//! push are the only synchronization points.
//!
//! The deferred shadow pass is the second scheduling mode: it enumerates
//! an array of cached vertices, turns each into a shadow ray, and reports
//! the unoccluded ones. Integrators use it for connections that do not
//! extend any path.

use rayon::prelude::*;

use ember_core::{Hit, Scene};
use ember_math::{Ray, Rng};

use crate::arena::BsdfArena;
use crate::queue::RayQueue;
use crate::ray_gen::{ArrayTileGen, PixelRayGen};

/// Entries shaded per worker before the arena resets; bounds per-task
/// overhead without starving the pool.
const SHADE_CHUNK: usize = 256;

/// Streaming double-buffered scheduler.
pub struct RayScheduler<S> {
    queue_a: RayQueue<S>,
    queue_b: RayQueue<S>,
    shadow: RayQueue<S>,
}

impl<S: Default + Clone + Send + Sync> RayScheduler<S> {
    /// `capacity` bounds the wavefront; shadow rays get extra room since
    /// one hit can spawn several connections.
    pub fn new(capacity: usize, shadow_capacity: usize) -> Self {
        Self {
            queue_a: RayQueue::new(capacity),
            queue_b: RayQueue::new(capacity),
            shadow: RayQueue::new(shadow_capacity),
        }
    }

    /// Drive one full generate/traverse/shade cycle until the generator
    /// and both queues are drained.
    ///
    /// `shade` runs in parallel over the traced entries of the in-queue;
    /// it may push continuation rays to the out-queue and shadow rays to
    /// the shadow queue. `shade_shadow` sees every traced shadow entry
    /// (missed entries are the unoccluded ones).
    pub fn run_iteration<F, G, H>(
        &mut self,
        scene: &Scene,
        gen: &mut PixelRayGen,
        mut sample: F,
        shade: G,
        shade_shadow: H,
    ) where
        F: FnMut(u32, u32, u32, u32, Rng) -> Option<(Ray, S)>,
        G: Fn(&Ray, &Hit, &mut S, &RayQueue<S>, &RayQueue<S>, &mut BsdfArena) + Send + Sync,
        H: Fn(&Hit, &S) + Send + Sync,
    {
        loop {
            gen.fill_queue(&self.queue_a, &mut sample);
            if self.queue_a.is_empty() {
                break;
            }

            self.queue_a.traverse(scene);

            {
                let out = &self.queue_b;
                let shadow = &self.shadow;
                let (rays, hits, states) = self.queue_a.entries_mut();
                rays.par_chunks(SHADE_CHUNK)
                    .zip(hits.par_chunks(SHADE_CHUNK))
                    .zip(states.par_chunks_mut(SHADE_CHUNK))
                    .for_each(|((chunk_rays, chunk_hits), chunk_states)| {
                        let mut arena = BsdfArena::new();
                        for ((ray, hit), state) in
                            chunk_rays.iter().zip(chunk_hits).zip(chunk_states)
                        {
                            arena.reset();
                            shade(ray, hit, state, out, shadow, &mut arena);
                        }
                    });
            }

            if !self.shadow.is_empty() {
                self.shadow.traverse_occluded(scene);
                let (_, hits, states) = self.shadow.entries_mut();
                hits.par_chunks(SHADE_CHUNK)
                    .zip(states.par_chunks(SHADE_CHUNK))
                    .for_each(|(chunk_hits, chunk_states)| {
                        for (hit, state) in chunk_hits.iter().zip(chunk_states) {
                            shade_shadow(hit, state);
                        }
                    });
                self.shadow.clear();
            }

            self.queue_a.clear();
            std::mem::swap(&mut self.queue_a, &mut self.queue_b);
        }
    }
}

/// Deferred pass: enumerate `item_count` cached vertices, emit at most one
/// shadow ray each, and call `on_unoccluded` for every ray that reached
/// its target.
///
/// `salt` keeps the RNG streams of different passes over the same array
/// apart.
pub fn run_shadow_pass<S, F, H>(
    scene: &Scene,
    queue: &mut RayQueue<S>,
    item_count: usize,
    salt: u32,
    iteration: u32,
    mut gen: F,
    on_unoccluded: H,
) where
    S: Default + Clone + Send + Sync,
    F: FnMut(u32, Rng) -> Option<(Ray, S)>,
    H: Fn(&S) + Send + Sync,
{
    let mut tiles = ArrayTileGen::new(item_count, queue.capacity(), salt, iteration);
    while !tiles.is_done() {
        tiles.fill_queue(queue, &mut gen);
        if queue.is_empty() {
            continue;
        }
        queue.traverse_occluded(scene);
        {
            let (_, hits, states) = queue.entries_mut();
            hits.par_chunks(SHADE_CHUNK)
                .zip(states.par_chunks(SHADE_CHUNK))
                .for_each(|(chunk_hits, chunk_states)| {
                    for (hit, state) in chunk_hits.iter().zip(chunk_states) {
                        if !hit.is_hit() {
                            on_unoccluded(state);
                        }
                    }
                });
        }
        queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::{MaterialDesc, Scene, TriMesh};
    use ember_math::Vec3;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn wall_scene() -> Scene {
        // A quad at z = -5 covering the view.
        let mesh = TriMesh::new(
            vec![
                Vec3::new(-10.0, -10.0, -5.0),
                Vec3::new(10.0, -10.0, -5.0),
                Vec3::new(10.0, 10.0, -5.0),
                Vec3::new(-10.0, 10.0, -5.0),
            ],
            vec![0, 1, 2, 0, 2, 3],
            vec![0, 0],
        );
        Scene::new(
            vec![mesh],
            vec![MaterialDesc::diffuse("wall", Vec3::ONE)],
            Vec::new(),
        )
    }

    #[test]
    fn test_streaming_loop_shades_every_sample() {
        let scene = wall_scene();
        let mut scheduler: RayScheduler<u32> = RayScheduler::new(256, 256);
        let mut gen = PixelRayGen::new(16, 16, 2, 128);
        gen.start_frame(0);

        let shaded = AtomicUsize::new(0);
        let shadow_seen = AtomicUsize::new(0);
        scheduler.run_iteration(
            &scene,
            &mut gen,
            |_, _, pixel, _, _| {
                Some((Ray::new(Vec3::ZERO, Vec3::NEG_Z, 0.0, f32::MAX), pixel))
            },
            |_, hit, _, _, shadow, _| {
                assert!(hit.is_hit());
                shaded.fetch_add(1, Ordering::Relaxed);
                // One shadow ray per hit, pointing away from the wall.
                shadow.push(Ray::new(Vec3::ZERO, Vec3::Z, 0.0, 1.0), 0);
            },
            |hit, _| {
                assert!(!hit.is_hit());
                shadow_seen.fetch_add(1, Ordering::Relaxed);
            },
        );

        // No bounces pushed: exactly one shade per generated sample.
        assert_eq!(shaded.load(Ordering::Relaxed), 16 * 16 * 2);
        assert_eq!(shadow_seen.load(Ordering::Relaxed), 16 * 16 * 2);
    }

    #[test]
    fn test_bounced_rays_are_shaded_next_round() {
        let scene = wall_scene();
        let mut scheduler: RayScheduler<u32> = RayScheduler::new(256, 256);
        let mut gen = PixelRayGen::new(8, 8, 1, 64);
        gen.start_frame(0);

        let total = AtomicUsize::new(0);
        scheduler.run_iteration(
            &scene,
            &mut gen,
            |_, _, _, _, _| Some((Ray::new(Vec3::ZERO, Vec3::NEG_Z, 0.0, f32::MAX), 0u32)),
            |_, _, state, out, _, _| {
                total.fetch_add(1, Ordering::Relaxed);
                // Bounce once per path.
                if *state == 0 {
                    out.push(Ray::new(Vec3::ZERO, Vec3::NEG_Z, 0.0, f32::MAX), 1);
                }
            },
            |_, _| {},
        );
        assert_eq!(total.load(Ordering::Relaxed), 8 * 8 * 2);
    }

    #[test]
    fn test_shadow_pass_reports_unoccluded() {
        let scene = wall_scene();
        let mut queue: RayQueue<u32> = RayQueue::new(64);
        let hits = AtomicUsize::new(0);
        run_shadow_pass(
            &scene,
            &mut queue,
            10,
            0,
            1,
            |item, _| {
                // Even items aim at the wall (occluded), odd ones away.
                let dir = if item % 2 == 0 { Vec3::NEG_Z } else { Vec3::Z };
                Some((Ray::new(Vec3::ZERO, dir, 0.0, f32::MAX), item))
            },
            |&item| {
                assert_eq!(item % 2, 1);
                hits.fetch_add(1, Ordering::Relaxed);
            },
        );
        assert_eq!(hits.load(Ordering::Relaxed), 5);
    }
}
