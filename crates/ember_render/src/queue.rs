//! Concurrent bounded ray queue.
//!
//! A [`RayQueue`] holds parallel buffers of rays, hits, and per-ray path
//! states. Producers reserve slots with a single atomic fetch-add, so
//! `push` is wait-free and safe from any number of shading workers at
//! once. Reading the entries back requires `&mut self`, which means a
//! synchronization point (the end of a parallel shade sweep) separates
//! production from consumption.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use ember_core::{Hit, Scene, TRAVERSAL_BLOCK};
use ember_math::Ray;

/// Bounded buffer of `(ray, state, hit)` triples with wait-free push.
pub struct RayQueue<S> {
    rays: Box<[UnsafeCell<Ray>]>,
    hits: Box<[UnsafeCell<Hit>]>,
    states: Box<[UnsafeCell<S>]>,
    last: AtomicUsize,
}

// Safety: concurrent `push` calls write disjoint slots (each index is
// handed out exactly once by the fetch-add), and slot reads only happen
// through `&mut self` after the producing phase has joined.
unsafe impl<S: Send> Sync for RayQueue<S> {}

impl<S: Default + Clone + Send> RayQueue<S> {
    /// Create a queue. Capacity is rounded up to a multiple of the
    /// traversal block size so padded batches always fit.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.next_multiple_of(TRAVERSAL_BLOCK);
        Self {
            rays: (0..capacity).map(|_| UnsafeCell::new(Ray::inert())).collect(),
            hits: (0..capacity).map(|_| UnsafeCell::new(Hit::miss())).collect(),
            states: (0..capacity).map(|_| UnsafeCell::new(S::default())).collect(),
            last: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.last.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.rays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Remove all entries. The next push starts at index 0.
    pub fn clear(&mut self) {
        self.last.store(0, Ordering::Relaxed);
    }

    /// Append one entry. Wait-free and safe from many threads.
    ///
    /// Panics if the queue is full; capacity is a configuration contract,
    /// not a backpressure mechanism.
    #[inline]
    pub fn push(&self, ray: Ray, state: S) {
        let idx = self.last.fetch_add(1, Ordering::Relaxed);
        assert!(idx < self.capacity(), "ray queue overflow");
        unsafe {
            *self.rays[idx].get() = ray;
            *self.states[idx].get() = state;
        }
    }

    /// Append a contiguous batch with a single reservation.
    pub fn push_batch(&self, rays: &[Ray], states: &[S]) {
        assert_eq!(rays.len(), states.len());
        let start = self.last.fetch_add(rays.len(), Ordering::Relaxed);
        assert!(start + rays.len() <= self.capacity(), "ray queue overflow");
        for (i, (ray, state)) in rays.iter().zip(states).enumerate() {
            unsafe {
                *self.rays[start + i].get() = *ray;
                *self.states[start + i].get() = state.clone();
            }
        }
    }

    /// Mutable view of the live entries.
    pub fn entries_mut(&mut self) -> (&mut [Ray], &mut [Hit], &mut [S]) {
        let n = self.size().min(self.capacity());
        unsafe {
            (
                std::slice::from_raw_parts_mut(self.rays.as_ptr() as *mut Ray, n),
                std::slice::from_raw_parts_mut(self.hits.as_ptr() as *mut Hit, n),
                std::slice::from_raw_parts_mut(self.states.as_ptr() as *mut S, n),
            )
        }
    }

    /// Pad the ray buffer to the traversal block size with inert rays and
    /// return the padded slices.
    fn padded_buffers(&mut self) -> (&[Ray], &mut [Hit]) {
        let n = self.size().min(self.capacity());
        let padded = n.next_multiple_of(TRAVERSAL_BLOCK).min(self.capacity());
        unsafe {
            let rays = std::slice::from_raw_parts_mut(self.rays.as_ptr() as *mut Ray, padded);
            for ray in rays[n..].iter_mut() {
                *ray = Ray::inert();
            }
            (
                rays,
                std::slice::from_raw_parts_mut(self.hits.as_ptr() as *mut Hit, padded),
            )
        }
    }

    /// Closest-hit traversal over all live entries.
    pub fn traverse(&mut self, scene: &Scene) {
        let (rays, hits) = self.padded_buffers();
        scene.traverse(rays, hits);
    }

    /// Any-hit traversal; unobstructed entries end up with `tri_id < 0`.
    pub fn traverse_occluded(&mut self, scene: &Scene) {
        let (rays, hits) = self.padded_buffers();
        scene.traverse_occluded(rays, hits);
    }

    fn apply_permutation(&mut self, perm: &[usize]) {
        let (rays, hits, states) = self.entries_mut();
        debug_assert_eq!(perm.len(), rays.len());
        let new_rays: Vec<Ray> = perm.iter().map(|&i| rays[i]).collect();
        let new_hits: Vec<Hit> = perm.iter().map(|&i| hits[i]).collect();
        let new_states: Vec<S> = perm.iter().map(|&i| states[i].clone()).collect();
        rays.copy_from_slice(&new_rays);
        hits.copy_from_slice(&new_hits);
        for (dst, src) in states.iter_mut().zip(new_states) {
            *dst = src;
        }
    }

    /// Move all entries with a valid hit to the front, preserving relative
    /// order. Returns the number of hits.
    pub fn compact_hits(&mut self) -> usize {
        let n = self.size().min(self.capacity());
        let (_, hits, _) = self.entries_mut();
        let mut perm: Vec<usize> = (0..n).filter(|&i| hits[i].is_hit()).collect();
        let hit_count = perm.len();
        perm.extend((0..n).filter(|&i| !hits[i].is_hit()));
        self.apply_permutation(&perm);
        hit_count
    }

    /// Drop entries whose ray is inert, keeping the rest in order.
    /// Returns the new size.
    pub fn compact_rays(&mut self) -> usize {
        let n = self.size().min(self.capacity());
        let (rays, _, _) = self.entries_mut();
        let mut perm: Vec<usize> = (0..n).filter(|&i| !rays[i].is_inert()).collect();
        let live = perm.len();
        perm.extend((0..n).filter(|&i| rays[i].is_inert()));
        self.apply_permutation(&perm);
        self.last.store(live, Ordering::Relaxed);
        live
    }

    /// Reorder entries so equal material keys are adjacent, improving
    /// shading locality. The key of a missed entry is -1.
    pub fn sort_by_material(&mut self, key: impl Fn(&Hit) -> i32) {
        let n = self.size().min(self.capacity());
        let (_, hits, _) = self.entries_mut();
        let mut perm: Vec<usize> = (0..n).collect();
        perm.sort_by_key(|&i| key(&hits[i]));
        self.apply_permutation(&perm);
    }
}
