//! Append-only cache of light-subpath vertices.
//!
//! Vertices are committed during the light-tracing phase and read during
//! connection and merging, with a synchronization barrier (the end of the
//! trace phase) between the two. Storage is per-pixel: every pixel owns a
//! fixed run of slots, so the vertices of one light path stay contiguous
//! and the bidirectional `connect` step can walk them as a slice.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};

use ember_core::Intersection;
use ember_math::Vec3;

/// An immutable, committed path vertex.
#[derive(Debug, Copy, Clone)]
pub struct Vertex {
    pub isect: Intersection,
    pub throughput: Vec3,
    pub continue_prob: f32,
    pub d_vc: f32,
    pub d_vcm: f32,
    pub d_vm: f32,
    pub path_length: u32,
    pub pixel_id: u32,
    /// Global index of the previous vertex on the same path, -1 at the
    /// path start. Lets deferred passes reconstruct full paths.
    pub ancestor: i32,
}

impl Default for Vertex {
    fn default() -> Self {
        Self {
            isect: Intersection::default(),
            throughput: Vec3::ZERO,
            continue_prob: 1.0,
            d_vc: 0.0,
            d_vcm: 0.0,
            d_vm: 0.0,
            path_length: 0,
            pixel_id: 0,
            ancestor: -1,
        }
    }
}

/// Per-pixel light-path storage with thread-safe append.
pub struct LightPathCache {
    verts: Box<[UnsafeCell<Vertex>]>,
    lens: Box<[AtomicU32]>,
    max_len: usize,
}

// Safety: a pixel's slots are only appended to by the single in-flight
// path of that pixel (one light path per pixel per iteration), lengths are
// atomic, and readers run strictly after the trace phase has joined.
unsafe impl Sync for LightPathCache {}

impl LightPathCache {
    pub fn new(path_count: usize, max_len: usize) -> Self {
        Self {
            verts: (0..path_count * max_len)
                .map(|_| UnsafeCell::new(Vertex::default()))
                .collect(),
            lens: (0..path_count).map(|_| AtomicU32::new(0)).collect(),
            max_len,
        }
    }

    pub fn path_count(&self) -> usize {
        self.lens.len()
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Forget all paths. Slots are reused by the next iteration.
    pub fn clear(&mut self) {
        for len in self.lens.iter() {
            len.store(0, Ordering::Relaxed);
        }
    }

    /// Commit a vertex to the path of `pixel_id` and return its global
    /// index (usable as an ancestor reference).
    pub fn append(&self, pixel_id: u32, vertex: Vertex) -> i32 {
        let slot = self.lens[pixel_id as usize].fetch_add(1, Ordering::Relaxed) as usize;
        assert!(slot < self.max_len, "light path exceeds vertex cache depth");
        let idx = pixel_id as usize * self.max_len + slot;
        unsafe {
            *self.verts[idx].get() = vertex;
        }
        idx as i32
    }

    /// The committed vertices of one pixel's light path.
    pub fn path(&self, pixel_id: u32) -> &[Vertex] {
        let len = self.lens[pixel_id as usize].load(Ordering::Relaxed) as usize;
        let start = pixel_id as usize * self.max_len;
        unsafe { std::slice::from_raw_parts(self.verts[start].get(), len) }
    }

    /// A committed vertex by global index.
    pub fn get(&self, idx: i32) -> &Vertex {
        debug_assert!(idx >= 0);
        unsafe { &*self.verts[idx as usize].get() }
    }

    /// Total number of committed vertices.
    pub fn len(&self) -> usize {
        self.lens
            .iter()
            .map(|l| l.load(Ordering::Relaxed) as usize)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over all committed vertices with their global indices.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &Vertex)> {
        (0..self.path_count()).flat_map(move |pixel| {
            let len = self.lens[pixel].load(Ordering::Relaxed) as usize;
            (0..len).map(move |slot| {
                let idx = pixel * self.max_len + slot;
                (idx as u32, unsafe { &*self.verts[idx].get() })
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex_at(pixel_id: u32, path_length: u32, ancestor: i32) -> Vertex {
        Vertex {
            pixel_id,
            path_length,
            ancestor,
            throughput: Vec3::ONE,
            ..Vertex::default()
        }
    }

    #[test]
    fn test_append_and_read_back() {
        let cache = LightPathCache::new(4, 8);
        let a = cache.append(2, vertex_at(2, 2, -1));
        let b = cache.append(2, vertex_at(2, 3, a));
        assert_eq!(cache.path(2).len(), 2);
        assert_eq!(cache.path(0).len(), 0);
        assert_eq!(cache.get(b).ancestor, a);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_ancestor_chain_reconstructs_path() {
        let cache = LightPathCache::new(2, 8);
        let mut prev = -1;
        for len in 2..6 {
            prev = cache.append(1, vertex_at(1, len, prev));
        }
        // Walk back from the tip to the start.
        let mut lengths = Vec::new();
        let mut idx = prev;
        while idx >= 0 {
            let v = cache.get(idx);
            lengths.push(v.path_length);
            idx = v.ancestor;
        }
        assert_eq!(lengths, vec![5, 4, 3, 2]);
    }

    #[test]
    fn test_clear_resets_lengths() {
        let mut cache = LightPathCache::new(2, 4);
        cache.append(0, vertex_at(0, 2, -1));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.path(0).len(), 0);
    }

    #[test]
    fn test_iter_yields_all_paths() {
        let cache = LightPathCache::new(3, 4);
        cache.append(0, vertex_at(0, 2, -1));
        cache.append(2, vertex_at(2, 2, -1));
        cache.append(2, vertex_at(2, 3, -1));
        let pixels: Vec<u32> = cache.iter().map(|(_, v)| v.pixel_id).collect();
        assert_eq!(pixels, vec![0, 2, 2]);
    }

    #[test]
    #[should_panic(expected = "vertex cache depth")]
    fn test_depth_overflow_panics() {
        let cache = LightPathCache::new(1, 2);
        for len in 0..3 {
            cache.append(0, vertex_at(0, len, -1));
        }
    }
}
