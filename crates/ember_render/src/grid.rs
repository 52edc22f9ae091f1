//! Spatial hash grid over light-subpath vertices.
//!
//! Built once per iteration after the light-tracing phase and read-only
//! during merging. Cells are hashed into a flat table with a counting
//! sort, so the build is two passes over the photons and queries touch at
//! most the 27 cells around the query point.

use ember_math::Vec3;

/// Hash of an integer cell coordinate (Teschner et al. primes).
#[inline]
fn hash_cell(x: i32, y: i32, z: i32, table_size: usize) -> usize {
    let h = (x.wrapping_mul(73_856_093))
        ^ (y.wrapping_mul(19_349_663))
        ^ (z.wrapping_mul(83_492_791));
    (h as u32 as usize) % table_size
}

/// kNN / range query structure over photon positions.
pub struct PhotonGrid {
    cell_size: f32,
    radius: f32,
    table_size: usize,
    cell_starts: Vec<u32>,
    entries: Vec<(u32, Vec3)>,
    built: bool,
}

impl PhotonGrid {
    pub fn new() -> Self {
        Self {
            cell_size: 1.0,
            radius: 0.0,
            table_size: 0,
            cell_starts: Vec::new(),
            entries: Vec::new(),
            built: false,
        }
    }

    /// Pre-reserve storage for an expected photon count.
    pub fn reserve(&mut self, photons: usize) {
        self.entries.reserve(photons);
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Rebuild the grid over `photons` (global vertex index, position)
    /// with a query radius of `radius`.
    pub fn build(&mut self, photons: &[(u32, Vec3)], radius: f32) {
        assert!(radius > 0.0);
        self.cell_size = radius;
        self.radius = radius;
        self.table_size = (photons.len().max(1) * 2).next_power_of_two();
        self.cell_starts.clear();
        self.cell_starts.resize(self.table_size + 1, 0);
        self.entries.clear();
        self.entries.resize(photons.len(), (0, Vec3::ZERO));

        // Counting sort into hash buckets.
        for (_, pos) in photons {
            let c = self.cell_of(*pos);
            self.cell_starts[hash_cell(c[0], c[1], c[2], self.table_size)] += 1;
        }
        let mut running = 0;
        for start in self.cell_starts.iter_mut() {
            let count = *start;
            *start = running;
            running += count;
        }
        self.cell_starts[self.table_size] = running;

        let mut cursor = self.cell_starts.clone();
        for photon in photons {
            let c = self.cell_of(photon.1);
            let bucket = hash_cell(c[0], c[1], c[2], self.table_size);
            self.entries[cursor[bucket] as usize] = *photon;
            cursor[bucket] += 1;
        }

        self.built = true;
        log::debug!(
            "photon grid: {} photons, radius {}, {} buckets",
            photons.len(),
            radius,
            self.table_size
        );
    }

    #[inline]
    fn cell_of(&self, pos: Vec3) -> [i32; 3] {
        [
            (pos.x / self.cell_size).floor() as i32,
            (pos.y / self.cell_size).floor() as i32,
            (pos.z / self.cell_size).floor() as i32,
        ]
    }

    /// Collect every photon within `radius` of `pos`, as
    /// `(global index, squared distance)` pairs.
    ///
    /// `radius` must not exceed the build radius (the cell size bounds the
    /// search window). Panics if the grid was never built.
    pub fn range_query(&self, pos: Vec3, radius: f32, out: &mut Vec<(u32, f32)>) {
        assert!(self.built, "photon grid queried before build");
        assert!(radius <= self.cell_size + 1e-6);
        out.clear();
        if self.entries.is_empty() {
            return;
        }
        let r_sqr = radius * radius;
        let c = self.cell_of(pos);

        // Hash collisions can map several neighbor cells to one bucket;
        // remember visited buckets so entries are reported once.
        let mut visited = [usize::MAX; 27];
        let mut n_visited = 0;

        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let bucket = hash_cell(c[0] + dx, c[1] + dy, c[2] + dz, self.table_size);
                    if visited[..n_visited].contains(&bucket) {
                        continue;
                    }
                    visited[n_visited] = bucket;
                    n_visited += 1;

                    let start = self.cell_starts[bucket] as usize;
                    let end = self.cell_starts[bucket + 1] as usize;
                    for (idx, photon_pos) in &self.entries[start..end] {
                        let d_sqr = (*photon_pos - pos).length_squared();
                        if d_sqr <= r_sqr {
                            out.push((*idx, d_sqr));
                        }
                    }
                }
            }
        }
    }

    /// The at-most-`k` photons closest to `pos` within the build radius,
    /// sorted by distance.
    pub fn knn(&self, pos: Vec3, k: usize, out: &mut Vec<(u32, f32)>) {
        self.range_query(pos, self.radius, out);
        out.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        out.truncate(k);
    }
}

impl Default for PhotonGrid {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_math::Rng;

    fn random_cloud(n: usize, seed: u32) -> Vec<(u32, Vec3)> {
        let mut rng = Rng::new(seed);
        (0..n)
            .map(|i| {
                (
                    i as u32,
                    Vec3::new(
                        rng.random_float() * 4.0 - 2.0,
                        rng.random_float() * 4.0 - 2.0,
                        rng.random_float() * 4.0 - 2.0,
                    ),
                )
            })
            .collect()
    }

    #[test]
    fn test_range_query_is_exact() {
        let photons = random_cloud(2000, 7);
        let mut grid = PhotonGrid::new();
        let radius = 0.25;
        grid.build(&photons, radius);

        let mut rng = Rng::new(8);
        let mut found = Vec::new();
        for _ in 0..50 {
            let q = Vec3::new(
                rng.random_float() * 4.0 - 2.0,
                rng.random_float() * 4.0 - 2.0,
                rng.random_float() * 4.0 - 2.0,
            );
            grid.range_query(q, radius, &mut found);

            let mut expected: Vec<u32> = photons
                .iter()
                .filter(|(_, p)| (*p - q).length() <= radius)
                .map(|(i, _)| *i)
                .collect();
            let mut got: Vec<u32> = found.iter().map(|(i, _)| *i).collect();
            expected.sort();
            got.sort();
            assert_eq!(got, expected);
        }
    }

    #[test]
    fn test_knn_returns_closest() {
        let photons = random_cloud(500, 9);
        let mut grid = PhotonGrid::new();
        grid.build(&photons, 0.5);

        let q = Vec3::new(0.1, -0.2, 0.3);
        let mut found = Vec::new();
        grid.knn(q, 5, &mut found);
        assert!(found.len() <= 5);
        // Sorted by distance.
        for pair in found.windows(2) {
            assert!(pair[0].1 <= pair[1].1);
        }
        // No photon inside the radius is closer than the reported k-th.
        if let Some(&(_, worst)) = found.last() {
            let closer = photons
                .iter()
                .filter(|(_, p)| (*p - q).length_squared() < worst - 1e-7)
                .count();
            assert!(closer < 5);
        }
    }

    #[test]
    fn test_empty_grid_queries_empty() {
        let mut grid = PhotonGrid::new();
        grid.build(&[], 0.5);
        let mut found = vec![(0, 0.0)];
        grid.range_query(Vec3::ZERO, 0.5, &mut found);
        assert!(found.is_empty());
    }

    #[test]
    #[should_panic(expected = "queried before build")]
    fn test_query_before_build_panics() {
        let grid = PhotonGrid::new();
        let mut found = Vec::new();
        grid.range_query(Vec3::ZERO, 0.1, &mut found);
    }
}
