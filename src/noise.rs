// src/noise.rs
//
// White-noise collaborator: fills a level-scoped sub-region with independent
// unit-variance values. Implementations must be deterministic given a seed,
// a level, and the absolute cell coordinate, so that overlapping requests
// (e.g. a patch margin vs. an enlarged patch) see identical values.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;

/// Sub-region of a level to be filled, in that level's own cell units.
///
/// `offset` is absolute (relative to the domain origin) and may be negative
/// for margin cells; coordinates wrap periodically at the level's domain
/// extent `2^level`.
#[derive(Debug, Clone, Copy)]
pub struct NoiseRegion {
    pub level: u32,
    pub offset: [i64; 3],
    pub extent: [usize; 3],
}

pub trait NoiseSource {
    /// Fill `out` (row-major, z fastest, length = product of extents) with
    /// noise for the given region.
    fn fill(&mut self, region: &NoiseRegion, out: &mut [f64]);
}

/// Seeded Gaussian white noise, deterministic per (seed, level, cell).
#[derive(Debug, Clone)]
pub struct WhiteNoise {
    seed: u64,
}

impl WhiteNoise {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    #[inline]
    fn cell_value(&self, level: u32, i: u64, j: u64, k: u64) -> f64 {
        // splitmix-style mixing of (seed, level, cell) into an RNG seed
        let mut h = self
            .seed
            .wrapping_add(0x9e37_79b9_7f4a_7c15u64.wrapping_mul(level as u64 + 1));
        for c in [i, j, k] {
            h ^= c.wrapping_add(0x9e37_79b9_7f4a_7c15);
            h = (h ^ (h >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
            h = (h ^ (h >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
            h ^= h >> 31;
        }
        let mut rng = SmallRng::seed_from_u64(h);
        rng.sample(StandardNormal)
    }
}

impl NoiseSource for WhiteNoise {
    fn fill(&mut self, region: &NoiseRegion, out: &mut [f64]) {
        let [nx, ny, nz] = region.extent;
        assert_eq!(out.len(), nx * ny * nz, "noise buffer length mismatch");
        let n = 1i64 << region.level;
        let wrap = |c: i64| (c.rem_euclid(n)) as u64;

        out.par_chunks_mut(nz).enumerate().for_each(|(q, row)| {
            let i = wrap(region.offset[0] + (q / ny) as i64);
            let j = wrap(region.offset[1] + (q % ny) as i64);
            for (k, v) in row.iter_mut().enumerate() {
                let kk = wrap(region.offset[2] + k as i64);
                *v = self.cell_value(region.level, i, j, kk);
            }
        });
    }
}
