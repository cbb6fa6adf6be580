// src/density/working.rs
//
// Working buffers for the density pipeline: a full-domain cube for the base
// level and a margin-padded sub-grid for refinement patches. These are the
// convolution targets; finished values are copied into the hierarchy and the
// buffer is retired before the next level is allocated.

use crate::mesh::GhostMesh3D;
use crate::noise::NoiseRegion;

/// Unpadded working cube for the periodic base level.
#[derive(Debug, Clone)]
pub struct DensityGrid3D {
    nx: usize,
    ny: usize,
    nz: usize,
    data: Vec<f64>,
}

impl DensityGrid3D {
    pub fn new(nx: usize, ny: usize, nz: usize) -> Self {
        Self {
            nx,
            ny,
            nz,
            data: vec![0.0; nx * ny * nz],
        }
    }

    pub fn extent(&self) -> [usize; 3] {
        [self.nx, self.ny, self.nz]
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize) -> f64 {
        debug_assert!(i < self.nx && j < self.ny && k < self.nz);
        self.data[(i * self.ny + j) * self.nz + k]
    }

    /// Read with periodic wraparound, for splicing against the base grid.
    #[inline]
    pub fn get_periodic(&self, i: i64, j: i64, k: i64) -> f64 {
        let i = i.rem_euclid(self.nx as i64) as usize;
        let j = j.rem_euclid(self.ny as i64) as usize;
        let k = k.rem_euclid(self.nz as i64) as usize;
        self.data[(i * self.ny + j) * self.nz + k]
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn noise_region(&self, level: u32) -> NoiseRegion {
        NoiseRegion {
            level,
            offset: [0, 0, 0],
            extent: self.extent(),
        }
    }

    /// Copy into a hierarchy grid of identical logical extent.
    pub fn copy_into(&self, dst: &mut GhostMesh3D) {
        assert!(
            dst.size(0) == self.nx && dst.size(1) == self.ny && dst.size(2) == self.nz,
            "copy_into: destination extent ({},{},{}) does not match source ({},{},{})",
            dst.size(0),
            dst.size(1),
            dst.size(2),
            self.nx,
            self.ny,
            self.nz
        );
        for i in 0..self.nx {
            for j in 0..self.ny {
                for k in 0..self.nz {
                    dst.set(i as i64, j as i64, k as i64, self.get(i, j, k));
                }
            }
        }
    }
}

/// Margin-padded working patch for one refinement level.
///
/// The interior is the patch proper; the margin carries independently
/// generated noise so the convolution and the spectral splice see
/// surroundings instead of a hard cut. When no margin is given, half the
/// interior extent is used (double padding).
#[derive(Debug, Clone)]
pub struct PaddedSubGrid3D {
    // offset of the interior relative to the parent level, in parent cells
    offset: [i64; 3],
    interior: [usize; 3],
    // one-side margin in own-level cells
    margin: [usize; 3],
    data: Vec<f64>,
}

impl PaddedSubGrid3D {
    pub fn new(offset: [i64; 3], interior: [usize; 3]) -> Self {
        let margin = [interior[0] / 2, interior[1] / 2, interior[2] / 2];
        Self::with_margin(offset, interior, margin)
    }

    pub fn with_margin(offset: [i64; 3], interior: [usize; 3], margin: [usize; 3]) -> Self {
        let padded = [
            interior[0] + 2 * margin[0],
            interior[1] + 2 * margin[1],
            interior[2] + 2 * margin[2],
        ];
        Self {
            offset,
            interior,
            margin,
            data: vec![0.0; padded[0] * padded[1] * padded[2]],
        }
    }

    pub fn offset(&self, dim: usize) -> i64 {
        self.offset[dim]
    }

    pub fn interior_extent(&self) -> [usize; 3] {
        self.interior
    }

    pub fn margin(&self, dim: usize) -> usize {
        self.margin[dim]
    }

    /// Full padded extent along a dimension.
    pub fn size(&self, dim: usize) -> usize {
        self.interior[dim] + 2 * self.margin[dim]
    }

    pub fn padded_extent(&self) -> [usize; 3] {
        [self.size(0), self.size(1), self.size(2)]
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize) -> f64 {
        debug_assert!(i < self.size(0) && j < self.size(1) && k < self.size(2));
        self.data[(i * self.size(1) + j) * self.size(2) + k]
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Noise region covering the whole padded array, given the interior's
    /// absolute offset in own-level cells.
    pub fn noise_region(&self, level: u32, offset_abs: [i64; 3]) -> NoiseRegion {
        NoiseRegion {
            level,
            offset: [
                offset_abs[0] - self.margin[0] as i64,
                offset_abs[1] - self.margin[1] as i64,
                offset_abs[2] - self.margin[2] as i64,
            ],
            extent: self.padded_extent(),
        }
    }

    /// Copy the interior (margin trimmed) into a hierarchy grid.
    pub fn copy_unpad_into(&self, dst: &mut GhostMesh3D) {
        assert!(
            dst.size(0) == self.interior[0]
                && dst.size(1) == self.interior[1]
                && dst.size(2) == self.interior[2],
            "copy_unpad_into: destination extent ({},{},{}) does not match interior ({},{},{})",
            dst.size(0),
            dst.size(1),
            dst.size(2),
            self.interior[0],
            self.interior[1],
            self.interior[2]
        );
        let [mx, my, mz] = self.margin;
        for i in 0..self.interior[0] {
            for j in 0..self.interior[1] {
                for k in 0..self.interior[2] {
                    dst.set(
                        i as i64,
                        j as i64,
                        k as i64,
                        self.get(i + mx, j + my, k + mz),
                    );
                }
            }
        }
    }
}

/// The previous level's working buffer during hierarchy assembly: the
/// periodic base cube for the first refined level, a padded patch afterwards.
pub enum WorkBuffer {
    Base(DensityGrid3D),
    Patch(PaddedSubGrid3D),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn periodic_reads_wrap() {
        let mut g = DensityGrid3D::new(4, 4, 4);
        g.data_mut()[0] = 7.0;
        assert_eq!(g.get_periodic(4, 0, 0), 7.0);
        assert_eq!(g.get_periodic(-4, 8, -12), 7.0);
    }

    #[test]
    fn default_margin_is_half_the_interior() {
        let p = PaddedSubGrid3D::new([3, 3, 3], [8, 8, 8]);
        assert_eq!(p.margin(0), 4);
        assert_eq!(p.size(0), 16);
        assert_eq!(p.data().len(), 16 * 16 * 16);
    }

    #[test]
    fn unpad_copies_the_interior_only() {
        let mut p = PaddedSubGrid3D::with_margin([0, 0, 0], [4, 4, 4], [2, 2, 2]);
        let n = p.size(0);
        for i in 0..n {
            for j in 0..n {
                for k in 0..n {
                    let interior = (2..6).contains(&i) && (2..6).contains(&j) && (2..6).contains(&k);
                    let q = (i * n + j) * n + k;
                    p.data_mut()[q] = if interior { 1.0 } else { -1.0 };
                }
            }
        }

        let mut dst = GhostMesh3D::new(2, 4, 4, 4, [0, 0, 0]);
        p.copy_unpad_into(&mut dst);
        for i in 0..4 {
            for j in 0..4 {
                for k in 0..4 {
                    assert_eq!(dst.get(i, j, k), 1.0);
                }
            }
        }
        // ghost cells stay untouched
        assert_eq!(dst.get(-1, 0, 0), 0.0);
    }

    #[test]
    fn noise_region_covers_the_margin() {
        let p = PaddedSubGrid3D::with_margin([5, 5, 5], [8, 8, 8], [4, 4, 4]);
        let r = p.noise_region(7, [20, 22, 24]);
        assert_eq!(r.offset, [16, 18, 20]);
        assert_eq!(r.extent, [16, 16, 16]);
    }
}
