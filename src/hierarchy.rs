// src/hierarchy.rs
//
// Nested grid store: one ghost-padded rectangular array per refinement
// level, plus the per-level refinement masks and the absolute-offset
// bookkeeping that ties child grids to their parents.

use log::{info, warn};
use rayon::prelude::*;
use std::ops::{AddAssign, DivAssign, MulAssign, SubAssign};

use crate::mask::{RefinementMask, MASK_LEAF, MASK_OUTSIDE, MASK_REFINED};
use crate::mesh::{kahan_sum, GhostMesh3D};
use crate::region::RegionGenerator;

pub struct GridHierarchy {
    nbnd: usize,
    levelmin: u32,
    grids: Vec<GhostMesh3D>,
    // absolute offsets per level, in the level's own cells
    offabs: Vec<[i64; 3]>,
    masks: Vec<RefinementMask>,
    have_refmask: bool,
}

impl GridHierarchy {
    /// Create an empty hierarchy; `nbnd` is the ghost margin width applied to
    /// every level grid.
    pub fn new(nbnd: usize) -> Self {
        Self {
            nbnd,
            levelmin: 0,
            grids: Vec::new(),
            offabs: Vec::new(),
            masks: Vec::new(),
            have_refmask: false,
        }
    }

    /// Free all level grids and reset the hierarchy to its empty state.
    pub fn deallocate(&mut self) {
        self.grids.clear();
        self.offabs.clear();
        self.masks.clear();
        self.levelmin = 0;
        self.have_refmask = false;
    }

    /// Allocate levels `0..=lmax`, each a zeroed full-domain cube of side
    /// `2^level`. The minimum level starts at `lmax`: every stored grid
    /// covers the whole domain.
    pub fn create_base_hierarchy(&mut self, lmax: u32) {
        self.deallocate();
        for i in 0..=lmax {
            let n = 1usize << i;
            self.grids.push(GhostMesh3D::cubic(self.nbnd, n, [0, 0, 0]));
            self.offabs.push([0, 0, 0]);
        }
        self.levelmin = lmax;
        for i in 0..=lmax {
            let n = 1usize << i;
            self.masks
                .push(RefinementMask::new(n, n, n, (i != lmax) as i8));
        }
    }

    /// Append a refinement patch at double the current finest resolution.
    ///
    /// `offset` is relative to the current finest level (in its cells);
    /// `extent` is in the new level's own cells.
    pub fn add_patch(&mut self, offset: [i64; 3], extent: [usize; 3]) {
        self.grids.push(GhostMesh3D::new(
            self.nbnd, extent[0], extent[1], extent[2], offset,
        ));
        let prev = *self.offabs.last().expect("add_patch on empty hierarchy");
        self.offabs.push([
            2 * (prev[0] + offset[0]),
            2 * (prev[1] + offset[1]),
            2 * (prev[2] + offset[2]),
        ]);
        self.masks
            .push(RefinementMask::new(extent[0], extent[1], extent[2], 0));
    }

    /// Crop/shift a level to a new footprint given by its absolute offset
    /// (own cells) and extent.
    ///
    /// The next finer level's relative offset is adjusted by the negated
    /// delta so its absolute position is unchanged. With
    /// `enforce_coarse_mean` the new patch values are shifted by a constant
    /// to match the co-located coarser mean; otherwise the coarser level is
    /// corrected to match the patch. Any previously built refinement mask is
    /// invalidated and must be rebuilt.
    pub fn cut_patch(
        &mut self,
        ilevel: u32,
        offset_abs: [i64; 3],
        extent: [usize; 3],
        enforce_coarse_mean: bool,
    ) {
        let il = ilevel as usize;
        assert!(il < self.grids.len(), "cut_patch: no grid on level {}", ilevel);

        let mut delta = [0i64; 3];
        for d in 0..3 {
            delta[d] = offset_abs[d] - self.offabs[il][d];
        }
        assert!(
            delta.iter().all(|&v| v % 2 == 0),
            "cut_patch: offset delta ({},{},{}) must be even in every dimension",
            delta[0],
            delta[1],
            delta[2]
        );

        let new_rel = [
            self.grids[il].offset(0) + delta[0] / 2,
            self.grids[il].offset(1) + delta[1] / 2,
            self.grids[il].offset(2) + delta[2] / 2,
        ];

        let mut mnew = GhostMesh3D::new(self.nbnd, extent[0], extent[1], extent[2], new_rel);
        {
            let old = &self.grids[il];
            assert!(
                old.contains_padded(delta[0], delta[1], delta[2])
                    && old.contains_padded(
                        extent[0] as i64 - 1 + delta[0],
                        extent[1] as i64 - 1 + delta[1],
                        extent[2] as i64 - 1 + delta[2],
                    ),
                "cut_patch: new footprint (offset delta ({},{},{}), extent ({},{},{})) \
                 exceeds the old grid's ghost-padded range",
                delta[0],
                delta[1],
                delta[2],
                extent[0],
                extent[1],
                extent[2]
            );
            for i in 0..extent[0] as i64 {
                for j in 0..extent[1] as i64 {
                    for k in 0..extent[2] as i64 {
                        mnew.set(i, j, k, old.get(i + delta[0], j + delta[1], k + delta[2]));
                    }
                }
            }
        }
        let fine_mean = mnew.interior_mean();

        self.grids[il] = mnew;
        for d in 0..3 {
            self.offabs[il][d] += delta[d];
        }

        if ilevel < self.levelmax() {
            for d in 0..3 {
                *self.grids[il + 1].offset_mut(d) -= delta[d];
            }
        }

        if ilevel > self.levelmin {
            let ox = self.grids[il].offset(0);
            let oy = self.grids[il].offset(1);
            let oz = self.grids[il].offset(2);

            let coarse_mean = {
                let coarse = &self.grids[il - 1];
                let mut vals =
                    Vec::with_capacity(extent[0] / 2 * extent[1] / 2 * extent[2] / 2);
                for i in 0..(extent[0] / 2) as i64 {
                    for j in 0..(extent[1] / 2) as i64 {
                        for k in 0..(extent[2] / 2) as i64 {
                            vals.push(coarse.get(i + ox, j + oy, k + oz));
                        }
                    }
                }
                kahan_sum(&vals) / vals.len() as f64
            };

            let correction = coarse_mean - fine_mean;
            if enforce_coarse_mean {
                self.grids[il].interior_add(correction);
            } else {
                let coarse = &mut self.grids[il - 1];
                for i in 0..(extent[0] / 2) as i64 {
                    for j in 0..(extent[1] / 2) as i64 {
                        for k in 0..(extent[2] / 2) as i64 {
                            let v = coarse.get(i + ox, j + oy, k + oz) - correction;
                            coarse.set(i + ox, j + oy, k + oz, v);
                        }
                    }
                }
            }
            info!(
                "level {}: corrected patch overlap mean value by {:e}",
                ilevel, correction
            );
        }

        self.masks[il].init(extent[0], extent[1], extent[2], 0);
        self.have_refmask = false;

        self.find_new_levelmin();
    }

    /// Re-derive the coarsest level whose grid covers the whole domain.
    pub fn find_new_levelmin(&mut self) {
        for i in 0..=self.levelmax() {
            let n = 1usize << i;
            let g = &self.grids[i as usize];
            if g.size(0) == n && g.size(1) == n && g.size(2) == n {
                self.levelmin = i;
            }
        }
    }

    pub fn levelmin(&self) -> u32 {
        self.levelmin
    }

    pub fn levelmax(&self) -> u32 {
        assert!(!self.grids.is_empty(), "levelmax() on empty hierarchy");
        (self.grids.len() - 1) as u32
    }

    pub fn get_grid(&self, ilevel: u32) -> &GhostMesh3D {
        if ilevel as usize >= self.grids.len() {
            panic!(
                "attempt to access non-existent grid: level {} but levelmax = {}",
                ilevel,
                self.grids.len() as i64 - 1
            );
        }
        &self.grids[ilevel as usize]
    }

    /// Borrow a level grid together with its parent, mutably.
    pub fn levels_pair_mut(&mut self, fine: u32) -> (&mut GhostMesh3D, &mut GhostMesh3D) {
        assert!(
            fine >= 1 && (fine as usize) < self.grids.len(),
            "levels_pair_mut: no parent/child pair at level {}",
            fine
        );
        let (coarse_part, fine_part) = self.grids.split_at_mut(fine as usize);
        (&mut coarse_part[fine as usize - 1], &mut fine_part[0])
    }

    pub fn get_grid_mut(&mut self, ilevel: u32) -> &mut GhostMesh3D {
        if ilevel as usize >= self.grids.len() {
            panic!(
                "attempt to access non-existent grid: level {} but levelmax = {}",
                ilevel,
                self.grids.len() as i64 - 1
            );
        }
        &mut self.grids[ilevel as usize]
    }

    /// Offset relative to the parent level, in parent-level cells.
    pub fn offset(&self, ilevel: u32, dim: usize) -> i64 {
        self.get_grid(ilevel).offset(dim)
    }

    /// Absolute offset from the domain origin, in the level's own cells.
    pub fn offset_abs(&self, ilevel: u32, dim: usize) -> i64 {
        self.offabs[ilevel as usize][dim]
    }

    pub fn size(&self, ilevel: u32, dim: usize) -> usize {
        self.get_grid(ilevel).size(dim)
    }

    /// Position of a cell center relative to the domain, in box coordinates.
    pub fn cell_pos(&self, ilevel: u32, i: i64, j: i64, k: i64) -> [f64; 3] {
        let h = 1.0 / (1u64 << ilevel) as f64;
        let pos = [
            h * (self.offset_abs(ilevel, 0) as f64 + i as f64 + 0.5),
            h * (self.offset_abs(ilevel, 1) as f64 + j as f64 + 0.5),
            h * (self.offset_abs(ilevel, 2) as f64 + k as f64 + 0.5),
        ];
        if pos[0] >= 1.0 || pos[1] >= 1.0 || pos[2] >= 1.0 {
            warn!(
                "cell ({},{},{}) on level {} lies outside the domain: ({:.4}, {:.4}, {:.4})",
                i, j, k, ilevel, pos[0], pos[1], pos[2]
            );
        }
        pos
    }

    /// Bounding box of a level grid in box coordinates.
    pub fn grid_bbox(&self, ilevel: u32) -> ([f64; 3], [f64; 3]) {
        let h = 1.0 / (1u64 << ilevel) as f64;
        let left = [
            h * self.offset_abs(ilevel, 0) as f64,
            h * self.offset_abs(ilevel, 1) as f64,
            h * self.offset_abs(ilevel, 2) as f64,
        ];
        let right = [
            left[0] + h * self.size(ilevel, 0) as f64,
            left[1] + h * self.size(ilevel, 1) as f64,
            left[2] + h * self.size(ilevel, 2) as f64,
        ];
        (left, right)
    }

    /// Build the per-level refinement masks from the region generator.
    ///
    /// Walks from the finest level down marking in-region cells (in pairs,
    /// so refinement always covers full parent cells), then sweeps upward:
    /// a coarse cell is refined iff any of its 8 children is flagged.
    /// `shift` is the coordinate shift back into the region's own frame.
    pub fn build_refinement_mask(&mut self, region: &dyn RegionGenerator, shift: &[f64; 3]) {
        self.have_refmask = false;
        if self.levelmin == self.levelmax() {
            return;
        }

        for ilevel in (self.levelmin..=self.levelmax()).rev() {
            let il = ilevel as usize;
            let (nx, ny, nz) = (
                self.size(ilevel, 0),
                self.size(ilevel, 1),
                self.size(ilevel, 2),
            );
            let dx = 1.0 / (1u64 << ilevel) as f64;
            let offs = self.offabs[il];

            self.masks[il].init(nx, ny, nz, 0);
            for i in (0..nx).step_by(2) {
                let xq0 = (offs[0] + i as i64) as f64 * dx + 0.5 * dx + shift[0];
                for j in (0..ny).step_by(2) {
                    let xq1 = (offs[1] + j as i64) as f64 * dx + 0.5 * dx + shift[1];
                    for k in (0..nz).step_by(2) {
                        let xq2 = (offs[2] + k as i64) as f64 * dx + 0.5 * dx + shift[2];

                        let mask_val = if ilevel == self.levelmin
                            || region.query_point(&[xq0, xq1, xq2], ilevel)
                        {
                            MASK_LEAF
                        } else {
                            MASK_OUTSIDE
                        };

                        for di in 0..2usize.min(nx - i) {
                            for dj in 0..2usize.min(ny - j) {
                                for dk in 0..2usize.min(nz - k) {
                                    self.masks[il].set(i + di, j + dj, k + dk, mask_val);
                                }
                            }
                        }
                    }
                }
            }
        }

        self.have_refmask = true;

        for ilevel in self.levelmin..self.levelmax() {
            let il = ilevel as usize;
            let fine_off = [
                self.offset(ilevel + 1, 0),
                self.offset(ilevel + 1, 1),
                self.offset(ilevel + 1, 2),
            ];
            let fine_n = [
                self.size(ilevel + 1, 0) as i64,
                self.size(ilevel + 1, 1) as i64,
                self.size(ilevel + 1, 2) as i64,
            ];
            let (coarse_mask, fine_mask) = {
                let (a, b) = self.masks.split_at_mut(il + 1);
                (&mut a[il], &mut b[0])
            };

            for i in 0..coarse_mask.size(0) {
                for j in 0..coarse_mask.size(1) {
                    for k in 0..coarse_mask.size(2) {
                        let fi = 2 * i as i64 - 2 * fine_off[0];
                        let fj = 2 * j as i64 - 2 * fine_off[1];
                        let fk = 2 * k as i64 - 2 * fine_off[2];

                        if fi < 0
                            || fi + 1 >= fine_n[0]
                            || fj < 0
                            || fj + 1 >= fine_n[1]
                            || fk < 0
                            || fk + 1 >= fine_n[2]
                        {
                            continue;
                        }

                        let mut fine_flagged = false;
                        for di in 0..2 {
                            for dj in 0..2 {
                                for dk in 0..2 {
                                    fine_flagged |= fine_mask.get(
                                        (fi + di) as usize,
                                        (fj + dj) as usize,
                                        (fk + dk) as usize,
                                    ) > 0;
                                }
                            }
                        }

                        if fine_flagged {
                            coarse_mask.set(i, j, k, MASK_REFINED);
                            for di in 0..2 {
                                for dj in 0..2 {
                                    for dk in 0..2 {
                                        fine_mask.set(
                                            (fi + di) as usize,
                                            (fj + dj) as usize,
                                            (fk + dk) as usize,
                                            MASK_LEAF,
                                        );
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    pub fn have_refmask(&self) -> bool {
        self.have_refmask
    }

    /// The refinement mask of one level, if masks have been built.
    pub fn mask(&self, ilevel: u32) -> Option<&RefinementMask> {
        if self.have_refmask {
            self.masks.get(ilevel as usize)
        } else {
            None
        }
    }

    /// Whether a cell is subdivided on the next finer level.
    ///
    /// Falls back to a geometric footprint test when no mask has been built.
    pub fn is_refined(&self, ilevel: u32, i: usize, j: usize, k: usize) -> bool {
        if self.have_refmask {
            return self.masks[ilevel as usize].get(i, j, k) == MASK_REFINED;
        }

        if ilevel == self.levelmax() {
            return false;
        }

        let (i, j, k) = (i as i64, j as i64, k as i64);
        !(i < self.offset(ilevel + 1, 0)
            || i >= self.offset(ilevel + 1, 0) + self.size(ilevel + 1, 0) as i64 / 2
            || j < self.offset(ilevel + 1, 1)
            || j >= self.offset(ilevel + 1, 1) + self.size(ilevel + 1, 1) as i64 / 2
            || k < self.offset(ilevel + 1, 2)
            || k >= self.offset(ilevel + 1, 2) + self.size(ilevel + 1, 2) as i64 / 2)
    }

    /// Whether a cell belongs to the evolving refinement volume.
    pub fn is_in_mask(&self, ilevel: u32, i: usize, j: usize, k: usize) -> bool {
        if self.have_refmask {
            return self.masks[ilevel as usize].get(i, j, k) >= 0;
        }
        true
    }

    /// Count cells in `[lmin, lmax]` that are in-mask and not refined.
    ///
    /// This fixes the sample/particle count downstream consumers allocate
    /// for, so it must be stable between mask construction and output.
    pub fn count_leaf_cells(&self, lmin: u32, lmax: u32) -> usize {
        let mut count = 0usize;
        for ilevel in (lmin..=lmax).rev() {
            for i in 0..self.size(ilevel, 0) {
                for j in 0..self.size(ilevel, 1) {
                    for k in 0..self.size(ilevel, 2) {
                        if self.is_in_mask(ilevel, i, j, k) && !self.is_refined(ilevel, i, j, k) {
                            count += 1;
                        }
                    }
                }
            }
        }
        count
    }

    pub fn count_all_leaf_cells(&self) -> usize {
        self.count_leaf_cells(self.levelmin, self.levelmax())
    }

    pub fn zero(&mut self) {
        self.grids.par_iter_mut().for_each(|g| g.zero());
    }

    fn is_consistent(&self, other: &GridHierarchy) -> bool {
        if self.grids.len() != other.grids.len() || self.levelmin != other.levelmin {
            return false;
        }
        for ilevel in self.levelmin..=self.levelmax() {
            for d in 0..3 {
                if self.size(ilevel, d) != other.size(ilevel, d)
                    || self.offset(ilevel, d) != other.offset(ilevel, d)
                {
                    return false;
                }
            }
        }
        true
    }

    fn check_consistent(&self, other: &GridHierarchy, op: &str) {
        assert!(
            self.is_consistent(other),
            "GridHierarchy::{}: attempt to operate on incompatible hierarchies",
            op
        );
    }
}

impl AddAssign<f64> for GridHierarchy {
    fn add_assign(&mut self, x: f64) {
        for g in &mut self.grids {
            *g += x;
        }
    }
}

impl SubAssign<f64> for GridHierarchy {
    fn sub_assign(&mut self, x: f64) {
        for g in &mut self.grids {
            *g -= x;
        }
    }
}

impl MulAssign<f64> for GridHierarchy {
    fn mul_assign(&mut self, x: f64) {
        for g in &mut self.grids {
            *g *= x;
        }
    }
}

impl DivAssign<f64> for GridHierarchy {
    fn div_assign(&mut self, x: f64) {
        for g in &mut self.grids {
            *g /= x;
        }
    }
}

impl AddAssign<&GridHierarchy> for GridHierarchy {
    fn add_assign(&mut self, other: &GridHierarchy) {
        self.check_consistent(other, "add_assign");
        for (a, b) in self.grids.iter_mut().zip(other.grids.iter()) {
            *a += b;
        }
    }
}

impl SubAssign<&GridHierarchy> for GridHierarchy {
    fn sub_assign(&mut self, other: &GridHierarchy) {
        self.check_consistent(other, "sub_assign");
        for (a, b) in self.grids.iter_mut().zip(other.grids.iter()) {
            *a -= b;
        }
    }
}

impl MulAssign<&GridHierarchy> for GridHierarchy {
    fn mul_assign(&mut self, other: &GridHierarchy) {
        self.check_consistent(other, "mul_assign");
        for (a, b) in self.grids.iter_mut().zip(other.grids.iter()) {
            *a *= b;
        }
    }
}

impl DivAssign<&GridHierarchy> for GridHierarchy {
    fn div_assign(&mut self, other: &GridHierarchy) {
        self.check_consistent(other, "div_assign");
        for (a, b) in self.grids.iter_mut().zip(other.grids.iter()) {
            *a /= b;
        }
    }
}
