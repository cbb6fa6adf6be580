// src/geometry.rs
//
// Level geometry resolver: turns the configured level range, the refinement
// region's bounding box and the alignment/padding/blocking rules into one
// (offset, absolute offset, extent) triple per level. Offsets relative to
// the parent are kept in parent-level cells; absolute offsets in the level's
// own cells. After resolution the two are tied together by
//   abs[l] = 2*abs[l-1] + 2*offset[l]
// which a final forward sweep enforces exactly.

use log::{info, warn};

use crate::config::{Alignment, SetupConfig};
use crate::error::GridError;
use crate::region::RegionGenerator;

#[derive(Debug, Clone)]
pub struct RefinementGeometry {
    levelmin: u32,
    levelmax: u32,
    levelmin_tf: u32,

    padding: i64,
    blocking_factor: i64,
    gridding_unit: i64,
    margin: i32,
    alignment: Alignment,
    equal_extent: bool,

    // per level: origin and extent of the grid in box coordinates
    x0: Vec<[f64; 3]>,
    xl: Vec<[f64; 3]>,

    offsets: Vec<[i64; 3]>,
    absoffsets: Vec<[i64; 3]>,
    len: Vec<[i64; 3]>,

    xshift: [i64; 3],
    rshift: [f64; 3],
}

fn gcd(a: i64, b: i64) -> i64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

// cell shift granularity (in coarse cells) compatible with an external
// partitioning of the domain into multiples of `base_unit`
fn shift_unit(base_unit: i64, levelmin: u32) -> i64 {
    let ncoarse = 1i64 << levelmin;
    let mut level_m = 0u32;
    while base_unit * (1i64 << level_m) < ncoarse {
        level_m += 1;
    }
    std::cmp::max(1, ncoarse / gcd(base_unit * (1i64 << level_m), ncoarse))
}

impl RefinementGeometry {
    pub fn new(cfg: &SetupConfig, region: &mut dyn RegionGenerator) -> Result<Self, GridError> {
        cfg.validate()?;

        let levelmin = cfg.levelmin;
        let levelmax = cfg.levelmax;
        let nlevels = (levelmax + 1) as usize;

        let mut blocking_factor = cfg.blocking_factor as i64;
        let gridding_unit = cfg.gridding_unit as i64;

        if gridding_unit != 2 && blocking_factor == 0 {
            blocking_factor = gridding_unit;
        } else if gridding_unit != 2 && blocking_factor != 0 && gridding_unit != blocking_factor {
            return Err(GridError::Config(format!(
                "incompatible gridding_unit ({}) and blocking_factor ({})",
                gridding_unit, blocking_factor
            )));
        }

        let mut x0ref = [0.0f64; 3];
        let mut lxref = [1.0f64; 3];
        let mut forced_dims: Option<[i64; 3]> = None;

        if levelmin != levelmax {
            let (left, right) = region.aabb(levelmax);
            x0ref = left;
            for d in 0..3 {
                lxref[d] = right[d] - left[d];
            }
            forced_dims = region.forced_grid_dims();
            info!(
                "refinement region bounding box: left = [{:.4}, {:.4}, {:.4}], right = [{:.4}, {:.4}, {:.4}]",
                left[0], left[1], left[2], right[0], right[1], right[2]
            );
        }

        let ncoarse = 1i64 << levelmin;

        // domain shift centering the refinement region away from the wrap
        // boundary, snapped to the granularity the noise source tolerates
        let mut xshift = [0i64; 3];
        if levelmin != levelmax && (!cfg.no_shift || cfg.force_shift) {
            let unit = shift_unit(cfg.base_unit, levelmin);
            if unit != 1 {
                info!("volume can only be shifted by multiples of {} coarse cells", unit);
            }
            for d in 0..3 {
                let xc = (x0ref[d] + 0.5 * lxref[d]).rem_euclid(1.0);
                xshift[d] = ((0.5 - xc) * ncoarse as f64 / unit as f64 + 0.5) as i64 * unit;
            }
        }

        let mut rshift = [0.0f64; 3];
        for d in 0..3 {
            rshift[d] = -(xshift[d] as f64) / ncoarse as f64;
            x0ref[d] += xshift[d] as f64 / ncoarse as f64;
        }

        let x0 = vec![[0.0f64; 3]; nlevels];
        let xl = vec![[1.0f64; 3]; nlevels];
        let offsets = vec![[0i64; 3]; nlevels];
        let absoffsets = vec![[0i64; 3]; nlevels];
        let mut len = vec![[0i64; 3]; nlevels];

        for ilevel in 0..=levelmin {
            let n = 1i64 << ilevel;
            len[ilevel as usize] = [n, n, n];
        }

        let mut geo = Self {
            levelmin,
            levelmax,
            levelmin_tf: cfg.levelmin_tf(),
            padding: cfg.padding as i64,
            blocking_factor,
            gridding_unit,
            margin: cfg.convolution_margin,
            alignment: cfg.alignment,
            equal_extent: cfg.equal_extent,
            x0,
            xl,
            offsets,
            absoffsets,
            len,
            xshift,
            rshift,
        };

        if levelmax == levelmin {
            return Ok(geo);
        }

        geo.resolve_levels(cfg, x0ref, lxref, forced_dims)?;

        // report the realized finest box back, with the shift unapplied
        let lmax = levelmax as usize;
        let left = [
            geo.x0[lmax][0] + geo.rshift[0],
            geo.x0[lmax][1] + geo.rshift[1],
            geo.x0[lmax][2] + geo.rshift[2],
        ];
        let right = [
            left[0] + geo.xl[lmax][0],
            left[1] + geo.xl[lmax][1],
            left[2] + geo.xl[lmax][2],
        ];
        region.update_aabb(left, right);

        Ok(geo)
    }

    fn resolve_levels(
        &mut self,
        cfg: &SetupConfig,
        x0ref: [f64; 3],
        lxref: [f64; 3],
        forced_dims: Option<[i64; 3]>,
    ) -> Result<(), GridError> {
        let levelmin = self.levelmin;
        let levelmax = self.levelmax;
        let nresmax = 1i64 << levelmax;
        let gu = self.gridding_unit;

        // refinement region corners on the finest grid
        let mut l = [0i64; 3];
        let mut r = [0i64; 3];
        for d in 0..3 {
            l[d] = (x0ref[d] * nresmax as f64) as i64;
            r[d] = ((x0ref[d] + lxref[d]) * nresmax as f64) as i64;
        }

        match self.alignment {
            Alignment::TopGrid => {
                let nref = 1i64 << (levelmax - levelmin + 1);
                if let Some(nd) = forced_dims {
                    let unit = 1i64 << (levelmax - levelmin);
                    if nd.iter().any(|&n| n % unit != 0) {
                        return Err(GridError::Config(
                            "forced grid dimensions cannot be aligned with the top grid \
                             (alignment = top_grid)"
                                .into(),
                        ));
                    }
                }
                for d in 0..3 {
                    l[d] = snap_down(l[d], nref);
                    let rr = snap_down(r[d], nref);
                    r[d] = if rr < r[d] { snap_down(r[d], nref) + nref } else { rr };
                }
            }
            Alignment::PreserveDims => {
                for d in 0..3 {
                    let al = if self.xshift[d] >= 0 { 1 } else { -1 };
                    l[d] += al * (l[d] % 2);
                    r[d] += al * (r[d] % 2);
                }
            }
            Alignment::GridUnit => {
                info!(
                    "internal refinement bounding box: [{},{}]x[{},{}]x[{},{}]",
                    l[0], r[0], l[1], r[1], l[2], r[2]
                );
                for d in 0..3 {
                    l[d] -= l[d] % gu;
                    r[d] = snap_up(r[d], gu);
                }
            }
        }

        if self.blocking_factor != 0 {
            let coarse_block = 2 * self.blocking_factor;
            for d in 0..3 {
                l[d] -= l[d] % coarse_block;
                r[d] += (nresmax - r[d]) % coarse_block;
            }
        }

        if let Some(nd) = forced_dims {
            for d in 0..3 {
                r[d] = l[d] + nd[d];
            }
        }

        for d in 0..3 {
            l[d] = l[d].rem_euclid(nresmax);
            r[d] = r[d].rem_euclid(nresmax);
        }

        if l[0] >= r[0] || l[1] >= r[1] || l[2] >= r[2] {
            return Err(GridError::Geometry(format!(
                "degenerate refinement bounding box on level {}: [{},{}]x[{},{}]x[{},{}]",
                levelmax, l[0], r[0], l[1], r[1], l[2], r[2]
            )));
        }

        let lmax = levelmax as usize;
        self.absoffsets[lmax] = l;
        for d in 0..3 {
            self.len[lmax][d] = r[d] - l[d];
        }

        if self.equal_extent {
            if let Some(nd) = forced_dims {
                if nd[0] != nd[1] || nd[0] != nd[2] {
                    return Err(GridError::Config(
                        "equal_extent conflicts with unequal forced grid dimensions".into(),
                    ));
                }
            }
            let nmax = *self.len[lmax].iter().max().expect("three extents");
            for d in 0..3 {
                let dx = ((nmax - self.len[lmax][d]) as f64 * 0.5) as i64;
                self.absoffsets[lmax][d] -= dx;
                self.len[lmax][d] = nmax;
            }
            for d in 0..3 {
                l[d] = self.absoffsets[lmax][d];
                r[d] = l[d] + nmax;
            }
        }

        // walk to coarser levels: halve, pad symmetrically, re-snap
        for ilevel in (levelmin + 1..levelmax).rev() {
            let il = ilevel as usize;
            for d in 0..3 {
                l[d] = (l[d] as f64 * 0.5 - self.padding as f64) as i64;
                r[d] = (r[d] as f64 * 0.5 + self.padding as f64) as i64;
            }

            match self.alignment {
                Alignment::TopGrid => {
                    let nref = 1i64 << (ilevel - levelmin);
                    for d in 0..3 {
                        l[d] = snap_down(l[d], nref);
                        r[d] = snap_down(r[d], nref) + nref;
                    }
                }
                Alignment::PreserveDims => {
                    for d in 0..3 {
                        let al = if self.xshift[d] >= 0 { 1 } else { -1 };
                        l[d] += al * (l[d] % 2);
                        r[d] += al * (r[d] % 2);
                    }
                }
                Alignment::GridUnit => {
                    for d in 0..3 {
                        l[d] -= l[d] % gu;
                        r[d] = snap_up(r[d], gu);
                    }
                }
            }

            if self.blocking_factor != 0 {
                let coarse_block = 2 * self.blocking_factor;
                let nres = 1i64 << ilevel;
                for d in 0..3 {
                    l[d] -= l[d] % coarse_block;
                    r[d] += (nres - r[d]) % coarse_block;
                }
            }

            if l[0] >= r[0] || l[1] >= r[1] || l[2] >= r[2] || l.iter().any(|&v| v < 0) {
                return Err(GridError::Geometry(format!(
                    "degenerate refinement bounding box on level {}: [{},{}]x[{},{}]x[{},{}]",
                    ilevel, l[0], r[0], l[1], r[1], l[2], r[2]
                )));
            }

            self.absoffsets[il] = l;
            for d in 0..3 {
                self.len[il][d] = r[d] - l[d];
            }

            if self.blocking_factor != 0 {
                for d in 0..3 {
                    self.len[il][d] += self.len[il][d] % self.blocking_factor;
                }
            }

            if self.equal_extent {
                let nmax = *self.len[il].iter().max().expect("three extents");
                for d in 0..3 {
                    let dx = ((nmax - self.len[il][d]) as f64 * 0.5) as i64;
                    self.absoffsets[il][d] -= dx;
                    self.len[il][d] = nmax;
                }
                for d in 0..3 {
                    l[d] = self.absoffsets[il][d];
                    r[d] = l[d] + nmax;
                }
            }
        }

        // relative offsets, then rebuild absolute offsets by the forward
        // sweep so both bookkeepings agree exactly
        for ilevel in (levelmin + 1..=levelmax).rev() {
            let il = ilevel as usize;
            for d in 0..3 {
                self.offsets[il][d] = self.absoffsets[il][d] / 2 - self.absoffsets[il - 1][d];
            }
        }
        for ilevel in levelmin + 1..=levelmax {
            let il = ilevel as usize;
            for d in 0..3 {
                self.absoffsets[il][d] =
                    2 * self.absoffsets[il - 1][d] + 2 * self.offsets[il][d];
            }
        }

        for ilevel in levelmin + 1..=levelmax {
            let il = ilevel as usize;
            let h = 1.0 / (1u64 << ilevel) as f64;
            for d in 0..3 {
                self.x0[il][d] = h * self.absoffsets[il][d] as f64;
                self.xl[il][d] = h * self.len[il][d] as f64;
            }
        }

        // a zoom sub-grid spanning more than half the domain is degenerate
        for ilevel in levelmin + 1..=levelmax {
            let il = ilevel as usize;
            let half = 1i64 << (ilevel - 1);
            if self.len[il].iter().any(|&n| n > half) {
                return Err(GridError::Geometry(format!(
                    "on level {}, the refinement sub-grid is larger than half the domain \
                     (extent = ({}, {}, {}); padding = {})",
                    ilevel, self.len[il][0], self.len[il][1], self.len[il][2], cfg.padding
                )));
            }
        }

        Ok(())
    }

    /// Resize a level and propagate the induced offset delta to the next
    /// finer level so absolute positions are preserved.
    pub fn adjust_level(
        &mut self,
        ilevel: u32,
        extent: [i64; 3],
        offset_abs: [i64; 3],
    ) {
        assert!(
            ilevel <= self.levelmax,
            "adjust_level: level {} beyond levelmax {}",
            ilevel,
            self.levelmax
        );
        let il = ilevel as usize;
        let h = 1.0 / (1u64 << ilevel) as f64;

        let mut delta = [0i64; 3];
        for d in 0..3 {
            delta[d] = self.absoffsets[il][d] - offset_abs[d];
            self.offsets[il][d] -= delta[d] / 2;
            self.absoffsets[il][d] = offset_abs[d];
            self.len[il][d] = extent[d];
            self.x0[il][d] = h * offset_abs[d] as f64;
            self.xl[il][d] = h * extent[d] as f64;
        }

        if ilevel < self.levelmax {
            for d in 0..3 {
                self.offsets[il + 1][d] += delta[d];
            }
        }

        self.find_new_levelmin();
    }

    /// Re-derive the coarsest level whose grid spans the whole domain.
    pub fn find_new_levelmin(&mut self) {
        let old = self.levelmin;
        for i in 0..=self.levelmax {
            let n = 1i64 << i;
            let il = i as usize;
            if self.absoffsets[il] == [0, 0, 0] && self.len[il] == [n, n, n] {
                self.levelmin = i;
            }
        }
        if old != self.levelmin {
            info!("refinement geometry: new levelmin is {}", self.levelmin);
        }
    }

    pub fn levelmin(&self) -> u32 {
        self.levelmin
    }

    pub fn levelmax(&self) -> u32 {
        self.levelmax
    }

    pub fn levelmin_tf(&self) -> u32 {
        self.levelmin_tf
    }

    /// Offset relative to the parent level, in parent-level cells.
    pub fn offset(&self, ilevel: u32, dim: usize) -> i64 {
        self.offsets[ilevel as usize][dim]
    }

    /// Absolute offset from the domain origin, in the level's own cells.
    pub fn offset_abs(&self, ilevel: u32, dim: usize) -> i64 {
        self.absoffsets[ilevel as usize][dim]
    }

    pub fn size(&self, ilevel: u32, dim: usize) -> i64 {
        self.len[ilevel as usize][dim]
    }

    /// Domain shift in coarse cells.
    pub fn shift(&self, dim: usize) -> i64 {
        self.xshift[dim]
    }

    /// Domain shift in box coordinates.
    pub fn coord_shift(&self) -> [f64; 3] {
        self.rshift
    }

    /// Convolution margin in cells (-1 selects double padding).
    pub fn margin(&self) -> i32 {
        self.margin
    }

    pub fn log_structure(&self) {
        if self.xshift != [0, 0, 0] {
            info!(
                "domain shifted by ({}, {}, {}) coarse cells",
                self.xshift[0], self.xshift[1], self.xshift[2]
            );
        }
        for ilevel in self.levelmin..=self.levelmax {
            let il = ilevel as usize;
            info!(
                "level {:3}: offset = ({:5}, {:5}, {:5})  offset_abs = ({:5}, {:5}, {:5})  size = ({:5}, {:5}, {:5})",
                ilevel,
                self.offsets[il][0],
                self.offsets[il][1],
                self.offsets[il][2],
                self.absoffsets[il][0],
                self.absoffsets[il][1],
                self.absoffsets[il][2],
                self.len[il][0],
                self.len[il][1],
                self.len[il][2]
            );
        }
        if self.equal_extent {
            warn!("equal_extent is set; patches are centered cubes and may carry extra padding");
        }
    }
}

#[inline]
fn snap_down(v: i64, unit: i64) -> i64 {
    ((v as f64 / unit as f64) as i64) * unit
}

#[inline]
fn snap_up(v: i64, unit: i64) -> i64 {
    if v % unit != 0 {
        (v / unit + 1) * unit
    } else {
        v
    }
}
