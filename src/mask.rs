// src/mask.rs

/// Cell lies outside the evolving refinement volume.
pub const MASK_OUTSIDE: i8 = -1;
/// Cell is inside the volume and not refined further (a leaf).
pub const MASK_LEAF: i8 = 1;
/// Cell is inside the volume and covered by the next finer level.
pub const MASK_REFINED: i8 = 2;

/// Tri-state refinement marker per cell of one level.
#[derive(Debug, Clone, Default)]
pub struct RefinementMask {
    nx: usize,
    ny: usize,
    nz: usize,
    data: Vec<i8>,
}

impl RefinementMask {
    pub fn new(nx: usize, ny: usize, nz: usize, value: i8) -> Self {
        Self {
            nx,
            ny,
            nz,
            data: vec![value; nx * ny * nz],
        }
    }

    pub fn init(&mut self, nx: usize, ny: usize, nz: usize, value: i8) {
        self.nx = nx;
        self.ny = ny;
        self.nz = nz;
        self.data.clear();
        self.data.resize(nx * ny * nz, value);
    }

    #[inline]
    fn idx(&self, i: usize, j: usize, k: usize) -> usize {
        debug_assert!(i < self.nx && j < self.ny && k < self.nz);
        (i * self.ny + j) * self.nz + k
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize) -> i8 {
        self.data[self.idx(i, j, k)]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, k: usize, v: i8) {
        let q = self.idx(i, j, k);
        self.data[q] = v;
    }

    pub fn size(&self, dim: usize) -> usize {
        match dim {
            0 => self.nx,
            1 => self.ny,
            _ => self.nz,
        }
    }

    pub fn count_flagged(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0).count()
    }

    pub fn count_value(&self, value: i8) -> usize {
        self.data.iter().filter(|&&v| v == value).count()
    }
}
