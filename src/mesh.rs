// src/mesh.rs
//
// Rectangular 3D arrays underlying every refinement level: a plain owned
// mesh, and a variant with a uniform ghost-cell margin on all faces.
// Storage is row-major with z fastest: idx = (i*ny + j)*nz + k.

use rayon::prelude::*;
use std::ops::{AddAssign, DivAssign, MulAssign, SubAssign};

/// Owned rectangular array of cell values with an offset record.
///
/// The offset describes the mesh position relative to its parent level (in
/// parent-level cell units); it is carried along but not interpreted here.
#[derive(Debug, Clone)]
pub struct Mesh3D {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    offset: [i64; 3],
    data: Vec<f64>,
}

impl Mesh3D {
    pub fn new(nx: usize, ny: usize, nz: usize, offset: [i64; 3]) -> Self {
        Self {
            nx,
            ny,
            nz,
            offset,
            data: vec![0.0; nx * ny * nz],
        }
    }

    pub fn cubic(n: usize, offset: [i64; 3]) -> Self {
        Self::new(n, n, n, offset)
    }

    pub fn n_cells(&self) -> usize {
        self.nx * self.ny * self.nz
    }

    pub fn size(&self, dim: usize) -> usize {
        match dim {
            0 => self.nx,
            1 => self.ny,
            _ => self.nz,
        }
    }

    pub fn offset(&self, dim: usize) -> i64 {
        self.offset[dim]
    }

    pub fn offset_mut(&mut self, dim: usize) -> &mut i64 {
        &mut self.offset[dim]
    }

    /// Convert (i, j, k) indices to a flat index into the data array.
    #[inline]
    pub fn idx(&self, i: usize, j: usize, k: usize) -> usize {
        debug_assert!(i < self.nx && j < self.ny && k < self.nz);
        (i * self.ny + j) * self.nz + k
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize) -> f64 {
        self.data[self.idx(i, j, k)]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, k: usize, v: f64) {
        let q = self.idx(i, j, k);
        self.data[q] = v;
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn zero(&mut self) {
        self.data.par_iter_mut().for_each(|v| *v = 0.0);
    }

    fn assert_same_shape(&self, other: &Mesh3D, op: &str) {
        assert!(
            self.nx == other.nx && self.ny == other.ny && self.nz == other.nz,
            "Mesh3D::{}: incompatible extents ({},{},{}) vs ({},{},{})",
            op,
            self.nx,
            self.ny,
            self.nz,
            other.nx,
            other.ny,
            other.nz
        );
    }
}

impl AddAssign<f64> for Mesh3D {
    fn add_assign(&mut self, x: f64) {
        self.data.par_iter_mut().for_each(|v| *v += x);
    }
}

impl SubAssign<f64> for Mesh3D {
    fn sub_assign(&mut self, x: f64) {
        self.data.par_iter_mut().for_each(|v| *v -= x);
    }
}

impl MulAssign<f64> for Mesh3D {
    fn mul_assign(&mut self, x: f64) {
        self.data.par_iter_mut().for_each(|v| *v *= x);
    }
}

impl DivAssign<f64> for Mesh3D {
    fn div_assign(&mut self, x: f64) {
        self.data.par_iter_mut().for_each(|v| *v /= x);
    }
}

impl AddAssign<&Mesh3D> for Mesh3D {
    fn add_assign(&mut self, other: &Mesh3D) {
        self.assert_same_shape(other, "add_assign");
        self.data
            .par_iter_mut()
            .zip_eq(other.data.par_iter())
            .for_each(|(a, b)| *a += b);
    }
}

impl SubAssign<&Mesh3D> for Mesh3D {
    fn sub_assign(&mut self, other: &Mesh3D) {
        self.assert_same_shape(other, "sub_assign");
        self.data
            .par_iter_mut()
            .zip_eq(other.data.par_iter())
            .for_each(|(a, b)| *a -= b);
    }
}

impl MulAssign<&Mesh3D> for Mesh3D {
    fn mul_assign(&mut self, other: &Mesh3D) {
        self.assert_same_shape(other, "mul_assign");
        self.data
            .par_iter_mut()
            .zip_eq(other.data.par_iter())
            .for_each(|(a, b)| *a *= b);
    }
}

impl DivAssign<&Mesh3D> for Mesh3D {
    fn div_assign(&mut self, other: &Mesh3D) {
        self.assert_same_shape(other, "div_assign");
        self.data
            .par_iter_mut()
            .zip_eq(other.data.par_iter())
            .for_each(|(a, b)| *a /= b);
    }
}

/// Mesh with a uniform ghost-cell margin of width `nbnd` on every face.
///
/// Callers address the logical (interior) index range with signed indices;
/// ghost cells are reached with indices in `[-nbnd, size+nbnd)`. `size(dim)`
/// reports the logical extent, excluding the margin.
#[derive(Debug, Clone)]
pub struct GhostMesh3D {
    pub nbnd: usize,
    mesh: Mesh3D,
}

impl GhostMesh3D {
    pub fn new(nbnd: usize, nx: usize, ny: usize, nz: usize, offset: [i64; 3]) -> Self {
        Self {
            nbnd,
            mesh: Mesh3D::new(nx + 2 * nbnd, ny + 2 * nbnd, nz + 2 * nbnd, offset),
        }
    }

    pub fn cubic(nbnd: usize, n: usize, offset: [i64; 3]) -> Self {
        Self::new(nbnd, n, n, n, offset)
    }

    /// Logical extent along a dimension (ghost margin excluded).
    pub fn size(&self, dim: usize) -> usize {
        self.mesh.size(dim) - 2 * self.nbnd
    }

    pub fn n_cells(&self) -> usize {
        self.size(0) * self.size(1) * self.size(2)
    }

    pub fn offset(&self, dim: usize) -> i64 {
        self.mesh.offset(dim)
    }

    pub fn offset_mut(&mut self, dim: usize) -> &mut i64 {
        self.mesh.offset_mut(dim)
    }

    #[inline]
    fn padded_idx(&self, i: i64, j: i64, k: i64) -> usize {
        let b = self.nbnd as i64;
        debug_assert!(
            i + b >= 0
                && j + b >= 0
                && k + b >= 0
                && ((i + b) as usize) < self.mesh.nx
                && ((j + b) as usize) < self.mesh.ny
                && ((k + b) as usize) < self.mesh.nz,
            "ghost index ({},{},{}) outside padded range (size {}x{}x{}, nbnd {})",
            i,
            j,
            k,
            self.size(0),
            self.size(1),
            self.size(2),
            self.nbnd
        );
        (((i + b) as usize) * self.mesh.ny + (j + b) as usize) * self.mesh.nz + (k + b) as usize
    }

    #[inline]
    pub fn get(&self, i: i64, j: i64, k: i64) -> f64 {
        self.mesh.data[self.padded_idx(i, j, k)]
    }

    #[inline]
    pub fn set(&mut self, i: i64, j: i64, k: i64, v: f64) {
        let q = self.padded_idx(i, j, k);
        self.mesh.data[q] = v;
    }

    /// Whether a signed index triple lies inside the padded storage range.
    pub fn contains_padded(&self, i: i64, j: i64, k: i64) -> bool {
        let b = self.nbnd as i64;
        i + b >= 0
            && j + b >= 0
            && k + b >= 0
            && ((i + b) as usize) < self.mesh.nx
            && ((j + b) as usize) < self.mesh.ny
            && ((k + b) as usize) < self.mesh.nz
    }

    pub fn zero(&mut self) {
        self.mesh.zero();
    }

    /// Mean of the interior (logical) region, using a deterministic
    /// compensated reduction.
    pub fn interior_mean(&self) -> f64 {
        let (nx, ny, nz) = (self.size(0), self.size(1), self.size(2));
        let row_sums: Vec<f64> = (0..nx * ny)
            .into_par_iter()
            .map(|q| {
                let i = (q / ny) as i64;
                let j = (q % ny) as i64;
                let start = self.padded_idx(i, j, 0);
                kahan_sum_serial(&self.mesh.data[start..start + nz])
            })
            .collect();
        kahan_sum_serial(&row_sums) / (nx * ny * nz) as f64
    }

    /// Add a constant to every interior cell (ghost cells untouched).
    pub fn interior_add(&mut self, x: f64) {
        let (nx, ny, nz) = (self.size(0), self.size(1), self.size(2));
        for i in 0..nx as i64 {
            for j in 0..ny as i64 {
                let start = self.padded_idx(i, j, 0);
                for v in &mut self.mesh.data[start..start + nz] {
                    *v += x;
                }
            }
        }
    }
}

impl AddAssign<f64> for GhostMesh3D {
    fn add_assign(&mut self, x: f64) {
        self.mesh += x;
    }
}

impl SubAssign<f64> for GhostMesh3D {
    fn sub_assign(&mut self, x: f64) {
        self.mesh -= x;
    }
}

impl MulAssign<f64> for GhostMesh3D {
    fn mul_assign(&mut self, x: f64) {
        self.mesh *= x;
    }
}

impl DivAssign<f64> for GhostMesh3D {
    fn div_assign(&mut self, x: f64) {
        self.mesh /= x;
    }
}

impl AddAssign<&GhostMesh3D> for GhostMesh3D {
    fn add_assign(&mut self, other: &GhostMesh3D) {
        self.mesh += &other.mesh;
    }
}

impl SubAssign<&GhostMesh3D> for GhostMesh3D {
    fn sub_assign(&mut self, other: &GhostMesh3D) {
        self.mesh -= &other.mesh;
    }
}

impl MulAssign<&GhostMesh3D> for GhostMesh3D {
    fn mul_assign(&mut self, other: &GhostMesh3D) {
        self.mesh *= &other.mesh;
    }
}

impl DivAssign<&GhostMesh3D> for GhostMesh3D {
    fn div_assign(&mut self, other: &GhostMesh3D) {
        self.mesh /= &other.mesh;
    }
}

fn kahan_sum_serial(values: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut comp = 0.0;
    for &v in values {
        let y = v - comp;
        let t = sum + y;
        comp = (t - sum) - y;
        sum = t;
    }
    sum
}

/// Compensated sum with fixed chunking: the result is independent of the
/// number of worker threads.
pub fn kahan_sum(values: &[f64]) -> f64 {
    const CHUNK: usize = 4096;
    if values.len() <= CHUNK {
        return kahan_sum_serial(values);
    }
    let partials: Vec<f64> = values.par_chunks(CHUNK).map(kahan_sum_serial).collect();
    kahan_sum_serial(&partials)
}
