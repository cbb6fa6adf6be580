// src/density/splice.rs
//
// Spectral coupling between adjacent refinement levels (factor 2 per axis):
// band-limited decimation (fine -> coarse) and band-limited interpolation
// with splicing of existing fine-scale content (coarse -> fine). Both
// transform to frequency space, blend, and transform back, assuming periodic
// boundaries on the transform domain; margin handling happens in the caller.
//
// Coarse and fine cell centers are offset by half a fine cell per axis, so
// matching bins carry an explicit phase correction, and amplitudes scale
// with the 1/8 volume ratio. A smooth window suppresses frequencies with no
// coarse-grid representation; a hard cutoff here shows up as ringing around
// every patch boundary.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f64::consts::PI;
use std::sync::Arc;

use rayon::prelude::*;

use crate::density::working::{PaddedSubGrid3D, WorkBuffer};
use crate::mesh::GhostMesh3D;

/// Smooth low-pass window: 1 deep inside the band, a smooth cosine taper
/// approaching `kmax`, 0 at and beyond it.
pub fn meyer_scaling(k: f64, kmax: f64) -> f64 {
    const TWO_PI_THIRDS: f64 = 2.0 * PI / 3.0;
    const FOUR_PI_THIRDS: f64 = 4.0 * PI / 3.0;

    let nu = |x: f64| {
        if x < 0.0 {
            0.0
        } else if x < 1.0 {
            x * x * x * x * (35.0 - 84.0 * x + 70.0 * x * x - 20.0 * x * x * x)
        } else {
            1.0
        }
    };

    let kk = k.abs() / kmax * FOUR_PI_THIRDS;
    if kk < TWO_PI_THIRDS {
        1.0
    } else if kk < FOUR_PI_THIRDS {
        (0.5 * PI * nu(kk / TWO_PI_THIRDS - 1.0)).cos()
    } else {
        0.0
    }
}

/// Signed wavenumber for bin `i` of an `n`-point transform.
#[inline]
fn wavenumber(i: usize, n: usize) -> f64 {
    if i <= n / 2 {
        i as f64
    } else {
        i as f64 - n as f64
    }
}

/// Index of the fine-transform bin carrying the same signed wavenumber as
/// coarse bin `i` (fine extent = 2 * coarse extent).
#[inline]
fn matching_fine_bin(i: usize, n_coarse: usize, n_fine: usize) -> usize {
    if i > n_coarse / 2 {
        i + n_fine / 2
    } else {
        i
    }
}

struct AxisPlans {
    fwd: [Arc<dyn Fft<f64>>; 3],
    inv: [Arc<dyn Fft<f64>>; 3],
}

impl AxisPlans {
    fn new(planner: &mut FftPlanner<f64>, nx: usize, ny: usize, nz: usize) -> Self {
        Self {
            fwd: [
                planner.plan_fft_forward(nx),
                planner.plan_fft_forward(ny),
                planner.plan_fft_forward(nz),
            ],
            inv: [
                planner.plan_fft_inverse(nx),
                planner.plan_fft_inverse(ny),
                planner.plan_fft_inverse(nz),
            ],
        }
    }
}

/// Separable 3D transform: contiguous z lines in parallel, strided y lines
/// per plane, and a transpose pass for the x axis so its lines become
/// contiguous too.
fn fft3_apply(
    data: &mut [Complex<f64>],
    nx: usize,
    ny: usize,
    nz: usize,
    fft_x: &Arc<dyn Fft<f64>>,
    fft_y: &Arc<dyn Fft<f64>>,
    fft_z: &Arc<dyn Fft<f64>>,
) {
    assert_eq!(data.len(), nx * ny * nz, "fft3: buffer length mismatch");

    // z lines are contiguous
    data.par_chunks_mut(nz).for_each(|line| fft_z.process(line));

    // y lines are strided within each i-plane
    data.par_chunks_mut(ny * nz).for_each(|plane| {
        let mut buf = vec![Complex::default(); ny];
        for k in 0..nz {
            for j in 0..ny {
                buf[j] = plane[j * nz + k];
            }
            fft_y.process(&mut buf);
            for j in 0..ny {
                plane[j * nz + k] = buf[j];
            }
        }
    });

    // x: transpose so lines become contiguous, transform, transpose back
    let mut tmp = vec![Complex::default(); data.len()];
    {
        let data_ro: &[Complex<f64>] = data;
        tmp.par_chunks_mut(nx).enumerate().for_each(|(q, line)| {
            let j = q / nz;
            let k = q % nz;
            for (i, v) in line.iter_mut().enumerate() {
                *v = data_ro[(i * ny + j) * nz + k];
            }
        });
    }
    tmp.par_chunks_mut(nx).for_each(|line| fft_x.process(line));
    let tmp_ro: &[Complex<f64>] = &tmp;
    data.par_chunks_mut(ny * nz).enumerate().for_each(|(i, plane)| {
        for j in 0..ny {
            for k in 0..nz {
                plane[j * nz + k] = tmp_ro[(j * nz + k) * nx + i];
            }
        }
    });
}

fn fft3_forward(data: &mut [Complex<f64>], nx: usize, ny: usize, nz: usize, plans: &AxisPlans) {
    fft3_apply(data, nx, ny, nz, &plans.fwd[0], &plans.fwd[1], &plans.fwd[2]);
}

/// Inverse transform with the standard `1/(nx*ny*nz)` scaling applied.
fn fft3_inverse(data: &mut [Complex<f64>], nx: usize, ny: usize, nz: usize, plans: &AxisPlans) {
    fft3_apply(data, nx, ny, nz, &plans.inv[0], &plans.inv[1], &plans.inv[2]);
    let scale = 1.0 / (nx * ny * nz) as f64;
    data.par_iter_mut().for_each(|v| {
        v.re *= scale;
        v.im *= scale;
    });
}

/// Move a field one level down: band-limited decimation of `fine` into
/// `coarse` (both hierarchy grids, coarse extent = fine extent / 2).
///
/// Every coarse-representable wavenumber is taken from the matching fine
/// bin, phase-corrected for the half-cell center offset, scaled by the 1/8
/// volume ratio, and attenuated by the per-axis window toward the coarse
/// Nyquist band edge.
pub fn spectral_coarsen(fine: &GhostMesh3D, coarse: &mut GhostMesh3D) {
    let (nxf, nyf, nzf) = (fine.size(0), fine.size(1), fine.size(2));
    let (nxc, nyc, nzc) = (coarse.size(0), coarse.size(1), coarse.size(2));

    assert!(
        nxf % 2 == 0 && nyf % 2 == 0 && nzf % 2 == 0,
        "spectral_coarsen: fine extents ({},{},{}) must be even",
        nxf,
        nyf,
        nzf
    );
    assert!(
        nxf == 2 * nxc && nyf == 2 * nyc && nzf == 2 * nzc,
        "spectral_coarsen: coarse extents ({},{},{}) must be half the fine extents ({},{},{})",
        nxc,
        nyc,
        nzc,
        nxf,
        nyf,
        nzf
    );

    let mut planner = FftPlanner::new();
    let fine_plans = AxisPlans::new(&mut planner, nxf, nyf, nzf);
    let coarse_plans = AxisPlans::new(&mut planner, nxc, nyc, nzc);

    let mut cfine: Vec<Complex<f64>> = vec![Complex::default(); nxf * nyf * nzf];
    cfine.par_chunks_mut(nzf).enumerate().for_each(|(q, line)| {
        let i = (q / nyf) as i64;
        let j = (q % nyf) as i64;
        for (k, v) in line.iter_mut().enumerate() {
            v.re = fine.get(i, j, k as i64);
        }
    });

    fft3_forward(&mut cfine, nxf, nyf, nzf, &fine_plans);

    let mut ccoarse: Vec<Complex<f64>> = vec![Complex::default(); nxc * nyc * nzc];
    let cfine_ro = &cfine;
    ccoarse
        .par_chunks_mut(nyc * nzc)
        .enumerate()
        .for_each(|(i, plane)| {
            let ii = matching_fine_bin(i, nxc, nxf);
            let kx = wavenumber(i, nxc);
            let wx = meyer_scaling(kx, (nxc / 2) as f64);
            for j in 0..nyc {
                let jj = matching_fine_bin(j, nyc, nyf);
                let ky = wavenumber(j, nyc);
                let wy = meyer_scaling(ky, (nyc / 2) as f64);
                for k in 0..nzc {
                    let kk = matching_fine_bin(k, nzc, nzf);
                    let kz = wavenumber(k, nzc);
                    let wz = meyer_scaling(kz, (nzc / 2) as f64);

                    let phase =
                        (kx / nxc as f64 + ky / nyc as f64 + kz / nzc as f64) * 0.5 * PI;
                    let val = cfine_ro[(ii * nyf + jj) * nzf + kk]
                        * Complex::from_polar(1.0, phase)
                        / 8.0;

                    plane[j * nzc + k] = val * (wx * wy * wz);
                }
            }
        });

    drop(cfine);

    fft3_inverse(&mut ccoarse, nxc, nyc, nzc, &coarse_plans);

    for i in 0..nxc {
        for j in 0..nyc {
            for k in 0..nzc {
                coarse.set(
                    i as i64,
                    j as i64,
                    k as i64,
                    ccoarse[(i * nyc + j) * nzc + k].re,
                );
            }
        }
    }
}

/// Move a field one level up with splicing: the long wavelengths of `fine`
/// are replaced by the phase-corrected content of the parent working buffer
/// while its own short wavelengths are kept, blended by a smooth window at
/// half the coarse Nyquist so no band is counted twice.
///
/// The overlapping coarse footprint is read from `src`: with periodic
/// wraparound when splicing against the base grid, directly (full-margin
/// convention) when splicing against a padded parent patch.
pub fn spectral_refine(src: &WorkBuffer, fine: &mut PaddedSubGrid3D) {
    let (nxf, nyf, nzf) = (fine.size(0), fine.size(1), fine.size(2));
    assert!(
        nxf % 2 == 0 && nyf % 2 == 0 && nzf % 2 == 0,
        "spectral_refine: padded fine extents ({},{},{}) must be even",
        nxf,
        nyf,
        nzf
    );
    assert!(
        fine.margin(0) % 2 == 0 && fine.margin(1) % 2 == 0 && fine.margin(2) % 2 == 0,
        "spectral_refine: fine margins ({},{},{}) must be even",
        fine.margin(0),
        fine.margin(1),
        fine.margin(2)
    );
    let (nxc, nyc, nzc) = (nxf / 2, nyf / 2, nzf / 2);

    // start of the overlapping footprint in the parent's index space
    let mut start = [0i64; 3];
    for d in 0..3 {
        start[d] = fine.offset(d) - (fine.margin(d) / 2) as i64;
        if let WorkBuffer::Patch(p) = src {
            start[d] += p.margin(d) as i64;
        }
    }

    let read_coarse = |i: i64, j: i64, k: i64| -> f64 {
        match src {
            WorkBuffer::Base(g) => g.get_periodic(i, j, k),
            WorkBuffer::Patch(p) => {
                let (nx, ny, nz) = (p.size(0), p.size(1), p.size(2));
                assert!(
                    i >= 0
                        && j >= 0
                        && k >= 0
                        && (i as usize) < nx
                        && (j as usize) < ny
                        && (k as usize) < nz,
                    "spectral_refine: coarse read ({},{},{}) outside the parent working \
                     buffer ({}x{}x{}); margins too small for this patch placement",
                    i,
                    j,
                    k,
                    nx,
                    ny,
                    nz
                );
                p.get(i as usize, j as usize, k as usize)
            }
        }
    };

    let mut ccoarse: Vec<Complex<f64>> = vec![Complex::default(); nxc * nyc * nzc];
    for i in 0..nxc {
        for j in 0..nyc {
            for k in 0..nzc {
                ccoarse[(i * nyc + j) * nzc + k].re = read_coarse(
                    start[0] + i as i64,
                    start[1] + j as i64,
                    start[2] + k as i64,
                );
            }
        }
    }

    let mut cfine: Vec<Complex<f64>> = vec![Complex::default(); nxf * nyf * nzf];
    {
        let src_data = fine.data();
        cfine
            .par_iter_mut()
            .zip_eq(src_data.par_iter())
            .for_each(|(c, &r)| c.re = r);
    }

    let mut planner = FftPlanner::new();
    let coarse_plans = AxisPlans::new(&mut planner, nxc, nyc, nzc);
    let fine_plans = AxisPlans::new(&mut planner, nxf, nyf, nzf);

    fft3_forward(&mut ccoarse, nxc, nyc, nzc, &coarse_plans);
    fft3_forward(&mut cfine, nxf, nyf, nzf, &fine_plans);

    // filtered splice of coarse and fine modes; every coarse bin targets a
    // distinct fine bin, untouched fine bins keep their own content
    for i in 0..nxc {
        let ii = matching_fine_bin(i, nxc, nxf);
        let kx = wavenumber(i, nxc);
        let wx = meyer_scaling(kx, (nxc / 4) as f64);
        for j in 0..nyc {
            let jj = matching_fine_bin(j, nyc, nyf);
            let ky = wavenumber(j, nyc);
            let wy = meyer_scaling(ky, (nyc / 4) as f64);
            for k in 0..nzc {
                let kk = matching_fine_bin(k, nzc, nzf);
                let kz = wavenumber(k, nzc);
                let wz = meyer_scaling(kz, (nzc / 4) as f64);

                let phase =
                    -0.5 * PI * (kx / nxc as f64 + ky / nyc as f64 + kz / nzc as f64);
                let val = ccoarse[(i * nyc + j) * nzc + k]
                    * Complex::from_polar(1.0, phase)
                    * 8.0;

                let blend_coarse = wx * wy * wz;
                let blend_fine = 1.0 - blend_coarse;

                let qf = (ii * nyf + jj) * nzf + kk;
                cfine[qf] = cfine[qf] * blend_fine + val * blend_coarse;
            }
        }
    }

    drop(ccoarse);

    fft3_inverse(&mut cfine, nxf, nyf, nzf, &fine_plans);

    let dst = fine.data_mut();
    dst.par_iter_mut()
        .zip_eq(cfine.par_iter())
        .for_each(|(r, c)| *r = c.re);
}

/// Non-spectral restriction: each coarse cell under the fine grid becomes
/// the plain average of its 8 children.
pub fn restrict_straight(fine: &GhostMesh3D, coarse: &mut GhostMesh3D) {
    let (nxf, nyf, nzf) = (fine.size(0), fine.size(1), fine.size(2));
    assert!(
        nxf % 2 == 0 && nyf % 2 == 0 && nzf % 2 == 0,
        "restrict_straight: fine extents ({},{},{}) must be even",
        nxf,
        nyf,
        nzf
    );
    let off = [fine.offset(0), fine.offset(1), fine.offset(2)];

    for ci in 0..(nxf / 2) as i64 {
        for cj in 0..(nyf / 2) as i64 {
            for ck in 0..(nzf / 2) as i64 {
                let mut sum = 0.0;
                for di in 0..2 {
                    for dj in 0..2 {
                        for dk in 0..2 {
                            sum += fine.get(2 * ci + di, 2 * cj + dj, 2 * ck + dk);
                        }
                    }
                }
                coarse.set(ci + off[0], cj + off[1], ck + off[2], 0.125 * sum);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_is_one_in_band_and_zero_at_the_edge() {
        assert_eq!(meyer_scaling(0.0, 8.0), 1.0);
        assert_eq!(meyer_scaling(3.9, 8.0), 1.0);
        assert_eq!(meyer_scaling(-3.9, 8.0), 1.0);
        assert_eq!(meyer_scaling(8.0, 8.0), 0.0);
        assert_eq!(meyer_scaling(12.0, 8.0), 0.0);

        // smooth and monotone across the transition band
        let mut prev = meyer_scaling(4.0, 8.0);
        for q in 1..=40 {
            let w = meyer_scaling(4.0 + q as f64 * 0.1, 8.0);
            assert!(w <= prev + 1e-12, "window not decaying at {}", q);
            prev = w;
        }
    }

    #[test]
    fn signed_wavenumbers_wrap_negative_bins() {
        assert_eq!(wavenumber(0, 8), 0.0);
        assert_eq!(wavenumber(4, 8), 4.0);
        assert_eq!(wavenumber(5, 8), -3.0);
        assert_eq!(wavenumber(7, 8), -1.0);
        assert_eq!(matching_fine_bin(5, 8, 16), 13);
        assert_eq!(wavenumber(13, 16), -3.0);
    }

    #[test]
    #[should_panic(expected = "must be even")]
    fn odd_extents_are_a_fatal_precondition() {
        let fine = GhostMesh3D::new(0, 6, 6, 5, [0, 0, 0]);
        let mut coarse = GhostMesh3D::new(0, 3, 3, 2, [0, 0, 0]);
        spectral_coarsen(&fine, &mut coarse);
    }

    #[test]
    fn coarsening_preserves_a_constant_field() {
        let mut fine = GhostMesh3D::new(0, 8, 8, 8, [0, 0, 0]);
        for i in 0..8 {
            for j in 0..8 {
                for k in 0..8 {
                    fine.set(i, j, k, 2.5);
                }
            }
        }
        let mut coarse = GhostMesh3D::new(0, 4, 4, 4, [0, 0, 0]);
        spectral_coarsen(&fine, &mut coarse);
        for i in 0..4 {
            for j in 0..4 {
                for k in 0..4 {
                    assert!(
                        (coarse.get(i, j, k) - 2.5).abs() < 1e-12,
                        "coarse({},{},{}) = {}",
                        i,
                        j,
                        k,
                        coarse.get(i, j, k)
                    );
                }
            }
        }
    }

    #[test]
    fn coarsening_reproduces_a_low_frequency_mode_at_cell_centers() {
        // k=1 along x is far inside the window band on a 16 -> 8 decimation
        let n = 16usize;
        let mut fine = GhostMesh3D::new(0, n, n, n, [0, 0, 0]);
        for i in 0..n {
            let x = (i as f64 + 0.5) / n as f64;
            let v = (2.0 * PI * x).cos();
            for j in 0..n {
                for k in 0..n {
                    fine.set(i as i64, j as i64, k as i64, v);
                }
            }
        }

        let mut coarse = GhostMesh3D::new(0, n / 2, n / 2, n / 2, [0, 0, 0]);
        spectral_coarsen(&fine, &mut coarse);

        for i in 0..n / 2 {
            let x = (i as f64 + 0.5) / (n / 2) as f64;
            let expect = (2.0 * PI * x).cos();
            assert!(
                (coarse.get(i as i64, 0, 0) - expect).abs() < 1e-10,
                "i={}: got {}, expected {}",
                i,
                coarse.get(i as i64, 0, 0),
                expect
            );
        }
    }

    #[test]
    fn coarsening_discards_fine_only_modes() {
        // the fine Nyquist mode has no coarse representation and must vanish
        let n = 16usize;
        let mut fine = GhostMesh3D::new(0, n, n, n, [0, 0, 0]);
        for i in 0..n {
            let v = if i % 2 == 0 { 1.0 } else { -1.0 };
            for j in 0..n {
                for k in 0..n {
                    fine.set(i as i64, j as i64, k as i64, v);
                }
            }
        }

        let mut coarse = GhostMesh3D::new(0, n / 2, n / 2, n / 2, [0, 0, 0]);
        spectral_coarsen(&fine, &mut coarse);

        for i in 0..(n / 2) as i64 {
            assert!(
                coarse.get(i, 0, 0).abs() < 1e-12,
                "aliased power survived at i={}: {}",
                i,
                coarse.get(i, 0, 0)
            );
        }
    }

    #[test]
    fn refine_against_base_reconstructs_low_frequency_content() {
        // the extracted window is half the domain, so pick a mode that is
        // periodic within it (k=2 over the box = k=1 over the window); it
        // sits where the splice window is 1 and an empty fine patch spliced
        // against the base must reproduce it exactly at fine cell centers
        let nc = 16usize;
        let mut base = crate::density::working::DensityGrid3D::new(nc, nc, nc);
        for i in 0..nc {
            let x = (i as f64 + 0.5) / nc as f64;
            let v = (4.0 * PI * x).sin();
            for j in 0..nc {
                for k in 0..nc {
                    base.data_mut()[(i * nc + j) * nc + k] = v;
                }
            }
        }

        // patch of 8^3 fine cells at offset (2,2,2), margin 4 -> padded 16^3
        // covering coarse cells [0,8) per axis (start = offset - margin/2)
        let mut fine = PaddedSubGrid3D::with_margin([2, 2, 2], [8, 8, 8], [4, 4, 4]);
        let src = WorkBuffer::Base(base);
        spectral_refine(&src, &mut fine);

        for m in 0..16usize {
            let x = (2.0 * m as f64 + 1.0) / (4.0 * nc as f64);
            let expect = (4.0 * PI * x).sin();
            let got = fine.get(m, 8, 8);
            assert!(
                (got - expect).abs() < 1e-8,
                "m={}: got {}, expected {}",
                m,
                got,
                expect
            );
        }
    }

    #[test]
    fn refine_keeps_fine_modes_beyond_the_crossover() {
        // fine content at its own Nyquist is outside every splice window and
        // must survive unchanged when the coarse source is zero
        let base = crate::density::working::DensityGrid3D::new(8, 8, 8);
        let mut fine = PaddedSubGrid3D::with_margin([2, 2, 2], [4, 4, 4], [2, 2, 2]);
        let n = fine.size(0);
        for i in 0..n {
            let v = if i % 2 == 0 { 1.0 } else { -1.0 };
            for j in 0..n {
                for k in 0..n {
                    let q = (i * n + j) * n + k;
                    fine.data_mut()[q] = v;
                }
            }
        }
        let before: Vec<f64> = fine.data().to_vec();

        spectral_refine(&WorkBuffer::Base(base), &mut fine);

        for (q, (&a, &b)) in before.iter().zip(fine.data().iter()).enumerate() {
            assert!((a - b).abs() < 1e-10, "bin {} changed: {} -> {}", q, a, b);
        }
    }

    #[test]
    fn straight_restriction_averages_children() {
        let mut fine = GhostMesh3D::new(0, 4, 4, 4, [1, 1, 1]);
        for i in 0..4 {
            for j in 0..4 {
                for k in 0..4 {
                    fine.set(i, j, k, (i + j + k) as f64);
                }
            }
        }
        let mut coarse = GhostMesh3D::new(0, 8, 8, 8, [0, 0, 0]);
        restrict_straight(&fine, &mut coarse);

        // children of coarse cell (1,1,1) are fine (0..2)^3: mean of i+j+k = 1.5
        assert!((coarse.get(1, 1, 1) - 1.5).abs() < 1e-14);
        // untouched coarse cells stay zero
        assert_eq!(coarse.get(0, 0, 0), 0.0);
    }
}
