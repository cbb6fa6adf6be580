// tests/test_splicing.rs
//
// Cross-validation of the spectral level coupler: decimation/interpolation
// round trips, expected information loss, and mean preservation across the
// splice.
// Run with: cargo test --test test_splicing

use std::f64::consts::PI;

use zoomgrid::density::{
    restrict_straight, spectral_coarsen, spectral_refine, DensityGrid3D, PaddedSubGrid3D,
    WorkBuffer,
};
use zoomgrid::mesh::GhostMesh3D;
use zoomgrid::noise::{NoiseRegion, NoiseSource, WhiteNoise};

fn full_domain_mesh(n: usize) -> GhostMesh3D {
    GhostMesh3D::new(0, n, n, n, [0, 0, 0])
}

/// Low-k (k=1 along x) plus fine-only (k=13 along y) content on an n^3 grid.
fn two_scale_field(n: usize) -> GhostMesh3D {
    let mut m = full_domain_mesh(n);
    for i in 0..n {
        let x = (i as f64 + 0.5) / n as f64;
        for j in 0..n {
            let y = (j as f64 + 0.5) / n as f64;
            let v = (2.0 * PI * x).cos() + 0.8 * (2.0 * PI * 13.0 * y).sin();
            for k in 0..n {
                m.set(i as i64, j as i64, k as i64, v);
            }
        }
    }
    m
}

#[test]
fn round_trip_recovers_large_scales_and_loses_small_scales() {
    let n = 32usize;
    let fine_in = two_scale_field(n);

    // down: 32^3 -> 16^3
    let mut coarse = full_domain_mesh(n / 2);
    spectral_coarsen(&fine_in, &mut coarse);

    // back up: straight reconstruction of an empty full-domain fine grid
    // from the periodic coarse field (no fine content to splice)
    let mut coarse_buf = DensityGrid3D::new(n / 2, n / 2, n / 2);
    for i in 0..n / 2 {
        for j in 0..n / 2 {
            for k in 0..n / 2 {
                coarse_buf.data_mut()[(i * (n / 2) + j) * (n / 2) + k] =
                    coarse.get(i as i64, j as i64, k as i64);
            }
        }
    }
    let mut fine_out = PaddedSubGrid3D::with_margin([0, 0, 0], [n, n, n], [0, 0, 0]);
    spectral_refine(&WorkBuffer::Base(coarse_buf), &mut fine_out);

    // the k=1 component survives the round trip at fine cell centers
    let mut max_low_err: f64 = 0.0;
    let mut max_loss: f64 = 0.0;
    for i in 0..n {
        let x = (i as f64 + 0.5) / n as f64;
        let low = (2.0 * PI * x).cos();
        for j in 0..n {
            let q = fine_out.get(i, j, 7);
            max_low_err = max_low_err.max((q - low).abs());
            max_loss = max_loss.max((q - fine_in.get(i as i64, j as i64, 7)).abs());
        }
    }
    assert!(
        max_low_err < 1e-8,
        "large-scale component not reconstructed, err = {:e}",
        max_low_err
    );

    // the k=13 component has no coarse representation; losing it is the
    // point, so the round trip must NOT reproduce the input
    assert!(
        max_loss > 0.5,
        "small-scale content unexpectedly survived the round trip (max dev {:e})",
        max_loss
    );
}

#[test]
fn splice_inherits_the_coarse_mean() {
    // DC sits deep inside the splice window: the merged patch must take its
    // mean from the coarse parent, whatever the fine noise says
    let nc = 16usize;
    let mut coarse_buf = DensityGrid3D::new(nc, nc, nc);
    for v in coarse_buf.data_mut() {
        *v = 3.25;
    }

    let mut fine = PaddedSubGrid3D::with_margin([4, 4, 4], [8, 8, 8], [4, 4, 4]);
    let mut noise = WhiteNoise::new(99);
    let region = NoiseRegion {
        level: 5,
        offset: [4, 4, 4],
        extent: fine.padded_extent(),
    };
    noise.fill(&region, fine.data_mut());

    spectral_refine(&WorkBuffer::Base(coarse_buf), &mut fine);

    let n = fine.size(0);
    let sum: f64 = fine.data().iter().sum();
    let mean = sum / (n * n * n) as f64;
    assert!(
        (mean - 3.25).abs() < 1e-10,
        "spliced mean {} does not match the coarse mean",
        mean
    );
}

#[test]
fn spectral_and_straight_restriction_agree_on_smooth_fields() {
    // for a band-limited smooth field the two coarsening paths must agree
    // closely; for rough fields they legitimately differ
    let n = 32usize;
    let mut fine = full_domain_mesh(n);
    for i in 0..n {
        let x = (i as f64 + 0.5) / n as f64;
        for j in 0..n {
            let y = (j as f64 + 0.5) / n as f64;
            for k in 0..n {
                let z = (k as f64 + 0.5) / n as f64;
                fine.set(
                    i as i64,
                    j as i64,
                    k as i64,
                    (2.0 * PI * x).cos() + (2.0 * PI * y).sin() - 0.5 * (2.0 * PI * z).cos(),
                );
            }
        }
    }

    let mut spectral = full_domain_mesh(n / 2);
    spectral_coarsen(&fine, &mut spectral);

    let mut plain = full_domain_mesh(n / 2);
    restrict_straight(&fine, &mut plain);

    for i in 0..(n / 2) as i64 {
        for j in 0..(n / 2) as i64 {
            for k in 0..(n / 2) as i64 {
                let a = spectral.get(i, j, k);
                let b = plain.get(i, j, k);
                assert!(
                    (a - b).abs() < 0.02,
                    "paths disagree at ({},{},{}): spectral {} vs plain {}",
                    i,
                    j,
                    k,
                    a,
                    b
                );
            }
        }
    }
}

#[test]
fn coarsening_preserves_total_variance_of_low_k_content() {
    // a field containing only coarse-representable modes keeps its variance
    // through decimation (the window only touches bands near the Nyquist)
    let n = 32usize;
    let mut fine = full_domain_mesh(n);
    for i in 0..n {
        let x = (i as f64 + 0.5) / n as f64;
        for j in 0..n {
            let y = (j as f64 + 0.5) / n as f64;
            for k in 0..n {
                fine.set(
                    i as i64,
                    j as i64,
                    k as i64,
                    (2.0 * PI * 2.0 * x).cos() * (2.0 * PI * y).sin(),
                );
            }
        }
    }
    let fine_var = variance(&fine, n);

    let mut coarse = full_domain_mesh(n / 2);
    spectral_coarsen(&fine, &mut coarse);
    let coarse_var = variance(&coarse, n / 2);

    assert!(
        (fine_var - coarse_var).abs() < 1e-10,
        "variance changed across decimation: {} -> {}",
        fine_var,
        coarse_var
    );
}

fn variance(m: &GhostMesh3D, n: usize) -> f64 {
    let mut sum = 0.0;
    let mut sum2 = 0.0;
    for i in 0..n as i64 {
        for j in 0..n as i64 {
            for k in 0..n as i64 {
                let v = m.get(i, j, k);
                sum += v;
                sum2 += v * v;
            }
        }
    }
    let nn = (n * n * n) as f64;
    sum2 / nn - (sum / nn) * (sum / nn)
}
