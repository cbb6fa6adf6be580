// src/density/pipeline.rs
//
// Density assembly: white noise per level, kernel convolution, spectral
// splicing of adjacent levels, and the final mean bookkeeping. Levels are
// visited strictly coarse-to-fine; each level's working buffer is retired
// as soon as the next finer level has been spliced against it, so at most
// two levels' working grids are alive at a time.

use log::{info, warn};
use std::time::Instant;

use crate::config::SetupConfig;
use crate::density::splice::{restrict_straight, spectral_coarsen, spectral_refine};
use crate::density::working::{DensityGrid3D, PaddedSubGrid3D, WorkBuffer};
use crate::error::GridError;
use crate::geometry::RefinementGeometry;
use crate::hierarchy::GridHierarchy;
use crate::kernel::{ConvolveOpts, KernelFactory};
use crate::noise::NoiseSource;

/// Single-level density field: noise and kernel on the base grid only.
pub fn generate_density_unigrid(
    cfg: &SetupConfig,
    _geom: &RefinementGeometry,
    noise: &mut dyn NoiseSource,
    kernels: &dyn KernelFactory,
    delta: &mut GridHierarchy,
    shift: bool,
) -> Result<(), GridError> {
    let level = cfg.levelmin_tf();
    let nbase = 1usize << level;

    let opts = ConvolveOpts {
        shift,
        fix_amplitude: cfg.fix_mode_amplitude,
        flip_sign: cfg.flip_mode_amplitude,
    };

    info!("running unigrid density convolution on level {}", level);

    let mut top = DensityGrid3D::new(nbase, nbase, nbase);
    let region = top.noise_region(level);
    noise.fill(&region, top.data_mut());

    let kernel = kernels.fetch(level, false);
    let extent = top.extent();
    kernel.apply(top.data_mut(), extent, &opts);

    delta.create_base_hierarchy(level);
    top.copy_into(delta.get_grid_mut(level));

    Ok(())
}

/// Multi-level density field: base level plus one spliced patch per
/// refinement level, then the coarsening/re-crop pass where needed.
pub fn generate_density_hierarchy(
    cfg: &SetupConfig,
    geom: &RefinementGeometry,
    noise: &mut dyn NoiseSource,
    kernels: &dyn KernelFactory,
    delta: &mut GridHierarchy,
    shift: bool,
) -> Result<(), GridError> {
    let levelmin = cfg.levelmin_tf();
    let levelmax = cfg.levelmax;
    let nbase = 1usize << levelmin;

    let opts = ConvolveOpts {
        shift,
        fix_amplitude: cfg.fix_mode_amplitude,
        flip_sign: cfg.flip_mode_amplitude,
    };

    if cfg.fix_mode_amplitude && cfg.levelmin != levelmax {
        warn!("mode amplitude fixing combined with a zoom setup is not well tested");
    }

    let tstart = Instant::now();

    info!("performing noise convolution on level {}", levelmin);
    let mut top = DensityGrid3D::new(nbase, nbase, nbase);
    let region = top.noise_region(levelmin);
    noise.fill(&region, top.data_mut());
    let base_extent = top.extent();
    kernels
        .fetch(levelmin, false)
        .apply(top.data_mut(), base_extent, &opts);

    delta.create_base_hierarchy(levelmin);
    top.copy_into(delta.get_grid_mut(levelmin));

    let mut prev = WorkBuffer::Base(top);

    for level in levelmin + 1..=levelmax {
        info!("performing noise convolution on level {}", level);

        // the first refined level's parent is the full-domain base cube, so
        // its offset is taken in that frame; later parents are patches
        let offset = if level == levelmin + 1 {
            [
                geom.offset_abs(level, 0) / 2,
                geom.offset_abs(level, 1) / 2,
                geom.offset_abs(level, 2) / 2,
            ]
        } else {
            [
                geom.offset(level, 0),
                geom.offset(level, 1),
                geom.offset(level, 2),
            ]
        };
        let extent = [
            geom.size(level, 0) as usize,
            geom.size(level, 1) as usize,
            geom.size(level, 2) as usize,
        ];
        info!(
            "allocating refinement patch: offset = ({}, {}, {}), size = ({}, {}, {})",
            offset[0], offset[1], offset[2], extent[0], extent[1], extent[2]
        );

        let mut fine = if geom.margin() > 0 {
            let m = geom.margin() as usize;
            info!("    margin = {}", m);
            PaddedSubGrid3D::with_margin(offset, extent, [m, m, m])
        } else {
            info!("    margin = {}", extent[0] / 2);
            PaddedSubGrid3D::new(offset, extent)
        };

        let offset_abs = [
            geom.offset_abs(level, 0),
            geom.offset_abs(level, 1),
            geom.offset_abs(level, 2),
        ];
        let region = fine.noise_region(level, offset_abs);
        noise.fill(&region, fine.data_mut());

        let padded_extent = fine.padded_extent();
        kernels
            .fetch(level, true)
            .apply(fine.data_mut(), padded_extent, &opts);

        if cfg.fourier_splicing {
            spectral_refine(&prev, &mut fine);
        }

        delta.add_patch(offset, extent);
        fine.copy_unpad_into(delta.get_grid_mut(level));

        // retiring the previous buffer here bounds peak memory to two levels
        prev = WorkBuffer::Patch(fine);
    }
    drop(prev);

    info!(
        "density calculation took {:.3}s",
        tstart.elapsed().as_secs_f64()
    );

    if !cfg.fourier_splicing || delta.levelmin() > geom.levelmin() {
        coarsen_density(geom, delta, cfg.fourier_splicing);
    }

    Ok(())
}

/// Propagate the density field down the hierarchy and re-crop levels whose
/// realized footprint disagrees with the resolved geometry.
///
/// With `spectral` the decimation chain runs in frequency space; otherwise
/// every level is restricted by plain 8-cell averaging and the coarsest
/// level's mean is fixed afterwards. Both paths are first-class.
pub fn coarsen_density(geom: &RefinementGeometry, delta: &mut GridHierarchy, spectral: bool) {
    let levelmin_tf = delta.levelmin();

    if spectral {
        for i in (geom.levelmin().max(1)..=levelmin_tf).rev() {
            let (coarse, fine) = delta.levels_pair_mut(i);
            spectral_coarsen(fine, coarse);
        }
    } else {
        for i in (geom.levelmin().max(1)..=delta.levelmax()).rev() {
            let (coarse, fine) = delta.levels_pair_mut(i);
            restrict_straight(fine, coarse);
        }
    }

    for i in 1..=geom.levelmax() {
        let mismatch = (0..3).any(|d| {
            geom.offset(i, d) != delta.offset(i, d)
                || geom.size(i, d) != delta.size(i, d) as i64
        });
        if mismatch {
            delta.cut_patch(
                i,
                [
                    geom.offset_abs(i, 0),
                    geom.offset_abs(i, 1),
                    geom.offset_abs(i, 2),
                ],
                [
                    geom.size(i, 0) as usize,
                    geom.size(i, 1) as usize,
                    geom.size(i, 2) as usize,
                ],
                !spectral,
            );
        }
    }

    if !spectral {
        normalize_levelmin_density(delta);
    }
}

/// Subtract the coarsest level's mean from every level, leaving a zero-mean
/// density contrast field.
pub fn normalize_density(delta: &mut GridHierarchy) {
    let mean = delta.get_grid(delta.levelmin()).interior_mean();
    info!("top grid mean density is off by {:e}, correcting", mean);

    for i in delta.levelmin()..=delta.levelmax() {
        delta.get_grid_mut(i).interior_add(-mean);
    }
}

/// Subtract the coarsest level's mean from that level only.
pub fn normalize_levelmin_density(delta: &mut GridHierarchy) {
    let levelmin = delta.levelmin();
    let mean = delta.get_grid(levelmin).interior_mean();
    info!("top grid mean density is off by {:e}, correcting", mean);
    delta.get_grid_mut(levelmin).interior_add(-mean);
}
