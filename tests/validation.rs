// tests/validation.rs
//
// Integration-style validation tests: end-to-end pipeline scenarios and the
// structural invariants of the assembled hierarchy.
// Run with: cargo test --test validation

use std::cell::Cell;

use zoomgrid::config::SetupConfig;
use zoomgrid::density::{
    generate_density_hierarchy, generate_density_unigrid, normalize_density,
};
use zoomgrid::geometry::RefinementGeometry;
use zoomgrid::hierarchy::GridHierarchy;
use zoomgrid::kernel::{ConvolveOpts, IdentityKernel, KernelFactory, TransferKernel};
use zoomgrid::mask::MASK_LEAF;
use zoomgrid::noise::{NoiseRegion, NoiseSource, WhiteNoise};
use zoomgrid::region::BoxRegion;

/// Noise source that counts how often it is invoked.
struct CountingNoise {
    inner: WhiteNoise,
    calls: usize,
}

impl CountingNoise {
    fn new(seed: u64) -> Self {
        Self {
            inner: WhiteNoise::new(seed),
            calls: 0,
        }
    }
}

impl NoiseSource for CountingNoise {
    fn fill(&mut self, region: &NoiseRegion, out: &mut [f64]) {
        self.calls += 1;
        self.inner.fill(region, out);
    }
}

/// Kernel factory that counts fetches.
struct CountingKernels {
    fetches: Cell<usize>,
}

impl CountingKernels {
    fn new() -> Self {
        Self { fetches: Cell::new(0) }
    }
}

impl KernelFactory for CountingKernels {
    fn fetch(&self, _level: u32, _is_patch: bool) -> Box<dyn TransferKernel> {
        self.fetches.set(self.fetches.get() + 1);
        Box::new(IdentityKernel)
    }
}

fn zoom_config(levelmin: u32, levelmax: u32) -> SetupConfig {
    serde_json::from_str(&format!(
        r#"{{
            "levelmin": {},
            "levelmax": {},
            "seed": 4321,
            "region": {{ "left": [0.42, 0.40, 0.44], "right": [0.58, 0.61, 0.57] }}
        }}"#,
        levelmin, levelmax
    ))
    .unwrap()
}

#[test]
fn unigrid_setup_visits_one_level_once() {
    // levelmin = levelmax = 7: one grid of 128^3, one noise fill, one kernel
    let cfg = zoom_config(7, 7);
    let mut region = BoxRegion::from_config(&cfg.region);
    let geom = RefinementGeometry::new(&cfg, &mut region).unwrap();

    let mut noise = CountingNoise::new(cfg.seed);
    let kernels = CountingKernels::new();
    let mut delta = GridHierarchy::new(4);

    generate_density_unigrid(&cfg, &geom, &mut noise, &kernels, &mut delta, true).unwrap();

    assert_eq!(noise.calls, 1, "noise source must be invoked exactly once");
    assert_eq!(kernels.fetches.get(), 1, "kernel must be fetched exactly once");
    assert_eq!(delta.levelmin(), 7);
    assert_eq!(delta.levelmax(), 7);
    for d in 0..3 {
        assert_eq!(delta.size(7, d), 128);
    }

    normalize_density(&mut delta);
    let mean = delta.get_grid(7).interior_mean();
    assert!(
        mean.abs() < 1e-12,
        "coarsest-level mean after normalization: {:e}",
        mean
    );
}

#[test]
fn base_hierarchy_reports_full_coverage_at_creation() {
    for (lmin, lmax) in [(3u32, 3u32), (4, 6), (5, 8)] {
        let mut delta = GridHierarchy::new(4);
        delta.create_base_hierarchy(lmax);
        assert_eq!(
            delta.levelmin(),
            lmax,
            "after create_base_hierarchy({}), levelmin must be {}",
            lmax,
            lmax
        );
        for ilevel in lmin..=lmax {
            for d in 0..3 {
                assert_eq!(delta.size(ilevel, d), 1usize << ilevel);
            }
        }
    }
}

#[test]
fn patch_bookkeeping_matches_the_doubling_rule() {
    // one refinement patch of extent 64^3 at relative offset (10,10,10)
    let mut delta = GridHierarchy::new(4);
    delta.create_base_hierarchy(7);
    delta.add_patch([20, 20, 20], [88, 88, 88]);
    delta.add_patch([10, 10, 10], [64, 64, 64]);

    assert_eq!(delta.get_grid(9).size(0), 64);
    for d in 0..3 {
        assert_eq!(
            delta.offset_abs(9, d),
            2 * delta.offset_abs(8, d) + 2 * 10,
            "dim {}",
            d
        );
    }
}

#[test]
fn zoom_pipeline_keeps_geometry_and_masks_consistent() {
    let cfg = zoom_config(6, 8);
    let mut region = BoxRegion::from_config(&cfg.region);
    let geom = RefinementGeometry::new(&cfg, &mut region).unwrap();

    let mut noise = WhiteNoise::new(cfg.seed);
    let kernels = CountingKernels::new();
    let mut delta = GridHierarchy::new(4);

    generate_density_hierarchy(&cfg, &geom, &mut noise, &kernels, &mut delta, true).unwrap();

    // one kernel per level
    assert_eq!(kernels.fetches.get(), 3);

    // realized grids agree with the resolved geometry
    assert_eq!(delta.levelmax(), 8);
    for ilevel in delta.levelmin() + 1..=delta.levelmax() {
        for d in 0..3 {
            assert_eq!(delta.size(ilevel, d) as i64, geom.size(ilevel, d));
            assert_eq!(delta.offset(ilevel, d), geom.offset(ilevel, d));
            assert_eq!(delta.offset_abs(ilevel, d), geom.offset_abs(ilevel, d));
        }
    }

    // cross-level consistency of relative and absolute offsets
    for ilevel in delta.levelmin() + 1..=delta.levelmax() {
        for d in 0..3 {
            assert_eq!(
                delta.offset_abs(ilevel, d),
                2 * delta.offset_abs(ilevel - 1, d) + 2 * delta.offset(ilevel, d),
                "level {} dim {}",
                ilevel,
                d
            );
        }
    }

    normalize_density(&mut delta);
    let mean = delta.get_grid(delta.levelmin()).interior_mean();
    assert!(mean.abs() < 1e-12, "mean after normalization: {:e}", mean);

    // leaf counting is stable and equals the per-level leaf-mask tally
    delta.build_refinement_mask(&region, &geom.coord_shift());
    let count_a = delta.count_leaf_cells(delta.levelmin(), delta.levelmax());
    let count_b = delta.count_leaf_cells(delta.levelmin(), delta.levelmax());
    assert_eq!(count_a, count_b);

    let mask_tally: usize = (delta.levelmin()..=delta.levelmax())
        .map(|l| delta.mask(l).expect("mask built").count_value(MASK_LEAF))
        .sum();
    assert_eq!(count_a, mask_tally);
}

#[test]
fn both_coarsening_paths_yield_the_same_structure() {
    // the spectral and plain-restriction paths are not numerically
    // equivalent, but they must agree on the hierarchy structure and both
    // deliver a zero-mean field after normalization
    let mut results = Vec::new();

    for splicing in [true, false] {
        let mut cfg = zoom_config(6, 8);
        cfg.fourier_splicing = splicing;

        let mut region = BoxRegion::from_config(&cfg.region);
        let geom = RefinementGeometry::new(&cfg, &mut region).unwrap();
        let mut noise = WhiteNoise::new(cfg.seed);
        let kernels = CountingKernels::new();
        let mut delta = GridHierarchy::new(4);

        generate_density_hierarchy(&cfg, &geom, &mut noise, &kernels, &mut delta, true)
            .unwrap();
        normalize_density(&mut delta);

        let mean = delta.get_grid(delta.levelmin()).interior_mean();
        assert!(
            mean.abs() < 1e-12,
            "splicing={}: mean after normalization {:e}",
            splicing,
            mean
        );

        let structure: Vec<(usize, i64, i64)> = (delta.levelmin()..=delta.levelmax())
            .flat_map(|l| (0..3usize).map(move |d| (l, d)))
            .map(|(l, d)| (delta.size(l, d), delta.offset(l, d), delta.offset_abs(l, d)))
            .collect();
        results.push(structure);
    }

    assert_eq!(
        results[0], results[1],
        "both coarsening paths must realize identical grid structures"
    );
}

#[test]
#[should_panic(expected = "non-existent grid")]
fn grid_access_beyond_levelmax_is_an_error() {
    let mut delta = GridHierarchy::new(4);
    delta.create_base_hierarchy(6);
    let _ = delta.get_grid(7);
}

#[test]
fn convolve_opts_reach_the_kernel() {
    struct FlagChecker;
    impl TransferKernel for FlagChecker {
        fn apply(&self, _data: &mut [f64], _extent: [usize; 3], opts: &ConvolveOpts) {
            assert!(opts.shift);
            assert!(!opts.fix_amplitude);
            assert!(!opts.flip_sign);
        }
    }
    struct FlagFactory;
    impl KernelFactory for FlagFactory {
        fn fetch(&self, _level: u32, _is_patch: bool) -> Box<dyn TransferKernel> {
            Box::new(FlagChecker)
        }
    }

    let cfg = zoom_config(5, 5);
    let mut region = BoxRegion::from_config(&cfg.region);
    let geom = RefinementGeometry::new(&cfg, &mut region).unwrap();
    let mut noise = WhiteNoise::new(1);
    let mut delta = GridHierarchy::new(4);
    generate_density_unigrid(&cfg, &geom, &mut noise, &FlagFactory, &mut delta, true).unwrap();
}
