// src/main.rs
//
// CLI driver: resolve the refinement geometry from a JSON setup file, run
// the density pipeline with the reference collaborators (seeded white
// noise, pass-through kernel), and report the resulting hierarchy.
//
// Examples:
//
//   cargo run --release -- setup.json
//       -> build the hierarchy described by setup.json
//
//   cargo run --release -- setup.json seed=1234 splicing=off
//       -> override the noise seed and use the plain-restriction path
//
// Real transfer-function kernels, noise plugins and output writers plug in
// through the library traits; this driver exercises the grid machinery.

use std::env;
use std::path::PathBuf;
use std::process::exit;

use log::{error, info};

use zoomgrid::config::SetupConfig;
use zoomgrid::density::{
    generate_density_hierarchy, generate_density_unigrid, normalize_density,
};
use zoomgrid::error::GridError;
use zoomgrid::geometry::RefinementGeometry;
use zoomgrid::hierarchy::GridHierarchy;
use zoomgrid::kernel::IdentityKernelFactory;
use zoomgrid::noise::WhiteNoise;
use zoomgrid::region::create_region;

fn print_usage() {
    eprintln!(
        r#"Usage:
  zoomgrid <setup.json> [seed=N] [levelmin=N] [levelmax=N]
           [splicing=on|off] [shift=on|off]

The setup file configures the level range, refinement region and
alignment/padding rules; see SetupConfig for the full set of keys.
"#
    );
}

fn parse_on_off(v: &str) -> Option<bool> {
    match v {
        "on" | "true" | "yes" => Some(true),
        "off" | "false" | "no" => Some(false),
        _ => None,
    }
}

fn run() -> Result<(), GridError> {
    let argv: Vec<String> = env::args().collect();
    if argv.len() < 2 {
        print_usage();
        exit(1);
    }

    let mut cfg = SetupConfig::from_file(&PathBuf::from(&argv[1]))?;
    let mut shift = true;

    for arg in &argv[2..] {
        if let Some((key, val)) = arg.split_once('=') {
            match key {
                "seed" => {
                    cfg.seed = val
                        .parse()
                        .map_err(|_| GridError::Config(format!("bad seed '{}'", val)))?
                }
                "levelmin" => {
                    cfg.levelmin = val
                        .parse()
                        .map_err(|_| GridError::Config(format!("bad levelmin '{}'", val)))?
                }
                "levelmax" => {
                    cfg.levelmax = val
                        .parse()
                        .map_err(|_| GridError::Config(format!("bad levelmax '{}'", val)))?
                }
                "splicing" => {
                    cfg.fourier_splicing = parse_on_off(val)
                        .ok_or_else(|| GridError::Config(format!("bad splicing '{}'", val)))?
                }
                "shift" => {
                    shift = parse_on_off(val)
                        .ok_or_else(|| GridError::Config(format!("bad shift '{}'", val)))?
                }
                _ => {
                    print_usage();
                    return Err(GridError::Config(format!("unknown option '{}'", key)));
                }
            }
        } else {
            print_usage();
            return Err(GridError::Config(format!("unknown argument '{}'", arg)));
        }
    }
    cfg.validate()?;

    let mut region = create_region(&cfg.region)?;
    let geom = RefinementGeometry::new(&cfg, region.as_mut())?;
    geom.log_structure();

    let mut noise = WhiteNoise::new(cfg.seed);
    let kernels = IdentityKernelFactory;
    let mut delta = GridHierarchy::new(4);

    if cfg.levelmin == cfg.levelmax {
        generate_density_unigrid(&cfg, &geom, &mut noise, &kernels, &mut delta, shift)?;
    } else {
        generate_density_hierarchy(&cfg, &geom, &mut noise, &kernels, &mut delta, shift)?;
    }

    normalize_density(&mut delta);

    delta.build_refinement_mask(region.as_ref(), &geom.coord_shift());

    info!("assembled hierarchy:");
    for ilevel in delta.levelmin()..=delta.levelmax() {
        let g = delta.get_grid(ilevel);
        info!(
            "  level {:3}: size = ({:5}, {:5}, {:5})  mean = {:+.6e}",
            ilevel,
            g.size(0),
            g.size(1),
            g.size(2),
            g.interior_mean()
        );
    }
    info!(
        "leaf cells: {}",
        delta.count_leaf_cells(delta.levelmin(), delta.levelmax())
    );

    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        error!("{}", e);
        exit(1);
    }
}
