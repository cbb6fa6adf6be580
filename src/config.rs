// src/config.rs

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

use crate::error::GridError;

/// How refinement-level bounding boxes are snapped to their parent grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Alignment {
    /// Align every level with the coarsest (top) grid cells.
    TopGrid,
    /// Keep the user-requested dimensions, shifting corners by at most one cell.
    PreserveDims,
    /// Align with the next coarser grid in multiples of the gridding unit.
    #[default]
    GridUnit,
}

/// Axis-aligned refinement region in box coordinates ([0..1[ per axis).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionConfig {
    #[serde(default = "default_region_kind")]
    pub kind: String,
    pub left: [f64; 3],
    pub right: [f64; 3],
}

fn default_region_kind() -> String {
    "box".to_string()
}

/// Full setup for geometry resolution and density assembly.
///
/// Mirrors the structure written/read by the run driver; loadable from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupConfig {
    pub levelmin: u32,
    pub levelmax: u32,

    /// Base level for the density calculation; defaults to `levelmin`.
    #[serde(default)]
    pub levelmin_tf: Option<u32>,

    /// Buffer cells between successive refinement levels (coarse cells).
    #[serde(default = "default_padding")]
    pub padding: u32,

    #[serde(default)]
    pub alignment: Alignment,

    /// Force cubic refinement patches (required by some simulation codes).
    #[serde(default)]
    pub equal_extent: bool,

    /// Multiple-of-N extent constraint for block-structured consumers.
    #[serde(default)]
    pub blocking_factor: u32,

    /// Internal cell granularity of patch corners.
    #[serde(default = "default_gridding_unit")]
    pub gridding_unit: u32,

    /// Extra cells reserved around each patch for convolution
    /// (`-1` selects double padding, i.e. a margin of half the patch extent).
    #[serde(default = "default_margin")]
    pub convolution_margin: i32,

    /// Suppress the domain shift that centers the refinement region.
    #[serde(default)]
    pub no_shift: bool,

    /// Apply the domain shift even when `no_shift` is set.
    #[serde(default)]
    pub force_shift: bool,

    /// Cell granularity imposed by the noise source on the coarse grid.
    #[serde(default = "default_base_unit")]
    pub base_unit: i64,

    #[serde(default)]
    pub fix_mode_amplitude: bool,

    #[serde(default)]
    pub flip_mode_amplitude: bool,

    /// Frequency-space splicing of adjacent levels; the alternative is the
    /// plain restriction pass after assembly.
    #[serde(default = "default_true")]
    pub fourier_splicing: bool,

    /// Seed for the reference white-noise source.
    #[serde(default)]
    pub seed: u64,

    pub region: RegionConfig,
}

fn default_padding() -> u32 {
    8
}
fn default_gridding_unit() -> u32 {
    2
}
fn default_margin() -> i32 {
    4
}
fn default_base_unit() -> i64 {
    1
}
fn default_true() -> bool {
    true
}

impl SetupConfig {
    pub fn from_file(path: &Path) -> Result<Self, GridError> {
        let file = File::open(path)?;
        let cfg: SetupConfig = serde_json::from_reader(file)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Effective base level for the density calculation.
    pub fn levelmin_tf(&self) -> u32 {
        self.levelmin_tf.unwrap_or(self.levelmin)
    }

    pub fn validate(&self) -> Result<(), GridError> {
        if self.levelmin > self.levelmax {
            return Err(GridError::Config(format!(
                "levelmin ({}) must not exceed levelmax ({})",
                self.levelmin, self.levelmax
            )));
        }
        if self.levelmin_tf() < self.levelmin || self.levelmin_tf() > self.levelmax {
            return Err(GridError::Config(format!(
                "levelmin_tf ({}) must lie in [levelmin, levelmax] = [{}, {}]",
                self.levelmin_tf(),
                self.levelmin,
                self.levelmax
            )));
        }
        if self.gridding_unit == 0 {
            return Err(GridError::Config("gridding_unit must be positive".into()));
        }
        if self.base_unit <= 0 {
            return Err(GridError::Config("base_unit must be positive".into()));
        }
        for d in 0..3 {
            if self.region.right[d] <= self.region.left[d] {
                return Err(GridError::Config(format!(
                    "region.right[{}] must exceed region.left[{}]",
                    d, d
                )));
            }
        }
        Ok(())
    }
}
