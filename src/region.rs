// src/region.rs
//
// Region-generator collaborator: decides which points belong to the
// refinement volume and reports its bounding box. The geometry resolver and
// the mask builder receive an implementation explicitly; there is no ambient
// process-wide region state.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use crate::config::RegionConfig;
use crate::error::GridError;

pub trait RegionGenerator: Send + Sync {
    /// Axis-aligned bounding box of the region at a given level, in box
    /// coordinates.
    fn aabb(&self, level: u32) -> ([f64; 3], [f64; 3]);

    /// Whether a point (box coordinates, possibly outside [0,1) before
    /// periodic wrapping) lies inside the region at a given level.
    fn query_point(&self, x: &[f64; 3], level: u32) -> bool;

    /// Grid dimensions explicitly forced by the region, if any.
    fn forced_grid_dims(&self) -> Option<[i64; 3]> {
        None
    }

    fn center(&self) -> [f64; 3] {
        let (left, right) = self.aabb(0);
        [
            (left[0] + 0.5 * (right[0] - left[0])).rem_euclid(1.0),
            (left[1] + 0.5 * (right[1] - left[1])).rem_euclid(1.0),
            (left[2] + 0.5 * (right[2] - left[2])).rem_euclid(1.0),
        ]
    }

    /// Record the bounding box the grid generator actually realized.
    fn update_aabb(&mut self, left: [f64; 3], right: [f64; 3]);
}

/// Axis-aligned box region; the reference implementation.
#[derive(Debug, Clone)]
pub struct BoxRegion {
    left: [f64; 3],
    right: [f64; 3],
}

impl BoxRegion {
    pub fn new(left: [f64; 3], right: [f64; 3]) -> Self {
        Self { left, right }
    }

    pub fn from_config(cfg: &RegionConfig) -> Self {
        Self::new(cfg.left, cfg.right)
    }
}

impl RegionGenerator for BoxRegion {
    fn aabb(&self, _level: u32) -> ([f64; 3], [f64; 3]) {
        (self.left, self.right)
    }

    fn query_point(&self, x: &[f64; 3], _level: u32) -> bool {
        // periodic containment: measure from the left corner, wrapped into [0,1)
        (0..3).all(|d| {
            let dx = (x[d] - self.left[d]).rem_euclid(1.0);
            dx < self.right[d] - self.left[d]
        })
    }

    fn update_aabb(&mut self, left: [f64; 3], right: [f64; 3]) {
        self.left = left;
        self.right = right;
    }
}

pub type RegionFactory = fn(&RegionConfig) -> Box<dyn RegionGenerator>;

fn region_registry() -> &'static Mutex<HashMap<&'static str, RegionFactory>> {
    static REGISTRY: OnceLock<Mutex<HashMap<&'static str, RegionFactory>>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map: HashMap<&'static str, RegionFactory> = HashMap::new();
        map.insert("box", |cfg| Box::new(BoxRegion::from_config(cfg)));
        Mutex::new(map)
    })
}

/// Register a region-generator factory under a name key.
pub fn register_region(name: &'static str, factory: RegionFactory) {
    region_registry()
        .lock()
        .expect("region registry mutex poisoned")
        .insert(name, factory);
}

/// Instantiate the region generator selected by `cfg.kind`.
pub fn create_region(cfg: &RegionConfig) -> Result<Box<dyn RegionGenerator>, GridError> {
    let registry = region_registry()
        .lock()
        .expect("region registry mutex poisoned");
    registry
        .get(cfg.kind.as_str())
        .map(|f| f(cfg))
        .ok_or_else(|| GridError::Config(format!("unknown region kind '{}'", cfg.kind)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_region_contains_its_interior() {
        let r = BoxRegion::new([0.4, 0.4, 0.4], [0.6, 0.6, 0.6]);
        assert!(r.query_point(&[0.5, 0.5, 0.5], 8));
        assert!(!r.query_point(&[0.7, 0.5, 0.5], 8));
        assert!(!r.query_point(&[0.39, 0.5, 0.5], 8));
    }

    #[test]
    fn box_region_wraps_periodically() {
        let r = BoxRegion::new([0.9, 0.9, 0.9], [1.1, 1.1, 1.1]);
        assert!(r.query_point(&[0.95, 0.95, 0.95], 8));
        assert!(r.query_point(&[0.05, 0.05, 0.05], 8));
        assert!(!r.query_point(&[0.5, 0.5, 0.5], 8));
    }

    #[test]
    fn center_is_the_box_midpoint() {
        let r = BoxRegion::new([0.4, 0.4, 0.4], [0.6, 0.6, 0.6]);
        let c = r.center();
        assert!((c[0] - 0.5).abs() < 1e-14);
    }

    #[test]
    fn registry_creates_box_regions() {
        let cfg = RegionConfig {
            kind: "box".into(),
            left: [0.4; 3],
            right: [0.6; 3],
        };
        let r = create_region(&cfg).unwrap();
        assert!(r.query_point(&[0.5, 0.5, 0.5], 8));

        let bad = RegionConfig {
            kind: "ellipsoid".into(),
            left: [0.4; 3],
            right: [0.6; 3],
        };
        assert!(create_region(&bad).is_err());
    }
}
