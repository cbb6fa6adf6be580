pub mod pipeline;
pub mod splice;
pub mod working;

pub use pipeline::{
    coarsen_density, generate_density_hierarchy, generate_density_unigrid, normalize_density,
    normalize_levelmin_density,
};
pub use splice::{meyer_scaling, restrict_straight, spectral_coarsen, spectral_refine};
pub use working::{DensityGrid3D, PaddedSubGrid3D, WorkBuffer};
