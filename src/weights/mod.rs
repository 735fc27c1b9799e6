mod factory;
mod matrix;
mod spectrum;

pub use factory::{build_weights, WeightMatrixFactory};
pub use matrix::{SpatialWeightMatrix, WeightStyle};
pub use spectrum::{LogDet, Spectrum};
