mod dataset;
mod spec;
mod unit;

pub use dataset::{AuxiliaryWeights, Dataset};
pub use spec::{Design, RegressionSpec, INTERCEPT};
pub use unit::SpatialUnit;
