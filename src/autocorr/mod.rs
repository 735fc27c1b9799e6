mod moran;

pub use moran::{
    moran, moran_for_variable, Alternative, AnalyticMoran, MoranResult, PermutationMoran, VarianceAssumption,
};
