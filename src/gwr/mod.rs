mod bandwidth;
mod engine;
mod kernel;
mod surface;

pub use bandwidth::{BandwidthEvaluation, BandwidthSelection, BandwidthSelector, Criterion};
pub use engine::{GwrDiagnostics, GwrResult, LocalFit, LocalRegressionEngine};
pub use kernel::{Bandwidth, Kernel, KernelWeighter};
pub use surface::{fit_gwr, GwrRow, GwrTable};
