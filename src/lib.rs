#![doc = "Spatial regression public API"]
mod autocorr;
mod batch;
mod config;
mod data;
mod error;
mod geom;
mod graph;
mod gwr;
mod linalg;
mod regression;
mod stats;
mod weights;

pub mod io;

#[doc(inline)]
pub use error::{Result, SpatialError, Stage};

#[doc(inline)]
pub use config::{
    AnalysisConfig, BandwidthSearch, GraphConfig, GwrConfig, ImpactConfig, MoranConfig, OptimizerConfig,
    RegressionConfig, WeightsConfig,
};

#[doc(inline)]
pub use data::{AuxiliaryWeights, Dataset, Design, RegressionSpec, SpatialUnit, INTERCEPT};

#[doc(inline)]
pub use geom::{DistanceMetric, Geometries};

#[doc(inline)]
pub use graph::{build_graph, AdjacencyGraph, ContiguityRule, GraphBuilder, NeighborSummary};

#[doc(inline)]
pub use weights::{build_weights, LogDet, Spectrum, SpatialWeightMatrix, WeightMatrixFactory, WeightStyle};

#[doc(inline)]
pub use autocorr::{moran, moran_for_variable, Alternative, AnalyticMoran, MoranResult, PermutationMoran, VarianceAssumption};

#[doc(inline)]
pub use gwr::{
    fit_gwr, Bandwidth, BandwidthEvaluation, BandwidthSelection, BandwidthSelector, Criterion, GwrDiagnostics,
    GwrResult, GwrRow, GwrTable, Kernel, KernelWeighter, LocalFit, LocalRegressionEngine,
};

#[doc(inline)]
pub use regression::{
    fit_model, fit_models, Coefficient, GlobalModelResult, ImpactInterval, Impacts, ModelKind, ModelType,
    PredictorImpact, TraceMethod,
};

#[doc(inline)]
pub use batch::{run_batch, BatchSummary, ModelOutcome, ModelTally, RankedFit, SpecificationReport};
