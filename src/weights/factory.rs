use log::{info, warn};
use ndarray::Array1;

use crate::config::WeightsConfig;
use crate::data::Dataset;
use crate::error::{Result, SpatialError, Stage};
use crate::graph::AdjacencyGraph;
use crate::weights::{SpatialWeightMatrix, WeightStyle};

/// Converts an adjacency graph into a spatial weight matrix.
pub struct WeightMatrixFactory<'a> {
    config: &'a WeightsConfig,
}

impl<'a> WeightMatrixFactory<'a> {
    pub fn new(config: &'a WeightsConfig) -> Self { Self { config } }

    /// Build weights, taking auxiliary weights from the dataset when the
    /// configuration names a source.
    pub fn build_for(&self, graph: &AdjacencyGraph, dataset: &Dataset) -> Result<SpatialWeightMatrix> {
        if graph.ids() != dataset.ids() {
            return Err(SpatialError::invalid(Stage::Weights, "graph and dataset units differ"));
        }
        let auxiliary = match &self.config.auxiliary {
            Some(source) => Some(dataset.auxiliary(source, Stage::Weights)?),
            None => None,
        };
        self.build(graph, auxiliary.as_ref())
    }

    /// Build weights with optional per-unit auxiliary weights: link (i, j)
    /// gets `aux_i * aux_j`, or 1 without them.
    pub fn build(&self, graph: &AdjacencyGraph, auxiliary: Option<&Array1<f64>>) -> Result<SpatialWeightMatrix> {
        self.config.validate()?;
        let n = graph.len();

        if let Some(aux) = auxiliary {
            if aux.len() != n {
                return Err(SpatialError::invalid(Stage::Weights, format!("{} auxiliary weights for {n} units", aux.len())));
            }
            let bad = aux.iter().enumerate()
                .filter(|(_, a)| !a.is_finite() || **a < 0.0)
                .map(|(i, _)| graph.ids()[i].as_str())
                .collect::<Vec<_>>();
            if !bad.is_empty() {
                return Err(SpatialError::invalid(Stage::Weights, format!(
                    "auxiliary weights must be finite and non-negative: {}", bad.join(", "),
                )));
            }
        }

        let isolates = graph.isolates();
        if !isolates.is_empty() {
            let names = isolates.iter().map(|&i| graph.ids()[i].clone()).collect::<Vec<_>>();
            if !self.config.zero_policy {
                return Err(SpatialError::Isolate { stage: Stage::Weights, units: names });
            }
            warn!("[weights::build] zero-policy rows for {} isolate(s): {}", names.len(), names.join(", "));
        }

        let mut raw_row_sums = Vec::with_capacity(n);
        let mut rows = Vec::with_capacity(n);
        for i in 0..n {
            let raw = graph.neighbors(i).iter()
                .map(|&j| {
                    let w = auxiliary.map_or(1.0, |aux| aux[i] * aux[j as usize]);
                    (j, w)
                })
                .collect::<Vec<_>>();
            let sum = raw.iter().map(|&(_, w)| w).sum::<f64>();
            if self.config.style == WeightStyle::RowStandardized && !raw.is_empty() && sum <= 0.0 {
                return Err(SpatialError::invalid(Stage::Weights, format!(
                    "unit '{}' has neighbors but zero total weight", graph.ids()[i],
                )));
            }
            let row = match self.config.style {
                WeightStyle::Binary => raw,
                WeightStyle::RowStandardized => raw.into_iter().map(|(j, w)| (j, w / sum)).collect(),
            };
            raw_row_sums.push(sum);
            rows.push(row);
        }

        let matrix = SpatialWeightMatrix::from_csr(
            graph.ids().to_vec(), rows, self.config.style, self.config.zero_policy, raw_row_sums,
        );
        info!("[weights::build] {:?}: {} units, {} links, S0 = {:.4}", self.config.style, matrix.n(), matrix.nnz(), matrix.s0());
        Ok(matrix)
    }
}

/// Build a weight matrix for `dataset` from `graph` under `config`.
pub fn build_weights(graph: &AdjacencyGraph, dataset: &Dataset, config: &WeightsConfig) -> Result<SpatialWeightMatrix> {
    WeightMatrixFactory::new(config).build_for(graph, dataset)
}
