use log::info;

use crate::config::{BandwidthSearch, GwrConfig};
use crate::data::{Dataset, RegressionSpec};
use crate::error::{Result, Stage};
use crate::gwr::{BandwidthSelector, GwrResult, KernelWeighter, LocalRegressionEngine};

/// Select a bandwidth (unless one is given) and fit the GWR surface.
pub fn fit_gwr(dataset: &Dataset, spec: &RegressionSpec, config: &GwrConfig) -> Result<GwrResult> {
    config.validate()?;
    let design = dataset.design(spec, Stage::Gwr)?;
    let weighter = KernelWeighter::new(dataset.centroids(), config.kernel, config.metric);
    let engine = LocalRegressionEngine::new(&design, dataset.ids(), weighter, config.condition_threshold)?;

    let (bandwidth, selection) = match config.bandwidth {
        BandwidthSearch::Given { bandwidth } => (bandwidth, None),
        _ => {
            let selection = BandwidthSelector::new(&engine, config).select()?;
            (selection.bandwidth, Some(selection))
        }
    };

    let (fits, diagnostics) = engine.fit(bandwidth)?;
    info!("[gwr::fit_gwr] {spec}: bandwidth {bandwidth:?}, AICc = {:.4}", diagnostics.aicc);
    Ok(GwrResult {
        spec: spec.clone(),
        names: design.names.clone(),
        ids: dataset.ids().to_vec(),
        bandwidth,
        selection,
        fits,
        diagnostics,
    })
}

/// One row of the per-unit coefficient table. Failed units carry NaN values
/// and the failure message.
#[derive(Debug, Clone, PartialEq)]
pub struct GwrRow {
    pub id: String,
    pub coefficients: Vec<f64>,
    pub std_errors: Vec<f64>,
    pub local_r2: f64,
    pub leverage: f64,
    pub fitted: f64,
    pub residual: f64,
    pub failure: Option<String>,
}

/// Flat per-unit view of a GWR surface.
#[derive(Debug, Clone, PartialEq)]
pub struct GwrTable {
    pub names: Vec<String>,
    pub rows: Vec<GwrRow>,
}

impl GwrTable {
    pub fn from_result(result: &GwrResult) -> Self {
        let p = result.names.len();
        let rows = result.ids.iter().zip(&result.fits)
            .map(|(id, fit)| match fit {
                Ok(fit) => GwrRow {
                    id: id.clone(),
                    coefficients: fit.coefficients.clone(),
                    std_errors: fit.std_errors.clone(),
                    local_r2: fit.local_r2,
                    leverage: fit.leverage,
                    fitted: fit.fitted,
                    residual: fit.residual,
                    failure: None,
                },
                Err(e) => GwrRow {
                    id: id.clone(),
                    coefficients: vec![f64::NAN; p],
                    std_errors: vec![f64::NAN; p],
                    local_r2: f64::NAN,
                    leverage: f64::NAN,
                    fitted: f64::NAN,
                    residual: f64::NAN,
                    failure: Some(e.to_string()),
                },
            })
            .collect();
        Self { names: result.names.clone(), rows }
    }

    #[inline] pub fn len(&self) -> usize { self.rows.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.rows.is_empty() }

    /// Column headers in output order.
    pub fn headers(&self) -> Vec<String> {
        std::iter::once("id".to_string())
            .chain(self.names.iter().cloned())
            .chain(self.names.iter().map(|n| format!("se_{n}")))
            .chain(["local_r2", "leverage", "fitted", "residual", "failure"].map(String::from))
            .collect()
    }

    /// Values of one coefficient column across units.
    pub fn coefficient(&self, name: &str) -> Option<Vec<f64>> {
        let k = self.names.iter().position(|n| n == name)?;
        Some(self.rows.iter().map(|r| r.coefficients[k]).collect())
    }
}
