use std::fmt;

use log::{info, warn};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::config::RegressionConfig;
use crate::data::{Dataset, RegressionSpec};
use crate::error::{Result, SpatialError, Stage};
use crate::linalg::spd_inverse;
use crate::regression::optimize::hessian;
use crate::regression::{fit_lag, fit_ols, fit_sac, Impacts};
use crate::stats::{normal_two_sided, t_two_sided};
use crate::weights::{LogDet, SpatialWeightMatrix};

/// Normal equations with a larger condition number count as singular.
pub(crate) const CONDITION_LIMIT: f64 = 1e12;

/// Same, for the information matrix of the full likelihood.
const INFORMATION_LIMIT: f64 = 1e15;

/// Global model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    Ols,
    /// Spatial lag: y = ρWy + Xβ + ε.
    Lag,
    /// Lag plus spatially autoregressive errors: u = λWu + ε.
    Sac,
}

impl ModelType {
    pub fn stage(&self) -> Stage {
        match self {
            ModelType::Ols => Stage::Ols,
            ModelType::Lag => Stage::Lag,
            ModelType::Sac => Stage::Sac,
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { fmt::Display::fmt(&self.stage(), f) }
}

/// An estimate with its standard error and test against zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Coefficient {
    pub name: String,
    pub estimate: f64,
    pub std_error: f64,
    /// t for OLS, z for the likelihood models.
    pub statistic: f64,
    pub p_value: f64,
}

impl Coefficient {
    pub(crate) fn student(name: impl Into<String>, estimate: f64, std_error: f64, df: f64) -> Self {
        let statistic = estimate / std_error;
        Self { name: name.into(), estimate, std_error, statistic, p_value: t_two_sided(statistic, df) }
    }

    pub(crate) fn normal(name: impl Into<String>, estimate: f64, std_error: f64) -> Self {
        let statistic = estimate / std_error;
        Self { name: name.into(), estimate, std_error, statistic, p_value: normal_two_sided(statistic) }
    }
}

/// Fitted model family with its spatial parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum ModelKind {
    Ols,
    Lag { rho: Coefficient },
    Sac { rho: Coefficient, lambda: Coefficient },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalModelResult {
    pub spec: RegressionSpec,
    pub kind: ModelKind,
    pub coefficients: Vec<Coefficient>,
    /// Unbiased for OLS, maximum likelihood otherwise.
    pub sigma2: f64,
    pub log_likelihood: f64,
    pub aic: f64,
    pub n: usize,
    /// 1 − RSS/TSS; for spatial models the fit includes the ρWy signal.
    pub r_squared: f64,
    pub iterations: usize,
    pub impacts: Option<Impacts>,
}

impl GlobalModelResult {
    pub fn model_type(&self) -> ModelType {
        match self.kind {
            ModelKind::Ols => ModelType::Ols,
            ModelKind::Lag { .. } => ModelType::Lag,
            ModelKind::Sac { .. } => ModelType::Sac,
        }
    }

    pub fn rho(&self) -> Option<f64> {
        match &self.kind {
            ModelKind::Ols => None,
            ModelKind::Lag { rho } | ModelKind::Sac { rho, .. } => Some(rho.estimate),
        }
    }

    pub fn lambda(&self) -> Option<f64> {
        match &self.kind {
            ModelKind::Sac { lambda, .. } => Some(lambda.estimate),
            _ => None,
        }
    }

    pub fn coefficient(&self, name: &str) -> Option<&Coefficient> {
        self.coefficients.iter().find(|c| c.name == name)
    }
}

/// Fit one model family to a dataset.
pub fn fit_model(
    dataset: &Dataset,
    spec: &RegressionSpec,
    w: &SpatialWeightMatrix,
    model: ModelType,
    config: &RegressionConfig,
) -> Result<GlobalModelResult> {
    let stage = model.stage();
    config.validate().map_err(|e| e.at(stage))?;
    if w.ids() != dataset.ids() {
        return Err(SpatialError::invalid(stage, "weight matrix ids do not match the dataset"));
    }
    let design = dataset.design(spec, stage)?;
    if design.n() <= design.p() + 1 {
        return Err(SpatialError::invalid(stage, format!("{} units for {} coefficients", design.n(), design.p())));
    }

    let result = match model {
        ModelType::Ols => {
            let weights = config.weights.as_ref().map(|source| dataset.auxiliary(source, stage)).transpose()?;
            fit_ols(spec, &design, weights.as_ref())?
        }
        ModelType::Lag => fit_lag(spec, &design, w, config)?,
        ModelType::Sac => fit_sac(spec, &design, w, config)?,
    };
    info!(
        "[regression::fit_model] {model} {spec}: logL = {:.4}, AIC = {:.4}{}{}",
        result.log_likelihood,
        result.aic,
        result.rho().map_or(String::new(), |r| format!(", rho = {r:.4}")),
        result.lambda().map_or(String::new(), |l| format!(", lambda = {l:.4}")),
    );
    Ok(result)
}

/// Fit every configured model family; failures are kept per model.
pub fn fit_models(
    dataset: &Dataset,
    spec: &RegressionSpec,
    w: &SpatialWeightMatrix,
    config: &RegressionConfig,
) -> Vec<Result<GlobalModelResult>> {
    config.models.iter()
        .map(|&model| {
            fit_model(dataset, spec, w, model, config).inspect_err(|e| {
                warn!("[regression::fit_models] {model} {spec} failed: {e}");
            })
        })
        .collect()
}

/// Second difference of ln|I − ρW| at `rho`.
pub(crate) fn logdet_curvature(logdet: &LogDet, rho: f64, step: f64) -> f64 {
    (logdet.eval(rho + step) - 2.0 * logdet.eval(rho) + logdet.eval(rho - step)) / (step * step)
}

/// Step for finite differences in a spatial parameter, kept inside its bounds.
pub(crate) fn spatial_step(value: f64, (lower, upper): (f64, f64)) -> f64 {
    1e-4f64.min(0.5 * (value - lower)).min(0.5 * (upper - value))
}

/// Steps for (β, spatial parameters, σ²).
pub(crate) fn likelihood_steps(beta: &Array1<f64>, spatial: &[f64], sigma2: f64) -> Vec<f64> {
    beta.iter().map(|b| 1e-3 * b.abs().max(1.0))
        .chain(spatial.iter().copied())
        .chain(std::iter::once(1e-3 * sigma2))
        .collect()
}

/// Inverse of the observed information −H. `curvature` adds the second
/// derivatives of log-determinant terms, which `smooth` leaves out.
pub(crate) fn asymptotic_covariance(
    smooth: impl Fn(&[f64]) -> f64,
    theta: &[f64],
    steps: &[f64],
    curvature: &[(usize, f64)],
    stage: Stage,
) -> Result<Array2<f64>> {
    let mut h = hessian(smooth, theta, steps);
    for &(i, c) in curvature {
        h[[i, i]] += c;
    }
    if h.iter().any(|v| !v.is_finite()) {
        return Err(SpatialError::singular(stage, "information matrix", f64::INFINITY));
    }
    spd_inverse(&h.mapv(|v| -v), INFORMATION_LIMIT, stage, "information matrix")
}

/// Residual sums of y and Wy on X: (b₀, b_L, e₀, e_L).
pub(crate) struct LagProjection {
    pub b0: Array1<f64>,
    pub bl: Array1<f64>,
    pub e0: Array1<f64>,
    pub el: Array1<f64>,
}

impl LagProjection {
    pub(crate) fn new(x: &Array2<f64>, y: &Array1<f64>, wy: &Array1<f64>, stage: Stage, context: &str) -> Result<Self> {
        let inv = spd_inverse(&x.t().dot(x), CONDITION_LIMIT, stage, context)?;
        let b0 = inv.dot(&x.t().dot(y));
        let bl = inv.dot(&x.t().dot(wy));
        let e0 = y - &x.dot(&b0);
        let el = wy - &x.dot(&bl);
        Ok(Self { b0, bl, e0, el })
    }

    /// σ²(ρ) = ‖e₀ − ρe_L‖² / n.
    pub(crate) fn sigma2(&self, rho: f64) -> f64 {
        let r = &self.e0 - &(&self.el * rho);
        r.dot(&r) / self.e0.len() as f64
    }

    pub(crate) fn beta(&self, rho: f64) -> Array1<f64> { &self.b0 - &(&self.bl * rho) }
}

/// 1 − Σ(y − ŷ)²/Σ(y − ȳ)².
pub(crate) fn r_squared(y: &Array1<f64>, fitted: &Array1<f64>) -> f64 {
    let mean = y.mean().unwrap_or(0.0);
    let rss = (y - fitted).mapv(|v| v * v).sum();
    let tss = y.mapv(|v| (v - mean).powi(2)).sum();
    1.0 - rss / tss
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_follow_kind() {
        let spec = RegressionSpec::new("y", ["x"]).unwrap();
        let rho = Coefficient::normal("rho", 0.5, 0.1);
        let lambda = Coefficient::normal("lambda", -0.2, 0.1);
        let base = GlobalModelResult {
            spec,
            kind: ModelKind::Ols,
            coefficients: vec![Coefficient::student("x", 2.0, 0.5, 10.0)],
            sigma2: 1.0,
            log_likelihood: -10.0,
            aic: 26.0,
            n: 12,
            r_squared: 0.5,
            iterations: 0,
            impacts: None,
        };
        assert_eq!(base.rho(), None);
        assert_eq!(base.lambda(), None);
        assert_eq!(base.model_type(), ModelType::Ols);
        assert_eq!(base.coefficient("x").unwrap().statistic, 4.0);

        let lag = GlobalModelResult { kind: ModelKind::Lag { rho: rho.clone() }, ..base.clone() };
        assert_eq!(lag.rho(), Some(0.5));
        assert_eq!(lag.lambda(), None);

        let sac = GlobalModelResult { kind: ModelKind::Sac { rho, lambda }, ..base };
        assert_eq!(sac.rho(), Some(0.5));
        assert_eq!(sac.lambda(), Some(-0.2));
        assert_eq!(sac.model_type(), ModelType::Sac);
    }

    #[test]
    fn kind_serializes_with_model_tag() {
        let kind = ModelKind::Lag { rho: Coefficient::normal("rho", 0.5, 0.25) };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["model"], "lag");
        assert_eq!(json["rho"]["estimate"], 0.5);
        assert_eq!(json["rho"]["statistic"], 2.0);
        assert_eq!(serde_json::to_value(ModelType::Sac).unwrap(), "sac");
    }
}
