use ndarray::{s, Array1};

use crate::config::RegressionConfig;
use crate::data::{Design, RegressionSpec};
use crate::error::{Result, Stage};
use crate::regression::impacts::compute_impacts;
use crate::regression::model::{asymptotic_covariance, likelihood_steps, logdet_curvature, r_squared, spatial_step, LagProjection};
use crate::regression::optimize::brent;
use crate::regression::{Coefficient, GlobalModelResult, ModelKind};
use crate::weights::{LogDet, SpatialWeightMatrix};

const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Concentrated-likelihood estimate of ρ.
pub(crate) struct LagEstimate {
    pub rho: f64,
    pub iterations: usize,
}

/// Maximize L(ρ) = −n/2 ln σ²(ρ) + ln|I − ρW| over the feasible interval.
pub(crate) fn estimate_rho(
    projection: &LagProjection,
    logdet: &LogDet,
    config: &RegressionConfig,
    stage: Stage,
) -> Result<LagEstimate> {
    let n = projection.e0.len() as f64;
    let (lower, upper) = logdet.bounds();
    let objective = |rho: f64| 0.5 * n * projection.sigma2(rho).ln() - logdet.eval(rho);
    let minimum = brent(objective, lower, upper, &config.optimizer, stage)?;
    Ok(LagEstimate { rho: minimum.x[0], iterations: minimum.iterations })
}

/// Spatial lag model by concentrated maximum likelihood.
pub(crate) fn fit_lag(spec: &RegressionSpec, design: &Design, w: &SpatialWeightMatrix, config: &RegressionConfig) -> Result<GlobalModelResult> {
    let (x, y) = (&design.x, &design.y);
    let (n, p) = (design.n(), design.p());
    let nf = n as f64;
    let wy = w.lag(y.view());
    let projection = LagProjection::new(x, y, &wy, Stage::Lag, &spec.to_string())?;
    let logdet = LogDet::new(w);
    let estimate = estimate_rho(&projection, &logdet, config, Stage::Lag)?;

    let rho = estimate.rho;
    let beta = projection.beta(rho);
    let sigma2 = projection.sigma2(rho);
    let log_likelihood = -0.5 * nf * (LN_2PI + sigma2.ln()) - 0.5 * nf + logdet.eval(rho);

    // θ = (β, ρ, σ²); the log-determinant enters through the curvature term.
    let smooth = |theta: &[f64]| {
        let b = Array1::from(theta[..p].to_vec());
        let (r, s2) = (theta[p], theta[p + 1]);
        let e = y - &(&wy * r) - x.dot(&b);
        -0.5 * nf * (LN_2PI + s2.ln()) - e.dot(&e) / (2.0 * s2)
    };
    let rho_step = spatial_step(rho, logdet.bounds());
    let theta = beta.iter().copied().chain([rho, sigma2]).collect::<Vec<_>>();
    let covariance = asymptotic_covariance(
        smooth,
        &theta,
        &likelihood_steps(&beta, &[rho_step], sigma2),
        &[(p, logdet_curvature(&logdet, rho, rho_step))],
        Stage::Lag,
    )?;

    let se = |k: usize| covariance[[k, k]].sqrt();
    let coefficients = design.names.iter().enumerate()
        .map(|(k, name)| Coefficient::normal(name, beta[k], se(k)))
        .collect::<Vec<_>>();
    let fitted = &wy * rho + x.dot(&beta);

    let impacts = compute_impacts(
        &design.names,
        &beta,
        covariance.slice(s![..=p, ..=p]),
        rho,
        logdet.bounds(),
        w,
        &config.impacts,
    )?;

    Ok(GlobalModelResult {
        spec: spec.clone(),
        kind: ModelKind::Lag { rho: Coefficient::normal("rho", rho, se(p)) },
        coefficients,
        sigma2,
        log_likelihood,
        aic: -2.0 * log_likelihood + 2.0 * (p + 2) as f64,
        n,
        r_squared: r_squared(y, &fitted),
        iterations: estimate.iterations,
        impacts: Some(impacts),
    })
}
