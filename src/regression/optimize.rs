//! Bounded derivative-free minimizers and a finite-difference Hessian.

use log::debug;
use ndarray::Array2;

use crate::config::OptimizerConfig;
use crate::error::{Result, SpatialError, Stage};

/// 1 − 1/φ.
const GOLDEN: f64 = 0.381_966_011_250_105_1;

/// Absolute floor on the Brent bracket tolerance.
const ABS_TOL: f64 = 1e-10;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Minimum {
    pub x: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
}

#[inline]
fn finite_or_inf(v: f64) -> f64 { if v.is_nan() { f64::INFINITY } else { v } }

/// Brent's method on `[lower, upper]`. Infeasible points should return +∞.
pub(crate) fn brent(
    mut f: impl FnMut(f64) -> f64,
    lower: f64,
    upper: f64,
    options: &OptimizerConfig,
    stage: Stage,
) -> Result<Minimum> {
    let mut f = |x: f64| finite_or_inf(f(x));
    let (mut a, mut b) = (lower, upper);
    let mut x = a + GOLDEN * (b - a);
    let (mut w, mut v) = (x, x);
    let mut fx = f(x);
    let (mut fw, mut fv) = (fx, fx);
    let (mut d, mut e) = (0.0f64, 0.0f64);

    for iteration in 1..=options.max_iterations {
        let m = 0.5 * (a + b);
        let tol1 = options.tolerance * x.abs() + ABS_TOL;
        let tol2 = 2.0 * tol1;
        if (x - m).abs() <= tol2 - 0.5 * (b - a) {
            debug!("[regression::brent] x = {x:.8}, f = {fx:.8} after {iteration} iterations");
            return Ok(Minimum { x: vec![x], value: fx, iterations: iteration });
        }

        let mut golden = true;
        if e.abs() > tol1 {
            let r = (x - w) * (fx - fv);
            let mut q = (x - v) * (fx - fw);
            let mut p = (x - v) * q - (x - w) * r;
            q = 2.0 * (q - r);
            if q > 0.0 { p = -p } else { q = -q }
            if p.abs() < (0.5 * q * e).abs() && p > q * (a - x) && p < q * (b - x) {
                e = d;
                d = p / q;
                let u = x + d;
                if u - a < tol2 || b - u < tol2 {
                    d = tol1.copysign(m - x);
                }
                golden = false;
            }
        }
        if golden {
            e = if x >= m { a - x } else { b - x };
            d = GOLDEN * e;
        }

        let u = if d.abs() >= tol1 { x + d } else { x + tol1.copysign(d) };
        let fu = f(u);
        if fu <= fx {
            if u >= x { a = x } else { b = x }
            (v, fv) = (w, fw);
            (w, fw) = (x, fx);
            (x, fx) = (u, fu);
        } else {
            if u < x { a = u } else { b = u }
            if fu <= fw || w == x {
                (v, fv) = (w, fw);
                (w, fw) = (u, fu);
            } else if fu <= fv || v == x || v == w {
                (v, fv) = (u, fu);
            }
        }
    }
    Err(SpatialError::convergence(stage, format!("Brent search on [{lower:.6}, {upper:.6}]"), options.max_iterations))
}

/// Nelder–Mead simplex. The initial simplex is `start` plus one vertex per
/// coordinate offset by `step`; infeasible points should return +∞.
pub(crate) fn nelder_mead(
    mut f: impl FnMut(&[f64]) -> f64,
    start: &[f64],
    step: &[f64],
    options: &OptimizerConfig,
    stage: Stage,
) -> Result<Minimum> {
    let dim = start.len();
    let mut f = |x: &[f64]| finite_or_inf(f(x));
    let mut simplex = std::iter::once(start.to_vec())
        .chain((0..dim).map(|k| {
            let mut vertex = start.to_vec();
            vertex[k] += step[k];
            vertex
        }))
        .map(|x| { let fx = f(&x); (x, fx) })
        .collect::<Vec<_>>();

    let along = |from: &[f64], to: &[f64], t: f64| from.iter().zip(to).map(|(a, b)| a + t * (b - a)).collect::<Vec<_>>();

    for iteration in 1..=options.max_iterations {
        simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
        let (best, worst) = (simplex[0].1, simplex[dim].1);
        let diameter = simplex[1..].iter()
            .map(|(x, _)| x.iter().zip(&simplex[0].0).map(|(a, b)| (a - b).abs()).fold(0.0, f64::max))
            .fold(0.0, f64::max);
        if (worst - best).abs() <= options.tolerance * (1.0 + best.abs()) && diameter <= options.tolerance.sqrt() {
            debug!("[regression::nelder_mead] f = {best:.8} at {:?} after {iteration} iterations", simplex[0].0);
            let (x, value) = simplex.swap_remove(0);
            return Ok(Minimum { x, value, iterations: iteration });
        }

        let centroid = (0..dim)
            .map(|k| simplex[..dim].iter().map(|(x, _)| x[k]).sum::<f64>() / dim as f64)
            .collect::<Vec<_>>();
        let worst_x = simplex[dim].0.clone();

        let reflected = along(&centroid, &worst_x, -1.0);
        let fr = f(&reflected);
        if fr < best {
            let expanded = along(&centroid, &worst_x, -2.0);
            let fe = f(&expanded);
            simplex[dim] = if fe < fr { (expanded, fe) } else { (reflected, fr) };
        } else if fr < simplex[dim - 1].1 {
            simplex[dim] = (reflected, fr);
        } else {
            let (contracted, fc) = if fr < worst {
                let c = along(&centroid, &reflected, 0.5);
                let fc = f(&c);
                (c, fc)
            } else {
                let c = along(&centroid, &worst_x, 0.5);
                let fc = f(&c);
                (c, fc)
            };
            if fc < fr.min(worst) {
                simplex[dim] = (contracted, fc);
            } else {
                let anchor = simplex[0].0.clone();
                for vertex in simplex.iter_mut().skip(1) {
                    let shrunk = along(&anchor, &vertex.0, 0.5);
                    let fs = f(&shrunk);
                    *vertex = (shrunk, fs);
                }
            }
        }
    }
    Err(SpatialError::convergence(stage, format!("Nelder-Mead from {start:?}"), options.max_iterations))
}

/// Central-difference Hessian of `f` at `theta` with per-coordinate steps.
pub(crate) fn hessian(f: impl Fn(&[f64]) -> f64, theta: &[f64], steps: &[f64]) -> Array2<f64> {
    let k = theta.len();
    let at = |offsets: &[(usize, f64)]| {
        let mut x = theta.to_vec();
        for &(i, h) in offsets {
            x[i] += h;
        }
        f(&x)
    };
    let f0 = f(theta);
    let mut h = Array2::zeros((k, k));
    for i in 0..k {
        let hi = steps[i];
        h[[i, i]] = (at(&[(i, hi)]) - 2.0 * f0 + at(&[(i, -hi)])) / (hi * hi);
        for j in 0..i {
            let hj = steps[j];
            let value = (at(&[(i, hi), (j, hj)]) - at(&[(i, hi), (j, -hj)])
                - at(&[(i, -hi), (j, hj)]) + at(&[(i, -hi), (j, -hj)])) / (4.0 * hi * hj);
            h[[i, j]] = value;
            h[[j, i]] = value;
        }
    }
    h
}
