use log::warn;
use nalgebra::{DMatrix, Schur, SymmetricEigen, LU};

use crate::weights::{SpatialWeightMatrix, WeightStyle};

/// Relative margin keeping ρ strictly inside its feasible interval.
const BOUND_MARGIN: f64 = 1e-6;

/// Tolerance for deciding whether raw weights are symmetric.
const SYMMETRY_TOL: f64 = 1e-10;

/// Imaginary part below which a Schur eigenvalue counts as real.
const REAL_TOL: f64 = 1e-9;

/// Eigenvalues smaller than this in magnitude do not limit ρ.
const EIGEN_FLOOR: f64 = 1e-9;

const SCHUR_MAX_ITER: usize = 10_000;

/// Real eigenvalues of a weight matrix, sorted ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    eigenvalues: Vec<f64>,
    /// a_i with 1ᵗ(I − ρW)⁻¹1 = Σ_i a_i / (1 − ρλ_i).
    sum_weights: Vec<f64>,
}

impl Spectrum {
    /// Eigenvalues of W when its raw weights are symmetric. W = D⁻¹R with R
    /// symmetric is similar to D^-½ R D^-½, whose entries are
    /// w_ij · sqrt(r_i / r_j).
    pub(crate) fn compute(w: &SpatialWeightMatrix) -> Option<Self> {
        let n = w.n();
        for i in 0..n {
            for (j, wij) in w.entries(i) {
                let back = w.raw_weight(j, w.weight(j, i));
                if (w.raw_weight(i, wij) - back).abs() > SYMMETRY_TOL * (1.0 + back.abs()) {
                    return None;
                }
            }
        }

        // W = D^-½ S D^½; isolates have empty rows and columns so any positive
        // scale works for them.
        let scale = w.raw_row_sums().iter()
            .map(|&r| match w.style() {
                WeightStyle::RowStandardized if r > 0.0 => r.sqrt(),
                _ => 1.0,
            })
            .collect::<Vec<_>>();
        let mut sym = DMatrix::zeros(n, n);
        for i in 0..n {
            for (j, wij) in w.entries(i) {
                sym[(i, j)] = wij * scale[i] / scale[j];
            }
        }

        let eigen = SymmetricEigen::new(sym);
        let mut pairs = eigen.eigenvalues.iter().enumerate()
            .map(|(k, &lambda)| {
                let q = eigen.eigenvectors.column(k);
                let left = q.iter().zip(&scale).map(|(v, s)| v / s).sum::<f64>();
                let right = q.iter().zip(&scale).map(|(v, s)| v * s).sum::<f64>();
                (lambda, left * right)
            })
            .collect::<Vec<_>>();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (eigenvalues, sum_weights) = pairs.into_iter().unzip();
        Some(Self { eigenvalues, sum_weights })
    }

    #[inline] pub fn eigenvalues(&self) -> &[f64] { &self.eigenvalues }

    #[inline] pub fn min(&self) -> f64 { self.eigenvalues.first().copied().unwrap_or(0.0) }

    #[inline] pub fn max(&self) -> f64 { self.eigenvalues.last().copied().unwrap_or(0.0) }

    /// tr((I − ρW)⁻¹).
    pub fn inverse_trace(&self, rho: f64) -> f64 {
        self.eigenvalues.iter().map(|&lambda| 1.0 / (1.0 - rho * lambda)).sum()
    }

    /// 1ᵗ(I − ρW)⁻¹1.
    pub fn inverse_sum(&self, rho: f64) -> f64 {
        self.eigenvalues.iter().zip(&self.sum_weights).map(|(&lambda, a)| a / (1.0 - rho * lambda)).sum()
    }
}

/// Evaluates ln|I − ρW|, from eigenvalues when W has a real spectrum and by
/// dense LU factorization otherwise.
#[derive(Debug, Clone)]
pub enum LogDet {
    Eigen(Vec<f64>),
    Dense { matrix: DMatrix<f64>, bounds: (f64, f64) },
}

impl LogDet {
    pub fn new(w: &SpatialWeightMatrix) -> Self {
        match w.spectrum() {
            Some(spectrum) => LogDet::Eigen(spectrum.eigenvalues().to_vec()),
            None => LogDet::dense(w.to_dense()),
        }
    }

    /// Dense evaluator for a general W. Complex eigenvalues come in conjugate
    /// pairs with |1 − ρλ|² > 0, so only the real ones limit ρ.
    pub fn dense(matrix: DMatrix<f64>) -> Self {
        let bounds = match Schur::try_new(matrix.clone(), f64::EPSILON, SCHUR_MAX_ITER) {
            Some(schur) => {
                let real = schur.complex_eigenvalues().iter()
                    .filter(|z| z.im.abs() <= REAL_TOL * (1.0 + z.re.abs()))
                    .map(|z| z.re)
                    .collect::<Vec<_>>();
                let lo = real.iter().copied().fold(0.0, f64::min);
                let hi = real.iter().copied().fold(0.0, f64::max);
                feasible_interval(lo, hi)
            }
            None => {
                warn!("[weights::spectrum] Schur decomposition did not converge; using ρ in (-1, 1)");
                feasible_interval(0.0, 0.0)
            }
        };
        LogDet::Dense { matrix, bounds }
    }

    /// ln|I − ρW|; negative infinity where I − ρW is singular or ρ lies
    /// outside the region where the determinant stays positive.
    pub fn eval(&self, rho: f64) -> f64 {
        match self {
            LogDet::Eigen(values) => values.iter()
                .map(|&lambda| 1.0 - rho * lambda)
                .try_fold(0.0, |acc, v| (v > 0.0).then(|| acc + v.ln()))
                .unwrap_or(f64::NEG_INFINITY),
            LogDet::Dense { matrix, .. } => {
                let n = matrix.nrows();
                let lu = LU::new(DMatrix::identity(n, n) - matrix * rho);
                let mut sign = lu.p().determinant::<f64>();
                let mut sum = 0.0;
                for &d in lu.u().diagonal().iter() {
                    if d == 0.0 {
                        return f64::NEG_INFINITY;
                    }
                    sign *= d.signum();
                    sum += d.abs().ln();
                }
                if sign > 0.0 { sum } else { f64::NEG_INFINITY }
            }
        }
    }

    /// Open interval of ρ for which I − ρW is non-singular, shrunk slightly:
    /// (1/λ_min, 1/λ_max) over the real eigenvalues, with ±1 standing in on a
    /// side that has no eigenvalue of that sign.
    pub fn bounds(&self) -> (f64, f64) {
        match self {
            LogDet::Eigen(values) => feasible_interval(
                values.first().copied().unwrap_or(0.0),
                values.last().copied().unwrap_or(0.0),
            ),
            LogDet::Dense { bounds, .. } => *bounds,
        }
    }
}

fn feasible_interval(lo: f64, hi: f64) -> (f64, f64) {
    let shrink = 1.0 - BOUND_MARGIN;
    let lower = if lo < -EIGEN_FLOOR { 1.0 / lo } else { -1.0 };
    let upper = if hi > EIGEN_FLOOR { 1.0 / hi } else { 1.0 };
    (lower * shrink, upper * shrink)
}
