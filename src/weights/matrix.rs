use std::sync::OnceLock;

use ahash::AHashMap;
use nalgebra::DMatrix;
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpatialError, Stage};
use crate::weights::Spectrum;

/// How link weights are scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightStyle {
    /// Raw weights as-is.
    Binary,
    /// Each row divided by its raw sum.
    RowStandardized,
}

/// A sparse spatial weight matrix in compressed sparse row format.
///
/// The diagonal is always zero. Rows of isolates are empty. Raw row sums are
/// kept so the pre-standardization weights can be recovered.
#[derive(Debug, Clone)]
pub struct SpatialWeightMatrix {
    ids: Vec<String>,
    offsets: Vec<u32>,
    indices: Vec<u32>,
    values: Vec<f64>,
    style: WeightStyle,
    zero_policy: bool,
    raw_row_sums: Vec<f64>,
    spectrum: OnceLock<Option<Spectrum>>,
}

impl SpatialWeightMatrix {
    /// Assemble from sorted CSR rows. Callers guarantee a zero diagonal and
    /// in-range, strictly increasing column indices per row.
    pub(crate) fn from_csr(
        ids: Vec<String>,
        rows: Vec<Vec<(u32, f64)>>,
        style: WeightStyle,
        zero_policy: bool,
        raw_row_sums: Vec<f64>,
    ) -> Self {
        Self {
            ids,
            offsets: std::iter::once(0u32).chain(
                rows.iter()
                    .map(|v| v.len() as u32)
                    .scan(0u32, |acc, len| {*acc += len; Some(*acc)})
            ).collect::<Vec<u32>>(),
            indices: rows.iter().flatten().map(|&(j, _)| j).collect(),
            values: rows.iter().flatten().map(|&(_, w)| w).collect(),
            style,
            zero_policy,
            raw_row_sums,
            spectrum: OnceLock::new(),
        }
    }

    /// Rebuild a matrix from `(row id, column id, weight)` triples. Missing
    /// raw row sums are taken as link counts for row-standardized matrices and
    /// as row sums for binary ones.
    pub fn from_triples(
        ids: Vec<String>,
        style: WeightStyle,
        zero_policy: bool,
        triples: impl IntoIterator<Item = (String, String, f64)>,
        raw_row_sums: Option<Vec<f64>>,
    ) -> Result<Self> {
        let n = ids.len();
        let mut index = AHashMap::with_capacity(n);
        for (i, id) in ids.iter().enumerate() {
            if index.insert(id.as_str(), i as u32).is_some() {
                return Err(SpatialError::invalid(Stage::Weights, format!("duplicate id '{id}'")));
            }
        }

        let mut rows: Vec<Vec<(u32, f64)>> = vec![Vec::new(); n];
        for (row, col, weight) in triples {
            let (Some(&i), Some(&j)) = (index.get(row.as_str()), index.get(col.as_str())) else {
                return Err(SpatialError::invalid(Stage::Weights, format!("entry ({row}, {col}) references an unknown id")));
            };
            if i == j {
                return Err(SpatialError::invalid(Stage::Weights, format!("non-zero diagonal entry for '{row}'")));
            }
            if !weight.is_finite() {
                return Err(SpatialError::invalid(Stage::Weights, format!("non-finite weight for ({row}, {col})")));
            }
            rows[i as usize].push((j, weight));
        }
        for (i, row) in rows.iter_mut().enumerate() {
            row.sort_unstable_by_key(|&(j, _)| j);
            if row.windows(2).any(|w| w[0].0 == w[1].0) {
                return Err(SpatialError::invalid(Stage::Weights, format!("duplicate entry in row '{}'", ids[i])));
            }
        }

        if !zero_policy {
            let isolates = rows.iter().enumerate()
                .filter(|(_, row)| row.is_empty())
                .map(|(i, _)| ids[i].clone())
                .collect::<Vec<_>>();
            if !isolates.is_empty() {
                return Err(SpatialError::Isolate { stage: Stage::Weights, units: isolates });
            }
        }

        let raw_row_sums = match raw_row_sums {
            Some(sums) if sums.len() != n => {
                return Err(SpatialError::invalid(Stage::Weights, format!("{} raw row sums for {n} units", sums.len())));
            }
            Some(sums) => sums,
            None => rows.iter()
                .map(|row| match style {
                    WeightStyle::Binary => row.iter().map(|&(_, w)| w).sum(),
                    WeightStyle::RowStandardized => row.len() as f64,
                })
                .collect(),
        };

        Ok(Self::from_csr(ids, rows, style, zero_policy, raw_row_sums))
    }

    /// Get the number of units.
    #[inline] pub fn n(&self) -> usize { self.ids.len() }

    /// Get the number of stored links.
    #[inline] pub fn nnz(&self) -> usize { self.indices.len() }

    #[inline] pub fn ids(&self) -> &[String] { &self.ids }

    #[inline] pub fn style(&self) -> WeightStyle { self.style }

    #[inline] pub fn zero_policy(&self) -> bool { self.zero_policy }

    /// Row sums before standardization.
    #[inline] pub fn raw_row_sums(&self) -> &[f64] { &self.raw_row_sums }

    #[inline]
    fn range(&self, i: usize) -> std::ops::Range<usize> {
        self.offsets[i] as usize .. self.offsets[i + 1] as usize
    }

    /// Column indices and weights of row `i`.
    #[inline]
    pub fn row(&self, i: usize) -> (&[u32], &[f64]) {
        let range = self.range(i);
        (&self.indices[range.clone()], &self.values[range])
    }

    /// Iterate `(column, weight)` pairs of row `i`.
    #[inline]
    pub fn entries(&self, i: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.range(i).map(move |v| (self.indices[v] as usize, self.values[v]))
    }

    /// Weight w_ij, zero if absent.
    pub fn weight(&self, i: usize, j: usize) -> f64 {
        let (cols, vals) = self.row(i);
        cols.binary_search(&(j as u32)).map(|k| vals[k]).unwrap_or(0.0)
    }

    #[inline] pub fn row_sum(&self, i: usize) -> f64 { self.row(i).1.iter().sum() }

    #[inline] pub fn is_isolate(&self, i: usize) -> bool { self.range(i).is_empty() }

    pub fn isolates(&self) -> Vec<usize> { (0..self.n()).filter(|&i| self.is_isolate(i)).collect() }

    /// Sum of all weights.
    pub fn s0(&self) -> f64 { self.values.iter().sum() }

    /// ½ Σ_ij (w_ij + w_ji)².
    pub fn s1(&self) -> f64 {
        let mut total = 0.0;
        for i in 0..self.n() {
            for (j, w) in self.entries(i) {
                let (cols, vals) = self.row(j);
                total += match cols.binary_search(&(i as u32)) {
                    Ok(k) => (w + vals[k]).powi(2),
                    // (i, j) and (j, i) both contribute w² when only one side is stored.
                    Err(_) => 2.0 * w * w,
                };
            }
        }
        total / 2.0
    }

    /// Σ_i (row sum_i + column sum_i)².
    pub fn s2(&self) -> f64 {
        let mut col_sums = vec![0.0; self.n()];
        for i in 0..self.n() {
            for (j, w) in self.entries(i) {
                col_sums[j] += w;
            }
        }
        (0..self.n()).map(|i| (self.row_sum(i) + col_sums[i]).powi(2)).sum()
    }

    /// Spatial lag Wx.
    pub fn lag(&self, x: ArrayView1<f64>) -> Array1<f64> {
        Array1::from_iter((0..self.n()).map(|i| self.entries(i).map(|(j, w)| w * x[j]).sum::<f64>()))
    }

    /// Transposed lag Wᵗx.
    pub fn lag_transpose(&self, x: ArrayView1<f64>) -> Array1<f64> {
        let mut out = Array1::zeros(self.n());
        for i in 0..self.n() {
            for (j, w) in self.entries(i) {
                out[j] += w * x[i];
            }
        }
        out
    }

    /// tr(W²) = Σ_ij w_ij w_ji.
    pub fn trace_w2(&self) -> f64 {
        (0..self.n())
            .map(|i| self.entries(i).map(|(j, w)| w * self.weight(j, i)).sum::<f64>())
            .sum()
    }

    /// Iterate `(row id, column id, weight)` for every stored link.
    pub fn triples(&self) -> impl Iterator<Item = (&str, &str, f64)> + '_ {
        (0..self.n()).flat_map(move |i| {
            self.entries(i).map(move |(j, w)| (self.ids[i].as_str(), self.ids[j].as_str(), w))
        })
    }

    /// Dense copy of the matrix.
    pub fn to_dense(&self) -> DMatrix<f64> {
        let mut dense = DMatrix::zeros(self.n(), self.n());
        for i in 0..self.n() {
            for (j, w) in self.entries(i) {
                dense[(i, j)] = w;
            }
        }
        dense
    }

    /// Weights before standardization.
    pub(crate) fn raw_weight(&self, i: usize, w: f64) -> f64 {
        match self.style {
            WeightStyle::Binary => w,
            WeightStyle::RowStandardized => w * self.raw_row_sums[i],
        }
    }

    /// Real eigenvalues of W, computed once, when W is similar to a symmetric
    /// matrix.
    pub fn spectrum(&self) -> Option<&Spectrum> {
        self.spectrum.get_or_init(|| Spectrum::compute(self)).as_ref()
    }
}
