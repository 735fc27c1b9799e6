use std::collections::BTreeSet;
use std::sync::Arc;

use ahash::AHashMap;
use geo::Coord;
use ndarray::{s, Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::data::{Design, RegressionSpec, SpatialUnit};
use crate::error::{Result, SpatialError, Stage};
use crate::geom::Geometries;

/// Where per-unit auxiliary weights come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuxiliaryWeights {
    /// The sampling weight attached to each unit.
    Sampling,
    /// A named dataset variable.
    Variable(String),
}

impl AuxiliaryWeights {
    fn name(&self) -> &str {
        match self {
            AuxiliaryWeights::Sampling => "weight",
            AuxiliaryWeights::Variable(name) => name,
        }
    }
}

/// Immutable snapshot of units, geometries and attribute values.
///
/// Cloning is cheap. Values are stored column-wise in a units × variables
/// array with NaN marking a value that is absent for a unit; missing values
/// only become an error when a fit reads them.
#[derive(Debug, Clone)]
pub struct Dataset {
    geometries: Arc<Geometries>,
    index: Arc<AHashMap<String, usize>>,
    weights: Arc<Vec<Option<f64>>>,
    variables: Arc<Vec<String>>,
    values: Arc<Array2<f64>>,
}

impl Dataset {
    /// Build a dataset from units. Ids must be unique.
    pub fn new(units: Vec<SpatialUnit>) -> Result<Self> {
        let mut index = AHashMap::with_capacity(units.len());
        let mut duplicates = Vec::new();
        for (i, unit) in units.iter().enumerate() {
            if index.insert(unit.id.clone(), i).is_some() {
                duplicates.push(unit.id.clone());
            }
        }
        if !duplicates.is_empty() {
            return Err(SpatialError::invalid(Stage::Data, format!("duplicate unit ids: {}", duplicates.join(", "))));
        }

        let variables = units.iter()
            .flat_map(|unit| unit.values.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>();

        let mut values = Array2::from_elem((units.len(), variables.len()), f64::NAN);
        for (i, unit) in units.iter().enumerate() {
            for (j, name) in variables.iter().enumerate() {
                if let Some(&v) = unit.values.get(name) {
                    values[[i, j]] = v;
                }
            }
        }

        let weights = units.iter().map(|unit| unit.weight).collect();
        let (ids, shapes, centroids) = units.into_iter()
            .map(|unit| (unit.id, unit.geometry, unit.centroid))
            .fold((Vec::new(), Vec::new(), Vec::new()), |(mut ids, mut shapes, mut centroids), (id, shape, c)| {
                ids.push(id);
                shapes.push(shape);
                centroids.push(c);
                (ids, shapes, centroids)
            });
        let geometries = Geometries::new(ids, shapes, centroids).map_err(|e| e.at(Stage::Data))?;

        Ok(Self {
            geometries: Arc::new(geometries),
            index: Arc::new(index),
            weights: Arc::new(weights),
            variables: Arc::new(variables),
            values: Arc::new(values),
        })
    }

    #[inline] pub fn len(&self) -> usize { self.geometries.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.geometries.is_empty() }

    #[inline] pub fn ids(&self) -> &[String] { self.geometries.ids() }

    #[inline] pub fn index_of(&self, id: &str) -> Option<usize> { self.index.get(id).copied() }

    #[inline] pub fn geometries(&self) -> &Geometries { &self.geometries }

    #[inline] pub fn centroids(&self) -> &[Coord<f64>] { self.geometries.centroids() }

    /// Sampling weights attached to the units, if any.
    #[inline] pub fn weights(&self) -> &[Option<f64>] { &self.weights }

    /// Variable names, sorted.
    #[inline] pub fn variables(&self) -> &[String] { &self.variables }

    /// Raw column for a variable (NaN where absent), if the variable exists.
    pub fn variable(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        let j = self.variables.iter().position(|v| v == name)?;
        Some(self.values.column(j))
    }

    /// Return a new snapshot with `name` set to `values`, replacing any
    /// existing column. The receiver is left untouched.
    pub fn with_variable(&self, name: impl Into<String>, values: Vec<f64>) -> Result<Self> {
        let name = name.into();
        if values.len() != self.len() {
            return Err(SpatialError::invalid(Stage::Data, format!(
                "variable '{name}' has {} values for {} units", values.len(), self.len(),
            )));
        }
        let column = Array1::from(values);

        let mut variables = self.variables.as_ref().clone();
        let table = match variables.iter().position(|v| *v == name) {
            Some(j) => {
                let mut table = self.values.as_ref().clone();
                table.column_mut(j).assign(&column);
                table
            }
            None => {
                let at = variables.partition_point(|v| *v < name);
                variables.insert(at, name);
                let mut table = Array2::from_elem((self.len(), variables.len()), f64::NAN);
                table.slice_mut(s![.., ..at]).assign(&self.values.slice(s![.., ..at]));
                table.column_mut(at).assign(&column);
                table.slice_mut(s![.., at + 1..]).assign(&self.values.slice(s![.., at..]));
                table
            }
        };

        Ok(Self {
            geometries: Arc::clone(&self.geometries),
            index: Arc::clone(&self.index),
            weights: Arc::clone(&self.weights),
            variables: Arc::new(variables),
            values: Arc::new(table),
        })
    }

    /// A fully observed column. Absent variables and NaN entries raise
    /// `MissingData`; an absent variable reports an empty unit list.
    pub fn column(&self, name: &str, stage: Stage) -> Result<Array1<f64>> {
        let column = self.variable(name).ok_or_else(|| SpatialError::MissingData {
            stage,
            variable: name.to_string(),
            units: Vec::new(),
        })?;
        let missing = column.iter().enumerate()
            .filter(|(_, v)| v.is_nan())
            .map(|(i, _)| self.ids()[i].clone())
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(SpatialError::MissingData { stage, variable: name.to_string(), units: missing });
        }
        Ok(column.to_owned())
    }

    /// Per-unit auxiliary weights from the chosen source, none missing.
    pub fn auxiliary(&self, source: &AuxiliaryWeights, stage: Stage) -> Result<Array1<f64>> {
        match source {
            AuxiliaryWeights::Variable(name) => self.column(name, stage),
            AuxiliaryWeights::Sampling => {
                let missing = self.weights.iter().enumerate()
                    .filter(|(_, w)| w.is_none_or(f64::is_nan))
                    .map(|(i, _)| self.ids()[i].clone())
                    .collect::<Vec<_>>();
                if !missing.is_empty() {
                    return Err(SpatialError::MissingData { stage, variable: source.name().to_string(), units: missing });
                }
                Ok(self.weights.iter().map(|w| w.unwrap_or(f64::NAN)).collect())
            }
        }
    }

    /// Assemble the design matrix for a spec: intercept column then predictors.
    /// Fails on the first variable that is absent or has missing values.
    pub fn design(&self, spec: &RegressionSpec, stage: Stage) -> Result<Design> {
        let y = self.column(spec.response(), stage)?;
        let mut x = Array2::ones((self.len(), spec.predictors().len() + 1));
        for (j, name) in spec.predictors().iter().enumerate() {
            x.column_mut(j + 1).assign(&self.column(name, stage)?);
        }
        Ok(Design { x, y, names: spec.coefficient_names() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, MultiPolygon};

    fn unit(id: &str, x: f64) -> SpatialUnit {
        SpatialUnit::new(id, MultiPolygon(vec![polygon![
            (x: x, y: 0.0), (x: x + 1.0, y: 0.0), (x: x + 1.0, y: 1.0), (x: x, y: 1.0),
        ]]))
    }

    fn dataset() -> Dataset {
        Dataset::new(vec![
            unit("a", 0.0).with_value("y", 1.0).with_value("x", 2.0).with_weight(1.0),
            unit("b", 1.0).with_value("y", 3.0).with_value("x", 5.0),
            unit("c", 2.0).with_value("y", 4.0),
        ]).unwrap()
    }

    #[test]
    fn absent_values_are_nan_until_used() {
        let ds = dataset();
        assert_eq!(ds.variables(), &["x".to_string(), "y".to_string()]);
        assert!(ds.variable("x").unwrap()[2].is_nan());
        assert_eq!(ds.index_of("b"), Some(1));

        let spec = RegressionSpec::new("y", ["x"]).unwrap();
        match ds.design(&spec, Stage::Ols) {
            Err(SpatialError::MissingData { stage, variable, units }) => {
                assert_eq!(stage, Stage::Ols);
                assert_eq!(variable, "x");
                assert_eq!(units, vec!["c"]);
            }
            other => panic!("expected missing data, got {other:?}"),
        }
    }

    #[test]
    fn unknown_variable_reports_absent() {
        let spec = RegressionSpec::new("y", ["z"]).unwrap();
        match dataset().design(&spec, Stage::Gwr) {
            Err(SpatialError::MissingData { variable, units, .. }) => {
                assert_eq!(variable, "z");
                assert!(units.is_empty());
            }
            other => panic!("expected missing data, got {other:?}"),
        }
    }

    #[test]
    fn with_variable_returns_a_new_snapshot() {
        let ds = dataset();
        let filled = ds.with_variable("x", vec![2.0, 5.0, 7.0]).unwrap();
        let added = filled.with_variable("w", vec![1.0, 1.0, 1.0]).unwrap();

        assert!(ds.variable("x").unwrap()[2].is_nan());
        assert_eq!(filled.variable("x").unwrap()[2], 7.0);
        assert_eq!(added.variables(), &["w".to_string(), "x".to_string(), "y".to_string()]);
        assert_eq!(added.variable("y").unwrap().to_vec(), vec![1.0, 3.0, 4.0]);

        let design = added.design(&RegressionSpec::new("y", ["x"]).unwrap(), Stage::Ols).unwrap();
        assert_eq!(design.names, vec!["(Intercept)", "x"]);
        assert_eq!(design.x.column(0).to_vec(), vec![1.0; 3]);
        assert_eq!(design.x.column(1).to_vec(), vec![2.0, 5.0, 7.0]);

        assert!(ds.with_variable("x", vec![1.0]).is_err());
    }

    #[test]
    fn sampling_weights_must_be_present() {
        let ds = dataset();
        match ds.auxiliary(&AuxiliaryWeights::Sampling, Stage::Ols) {
            Err(SpatialError::MissingData { units, .. }) => assert_eq!(units, vec!["b", "c"]),
            other => panic!("expected missing data, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        assert!(Dataset::new(vec![unit("a", 0.0), unit("a", 1.0)]).is_err());
    }
}
