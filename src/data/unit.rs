use std::collections::BTreeMap;

use geo::{Coord, MultiPolygon};

/// One geographic unit: polygon boundary, optional centroid, attribute
/// values and an optional sampling weight.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialUnit {
    pub id: String,
    pub geometry: MultiPolygon<f64>,
    pub centroid: Option<Coord<f64>>,
    pub values: BTreeMap<String, f64>,
    pub weight: Option<f64>,
}

impl SpatialUnit {
    pub fn new(id: impl Into<String>, geometry: MultiPolygon<f64>) -> Self {
        Self { id: id.into(), geometry, centroid: None, values: BTreeMap::new(), weight: None }
    }

    pub fn with_centroid(mut self, centroid: Coord<f64>) -> Self {
        self.centroid = Some(centroid);
        self
    }

    pub fn with_value(mut self, name: impl Into<String>, value: f64) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }
}
