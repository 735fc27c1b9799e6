//! JSON triples format for spatial weight matrices.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::weights::{SpatialWeightMatrix, WeightStyle};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightEntry {
    pub row: String,
    pub col: String,
    pub weight: f64,
}

/// Serialized weight matrix. Raw row sums are optional on input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightsDocument {
    pub style: WeightStyle,
    pub zero_policy: bool,
    pub ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_row_sums: Option<Vec<f64>>,
    pub entries: Vec<WeightEntry>,
}

impl WeightsDocument {
    pub fn from_matrix(w: &SpatialWeightMatrix) -> Self {
        Self {
            style: w.style(),
            zero_policy: w.zero_policy(),
            ids: w.ids().to_vec(),
            raw_row_sums: Some(w.raw_row_sums().to_vec()),
            entries: w.triples()
                .map(|(row, col, weight)| WeightEntry { row: row.to_string(), col: col.to_string(), weight })
                .collect(),
        }
    }

    /// Validate and rebuild the matrix.
    pub fn into_matrix(self) -> Result<SpatialWeightMatrix> {
        let triples = self.entries.into_iter().map(|e| (e.row, e.col, e.weight));
        SpatialWeightMatrix::from_triples(self.ids, self.style, self.zero_policy, triples, self.raw_row_sums)
            .context("[io::weights] Invalid weight matrix")
    }
}

pub fn write_weights_json(w: &SpatialWeightMatrix, path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("[io::weights] Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &WeightsDocument::from_matrix(w))
        .with_context(|| format!("[io::weights] Failed to write {}", path.display()))
}

pub fn read_weights_json(path: &Path) -> Result<SpatialWeightMatrix> {
    let file = File::open(path)
        .with_context(|| format!("[io::weights] Failed to open {}", path.display()))?;
    let document: WeightsDocument = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("[io::weights] Failed to parse {}", path.display()))?;
    document.into_matrix()
}

/// Read weights in either format, chosen by extension (`.swmb` is binary).
pub fn read_weights(path: &Path) -> Result<SpatialWeightMatrix> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("swmb") => super::csr::read_weights_file(path),
        _ => read_weights_json(path),
    }
}

/// Write weights in either format, chosen by extension (`.swmb` is binary).
pub fn write_weights(w: &SpatialWeightMatrix, path: &Path) -> Result<()> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("swmb") => super::csr::write_weights_file(w, path),
        _ => write_weights_json(w, path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_shape() {
        let json = r#"{
            "style": "binary",
            "zero_policy": false,
            "ids": ["a", "b"],
            "entries": [{"row": "a", "col": "b", "weight": 2.0}, {"row": "b", "col": "a", "weight": 2.0}]
        }"#;
        let document: WeightsDocument = serde_json::from_str(json).unwrap();
        let w = document.into_matrix().unwrap();
        assert_eq!(w.weight(0, 1), 2.0);
        assert_eq!(w.raw_row_sums(), &[2.0, 2.0]);

        let value = serde_json::to_value(WeightsDocument::from_matrix(&w)).unwrap();
        assert_eq!(value["entries"][0]["row"], "a");
        assert_eq!(value["style"], "binary");
    }

    #[test]
    fn diagonal_entries_are_rejected() {
        let json = r#"{"style": "binary", "zero_policy": true, "ids": ["a"], "entries": [{"row": "a", "col": "a", "weight": 1.0}]}"#;
        let document: WeightsDocument = serde_json::from_str(json).unwrap();
        assert!(document.into_matrix().is_err());
    }
}
