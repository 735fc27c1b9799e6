pub mod fit;
pub mod moran;
pub mod weights;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use spatialreg::{
    AnalysisConfig, Dataset, SpatialUnit, SpatialWeightMatrix, build_graph, build_weights,
    io,
};
use tracing::{Level, info};

/// Route library logs and CLI progress to stderr: 0 → warn, 1 → info, 2+ → debug.
pub fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    let init = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
    if let Err(e) = init {
        eprintln!("[logging] failed to install subscriber: {e}");
    }
}

pub fn load_config(path: &Path) -> Result<AnalysisConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("[config] Failed to read {}", path.display()))?;
    let config: AnalysisConfig = serde_json::from_str(&text)
        .with_context(|| format!("[config] Failed to parse {}", path.display()))?;
    config.validate().context("[config] Invalid configuration")?;
    Ok(config)
}

/// Geometry joined with an optional entity table.
pub fn load_dataset(geometry: &Path, table: Option<&Path>, id_field: &str, weight_column: Option<&str>) -> Result<Dataset> {
    info!("[load] reading geometry from {}", geometry.display());
    let features = io::read_geojson(geometry, id_field)?;
    match table {
        Some(path) => {
            info!("[load] reading table from {}", path.display());
            let table = io::read_table(path, id_field)?;
            io::join_dataset(features, &table, weight_column)
        }
        None => {
            let units = features.into_iter().map(|f| SpatialUnit::new(f.id, f.geometry)).collect();
            Dataset::new(units).context("[load] Failed to build dataset")
        }
    }
}

/// Reuse a stored weight matrix when given, otherwise build one from the geometry.
pub fn load_weights(dataset: &Dataset, config: &AnalysisConfig, stored: Option<&Path>) -> Result<SpatialWeightMatrix> {
    if let Some(path) = stored {
        info!("[weights] reading stored matrix from {}", path.display());
        let w = io::read_weights(path)?;
        anyhow::ensure!(w.ids() == dataset.ids(), "[weights] Stored matrix units do not match the geometry");
        return Ok(w);
    }
    let (graph, summary) = build_graph(dataset.geometries(), &config.graph)?;
    info!(
        "[weights] {} units, {} links, mean {:.2} neighbors, {} isolate(s)",
        summary.n_units, summary.n_links, summary.mean, summary.isolates.len(),
    );
    Ok(build_weights(&graph, dataset, &config.weights)?)
}

