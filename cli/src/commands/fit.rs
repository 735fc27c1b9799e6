use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use spatialreg::{GwrTable, RegressionSpec, io, run_batch};
use tracing::info;

use crate::commands::{load_config, load_dataset, load_weights};

pub fn run(_cli: &crate::cli::Cli, args: &crate::cli::FitArgs) -> Result<()> {
    let specs = args.specs.iter().map(|s| parse_spec(s)).collect::<Result<Vec<_>>>()?;
    let out_dir = args.output_dir.clone().unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&out_dir)
        .with_context(|| format!("[fit] Failed to create {}", out_dir.display()))?;

    let config = load_config(&args.input.config)?;
    let dataset = load_dataset(&args.input.geometry, Some(&args.table), &args.input.id_field, args.weight_column.as_deref())?;
    let w = load_weights(&dataset, &config, args.input.weights.as_deref())?;

    info!("[fit] fitting {} specification(s) on {} units", specs.len(), dataset.len());
    let gwr = (!args.no_gwr).then_some(&config.gwr);
    let reports = run_batch(&dataset, &specs, &w, &config.regression, gwr);

    for (i, report) in reports.iter().enumerate() {
        let stem = format!("{i:02}_{}", slug(&report.spec));
        for outcome in &report.models {
            if let Ok(result) = &outcome.result {
                let path = out_dir.join(format!("{stem}_{}.json", outcome.model));
                info!("[fit] writing {}", path.display());
                io::write_json(result, &path)?;
            }
        }
        if let Some(Ok(surface)) = &report.gwr {
            let path = out_dir.join(format!("{stem}_gwr.csv"));
            info!("[fit] writing {}", path.display());
            io::write_gwr_table(&GwrTable::from_result(surface), &path)?;
        }
    }

    let summary = out_dir.join("batch.json");
    info!("[fit] writing {}", summary.display());
    io::write_batch_report(&reports, &summary)
}

/// Parse `"y ~ a + b"` into a specification.
pub fn parse_spec(text: &str) -> Result<RegressionSpec> {
    let (response, predictors) = text.split_once('~')
        .ok_or_else(|| anyhow!("[fit] Specification '{text}' has no '~'"))?;
    let predictors = predictors.split('+').map(str::trim).collect::<Vec<_>>();
    RegressionSpec::new(response.trim(), predictors)
        .with_context(|| format!("[fit] Invalid specification '{text}'"))
}

/// File-name-safe form of a specification.
fn slug(spec: &RegressionSpec) -> String {
    std::iter::once(spec.response())
        .chain(spec.predictors().iter().map(String::as_str))
        .map(|name| name.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }).collect::<String>())
        .collect::<Vec<_>>()
        .join("-")
}
