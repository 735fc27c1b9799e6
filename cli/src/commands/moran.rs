use anyhow::{Context, Result};
use spatialreg::{MoranResult, io, moran_for_variable};
use tracing::info;

use crate::commands::{load_config, load_dataset, load_weights};

pub fn run(_cli: &crate::cli::Cli, args: &crate::cli::MoranArgs) -> Result<()> {
    let config = load_config(&args.input.config)?;
    let dataset = load_dataset(&args.input.geometry, Some(&args.table), &args.input.id_field, args.weight_column.as_deref())?;
    let w = load_weights(&dataset, &config, args.input.weights.as_deref())?;

    let results = args.variables.iter()
        .map(|name| {
            info!("[moran] testing '{name}'");
            moran_for_variable(&dataset, name, &w, &config.moran)
                .with_context(|| format!("[moran] Failed on '{name}'"))
                .map(|result| (name.clone(), result))
        })
        .collect::<Result<Vec<(String, MoranResult)>>>()?;

    println!("{:<24} {:>10} {:>10} {:>10} {:>10}", "variable", "I", "E[I]", "z", "p");
    for (name, result) in &results {
        let z = result.analytic.z_score.map_or("-".to_string(), |z| format!("{z:.4}"));
        let p = result.permutation.as_ref().map(|perm| perm.p_value)
            .or(result.analytic.p_value)
            .map_or("-".to_string(), |p| format!("{p:.4}"));
        println!("{:<24} {:>10.4} {:>10.4} {:>10} {:>10}", name, result.statistic, result.analytic.expectation, z, p);
    }

    if let Some(path) = &args.output {
        let document = results.iter().cloned().collect::<std::collections::BTreeMap<_, _>>();
        io::write_json(&document, path)?;
    }
    Ok(())
}
