use anyhow::Result;
use spatialreg::io;
use tracing::info;

use crate::commands::{load_config, load_dataset, load_weights};

pub fn run(_cli: &crate::cli::Cli, args: &crate::cli::WeightsArgs) -> Result<()> {
    let config = load_config(&args.input.config)?;
    let dataset = load_dataset(&args.input.geometry, args.table.as_deref(), &args.input.id_field, None)?;
    let w = load_weights(&dataset, &config, args.input.weights.as_deref())?;

    info!("[weights] writing {} links to {}", w.nnz(), args.output.display());
    io::write_weights(&w, &args.output)
}
