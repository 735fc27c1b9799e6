mod cli;
mod commands;

use cli::{Cli, Commands};
use commands::{fit, moran, weights};

pub fn run() -> anyhow::Result<()> {
    use clap::Parser;

    let cli = Cli::parse();
    commands::init_logging(cli.verbose);
    match &cli.command {
        Commands::Weights(args) => weights::run(&cli, args),
        Commands::Moran(args) => moran::run(&cli, args),
        Commands::Fit(args) => fit::run(&cli, args),
    }
}

fn main() -> anyhow::Result<()> { run() }
