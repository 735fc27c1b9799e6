use std::path::PathBuf;

/// Spatial regression CLI (argument schema only)
#[derive(clap::Parser, Debug)]
#[command(name = "spatialreg", version, about, propagate_version = true)]
pub struct Cli {
    /// Increase output verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Build a spatial weight matrix from polygon geometry
    Weights(WeightsArgs),

    /// Test variables for global spatial autocorrelation
    Moran(MoranArgs),

    /// Fit global spatial models and GWR for one or more specifications
    Fit(FitArgs),
}

/// Inputs shared by every command.
#[derive(clap::Args, Debug)]
pub struct InputArgs {
    /// GeoJSON FeatureCollection of unit polygons
    #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
    pub geometry: PathBuf,

    /// Property / column holding the unit id
    #[arg(long, default_value = "id")]
    pub id_field: String,

    /// Analysis configuration (JSON)
    #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// Weight matrix to reuse instead of building one (.json or .swmb)
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    pub weights: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct WeightsArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Entity table (CSV), needed when weights use auxiliary variables
    #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
    pub table: Option<PathBuf>,

    /// Output weight matrix; `.swmb` writes binary CSR, anything else JSON
    #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
    pub output: PathBuf,
}

#[derive(clap::Args, Debug)]
pub struct MoranArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Entity table (CSV)
    #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
    pub table: PathBuf,

    /// Column holding per-unit sampling weights
    #[arg(long)]
    pub weight_column: Option<String>,

    /// Variables to test
    #[arg(long = "variable", required = true)]
    pub variables: Vec<String>,

    /// Write full results as JSON
    #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
    pub output: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct FitArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Entity table (CSV)
    #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
    pub table: PathBuf,

    /// Column holding per-unit sampling weights
    #[arg(long)]
    pub weight_column: Option<String>,

    /// Model specification such as "y ~ a + b" (repeatable)
    #[arg(short, long = "spec", required = true)]
    pub specs: Vec<String>,

    /// Skip the GWR surface
    #[arg(long)]
    pub no_gwr: bool,

    /// Output directory, defaults to "."
    #[arg(short, long, value_hint = clap::ValueHint::DirPath)]
    pub output_dir: Option<PathBuf>,
}
