//! Plumbing shared by the command-line tools.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Args, Parser};
use ilamb_core::{discover_models, DiscoveryOptions, ModelOptions, ModelResult};
use regex::Regex;
use tracing_subscriber::EnvFilter;

/// Options selecting which models to load.
#[derive(Args, Debug, Clone)]
pub struct DiscoveryArgs {
    /// Directory whose subdirectories each hold one model's output
    #[arg(long = "model_root", default_value = "./")]
    pub model_root: PathBuf,

    /// Only load these models
    #[arg(long, num_args = 1..)]
    pub models: Vec<String>,

    /// Only index files whose name contains this string
    #[arg(long, default_value = "")]
    pub filter: String,

    /// Only index files whose name matches this pattern
    #[arg(long)]
    pub regex: Option<String>,

    /// Suppress progress output
    #[arg(short, long)]
    pub quiet: bool,
}

/// Arguments of `ilamb-mean`.
#[derive(Parser, Debug)]
#[command(name = "ilamb-mean")]
#[command(about = "Compute multi-model means of model output on a common grid")]
pub struct MeanArgs {
    #[command(flatten)]
    pub discovery: DiscoveryArgs,

    /// Directory the mean files are written to
    #[arg(long = "output_dir", default_value = "./")]
    pub output_dir: PathBuf,

    /// Variables to average (defaults to a standard benchmarking set)
    #[arg(long, num_args = 1..)]
    pub variables: Vec<String>,

    /// Models already share one grid; average the raw arrays
    #[arg(short = 'g', long = "same_grid")]
    pub same_grid: bool,

    /// Resolution of the target grid in degrees
    #[arg(short, long, default_value_t = 1.0)]
    pub res: f64,
}

/// Arguments of `ilamb-doctor`.
#[derive(Parser, Debug)]
#[command(name = "ilamb-doctor")]
#[command(about = "Report which confrontation variables each model provides")]
pub struct DoctorArgs {
    #[command(flatten)]
    pub discovery: DiscoveryArgs,

    /// Confrontation configuration file
    #[arg(long)]
    pub config: PathBuf,

    /// Map model year Y0 onto year YF
    #[arg(long = "model_year", num_args = 1..)]
    pub model_year: Vec<i32>,

    /// Only report these confrontations
    #[arg(long, num_args = 1..)]
    pub confrontations: Vec<String>,

    /// Directory confrontation results are built into
    #[arg(long = "build_dir", default_value = "./_build")]
    pub build_dir: PathBuf,
}

/// Installs the log formatter. `RUST_LOG` overrides the default of `warn`.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    // Fails only when a subscriber is already installed, which is kept.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Discovers the models under `args.model_root`.
///
/// # Errors
///
/// Fails when the root cannot be read, the regex is invalid, or no model
/// is found.
pub fn discover(args: &DiscoveryArgs, model_year: &[i32]) -> anyhow::Result<Vec<ModelResult>> {
    let regex = args
        .regex
        .as_deref()
        .map(Regex::new)
        .transpose()
        .context("invalid --regex")?;
    let options = DiscoveryOptions {
        models: args.models.clone(),
        model: ModelOptions {
            filter: args.filter.clone(),
            regex,
            model_year: model_year.to_vec(),
        },
    };

    let models = discover_models(&args.model_root, &options)
        .with_context(|| format!("failed to load models from {}", args.model_root.display()))?;
    if models.is_empty() {
        bail!("No models found in {}", args.model_root.display());
    }
    if !args.quiet {
        for model in &models {
            println!("Found model: {}", model.name);
        }
    }
    Ok(models)
}
