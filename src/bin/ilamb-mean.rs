//! Multi-model mean of model output variables.
//!
//! # Usage
//!
//! ```bash
//! ilamb-mean --model_root MODELS/ --output_dir MEAN/ --variables gpp tas --res 0.5
//! ```

use std::fs;

use anyhow::Context;
use clap::Parser;
use ilamb::cli::{discover, init_logging, MeanArgs};
use ilamb::mean::{compute_means, MeanMode, Regridder, DEFAULT_VARIABLES};

fn main() -> anyhow::Result<()> {
    let args = MeanArgs::parse();
    init_logging();
    tracing::debug!(?args, "parsed arguments");

    let models = discover(&args.discovery, &[])?;
    let variables: Vec<String> = if args.variables.is_empty() {
        DEFAULT_VARIABLES.iter().map(|v| v.to_string()).collect()
    } else {
        args.variables.clone()
    };

    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("Failed to create {}", args.output_dir.display()))?;

    let mode = if args.same_grid {
        MeanMode::SameGrid
    } else {
        MeanMode::Regrid(Regridder::new(args.res))
    };
    let quiet = args.discovery.quiet;
    let written = compute_means(&models, &variables, &args.output_dir, &mode, |variable| {
        if !quiet {
            println!("Averaging {variable}");
        }
    })?;

    if !quiet {
        for path in &written {
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}
