//! Reports which confrontations each model has the variables for.
//!
//! # Usage
//!
//! ```bash
//! ilamb-doctor --model_root MODELS/ --config ilamb.cfg --models CLM50 E3SM
//! ```

use anyhow::Context;
use clap::Parser;
use ilamb::cli::{discover, init_logging, DoctorArgs};
use ilamb::doctor::report;
use ilamb::palette::palette;
use ilamb_core::confrontation::Scoreboard;

fn main() -> anyhow::Result<()> {
    let args = DoctorArgs::parse();
    init_logging();
    tracing::debug!(?args, "parsed arguments");

    let mut models = discover(&args.discovery, &args.model_year)?;
    let colors = palette(models.len());
    for (model, color) in models.iter_mut().zip(colors) {
        model.color = color;
    }

    let mut scoreboard = Scoreboard::from_file(&args.config, &args.build_dir)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    scoreboard.restrict(&args.confrontations);

    for line in report(&models, &scoreboard.confrontations) {
        println!("{}", line.render());
    }
    Ok(())
}
