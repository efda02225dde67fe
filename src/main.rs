//! Pitcher CLI - Offline Audio Effects
//!
//! Command-line interface for the Pitcher render and export pipeline.

use std::process::ExitCode;

use clap::Parser;
use env_logger::Env;
use log::info;

use pitcher::cli::commands::{self, RenderOptions};
use pitcher::cli::{Cli, Commands};
use pitcher::PitcherError;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    info!("Pitcher v{}", env!("CARGO_PKG_VERSION"));

    match handle_command(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            if let Some(pitcher_err) = err.chain().find_map(|e| e.downcast_ref::<PitcherError>()) {
                for suggestion in pitcher_err.recovery_suggestions() {
                    eprintln!("  - {}", suggestion);
                }
            }
            ExitCode::FAILURE
        }
    }
}

fn handle_command(cmd: Commands) -> anyhow::Result<()> {
    match cmd {
        Commands::Render {
            inputs,
            out_dir,
            format,
            bitrate,
            fallback_wav,
            seed,
            effects,
        } => {
            let options = RenderOptions {
                inputs,
                out_dir,
                format,
                bitrate,
                fallback_wav,
                seed,
                effects,
            };
            commands::render(&options).map(|_| ())
        }
        Commands::Bands => commands::bands(),
        Commands::Preset { output, effects } => commands::preset(&output, &effects),
    }
}
