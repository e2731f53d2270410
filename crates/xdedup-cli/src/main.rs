mod cli;
mod cmd;
mod config_gen;
mod format;
mod passphrase;
mod signal;

use clap::Parser;

use xdedup_core::config::{self, XdedupConfig};

use cli::{Cli, Commands};
use config_gen::run_config_generate;

fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // `config` needs no config file
    if let Commands::Config { dest } = &cli.command {
        if let Err(e) = run_config_generate(dest.as_deref()) {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
        return;
    }

    signal::install_signal_handlers();

    let config = match resolve_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = cmd::dispatch(&cli.command, &config) {
        tracing::debug!(command = cli.command.name(), "command failed");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn resolve_config(cli_config: Option<&str>) -> Result<XdedupConfig, Box<dyn std::error::Error>> {
    match config::resolve_config_path(cli_config) {
        Some(source) => {
            tracing::info!("Using config: {source}");
            Ok(config::load_config(source.path())?)
        }
        None => {
            tracing::info!("No config file found, using defaults");
            Ok(XdedupConfig::default())
        }
    }
}
