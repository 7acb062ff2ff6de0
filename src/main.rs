//! modcache - operator CLI
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use modcache::cli::{Cli, Commands};
use modcache::config::ConfigManager;
use modcache::error::ModCacheResult;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> ModCacheResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    init_logging(cli.verbose, &config.general.log_format);

    match cli.command {
        Commands::Inspect(args) => modcache::cli::commands::inspect(args, &config).await,
        Commands::Config(args) => {
            modcache::cli::commands::config(args, &config, &config_manager).await
        }
    }
}

/// 0 = warn, 1 = info, 2+ = debug; `RUST_LOG` overrides when set
fn init_logging(verbose: u8, log_format: &str) {
    let default = match verbose {
        0 => "modcache=warn",
        1 => "modcache=info",
        _ => "modcache=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if log_format == "json" {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}
