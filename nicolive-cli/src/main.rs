mod cli;
mod config;
mod error;
mod output;
mod relay;

use crate::{
    cli::Args,
    config::AppConfig,
    error::{AppError, Result},
    output::OutputManager,
    relay::Relay,
};
use clap::Parser;
#[cfg(feature = "colored-output")]
use colored::*;
use nicolive::{NicoliveApi, SessionRegistry};
use std::{io::IsTerminal, process, sync::Arc, time::Duration};
use tracing::{Level, error, info};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        #[cfg(feature = "colored-output")]
        {
            eprintln!("{} {}", "Error:".red().bold(), e);
        }
        #[cfg(not(feature = "colored-output"))]
        {
            eprintln!("Error: {}", e);
        }
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = AppConfig::load(args.config.as_deref())?;
    init_logging(args.verbose, args.quiet, config.log_filter.as_deref())?;

    let channels = config.select_channels(&args.channels)?;
    if channels.is_empty() {
        let hint = AppConfig::default_path()
            .map(|path| format!(" (looked in {})", path.display()))
            .unwrap_or_default();
        return Err(AppError::InvalidInput(format!(
            "No channels configured{}",
            hint
        )));
    }

    let directory = Arc::new(NicoliveApi::new(config.api.clone())?);
    let registry = Arc::new(SessionRegistry::new(
        channels,
        directory,
        config.api.user_agent.clone(),
        config.feed,
    ));
    info!(channels = ?registry.channel_ids(), "Starting relay");

    let output = OutputManager::new(args.output, std::io::stdout().is_terminal());
    let stats_interval = (args.stats_interval > 0).then(|| Duration::from_secs(args.stats_interval));
    let relay = Relay::new(registry.clone(), config.reconnect, output, stats_interval);

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Received Ctrl-C, shutting down");
        }
        _ = relay.run() => info!("All channels stopped"),
    }

    registry.shutdown().await;
    Ok(())
}

/// Logs go to stderr; stdout carries the relayed comments.
fn init_logging(verbose: bool, quiet: bool, directives: Option<&str>) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else if let Some(directives) = directives {
        EnvFilter::try_new(directives)
            .map_err(|e| AppError::InvalidInput(format!("Invalid log_filter: {}", e)))?
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    let subscriber = tracing_subscriber::registry().with(filter);

    subscriber
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(verbose)
                .with_writer(std::io::stderr),
        )
        .init();
    Ok(())
}
