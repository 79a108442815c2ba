// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: MIT
mod cli;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use skein_runtime::build_runtime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // reqwest's rustls backend needs a process-wide crypto provider when
    // more than one is compiled in.
    let _ = rustls::crypto::ring::default_provider().install_default();

    match &cli.command {
        Some(Commands::ShowConfig) => {
            let config = skein_config::load(cli.config.as_deref())?;
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
            Ok(())
        }
        Some(Commands::Flush {
            project_id,
            session_id,
        }) => {
            let config = skein_config::load(cli.config.as_deref())?;
            let runtime = build_runtime(config).await?;
            let result = runtime.flush_session(*project_id, *session_id).await;
            println!(
                "{}",
                serde_json::to_string(&result).context("encoding flush result")?
            );
            std::process::exit(result.status);
        }
        Some(Commands::Run) | None => run_worker(&cli).await,
    }
}

async fn run_worker(cli: &Cli) -> anyhow::Result<()> {
    let config = skein_config::load(cli.config.as_deref())?;
    let runtime = build_runtime(config).await?;
    runtime.start()?;
    info!("worker running; press ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");
    runtime.shutdown().await;
    Ok(())
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
