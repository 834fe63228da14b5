mod cli;
mod commands;

use std::{process::ExitCode, sync::Arc};

use anyhow::Context;
use bandwatch_config::{Config, ConfigLoad, ConfigLoader, ConfigLoaderOptions};
use bandwatch_core::{
    automation::webdriver::WebDriverLauncher,
    database::{InMemoryMeasurementRepository, MeasurementRepository, PostgresMeasurementRepository},
    measurement::MeasurementOrchestrator,
};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // Step-level driver logs stay visible. Override via RUST_LOG.
                "info,measurement::webdriver=warn,sqlx=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(&cli)?;
    let orchestrator = build_orchestrator(&config).await?;

    let swept = orchestrator
        .initialize()
        .await
        .context("failed to initialise measurement orchestrator")?;
    if swept > 0 {
        warn!(swept, "failed stale measurements left by an earlier process");
    }

    match cli.command {
        Command::Measure(args) => commands::measure(&orchestrator, args).await,
        Command::MeasureIfBreached(args) => {
            commands::measure_if_breached(&orchestrator, &config, args).await
        }
        Command::Status { id } => commands::status(&orchestrator, id).await,
        Command::List { limit } => commands::list(&orchestrator, limit).await,
        Command::Cleanup => commands::cleanup(&orchestrator, swept).await,
        Command::Archive { id } => commands::archive(&orchestrator, id).await,
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let ConfigLoad { config, warnings } = ConfigLoader::with_options(ConfigLoaderOptions {
        config_path: cli.config.clone(),
        env_file: cli.env_file.clone(),
        ..ConfigLoaderOptions::default()
    })
    .load()
    .context("failed to load configuration")?;

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "configuration file in effect");
    }
    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => warn!(message = %warning.message, hint = %hint, "configuration warning"),
            None => warn!(message = %warning.message, "configuration warning"),
        }
    }

    Ok(config)
}

async fn build_orchestrator(config: &Config) -> anyhow::Result<MeasurementOrchestrator> {
    let repo: Arc<dyn MeasurementRepository> = match &config.database.url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(url)
                .await
                .context("failed to connect to PostgreSQL")?;
            bandwatch_core::MIGRATOR
                .run(&pool)
                .await
                .context("database migration failed")?;
            Arc::new(PostgresMeasurementRepository::new(pool))
        }
        None => Arc::new(InMemoryMeasurementRepository::new()),
    };

    let launcher = WebDriverLauncher::new(config.browser.webdriver_url.clone())
        .context("failed to build WebDriver client")?;
    info!(endpoint = %launcher.endpoint(), "using WebDriver endpoint");

    Ok(MeasurementOrchestrator::new(
        repo,
        Arc::new(launcher),
        config.orchestrator_settings(),
    ))
}
