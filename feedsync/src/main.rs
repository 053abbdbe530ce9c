use clap::{Args, Parser, Subcommand};
use config::{Config, ConfigError, LoggingConfig, MetricsConfig};
use importer::ImportError;
use importer::credentials::{Credentials, CredentialsError};
use metrics_exporter_statsd::StatsdBuilder;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod config;

#[derive(Parser)]
#[command(version, about = "Builds a product feed enriched with availability scores")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Fetch the catalog, score availability and write the feed
    Run(RunArgs),
    /// Load and validate a config file without running
    CheckConfig {
        #[arg(long, default_value = "feedsync.yaml")]
        config: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    #[arg(long, default_value = "feedsync.yaml")]
    config: PathBuf,
    /// Overrides `importer.output.path`
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Credentials(#[from] CredentialsError),
    #[error("{0}")]
    Import(#[from] ImportError),
    #[error("invalid sentry dsn: {0}")]
    SentryDsn(String),
    #[error("could not set up metrics: {0}")]
    Metrics(String),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        CliCommand::Run(args) => run(args),
        CliCommand::CheckConfig { config } => Config::from_file(&config)
            .map(|_| println!("{} is valid", config.display()))
            .map_err(CliError::from),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: RunArgs) -> Result<(), CliError> {
    let mut config = Config::from_file(&args.config)?;
    if let Some(output) = args.output {
        config.importer.output.path = output;
    }

    // Held until the run finishes so pending events are flushed.
    let _sentry = init_logging(&config.common.logging)?;

    if let Some(metrics) = &config.common.metrics {
        init_metrics(metrics)?;
    }

    // Credentials are required up front; nothing is requested without them.
    let credentials = Credentials::from_env()?;

    let summary = importer::run(config.importer, credentials)
        .inspect_err(|e| tracing::error!(error = %e, "Import failed"))?;

    tracing::info!(
        items = summary.items,
        degraded = summary.degraded,
        peak_in_flight = summary.peak_in_flight,
        "Import finished"
    );
    println!("Products have been saved to {}", summary.location);

    Ok(())
}

fn init_logging(logging: &LoggingConfig) -> Result<Option<sentry::ClientInitGuard>, CliError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let guard = match logging.sentry_dsn.as_deref() {
        Some(dsn) => {
            let dsn = dsn
                .parse::<sentry::types::Dsn>()
                .map_err(|e| CliError::SentryDsn(e.to_string()))?;
            Some(sentry::init(sentry::ClientOptions {
                dsn: Some(dsn),
                release: sentry::release_name!(),
                ..Default::default()
            }))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            guard
                .as_ref()
                .map(|_| sentry::integrations::tracing::layer()),
        )
        .init();

    Ok(guard)
}

fn init_metrics(config: &MetricsConfig) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(config.statsd_host.clone(), config.statsd_port)
        .build(Some(&config.prefix))
        .map_err(|e| CliError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|e| CliError::Metrics(e.to_string()))?;

    importer::metrics_defs::describe_all();

    Ok(())
}
