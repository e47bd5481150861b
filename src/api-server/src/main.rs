//! VoltGate admission server
//!
//! Loads the pipeline configuration, starts the authorization workers and
//! serves the admission API.
//!
//! # Usage
//!
//! ```bash
//! # Defaults (0.0.0.0:8080, built-in pipeline configuration)
//! voltgate-server
//!
//! # Custom configuration file and port
//! voltgate-server --config voltgate.toml --port 9090
//!
//! # Structured logs
//! voltgate-server --json-logs --log-level debug
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use voltgate_api_server::{server::ServerBuilder, state::AppState};
use voltgate_authz::{Pipeline, PipelineConfig};

/// VoltGate charging authorization server
#[derive(Parser, Debug)]
#[command(
    name = "voltgate-server",
    version,
    about = "Asynchronous EV charging authorization server",
    long_about = None
)]
struct Args {
    /// Pipeline configuration file (TOML)
    #[arg(short = 'c', long, env = "VOLTGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Host to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0", env = "VOLTGATE_HOST")]
    host: String,

    /// Port to listen on
    #[arg(short = 'p', long, default_value = "8080", env = "VOLTGATE_PORT")]
    port: u16,

    /// Enable JSON logging format
    #[arg(long, env = "VOLTGATE_JSON_LOGS")]
    json_logs: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info", env = "RUST_LOG")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_tracing(&args)?;

    info!("Starting VoltGate authorization server");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = load_config(args.config.as_ref())?;
    info!(
        queue_capacity = config.queue.max_size,
        workers = config.processor.workers,
        "Pipeline configuration loaded"
    );

    let pipeline = Pipeline::from_config(config).context("Failed to build authorization pipeline")?;
    let state = Arc::new(AppState::new(Arc::new(pipeline)));

    let server = ServerBuilder::new()
        .host(&args.host)
        .port(args.port)
        .state(state)
        .build()?;

    if let Err(e) = server.run().await {
        error!("Server error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    match path {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            PipelineConfig::load(path)
        }
        None => {
            info!("No configuration file given, using defaults");
            let config = PipelineConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

fn init_tracing(args: &Args) -> Result<()> {
    let log_level = args.log_level.parse::<tracing::Level>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', using 'info'", args.log_level);
        tracing::Level::INFO
    });

    let http_level = if log_level <= tracing::Level::DEBUG {
        "debug"
    } else {
        "info"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "voltgate_api_server={},voltgate_server={},voltgate_authz={},tower_http={},axum={}",
            log_level, log_level, log_level, http_level, http_level
        )
        .into()
    });

    if args.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()?;
    }

    Ok(())
}
