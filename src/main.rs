use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use portico::app::AppContext;
use portico::config::{LoggingConfig, PorticoConfig};
use portico::gateway::ApiRequest;
use portico::ops::register_ops_routes;

/// Dispatch newline-delimited JSON requests through a Portico gateway.
#[derive(Debug, Parser)]
#[command(name = "portico", version, about)]
struct Args {
    /// Configuration file (YAML, TOML or JSON); PORTICO__* env vars override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// File of newline-delimited requests, or `-` for stdin
    #[arg(short, long, default_value = "-")]
    requests: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PorticoConfig::load(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => PorticoConfig::default(),
    };

    init_tracing(&config.logging);

    info!("Starting Portico");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        version = %config.gateway.version,
        limit_per_minute = config.rate_limiting.limit_per_minute,
        failure_threshold = config.circuit_breaker.failure_threshold,
        "Configuration loaded"
    );

    let mut app = AppContext::from_config(config);
    app.install_default_middleware();
    register_ops_routes(&mut app)?;
    info!(routes = app.gateway().route_count(), "Routes registered");

    let processed = if args.requests == "-" {
        run_until_shutdown(&app, tokio::io::stdin()).await?
    } else {
        let file = tokio::fs::File::open(&args.requests)
            .await
            .with_context(|| format!("failed to open {}", args.requests))?;
        run_until_shutdown(&app, file).await?
    };

    info!(processed, "Portico stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    // stdout carries responses, so logs go to stderr
    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn run_until_shutdown<R>(app: &AppContext, input: R) -> anyhow::Result<usize>
where
    R: AsyncRead + Unpin,
{
    tokio::select! {
        result = process_requests(app, input) => result,
        _ = shutdown_signal() => Ok(0),
    }
}

/// Dispatch each line and print each response as one JSON line.
async fn process_requests<R>(app: &AppContext, input: R) -> anyhow::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(input).lines();
    let mut stdout = tokio::io::stdout();
    let mut processed = 0;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request: ApiRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "Skipping malformed request line");
                continue;
            }
        };

        let response = app.handle_request(request).await;
        let mut encoded = serde_json::to_vec(&response)?;
        encoded.push(b'\n');
        stdout.write_all(&encoded).await?;
        stdout.flush().await?;
        processed += 1;
    }

    Ok(processed)
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping");
        }
    }
}
