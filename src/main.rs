use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufRead, BufReader};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tollgate::config::TollgateConfig;
use tollgate::replay::{build_rate_limiting, replay_until};

/// Replay a request log through the Tollgate rate limiter.
#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Read requests from this file instead of stdin
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    info!("Starting Tollgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = TollgateConfig::from_file(&args.config)?;
    info!(limits = config.limits.len(), "Configuration loaded");

    let limiter = build_rate_limiting(&config)?;

    let input: Box<dyn AsyncBufRead + Unpin + Send> = match &args.input {
        Some(path) => Box::new(BufReader::new(tokio::fs::File::open(path).await?)),
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };
    let mut stdout = tokio::io::stdout();

    match replay_until(&limiter, input, &mut stdout, shutdown_signal()).await? {
        Some(summary) => info!(
            admitted = summary.admitted,
            rejected = summary.rejected,
            records = limiter.store().len(),
            "Replay finished"
        ),
        None => info!(records = limiter.store().len(), "Replay interrupted"),
    }

    info!("Tollgate stopped");
    Ok(())
}

/// Logs go to stderr so stdout only carries decisions.
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
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
            info!("Received Ctrl+C, stopping replay");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping replay");
        }
    }
}
