use std::path::PathBuf;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use clientgate::config::{GateConfig, LoggingConfig};
use clientgate::ratelimit::{Admission, LimitExceeded, RateLimiter};

/// Replay client identifiers through a per-client rate limiter.
///
/// Reads one client identifier per line and prints `<client>\tallow` or
/// `<client>\tdeny` for each.
#[derive(Parser, Debug)]
#[command(name = "clientgate", version, about)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Requests allowed per client per window
    #[arg(long)]
    limit: Option<u64>,

    /// Window length in seconds
    #[arg(long)]
    window_secs: Option<u64>,

    /// Read client identifiers from this file instead of stdin
    #[arg(short, long)]
    input: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = GateConfig::load(args.config.as_deref())?;
    if let Some(limit) = args.limit {
        config.limiter.allowed_per_window = limit;
    }
    if let Some(window_secs) = args.window_secs {
        config.limiter.window_secs = window_secs;
    }

    init_tracing(&config.logging);

    info!("Starting clientgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &args.config {
        info!(path = %path.display(), "Configuration loaded from file");
    }

    let limiter_config = config
        .limiter
        .to_builder()
        .on_limit_exceeded(|e: &LimitExceeded| {
            warn!(
                client_id = %e.client_id,
                count = e.count,
                limit = e.limit,
                retry_after = ?e.retry_after,
                "Client is being rate limited"
            );
        })
        .build()?;
    let limiter = RateLimiter::new(limiter_config)?;

    let input: Box<dyn AsyncRead + Unpin + Send> = match args.input {
        Some(path) => Box::new(tokio::fs::File::open(path).await?),
        None => Box::new(tokio::io::stdin()),
    };

    tokio::select! {
        result = replay(&limiter, input) => result?,
        _ = shutdown_signal() => {}
    }

    limiter.shutdown();
    info!("clientgate stopped");
    Ok(())
}

/// Run every client identifier in `input` through the limiter.
async fn replay<R: AsyncRead + Unpin>(limiter: &RateLimiter, input: R) -> anyhow::Result<()> {
    let mut lines = BufReader::new(input).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let client_id = line.trim();
        if client_id.is_empty() {
            continue;
        }

        let verdict = match limiter.guard(client_id, || async {}).await {
            Admission::Admitted(()) => "allow",
            Admission::Denied => "deny",
        };
        stdout
            .write_all(format!("{}\t{}\n", client_id, verdict).as_bytes())
            .await?;
    }

    stdout.flush().await?;
    Ok(())
}

/// Install the tracing subscriber. Logs go to stderr so stdout only carries
/// verdicts.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
