//! b2-edge-proxy -- signing GET/HEAD proxy in front of Backblaze B2.
//!
//! Configuration is validated before the listener opens: a malformed
//! `B2_ENDPOINT`, an invalid bucket name, or missing credentials stop the
//! process at startup rather than failing each request.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use b2_edge_proxy::config::{Config, LoggingConfig, ProxySettings};
use b2_edge_proxy::upstream::http::HttpUpstream;

/// Command-line arguments for the proxy.
#[derive(Parser, Debug)]
#[command(
    name = "b2-edge-proxy",
    version,
    about = "SigV4-signing GET/HEAD proxy for Backblaze B2"
)]
struct Cli {
    /// Path to an optional YAML configuration file. Environment variables
    /// (`B2_ENDPOINT`, `BUCKET_NAME`, ...) override its values.
    #[arg(short, long)]
    config: Option<String>,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => b2_edge_proxy::config::load_config(path)?,
        None => Config::default(),
    };
    config.apply_env();

    init_tracing(&config.logging);
    if let Some(path) = &cli.config {
        info!("Loaded configuration from {}", path);
    }

    let settings = ProxySettings::from_config(&config)?;
    info!(
        endpoint = %settings.endpoint,
        region = %settings.region,
        bucket_mode = ?settings.bucket_mode,
        allow_list_bucket = settings.allow_list_bucket,
        "Proxy configuration resolved"
    );

    let metrics_enabled = config.observability.metrics;
    if metrics_enabled {
        b2_edge_proxy::metrics::init_metrics()?;
        b2_edge_proxy::metrics::describe_metrics();
    }

    let admin_addr = format!(
        "{}:{}",
        config.observability.admin_host, config.observability.admin_port
    );
    let admin_listener = tokio::net::TcpListener::bind(&admin_addr).await?;
    info!(
        metrics = metrics_enabled,
        "Admin endpoints listening on {}", admin_addr
    );
    let admin = b2_edge_proxy::server::admin_app(metrics_enabled);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(admin_listener, admin).await {
            error!("admin listener failed: {e}");
        }
    });

    let upstream = HttpUpstream::new(Duration::from_secs(config.proxy.upstream_timeout))?;

    let state = Arc::new(b2_edge_proxy::AppState {
        settings,
        upstream: Arc::new(upstream),
    });

    let app = b2_edge_proxy::server::app(state);

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("b2-edge-proxy listening on {}", bind_addr);

    // On SIGTERM/SIGINT stop accepting connections and let in-flight
    // responses drain, bounded by the shutdown timeout.
    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tokio::spawn(async move {
                tokio::time::sleep(shutdown_timeout).await;
                warn!(
                    "In-flight requests still running after {}s, exiting",
                    shutdown_timeout.as_secs()
                );
                std::process::exit(0);
            });
        })
        .await?;

    info!("b2-edge-proxy shut down");

    Ok(())
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the
/// configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
