//! aigate -- AI request gateway.
//!
//! Application entry point. Wires together:
//!   - Configuration loading
//!   - Database initialization (credit ledger + usage store)
//!   - Provider registration and the gateway facade
//!   - HTTP server
//!   - Graceful shutdown on SIGTERM / SIGINT, draining the usage writer

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use aigate::AppState;
use aigate::api;
use aigate::config::Config;
use aigate::credits::SqliteCreditLedger;
use aigate::db::Database;
use aigate::gateway::Gateway;
use aigate::usage::SqliteUsageStore;

// ---------------------------------------------------------------------------
// CLI argument parsing
// ---------------------------------------------------------------------------

struct CliArgs {
    config_path: Option<PathBuf>,
}

fn parse_args() -> CliArgs {
    let mut args = std::env::args().skip(1);
    let mut config_path = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                if let Some(path) = args.next() {
                    config_path = Some(PathBuf::from(path));
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("aigate {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                eprintln!("Run with --help for usage information.");
                std::process::exit(1);
            }
        }
    }

    CliArgs { config_path }
}

fn print_usage() {
    println!(
        "\
aigate {version} -- AI request gateway

USAGE:
    aigate [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file [default: aigate.toml]
    -h, --help             Print this help message
    -V, --version          Print version information

ENVIRONMENT:
    RUST_LOG               Override log level (e.g. RUST_LOG=debug)
    AIGATE_CONFIG          Alternative to --config flag
    AIGATE_*               Override individual settings (see config docs)
",
        version = env!("CARGO_PKG_VERSION")
    );
}

/// `--config` wins over `AIGATE_CONFIG`, which wins over the default.
fn resolve_config_path(cli: Option<PathBuf>, env: Option<String>) -> PathBuf {
    cli.or_else(|| env.filter(|v| !v.is_empty()).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("aigate.toml"))
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = parse_args();
    let config_path = resolve_config_path(cli.config_path, std::env::var("AIGATE_CONFIG").ok());

    let config = Config::load(&config_path)?;
    init_tracing(&config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        overrides = config.env_overrides.all().len(),
        "Starting aigate"
    );

    let db = Database::open(&config.database.path)?;
    tracing::info!(path = %config.database.path.display(), "Database opened");

    let ledger = Arc::new(SqliteCreditLedger::new(db.clone()));
    let usage_store = Arc::new(SqliteUsageStore::new(db));
    let gateway = Arc::new(Gateway::from_config(&config, ledger, usage_store.clone()));

    if gateway.selector().providers().is_empty() {
        tracing::warn!("No providers configured; every AI request will fail with no provider available");
    }
    if config.low_cost_mode {
        tracing::warn!("Low-cost mode is ON: AI endpoints return fallback content");
    }

    let state = AppState {
        config: Arc::new(config.clone()),
        gateway: Arc::clone(&gateway),
        usage_store: Some(usage_store),
    };
    let app = build_app(state);

    let listen_addr = config.listen_addr();
    let listener = TcpListener::bind(&listen_addr).await?;
    tracing::info!(addr = %listen_addr, "Listening");

    println!();
    println!("  aigate v{} is running", env!("CARGO_PKG_VERSION"));
    println!("  API:     http://{listen_addr}/v1/");
    println!("  Health:  http://{listen_addr}/health");
    println!();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down gracefully");
    match Arc::try_unwrap(gateway) {
        Ok(gateway) => gateway.shutdown().await,
        Err(_) => tracing::warn!("Gateway still shared at shutdown; pending usage may not be flushed"),
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Router assembly
// ---------------------------------------------------------------------------

/// Build the application router with all middleware layers.
fn build_app(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config);

    // X-Request-ID: generated when absent, echoed on the response.
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let trace = TraceLayer::new_for_http();

    api::build_api_router()
        .layer(propagate_id)
        .layer(request_id)
        .layer(trace)
        .layer(cors)
        .with_state(state)
}

/// Build the CORS layer from config.
fn build_cors_layer(config: &Config) -> CorsLayer {
    if config.server.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .server
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

// ---------------------------------------------------------------------------
// Tracing initialization
// ---------------------------------------------------------------------------

fn init_tracing(config: &Config) {
    // RUST_LOG takes precedence over the config file.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.logging.level;
        EnvFilter::new(format!("aigate={level},tower_http={level},warn"))
    });

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

/// Wait for a shutdown signal (SIGTERM or SIGINT / Ctrl+C).
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
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C)");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM");
        }
    }
}
