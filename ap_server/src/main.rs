//! Wallet funding, payment reconciliation and tournament escrow server.
//!
//! Runs the HTTP API over PostgreSQL when a database URL is configured and
//! over in-memory stores otherwise, with the reconciliation sweep in the
//! background.

use std::net::SocketAddr;

use anyhow::{Context, Error};
use ap_server::{
    api::{self, AppState},
    config::ServerConfig,
    logging, metrics,
};
use arena_pay::{PaymentEngine, Stores, db::Database};
use log::{info, warn};
use pico_args::Arguments;

const HELP: &str = "\
Run the arena_pay wallet and payment server

USAGE:
  ap_server [OPTIONS]

OPTIONS:
  --bind       IP:PORT     Server socket bind address  [default: env SERVER_BIND or 127.0.0.1:8080]
  --db-url     URL         Database connection string  [default: env DATABASE_URL, in-memory when unset]

FLAGS:
  -h, --help               Print help information

ENVIRONMENT:
  SERVER_BIND              Server bind address (e.g., 0.0.0.0:8080)
  DATABASE_URL             PostgreSQL connection string
  JWT_SECRET               Access token verification secret (required)
  CALLBACK_SECRET          Payment callback signing secret
  METRICS_BIND             Prometheus listener address
  WALLET_CURRENCY          Wallet currency code [default: KES]
  PUSH_CALLBACK_URL        Callback address sent to the push provider
  (See .env.example for all configuration options)
";

struct Args {
    bind: Option<SocketAddr>,
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let args = Args {
        bind: pargs.opt_value_from_str("--bind")?,
        database_url: pargs.opt_value_from_str("--db-url")?,
    };

    logging::init();

    let config = ServerConfig::from_env(args.bind, args.database_url)?;
    config.validate()?;

    if let Some(addr) = config.metrics_bind {
        metrics::init_metrics(addr).map_err(Error::msg)?;
        info!("Prometheus metrics listening on {addr}");
    }

    let currency = config.engine.currency.clone();
    let stores = match &config.database {
        Some(db_config) => {
            info!("Connecting to database");
            let db = Database::new(db_config)
                .await
                .context("Failed to connect to database")?;
            db.migrate().await.context("Failed to apply migrations")?;
            info!("Database connected and migrated");
            Stores::postgres(db, &currency)
        }
        None => {
            warn!("DATABASE_URL not set; running on in-memory stores, state is lost on exit");
            Stores::in_memory(&currency)
        }
    };

    if config.security.callback_secret.is_none() {
        warn!("CALLBACK_SECRET not set; payment callbacks are accepted without signature checks");
    }

    // Real provider adapters are wired by deployment; the sandbox stands in here.
    let engine = PaymentEngine::sandbox(stores, config.engine.clone());
    let sweep = engine.spawn_sweep();

    let state = AppState::new(
        engine,
        &config.security.jwt_secret,
        config.security.callback_secret.as_deref(),
    );
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;

    info!(
        "Server is running at http://{}. Press Ctrl+C to stop.",
        config.bind
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down server...");
    sweep.abort();

    Ok(())
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for CTRL+C: {e}");
        std::future::pending::<()>().await;
    }
}
