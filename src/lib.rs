//! Transaction dispatch engine for CosmWasm oracle and alarm contracts
//!
//! Shared core of two services: the market-data feeder, which periodically
//! feeds observed spot prices to an oracle contract, and the alarms
//! dispatcher, which polls for due alarms and dispatches them in bounded
//! groups. Both sign with a single mnemonic-derived account and submit
//! serialized transactions over one gRPC endpoint, with exact rational fee
//! computation and wall-clock-bounded retries.

pub mod chain;
pub mod config;
pub mod error;
pub mod messages;
pub mod metrics;
pub mod price;
pub mod scheduler;
pub mod tx;

pub use config::Settings;
pub use error::{DispatchError, DispatchResult};

/// Initialize tracing for a service binary
pub fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,chain_dispatcher=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}

/// Resolve once a shutdown signal (SIGINT or SIGTERM) arrives
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
