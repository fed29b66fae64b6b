//! Market-data feeder service
//!
//! Periodically observes spot prices on a DEX and feeds them to the oracle
//! contract under the configured gas-fee and retry policy.

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info};

use chain_dispatcher::chain::{NodeClient, Signer};
use chain_dispatcher::metrics::MetricsServer;
use chain_dispatcher::price::DexSource;
use chain_dispatcher::scheduler::Feeder;
use chain_dispatcher::tx::{Broadcaster, FeeCalculator, SequenceTracker};
use chain_dispatcher::{init_logging, shutdown_signal, Settings};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("Starting market-data feeder v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load()?;
    let feeder_config = settings.feeder()?;

    let signer = Signer::from_mnemonic(
        &settings.signing_key_mnemonic(),
        &settings.address_prefix,
        &settings.chain_id,
    )?;
    let address = signer.address().to_owned();
    info!(%address, "Derived signing key");

    let node = NodeClient::connect(&settings.node_grpc_uri).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    if let Some(port) = settings.metrics_port {
        let server = MetricsServer::new(port);
        tokio::spawn(async move {
            if let Err(error) = server.run().await {
                error!(%error, "Metrics server error");
            }
        });
    }

    let broadcaster = Broadcaster::new(
        node.clone(),
        signer,
        SequenceTracker::new(address),
        FeeCalculator::new(settings.fee_config()?, settings.fee_token_denom.clone()),
        settings.admin_contract_address.clone(),
        settings.retry_policy(),
        shutdown_rx.clone(),
    );

    let source = DexSource::new(
        node,
        feeder_config.dex_contract_address.clone(),
        feeder_config.currencies.clone(),
        feeder_config.quote.clone(),
    );

    let mut service = tokio::spawn(Feeder::new(source, broadcaster, feeder_config, shutdown_rx).run());

    tokio::select! {
        result = &mut service => result??,
        () = shutdown_signal() => {
            info!("Shutdown signal received, stopping...");
            let _ = shutdown_tx.send(true);
            service.await??;
        }
    }

    info!("Market-data feeder stopped");

    Ok(())
}
