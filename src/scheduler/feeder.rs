//! Fixed-interval price feeding loop

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::chain::NodeApi;
use crate::config::FeederConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::price::PriceSource;
use crate::tx::batch::{form_batches, BatchLimits, WorkItem};
use crate::tx::sender::Broadcaster;

/// Periodically observes spot prices and feeds them to the oracle contract
pub struct Feeder<N, S> {
    source: S,
    broadcaster: Broadcaster<N>,
    config: FeederConfig,
    shutdown: watch::Receiver<bool>,
}

impl<N, S> Feeder<N, S>
where
    N: NodeApi,
    S: PriceSource,
{
    pub fn new(
        source: S,
        broadcaster: Broadcaster<N>,
        config: FeederConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            source,
            broadcaster,
            config,
            shutdown,
        }
    }

    /// Run until shutdown; returns early only on a fatal error
    pub async fn run(mut self) -> DispatchResult<()> {
        info!(
            source = %self.source.name(),
            currencies = self.config.currencies.len(),
            "Market-data feeder started"
        );

        // Grace period for dependent services to become ready
        if !self.wait(self.config.duration_before_start).await {
            return Ok(());
        }

        let mut ticker = interval(self.config.update_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    match self.feed_cycle().await {
                        Ok(()) => {}
                        Err(DispatchError::Shutdown) => break,
                        Err(error) if error.is_fatal() => return Err(error),
                        Err(error) => error!(%error, "Price feed cycle failed"),
                    }
                }
            }
        }

        info!("Market-data feeder stopped");

        Ok(())
    }

    /// Observe, batch and submit one price set
    async fn feed_cycle(&mut self) -> DispatchResult<()> {
        let prices = self.source.spot_prices().await?;

        if prices.is_empty() {
            warn!("Price source returned no prices; skipping cycle");
            return Ok(());
        }

        if let Some(oldest) = prices.iter().map(|price| price.observed_at).min() {
            debug!(prices = prices.len(), %oldest, "Collected spot price observations");
        }

        let pending: Vec<WorkItem> = prices.into_iter().map(WorkItem::PriceUpdate).collect();

        for batch in form_batches(&pending, &BatchLimits::unbounded()) {
            match self
                .broadcaster
                .submit(batch, self.config.gas_limit_per_price)
                .await
            {
                Ok(outcome) => {
                    info!(
                        hash = %outcome.tx_hash,
                        height = outcome.height,
                        prices = batch.len(),
                        "Fed prices"
                    );

                    crate::metrics::record_prices_fed(batch.len());
                }
                Err(DispatchError::BroadcastTimeout { elapsed_secs }) => {
                    // Ambiguous outcome; superseded by the next cycle's
                    // observations rather than resubmitted
                    warn!(elapsed_secs, prices = batch.len(), "Price feed timed out");

                    crate::metrics::record_timeout();

                    return Ok(());
                }
                Err(error @ DispatchError::FatalDispatch { .. }) => {
                    error!(%error, prices = batch.len(), "Price feed rejected; dropping batch");

                    crate::metrics::record_tx_failed();

                    return Ok(());
                }
                Err(error) => return Err(error),
            }
        }

        Ok(())
    }

    /// Sleep that aborts promptly on shutdown; returns false when shutting
    /// down
    async fn wait(&mut self, duration: Duration) -> bool {
        if duration.is_zero() {
            return true;
        }

        tokio::select! {
            _ = self.shutdown.changed() => false,
            () = sleep(duration) => true,
        }
    }
}
