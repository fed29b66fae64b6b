//! Idle-then-poll alarm dispatch loop

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::chain::{self, NodeApi};
use crate::config::DispatcherConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::messages::{DueAlarmsResponse, QueryMsg};
use crate::tx::batch::{form_batches, AlarmKind, BatchLimits, WorkItem};
use crate::tx::sender::Broadcaster;

/// How many groups' worth of due alarms one poll may pull in
const DUE_ALARM_GROUPS_PER_POLL: u32 = 4;

/// Polls the admin contract for due alarms and dispatches them in bounded
/// groups, oldest first
pub struct Dispatcher<N> {
    node: N,
    broadcaster: Broadcaster<N>,
    contract_address: String,
    config: DispatcherConfig,
    shutdown: watch::Receiver<bool>,
}

impl<N> Dispatcher<N>
where
    N: NodeApi,
{
    pub fn new(
        node: N,
        broadcaster: Broadcaster<N>,
        contract_address: String,
        config: DispatcherConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            node,
            broadcaster,
            contract_address,
            config,
            shutdown,
        }
    }

    /// Run until shutdown; returns early only on a fatal error
    pub async fn run(mut self) -> DispatchResult<()> {
        info!("Alarms dispatcher started");

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let mut backlog_remaining = false;

            for kind in [AlarmKind::Price, AlarmKind::Time] {
                match self.dispatch_due(kind).await {
                    Ok(saturated) => backlog_remaining |= saturated,
                    Err(DispatchError::Shutdown) => return Ok(()),
                    Err(error) if error.is_fatal() => return Err(error),
                    Err(error) => {
                        warn!(%error, kind = kind.as_str(), "Alarm dispatch cycle failed")
                    }
                }
            }

            // Keep draining a saturated backlog before idling again
            if !backlog_remaining && !self.wait(self.config.idle_duration).await {
                break;
            }
        }

        info!("Alarms dispatcher stopped");

        Ok(())
    }

    /// Poll one alarm kind and dispatch what is due
    ///
    /// Returns whether the backlog looked saturated, i.e. the contract
    /// answered with as many alarms as were asked for.
    async fn dispatch_due(&mut self, kind: AlarmKind) -> DispatchResult<bool> {
        let batching = self.config.batching(kind);
        let group = batching.max_alarms_group.get() as u32;
        let max_count = group.saturating_mul(DUE_ALARM_GROUPS_PER_POLL);

        let response: DueAlarmsResponse = chain::smart_query(
            &self.node,
            &self.contract_address,
            &due_query(kind, max_count),
        )
        .await?;

        if response.ids.is_empty() {
            return Ok(false);
        }

        debug!(
            kind = kind.as_str(),
            due = response.ids.len(),
            "Due alarms found"
        );

        let pending: Vec<WorkItem> = response
            .ids
            .iter()
            .map(|&id| kind.work_item(id))
            .collect();

        let limits = BatchLimits::new(
            self.config.price_alarms.max_alarms_group,
            self.config.time_alarms.max_alarms_group,
        );

        for batch in form_batches(&pending, &limits) {
            match self
                .broadcaster
                .submit(batch, batching.gas_limit_per_alarm)
                .await
            {
                Ok(outcome) => {
                    info!(
                        kind = kind.as_str(),
                        alarms = batch.len(),
                        hash = %outcome.tx_hash,
                        height = outcome.height,
                        "Dispatched alarms"
                    );

                    crate::metrics::record_alarms_dispatched(kind.as_str(), batch.len());
                }
                Err(DispatchError::BroadcastTimeout { elapsed_secs }) => {
                    // Ambiguous outcome; alarms still due will reappear in
                    // the next poll, so nothing is resubmitted blindly
                    warn!(
                        kind = kind.as_str(),
                        alarms = batch.len(),
                        elapsed_secs,
                        "Alarm dispatch timed out"
                    );

                    crate::metrics::record_timeout();

                    return Ok(false);
                }
                Err(error @ DispatchError::FatalDispatch { .. }) => {
                    error!(
                        kind = kind.as_str(),
                        alarms = batch.len(),
                        %error,
                        "Alarm dispatch rejected; dropping batch"
                    );

                    crate::metrics::record_tx_failed();

                    return Ok(false);
                }
                Err(error) => return Err(error),
            }
        }

        Ok(response.ids.len() as u32 == max_count)
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

fn due_query(kind: AlarmKind, max_count: u32) -> QueryMsg {
    match kind {
        AlarmKind::Price => QueryMsg::DuePriceAlarms { max_count },
        AlarmKind::Time => QueryMsg::DueTimeAlarms { max_count },
    }
}
