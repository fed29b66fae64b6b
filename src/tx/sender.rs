//! Transaction broadcaster with retry logic and a bounded submission deadline
//!
//! Drives one batch at a time through sign → broadcast → inclusion, retrying
//! transient failures and recovering from sequence mismatches. The account's
//! single in-flight submission invariant is structural: `submit` holds
//! `&mut self` until the attempt reaches a terminal state.

use std::time::Duration;

use cosmrs::tx::Body;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::chain::{BroadcastResponse, NodeApi, Signer};
use crate::error::{DispatchError, DispatchResult};
use crate::tx::batch::Batch;
use crate::tx::fee::FeeCalculator;
use crate::tx::sequence::SequenceTracker;

/// ABCI error code the node reports on an account sequence mismatch
const SEQUENCE_MISMATCH_CODE: u32 = 32;

/// How often an accepted transaction is polled for inclusion
const INCLUSION_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Gas ceiling for one transaction; an aggregate above this cannot fit a
/// block on any supported chain and indicates misconfigured batching limits
const MAX_AGGREGATE_GAS: u64 = 100_000_000;

/// Pacing knobs shared by all submissions of a process
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Settle delay before the first broadcast of a batch
    pub broadcast_delay: Duration,
    /// Wait between consecutive attempts
    pub retry_delay: Duration,
    /// Wall-clock bound on one batch's whole submission
    pub timeout: Duration,
}

/// Terminal outcome of an included transaction
#[derive(Debug, Clone)]
pub struct TxOutcome {
    pub tx_hash: String,
    pub height: i64,
    pub gas_wanted: i64,
    pub gas_used: i64,
}

/// Bookkeeping for the one in-flight submission
#[derive(Debug)]
struct SubmissionAttempt {
    sequence: u64,
    attempt: u32,
    started_at: Instant,
}

/// Signs and submits batches, one at a time, for a single account
pub struct Broadcaster<N> {
    node: N,
    signer: Signer,
    sequence: SequenceTracker,
    fees: FeeCalculator,
    contract_address: String,
    policy: RetryPolicy,
    shutdown: watch::Receiver<bool>,
}

impl<N: NodeApi> Broadcaster<N> {
    pub fn new(
        node: N,
        signer: Signer,
        sequence: SequenceTracker,
        fees: FeeCalculator,
        contract_address: String,
        policy: RetryPolicy,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            node,
            signer,
            sequence,
            fees,
            contract_address,
            policy,
            shutdown,
        }
    }

    /// Submit one batch as one transaction
    ///
    /// Terminal outcomes: `Ok` once the transaction is observed on chain,
    /// `BroadcastTimeout` when the deadline expires with the outcome unknown,
    /// `FatalDispatch` on deterministic rejection, `Shutdown` when the
    /// process is stopping. Transient node failures and sequence mismatches
    /// never surface; they are retried within the deadline.
    pub async fn submit(&mut self, batch: Batch<'_>, gas_per_item: u64) -> DispatchResult<TxOutcome> {
        let aggregate_gas = gas_per_item
            .checked_mul(batch.len() as u64)
            .ok_or(DispatchError::Overflow {
                operation: "aggregate gas limit",
            })?;

        if aggregate_gas > MAX_AGGREGATE_GAS {
            return Err(DispatchError::Configuration(format!(
                "Aggregate gas limit {aggregate_gas} exceeds the block gas ceiling"
            )));
        }

        let body = self
            .signer
            .execute_body(&self.contract_address, &batch.to_execute_msg())?;

        // Let recently changed on-chain state settle before acting on it
        self.wait(self.policy.broadcast_delay).await?;

        let deadline = Instant::now() + self.policy.timeout;
        let gas_estimate = self.estimate_gas(&body, aggregate_gas).await?;

        let mut attempt = SubmissionAttempt {
            sequence: 0,
            attempt: 0,
            started_at: Instant::now(),
        };

        loop {
            attempt.attempt += 1;

            match self.attempt_broadcast(&body, gas_estimate, &mut attempt).await {
                Ok(response) if response.code == 0 => {
                    self.sequence.confirm();

                    info!(
                        hash = %response.tx_hash,
                        kind = batch.kind().as_str(),
                        items = batch.len(),
                        attempt = attempt.attempt,
                        "Transaction accepted into mempool"
                    );

                    let outcome = self.await_inclusion(&response.tx_hash, deadline).await?;

                    crate::metrics::record_tx_submitted();
                    crate::metrics::record_submit_latency(attempt.started_at.elapsed().as_secs_f64());

                    return Ok(outcome);
                }
                Ok(response) if response.code == SEQUENCE_MISMATCH_CODE => {
                    warn!(
                        sequence = attempt.sequence,
                        log = %response.raw_log,
                        "Account sequence mismatch; re-fetching from node"
                    );

                    self.sequence.mark_stale();
                    crate::metrics::record_sequence_refetch();
                }
                Ok(response) => {
                    error!(
                        code = response.code,
                        log = %response.raw_log,
                        "Transaction rejected by node"
                    );

                    return Err(DispatchError::FatalDispatch {
                        code: response.code,
                        log: response.raw_log,
                    });
                }
                Err(error) if error.is_retryable() => {
                    warn!(
                        %error,
                        attempt = attempt.attempt,
                        "Transient broadcast failure; will retry"
                    );
                }
                Err(error) => return Err(error),
            }

            crate::metrics::record_retry();

            if Instant::now() + self.policy.retry_delay >= deadline {
                return Err(DispatchError::BroadcastTimeout {
                    elapsed_secs: attempt.started_at.elapsed().as_secs(),
                });
            }

            self.wait(self.policy.retry_delay).await?;
        }
    }

    /// One sign-and-broadcast round; reads the sequence immediately before
    /// signing
    async fn attempt_broadcast(
        &mut self,
        body: &Body,
        gas_estimate: u64,
        attempt: &mut SubmissionAttempt,
    ) -> DispatchResult<BroadcastResponse> {
        let account = self.sequence.next(&self.node).await?;
        attempt.sequence = account.sequence;

        let fee = self.fees.compute(gas_estimate)?;

        let raw = self.signer.sign(
            body,
            self.fees.to_tx_fee(fee)?,
            account.account_number,
            account.sequence,
        )?;

        let tx_bytes = raw.to_bytes().map_err(|error| {
            DispatchError::Signing(format!("Failed to encode signed transaction: {error}"))
        })?;

        debug!(
            sequence = account.sequence,
            gas = fee.gas_limit,
            fee = fee.amount,
            "Broadcasting transaction"
        );

        tokio::select! {
            _ = self.shutdown.changed() => Err(DispatchError::Shutdown),
            result = self.node.broadcast_sync(tx_bytes) => result,
        }
    }

    /// Node-side gas simulation with the aggregate limit as fallback
    async fn estimate_gas(&mut self, body: &Body, fallback: u64) -> DispatchResult<u64> {
        match self.simulate(body, fallback).await {
            Ok(gas_used) => {
                debug!(gas_used, "Gas simulation succeeded");
                Ok(gas_used)
            }
            Err(
                error @ (DispatchError::Shutdown
                | DispatchError::Overflow { .. }
                | DispatchError::Signing(_)),
            ) => Err(error),
            Err(error) => {
                warn!(
                    %error,
                    fallback,
                    "Gas simulation failed; falling back to the aggregate gas limit"
                );
                Ok(fallback)
            }
        }
    }

    async fn simulate(&mut self, body: &Body, gas_limit: u64) -> DispatchResult<u64> {
        let account = self.sequence.next(&self.node).await?;

        let fee = self.fees.compute(gas_limit)?;

        let tx_bytes = self
            .signer
            .sign(
                body,
                self.fees.to_tx_fee(fee)?,
                account.account_number,
                account.sequence,
            )?
            .to_bytes()
            .map_err(|error| {
                DispatchError::Signing(format!(
                    "Failed to encode simulation transaction: {error}"
                ))
            })?;

        tokio::select! {
            _ = self.shutdown.changed() => Err(DispatchError::Shutdown),
            result = self.node.simulate(tx_bytes) => result,
        }
    }

    /// Poll until the accepted transaction shows up on chain
    async fn await_inclusion(&mut self, tx_hash: &str, deadline: Instant) -> DispatchResult<TxOutcome> {
        loop {
            let status = tokio::select! {
                _ = self.shutdown.changed() => return Err(DispatchError::Shutdown),
                result = self.node.tx_status(tx_hash) => result,
            };

            match status {
                Ok(Some(status)) => {
                    return if status.code == 0 {
                        Ok(TxOutcome {
                            tx_hash: tx_hash.to_owned(),
                            height: status.height,
                            gas_wanted: status.gas_wanted,
                            gas_used: status.gas_used,
                        })
                    } else {
                        Err(DispatchError::FatalDispatch {
                            code: status.code,
                            log: status.raw_log,
                        })
                    };
                }
                Ok(None) => {}
                Err(error) if error.is_retryable() => {
                    debug!(%error, "Inclusion query failed; polling again")
                }
                Err(error) => return Err(error),
            }

            if Instant::now() + INCLUSION_POLL_INTERVAL >= deadline {
                warn!(hash = %tx_hash, "Transaction not observed on chain before the deadline");

                return Err(DispatchError::BroadcastTimeout {
                    elapsed_secs: self.policy.timeout.as_secs(),
                });
            }

            self.wait(INCLUSION_POLL_INTERVAL).await?;
        }
    }

    /// Sleep that aborts promptly on shutdown
    async fn wait(&mut self, duration: Duration) -> DispatchResult<()> {
        if duration.is_zero() {
            return Ok(());
        }

        tokio::select! {
            _ = self.shutdown.changed() => Err(DispatchError::Shutdown),
            () = sleep(duration) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU64;

    use mockall::Sequence;

    use super::*;

    use crate::chain::{AccountInfo, MockNodeApi, TxStatus};
    use crate::tx::batch::{form_batches, BatchLimits, WorkItem};
    use crate::tx::fee::{FeeConfig, FeeRatio};

    const TEST_MNEMONIC: &str = "glimpse drama thing brand detail frame spin boss warm people \
        river echo situate creek decorate inhale leaf illness rose order project pear ball stick";

    fn policy(retry_ms: u64, timeout_ms: u64) -> RetryPolicy {
        RetryPolicy {
            broadcast_delay: Duration::ZERO,
            retry_delay: Duration::from_millis(retry_ms),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    fn broadcaster(
        node: MockNodeApi,
        policy: RetryPolicy,
    ) -> (Broadcaster<MockNodeApi>, watch::Sender<bool>) {
        let ratio = |n, d: u64| FeeRatio::new(n, NonZeroU64::new(d).unwrap());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let broadcaster = Broadcaster::new(
            node,
            Signer::from_mnemonic(TEST_MNEMONIC, "wasm", "testing-1").unwrap(),
            SequenceTracker::new("wasm1sender"),
            FeeCalculator::new(
                FeeConfig {
                    gas_adjustment: ratio(12, 10),
                    gas_price: ratio(1, 400),
                    fee_adjustment: ratio(5, 1),
                },
                "unls",
            ),
            "wasm1admin".to_owned(),
            policy,
            shutdown_rx,
        );

        (broadcaster, shutdown_tx)
    }

    fn accepted() -> BroadcastResponse {
        BroadcastResponse {
            code: 0,
            tx_hash: "CAFEBABE".into(),
            raw_log: String::new(),
        }
    }

    fn rejected(code: u32) -> BroadcastResponse {
        BroadcastResponse {
            code,
            tx_hash: "CAFEBABE".into(),
            raw_log: "rejected".into(),
        }
    }

    fn included() -> TxStatus {
        TxStatus {
            code: 0,
            height: 1234,
            gas_wanted: 720_000,
            gas_used: 500_000,
            raw_log: String::new(),
        }
    }

    fn transient() -> DispatchError {
        DispatchError::TransientNode {
            message: "connection reset".into(),
        }
    }

    fn expect_account(node: &mut MockNodeApi, times: usize) {
        node.expect_account_info().times(times).returning(|_| {
            Ok(AccountInfo {
                account_number: 7,
                sequence: 42,
            })
        });
    }

    fn pending() -> Vec<WorkItem> {
        vec![WorkItem::TimeAlarm(1), WorkItem::TimeAlarm(2)]
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retry_until_success() {
        let mut node = MockNodeApi::new();
        let mut order = Sequence::new();

        expect_account(&mut node, 1);
        node.expect_simulate().times(1).returning(|_| Ok(500_000));

        node.expect_broadcast_sync()
            .times(2)
            .in_sequence(&mut order)
            .returning(|_| Err(transient()));
        node.expect_broadcast_sync()
            .times(1)
            .in_sequence(&mut order)
            .returning(|_| Ok(accepted()));

        node.expect_tx_status()
            .times(1)
            .returning(|_| Ok(Some(included())));

        let (mut broadcaster, _shutdown) = broadcaster(node, policy(50, 10_000));
        let pending = pending();
        let batch = form_batches(&pending, &BatchLimits::unbounded()).next().unwrap();

        let started = Instant::now();
        let outcome = broadcaster.submit(batch, 500_000).await.unwrap();

        assert_eq!(outcome.tx_hash, "CAFEBABE");
        // Two transient failures, each followed by the configured retry delay
        assert_eq!(started.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn sequence_mismatch_refetches_once_without_duplicating() {
        let mut node = MockNodeApi::new();
        let mut order = Sequence::new();

        // Initial fetch plus exactly one re-fetch after the mismatch
        expect_account(&mut node, 2);
        node.expect_simulate().times(1).returning(|_| Ok(500_000));

        node.expect_broadcast_sync()
            .times(1)
            .in_sequence(&mut order)
            .returning(|_| Ok(rejected(32)));
        node.expect_broadcast_sync()
            .times(1)
            .in_sequence(&mut order)
            .returning(|_| Ok(accepted()));

        node.expect_tx_status()
            .times(1)
            .returning(|_| Ok(Some(included())));

        let (mut broadcaster, _shutdown) = broadcaster(node, policy(50, 10_000));
        let pending = pending();
        let batch = form_batches(&pending, &BatchLimits::unbounded()).next().unwrap();

        broadcaster.submit(batch, 500_000).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn deterministic_rejection_is_not_retried() {
        let mut node = MockNodeApi::new();

        expect_account(&mut node, 1);
        node.expect_simulate().times(1).returning(|_| Ok(500_000));
        node.expect_broadcast_sync()
            .times(1)
            .returning(|_| Ok(rejected(5)));

        let (mut broadcaster, _shutdown) = broadcaster(node, policy(50, 10_000));
        let pending = pending();
        let batch = form_batches(&pending, &BatchLimits::unbounded()).next().unwrap();

        assert!(matches!(
            broadcaster.submit(batch, 500_000).await,
            Err(DispatchError::FatalDispatch { code: 5, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_bounds_the_retry_loop() {
        let mut node = MockNodeApi::new();

        expect_account(&mut node, 1);
        node.expect_simulate().times(1).returning(|_| Ok(500_000));
        // Attempts land at 0ms, 50ms, 100ms and 150ms; the next slot would
        // cross the 200ms deadline
        node.expect_broadcast_sync()
            .times(4)
            .returning(|_| Err(transient()));

        let (mut broadcaster, _shutdown) = broadcaster(node, policy(50, 200));
        let pending = pending();
        let batch = form_batches(&pending, &BatchLimits::unbounded()).next().unwrap();

        assert!(matches!(
            broadcaster.submit(batch, 500_000).await,
            Err(DispatchError::BroadcastTimeout { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn simulation_failure_falls_back_to_aggregate_limit() {
        let mut node = MockNodeApi::new();

        expect_account(&mut node, 1);
        node.expect_simulate().times(1).returning(|_| Err(transient()));
        node.expect_broadcast_sync()
            .times(1)
            .returning(|_| Ok(accepted()));
        node.expect_tx_status()
            .times(1)
            .returning(|_| Ok(Some(included())));

        let (mut broadcaster, _shutdown) = broadcaster(node, policy(50, 10_000));
        let pending = pending();
        let batch = form_batches(&pending, &BatchLimits::unbounded()).next().unwrap();

        broadcaster.submit(batch, 500_000).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_aggregate_gas_is_rejected_up_front() {
        // No node interaction is expected at all
        let node = MockNodeApi::new();

        let (mut broadcaster, _shutdown) = broadcaster(node, policy(50, 10_000));
        let pending = pending();
        let batch = form_batches(&pending, &BatchLimits::unbounded()).next().unwrap();

        assert!(matches!(
            broadcaster.submit(batch, u64::MAX / 2).await,
            Err(DispatchError::Configuration(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn inclusion_is_polled_until_found() {
        let mut node = MockNodeApi::new();
        let mut order = Sequence::new();

        expect_account(&mut node, 1);
        node.expect_simulate().times(1).returning(|_| Ok(500_000));
        node.expect_broadcast_sync()
            .times(1)
            .returning(|_| Ok(accepted()));

        node.expect_tx_status()
            .times(2)
            .in_sequence(&mut order)
            .returning(|_| Ok(None));
        node.expect_tx_status()
            .times(1)
            .in_sequence(&mut order)
            .returning(|_| Ok(Some(included())));

        let (mut broadcaster, _shutdown) = broadcaster(node, policy(50, 10_000));
        let pending = pending();
        let batch = form_batches(&pending, &BatchLimits::unbounded()).next().unwrap();

        let outcome = broadcaster.submit(batch, 500_000).await.unwrap();
        assert_eq!(outcome.height, 1234);
    }
}
