//! Account sequence tracking with staleness recovery
//!
//! The node is asked for the account's sequence only when the locally cached
//! value cannot be trusted: on first use, and after the node reported a
//! mismatch. Every accepted submission advances the cache optimistically, so
//! the steady state costs no extra round trips.

use tracing::info;

use crate::chain::{AccountInfo, NodeApi};
use crate::error::DispatchResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SequenceState {
    /// No value yet; first use fetches from the node
    Fresh,
    /// Locally tracked value, advanced on every accepted submission
    Cached(AccountInfo),
    /// Node reported a mismatch; the next use re-fetches
    Stale,
}

/// Single authoritative holder of the account's next usable sequence
pub struct SequenceTracker {
    address: String,
    state: SequenceState,
}

impl SequenceTracker {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            state: SequenceState::Fresh,
        }
    }

    /// The next usable sequence plus the account number for the sign-doc
    ///
    /// Hits the node only in the `Fresh` and `Stale` states.
    pub async fn next<N>(&mut self, node: &N) -> DispatchResult<AccountInfo>
    where
        N: NodeApi + ?Sized,
    {
        match self.state {
            SequenceState::Cached(account) => Ok(account),
            SequenceState::Fresh | SequenceState::Stale => {
                let account = node.account_info(&self.address).await?;

                info!(
                    sequence = account.sequence,
                    "Fetched account sequence from node"
                );

                self.state = SequenceState::Cached(account);

                Ok(account)
            }
        }
    }

    /// Advance the cached sequence after a mempool-accepted submission
    pub fn confirm(&mut self) {
        if let SequenceState::Cached(ref mut account) = self.state {
            account.sequence += 1;
        }
    }

    /// Force a re-fetch on the next use after a node-reported mismatch
    pub fn mark_stale(&mut self) {
        if matches!(self.state, SequenceState::Cached(_)) {
            self.state = SequenceState::Stale;
        }
    }
}
