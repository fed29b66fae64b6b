//! Transaction dispatch: fee computation, sequence tracking, batching and
//! broadcasting

pub mod batch;
pub mod fee;
pub mod sequence;
pub mod sender;

pub use batch::{form_batches, AlarmKind, Batch, BatchLimits, WorkItem, WorkKind};
pub use fee::{FeeCalculator, FeeConfig, FeeRatio};
pub use sequence::SequenceTracker;
pub use sender::{Broadcaster, RetryPolicy, TxOutcome};
