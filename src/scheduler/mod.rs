//! Service control loops
//!
//! One loop per service process:
//! - the feeder fires on a fixed interval and feeds a fresh price set
//! - the dispatcher polls for due alarms and idles when there are none
//!
//! Each loop drives exactly one `Broadcaster`, so at most one submission is
//! ever in flight per account.

pub mod dispatcher;
pub mod feeder;

pub use dispatcher::Dispatcher;
pub use feeder::Feeder;
