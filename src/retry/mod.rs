//! Delay policies used by the shard readers
//!
//! Two policies live here. [`PollBackoff`] paces polling of a quiet shard and
//! resets as soon as the reader is caught up again. [`ExponentialBackoff`]
//! spaces out retries after consecutive fetch failures.

mod backoff;
mod poll;

pub use backoff::{Backoff, ExponentialBackoff, ExponentialBackoffBuilder};
pub use poll::PollBackoff;
