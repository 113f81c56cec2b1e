//! Queue & drain engine.
//!
//! [`QueueHandler`] accepts records synchronously and never blocks on
//! delivery. Records accumulate in a shared queue; once a record at or above
//! the configured threshold arrives, a drain worker swaps out everything
//! pending and passes it to the [`LogReceiver`](crate::receiver::LogReceiver)
//! as a single batch. Lower-level records therefore travel with the next
//! important one, or with an explicit flush.

mod config;
mod handler;
mod state;
mod worker;


pub use config::{
    DEFAULT_BACKLOG_WATERMARK, DEFAULT_FLUSH_TIMEOUT, DEFAULT_WORKERS, QueueHandlerConfig,
};
pub use handler::QueueHandler;
