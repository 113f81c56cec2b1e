//! Delivery backends for drained batches.
//!
//! A [`LogReceiver`] takes ownership of one [`Batch`] at a time and tries to
//! deliver it, retrying transient failures according to its
//! [`RetryPolicy`]. Two backends ship with the crate:
//!
//! - [`HttpReceiver`] posts the batch as `{"logs": [...]}` JSON.
//! - [`AgentReceiver`] forwards each record as a `LogJson` packet to the
//!   local log agent.
//!
//! Any `Fn(Batch) -> Result<(), DeliveryError>` closure is also a receiver.

mod agent;
mod http;
mod retry;

#[cfg(test)]
mod tests;

use thiserror::Error;

use crate::agent::PacketError;
use crate::log_record::LogRecord;

pub use agent::AgentReceiver;
pub use http::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT, HttpReceiver, HttpReceiverConfig};
pub use retry::{
    Backoff, DEFAULT_BACKOFF_BASE, DEFAULT_MAX_ATTEMPTS, RetryPolicy, retry_with_sleep,
};

/// Records drained from the queue in one cycle, in append order.
pub type Batch = Vec<LogRecord>;

/// Errors reported by a receiver after local retry.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to encode logs: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("collector responded with HTTP {status}")]
    Status { status: u16, retryable: bool },
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error("giving up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<DeliveryError>,
    },
}

impl DeliveryError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Encode(_) | Self::RetriesExhausted { .. } => false,
            Self::Transport(_) => true,
            Self::Status { retryable, .. } => *retryable,
            Self::Packet(err) => !matches!(
                err,
                PacketError::TooLarge { .. }
                    | PacketError::TooManyFiles { .. }
                    | PacketError::FileTransferUnsupported
                    | PacketError::Unsupported(_)
            ),
        }
    }
}

/// A backend able to deliver a batch of records.
pub trait LogReceiver: Send + Sync {
    /// Deliver `batch`, returning an error only after local retries are
    /// exhausted or a permanent failure occurs.
    fn process_logs(&self, batch: Batch) -> Result<(), DeliveryError>;
}

impl<F> LogReceiver for F
where
    F: Fn(Batch) -> Result<(), DeliveryError> + Send + Sync,
{
    fn process_logs(&self, batch: Batch) -> Result<(), DeliveryError> {
        self(batch)
    }
}
