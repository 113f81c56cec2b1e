//! Builders for [`QueueHandler`](crate::queue::QueueHandler).
//!
//! The builder selects a delivery target, validates the numeric settings and
//! spawns the drain workers. Every handler needs an explicitly chosen
//! receiver; there is no implicit default target.

use std::io;

use thiserror::Error;

mod builder_macros;
mod queue_builder;

pub use queue_builder::QueueHandlerBuilder;

/// Errors that may occur while building a handler.
#[derive(Debug, Error)]
pub enum HandlerBuildError {
    /// Invalid user supplied configuration.
    #[error("invalid handler configuration: {0}")]
    InvalidConfig(String),
    /// The platform TLS stack could not be initialised.
    #[error("failed to initialise TLS: {0}")]
    Tls(#[from] native_tls::Error),
    /// Underlying I/O error whilst spawning the drain workers.
    #[error(transparent)]
    Io(#[from] io::Error),
}
