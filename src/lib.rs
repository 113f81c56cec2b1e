//! Asynchronous, level-gated delivery of structured log records.
//!
//! Application threads append flat [`LogRecord`]s to a [`QueueHandler`]
//! without waiting on I/O. Records accumulate until one at or above the
//! handler's threshold arrives; a background worker then hands everything
//! pending to a [`LogReceiver`] as one batch. Two receivers ship with the
//! crate: [`HttpReceiver`] posts batches to a collector and
//! [`AgentReceiver`] forwards records to a local log agent over a Unix
//! socket using the packet protocol in [`agent`].
//!
//! ```no_run
//! use logrelay::{Level, QueueHandlerBuilder};
//!
//! let handler = QueueHandlerBuilder::new()
//!     .with_http_target("https://collector.example.com/v1/logs")
//!     .with_common_attr("service", "billing")
//!     .build()?;
//! handler.log(Level::Debug, "cache warmed");
//! handler.log(Level::Info, "listening"); // drains both records
//! # Ok::<(), logrelay::HandlerBuildError>(())
//! ```

pub mod agent;
mod attributes;
mod censor;
mod context;
mod handler;
pub mod handlers;
mod level;
#[cfg(feature = "log-compat")]
mod log_compat;
mod log_record;
pub mod queue;
mod rate_limited_warner;
pub mod receiver;
#[cfg(any(test, feature = "test-util"))]
pub mod test_utils;
#[cfg(feature = "tracing-compat")]
mod tracing_compat;

pub use attributes::{
    DEFAULT_EVENT, EVENT_KEY, PROJECT_KEY, RecordBuilder, RequestInfo, SourceLocation, VERSION_KEY,
};
pub use censor::{censor_headers, censor_tokens};
pub use context::{BAD_KEY, ContextGuard, LogContext};
pub use handler::HandlerError;
pub use handlers::{HandlerBuildError, QueueHandlerBuilder};
pub use level::{Level, ParseLevelError};
#[cfg(feature = "log-compat")]
pub use log_compat::RelayLogger;
pub use log_record::{LEVEL_KEY, LogRecord, MESSAGE_KEY, TIME_KEY, format_timestamp};
pub use queue::{QueueHandler, QueueHandlerConfig};
pub use rate_limited_warner::{DEFAULT_WARN_INTERVAL, RateLimitedWarner};
pub use receiver::{
    AgentReceiver, Batch, DeliveryError, HttpReceiver, HttpReceiverConfig, LogReceiver,
    RetryPolicy,
};
#[cfg(feature = "tracing-compat")]
pub use tracing_compat::RelayLayer;

const CRATE_TARGET: &str = env!("CARGO_CRATE_NAME");

/// Whether `target` names a module of this crate. The front-ends skip
/// such records so the crate's own diagnostics never re-enter the queue.
pub(crate) fn is_internal_target(target: &str) -> bool {
    target
        .strip_prefix(CRATE_TARGET)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
}

#[cfg(test)]
mod tests {
    use super::is_internal_target;
    use rstest::rstest;

    #[rstest]
    #[case("logrelay", true)]
    #[case("logrelay::queue::worker", true)]
    #[case("logrelay_extra", false)]
    #[case("app::logrelay", false)]
    fn internal_targets_are_recognised(#[case] target: &str, #[case] internal: bool) {
        assert_eq!(is_internal_target(target), internal);
    }
}
