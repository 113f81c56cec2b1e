//! Configuration consumed by [`QueueHandler`](super::QueueHandler).
//!
//! `QueueHandlerBuilder` validates and produces these values; they can also
//! be constructed directly when the defaults suit.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::attributes::{PROJECT_KEY, VERSION_KEY};
use crate::level::Level;
use crate::rate_limited_warner::DEFAULT_WARN_INTERVAL;

/// Default number of drain workers.
pub const DEFAULT_WORKERS: usize = 1;
/// Default time [`flush`](super::QueueHandler::flush) waits for delivery.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);
/// Pending length at which a backlog warning is emitted.
pub const DEFAULT_BACKLOG_WATERMARK: usize = 100_000;

#[derive(Clone, Debug)]
pub struct QueueHandlerConfig {
    /// Records at or above this level trigger a drain.
    pub threshold: Level,
    pub workers: usize,
    /// Attributes merged into every appended record. They overwrite record
    /// attributes of the same name.
    pub common: BTreeMap<String, String>,
    pub warn_interval: Duration,
    pub flush_timeout: Duration,
    pub backlog_watermark: usize,
}

impl Default for QueueHandlerConfig {
    fn default() -> Self {
        Self {
            threshold: Level::Info,
            workers: DEFAULT_WORKERS,
            common: BTreeMap::new(),
            warn_interval: DEFAULT_WARN_INTERVAL,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            backlog_watermark: DEFAULT_BACKLOG_WATERMARK,
        }
    }
}

impl QueueHandlerConfig {
    pub fn with_threshold(mut self, threshold: Level) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_common_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.common.insert(key.into(), value.into());
        self
    }

    /// Tag every record with the program name and version, usually
    /// `env!("CARGO_PKG_NAME")` and `env!("CARGO_PKG_VERSION")`.
    pub fn with_build_info(self, project: impl Into<String>, version: impl Into<String>) -> Self {
        self.with_common_attr(PROJECT_KEY, project)
            .with_common_attr(VERSION_KEY, version)
    }
}
