//! Builder for [`QueueHandler`].
//!
//! Selects the receiver (HTTP collector, local agent or a caller-supplied
//! backend), the drain threshold and worker count, and the retry and
//! timeout settings shared by the built-in receivers.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::agent::AgentConnection;
use crate::attributes::{PROJECT_KEY, VERSION_KEY};
use crate::level::Level;
use crate::queue::{QueueHandler, QueueHandlerConfig};
use crate::receiver::{AgentReceiver, HttpReceiver, HttpReceiverConfig, LogReceiver, RetryPolicy};

use super::HandlerBuildError;
use super::builder_macros::{ensure_positive, option_setter};

#[derive(Clone)]
enum Target {
    Http { url: String },
    Agent { paths: Option<Vec<PathBuf>> },
    Custom(Arc<dyn LogReceiver>),
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http { url } => f.debug_struct("Http").field("url", url).finish(),
            Self::Agent { paths } => f.debug_struct("Agent").field("paths", paths).finish(),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Builder for constructing [`QueueHandler`] instances.
#[derive(Clone, Debug, Default)]
pub struct QueueHandlerBuilder {
    target: Option<Target>,
    headers: Vec<(String, String)>,
    threshold: Option<Level>,
    workers: Option<usize>,
    common: BTreeMap<String, String>,
    max_attempts: Option<u32>,
    backoff_base_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    flush_timeout_ms: Option<u64>,
    warn_interval_ms: Option<u64>,
    backlog_watermark: Option<usize>,
}

impl QueueHandlerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Post batches to an HTTP collector at `url`.
    pub fn with_http_target(mut self, url: impl Into<String>) -> Self {
        self.target = Some(Target::Http { url: url.into() });
        self
    }

    /// Add a header sent with every HTTP request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Forward records to the local log agent on its default sockets.
    pub fn with_local_agent(mut self) -> Self {
        self.target = Some(Target::Agent { paths: None });
        self
    }

    /// Forward records to a log agent listening on one of `paths`, tried in
    /// order.
    pub fn with_agent_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.target = Some(Target::Agent {
            paths: Some(paths.into_iter().map(Into::into).collect()),
        });
        self
    }

    /// Deliver to a caller-supplied receiver.
    pub fn with_receiver(mut self, receiver: Arc<dyn LogReceiver>) -> Self {
        self.target = Some(Target::Custom(receiver));
        self
    }

    option_setter!(
        #[doc = "Set the level at which a drain is triggered. Defaults to `Info`."]
        with_threshold,
        threshold,
        Level
    );
    option_setter!(
        #[doc = "Set the number of drain workers."]
        with_workers,
        workers,
        usize
    );
    option_setter!(
        #[doc = "Set the total delivery attempts per batch or packet."]
        with_max_attempts,
        max_attempts,
        u32
    );
    option_setter!(
        #[doc = "Set the backoff increment in milliseconds."]
        with_backoff_base_ms,
        backoff_base_ms,
        u64
    );
    option_setter!(
        #[doc = "Set the HTTP connect timeout in milliseconds."]
        with_connect_timeout_ms,
        connect_timeout_ms,
        u64
    );
    option_setter!(
        #[doc = "Set the overall HTTP request timeout in milliseconds."]
        with_request_timeout_ms,
        request_timeout_ms,
        u64
    );
    option_setter!(
        #[doc = "Set how long `flush` waits in milliseconds."]
        with_flush_timeout_ms,
        flush_timeout_ms,
        u64
    );
    option_setter!(
        #[doc = "Set the minimum interval between repeated warnings in milliseconds."]
        with_warn_interval_ms,
        warn_interval_ms,
        u64
    );
    option_setter!(
        #[doc = "Set the pending length at which a backlog warning is emitted."]
        with_backlog_watermark,
        backlog_watermark,
        usize
    );

    /// Attach an attribute to every record appended to the handler.
    pub fn with_common_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.common.insert(key.into(), value.into());
        self
    }

    /// Record the program name and version as `rust.project` and
    /// `rust.version` on every record.
    ///
    /// ```no_run
    /// # use logrelay::QueueHandlerBuilder;
    /// let builder = QueueHandlerBuilder::new()
    ///     .with_local_agent()
    ///     .with_build_info(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    /// ```
    pub fn with_build_info(self, project: impl Into<String>, version: impl Into<String>) -> Self {
        self.with_common_attr(PROJECT_KEY, project)
            .with_common_attr(VERSION_KEY, version)
    }

    fn validate(&self) -> Result<(), HandlerBuildError> {
        self.validate_target()?;
        self.validate_counts()?;
        self.validate_durations()?;
        Ok(())
    }

    fn validate_target(&self) -> Result<(), HandlerBuildError> {
        let invalid = |msg: &str| -> Result<(), HandlerBuildError> {
            Err(HandlerBuildError::InvalidConfig(msg.into()))
        };
        match &self.target {
            None => invalid(
                "a receiver must be selected with with_http_target, with_local_agent, \
                 with_agent_paths or with_receiver",
            ),
            Some(Target::Http { url }) if url.trim().is_empty() => invalid("URL must not be empty"),
            Some(Target::Http { url })
                if !(url.starts_with("http://") || url.starts_with("https://")) =>
            {
                invalid("URL must use the http or https scheme")
            }
            Some(Target::Agent { paths: Some(paths) }) if paths.is_empty() => {
                invalid("at least one agent socket path is required")
            }
            Some(Target::Http { .. }) => Ok(()),
            Some(_) if !self.headers.is_empty() => {
                invalid("headers are only supported with an HTTP target")
            }
            Some(_) => Ok(()),
        }
    }

    fn validate_counts(&self) -> Result<(), HandlerBuildError> {
        if let Some(workers) = self.workers {
            ensure_positive!(workers, "workers")?;
        }
        if let Some(attempts) = self.max_attempts {
            ensure_positive!(attempts, "max_attempts")?;
        }
        if let Some(watermark) = self.backlog_watermark {
            ensure_positive!(watermark, "backlog_watermark")?;
        }
        Ok(())
    }

    fn validate_durations(&self) -> Result<(), HandlerBuildError> {
        for (value, field) in [
            (self.backoff_base_ms, "backoff_base_ms"),
            (self.connect_timeout_ms, "connect_timeout_ms"),
            (self.request_timeout_ms, "request_timeout_ms"),
            (self.flush_timeout_ms, "flush_timeout_ms"),
        ] {
            if let Some(ms) = value {
                ensure_positive!(ms, field)?;
            }
        }
        Ok(())
    }

    fn retry_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts),
            base: self
                .backoff_base_ms
                .map_or(defaults.base, Duration::from_millis),
        }
    }

    fn build_config(&self) -> QueueHandlerConfig {
        let defaults = QueueHandlerConfig::default();
        QueueHandlerConfig {
            threshold: self.threshold.unwrap_or(defaults.threshold),
            workers: self.workers.unwrap_or(defaults.workers),
            common: self.common.clone(),
            warn_interval: self
                .warn_interval_ms
                .map_or(defaults.warn_interval, Duration::from_millis),
            flush_timeout: self
                .flush_timeout_ms
                .map_or(defaults.flush_timeout, Duration::from_millis),
            backlog_watermark: self.backlog_watermark.unwrap_or(defaults.backlog_watermark),
        }
    }

    fn build_receiver(&self) -> Result<Arc<dyn LogReceiver>, HandlerBuildError> {
        let retry = self.retry_policy();
        match &self.target {
            Some(Target::Http { url }) => {
                let mut config = HttpReceiverConfig::new(url.clone());
                config.headers = self.headers.clone();
                config.retry = retry;
                if let Some(ms) = self.connect_timeout_ms {
                    config.connect_timeout = Duration::from_millis(ms);
                }
                if let Some(ms) = self.request_timeout_ms {
                    config.request_timeout = Duration::from_millis(ms);
                }
                Ok(Arc::new(HttpReceiver::new(config)?))
            }
            Some(Target::Agent { paths }) => {
                let connection = match paths {
                    Some(paths) => AgentConnection::with_paths(paths.clone()),
                    None => AgentConnection::new(),
                };
                Ok(Arc::new(AgentReceiver::new(Arc::new(connection), retry)))
            }
            Some(Target::Custom(receiver)) => Ok(Arc::clone(receiver)),
            None => Err(HandlerBuildError::InvalidConfig("no receiver selected".into())),
        }
    }

    /// Validate the settings and start the handler's workers.
    pub fn build(&self) -> Result<QueueHandler, HandlerBuildError> {
        self.validate()?;
        let receiver = self.build_receiver()?;
        Ok(QueueHandler::with_config(self.build_config(), receiver)?)
    }
}
