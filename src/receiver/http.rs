//! Receiver posting batches to an HTTP collector.
//!
//! The body is `{"logs": [record, ...]}` with each record a flat
//! string-to-string object. Responses are classified for retry:
//!
//! - **2xx**: delivered.
//! - **429** and **5xx**: retried with backoff.
//! - **other statuses**: permanent failure, returned without retry.
//! - **transport errors**: retried with backoff.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use ureq::{Agent, AgentBuilder};

use super::{Batch, DeliveryError, LogReceiver, RetryPolicy};
use crate::log_record::LogRecord;

/// Default connection timeout applied when establishing HTTP connections.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default overall timeout applied to each request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for [`HttpReceiver`].
#[derive(Clone, Debug)]
pub struct HttpReceiverConfig {
    /// Collector endpoint receiving the POST.
    pub url: String,
    /// Extra headers sent with every request.
    pub headers: Vec<(String, String)>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl HttpReceiverConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Serialize)]
struct LogsBody<'a> {
    logs: &'a [LogRecord],
}

/// Receiver posting each batch as one JSON document.
pub struct HttpReceiver {
    url: String,
    headers: Vec<(String, String)>,
    agent: Agent,
    retry: RetryPolicy,
}

impl HttpReceiver {
    /// Build a receiver with its own agent using the platform TLS stack.
    pub fn new(config: HttpReceiverConfig) -> Result<Self, native_tls::Error> {
        let connector = native_tls::TlsConnector::new()?;
        let agent = AgentBuilder::new()
            .timeout_connect(config.connect_timeout)
            .timeout(config.request_timeout)
            .tls_connector(Arc::new(connector))
            .build();
        Ok(Self::with_agent(config, agent))
    }

    /// Build a receiver around a caller-supplied agent, for example one
    /// configured with a proxy or client certificates.
    pub fn with_agent(config: HttpReceiverConfig, agent: Agent) -> Self {
        Self {
            url: config.url,
            headers: config.headers,
            agent,
            retry: config.retry,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn post(&self, body: &str) -> Result<(), DeliveryError> {
        let mut request = self
            .agent
            .post(&self.url)
            .set("Content-Type", "application/json");
        for (name, value) in &self.headers {
            request = request.set(name, value);
        }
        match request.send_string(body) {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(status, _)) => Err(classify_status(status)),
            Err(ureq::Error::Transport(err)) => Err(DeliveryError::Transport(err.to_string())),
        }
    }
}

/// Map a non-2xx status to a delivery error carrying its retry class.
pub(crate) fn classify_status(status: u16) -> DeliveryError {
    let retryable = matches!(status, 429 | 500..=599);
    DeliveryError::Status { status, retryable }
}

impl LogReceiver for HttpReceiver {
    fn process_logs(&self, batch: Batch) -> Result<(), DeliveryError> {
        if batch.is_empty() {
            return Ok(());
        }
        let body = serde_json::to_string(&LogsBody { logs: &batch })?;
        self.retry.run("HTTP log delivery", || self.post(&body))
    }
}

impl std::fmt::Debug for HttpReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpReceiver")
            .field("url", &self.url)
            .field("retry", &self.retry)
            .finish()
    }
}
