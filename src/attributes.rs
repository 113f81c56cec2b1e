//! Composition of flat records from call-site data.
//!
//! [`RecordBuilder`] collects a message, level, timestamp and free-form
//! attributes, then folds in optional source location, request metadata and
//! propagated [`LogContext`] values. The result is the flat string map the
//! queue accepts.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};

use crate::context::LogContext;
use crate::level::Level;
use crate::log_record::LogRecord;

/// Attribute naming the kind of event.
pub const EVENT_KEY: &str = "event";
/// Value of [`EVENT_KEY`] when the caller did not set one.
pub const DEFAULT_EVENT: &str = "rust.log";
/// Common attribute naming the program that produced the records.
pub const PROJECT_KEY: &str = "rust.project";
/// Common attribute carrying the program's version.
pub const VERSION_KEY: &str = "rust.version";

/// Source location of a logging call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceLocation {
    pub module_path: String,
    pub file: String,
    pub line: u32,
}

impl SourceLocation {
    fn insert_into(&self, attrs: &mut BTreeMap<String, String>) {
        attrs.insert("rust.source.module".into(), self.module_path.clone());
        attrs.insert("rust.source.file".into(), self.file.clone());
        attrs.insert("rust.source".into(), format!("{}:{}", self.file, self.line));
    }
}

/// Metadata about the HTTP request being served when the record was
/// emitted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestInfo {
    pub host: String,
    pub method: String,
    pub request_uri: String,
    pub proto: String,
    /// Peer address, usually `ip:port`.
    pub remote_addr: String,
    /// Value of the `Sec-Trace-Id` request header.
    pub trace_id: Option<String>,
    pub request_id: Option<String>,
}

impl RequestInfo {
    /// Host part of [`remote_addr`](Self::remote_addr), or the raw value
    /// when it is not a socket address.
    pub fn remote_ip(&self) -> String {
        match self.remote_addr.parse::<SocketAddr>() {
            Ok(addr) => addr.ip().to_string(),
            Err(_) => self.remote_addr.clone(),
        }
    }

    fn insert_into(&self, attrs: &mut BTreeMap<String, String>) {
        attrs.insert("http.host".into(), self.host.clone());
        attrs.insert("http.method".into(), self.method.clone());
        attrs.insert("http.request_uri".into(), self.request_uri.clone());
        attrs.insert("http.proto".into(), self.proto.clone());
        attrs.insert("remote_ip".into(), self.remote_ip());
        if let Some(trace) = self.trace_id.as_deref().filter(|t| !t.is_empty()) {
            attrs.insert("http.trace".into(), trace.to_owned());
        }
        if let Some(id) = &self.request_id {
            attrs.insert("req".into(), id.clone());
        }
    }
}

/// Fluent builder producing a [`LogRecord`].
///
/// Precedence, lowest first: propagated context, call-site attributes,
/// request metadata, source location, reserved keys.
#[derive(Clone, Debug)]
pub struct RecordBuilder {
    level: Level,
    message: String,
    timestamp: DateTime<Utc>,
    attrs: BTreeMap<String, String>,
    context: Option<LogContext>,
    request: Option<RequestInfo>,
    source: Option<SourceLocation>,
}

impl RecordBuilder {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Utc::now(),
            attrs: BTreeMap::new(),
            context: None,
            request: None,
            source: None,
        }
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Attach one attribute; the value is rendered with `Display`.
    pub fn attr(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.attrs.insert(key.into(), value.to_string());
        self
    }

    pub fn attrs<I, K, V>(mut self, attrs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.attrs
            .extend(attrs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn source(mut self, source: SourceLocation) -> Self {
        self.source = Some(source);
        self
    }

    pub fn request(mut self, request: RequestInfo) -> Self {
        self.request = Some(request);
        self
    }

    pub fn context(mut self, context: LogContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn build(self) -> LogRecord {
        let mut attrs = BTreeMap::new();
        if let Some(context) = &self.context {
            context.insert_into(&mut attrs);
        }
        attrs.extend(self.attrs);
        attrs
            .entry(EVENT_KEY.to_owned())
            .or_insert_with(|| DEFAULT_EVENT.to_owned());
        if let Some(request) = &self.request {
            request.insert_into(&mut attrs);
        }
        if let Some(source) = &self.source {
            source.insert_into(&mut attrs);
        }
        LogRecord::from_parts(self.level, &self.message, self.timestamp, attrs)
    }
}
