//! Compatibility bridge for the Rust `log` crate.
//!
//! [`RelayLogger`] implements `log::Log` by turning each record into a
//! flat [`LogRecord`](crate::log_record::LogRecord) and appending it to a
//! [`QueueHandler`]. Structured `key = value` pairs become attributes and
//! the thread's current [`LogContext`](crate::context::LogContext) is
//! merged in by the handler.
//!
//! Records emitted by this crate itself are never queued, so a failing
//! receiver cannot feed its own diagnostics back into the pipeline. They
//! are still passed to the parent logger when one is configured.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::kv::{self, Key, Value, VisitSource};
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

use crate::attributes::{RecordBuilder, SourceLocation};
use crate::is_internal_target;
use crate::level::Level;
use crate::queue::QueueHandler;

impl From<log::Level> for Level {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Trace => Level::Trace,
            log::Level::Debug => Level::Debug,
            log::Level::Info => Level::Info,
            log::Level::Warn => Level::Warn,
            log::Level::Error => Level::Error,
        }
    }
}

impl From<Level> for LevelFilter {
    fn from(level: Level) -> Self {
        match level {
            Level::Trace => LevelFilter::Trace,
            Level::Debug => LevelFilter::Debug,
            Level::Info => LevelFilter::Info,
            Level::Warn => LevelFilter::Warn,
            Level::Error => LevelFilter::Error,
        }
    }
}

#[derive(Default)]
struct AttrCollector {
    attrs: BTreeMap<String, String>,
}

impl<'kvs> VisitSource<'kvs> for AttrCollector {
    fn visit_pair(&mut self, key: Key<'kvs>, value: Value<'kvs>) -> Result<(), kv::Error> {
        self.attrs.insert(key.as_str().to_owned(), value.to_string());
        Ok(())
    }
}

/// `log::Log` implementation feeding a [`QueueHandler`].
pub struct RelayLogger {
    handler: Arc<QueueHandler>,
    level: Level,
    add_source: bool,
    parent: Option<Box<dyn Log>>,
}

impl RelayLogger {
    /// Logger accepting `Debug` and above.
    pub fn new(handler: Arc<QueueHandler>) -> Self {
        Self {
            handler,
            level: Level::Debug,
            add_source: false,
            parent: None,
        }
    }

    /// Lowest level forwarded to the handler.
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Record module, file and line of each call.
    pub fn with_source(mut self, add_source: bool) -> Self {
        self.add_source = add_source;
        self
    }

    /// Also pass every record to `parent`, for example a console logger.
    pub fn with_parent(mut self, parent: Box<dyn Log>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn handler(&self) -> &Arc<QueueHandler> {
        &self.handler
    }

    /// Most verbose level any destination wants, for `log::set_max_level`.
    pub fn max_level(&self) -> LevelFilter {
        let own = LevelFilter::from(self.level);
        // Without a way to ask the parent, assume it wants everything.
        match self.parent {
            Some(_) => LevelFilter::Trace,
            None => own,
        }
    }

    /// Install as the global logger.
    pub fn install(self) -> Result<(), SetLoggerError> {
        let max = self.max_level();
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(max);
        Ok(())
    }

    fn accepts(&self, metadata: &Metadata<'_>) -> bool {
        Level::from(metadata.level()) >= self.level && !is_internal_target(metadata.target())
    }

    fn build(&self, record: &Record<'_>) -> RecordBuilder {
        let mut collector = AttrCollector::default();
        // A failing visitor only loses the remaining pairs.
        let _ = record.key_values().visit(&mut collector);
        let mut builder =
            RecordBuilder::new(record.level().into(), record.args().to_string())
                .attrs(collector.attrs);
        if self.add_source {
            builder = builder.source(SourceLocation {
                module_path: record.module_path().unwrap_or_default().to_owned(),
                file: record.file().unwrap_or_default().to_owned(),
                line: record.line().unwrap_or(0),
            });
        }
        builder
    }
}

impl Log for RelayLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.accepts(metadata) || self.parent.as_ref().is_some_and(|p| p.enabled(metadata))
    }

    fn log(&self, record: &Record<'_>) {
        if let Some(parent) = &self.parent {
            parent.log(record);
        }
        if self.accepts(record.metadata()) {
            self.handler.handle(self.build(record));
        }
    }

    fn flush(&self) {
        self.handler.flush();
        if let Some(parent) = &self.parent {
            parent.flush();
        }
    }
}

impl std::fmt::Debug for RelayLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayLogger")
            .field("level", &self.level)
            .field("add_source", &self.add_source)
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}
