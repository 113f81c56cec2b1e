//! `tracing` subscriber layer feeding a [`QueueHandler`].
//!
//! Event fields become record attributes; the conventional `message` field
//! becomes the record message. As with the `log` bridge, events from this
//! crate's own modules are ignored.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::attributes::{RecordBuilder, SourceLocation};
use crate::is_internal_target;
use crate::level::Level;
use crate::queue::QueueHandler;

const MESSAGE_FIELD: &str = "message";

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        if level == tracing::Level::ERROR {
            Level::Error
        } else if level == tracing::Level::WARN {
            Level::Warn
        } else if level == tracing::Level::INFO {
            Level::Info
        } else if level == tracing::Level::DEBUG {
            Level::Debug
        } else {
            Level::Trace
        }
    }
}

#[derive(Default)]
struct FieldCollector {
    message: String,
    attrs: BTreeMap<String, String>,
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == MESSAGE_FIELD {
            self.message = value.to_owned();
        } else {
            self.attrs.insert(field.name().to_owned(), value.to_owned());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let rendered = format!("{value:?}");
        if field.name() == MESSAGE_FIELD {
            self.message = rendered;
        } else {
            self.attrs.insert(field.name().to_owned(), rendered);
        }
    }
}

/// Layer appending every accepted event to a [`QueueHandler`].
pub struct RelayLayer {
    handler: Arc<QueueHandler>,
    level: Level,
    add_source: bool,
}

impl RelayLayer {
    /// Layer accepting `Debug` and above.
    pub fn new(handler: Arc<QueueHandler>) -> Self {
        Self {
            handler,
            level: Level::Debug,
            add_source: false,
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_source(mut self, add_source: bool) -> Self {
        self.add_source = add_source;
        self
    }
}

impl<S: Subscriber> Layer<S> for RelayLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = Level::from(*metadata.level());
        if level < self.level || is_internal_target(metadata.target()) {
            return;
        }
        let mut fields = FieldCollector::default();
        event.record(&mut fields);

        let mut builder = RecordBuilder::new(level, fields.message).attrs(fields.attrs);
        if self.add_source {
            builder = builder.source(SourceLocation {
                module_path: metadata.module_path().unwrap_or_default().to_owned(),
                file: metadata.file().unwrap_or_default().to_owned(),
                line: metadata.line().unwrap_or(0),
            });
        }
        self.handler.handle(builder);
    }
}

impl fmt::Debug for RelayLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayLayer")
            .field("level", &self.level)
            .field("add_source", &self.add_source)
            .finish()
    }
}
