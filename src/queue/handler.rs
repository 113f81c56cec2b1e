//! Public handler type owning the queue and its workers.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::warn;
use parking_lot::Mutex;

use crate::attributes::RecordBuilder;
use crate::context::LogContext;
use crate::handler::HandlerError;
use crate::level::Level;
use crate::log_record::LogRecord;
use crate::rate_limited_warner::RateLimitedWarner;
use crate::receiver::LogReceiver;

use super::config::QueueHandlerConfig;
use super::state::LogQueue;
use super::worker::spawn_worker;

/// Buffers records and hands them to a [`LogReceiver`] on background
/// workers.
///
/// Appending never blocks on delivery. Records below the threshold wait in
/// the queue until a record at or above it arrives, at which point a worker
/// takes everything pending as one batch.
pub struct QueueHandler {
    queue: Arc<LogQueue>,
    common: BTreeMap<String, String>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    closed_warner: RateLimitedWarner,
    backlog_warner: RateLimitedWarner,
    backlog_watermark: usize,
    flush_timeout: Duration,
}

impl QueueHandler {
    /// Handler with default configuration delivering to `receiver`.
    pub fn new(receiver: Arc<dyn LogReceiver>) -> io::Result<Self> {
        Self::with_config(QueueHandlerConfig::default(), receiver)
    }

    /// Start `config.workers` drain threads delivering to `receiver`.
    ///
    /// Fails with [`io::ErrorKind::InvalidInput`] when `config.workers` is
    /// zero. If a thread cannot be spawned the ones already started are shut
    /// down before the error is returned.
    pub fn with_config(
        config: QueueHandlerConfig,
        receiver: Arc<dyn LogReceiver>,
    ) -> io::Result<Self> {
        if config.workers == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "queue handler needs at least one drain worker",
            ));
        }
        let queue = Arc::new(LogQueue::new(config.threshold, config.workers));
        let delivery_warner = Arc::new(RateLimitedWarner::new(config.warn_interval));
        let mut workers = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            match spawn_worker(
                index,
                Arc::clone(&queue),
                Arc::clone(&receiver),
                Arc::clone(&delivery_warner),
            ) {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    queue.close();
                    join_all(workers);
                    return Err(err);
                }
            }
        }
        Ok(Self {
            queue,
            common: config.common,
            workers: Mutex::new(workers),
            closed_warner: RateLimitedWarner::new(config.warn_interval),
            backlog_warner: RateLimitedWarner::new(config.warn_interval),
            backlog_watermark: config.backlog_watermark,
            flush_timeout: config.flush_timeout,
        })
    }

    /// Queue `record`, which was produced at `level`.
    ///
    /// Common attributes are merged in first. After [`close`](Self::close)
    /// the record is discarded.
    pub fn append(&self, record: LogRecord, level: Level) {
        let record = if self.common.is_empty() {
            record
        } else {
            record.merged_with(&self.common)
        };
        match self.queue.append(record, level) {
            Ok(pending) if pending >= self.backlog_watermark => {
                self.backlog_warner.record_drop();
                self.backlog_warner.warn_if_due(|_| {
                    warn!("log queue backlog at {pending} records; delivery is falling behind");
                });
            }
            Ok(_) => {}
            Err(_) => {
                self.closed_warner.record_drop();
                self.closed_warner.warn_if_due(|count| {
                    warn!("discarded {count} log records appended after close");
                });
            }
        }
    }

    /// Build and queue a record, picking up the thread's current context.
    pub fn handle(&self, builder: RecordBuilder) {
        let builder = match LogContext::current() {
            Some(context) => builder.context(context),
            None => builder,
        };
        let level = builder.level();
        self.append(builder.build(), level);
    }

    pub fn log(&self, level: Level, message: impl Into<String>) {
        self.handle(RecordBuilder::new(level, message));
    }

    /// Deliver everything pending regardless of threshold, waiting up to
    /// the configured flush timeout.
    pub fn flush(&self) -> bool {
        self.flush_timeout(self.flush_timeout)
    }

    /// [`flush`](Self::flush) with an explicit timeout. Returns `false` if
    /// records were still pending or in flight when it elapsed.
    pub fn flush_timeout(&self, timeout: Duration) -> bool {
        self.closed_warner.flush(|count| {
            warn!("discarded {count} log records appended after close");
        });
        self.queue.flush(timeout)
    }

    /// Stop accepting records, drain what is pending and join the workers.
    pub fn close(&self) {
        self.queue.close();
        let workers = std::mem::take(&mut *self.workers.lock());
        join_all(workers);
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    /// Number of records waiting for a drain.
    pub fn pending(&self) -> usize {
        self.queue.pending()
    }

    pub fn threshold(&self) -> Level {
        self.queue.threshold()
    }

    /// Attribute scoping on the handler itself is not supported; use
    /// [`LogContext`] instead. An empty set is a no-op.
    pub fn with_attrs<I, K, V>(&self, attrs: I) -> Result<&Self, HandlerError>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        match attrs.into_iter().next() {
            None => Ok(self),
            Some(_) => Err(HandlerError::Unsupported("with_attrs")),
        }
    }

    /// Attribute groups are not supported. An empty name is a no-op.
    pub fn with_group(&self, name: &str) -> Result<&Self, HandlerError> {
        if name.is_empty() {
            Ok(self)
        } else {
            Err(HandlerError::Unsupported("with_group"))
        }
    }
}

fn join_all(workers: Vec<thread::JoinHandle<()>>) {
    for handle in workers {
        if handle.join().is_err() {
            warn!("log drain worker panicked");
        }
    }
}

impl Drop for QueueHandler {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for QueueHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueHandler")
            .field("threshold", &self.threshold())
            .field("pending", &self.pending())
            .field("common", &self.common)
            .field("flush_timeout", &self.flush_timeout)
            .finish()
    }
}
