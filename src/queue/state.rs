//! Shared pending queue and the condition variables coordinating it.

use std::mem;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::level::Level;
use crate::log_record::LogRecord;
use crate::receiver::Batch;

struct QueueState {
    pending: Vec<LogRecord>,
    /// Highest level appended since the last take.
    max_level: Level,
    /// Drain on the next wake even if the threshold was not reached.
    force: bool,
    in_flight: usize,
    closed: bool,
}

impl QueueState {
    fn ready(&self, threshold: Level) -> bool {
        !self.pending.is_empty() && (self.max_level >= threshold || self.force || self.closed)
    }

    fn idle(&self) -> bool {
        self.pending.is_empty() && self.in_flight == 0
    }
}

/// Level-gated buffer shared by the producers and the drain workers.
///
/// Producers push under the lock and wake a worker only when a record at
/// or above the threshold arrives. A worker swaps the whole queue out in
/// one step, so each batch keeps append order and no record is seen by
/// two workers.
pub(crate) struct LogQueue {
    state: Mutex<QueueState>,
    /// Signalled when a batch may be ready or the queue closes.
    wake: Condvar,
    /// Signalled when a batch finishes delivery.
    idle: Condvar,
    threshold: Level,
    broadcast: bool,
}

/// Marks a batch as in flight until dropped.
pub(crate) struct InFlight<'a> {
    queue: &'a LogQueue,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut state = self.queue.state.lock();
        state.in_flight -= 1;
        if state.idle() {
            self.queue.idle.notify_all();
        }
    }
}

impl LogQueue {
    pub(crate) fn new(threshold: Level, workers: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: Vec::new(),
                max_level: Level::LOWEST,
                force: false,
                in_flight: 0,
                closed: false,
            }),
            wake: Condvar::new(),
            idle: Condvar::new(),
            threshold,
            broadcast: workers > 1,
        }
    }

    pub(crate) fn threshold(&self) -> Level {
        self.threshold
    }

    /// Push `record` at the tail. Returns the pending length, or hands the
    /// record back if the queue is closed.
    pub(crate) fn append(&self, record: LogRecord, level: Level) -> Result<usize, LogRecord> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(record);
        }
        state.pending.push(record);
        if level > state.max_level {
            state.max_level = level;
        }
        let len = state.pending.len();
        drop(state);
        if level >= self.threshold {
            self.notify_workers();
        }
        Ok(len)
    }

    /// Block until a batch is ready and take it. Returns `None` once the
    /// queue is closed and empty.
    pub(crate) fn take(&self) -> Option<(Batch, InFlight<'_>)> {
        let mut state = self.state.lock();
        loop {
            if state.ready(self.threshold) {
                let batch = mem::take(&mut state.pending);
                state.max_level = Level::LOWEST;
                state.force = false;
                state.in_flight += 1;
                return Some((batch, InFlight { queue: self }));
            }
            if state.closed {
                return None;
            }
            self.wake.wait(&mut state);
        }
    }

    /// Drain regardless of threshold and wait until nothing is pending or
    /// in flight. Returns `false` if `timeout` elapsed first.
    pub(crate) fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.idle() {
                return true;
            }
            if !state.pending.is_empty() && !state.force {
                state.force = true;
                self.wake.notify_all();
            }
            if self.idle.wait_until(&mut state, deadline).timed_out() {
                return state.idle();
            }
        }
    }

    /// Refuse further appends and let the workers drain what is left.
    /// Returns `false` if the queue was already closed.
    pub(crate) fn close(&self) -> bool {
        let mut state = self.state.lock();
        let first = !mem::replace(&mut state.closed, true);
        self.wake.notify_all();
        first
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub(crate) fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    fn notify_workers(&self) {
        if self.broadcast {
            self.wake.notify_all();
        } else {
            self.wake.notify_one();
        }
    }
}
