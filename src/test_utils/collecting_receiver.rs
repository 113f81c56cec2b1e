//! A receiver that keeps every batch in memory for test assertions.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::log_record::LogRecord;
use crate::receiver::{Batch, DeliveryError, LogReceiver};

#[derive(Default)]
struct Collected {
    batches: Mutex<Vec<Batch>>,
    arrived: Condvar,
}

/// Receiver that stores the batches it is given, in delivery order.
#[derive(Clone, Default)]
pub struct CollectingReceiver {
    inner: Arc<Collected>,
}

impl CollectingReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every batch received so far.
    pub fn batches(&self) -> Vec<Batch> {
        self.inner.batches.lock().clone()
    }

    /// All received records, flattened in delivery order.
    pub fn records(&self) -> Vec<LogRecord> {
        self.inner.batches.lock().iter().flatten().cloned().collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.records()
            .iter()
            .map(|r| r.message().to_owned())
            .collect()
    }

    /// Block until at least `count` records have arrived or `timeout`
    /// elapses. Returns whether the count was reached.
    pub fn wait_for_records(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut batches = self.inner.batches.lock();
        loop {
            if batches.iter().map(Vec::len).sum::<usize>() >= count {
                return true;
            }
            if self.inner.arrived.wait_until(&mut batches, deadline).timed_out() {
                return batches.iter().map(Vec::len).sum::<usize>() >= count;
            }
        }
    }
}

impl LogReceiver for CollectingReceiver {
    fn process_logs(&self, batch: Batch) -> Result<(), DeliveryError> {
        self.inner.batches.lock().push(batch);
        self.inner.arrived.notify_all();
        Ok(())
    }
}
