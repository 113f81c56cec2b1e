//! Drain worker threads.

use std::io;
use std::sync::Arc;
use std::thread;

use log::warn;

use crate::rate_limited_warner::RateLimitedWarner;
use crate::receiver::LogReceiver;

use super::state::LogQueue;

/// Start one named drain thread.
pub(crate) fn spawn_worker(
    index: usize,
    queue: Arc<LogQueue>,
    receiver: Arc<dyn LogReceiver>,
    warner: Arc<RateLimitedWarner>,
) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("logrelay-drain-{index}"))
        .spawn(move || drain_loop(&queue, receiver.as_ref(), &warner))
}

fn drain_loop(queue: &LogQueue, receiver: &dyn LogReceiver, warner: &RateLimitedWarner) {
    while let Some((batch, _in_flight)) = queue.take() {
        let count = batch.len() as u64;
        if let Err(err) = receiver.process_logs(batch) {
            warner.record_drops(count);
            warner.warn_if_due(|dropped| {
                warn!("log delivery failed: {err}; dropped {dropped} records");
            });
        }
    }
    warner.flush(|dropped| {
        warn!("dropped {dropped} undeliverable records before shutdown");
    });
}
