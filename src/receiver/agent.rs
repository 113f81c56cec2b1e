//! Receiver forwarding records to the local log agent.

use std::fs::File;
use std::sync::Arc;

use log::warn;
use serde::Serialize;

use super::{Batch, DeliveryError, LogReceiver, RetryPolicy};
use crate::agent::{AgentConnection, Packet, PacketError, PacketType};
use crate::rate_limited_warner::RateLimitedWarner;

#[derive(Serialize)]
struct PipeRequest<'a> {
    name: &'a str,
}

/// Sends one `LogJson` packet per record over a shared [`AgentConnection`].
///
/// Each packet is retried on its own; the call fails as a whole once a
/// single record exhausts its attempts. Records that cannot be encoded are
/// skipped.
pub struct AgentReceiver {
    connection: Arc<AgentConnection>,
    retry: RetryPolicy,
    warner: RateLimitedWarner,
}

impl AgentReceiver {
    pub fn new(connection: Arc<AgentConnection>, retry: RetryPolicy) -> Self {
        Self {
            connection,
            retry,
            warner: RateLimitedWarner::default(),
        }
    }

    pub fn connection(&self) -> &Arc<AgentConnection> {
        &self.connection
    }

    /// Describe this process to the agent with a `SetInfo` packet.
    pub fn set_info<T: Serialize + ?Sized>(&self, info: &T) -> Result<(), DeliveryError> {
        let packet = Packet::json(PacketType::SET_INFO, info)?;
        packet.header()?;
        self.retry
            .run("log agent SetInfo", || Ok(self.connection.send(&packet)?))
    }

    /// Ask the agent for a write-only file whose contents it will log under
    /// `name`, typically handed to a child process as stdout or stderr.
    pub fn logfile(&self, name: &str) -> Result<File, DeliveryError> {
        let request = Packet::json(PacketType::PIPE_REQUEST, &PipeRequest { name })?;
        let handle = self.connection.exchange(|io| {
            if !io.supports_file_handles() {
                return Err(PacketError::FileTransferUnsupported);
            }
            io.send_packet(&request)?;
            let response = io.recv_packet()?;
            response.expect_kind(PacketType::PIPE_RESPONSE)?;
            let received = response.files.len();
            response
                .files
                .into_iter()
                .next()
                .filter(|_| received == 1)
                .ok_or(PacketError::FileCountMismatch {
                    declared: 1,
                    received,
                })
        })?;
        Ok(File::from(handle))
    }

    fn encode(&self, record: &crate::log_record::LogRecord) -> Option<Packet> {
        let packet = match Packet::json(PacketType::LOG_JSON, record) {
            Ok(packet) => packet,
            Err(err) => {
                warn!("dropping log record that failed to encode: {err}");
                return None;
            }
        };
        if let Err(err) = packet.header() {
            self.warner.record_drop();
            self.warner.warn_if_due(|count| {
                warn!("dropped {count} log records exceeding the agent frame limit: {err}");
            });
            return None;
        }
        Some(packet)
    }
}

impl LogReceiver for AgentReceiver {
    fn process_logs(&self, batch: Batch) -> Result<(), DeliveryError> {
        for record in &batch {
            let Some(packet) = self.encode(record) else {
                continue;
            };
            self.retry
                .run("log agent delivery", || Ok(self.connection.send(&packet)?))?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for AgentReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentReceiver")
            .field("connection", &self.connection)
            .field("retry", &self.retry)
            .finish()
    }
}
