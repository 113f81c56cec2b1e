//! Cached connection to the local log agent.

use std::path::PathBuf;

use log::debug;
use parking_lot::Mutex;

use super::packet::{Packet, PacketError};
use super::transport::PacketIo;

/// Well-known socket of the system-wide agent.
pub const AGENT_SYSTEM_SOCKET: &str = "/run/logagent.sock";

#[cfg(unix)]
type AgentStream = std::os::unix::net::UnixStream;

#[cfg(not(unix))]
enum AgentStream {}

#[cfg(not(unix))]
impl PacketIo for AgentStream {
    fn supports_file_handles(&self) -> bool {
        match *self {}
    }

    fn send_packet(&mut self, _packet: &Packet) -> Result<(), PacketError> {
        match *self {}
    }

    fn recv_packet(&mut self) -> Result<Packet, PacketError> {
        match *self {}
    }
}

/// Candidate socket paths for the calling user, in dial order.
///
/// Root only uses the system socket. Other users fall back to a per-user
/// socket in `/tmp` when the system one cannot be reached.
#[cfg(unix)]
pub fn default_socket_paths() -> Vec<PathBuf> {
    let uid = nix::unistd::getuid();
    if uid.is_root() {
        return vec![PathBuf::from(AGENT_SYSTEM_SOCKET)];
    }
    vec![
        PathBuf::from(AGENT_SYSTEM_SOCKET),
        PathBuf::from(format!("/tmp/.logagent-{uid}.sock")),
    ]
}

/// Candidate socket paths for the calling user, in dial order.
#[cfg(not(unix))]
pub fn default_socket_paths() -> Vec<PathBuf> {
    vec![PathBuf::from(AGENT_SYSTEM_SOCKET)]
}

/// At most one live connection to the agent.
///
/// The stream is dialled on first use and reused afterwards. Any error
/// raised while the stream is in use discards it; the next call dials
/// again from the first candidate path. All exchanges hold the connection
/// lock, so frames from concurrent callers never interleave.
pub struct AgentConnection {
    paths: Vec<PathBuf>,
    stream: Mutex<Option<AgentStream>>,
}

impl Default for AgentConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentConnection {
    /// Connection using [`default_socket_paths`].
    pub fn new() -> Self {
        Self::with_paths(default_socket_paths())
    }

    pub fn with_paths(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            stream: Mutex::new(None),
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn is_connected(&self) -> bool {
        self.stream.lock().is_some()
    }

    /// Drop the cached stream, if any.
    pub fn disconnect(&self) {
        self.stream.lock().take();
    }

    /// Send a single packet.
    pub fn send(&self, packet: &Packet) -> Result<(), PacketError> {
        self.exchange(|io| io.send_packet(packet))
    }

    /// Run `op` against the connected stream while holding the lock.
    ///
    /// If `op` fails the stream is discarded.
    pub fn exchange<T>(
        &self,
        op: impl FnOnce(&mut dyn PacketIo) -> Result<T, PacketError>,
    ) -> Result<T, PacketError> {
        let mut guard = self.stream.lock();
        let mut stream = match guard.take() {
            Some(stream) => stream,
            None => self.dial()?,
        };
        match op(&mut stream) {
            Ok(value) => {
                *guard = Some(stream);
                Ok(value)
            }
            Err(err) => {
                debug!("discarding log agent connection: {err}");
                Err(err)
            }
        }
    }

    #[cfg(unix)]
    fn dial(&self) -> Result<AgentStream, PacketError> {
        let mut last_err = None;
        for path in &self.paths {
            match AgentStream::connect(path) {
                Ok(stream) => {
                    debug!("connected to log agent at {}", path.display());
                    return Ok(stream);
                }
                Err(err) => {
                    debug!("log agent not reachable at {}: {err}", path.display());
                    last_err = Some(err);
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no log agent socket path configured",
                )
            })
            .into())
    }

    #[cfg(not(unix))]
    fn dial(&self) -> Result<AgentStream, PacketError> {
        Err(PacketError::Unsupported("unix domain sockets"))
    }
}

impl std::fmt::Debug for AgentConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentConnection")
            .field("paths", &self.paths)
            .field("connected", &self.is_connected())
            .finish()
    }
}
