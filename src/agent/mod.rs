//! Wire protocol and connection management for the local log agent.
//!
//! The agent is a co-located daemon listening on a Unix-domain stream
//! socket. Each message is a [`Packet`]: a fixed 12-byte big-endian header
//! followed by an opaque payload. Packets may carry open file descriptors
//! as `SCM_RIGHTS` ancillary data, which is how the agent hands back
//! pipes for child processes to log into.
//!
//! [`PacketIo`] is the transport capability seam: plain byte streams
//! refuse descriptor transfer explicitly, Unix streams support it.
//! [`AgentConnection`] lazily dials and caches one connection and throws it
//! away on any error.

mod connection;
mod packet;
mod transport;


pub use connection::{AgentConnection, AGENT_SYSTEM_SOCKET, default_socket_paths};
pub use packet::{
    FileHandle, HEADER_LEN, MAX_DATA_LEN, MAX_FILES, Packet, PacketError, PacketHeader, PacketType,
};
pub use transport::{PacketIo, PlainStream};
