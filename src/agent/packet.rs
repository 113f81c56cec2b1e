//! Packet framing for the agent protocol.
//!
//! ```text
//! offset  size  field
//!      0     2  type
//!      2     2  fd_count
//!      4     4  flags
//!      8     4  data_len
//!     12     n  data
//! ```
//!
//! All integers are big-endian. `data_len` is capped at [`MAX_DATA_LEN`];
//! a larger declaration is rejected before any payload is read.

use std::fmt;
use std::io::{self, Read, Write};

use serde::Serialize;
use thiserror::Error;

/// Size of the fixed frame header.
pub const HEADER_LEN: usize = 12;
/// Largest payload a frame may declare.
pub const MAX_DATA_LEN: usize = 1 << 20; // 1 MiB
/// Largest number of file handles a single frame may carry.
pub const MAX_FILES: usize = 32;

/// An open file handle carried by a packet.
#[cfg(unix)]
pub type FileHandle = std::os::fd::OwnedFd;
/// An open file handle carried by a packet.
#[cfg(not(unix))]
pub type FileHandle = std::fs::File;

/// Packet type code.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PacketType(pub u16);

impl PacketType {
    /// Process metadata, JSON object payload.
    pub const SET_INFO: Self = Self(0x0100);
    /// One JSON-encoded log record.
    pub const LOG_JSON: Self = Self(0x0101);
    /// Request for a writable pipe, payload `{"name": ...}`.
    pub const PIPE_REQUEST: Self = Self(0x0200);
    /// Reply to [`PIPE_REQUEST`](Self::PIPE_REQUEST) carrying one file handle.
    pub const PIPE_RESPONSE: Self = Self(0x8200);

    fn name(self) -> Option<&'static str> {
        match self {
            Self::SET_INFO => Some("SetInfo"),
            Self::LOG_JSON => Some("LogJson"),
            Self::PIPE_REQUEST => Some("PipeRequest"),
            Self::PIPE_RESPONSE => Some("PipeResponse"),
            _ => None,
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} (0x{:04x})", self.0),
            None => write!(f, "0x{:04x}", self.0),
        }
    }
}

/// Errors raised while encoding, decoding or exchanging packets.
#[derive(Debug, Error)]
pub enum PacketError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("packet payload of {len} bytes exceeds the {limit} byte limit")]
    TooLarge { len: usize, limit: usize },
    #[error("packet carries {count} file handles; at most {limit} are allowed")]
    TooManyFiles { count: usize, limit: usize },
    #[error("packet declared {declared} file handles but {received} arrived")]
    FileCountMismatch { declared: u16, received: usize },
    #[error("ancillary data was truncated by the kernel")]
    AncillaryTruncated,
    #[error("file handle transfer is not supported on this transport")]
    FileTransferUnsupported,
    #[error("unexpected packet {actual}, expected {expected}")]
    UnexpectedType {
        expected: PacketType,
        actual: PacketType,
    },
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
}

impl PacketError {
    /// True when the peer broke the framing rules. The connection must be
    /// torn down after such an error.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::TooLarge { .. }
                | Self::TooManyFiles { .. }
                | Self::FileCountMismatch { .. }
                | Self::AncillaryTruncated
                | Self::UnexpectedType { .. }
        )
    }
}

/// Decoded fixed header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacketHeader {
    pub kind: PacketType,
    pub fd_count: u16,
    pub flags: u32,
    pub data_len: u32,
}

impl PacketHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..2].copy_from_slice(&self.kind.0.to_be_bytes());
        buf[2..4].copy_from_slice(&self.fd_count.to_be_bytes());
        buf[4..8].copy_from_slice(&self.flags.to_be_bytes());
        buf[8..12].copy_from_slice(&self.data_len.to_be_bytes());
        buf
    }

    /// Parse a header, enforcing the payload and file handle limits.
    pub fn decode(buf: &[u8; HEADER_LEN]) -> Result<Self, PacketError> {
        let header = Self {
            kind: PacketType(u16::from_be_bytes([buf[0], buf[1]])),
            fd_count: u16::from_be_bytes([buf[2], buf[3]]),
            flags: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            data_len: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        };
        let len = header.data_len as usize;
        if len > MAX_DATA_LEN {
            return Err(PacketError::TooLarge {
                len,
                limit: MAX_DATA_LEN,
            });
        }
        let count = usize::from(header.fd_count);
        if count > MAX_FILES {
            return Err(PacketError::TooManyFiles {
                count,
                limit: MAX_FILES,
            });
        }
        Ok(header)
    }

    pub(crate) fn read_from<R: Read + ?Sized>(reader: &mut R) -> Result<Self, PacketError> {
        let mut buf = [0u8; HEADER_LEN];
        reader.read_exact(&mut buf)?;
        Self::decode(&buf)
    }
}

/// A protocol frame.
#[derive(Debug, Default)]
pub struct Packet {
    pub kind: PacketType,
    pub flags: u32,
    pub data: Vec<u8>,
    pub files: Vec<FileHandle>,
}

impl Packet {
    pub fn new(kind: PacketType, data: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            flags: 0,
            data: data.into(),
            files: Vec::new(),
        }
    }

    /// Build a packet whose payload is `value` encoded as JSON.
    pub fn json<T: Serialize + ?Sized>(kind: PacketType, value: &T) -> serde_json::Result<Self> {
        Ok(Self::new(kind, serde_json::to_vec(value)?))
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_files(mut self, files: Vec<FileHandle>) -> Self {
        self.files = files;
        self
    }

    /// Compute the header for this packet, validating its limits.
    pub fn header(&self) -> Result<PacketHeader, PacketError> {
        if self.data.len() > MAX_DATA_LEN {
            return Err(PacketError::TooLarge {
                len: self.data.len(),
                limit: MAX_DATA_LEN,
            });
        }
        if self.files.len() > MAX_FILES {
            return Err(PacketError::TooManyFiles {
                count: self.files.len(),
                limit: MAX_FILES,
            });
        }
        Ok(PacketHeader {
            kind: self.kind,
            // Both conversions are bounded by the checks above.
            fd_count: self.files.len() as u16,
            flags: self.flags,
            data_len: self.data.len() as u32,
        })
    }

    /// Header and payload as one contiguous frame. File handles are not
    /// part of the byte stream; only their count is.
    pub fn encode_frame(&self) -> Result<Vec<u8>, PacketError> {
        let header = self.header()?;
        let mut frame = Vec::with_capacity(HEADER_LEN + self.data.len());
        frame.extend_from_slice(&header.encode());
        frame.extend_from_slice(&self.data);
        Ok(frame)
    }

    /// Write the packet to a plain byte stream.
    ///
    /// Fails with [`PacketError::FileTransferUnsupported`] if the packet
    /// carries file handles, since a byte stream cannot transfer them.
    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> Result<(), PacketError> {
        if !self.files.is_empty() {
            return Err(PacketError::FileTransferUnsupported);
        }
        let frame = self.encode_frame()?;
        writer.write_all(&frame)?;
        writer.flush()?;
        Ok(())
    }

    /// Read a packet from a plain byte stream.
    ///
    /// A header announcing file handles fails with
    /// [`PacketError::FileTransferUnsupported`].
    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> Result<Self, PacketError> {
        let header = PacketHeader::read_from(reader)?;
        if header.fd_count != 0 {
            return Err(PacketError::FileTransferUnsupported);
        }
        let data = read_payload(reader, header.data_len)?;
        Ok(Self {
            kind: header.kind,
            flags: header.flags,
            data,
            files: Vec::new(),
        })
    }

    /// Fail unless this packet has type `expected`.
    pub fn expect_kind(&self, expected: PacketType) -> Result<(), PacketError> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(PacketError::UnexpectedType {
                expected,
                actual: self.kind,
            })
        }
    }
}

pub(crate) fn read_payload<R: Read + ?Sized>(reader: &mut R, len: u32) -> io::Result<Vec<u8>> {
    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data)?;
    Ok(data)
}
