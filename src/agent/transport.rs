//! Transport capability seam for packet exchange.
//!
//! [`PlainStream`] wraps any byte stream and refuses file handle transfer
//! in both directions. On Unix, [`UnixStream`](std::os::unix::net::UnixStream)
//! implements [`PacketIo`] directly and moves descriptors as `SCM_RIGHTS`
//! control messages attached to the frame's bytes.

use std::io::{Read, Write};

use super::packet::{Packet, PacketError};

/// A duplex channel able to exchange whole packets.
pub trait PacketIo {
    /// Whether packets carrying file handles can cross this transport.
    fn supports_file_handles(&self) -> bool;

    /// Write one frame, including any attached file handles.
    fn send_packet(&mut self, packet: &Packet) -> Result<(), PacketError>;

    /// Read one frame, including any attached file handles.
    fn recv_packet(&mut self) -> Result<Packet, PacketError>;
}

/// Byte stream without ancillary data support.
#[derive(Debug)]
pub struct PlainStream<T>(pub T);

impl<T> PlainStream<T> {
    pub fn new(inner: T) -> Self {
        Self(inner)
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: Read + Write> PacketIo for PlainStream<T> {
    fn supports_file_handles(&self) -> bool {
        false
    }

    fn send_packet(&mut self, packet: &Packet) -> Result<(), PacketError> {
        packet.write_to(&mut self.0)
    }

    fn recv_packet(&mut self) -> Result<Packet, PacketError> {
        Packet::read_from(&mut self.0)
    }
}

#[cfg(unix)]
mod unix {
    use std::io::{self, IoSlice, IoSliceMut, Read, Write};
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
    use std::os::unix::net::UnixStream;

    use nix::errno::Errno;
    use nix::sys::socket::{ControlMessage, ControlMessageOwned, MsgFlags, recvmsg, sendmsg};

    use super::PacketIo;
    use crate::agent::packet::{
        HEADER_LEN, MAX_FILES, Packet, PacketError, PacketHeader, read_payload,
    };

    /// Most descriptors the kernel attaches to one message (Linux
    /// `SCM_MAX_FD`). Every one that arrives must be wrapped so it is closed.
    const ANCILLARY_FDS: usize = 253;

    fn recv_flags() -> MsgFlags {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            MsgFlags::MSG_CMSG_CLOEXEC
        }
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        {
            MsgFlags::empty()
        }
    }

    fn retry_eintr<T>(mut op: impl FnMut() -> nix::Result<T>) -> io::Result<T> {
        loop {
            match op() {
                Err(Errno::EINTR) => continue,
                other => return other.map_err(io::Error::from),
            }
        }
    }

    impl PacketIo for UnixStream {
        fn supports_file_handles(&self) -> bool {
            true
        }

        fn send_packet(&mut self, packet: &Packet) -> Result<(), PacketError> {
            let frame = packet.encode_frame()?;
            if packet.files.is_empty() {
                self.write_all(&frame)?;
                return Ok(());
            }

            let fds: Vec<RawFd> = packet.files.iter().map(AsRawFd::as_raw_fd).collect();
            let cmsgs = [ControlMessage::ScmRights(&fds)];
            let iov = [IoSlice::new(&frame)];
            let sent = retry_eintr(|| {
                sendmsg::<()>(self.as_raw_fd(), &iov, &cmsgs, MsgFlags::empty(), None)
            })?;
            // The descriptors travel with the first byte; the rest is plain.
            if sent < frame.len() {
                self.write_all(&frame[sent..])?;
            }
            Ok(())
        }

        fn recv_packet(&mut self) -> Result<Packet, PacketError> {
            let mut header = [0u8; HEADER_LEN];
            let mut cmsg_buf = nix::cmsg_space!([RawFd; ANCILLARY_FDS]);
            let mut files: Vec<OwnedFd> = Vec::new();

            let received = {
                let fd = self.as_raw_fd();
                let mut iov = [IoSliceMut::new(&mut header)];
                let msg = retry_eintr(|| {
                    recvmsg::<()>(fd, &mut iov, Some(&mut cmsg_buf), recv_flags())
                        .map(|msg| {
                            let fds: Vec<RawFd> = msg
                                .cmsgs()
                                .into_iter()
                                .flatten()
                                .filter_map(|cmsg| match cmsg {
                                    ControlMessageOwned::ScmRights(fds) => Some(fds),
                                    _ => None,
                                })
                                .flatten()
                                .collect();
                            (msg.bytes, msg.flags, fds)
                        })
                })?;
                let (bytes, flags, fds) = msg;
                // SAFETY: descriptors delivered via SCM_RIGHTS were just
                // installed into this process and have no other owner.
                files.extend(fds.into_iter().map(|fd| unsafe { OwnedFd::from_raw_fd(fd) }));
                if flags.contains(MsgFlags::MSG_CTRUNC) {
                    return Err(PacketError::AncillaryTruncated);
                }
                if files.len() > MAX_FILES {
                    return Err(PacketError::TooManyFiles {
                        count: files.len(),
                        limit: MAX_FILES,
                    });
                }
                bytes
            };

            if received == 0 {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }
            self.read_exact(&mut header[received..])?;
            let header = PacketHeader::decode(&header)?;
            if usize::from(header.fd_count) != files.len() {
                return Err(PacketError::FileCountMismatch {
                    declared: header.fd_count,
                    received: files.len(),
                });
            }
            let data = read_payload(self, header.data_len)?;
            Ok(Packet {
                kind: header.kind,
                flags: header.flags,
                data,
                files,
            })
        }
    }
}
