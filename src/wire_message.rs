use crate::constants::{MAX_WIRE_SEGMENTS, WIRE_HEADER_SIZE, WIRE_SEGMENT_ENTRY_SIZE};
use crate::error::{Error, ErrorKind};
use sendfd::{RecvWithFd, SendWithFd};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

pub struct WireMessage {
    pub data: Vec<u8>,
    // one shared memory fd per segment, in segment order
    pub fds: Vec<OwnedFd>,
}

impl WireMessage {
    pub fn send(&self, stream: &UnixStream) -> Result<(), Error> {
        let raw_fds: Vec<RawFd> = self.fds.iter().map(|fd| fd.as_raw_fd()).collect();
        let n_bytes = stream.send_with_fd(&self.data, &raw_fds)?;
        if n_bytes != self.data.len() {
            return Err(Error::new(
                ErrorKind::Wire,
                format!("Only sent {} of {} bytes", n_bytes, self.data.len()),
            ));
        }
        return Ok(());
    }

    /// Blocks (subject to the stream's timeout) for the next message,
    /// `None` means the other end hung up.
    pub fn recv(stream: &UnixStream) -> Result<Option<WireMessage>, Error> {
        let mut data = vec![0u8; WIRE_HEADER_SIZE + WIRE_SEGMENT_ENTRY_SIZE * MAX_WIRE_SEGMENTS];
        let mut raw_fds: [RawFd; MAX_WIRE_SEGMENTS] = [-1; MAX_WIRE_SEGMENTS];
        let (n_bytes, n_fds) = stream.recv_with_fd(&mut data, &mut raw_fds)?;

        // take ownership right away so nothing leaks on the error paths
        let fds: Vec<OwnedFd> = raw_fds[..n_fds]
            .iter()
            .filter(|fd| **fd != -1)
            .map(|fd| unsafe { OwnedFd::from_raw_fd(*fd) })
            .collect();

        if n_bytes == 0 {
            // zero bytes without error means closed
            return Ok(None);
        }
        data.truncate(n_bytes);
        return Ok(Some(WireMessage {
            data: data,
            fds: fds,
        }));
    }
}

impl std::fmt::Debug for WireMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireMessage")
            .field("data", &self.data.len())
            .field("fds", &self.fds.len())
            .finish()
    }
}
