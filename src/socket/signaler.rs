// src/socket/signaler.rs

use crate::error::ZmqError;

use std::cell::Cell;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

/// The OS-visible side of an in-process socket.
///
/// Any state change that might make the socket readable or writable calls
/// [`Signaler::notify`], which makes the descriptor readable. At most one byte is
/// outstanding; [`Signaler::drain`] consumes it. Like libzmq's `ZMQ_FD` the
/// descriptor therefore behaves edge-like: it says "re-check the socket", not
/// which event happened, and stays quiet after a drain even if messages remain.
#[derive(Debug)]
pub(crate) struct Signaler {
  reader: UnixStream,
  writer: UnixStream,
  armed: Cell<bool>,
}

impl Signaler {
  pub fn new() -> Result<Self, ZmqError> {
    let (reader, writer) = UnixStream::pair()?;
    reader.set_nonblocking(true)?;
    writer.set_nonblocking(true)?;
    Ok(Self {
      reader,
      writer,
      armed: Cell::new(false),
    })
  }

  pub fn fd(&self) -> RawFd {
    self.reader.as_raw_fd()
  }

  pub fn notify(&self) {
    if self.armed.replace(true) {
      return;
    }
    match (&self.writer).write(&[1u8]) {
      Ok(_) => {}
      // Buffer full means the descriptor is already readable.
      Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
      Err(e) => tracing::warn!(fd = self.fd(), error = %e, "Signaler write failed"),
    }
  }

  pub fn drain(&self) {
    self.armed.set(false);
    let mut buf = [0u8; 32];
    loop {
      match (&self.reader).read(&mut buf) {
        Ok(0) => break,
        Ok(_) => continue,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
        Err(e) => {
          tracing::warn!(fd = self.fd(), error = %e, "Signaler drain failed");
          break;
        }
      }
    }
  }
}
