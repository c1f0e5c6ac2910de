use crate::error::ZmqError;
#[cfg(feature = "inproc")]
use crate::message::Msg;
#[cfg(feature = "inproc")]
use crate::socket::core::SocketCore;
#[cfg(feature = "inproc")]
use crate::socket::{MessageSocket, PollEvents, RecvOptions, SendOptions, SendStatus};

#[cfg(feature = "inproc")]
use std::fmt;
#[cfg(feature = "inproc")]
use std::os::fd::RawFd;
#[cfg(feature = "inproc")]
use std::rc::Rc;

/// Represents the type of a ZeroMQ socket, defining its messaging pattern and behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketType {
  /// **PUB (Publish):** Distributes messages to all connected subscribers.
  /// Messages are topic-filtered against each subscriber's prefixes. PUB sockets do not receive messages.
  Pub,
  /// **SUB (Subscribe):** Receives messages from PUB sockets it's connected to.
  /// Must subscribe to specific topics (or all topics using an empty prefix) to receive messages.
  Sub,
  /// **REQ (Request):** Sends requests and receives replies in a strict alternating sequence.
  Req,
  /// **REP (Reply):** Receives requests and sends replies in a strict alternating sequence.
  Rep,
  /// **PUSH:** Distributes messages to connected PULL sockets in a round-robin fashion.
  Push,
  /// **PULL:** Collects messages from connected PUSH sockets in a fair-queued manner.
  Pull,
}

impl SocketType {
  pub fn name(&self) -> &'static str {
    match self {
      SocketType::Pub => "PUB",
      SocketType::Sub => "SUB",
      SocketType::Req => "REQ",
      SocketType::Rep => "REP",
      SocketType::Push => "PUSH",
      SocketType::Pull => "PULL",
    }
  }

  /// The libzmq `ZMQ_TYPE` value.
  pub fn as_raw(&self) -> i32 {
    match self {
      SocketType::Pub => 1,
      SocketType::Sub => 2,
      SocketType::Req => 3,
      SocketType::Rep => 4,
      SocketType::Pull => 7,
      SocketType::Push => 8,
    }
  }

  pub fn from_raw(raw: i32) -> Result<Self, ZmqError> {
    match raw {
      1 => Ok(SocketType::Pub),
      2 => Ok(SocketType::Sub),
      3 => Ok(SocketType::Req),
      4 => Ok(SocketType::Rep),
      7 => Ok(SocketType::Pull),
      8 => Ok(SocketType::Push),
      _ => Err(ZmqError::InvalidArgument(format!("unknown socket type {}", raw))),
    }
  }

  pub fn can_send(&self) -> bool {
    !matches!(self, SocketType::Sub | SocketType::Pull)
  }

  pub fn can_recv(&self) -> bool {
    !matches!(self, SocketType::Pub | SocketType::Push)
  }

  /// Whether a socket of this type may be connected to one of `peer` type.
  pub fn is_compatible(&self, peer: SocketType) -> bool {
    matches!(
      (self, peer),
      (SocketType::Req, SocketType::Rep)
        | (SocketType::Rep, SocketType::Req)
        | (SocketType::Pub, SocketType::Sub)
        | (SocketType::Sub, SocketType::Pub)
        | (SocketType::Push, SocketType::Pull)
        | (SocketType::Pull, SocketType::Push)
    )
  }
}

/// Handle to an in-process socket created by [`crate::Context::socket`].
///
/// Handles are cheap `Rc` clones of the same socket. All operations are
/// non-blocking; use [`crate::MessageStream`] to drive the socket from an event loop.
#[cfg(feature = "inproc")]
#[derive(Clone)]
pub struct Socket {
  core: Rc<SocketCore>,
}

#[cfg(feature = "inproc")]
impl Socket {
  pub(crate) fn from_core(core: Rc<SocketCore>) -> Self {
    Self { core }
  }

  pub fn socket_type(&self) -> SocketType {
    self.core.socket_type
  }

  /// Releases the socket's endpoints and peers. Later operations fail with `Closed`.
  pub fn close(&self) -> Result<(), ZmqError> {
    self.core.close()
  }

  pub fn set_subscribe(&self, topic: &[u8]) -> Result<(), ZmqError> {
    self.core.set_option(crate::socket::options::SUBSCRIBE, topic)
  }

  pub fn set_unsubscribe(&self, topic: &[u8]) -> Result<(), ZmqError> {
    self.core.set_option(crate::socket::options::UNSUBSCRIBE, topic)
  }
}

#[cfg(feature = "inproc")]
impl MessageSocket for Socket {
  fn descriptor(&self) -> Option<RawFd> {
    Some(self.core.fd())
  }

  fn events(&self) -> Result<PollEvents, ZmqError> {
    self.core.events()
  }

  fn recv_multipart(&self, options: RecvOptions) -> Result<Vec<Msg>, ZmqError> {
    self.core.recv_multipart(options)
  }

  fn send_multipart(&self, frames: &[Msg], options: SendOptions) -> Result<SendStatus, ZmqError> {
    self.core.send_multipart(frames, options)
  }

  fn bind(&self, endpoint: &str) -> Result<(), ZmqError> {
    self.core.bind(endpoint)
  }

  fn connect(&self, endpoint: &str) -> Result<(), ZmqError> {
    self.core.connect(endpoint)
  }

  fn set_option(&self, option: i32, value: &[u8]) -> Result<(), ZmqError> {
    self.core.set_option(option, value)
  }

  fn get_option(&self, option: i32) -> Result<Vec<u8>, ZmqError> {
    self.core.get_option(option)
  }
}

#[cfg(feature = "inproc")]
impl fmt::Debug for Socket {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Socket")
      .field("id", &self.core.id)
      .field("type", &self.core.socket_type)
      .finish()
  }
}
