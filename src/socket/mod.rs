// src/socket/mod.rs

//! The message-socket seam and the bundled in-process sockets.
//!
//! [`MessageSocket`] is everything the readiness bridge and the message stream
//! need from a ZeroMQ-style socket. Implementations must never block: a receive
//! with nothing queued or a send without capacity returns
//! [`ZmqError::WouldBlock`].

pub mod options;
pub mod types;

#[cfg(feature = "inproc")]
pub(crate) mod core;
#[cfg(feature = "inproc")]
pub(crate) mod patterns;
#[cfg(feature = "inproc")]
pub(crate) mod signaler;

#[cfg(feature = "inproc")]
pub use types::Socket;
pub use types::SocketType;

use crate::error::ZmqError;
use crate::message::{MessageTracker, Msg};
use bitflags::bitflags;
use std::os::fd::RawFd;

bitflags! {
    /// Raw message-level event bits as reported by a socket's `EVENTS` state.
    /// Values match libzmq's `ZMQ_POLLIN`/`ZMQ_POLLOUT`/`ZMQ_POLLERR`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PollEvents: i16 {
        /// At least one complete message can be received without blocking.
        const POLLIN = 1;
        /// At least one message can be sent without blocking.
        const POLLOUT = 2;
        const POLLERR = 4;
    }
}

/// Options applied to one non-blocking multipart receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvOptions {
  /// Return frames that do not share storage with the socket's queue.
  pub copy: bool,
  /// Request delivery tracking. Only meaningful together with `copy: false`.
  pub track: bool,
}

impl Default for RecvOptions {
  fn default() -> Self {
    Self { copy: true, track: false }
  }
}

/// Options applied to one non-blocking multipart send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
  /// Copy frame payloads into the socket instead of sharing them.
  pub copy: bool,
  /// Return a [`MessageTracker`] for the send (ignored when `copy` is set).
  pub track: bool,
}

impl Default for SendOptions {
  fn default() -> Self {
    Self { copy: true, track: false }
  }
}

/// Outcome of a successful send.
#[derive(Debug, Clone, Default)]
pub struct SendStatus {
  pub tracker: Option<MessageTracker>,
}

/// A ZeroMQ-style socket as seen by the event-loop adapter.
///
/// Methods take `&self`; sockets are shared through `Rc` between the caller and
/// the adapter, and are driven from a single thread.
pub trait MessageSocket {
  /// The OS-visible descriptor that becomes readable when the socket's state may
  /// have changed. `None` when the socket has no such descriptor.
  ///
  /// Readiness of this descriptor only means "re-check [`MessageSocket::events`]".
  fn descriptor(&self) -> Option<RawFd>;

  /// The current message-level event state. Reading it may reset the descriptor.
  fn events(&self) -> Result<PollEvents, ZmqError>;

  /// Receives one complete multipart message without blocking.
  fn recv_multipart(&self, options: RecvOptions) -> Result<Vec<Msg>, ZmqError>;

  /// Sends one complete multipart message without blocking.
  fn send_multipart(&self, frames: &[Msg], options: SendOptions) -> Result<SendStatus, ZmqError>;

  fn bind(&self, endpoint: &str) -> Result<(), ZmqError>;

  fn connect(&self, endpoint: &str) -> Result<(), ZmqError>;

  fn set_option(&self, option: i32, value: &[u8]) -> Result<(), ZmqError>;

  fn get_option(&self, option: i32) -> Result<Vec<u8>, ZmqError>;
}
