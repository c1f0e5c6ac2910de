// src/error.rs

use std::io;
use thiserror::Error;

/// libzmq's `ETERM` (context was terminated). Not an OS errno, so libc has no constant for it.
pub const ETERM: i32 = 156_384_765;
/// libzmq's `EFSM` (operation not valid in the socket's current state).
pub const EFSM: i32 = 156_384_763;

#[derive(Error, Debug)]
#[non_exhaustive] // Allows adding more variants later without breaking change
pub enum ZmqError {
  // --- I/O Errors ---
  #[error("I/O error: {0}")]
  Io(#[from] io::Error),

  #[error("Invalid argument provided: {0}")]
  InvalidArgument(String), // EINVAL for non-option errors

  // --- Transient conditions (absorbed by the adapter, never surfaced to callbacks) ---
  #[error("Operation would block")]
  WouldBlock, // EAGAIN
  #[error("Operation interrupted by a signal")]
  Interrupted, // EINTR

  // --- Lifecycle ---
  #[error("Messaging context was terminated")]
  Terminated, // ETERM
  #[error("Handle is closed")]
  Closed,

  // --- Connection/Binding Errors ---
  #[error("Address already in use: {0}")]
  AddrInUse(String),
  #[error("Connection refused by peer: {0}")]
  ConnectionRefused(String),

  // --- Endpoint Errors ---
  #[error("Invalid endpoint format: {0}")]
  InvalidEndpoint(String),
  #[error("Transport scheme not supported or enabled: {0}")]
  UnsupportedTransport(String),

  // --- Option Errors ---
  #[error("Invalid socket option ID: {0}")]
  InvalidOption(i32),
  #[error("Invalid value provided for option ID {0}")]
  InvalidOptionValue(i32),

  // --- State Errors ---
  #[error("Operation is invalid for the socket type ({0})")]
  InvalidSocketType(&'static str),
  #[error("Operation is invalid for the current socket state: {0}")]
  InvalidState(&'static str), // EFSM

  // --- Resource Limits ---
  #[error("Resource limit reached (e.g., queue bound)")]
  ResourceLimitReached,

  #[error("Internal library error: {0}")]
  Internal(String),
}

impl ZmqError {
  /// True for conditions that resolve by themselves on a later loop iteration.
  pub fn is_transient(&self) -> bool {
    match self {
      ZmqError::WouldBlock | ZmqError::Interrupted => true,
      ZmqError::Io(e) => matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted),
      _ => false,
    }
  }

  /// The errno a C caller of libzmq would have seen for this error.
  pub fn errno(&self) -> i32 {
    match self {
      ZmqError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
      ZmqError::InvalidArgument(_) | ZmqError::InvalidOption(_) | ZmqError::InvalidOptionValue(_) => libc::EINVAL,
      ZmqError::WouldBlock | ZmqError::ResourceLimitReached => libc::EAGAIN,
      ZmqError::Interrupted => libc::EINTR,
      ZmqError::Terminated => ETERM,
      ZmqError::Closed => libc::ENOTSOCK,
      ZmqError::AddrInUse(_) => libc::EADDRINUSE,
      ZmqError::ConnectionRefused(_) => libc::ECONNREFUSED,
      ZmqError::InvalidEndpoint(_) => libc::EINVAL,
      ZmqError::UnsupportedTransport(_) => libc::EPROTONOSUPPORT,
      ZmqError::InvalidSocketType(_) => libc::ENOTSUP,
      ZmqError::InvalidState(_) => EFSM,
      ZmqError::Internal(_) => libc::EFAULT,
    }
  }

  /// Maps an OS-level error, folding the transient kinds onto their dedicated variants.
  pub fn from_io(e: io::Error) -> Self {
    match e.kind() {
      io::ErrorKind::WouldBlock => ZmqError::WouldBlock,
      io::ErrorKind::Interrupted => ZmqError::Interrupted,
      _ => ZmqError::Io(e),
    }
  }

  pub fn from_io_endpoint(e: io::Error, endpoint: &str) -> Self {
    match e.kind() {
      io::ErrorKind::AddrInUse => ZmqError::AddrInUse(endpoint.to_string()),
      io::ErrorKind::ConnectionRefused => ZmqError::ConnectionRefused(endpoint.to_string()),
      _ => ZmqError::from_io(e),
    }
  }
}
