//! rzmq_loop - drive ZeroMQ-style message sockets from a single-threaded callback event loop.
//!
//! Two layers sit between a [`MessageSocket`] and a [`Reactor`]:
//!
//! - [`ReadinessBridge`] turns wakeups of the socket's descriptor (or of a
//!   polling timer) into the socket's true readable/writable state.
//! - [`MessageStream`] uses a bridge to receive multipart messages into a
//!   callback and to drain a FIFO of queued sends.
//!
//! [`EventLoop`] is a ready-to-use `mio` reactor and, with the `inproc` feature,
//! [`Context`] creates in-process REQ/REP/PUB/SUB/PUSH/PULL sockets to drive.

pub mod error;
pub mod message;
pub mod poll;
pub mod runtime;
pub mod socket;
pub mod stream;

#[cfg(feature = "inproc")]
pub mod context;
#[cfg(feature = "inproc")]
pub(crate) mod transport;

// Re-export core types for user convenience
pub use error::ZmqError;
pub use message::{MessageTracker, Msg, MsgFlags, Multipart};
pub use poll::{BridgeConfig, PollStrategy, ReadinessBridge};
pub use runtime::{EventLoop, Reactor, Ready};
pub use socket::{MessageSocket, PollEvents, RecvOptions, SendOptions, SendStatus, SocketType};
pub use stream::{MessageStream, StreamConfig};

#[cfg(feature = "inproc")]
pub use context::Context;
#[cfg(feature = "inproc")]
pub use socket::Socket;

// --- Top-Level Functions ---

const VERSION_MAJOR: i32 = 0;
const VERSION_MINOR: i32 = 1;
const VERSION_PATCH: i32 = 0;

/// Returns the library version as a tuple (major, minor, patch).
pub fn version() -> (i32, i32, i32) {
  (VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH)
}

/// Returns the major version number of the library.
pub fn version_major() -> i32 {
  VERSION_MAJOR
}

/// Returns the minor version number of the library.
pub fn version_minor() -> i32 {
  VERSION_MINOR
}

/// Returns the patch version number of the library.
pub fn version_patch() -> i32 {
  VERSION_PATCH
}
