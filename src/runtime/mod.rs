// src/runtime/mod.rs

//! The host event loop seam.
//!
//! [`Reactor`] is the small set of loop primitives the readiness bridge needs:
//! descriptor watches, timers and a next-iteration hook. [`EventLoop`] is the
//! bundled single-threaded implementation on top of `mio`; any other callback
//! loop can be plugged in by implementing the trait.

mod event_loop;

pub use event_loop::EventLoop;

use crate::error::ZmqError;
use bitflags::bitflags;
use std::os::fd::RawFd;
use std::time::Duration;

bitflags! {
    /// Normalized readiness mask shared by the loop, the bridge and the stream.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Ready: u8 {
        const READABLE = 0b01;
        const WRITABLE = 0b10;
    }
}

/// Handle of a descriptor watch registered with a [`Reactor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub(crate) usize);

/// Handle of a timer registered with a [`Reactor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub(crate) usize);

impl WatchId {
  pub fn new(raw: usize) -> Self {
    WatchId(raw)
  }
  pub fn as_usize(&self) -> usize {
    self.0
  }
}

impl TimerId {
  pub fn new(raw: usize) -> Self {
    TimerId(raw)
  }
  pub fn as_usize(&self) -> usize {
    self.0
  }
}

/// Invoked with the readiness the OS reported for the watched descriptor.
pub type WatchCallback = Box<dyn FnMut(Ready)>;
/// Invoked each time a timer expires.
pub type TimerCallback = Box<dyn FnMut()>;
/// Invoked once on the next loop iteration.
pub type SoonCallback = Box<dyn FnOnce()>;

/// Host loop primitives consumed by [`crate::poll::ReadinessBridge`].
///
/// All methods take `&self` and must tolerate being called from inside a
/// callback the loop is currently running, including for the handle whose
/// callback is executing.
pub trait Reactor {
  /// Starts watching `fd`. An empty `interest` creates the watch paused.
  fn register_watch(&self, fd: RawFd, interest: Ready, callback: WatchCallback) -> Result<WatchId, ZmqError>;

  /// Changes the interest of an existing watch in place. Empty interest pauses it.
  fn update_watch(&self, id: WatchId, interest: Ready) -> Result<(), ZmqError>;

  fn unregister_watch(&self, id: WatchId) -> Result<(), ZmqError>;

  /// Arms a timer firing after `interval`, and then every `interval` when `repeat` is set.
  fn register_timer(&self, interval: Duration, repeat: bool, callback: TimerCallback) -> TimerId;

  /// Re-arms (`Some`) or disarms (`None`) a timer without releasing its handle.
  fn update_timer(&self, id: TimerId, interval: Option<Duration>) -> Result<(), ZmqError>;

  fn unregister_timer(&self, id: TimerId) -> Result<(), ZmqError>;

  /// Runs `callback` on the next loop iteration without blocking in the OS poll first.
  fn call_soon(&self, callback: SoonCallback);
}
