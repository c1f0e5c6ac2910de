// src/poll/mod.rs

//! Bridges a message socket's readiness into a host event loop.
//!
//! The OS-visible descriptor of a message socket only says "something may have
//! changed". [`ReadinessBridge`] therefore never trusts the loop's notification
//! directly: on every wake it re-reads the socket's `EVENTS` state and hands the
//! derived readable/writable mask to its callback.

mod strategy;

pub use strategy::{BridgeConfig, PollStrategy, DEFAULT_POLL_INTERVAL};

use crate::error::ZmqError;
use crate::runtime::{Reactor, Ready, TimerId, WatchId};
use crate::socket::{MessageSocket, PollEvents};

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::os::fd::RawFd;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::time::Duration;

/// Event handler of a bridge: `(bridge, mask, error)`.
///
/// `error` is `Some` only for failures of the readiness check itself, in which
/// case the mask is empty.
pub type BridgeCallback<S> = Box<dyn FnMut(&ReadinessBridge<S>, Ready, Option<ZmqError>)>;

/// Where the bridge gets its wakeups from, resolved once from the [`PollStrategy`].
#[derive(Debug, Clone, Copy)]
enum Backend {
  Descriptor(RawFd),
  Timer(Duration),
}

#[derive(Debug, Clone, Copy)]
enum Registration {
  Watch(WatchId),
  Timer(TimerId),
}

struct BridgeState<S: MessageSocket + 'static> {
  registration: Option<Registration>,
  requested: Ready,
  /// `None` while the callback runs and after close.
  callback: Option<BridgeCallback<S>>,
  active: bool,
  closed: bool,
  /// A `call_soon` re-check is queued with the reactor.
  recheck_pending: bool,
}

struct BridgeInner<S: MessageSocket + 'static> {
  reactor: Rc<dyn Reactor>,
  socket: Rc<S>,
  backend: Backend,
  state: RefCell<BridgeState<S>>,
}

/// Forwards normalized readiness of one [`MessageSocket`] to a single callback.
///
/// The bridge is a cheap handle; clones refer to the same registration. It must
/// be released with [`ReadinessBridge::close`]. Dropping the last handle of an
/// unclosed bridge releases the registration as well.
pub struct ReadinessBridge<S: MessageSocket + 'static> {
  inner: Rc<BridgeInner<S>>,
}

impl<S: MessageSocket + 'static> Clone for ReadinessBridge<S> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

/// Maps libzmq-style event bits onto the loop's readiness mask.
pub(crate) fn readiness_from_events(events: PollEvents) -> Ready {
  let mut ready = Ready::empty();
  if events.contains(PollEvents::POLLIN) {
    ready |= Ready::READABLE;
  }
  if events.contains(PollEvents::POLLOUT) {
    ready |= Ready::WRITABLE;
  }
  ready
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
  if let Some(msg) = payload.downcast_ref::<&'static str>() {
    *msg
  } else if let Some(msg) = payload.downcast_ref::<String>() {
    msg.as_str()
  } else {
    "<non-string panic payload>"
  }
}

impl<S: MessageSocket + 'static> ReadinessBridge<S> {
  /// Creates an inactive bridge. Nothing is registered with `reactor` until [`start`](Self::start).
  ///
  /// Fails with `InvalidArgument` when the strategy asks for a descriptor the
  /// socket does not have, or for a zero timer interval.
  pub fn new<R>(reactor: R, socket: Rc<S>, config: BridgeConfig) -> Result<Self, ZmqError>
  where
    R: Reactor + 'static,
  {
    Self::with_reactor(Rc::new(reactor), socket, config)
  }

  pub(crate) fn with_reactor(reactor: Rc<dyn Reactor>, socket: Rc<S>, config: BridgeConfig) -> Result<Self, ZmqError> {
    let backend = match config.strategy {
      PollStrategy::Descriptor => Backend::Descriptor(
        socket
          .descriptor()
          .ok_or_else(|| ZmqError::InvalidArgument("socket has no readiness descriptor".into()))?,
      ),
      PollStrategy::Timer(interval) => Backend::Timer(interval),
      PollStrategy::Auto => match socket.descriptor() {
        Some(fd) => Backend::Descriptor(fd),
        None => Backend::Timer(DEFAULT_POLL_INTERVAL),
      },
    };
    if let Backend::Timer(interval) = backend {
      if interval.is_zero() {
        return Err(ZmqError::InvalidArgument("poll interval must be non-zero".into()));
      }
    }
    tracing::debug!(?backend, "Readiness bridge created");

    Ok(Self {
      inner: Rc::new(BridgeInner {
        reactor,
        socket,
        backend,
        state: RefCell::new(BridgeState {
          registration: None,
          requested: Ready::empty(),
          callback: None,
          active: false,
          closed: false,
          recheck_pending: false,
        }),
      }),
    })
  }

  /// Requests `mask` and (re)activates the bridge with `callback`.
  ///
  /// The first call registers with the reactor; later calls, whether the bridge
  /// is running or stopped, update that registration in place.
  pub fn start<F>(&self, mask: Ready, callback: F) -> Result<(), ZmqError>
  where
    F: FnMut(&ReadinessBridge<S>, Ready, Option<ZmqError>) + 'static,
  {
    self.start_boxed(mask, Box::new(callback))
  }

  pub(crate) fn start_boxed(&self, mask: Ready, callback: BridgeCallback<S>) -> Result<(), ZmqError> {
    if self.inner.state.borrow().closed {
      return Err(ZmqError::Closed);
    }
    if mask.is_empty() {
      return Err(ZmqError::InvalidArgument("readiness mask must not be empty".into()));
    }

    self.inner.arm()?;
    let previous = {
      let mut state = self.inner.state.borrow_mut();
      state.requested = mask;
      state.active = true;
      state.callback.replace(callback)
    };
    drop(previous);
    tracing::trace!(?mask, "Readiness bridge started");
    // The descriptor may already have been drained while pending state remains.
    self.inner.schedule_recheck();
    Ok(())
  }

  /// Suspends event delivery. The registration is kept for the next `start`.
  pub fn stop(&self) -> Result<(), ZmqError> {
    let registration = {
      let mut state = self.inner.state.borrow_mut();
      if state.closed {
        return Err(ZmqError::Closed);
      }
      if !state.active {
        return Ok(());
      }
      state.active = false;
      state.registration
    };
    match registration {
      Some(Registration::Watch(id)) => self.inner.reactor.update_watch(id, Ready::empty())?,
      Some(Registration::Timer(id)) => self.inner.reactor.update_timer(id, None)?,
      None => {}
    }
    tracing::trace!("Readiness bridge stopped");
    Ok(())
  }

  /// Releases the registration for good. Every later call fails with `Closed`.
  pub fn close(&self) -> Result<(), ZmqError> {
    self.inner.teardown()
  }

  /// Like [`close`](Self::close), then invokes `on_closed` with the closed bridge.
  pub fn close_with<F>(&self, on_closed: F) -> Result<(), ZmqError>
  where
    F: FnOnce(&ReadinessBridge<S>),
  {
    self.inner.teardown()?;
    on_closed(self);
    Ok(())
  }

  pub fn is_active(&self) -> bool {
    self.inner.state.borrow().active
  }

  pub fn is_closed(&self) -> bool {
    self.inner.state.borrow().closed
  }

  /// The mask of the most recent `start`.
  pub fn requested(&self) -> Ready {
    self.inner.state.borrow().requested
  }

  pub fn socket(&self) -> &Rc<S> {
    &self.inner.socket
  }
}

impl<S: MessageSocket + 'static> BridgeInner<S> {
  /// Creates the registration, or re-enables the existing one.
  fn arm(self: &Rc<Self>) -> Result<(), ZmqError> {
    let existing = self.state.borrow().registration;
    match (existing, self.backend) {
      (Some(Registration::Watch(id)), _) => self.reactor.update_watch(id, Ready::READABLE),
      (Some(Registration::Timer(id)), Backend::Timer(interval)) => self.reactor.update_timer(id, Some(interval)),
      (Some(Registration::Timer(_)), Backend::Descriptor(_)) => {
        Err(ZmqError::Internal("timer registration on a descriptor bridge".into()))
      }
      (None, Backend::Descriptor(fd)) => {
        let weak = Rc::downgrade(self);
        let id = self.reactor.register_watch(
          fd,
          Ready::READABLE,
          Box::new(move |reported| {
            if let Some(inner) = weak.upgrade() {
              inner.poll_once(reported);
            }
          }),
        )?;
        tracing::debug!(fd, watch_id = id.as_usize(), "Readiness bridge watching descriptor");
        self.state.borrow_mut().registration = Some(Registration::Watch(id));
        Ok(())
      }
      (None, Backend::Timer(interval)) => {
        let weak: Weak<Self> = Rc::downgrade(self);
        let id = self.reactor.register_timer(
          interval,
          true,
          Box::new(move || {
            if let Some(inner) = weak.upgrade() {
              inner.poll_once(Ready::empty());
            }
          }),
        );
        tracing::debug!(?interval, timer_id = id.as_usize(), "Readiness bridge polling on a timer");
        self.state.borrow_mut().registration = Some(Registration::Timer(id));
        Ok(())
      }
    }
  }

  /// Re-derives the socket's readiness and dispatches it. `reported` is what the
  /// loop saw on the descriptor, empty for timer and re-check passes.
  fn poll_once(self: &Rc<Self>, reported: Ready) {
    {
      let state = self.state.borrow();
      if state.closed || !state.active {
        return;
      }
    }

    let events = match self.socket.events() {
      Ok(events) => events,
      Err(ZmqError::Interrupted) => {
        tracing::trace!("Readiness check interrupted, retrying on the next wake");
        return;
      }
      Err(ZmqError::Terminated) => {
        self.terminate();
        return;
      }
      Err(e) => {
        tracing::error!(error = %e, "Reading socket events failed");
        self.dispatch(Ready::empty(), Some(e));
        return;
      }
    };

    let requested = self.state.borrow().requested;
    let derived = readiness_from_events(events) & requested;
    let mask = if derived.is_empty() { reported } else { derived };
    if mask.is_empty() {
      tracing::trace!(?events, "No requested readiness pending");
      return;
    }

    tracing::trace!(?mask, ?events, "Dispatching readiness");
    self.dispatch(mask, None);
    self.schedule_recheck();
  }

  /// The edge-like descriptor stays quiet while state is still pending, so pending
  /// readiness is re-checked on the next loop iteration.
  fn schedule_recheck(self: &Rc<Self>) {
    if !matches!(self.backend, Backend::Descriptor(_)) {
      return;
    }
    {
      let mut state = self.state.borrow_mut();
      if state.recheck_pending || state.closed || !state.active {
        return;
      }
      state.recheck_pending = true;
    }
    let weak = Rc::downgrade(self);
    self.reactor.call_soon(Box::new(move || {
      if let Some(inner) = weak.upgrade() {
        inner.state.borrow_mut().recheck_pending = false;
        inner.poll_once(Ready::empty());
      }
    }));
  }

  fn dispatch(self: &Rc<Self>, mask: Ready, error: Option<ZmqError>) {
    let Some(mut callback) = self.state.borrow_mut().callback.take() else {
      return;
    };
    let bridge = ReadinessBridge { inner: self.clone() };
    invoke_guarded(&mut callback, &bridge, mask, error);

    // The callback may have restarted (new callback) or closed the bridge.
    let mut state = self.state.borrow_mut();
    if !state.closed && state.callback.is_none() {
      state.callback = Some(callback);
    }
  }

  /// The context is shutting down: close, then tell the callback once.
  fn terminate(self: &Rc<Self>) {
    tracing::debug!("Socket context terminated, closing readiness bridge");
    let callback = self.state.borrow_mut().callback.take();
    if let Err(e) = self.teardown() {
      tracing::warn!(error = %e, "Closing terminated readiness bridge failed");
    }
    if let Some(mut callback) = callback {
      let bridge = ReadinessBridge { inner: self.clone() };
      invoke_guarded(&mut callback, &bridge, Ready::empty(), Some(ZmqError::Terminated));
    }
  }

  fn teardown(&self) -> Result<(), ZmqError> {
    let (registration, callback) = {
      let mut state = self.state.borrow_mut();
      if state.closed {
        return Err(ZmqError::Closed);
      }
      state.closed = true;
      state.active = false;
      (state.registration.take(), state.callback.take())
    };
    // Dropped outside the borrow: the callback may own the last handle of something that uses us.
    drop(callback);
    self.release(registration)?;
    tracing::debug!("Readiness bridge closed");
    Ok(())
  }

  fn release(&self, registration: Option<Registration>) -> Result<(), ZmqError> {
    match registration {
      Some(Registration::Watch(id)) => self.reactor.unregister_watch(id),
      Some(Registration::Timer(id)) => self.reactor.unregister_timer(id),
      None => Ok(()),
    }
  }
}

impl<S: MessageSocket + 'static> Drop for BridgeInner<S> {
  fn drop(&mut self) {
    let state = self.state.get_mut();
    if state.closed {
      return;
    }
    let registration = state.registration.take();
    if registration.is_some() {
      tracing::debug!("Readiness bridge dropped without close, releasing registration");
      if let Err(e) = self.release(registration) {
        tracing::warn!(error = %e, "Releasing dropped bridge registration failed");
      }
    }
  }
}

fn invoke_guarded<S: MessageSocket + 'static>(
  callback: &mut BridgeCallback<S>,
  bridge: &ReadinessBridge<S>,
  mask: Ready,
  error: Option<ZmqError>,
) {
  let result = panic::catch_unwind(AssertUnwindSafe(|| callback(bridge, mask, error)));
  if let Err(payload) = result {
    tracing::error!(panic = panic_message(payload.as_ref()), "Readiness callback panicked");
  }
}

impl<S: MessageSocket + 'static> fmt::Debug for ReadinessBridge<S> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.inner.state.borrow();
    f.debug_struct("ReadinessBridge")
      .field("backend", &self.inner.backend)
      .field("requested", &state.requested)
      .field("active", &state.active)
      .field("closed", &state.closed)
      .finish()
  }
}
