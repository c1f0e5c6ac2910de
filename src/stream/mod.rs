// src/stream/mod.rs

//! Queued, callback-driven send/receive on top of a [`ReadinessBridge`].

mod queue;

use queue::{OutboundQueue, QueuedSend};

use crate::error::ZmqError;
use crate::message::Msg;
use crate::poll::{panic_message, BridgeCallback, BridgeConfig, ReadinessBridge};
use crate::runtime::{Reactor, Ready};
use crate::socket::{MessageSocket, RecvOptions, SendOptions, SendStatus};

use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

/// Receives every message read by the stream, or the error that interrupted reading.
pub type ReadCallback<S> = Box<dyn FnMut(&MessageStream<S>, Result<Vec<Msg>, ZmqError>)>;

/// Invoked once per queued send with the frames and the outcome of the send.
pub type CompletionCallback<S> = Box<dyn FnOnce(&MessageStream<S>, Vec<Msg>, Result<SendStatus, ZmqError>)>;

/// Configuration for a [`MessageStream`].
#[derive(Debug, Clone, Default)]
pub struct StreamConfig {
  pub bridge: BridgeConfig,
  /// Maximum number of queued sends. `None` leaves the queue unbounded.
  pub max_queued: Option<usize>,
}

impl StreamConfig {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_bridge(mut self, bridge: BridgeConfig) -> Self {
    self.bridge = bridge;
    self
  }

  pub fn with_max_queued(mut self, max_queued: usize) -> Self {
    self.max_queued = Some(max_queued);
    self
  }
}

struct ReadSubscription<S: MessageSocket + 'static> {
  /// `None` while the callback runs.
  callback: Option<ReadCallback<S>>,
  options: RecvOptions,
}

struct StreamState<S: MessageSocket + 'static> {
  requested: Ready,
  queue: OutboundQueue<CompletionCallback<S>>,
  read: Option<ReadSubscription<S>>,
  /// Set by `stop()`, cleared by `start()`/`start_read()`. Writes queue without resuming delivery.
  paused: bool,
  /// A send is in progress; `flush` must not recurse into it.
  sending: bool,
  closed: bool,
}

struct StreamInner<S: MessageSocket + 'static> {
  socket: Rc<S>,
  bridge: ReadinessBridge<S>,
  state: RefCell<StreamState<S>>,
}

/// Result of one attempt to send the head of the queue.
enum SendAttempt {
  Sent,
  Blocked,
  Empty,
}

/// Non-blocking, queued multipart messaging over a [`MessageSocket`].
///
/// Reads are delivered to the callback given to [`start_read`](Self::start_read).
/// Writes are queued and drained one entry per writable notification, in
/// insertion order. The stream is a cheap `Rc` handle and must be closed
/// explicitly.
pub struct MessageStream<S: MessageSocket + 'static> {
  inner: Rc<StreamInner<S>>,
}

impl<S: MessageSocket + 'static> Clone for MessageStream<S> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl<S: MessageSocket + 'static> MessageStream<S> {
  pub fn new<R>(reactor: R, socket: Rc<S>) -> Result<Self, ZmqError>
  where
    R: Reactor + 'static,
  {
    Self::with_config(reactor, socket, StreamConfig::default())
  }

  pub fn with_config<R>(reactor: R, socket: Rc<S>, config: StreamConfig) -> Result<Self, ZmqError>
  where
    R: Reactor + 'static,
  {
    let bridge = ReadinessBridge::with_reactor(Rc::new(reactor), socket.clone(), config.bridge)?;
    Ok(Self {
      inner: Rc::new(StreamInner {
        socket,
        bridge,
        state: RefCell::new(StreamState {
          requested: Ready::empty(),
          queue: OutboundQueue::new(config.max_queued),
          read: None,
          paused: false,
          sending: false,
          closed: false,
        }),
      }),
    })
  }

  // --- Reading ---

  /// Delivers every message received from now on to `callback`.
  ///
  /// Calling it again while reading replaces the callback and options. Always
  /// resumes event delivery, also after [`stop`](Self::stop).
  pub fn start_read<F>(&self, callback: F, options: RecvOptions) -> Result<(), ZmqError>
  where
    F: FnMut(&MessageStream<S>, Result<Vec<Msg>, ZmqError>) + 'static,
  {
    let previous = {
      let mut state = self.inner.state.borrow_mut();
      if state.closed {
        return Err(ZmqError::Closed);
      }
      state.requested |= Ready::READABLE;
      state.paused = false;
      state.read.replace(ReadSubscription {
        callback: Some(Box::new(callback)),
        options,
      })
    };
    drop(previous);
    tracing::debug!(?options, "Stream read started");
    self.restart_bridge()
  }

  /// Stops reading. Queued writes keep draining.
  pub fn stop_read(&self) -> Result<(), ZmqError> {
    let previous = {
      let mut state = self.inner.state.borrow_mut();
      if state.closed {
        return Err(ZmqError::Closed);
      }
      state.requested.remove(Ready::READABLE);
      state.read.take()
    };
    drop(previous);
    tracing::debug!("Stream read stopped");
    self.apply_interest()
  }

  pub fn is_reading(&self) -> bool {
    self.inner.state.borrow().read.is_some()
  }

  // --- Writing ---

  /// Queues a single-frame message with default options.
  pub fn write(&self, frame: impl Into<Msg>) -> Result<(), ZmqError> {
    self.enqueue(vec![frame.into()], SendOptions::default(), None)
  }

  /// Queues a single-frame message; `callback` learns the outcome of the send.
  pub fn write_with<F>(&self, frame: impl Into<Msg>, options: SendOptions, callback: F) -> Result<(), ZmqError>
  where
    F: FnOnce(&MessageStream<S>, Vec<Msg>, Result<SendStatus, ZmqError>) + 'static,
  {
    self.enqueue(vec![frame.into()], options, Some(Box::new(callback)))
  }

  /// Queues a multipart message with default options.
  pub fn write_multipart<I>(&self, frames: I) -> Result<(), ZmqError>
  where
    I: IntoIterator,
    I::Item: Into<Msg>,
  {
    self.enqueue(frames.into_iter().map(Into::into).collect(), SendOptions::default(), None)
  }

  /// Queues a multipart message; `callback` learns the outcome of the send.
  pub fn write_multipart_with<I, F>(&self, frames: I, options: SendOptions, callback: F) -> Result<(), ZmqError>
  where
    I: IntoIterator,
    I::Item: Into<Msg>,
    F: FnOnce(&MessageStream<S>, Vec<Msg>, Result<SendStatus, ZmqError>) + 'static,
  {
    self.enqueue(
      frames.into_iter().map(Into::into).collect(),
      options,
      Some(Box::new(callback)),
    )
  }

  fn enqueue(&self, frames: Vec<Msg>, options: SendOptions, callback: Option<CompletionCallback<S>>) -> Result<(), ZmqError> {
    let enable = {
      let mut state = self.inner.state.borrow_mut();
      if state.closed {
        return Err(ZmqError::Closed);
      }
      if frames.is_empty() {
        return Err(ZmqError::InvalidArgument("cannot queue an empty multipart message".into()));
      }
      state.queue.push_back(QueuedSend {
        frames,
        options,
        callback,
      })?;
      tracing::trace!(queued = state.queue.len(), "Message queued");
      let enable = !state.requested.contains(Ready::WRITABLE);
      state.requested |= Ready::WRITABLE;
      enable && !state.paused
    };
    if enable {
      self.restart_bridge()?;
    }
    Ok(())
  }

  /// Sends queued messages right away, bypassing the event loop, until the
  /// queue is empty or the socket has no capacity left.
  ///
  /// Does nothing when called from inside a send in progress.
  pub fn flush(&self) -> Result<(), ZmqError> {
    {
      let state = self.inner.state.borrow();
      if state.closed {
        return Err(ZmqError::Closed);
      }
      if state.sending {
        return Ok(());
      }
    }
    let mut sent = 0usize;
    while let SendAttempt::Sent = self.send_one() {
      sent += 1;
    }
    tracing::trace!(sent, queued = self.queued(), "Stream flushed");
    self.drop_writable_if_drained()
  }

  /// Number of sends still queued.
  pub fn queued(&self) -> usize {
    self.inner.state.borrow().queue.len()
  }

  // --- Lifecycle ---

  /// Suspends event delivery. The queue and the read subscription are kept.
  pub fn stop(&self) -> Result<(), ZmqError> {
    {
      let mut state = self.inner.state.borrow_mut();
      if state.closed {
        return Err(ZmqError::Closed);
      }
      state.paused = true;
    }
    self.inner.bridge.stop()
  }

  /// Resumes event delivery after [`stop`](Self::stop) with the current interest.
  pub fn start(&self) -> Result<(), ZmqError> {
    {
      let mut state = self.inner.state.borrow_mut();
      if state.closed {
        return Err(ZmqError::Closed);
      }
      state.paused = false;
    }
    self.apply_interest()
  }

  /// Closes the stream and its bridge. Queued sends are discarded.
  ///
  /// The socket itself stays open; it belongs to the caller.
  pub fn close(&self) -> Result<(), ZmqError> {
    let (dropped, read) = {
      let mut state = self.inner.state.borrow_mut();
      if state.closed {
        return Err(ZmqError::Closed);
      }
      state.closed = true;
      state.requested = Ready::empty();
      (state.queue.clear(), state.read.take())
    };
    if !dropped.is_empty() {
      tracing::debug!(dropped = dropped.len(), "Discarding queued sends on close");
    }
    drop(dropped);
    drop(read);
    match self.inner.bridge.close() {
      // A terminated context already closed the bridge.
      Ok(()) | Err(ZmqError::Closed) => {}
      Err(e) => return Err(e),
    }
    tracing::debug!("Stream closed");
    Ok(())
  }

  /// True after [`close`](Self::close), and once a terminated context closed the bridge.
  ///
  /// A stream closed by termination still accepts one `close()` to drop its queue.
  pub fn is_closed(&self) -> bool {
    self.inner.state.borrow().closed || self.inner.bridge.is_closed()
  }

  // --- Pass-through ---

  pub fn socket(&self) -> &Rc<S> {
    &self.inner.socket
  }

  pub fn bind(&self, endpoint: &str) -> Result<(), ZmqError> {
    self.check_open()?;
    self.inner.socket.bind(endpoint)
  }

  pub fn connect(&self, endpoint: &str) -> Result<(), ZmqError> {
    self.check_open()?;
    self.inner.socket.connect(endpoint)
  }

  pub fn set_option(&self, option: i32, value: &[u8]) -> Result<(), ZmqError> {
    self.check_open()?;
    self.inner.socket.set_option(option, value)
  }

  pub fn get_option(&self, option: i32) -> Result<Vec<u8>, ZmqError> {
    self.check_open()?;
    self.inner.socket.get_option(option)
  }

  fn check_open(&self) -> Result<(), ZmqError> {
    if self.inner.state.borrow().closed {
      return Err(ZmqError::Closed);
    }
    Ok(())
  }

  // --- Bridge plumbing ---

  fn handler(&self) -> BridgeCallback<S> {
    let weak: Weak<StreamInner<S>> = Rc::downgrade(&self.inner);
    Box::new(move |_bridge: &ReadinessBridge<S>, mask: Ready, error: Option<ZmqError>| {
      if let Some(inner) = weak.upgrade() {
        MessageStream { inner }.on_events(mask, error);
      }
    })
  }

  /// (Re)starts the bridge with the current interest.
  fn restart_bridge(&self) -> Result<(), ZmqError> {
    let requested = self.inner.state.borrow().requested;
    if requested.is_empty() {
      return Ok(());
    }
    self.inner.bridge.start_boxed(requested, self.handler())
  }

  /// Pushes a changed interest to the bridge without overriding `stop()`.
  fn apply_interest(&self) -> Result<(), ZmqError> {
    let (requested, paused) = {
      let state = self.inner.state.borrow();
      (state.requested, state.paused)
    };
    if requested.is_empty() {
      self.inner.bridge.stop()
    } else if paused {
      Ok(())
    } else {
      self.inner.bridge.start_boxed(requested, self.handler())
    }
  }

  fn drop_writable_if_drained(&self) -> Result<(), ZmqError> {
    {
      let mut state = self.inner.state.borrow_mut();
      if state.closed || !state.queue.is_empty() || !state.requested.contains(Ready::WRITABLE) {
        return Ok(());
      }
      state.requested.remove(Ready::WRITABLE);
    }
    tracing::trace!("Outbound queue drained, dropping writable interest");
    self.apply_interest()
  }

  fn on_events(&self, mask: Ready, error: Option<ZmqError>) {
    if let Some(error) = error {
      if self.is_reading() {
        self.deliver_read(Err(error));
      } else {
        tracing::error!(error = %error, "Stream readiness failed with no reader to notify");
      }
      return;
    }

    if mask.contains(Ready::READABLE) && self.inner.bridge.is_active() {
      self.handle_read();
    }
    if mask.contains(Ready::WRITABLE) && self.inner.bridge.is_active() && !self.is_closed() {
      match self.send_one() {
        SendAttempt::Sent | SendAttempt::Empty => {
          if let Err(e) = self.drop_writable_if_drained() {
            tracing::warn!(error = %e, "Updating stream interest failed");
          }
        }
        SendAttempt::Blocked => {}
      }
    }
  }

  fn handle_read(&self) {
    let options = match &self.inner.state.borrow().read {
      Some(subscription) => subscription.options,
      None => return,
    };
    match self.inner.socket.recv_multipart(options) {
      Ok(frames) => {
        tracing::trace!(frames = frames.len(), "Stream received message");
        self.deliver_read(Ok(frames));
      }
      Err(e) if e.is_transient() => {
        tracing::trace!(error = %e, "Spurious readable notification");
      }
      Err(e) => {
        tracing::error!(error = %e, "Stream receive failed");
        self.deliver_read(Err(e));
      }
    }
  }

  fn deliver_read(&self, result: Result<Vec<Msg>, ZmqError>) {
    let taken = self
      .inner
      .state
      .borrow_mut()
      .read
      .as_mut()
      .and_then(|subscription| subscription.callback.take());
    let Some(mut callback) = taken else {
      return;
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(self, result)));
    if let Err(payload) = outcome {
      tracing::error!(panic = panic_message(payload.as_ref()), "Read callback panicked");
    }

    // Put it back unless the callback replaced or dropped the subscription.
    let mut state = self.inner.state.borrow_mut();
    if let Some(subscription) = state.read.as_mut() {
      if subscription.callback.is_none() {
        subscription.callback = Some(callback);
      }
    }
  }

  /// Sends the head of the queue. A transient failure puts it back at the head.
  fn send_one(&self) -> SendAttempt {
    let entry = {
      let mut state = self.inner.state.borrow_mut();
      if state.sending {
        return SendAttempt::Blocked;
      }
      match state.queue.pop_front() {
        Some(entry) => {
          state.sending = true;
          entry
        }
        None => return SendAttempt::Empty,
      }
    };

    let result = self.inner.socket.send_multipart(&entry.frames, entry.options);
    let mut state = self.inner.state.borrow_mut();
    state.sending = false;
    match result {
      Err(e) if e.is_transient() => {
        tracing::trace!(queued = state.queue.len() + 1, "Send would block, keeping message queued");
        state.queue.requeue(entry);
        SendAttempt::Blocked
      }
      result => {
        drop(state);
        if let Err(e) = &result {
          tracing::error!(error = %e, "Stream send failed");
        }
        self.complete(entry, result);
        SendAttempt::Sent
      }
    }
  }

  fn complete(&self, entry: QueuedSend<CompletionCallback<S>>, result: Result<SendStatus, ZmqError>) {
    let QueuedSend { frames, callback, .. } = entry;
    let Some(callback) = callback else {
      return;
    };
    self.inner.state.borrow_mut().sending = true;
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(self, frames, result)));
    self.inner.state.borrow_mut().sending = false;
    if let Err(payload) = outcome {
      tracing::error!(panic = panic_message(payload.as_ref()), "Send completion callback panicked");
    }
  }
}

impl<S: MessageSocket + 'static> fmt::Debug for MessageStream<S> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.inner.state.borrow();
    f.debug_struct("MessageStream")
      .field("requested", &state.requested)
      .field("queued", &state.queue.len())
      .field("reading", &state.read.is_some())
      .field("closed", &state.closed)
      .finish()
  }
}
