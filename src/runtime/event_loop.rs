// src/runtime/event_loop.rs

use crate::error::ZmqError;
use crate::runtime::{Reactor, Ready, SoonCallback, TimerCallback, TimerId, WatchCallback, WatchId};

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Default capacity of the OS event buffer filled by one poll.
const DEFAULT_EVENT_CAPACITY: usize = 256;

struct WatchEntry {
  fd: RawFd,
  interest: Ready,
  /// Whether the descriptor is currently registered with mio (mio rejects empty interest).
  registered: bool,
  /// `None` while the callback is executing.
  callback: Option<WatchCallback>,
}

struct TimerEntry {
  interval: Duration,
  repeat: bool,
  deadline: Option<Instant>,
  /// Unreferenced timers do not keep `run()` going on their own.
  referenced: bool,
  /// One-shot timers created by `call_later` release themselves after firing.
  auto_remove: bool,
  callback: Option<TimerCallback>,
}

#[derive(Default)]
struct LoopState {
  next_id: usize,
  watches: HashMap<usize, WatchEntry>,
  timers: HashMap<usize, TimerEntry>,
  soon: VecDeque<SoonCallback>,
  stop_requested: bool,
}

impl LoopState {
  fn allocate_id(&mut self) -> usize {
    self.next_id += 1;
    self.next_id
  }

  fn is_alive(&self) -> bool {
    !self.soon.is_empty()
      || self.watches.values().any(|w| !w.interest.is_empty())
      || self.timers.values().any(|t| t.referenced && t.deadline.is_some())
  }
}

struct LoopInner {
  poll: RefCell<Poll>,
  events: RefCell<Events>,
  state: RefCell<LoopState>,
}

/// A single-threaded, callback-driven event loop.
///
/// Watches, timers and `call_soon` callbacks all run on the thread calling
/// [`EventLoop::run`]. The handle is a cheap `Rc` clone, so callbacks can capture
/// it to register further work or to stop the loop.
#[derive(Clone)]
pub struct EventLoop {
  inner: Rc<LoopInner>,
}

fn to_interest(ready: Ready) -> Option<Interest> {
  match (ready.contains(Ready::READABLE), ready.contains(Ready::WRITABLE)) {
    (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
    (true, false) => Some(Interest::READABLE),
    (false, true) => Some(Interest::WRITABLE),
    (false, false) => None,
  }
}

fn ready_from_event(event: &mio::event::Event) -> Ready {
  let mut ready = Ready::empty();
  if event.is_readable() || event.is_read_closed() || event.is_error() {
    ready |= Ready::READABLE;
  }
  if event.is_writable() || event.is_write_closed() {
    ready |= Ready::WRITABLE;
  }
  ready
}

impl EventLoop {
  pub fn new() -> Result<Self, ZmqError> {
    Self::with_capacity(DEFAULT_EVENT_CAPACITY)
  }

  /// Creates a loop whose OS poll reports at most `capacity` events per iteration.
  pub fn with_capacity(capacity: usize) -> Result<Self, ZmqError> {
    let poll = Poll::new()?;
    tracing::debug!(capacity, "Event loop created");
    Ok(Self {
      inner: Rc::new(LoopInner {
        poll: RefCell::new(poll),
        events: RefCell::new(Events::with_capacity(capacity.max(1))),
        state: RefCell::new(LoopState::default()),
      }),
    })
  }

  /// Runs iterations until nothing keeps the loop alive or [`EventLoop::stop`] is called.
  ///
  /// The loop is alive while a watch has non-empty interest, a referenced timer
  /// is armed, or `call_soon` work is pending.
  pub fn run(&self) -> Result<(), ZmqError> {
    self.inner.state.borrow_mut().stop_requested = false;
    while self.is_alive() {
      self.turn(true)?;
      let mut state = self.inner.state.borrow_mut();
      if state.stop_requested {
        state.stop_requested = false;
        tracing::debug!("Event loop stop requested");
        break;
      }
    }
    Ok(())
  }

  /// Runs exactly one iteration, blocking in the OS poll only while something is alive.
  pub fn run_once(&self) -> Result<(), ZmqError> {
    let may_block = self.is_alive();
    self.turn(may_block)
  }

  /// Runs one iteration without blocking.
  pub fn run_nowait(&self) -> Result<(), ZmqError> {
    self.turn(false)
  }

  /// Makes the current `run()` return once the iteration in progress completes.
  pub fn stop(&self) {
    self.inner.state.borrow_mut().stop_requested = true;
  }

  pub fn is_alive(&self) -> bool {
    self.inner.state.borrow().is_alive()
  }

  /// Runs `callback` once after `delay`.
  pub fn call_later<F>(&self, delay: Duration, callback: F) -> TimerId
  where
    F: FnOnce() + 'static,
  {
    let mut slot = Some(callback);
    self.insert_timer(
      delay,
      false,
      true,
      Box::new(move || {
        if let Some(cb) = slot.take() {
          cb();
        }
      }),
    )
  }

  /// Stops `id` from keeping `run()` alive on its own (libuv's `unref`).
  pub fn unref_timer(&self, id: TimerId) -> Result<(), ZmqError> {
    let mut state = self.inner.state.borrow_mut();
    let timer = state
      .timers
      .get_mut(&id.0)
      .ok_or_else(|| ZmqError::InvalidArgument(format!("unknown timer {}", id.0)))?;
    timer.referenced = false;
    Ok(())
  }

  fn insert_timer(&self, interval: Duration, repeat: bool, auto_remove: bool, callback: TimerCallback) -> TimerId {
    let mut state = self.inner.state.borrow_mut();
    let id = state.allocate_id();
    state.timers.insert(
      id,
      TimerEntry {
        interval,
        repeat,
        deadline: Some(Instant::now() + interval),
        referenced: true,
        auto_remove,
        callback: Some(callback),
      },
    );
    tracing::trace!(timer_id = id, ?interval, repeat, "Timer registered");
    TimerId(id)
  }

  fn next_timeout(&self, may_block: bool) -> Option<Duration> {
    let state = self.inner.state.borrow();
    if !may_block || !state.soon.is_empty() {
      return Some(Duration::ZERO);
    }
    let now = Instant::now();
    state
      .timers
      .values()
      .filter_map(|t| t.deadline)
      .min()
      .map(|deadline| deadline.saturating_duration_since(now))
  }

  fn turn(&self, may_block: bool) -> Result<(), ZmqError> {
    let timeout = self.next_timeout(may_block);

    let fired: Vec<(usize, Ready)> = {
      let mut poll = self.inner.poll.borrow_mut();
      let mut events = self.inner.events.borrow_mut();
      match poll.poll(&mut events, timeout) {
        Ok(()) => events.iter().map(|ev| (ev.token().0, ready_from_event(ev))).collect(),
        Err(e) if e.kind() == io::ErrorKind::Interrupted => {
          tracing::trace!("OS poll interrupted, treating as an empty iteration");
          Vec::new()
        }
        Err(e) => return Err(ZmqError::Io(e)),
      }
    };

    for (id, ready) in fired {
      self.dispatch_watch(id, ready);
    }
    self.fire_due_timers();
    self.run_soon_callbacks();
    Ok(())
  }

  fn dispatch_watch(&self, id: usize, reported: Ready) {
    let taken = {
      let mut state = self.inner.state.borrow_mut();
      match state.watches.get_mut(&id) {
        Some(entry) if !entry.interest.is_empty() => {
          let filtered = reported & entry.interest;
          let ready = if filtered.is_empty() { reported } else { filtered };
          entry.callback.take().map(|cb| (cb, ready))
        }
        _ => None,
      }
    };

    if let Some((mut callback, ready)) = taken {
      callback(ready);
      // The callback may have unregistered its own watch.
      if let Some(entry) = self.inner.state.borrow_mut().watches.get_mut(&id) {
        if entry.callback.is_none() {
          entry.callback = Some(callback);
        }
      }
    }
  }

  fn fire_due_timers(&self) {
    let now = Instant::now();
    let mut due: Vec<(Instant, usize)> = {
      let state = self.inner.state.borrow();
      state
        .timers
        .iter()
        .filter_map(|(id, t)| t.deadline.filter(|d| *d <= now).map(|d| (d, *id)))
        .collect()
    };
    due.sort();

    for (_, id) in due {
      let taken = {
        let mut state = self.inner.state.borrow_mut();
        match state.timers.get_mut(&id) {
          // Re-check: an earlier callback in this batch may have disarmed it.
          Some(timer) if timer.deadline.is_some_and(|d| d <= now) => {
            timer.deadline = if timer.repeat { Some(now + timer.interval) } else { None };
            timer.callback.take().map(|cb| (cb, timer.auto_remove))
          }
          _ => None,
        }
      };

      if let Some((mut callback, auto_remove)) = taken {
        callback();
        let mut state = self.inner.state.borrow_mut();
        if auto_remove {
          state.timers.remove(&id);
        } else if let Some(timer) = state.timers.get_mut(&id) {
          if timer.callback.is_none() {
            timer.callback = Some(callback);
          }
        }
      }
    }
  }

  fn run_soon_callbacks(&self) {
    // Work queued by these callbacks runs on the next iteration.
    let batch = std::mem::take(&mut self.inner.state.borrow_mut().soon);
    for callback in batch {
      callback();
    }
  }
}

impl Reactor for EventLoop {
  fn register_watch(&self, fd: RawFd, interest: Ready, callback: WatchCallback) -> Result<WatchId, ZmqError> {
    let id = self.inner.state.borrow_mut().allocate_id();
    let registered = match to_interest(interest) {
      Some(mio_interest) => {
        self
          .inner
          .poll
          .borrow()
          .registry()
          .register(&mut SourceFd(&fd), Token(id), mio_interest)?;
        true
      }
      None => false,
    };
    self.inner.state.borrow_mut().watches.insert(
      id,
      WatchEntry {
        fd,
        interest,
        registered,
        callback: Some(callback),
      },
    );
    tracing::trace!(watch_id = id, fd, ?interest, "Watch registered");
    Ok(WatchId(id))
  }

  fn update_watch(&self, id: WatchId, interest: Ready) -> Result<(), ZmqError> {
    let mut state = self.inner.state.borrow_mut();
    let entry = state
      .watches
      .get_mut(&id.0)
      .ok_or_else(|| ZmqError::InvalidArgument(format!("unknown watch {}", id.0)))?;
    let poll = self.inner.poll.borrow();
    let registry = poll.registry();
    match (entry.registered, to_interest(interest)) {
      (true, Some(mio_interest)) => registry.reregister(&mut SourceFd(&entry.fd), Token(id.0), mio_interest)?,
      (false, Some(mio_interest)) => {
        registry.register(&mut SourceFd(&entry.fd), Token(id.0), mio_interest)?;
        entry.registered = true;
      }
      (true, None) => {
        registry.deregister(&mut SourceFd(&entry.fd))?;
        entry.registered = false;
      }
      (false, None) => {}
    }
    entry.interest = interest;
    tracing::trace!(watch_id = id.0, ?interest, "Watch updated");
    Ok(())
  }

  fn unregister_watch(&self, id: WatchId) -> Result<(), ZmqError> {
    let entry = self
      .inner
      .state
      .borrow_mut()
      .watches
      .remove(&id.0)
      .ok_or_else(|| ZmqError::InvalidArgument(format!("unknown watch {}", id.0)))?;
    if entry.registered {
      // The descriptor may already be closed by its owner; the kernel dropped it then.
      if let Err(e) = self.inner.poll.borrow().registry().deregister(&mut SourceFd(&entry.fd)) {
        tracing::warn!(watch_id = id.0, fd = entry.fd, error = %e, "Deregistering watch failed");
      }
    }
    tracing::trace!(watch_id = id.0, "Watch unregistered");
    Ok(())
  }

  fn register_timer(&self, interval: Duration, repeat: bool, callback: TimerCallback) -> TimerId {
    self.insert_timer(interval, repeat, false, callback)
  }

  fn update_timer(&self, id: TimerId, interval: Option<Duration>) -> Result<(), ZmqError> {
    let mut state = self.inner.state.borrow_mut();
    let timer = state
      .timers
      .get_mut(&id.0)
      .ok_or_else(|| ZmqError::InvalidArgument(format!("unknown timer {}", id.0)))?;
    match interval {
      Some(interval) => {
        timer.interval = interval;
        timer.deadline = Some(Instant::now() + interval);
      }
      None => timer.deadline = None,
    }
    Ok(())
  }

  fn unregister_timer(&self, id: TimerId) -> Result<(), ZmqError> {
    self
      .inner
      .state
      .borrow_mut()
      .timers
      .remove(&id.0)
      .map(|_| ())
      .ok_or_else(|| ZmqError::InvalidArgument(format!("unknown timer {}", id.0)))
  }

  fn call_soon(&self, callback: SoonCallback) {
    self.inner.state.borrow_mut().soon.push_back(callback);
  }
}

impl fmt::Debug for EventLoop {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.inner.state.borrow();
    f.debug_struct("EventLoop")
      .field("watches", &state.watches.len())
      .field("timers", &state.timers.len())
      .field("pending_soon", &state.soon.len())
      .finish()
  }
}
