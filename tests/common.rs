// tests/common.rs
#![allow(dead_code)] // Not every test binary uses every helper

use rzmq_loop::runtime::{SoonCallback, TimerCallback, TimerId, WatchCallback, WatchId};
use rzmq_loop::{MessageSocket, Msg, PollEvents, Reactor, Ready, RecvOptions, SendOptions, SendStatus, ZmqError};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::os::fd::RawFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;
use std::time::Duration;

static INPROC_ENDPOINT_COUNTER: AtomicUsize = AtomicUsize::new(0);

// Use std::sync::Once for one-time initialization
static TRACING_INIT: Once = Once::new();

pub fn setup_tracing() {
  TRACING_INIT.call_once(|| {
    // Can be overridden by RUST_LOG env variable
    let default_filter = "rzmq_loop=debug,warn";
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = FmtSubscriber::builder()
      .with_max_level(tracing::Level::TRACE)
      .with_env_filter(env_filter)
      .with_target(true)
      .with_line_number(true)
      .with_test_writer()
      .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set global tracing subscriber");
  });
}

// Helper to generate unique Inproc endpoints
pub fn unique_inproc_endpoint() -> String {
  let pid = std::process::id();
  let count = INPROC_ENDPOINT_COUNTER.fetch_add(1, Ordering::Relaxed);
  format!("inproc://rzmq_loop_test_{}_{}", pid, count)
}

/// Payloads of a multipart message, for comparisons.
pub fn payloads(frames: &[Msg]) -> Vec<Vec<u8>> {
  frames.iter().map(|m| m.data().to_vec()).collect()
}

// --- Scripted socket ---

#[derive(Default)]
struct StubState {
  events: PollEvents,
  /// Errors returned by the next `events()` calls, before `events` is consulted.
  event_errors: VecDeque<ZmqError>,
  inbound: VecDeque<Result<Vec<Msg>, ZmqError>>,
  sent: Vec<Vec<Msg>>,
  send_errors: VecDeque<ZmqError>,
  block_sends: bool,
}

/// A `MessageSocket` whose readiness and traffic are set by the test.
pub struct StubSocket {
  descriptor: Option<RawFd>,
  state: RefCell<StubState>,
  events_calls: Cell<usize>,
}

impl StubSocket {
  /// A stub exposing a (fake) descriptor, for use with [`ManualReactor`].
  pub fn new() -> Rc<Self> {
    Self::with_descriptor(Some(1000))
  }

  pub fn without_descriptor() -> Rc<Self> {
    Self::with_descriptor(None)
  }

  fn with_descriptor(descriptor: Option<RawFd>) -> Rc<Self> {
    Rc::new(Self {
      descriptor,
      state: RefCell::new(StubState::default()),
      events_calls: Cell::new(0),
    })
  }

  pub fn set_events(&self, events: PollEvents) {
    self.state.borrow_mut().events = events;
  }

  pub fn fail_next_events(&self, error: ZmqError) {
    self.state.borrow_mut().event_errors.push_back(error);
  }

  pub fn push_inbound(&self, frames: &[&'static [u8]]) {
    let msgs = frames.iter().map(|f| Msg::from_static(*f)).collect();
    self.state.borrow_mut().inbound.push_back(Ok(msgs));
  }

  pub fn push_recv_error(&self, error: ZmqError) {
    self.state.borrow_mut().inbound.push_back(Err(error));
  }

  pub fn fail_next_send(&self, error: ZmqError) {
    self.state.borrow_mut().send_errors.push_back(error);
  }

  /// While set, every send fails with `WouldBlock`.
  pub fn block_sends(&self, block: bool) {
    self.state.borrow_mut().block_sends = block;
  }

  pub fn sent(&self) -> Vec<Vec<Vec<u8>>> {
    self.state.borrow().sent.iter().map(|m| payloads(m)).collect()
  }

  pub fn events_calls(&self) -> usize {
    self.events_calls.get()
  }
}

impl MessageSocket for StubSocket {
  fn descriptor(&self) -> Option<RawFd> {
    self.descriptor
  }

  fn events(&self) -> Result<PollEvents, ZmqError> {
    self.events_calls.set(self.events_calls.get() + 1);
    let mut state = self.state.borrow_mut();
    match state.event_errors.pop_front() {
      Some(e) => Err(e),
      None => Ok(state.events),
    }
  }

  fn recv_multipart(&self, _options: RecvOptions) -> Result<Vec<Msg>, ZmqError> {
    self.state.borrow_mut().inbound.pop_front().unwrap_or(Err(ZmqError::WouldBlock))
  }

  fn send_multipart(&self, frames: &[Msg], _options: SendOptions) -> Result<SendStatus, ZmqError> {
    let mut state = self.state.borrow_mut();
    if state.block_sends {
      return Err(ZmqError::WouldBlock);
    }
    if let Some(e) = state.send_errors.pop_front() {
      return Err(e);
    }
    state.sent.push(frames.to_vec());
    Ok(SendStatus::default())
  }

  fn bind(&self, _endpoint: &str) -> Result<(), ZmqError> {
    Ok(())
  }

  fn connect(&self, _endpoint: &str) -> Result<(), ZmqError> {
    Ok(())
  }

  fn set_option(&self, option: i32, _value: &[u8]) -> Result<(), ZmqError> {
    Err(ZmqError::InvalidOption(option))
  }

  fn get_option(&self, option: i32) -> Result<Vec<u8>, ZmqError> {
    Err(ZmqError::InvalidOption(option))
  }
}

// --- Hand-driven reactor ---

struct ManualWatch {
  fd: RawFd,
  interest: Ready,
  callback: Option<WatchCallback>,
}

struct ManualTimer {
  interval: Option<Duration>,
  callback: Option<TimerCallback>,
}

#[derive(Default)]
struct ManualState {
  next_id: usize,
  watches: HashMap<usize, ManualWatch>,
  timers: HashMap<usize, ManualTimer>,
  soon: VecDeque<SoonCallback>,
}

/// A `Reactor` that only does something when the test tells it to.
#[derive(Clone, Default)]
pub struct ManualReactor {
  state: Rc<RefCell<ManualState>>,
}

impl ManualReactor {
  pub fn new() -> Self {
    Self::default()
  }

  /// Reports `ready` on every watch with non-empty interest.
  pub fn fire_watches(&self, ready: Ready) {
    let ids: Vec<usize> = {
      let state = self.state.borrow();
      let mut ids: Vec<usize> = state
        .watches
        .iter()
        .filter(|(_, w)| !w.interest.is_empty())
        .map(|(id, _)| *id)
        .collect();
      ids.sort();
      ids
    };
    for id in ids {
      let taken = self.state.borrow_mut().watches.get_mut(&id).and_then(|w| w.callback.take());
      if let Some(mut callback) = taken {
        callback(ready);
        if let Some(watch) = self.state.borrow_mut().watches.get_mut(&id) {
          if watch.callback.is_none() {
            watch.callback = Some(callback);
          }
        }
      }
    }
  }

  /// Fires every armed timer once.
  pub fn fire_timers(&self) {
    let ids: Vec<usize> = {
      let state = self.state.borrow();
      let mut ids: Vec<usize> = state
        .timers
        .iter()
        .filter(|(_, t)| t.interval.is_some())
        .map(|(id, _)| *id)
        .collect();
      ids.sort();
      ids
    };
    for id in ids {
      let taken = self.state.borrow_mut().timers.get_mut(&id).and_then(|t| t.callback.take());
      if let Some(mut callback) = taken {
        callback();
        if let Some(timer) = self.state.borrow_mut().timers.get_mut(&id) {
          if timer.callback.is_none() {
            timer.callback = Some(callback);
          }
        }
      }
    }
  }

  /// Runs the `call_soon` callbacks queued so far. Returns how many ran.
  pub fn run_soon(&self) -> usize {
    let batch = std::mem::take(&mut self.state.borrow_mut().soon);
    let count = batch.len();
    for callback in batch {
      callback();
    }
    count
  }

  pub fn pending_soon(&self) -> usize {
    self.state.borrow().soon.len()
  }

  pub fn watch_count(&self) -> usize {
    self.state.borrow().watches.len()
  }

  /// Interest of the only registered watch.
  pub fn watch_interest(&self) -> Option<Ready> {
    self.state.borrow().watches.values().next().map(|w| w.interest)
  }

  pub fn watched_fd(&self) -> Option<RawFd> {
    self.state.borrow().watches.values().next().map(|w| w.fd)
  }

  pub fn timer_count(&self) -> usize {
    self.state.borrow().timers.len()
  }

  pub fn armed_timer_intervals(&self) -> Vec<Duration> {
    self.state.borrow().timers.values().filter_map(|t| t.interval).collect()
  }
}

impl Reactor for ManualReactor {
  fn register_watch(&self, fd: RawFd, interest: Ready, callback: WatchCallback) -> Result<WatchId, ZmqError> {
    let mut state = self.state.borrow_mut();
    state.next_id += 1;
    let id = state.next_id;
    state.watches.insert(
      id,
      ManualWatch {
        fd,
        interest,
        callback: Some(callback),
      },
    );
    Ok(WatchId::new(id))
  }

  fn update_watch(&self, id: WatchId, interest: Ready) -> Result<(), ZmqError> {
    let mut state = self.state.borrow_mut();
    let watch = state
      .watches
      .get_mut(&id.as_usize())
      .ok_or_else(|| ZmqError::InvalidArgument("unknown watch".into()))?;
    watch.interest = interest;
    Ok(())
  }

  fn unregister_watch(&self, id: WatchId) -> Result<(), ZmqError> {
    self
      .state
      .borrow_mut()
      .watches
      .remove(&id.as_usize())
      .map(|_| ())
      .ok_or_else(|| ZmqError::InvalidArgument("unknown watch".into()))
  }

  fn register_timer(&self, interval: Duration, _repeat: bool, callback: TimerCallback) -> TimerId {
    let mut state = self.state.borrow_mut();
    state.next_id += 1;
    let id = state.next_id;
    state.timers.insert(
      id,
      ManualTimer {
        interval: Some(interval),
        callback: Some(callback),
      },
    );
    TimerId::new(id)
  }

  fn update_timer(&self, id: TimerId, interval: Option<Duration>) -> Result<(), ZmqError> {
    let mut state = self.state.borrow_mut();
    let timer = state
      .timers
      .get_mut(&id.as_usize())
      .ok_or_else(|| ZmqError::InvalidArgument("unknown timer".into()))?;
    timer.interval = interval;
    Ok(())
  }

  fn unregister_timer(&self, id: TimerId) -> Result<(), ZmqError> {
    self
      .state
      .borrow_mut()
      .timers
      .remove(&id.as_usize())
      .map(|_| ())
      .ok_or_else(|| ZmqError::InvalidArgument("unknown timer".into()))
  }

  fn call_soon(&self, callback: SoonCallback) {
    self.state.borrow_mut().soon.push_back(callback);
  }
}
