// src/socket/core.rs

//! Pattern logic of the in-process sockets.
//!
//! Every socket owns an inbound queue bounded by its `RCVHWM`. Senders push
//! complete multipart messages straight into the receiving peer's queue and
//! signal it; receivers signal the sender back when they free a slot in a full
//! queue, so back-pressure shows up as a `POLLOUT` transition on the sender.

use crate::context::ContextInner;
use crate::error::ZmqError;
use crate::message::{MessageTracker, Msg, MsgFlags};
use crate::socket::options::{self, SocketOptions};
use crate::socket::patterns::SubscriptionTrie;
use crate::socket::signaler::Signaler;
use crate::socket::{PollEvents, RecvOptions, SendOptions, SendStatus, SocketType};
use crate::transport::endpoint::{parse_endpoint, Endpoint};

use std::cell::RefCell;
use std::collections::VecDeque;
use std::os::fd::RawFd;
use std::rc::{Rc, Weak};

/// One queued multipart message together with where it came from.
struct Envelope {
  frames: Vec<Msg>,
  origin_id: usize,
  origin: Weak<SocketCore>,
  tracker: Option<MessageTracker>,
}

impl Envelope {
  fn release(&self) {
    if let Some(tracker) = &self.tracker {
      tracker.release();
    }
  }
}

/// Send/receive alternation state of REQ and REP sockets.
enum Phase {
  /// REQ may send, REP may receive.
  Idle,
  /// REQ sent a request to the peer with this id and waits for its reply.
  AwaitingReply(usize),
  /// REP received a request and owes this peer a reply.
  Replying(Weak<SocketCore>),
}

struct CoreState {
  options: SocketOptions,
  inbound: VecDeque<Envelope>,
  peers: Vec<Weak<SocketCore>>,
  next_peer: usize,
  subscriptions: SubscriptionTrie,
  phase: Phase,
  bound_names: Vec<String>,
  last_endpoint: Option<String>,
  closed: bool,
}

pub(crate) struct SocketCore {
  pub(crate) id: usize,
  pub(crate) socket_type: SocketType,
  context: Rc<ContextInner>,
  signaler: Signaler,
  state: RefCell<CoreState>,
}

impl SocketCore {
  pub(crate) fn new(context: Rc<ContextInner>, socket_type: SocketType) -> Result<Rc<Self>, ZmqError> {
    let signaler = Signaler::new()?;
    Ok(Rc::new(Self {
      id: context.next_handle(),
      socket_type,
      context,
      signaler,
      state: RefCell::new(CoreState {
        options: SocketOptions::default(),
        inbound: VecDeque::new(),
        peers: Vec::new(),
        next_peer: 0,
        subscriptions: SubscriptionTrie::new(),
        phase: Phase::Idle,
        bound_names: Vec::new(),
        last_endpoint: None,
        closed: false,
      }),
    }))
  }

  pub(crate) fn fd(&self) -> RawFd {
    self.signaler.fd()
  }

  /// Makes the descriptor readable so a watcher re-checks this socket.
  pub(crate) fn wake(&self) {
    self.signaler.notify();
  }

  fn check_usable(&self) -> Result<(), ZmqError> {
    if self.context.is_terminated() {
      return Err(ZmqError::Terminated);
    }
    if self.state.borrow().closed {
      return Err(ZmqError::Closed);
    }
    Ok(())
  }

  fn is_closed(&self) -> bool {
    self.state.borrow().closed
  }

  fn has_room(&self) -> bool {
    let state = self.state.borrow();
    !state.closed && state.inbound.len() < state.options.rcvhwm
  }

  fn accepts_topic(&self, topic: &[u8]) -> bool {
    self.state.borrow().subscriptions.matches(topic)
  }

  fn deliver(&self, envelope: Envelope) {
    if let Some(tracker) = &envelope.tracker {
      tracker.add_recipient();
    }
    self.state.borrow_mut().inbound.push_back(envelope);
    self.signaler.notify();
  }

  // --- Events ---

  pub(crate) fn events(&self) -> Result<PollEvents, ZmqError> {
    self.check_usable()?;
    self.signaler.drain();

    let mut state = self.state.borrow_mut();
    prune_peers(&mut state);
    let mut events = PollEvents::empty();
    if Self::readable(self.socket_type, &mut state) {
      events |= PollEvents::POLLIN;
    }
    if Self::writable(self.socket_type, &state) {
      events |= PollEvents::POLLOUT;
    }
    Ok(events)
  }

  fn readable(socket_type: SocketType, state: &mut CoreState) -> bool {
    match socket_type {
      SocketType::Req => {
        let Phase::AwaitingReply(peer_id) = state.phase else {
          return false;
        };
        discard_foreign_replies(state, peer_id);
        !state.inbound.is_empty()
      }
      SocketType::Rep => matches!(state.phase, Phase::Idle) && !state.inbound.is_empty(),
      SocketType::Sub | SocketType::Pull => !state.inbound.is_empty(),
      SocketType::Pub | SocketType::Push => false,
    }
  }

  fn writable(socket_type: SocketType, state: &CoreState) -> bool {
    match socket_type {
      SocketType::Req => matches!(state.phase, Phase::Idle) && any_peer_with_room(state),
      SocketType::Rep => matches!(state.phase, Phase::Replying(_)),
      SocketType::Pub => true,
      SocketType::Push => any_peer_with_room(state),
      SocketType::Sub | SocketType::Pull => false,
    }
  }

  // --- Receive ---

  pub(crate) fn recv_multipart(&self, recv_options: RecvOptions) -> Result<Vec<Msg>, ZmqError> {
    self.check_usable()?;
    if !self.socket_type.can_recv() {
      return Err(ZmqError::InvalidSocketType(self.socket_type.name()));
    }

    let (envelope, blocked_senders) = {
      let mut state = self.state.borrow_mut();
      match self.socket_type {
        SocketType::Req => {
          let peer_id = match state.phase {
            Phase::AwaitingReply(peer_id) => peer_id,
            _ => return Err(ZmqError::InvalidState("REQ must send a request before receiving")),
          };
          discard_foreign_replies(&mut state, peer_id);
        }
        SocketType::Rep => {
          if matches!(state.phase, Phase::Replying(_)) {
            return Err(ZmqError::InvalidState("REP must reply before receiving the next request"));
          }
        }
        _ => {}
      }

      let was_full = state.inbound.len() >= state.options.rcvhwm;
      let envelope = state.inbound.pop_front().ok_or(ZmqError::WouldBlock)?;
      match self.socket_type {
        SocketType::Req => state.phase = Phase::Idle,
        SocketType::Rep => state.phase = Phase::Replying(envelope.origin.clone()),
        _ => {}
      }
      // Every connected sender may have been blocked on our high-water mark,
      // not only the one whose message was just taken.
      let blocked_senders: Vec<Rc<SocketCore>> = if was_full {
        prune_peers(&mut state);
        state.peers.iter().filter_map(Weak::upgrade).collect()
      } else {
        Vec::new()
      };
      (envelope, blocked_senders)
    };

    envelope.release();
    for sender in blocked_senders {
      sender.wake();
    }
    tracing::trace!(socket_id = self.id, frames = envelope.frames.len(), "Message received");

    let frames = if recv_options.copy {
      envelope.frames.iter().map(Msg::detached).collect()
    } else {
      envelope.frames
    };
    Ok(frames)
  }

  // --- Send ---

  pub(crate) fn send_multipart(self: &Rc<Self>, frames: &[Msg], send_options: SendOptions) -> Result<SendStatus, ZmqError> {
    self.check_usable()?;
    if !self.socket_type.can_send() {
      return Err(ZmqError::InvalidSocketType(self.socket_type.name()));
    }
    if frames.is_empty() {
      return Err(ZmqError::InvalidArgument("cannot send an empty multipart message".into()));
    }

    let tracker = (!send_options.copy && send_options.track).then(MessageTracker::new);
    let envelope = Envelope {
      frames: prepare_frames(frames, send_options.copy),
      origin_id: self.id,
      origin: Rc::downgrade(self),
      tracker: tracker.clone(),
    };

    match self.socket_type {
      SocketType::Req => self.send_request(envelope)?,
      SocketType::Rep => self.send_reply(envelope)?,
      SocketType::Push => {
        let peer = {
          let mut state = self.state.borrow_mut();
          pick_peer(&mut state).ok_or(ZmqError::WouldBlock)?
        };
        peer.deliver(envelope);
      }
      SocketType::Pub => self.publish(envelope),
      SocketType::Sub | SocketType::Pull => return Err(ZmqError::InvalidSocketType(self.socket_type.name())),
    }

    tracing::trace!(socket_id = self.id, frames = frames.len(), "Message sent");
    Ok(SendStatus { tracker })
  }

  fn send_request(&self, envelope: Envelope) -> Result<(), ZmqError> {
    let peer = {
      let mut state = self.state.borrow_mut();
      if !matches!(state.phase, Phase::Idle) {
        return Err(ZmqError::InvalidState("REQ must receive the reply before sending again"));
      }
      let peer = pick_peer(&mut state).ok_or(ZmqError::WouldBlock)?;
      state.phase = Phase::AwaitingReply(peer.id);
      peer
    };
    peer.deliver(envelope);
    Ok(())
  }

  fn send_reply(&self, envelope: Envelope) -> Result<(), ZmqError> {
    let requester = {
      let state = self.state.borrow();
      match &state.phase {
        Phase::Replying(requester) => requester.upgrade().filter(|peer| !peer.is_closed()),
        _ => return Err(ZmqError::InvalidState("REP must receive a request before replying")),
      }
    };
    match requester {
      Some(peer) => {
        if !peer.has_room() {
          return Err(ZmqError::WouldBlock);
        }
        self.state.borrow_mut().phase = Phase::Idle;
        peer.deliver(envelope);
      }
      None => {
        // libzmq silently drops replies to vanished peers.
        self.state.borrow_mut().phase = Phase::Idle;
        tracing::debug!(socket_id = self.id, "Requester is gone, dropping reply");
      }
    }
    Ok(())
  }

  fn publish(&self, envelope: Envelope) {
    let subscribers: Vec<Rc<SocketCore>> = {
      let mut state = self.state.borrow_mut();
      prune_peers(&mut state);
      state.peers.iter().filter_map(Weak::upgrade).collect()
    };
    let topic = envelope.frames.first().map(|m| m.data_bytes()).unwrap_or_default();
    for subscriber in subscribers {
      if !subscriber.accepts_topic(&topic) {
        continue;
      }
      if !subscriber.has_room() {
        tracing::trace!(socket_id = self.id, peer_id = subscriber.id, "Subscriber at high-water mark, dropping");
        continue;
      }
      subscriber.deliver(Envelope {
        frames: envelope.frames.clone(),
        origin_id: envelope.origin_id,
        origin: envelope.origin.clone(),
        tracker: envelope.tracker.clone(),
      });
    }
  }

  // --- Endpoints ---

  pub(crate) fn bind(self: &Rc<Self>, endpoint: &str) -> Result<(), ZmqError> {
    self.check_usable()?;
    let Endpoint::Inproc(name) = parse_endpoint(endpoint)?;
    self.context.register_inproc(&name, Rc::downgrade(self))?;
    let mut state = self.state.borrow_mut();
    state.bound_names.push(name);
    state.last_endpoint = Some(endpoint.to_string());
    tracing::debug!(socket_id = self.id, endpoint = %endpoint, "Bound");
    Ok(())
  }

  pub(crate) fn connect(self: &Rc<Self>, endpoint: &str) -> Result<(), ZmqError> {
    self.check_usable()?;
    let Endpoint::Inproc(name) = parse_endpoint(endpoint)?;
    let peer = self
      .context
      .lookup_inproc(&name)
      .ok_or_else(|| ZmqError::ConnectionRefused(endpoint.to_string()))?;
    if !self.socket_type.is_compatible(peer.socket_type) {
      return Err(ZmqError::InvalidSocketType(self.socket_type.name()));
    }

    {
      let mut state = self.state.borrow_mut();
      state.peers.push(Rc::downgrade(&peer));
      state.last_endpoint = Some(endpoint.to_string());
    }
    peer.state.borrow_mut().peers.push(Rc::downgrade(self));

    // Either side may have just become writable.
    peer.wake();
    self.wake();
    tracing::debug!(socket_id = self.id, peer_id = peer.id, endpoint = %endpoint, "Connected");
    Ok(())
  }

  // --- Options ---

  pub(crate) fn set_option(&self, option: i32, value: &[u8]) -> Result<(), ZmqError> {
    self.check_usable()?;
    match option {
      options::SUBSCRIBE | options::UNSUBSCRIBE => {
        if self.socket_type != SocketType::Sub {
          return Err(ZmqError::InvalidOption(option));
        }
        let mut state = self.state.borrow_mut();
        if option == options::SUBSCRIBE {
          state.subscriptions.subscribe(value);
        } else {
          state.subscriptions.unsubscribe(value);
        }
      }
      options::SNDHWM => self.state.borrow_mut().options.sndhwm = options::parse_hwm_option(value, option)?,
      options::RCVHWM => {
        let peers: Vec<Rc<SocketCore>> = {
          let mut state = self.state.borrow_mut();
          state.options.rcvhwm = options::parse_hwm_option(value, option)?;
          state.peers.iter().filter_map(Weak::upgrade).collect()
        };
        // A raised mark may unblock senders.
        for peer in peers {
          peer.wake();
        }
      }
      options::LINGER => self.state.borrow_mut().options.linger = options::parse_linger_option(value)?,
      _ => return Err(ZmqError::InvalidOption(option)),
    }
    Ok(())
  }

  pub(crate) fn get_option(&self, option: i32) -> Result<Vec<u8>, ZmqError> {
    self.check_usable()?;
    match option {
      options::TYPE => Ok(options::encode_i32_option(self.socket_type.as_raw())),
      options::EVENTS => Ok(options::encode_i32_option(i32::from(self.events()?.bits()))),
      options::SNDHWM => Ok(options::encode_hwm_option(self.state.borrow().options.sndhwm)),
      options::RCVHWM => Ok(options::encode_hwm_option(self.state.borrow().options.rcvhwm)),
      options::LINGER => Ok(options::encode_linger_option(self.state.borrow().options.linger)),
      options::LAST_ENDPOINT => Ok(
        self
          .state
          .borrow()
          .last_endpoint
          .as_deref()
          .map(|ep| ep.as_bytes().to_vec())
          .unwrap_or_default(),
      ),
      _ => Err(ZmqError::InvalidOption(option)),
    }
  }

  // --- Close ---

  pub(crate) fn close(&self) -> Result<(), ZmqError> {
    let (names, peers, dropped) = {
      let mut state = self.state.borrow_mut();
      if state.closed {
        return Err(ZmqError::Closed);
      }
      state.closed = true;
      let dropped: Vec<Envelope> = state.inbound.drain(..).collect();
      (
        std::mem::take(&mut state.bound_names),
        std::mem::take(&mut state.peers),
        dropped,
      )
    };
    for name in &names {
      self.context.unregister_inproc(name);
    }
    for envelope in &dropped {
      envelope.release();
    }
    for peer in peers.iter().filter_map(Weak::upgrade) {
      peer.wake();
    }
    tracing::debug!(socket_id = self.id, dropped = dropped.len(), "Socket closed");
    Ok(())
  }
}

fn prune_peers(state: &mut CoreState) {
  state.peers.retain(|p| p.upgrade().is_some_and(|peer| !peer.is_closed()));
  if state.next_peer >= state.peers.len() {
    state.next_peer = 0;
  }
}

fn any_peer_with_room(state: &CoreState) -> bool {
  state.peers.iter().filter_map(Weak::upgrade).any(|p| p.has_room())
}

/// Round-robin over live peers, skipping those at their high-water mark.
fn pick_peer(state: &mut CoreState) -> Option<Rc<SocketCore>> {
  prune_peers(state);
  let count = state.peers.len();
  for offset in 0..count {
    let idx = (state.next_peer + offset) % count;
    if let Some(peer) = state.peers[idx].upgrade() {
      if peer.has_room() {
        state.next_peer = (idx + 1) % count;
        return Some(peer);
      }
    }
  }
  None
}

/// A REQ socket only accepts the reply of the peer it sent its request to.
fn discard_foreign_replies(state: &mut CoreState, peer_id: usize) {
  while state.inbound.front().is_some_and(|e| e.origin_id != peer_id) {
    if let Some(stale) = state.inbound.pop_front() {
      stale.release();
      tracing::trace!(origin_id = stale.origin_id, "REQ discarding reply from unexpected peer");
    }
  }
}

fn prepare_frames(frames: &[Msg], copy: bool) -> Vec<Msg> {
  let last = frames.len().saturating_sub(1);
  frames
    .iter()
    .enumerate()
    .map(|(idx, frame)| {
      let mut msg = if copy { frame.detached() } else { frame.clone() };
      let mut flags = msg.flags();
      flags.set(MsgFlags::MORE, idx < last);
      msg.set_flags(flags);
      msg
    })
    .collect()
}
