// src/context.rs

use crate::error::ZmqError;
use crate::socket::core::SocketCore;
use crate::socket::{Socket, SocketType};

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

/// Holds the state shared by every handle of one context.
pub(crate) struct ContextInner {
  /// Next available unique handle ID for sockets.
  next_handle: Cell<usize>,
  /// All sockets created from this context, so `term()` can wake them.
  sockets: RefCell<Vec<Weak<SocketCore>>>,
  /// Registry for in-process bindings. Key is the inproc address name.
  inproc_registry: RefCell<HashMap<String, Weak<SocketCore>>>,
  terminated: Cell<bool>,
}

impl ContextInner {
  fn new() -> Self {
    Self {
      next_handle: Cell::new(1),
      sockets: RefCell::new(Vec::new()),
      inproc_registry: RefCell::new(HashMap::new()),
      terminated: Cell::new(false),
    }
  }

  pub(crate) fn next_handle(&self) -> usize {
    let handle = self.next_handle.get();
    self.next_handle.set(handle + 1);
    handle
  }

  pub(crate) fn is_terminated(&self) -> bool {
    self.terminated.get()
  }

  /// Registers `name` for a binder. Entries whose socket is gone are reclaimed.
  pub(crate) fn register_inproc(&self, name: &str, core: Weak<SocketCore>) -> Result<(), ZmqError> {
    let mut registry = self.inproc_registry.borrow_mut();
    if registry.get(name).is_some_and(|existing| existing.strong_count() > 0) {
      return Err(ZmqError::AddrInUse(format!("inproc://{}", name)));
    }
    registry.insert(name.to_string(), core);
    tracing::debug!(name = %name, "Inproc endpoint registered");
    Ok(())
  }

  pub(crate) fn lookup_inproc(&self, name: &str) -> Option<Rc<SocketCore>> {
    self.inproc_registry.borrow().get(name).and_then(Weak::upgrade)
  }

  pub(crate) fn unregister_inproc(&self, name: &str) {
    if self.inproc_registry.borrow_mut().remove(name).is_some() {
      tracing::debug!(name = %name, "Inproc endpoint unregistered");
    }
  }

  fn track_socket(&self, core: &Rc<SocketCore>) {
    let mut sockets = self.sockets.borrow_mut();
    sockets.retain(|s| s.strong_count() > 0);
    sockets.push(Rc::downgrade(core));
  }
}

/// Entry point for creating in-process sockets.
///
/// A context owns the `inproc://` namespace its sockets bind and connect in.
/// Handles are cheap clones of the same shared state.
#[derive(Clone)]
pub struct Context {
  inner: Rc<ContextInner>,
}

impl Context {
  pub fn new() -> Result<Self, ZmqError> {
    tracing::debug!("Creating new context");
    Ok(Self {
      inner: Rc::new(ContextInner::new()),
    })
  }

  /// Creates a socket of the given type.
  pub fn socket(&self, socket_type: SocketType) -> Result<Socket, ZmqError> {
    if self.inner.is_terminated() {
      return Err(ZmqError::Terminated);
    }
    let core = SocketCore::new(self.inner.clone(), socket_type)?;
    self.inner.track_socket(&core);
    tracing::debug!(socket_id = core.id, socket_type = ?socket_type, "Socket created");
    Ok(Socket::from_core(core))
  }

  /// Terminates the context.
  ///
  /// Every socket operation fails with [`ZmqError::Terminated`] from now on, and
  /// every live socket is signalled so event-loop watchers observe the shutdown.
  pub fn term(&self) {
    if self.inner.terminated.replace(true) {
      return;
    }
    let sockets: Vec<Rc<SocketCore>> = self.inner.sockets.borrow().iter().filter_map(Weak::upgrade).collect();
    tracing::debug!(sockets = sockets.len(), "Terminating context");
    for core in sockets {
      core.wake();
    }
  }

  pub fn is_terminated(&self) -> bool {
    self.inner.is_terminated()
  }
}

impl fmt::Debug for Context {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Context")
      .field("terminated", &self.inner.is_terminated())
      .field("endpoints", &self.inner.inproc_registry.borrow().len())
      .finish()
  }
}
