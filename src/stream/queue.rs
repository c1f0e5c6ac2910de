// src/stream/queue.rs

use crate::error::ZmqError;
use crate::message::Msg;
use crate::socket::SendOptions;

use std::collections::VecDeque;

/// One pending multipart send.
pub(crate) struct QueuedSend<C> {
  pub frames: Vec<Msg>,
  pub options: SendOptions,
  pub callback: Option<C>,
}

/// FIFO of pending sends, unbounded unless a limit is configured.
pub(crate) struct OutboundQueue<C> {
  entries: VecDeque<QueuedSend<C>>,
  limit: Option<usize>,
}

impl<C> OutboundQueue<C> {
  pub fn new(limit: Option<usize>) -> Self {
    Self {
      entries: VecDeque::new(),
      limit,
    }
  }

  /// Appends at the tail. Fails with `ResourceLimitReached` when the limit is hit.
  pub fn push_back(&mut self, entry: QueuedSend<C>) -> Result<(), ZmqError> {
    if self.limit.is_some_and(|limit| self.entries.len() >= limit) {
      return Err(ZmqError::ResourceLimitReached);
    }
    self.entries.push_back(entry);
    Ok(())
  }

  /// Puts an entry that could not be sent back at the head. Ignores the limit.
  pub fn requeue(&mut self, entry: QueuedSend<C>) {
    self.entries.push_front(entry);
  }

  pub fn pop_front(&mut self) -> Option<QueuedSend<C>> {
    self.entries.pop_front()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn clear(&mut self) -> Vec<QueuedSend<C>> {
    self.entries.drain(..).collect()
  }
}
