use std::cell::Cell;
use std::rc::Rc;

/// Reports when a zero-copy send has been fully consumed by its recipients.
///
/// Returned from a send made with `copy: false, track: true`. The tracker is
/// done once every peer the message was delivered to has dequeued it, after
/// which the caller may reuse the frame storage.
#[derive(Debug, Clone)]
pub struct MessageTracker {
  pending: Rc<Cell<usize>>,
}

impl MessageTracker {
  pub(crate) fn new() -> Self {
    Self {
      pending: Rc::new(Cell::new(0)),
    }
  }

  pub(crate) fn add_recipient(&self) {
    self.pending.set(self.pending.get() + 1);
  }

  pub(crate) fn release(&self) {
    self.pending.set(self.pending.get().saturating_sub(1));
  }

  /// True once no recipient still holds the message.
  pub fn done(&self) -> bool {
    self.pending.get() == 0
  }
}
