use crate::message::flags::MsgFlags;
use bytes::Bytes;
use std::fmt;

/// Represents a single message part (frame).
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Msg {
  // Use Bytes for efficient slicing and cloning (reference counted)
  data: Bytes,
  flags: MsgFlags,
}

impl Msg {
  /// Creates an empty frame.
  pub fn new() -> Self {
    Self::default()
  }

  /// Creates a message from a `Vec<u8>`, taking ownership.
  pub fn from_vec(data: Vec<u8>) -> Self {
    Self {
      data: Bytes::from(data),
      ..Default::default()
    }
  }

  /// Creates a message from `bytes::Bytes`.
  pub fn from_bytes(data: Bytes) -> Self {
    Self {
      data,
      ..Default::default()
    }
  }

  /// Creates a message from a static byte slice (zero-copy).
  pub fn from_static(data: &'static [u8]) -> Self {
    Self {
      data: Bytes::from_static(data),
      ..Default::default()
    }
  }

  /// Returns the message payload.
  pub fn data(&self) -> &[u8] {
    &self.data
  }

  /// Returns the size of the message payload in bytes.
  pub fn size(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  /// Returns the flags associated with the message.
  pub fn flags(&self) -> MsgFlags {
    self.flags
  }

  /// Sets the flags for the message (e.g., `MsgFlags::MORE`).
  pub fn set_flags(&mut self, flags: MsgFlags) {
    self.flags = flags;
  }

  /// Checks if the `MORE` flag is set.
  pub fn is_more(&self) -> bool {
    self.flags.contains(MsgFlags::MORE)
  }

  /// Returns the underlying `Bytes`. Cloning `Bytes` is cheap as it is reference-counted.
  pub fn data_bytes(&self) -> Bytes {
    self.data.clone()
  }

  pub fn into_bytes(self) -> Bytes {
    self.data
  }

  /// A copy of this frame whose payload no longer shares storage with the original.
  pub fn detached(&self) -> Self {
    Self {
      data: Bytes::copy_from_slice(&self.data),
      flags: self.flags,
    }
  }
}

impl fmt::Debug for Msg {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Msg")
      .field("size", &self.size())
      .field("flags", &self.flags)
      .finish()
  }
}

impl From<Vec<u8>> for Msg {
  fn from(data: Vec<u8>) -> Self {
    Msg::from_vec(data)
  }
}

impl From<Bytes> for Msg {
  fn from(data: Bytes) -> Self {
    Msg::from_bytes(data)
  }
}

impl From<&'static [u8]> for Msg {
  fn from(data: &'static [u8]) -> Self {
    Msg::from_static(data)
  }
}

impl<const N: usize> From<&'static [u8; N]> for Msg {
  fn from(data: &'static [u8; N]) -> Self {
    Msg::from_static(data)
  }
}

impl From<&'static str> for Msg {
  fn from(data: &'static str) -> Self {
    Msg::from_static(data.as_bytes())
  }
}

impl From<String> for Msg {
  fn from(data: String) -> Self {
    Msg::from_vec(data.into_bytes())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn detached_copy_keeps_payload_and_flags() {
    let mut msg = Msg::from(b"frame");
    msg.set_flags(MsgFlags::MORE);
    let copy = msg.detached();
    assert_eq!(copy, msg);
    assert!(copy.is_more());
    assert_ne!(copy.data().as_ptr(), msg.data().as_ptr());
  }
}
