use std::time::Duration;

use crate::ZmqError;

// Use values consistent with libzmq where possible
pub const SUBSCRIBE: i32 = 6;
pub const UNSUBSCRIBE: i32 = 7;
pub const EVENTS: i32 = 15;
pub const TYPE: i32 = 16;
pub const LINGER: i32 = 17;
pub const SNDHWM: i32 = 23;
pub const RCVHWM: i32 = 24;
pub const LAST_ENDPOINT: i32 = 32;

/// libzmq's default high-water mark.
pub const DEFAULT_HWM: usize = 1000;

/// Holds parsed and validated socket options.
#[derive(Debug, Clone)]
pub(crate) struct SocketOptions {
  /// Bound on the socket's inbound queue; senders see it as back-pressure.
  pub rcvhwm: usize,
  /// Accepted and reported. In-process delivery is bounded by the receiver's `rcvhwm`.
  pub sndhwm: usize,
  // None = -1 (infinite)
  pub linger: Option<Duration>,
}

impl Default for SocketOptions {
  fn default() -> Self {
    Self {
      rcvhwm: DEFAULT_HWM,
      sndhwm: DEFAULT_HWM,
      linger: Some(Duration::ZERO),
    }
  }
}

// --- Helper functions for parsing option values ---
/// Parses a byte slice representing an integer option (like HWM, linger).
pub(crate) fn parse_i32_option(value: &[u8], option_id: i32) -> Result<i32, ZmqError> {
  let arr: [u8; 4] = value
    .try_into()
    .map_err(|_| ZmqError::InvalidOptionValue(option_id))?;
  Ok(i32::from_ne_bytes(arr)) // Native endianness, as with the ZMQ C API
}

/// Parses a high-water mark. ZMQ uses 0 for "no limit".
pub(crate) fn parse_hwm_option(value: &[u8], option_id: i32) -> Result<usize, ZmqError> {
  match parse_i32_option(value, option_id)? {
    0 => Ok(usize::MAX),
    val @ 1.. => Ok(val as usize),
    _ => Err(ZmqError::InvalidOptionValue(option_id)),
  }
}

pub(crate) fn parse_linger_option(value: &[u8]) -> Result<Option<Duration>, ZmqError> {
  let val = parse_i32_option(value, LINGER)?;
  match val {
    -1 => Ok(None),                                     // None represents infinite linger
    0.. => Ok(Some(Duration::from_millis(val as u64))), // Non-negative -> Duration
    _ => Err(ZmqError::InvalidOptionValue(LINGER)),     // Other negative values invalid
  }
}

pub(crate) fn encode_i32_option(value: i32) -> Vec<u8> {
  value.to_ne_bytes().to_vec()
}

pub(crate) fn encode_hwm_option(value: usize) -> Vec<u8> {
  let raw = if value == usize::MAX { 0 } else { i32::try_from(value).unwrap_or(i32::MAX) };
  encode_i32_option(raw)
}

pub(crate) fn encode_linger_option(value: Option<Duration>) -> Vec<u8> {
  let raw = match value {
    None => -1,
    Some(d) => i32::try_from(d.as_millis()).unwrap_or(i32::MAX),
  };
  encode_i32_option(raw)
}
