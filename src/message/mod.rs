//! Message-related types (`Msg`, `MsgFlags`, `MessageTracker`).

mod flags;
mod msg;
mod tracker;

pub use flags::MsgFlags;
pub use msg::Msg;
pub use tracker::MessageTracker;

/// One logical message: an ordered sequence of frames.
pub type Multipart = Vec<Msg>;
