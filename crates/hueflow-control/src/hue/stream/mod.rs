//! Hue Entertainment streaming plane

pub mod dtls;
pub mod protocol;

pub use dtls::{SendOutcome, StreamController, StreamEvent, StreamState};
