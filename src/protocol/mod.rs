//! Protocol message types for tunnel communication.
//!
//! Defines the JSON message format used between client and relay:
//! - [`ClientMessage`] - Messages sent from client to relay
//! - [`ServerMessage`] - Messages received from the relay

mod messages;

pub use messages::*;
