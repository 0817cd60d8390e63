//! Tunnel client implementation.
//!
//! This module provides the core tunnel functionality:
//! - [`TunnelClient`] - Connection state machine driving the relay channel
//! - Request forwarder executing tunneled requests against the local service

mod connection;
mod forwarder;

pub use connection::TunnelClient;
