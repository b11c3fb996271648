//! Connection management for the streaming feed
//!
//! This module handles:
//! - A single persistent connection with automatic reconnection
//! - Geometric reconnect backoff with an attempt budget
//! - Buffering outbound frames across disconnects
//! - Decoding inbound frames for the application handler

mod manager;

pub use manager::{Callbacks, ConnectionConfig, ConnectionManager};
