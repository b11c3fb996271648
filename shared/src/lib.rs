//! Trade Feed Shared Types
//!
//! This crate provides the runtime-free half of the trade feed: the wire
//! frame and its JSON codec, the reconnect policy, the connection state
//! machine and the exchange message types shared by the dashboard controller
//! and the mock feed.

pub mod codec;
pub mod policy;
pub mod protocol;
pub mod state_machine;

use std::time::{SystemTime, UNIX_EPOCH};

pub use codec::{CodecError, Frame};
pub use policy::ReconnectPolicy;
pub use protocol::{RequestResponse, StreamMessage, StreamRequest, TradeEvent};
pub use state_machine::{
    Action, CloseInfo, ConnectionId, ConnectionState, LinkEvent, LinkStateMachine,
};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Limits and defaults for the streaming connection
pub mod limits {
    /// Base reconnect interval in milliseconds
    pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 3000;

    /// Upper bound on any computed reconnect delay
    pub const MAX_RECONNECT_DELAY_MS: u64 = 30000;

    /// Growth factor between successive reconnect delays
    pub const BACKOFF_MULTIPLIER: f64 = 1.5;

    /// Maximum frame size (10 MB) to prevent memory exhaustion
    pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

    /// Close code reported when the transport vanished without a close frame
    pub const ABNORMAL_CLOSE_CODE: u16 = 1006;

    /// Close code for a normal, requested closure
    pub const NORMAL_CLOSE_CODE: u16 = 1000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_is_after_epoch() {
        assert!(now_ms() > 0);
    }

    #[test]
    fn test_default_delay_below_cap() {
        assert!(limits::DEFAULT_RECONNECT_INTERVAL_MS < limits::MAX_RECONNECT_DELAY_MS);
    }
}
