//! Resilient streaming connection for the trade dashboard
//!
//! [`ConnectionManager`] keeps one duplex connection to an exchange stream
//! endpoint alive, queueing outbound messages while offline and reconnecting
//! with capped exponential backoff after involuntary closes.

pub mod config;
pub mod connection;
pub mod transport;

pub use config::DashboardConfig;
pub use connection::{Callbacks, ConnectionConfig, ConnectionManager};
pub use transport::{TransportConnector, TransportEvent, TransportStream, WebSocketConnector};

pub use feed_shared::{
    CloseInfo, Frame, ReconnectPolicy, RequestResponse, StreamMessage, StreamRequest, TradeEvent,
};
