//! Transport trait abstraction for pluggable streaming backends

use anyhow::Result;
use async_trait::async_trait;
use feed_shared::{CloseInfo, Frame};

/// Something the transport observed on an established connection
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A data frame arrived
    Message(Frame),
    /// The transport hit an error; a `Closed` event follows
    Error(String),
    /// The connection is gone
    Closed(CloseInfo),
}

/// An established duplex connection
#[async_trait]
pub trait TransportStream: Send + 'static {
    /// Write one frame
    async fn send(&mut self, frame: Frame) -> Result<()>;

    /// Wait for the next event
    ///
    /// Must be cancel-safe. Once `Closed` has been returned the stream is
    /// finished and keeps returning `Closed`.
    async fn recv(&mut self) -> TransportEvent;

    /// Close the connection gracefully
    async fn close(&mut self) -> Result<()>;
}

/// Factory for creating transport connections
#[async_trait]
pub trait TransportConnector: Send + Sync + 'static {
    /// The stream type this connector produces
    type Stream: TransportStream;

    /// Attempt to connect to `address`, returning an open stream on success
    async fn connect(&self, address: &str) -> Result<Self::Stream>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
