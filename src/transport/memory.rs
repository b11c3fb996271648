//! In-memory transport backed by tokio channels
//!
//! Each successful `connect` hands a [`MemoryPeer`] to the paired
//! [`MemoryListener`], which plays the remote endpoint: it sees every frame
//! the client writes and can push frames, errors and closes back.

use crate::transport::traits::{TransportConnector, TransportEvent, TransportStream};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use feed_shared::{CloseInfo, Frame};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

struct Shared {
    accepted_tx: mpsc::UnboundedSender<MemoryPeer>,
    refuse: AtomicBool,
    stall: AtomicBool,
    fail_sends: Arc<AtomicBool>,
    attempts: AtomicUsize,
}

/// Connector half; give this to the connection manager
#[derive(Clone)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

/// Listener half; accepts the remote end of every established connection
pub struct MemoryListener {
    accepted_rx: mpsc::UnboundedReceiver<MemoryPeer>,
    shared: Arc<Shared>,
}

/// Create a connected connector/listener pair
pub fn memory_transport() -> (MemoryConnector, MemoryListener) {
    let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        accepted_tx,
        refuse: AtomicBool::new(false),
        stall: AtomicBool::new(false),
        fail_sends: Arc::new(AtomicBool::new(false)),
        attempts: AtomicUsize::new(0),
    });

    (
        MemoryConnector {
            shared: shared.clone(),
        },
        MemoryListener {
            accepted_rx,
            shared,
        },
    )
}

impl MemoryListener {
    /// Wait for the next established connection
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accepted_rx.recv().await
    }

    /// Next established connection, if one is already waiting
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.accepted_rx.try_recv().ok()
    }

    /// Make subsequent connection attempts fail
    pub fn set_refusing(&self, refuse: bool) {
        self.shared.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Make subsequent connection attempts hang until dropped
    pub fn set_stalling(&self, stall: bool) {
        self.shared.stall.store(stall, Ordering::SeqCst);
    }

    /// Make writes on every connection fail
    pub fn set_failing_sends(&self, fail: bool) {
        self.shared.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Number of connection attempts made so far
    pub fn attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportConnector for MemoryConnector {
    type Stream = MemoryStream;

    async fn connect(&self, address: &str) -> Result<Self::Stream> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);

        if self.shared.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.shared.refuse.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused: {}", address));
        }

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            address: address.to_string(),
            to_client,
            from_client,
        };
        self.shared
            .accepted_tx
            .send(peer)
            .map_err(|_| anyhow!("listener dropped"))?;

        Ok(MemoryStream {
            outbound,
            inbound,
            fail_sends: self.shared.fail_sends.clone(),
            closed: None,
        })
    }

    fn name(&self) -> &'static str {
        "Memory"
    }
}

/// Client end of an in-memory connection
pub struct MemoryStream {
    outbound: mpsc::UnboundedSender<Frame>,
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
    fail_sends: Arc<AtomicBool>,
    closed: Option<CloseInfo>,
}

#[async_trait]
impl TransportStream for MemoryStream {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        if self.closed.is_some() {
            return Err(anyhow!("stream closed"));
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(anyhow!("write failed"));
        }
        self.outbound
            .send(frame)
            .map_err(|_| anyhow!("peer dropped"))
    }

    async fn recv(&mut self) -> TransportEvent {
        if let Some(close) = &self.closed {
            return TransportEvent::Closed(close.clone());
        }

        let event = match self.inbound.recv().await {
            Some(event) => event,
            None => TransportEvent::Closed(CloseInfo::abnormal("peer dropped")),
        };
        if let TransportEvent::Closed(close) = &event {
            self.closed = Some(close.clone());
        }
        event
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = Some(CloseInfo::normal());
        self.inbound.close();
        Ok(())
    }
}

/// Remote end of an in-memory connection
pub struct MemoryPeer {
    pub address: String,
    to_client: mpsc::UnboundedSender<TransportEvent>,
    from_client: mpsc::UnboundedReceiver<Frame>,
}

impl MemoryPeer {
    /// Push a text frame to the client
    pub fn push_text(&self, text: impl Into<String>) {
        self.push(TransportEvent::Message(Frame::Text(text.into())));
    }

    /// Push a transport error to the client
    pub fn push_error(&self, reason: impl Into<String>) {
        self.push(TransportEvent::Error(reason.into()));
    }

    /// Close the connection from the remote side
    pub fn close(&self, close: CloseInfo) {
        self.push(TransportEvent::Closed(close));
    }

    /// Next frame the client wrote; `None` once the client side is gone
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_client.recv().await
    }

    /// Next frame the client wrote, if one is already waiting
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.from_client.try_recv().ok()
    }

    fn push(&self, event: TransportEvent) {
        // The client may already have dropped this connection
        let _ = self.to_client.send(event);
    }
}
