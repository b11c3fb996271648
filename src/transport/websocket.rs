//! WebSocket transport implementation for exchange stream endpoints

use crate::transport::traits::{TransportConnector, TransportEvent, TransportStream};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use feed_shared::{CloseInfo, Frame};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Close code reported when the peer's close frame carried no status
const NO_STATUS_CLOSE_CODE: u16 = 1005;

/// WebSocket stream wrapper implementing TransportStream
pub struct WebSocketTransportStream {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: Option<CloseInfo>,
}

impl WebSocketTransportStream {
    pub fn new(stream: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Self {
        Self {
            inner: stream,
            closed: None,
        }
    }

    fn finish(&mut self, close: CloseInfo) -> TransportEvent {
        self.closed = Some(close.clone());
        TransportEvent::Closed(close)
    }
}

fn close_info(frame: Option<CloseFrame>) -> CloseInfo {
    match frame {
        Some(frame) => CloseInfo {
            code: frame.code.into(),
            reason: frame.reason.as_str().to_owned(),
            was_clean: true,
        },
        None => CloseInfo {
            code: NO_STATUS_CLOSE_CODE,
            reason: String::new(),
            was_clean: true,
        },
    }
}

#[async_trait]
impl TransportStream for WebSocketTransportStream {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        if self.closed.is_some() {
            return Err(anyhow!("WebSocket already closed"));
        }

        let message = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(bytes) => Message::Binary(bytes),
        };
        self.inner.send(message).await?;
        Ok(())
    }

    async fn recv(&mut self) -> TransportEvent {
        if let Some(close) = &self.closed {
            return TransportEvent::Closed(close.clone());
        }

        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => {
                    return TransportEvent::Message(Frame::Text(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    return TransportEvent::Message(Frame::Binary(bytes));
                }
                Some(Ok(Message::Close(frame))) => {
                    return self.finish(close_info(frame));
                }
                // Pong is handled automatically by tungstenite
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Err(e)) => {
                    let reason = e.to_string();
                    self.closed = Some(CloseInfo::abnormal(reason.clone()));
                    return TransportEvent::Error(reason);
                }
                None => return self.finish(CloseInfo::abnormal("connection closed")),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed.is_some() {
            return Ok(());
        }
        self.closed = Some(CloseInfo::normal());

        self.inner.close(None).await?;

        // Drain until the peer acknowledges the close handshake
        while let Some(message) = self.inner.next().await {
            if message.is_err() {
                break;
            }
        }
        Ok(())
    }
}

/// WebSocket connector; the address is the full `ws://` or `wss://` URL
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportConnector for WebSocketConnector {
    type Stream = WebSocketTransportStream;

    async fn connect(&self, address: &str) -> Result<Self::Stream> {
        let (stream, response) = connect_async(address).await?;
        debug!(address, status = %response.status(), "websocket handshake complete");
        Ok(WebSocketTransportStream::new(stream))
    }

    fn name(&self) -> &'static str {
        "WebSocket"
    }
}
