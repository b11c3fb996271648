//! Local stand-in for the exchange trade stream

mod market;

use feed_shared::{codec, Frame, StreamRequest};
use futures::{SinkExt, StreamExt};
use market::Market;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_ADDR: &str = "127.0.0.1:9443";
const DEFAULT_INTERVAL_MS: u64 = 1000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let addr = std::env::var("MOCK_FEED_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.into());
    let interval = match std::env::var("MOCK_FEED_INTERVAL_MS") {
        Ok(value) => Duration::from_millis(value.parse()?),
        Err(_) => Duration::from_millis(DEFAULT_INTERVAL_MS),
    };

    let listener = TcpListener::bind(&addr).await?;
    info!("Mock feed listening on ws://{}", addr);

    loop {
        let (socket, peer) = listener.accept().await?;
        info!("Connection from: {}", peer);

        tokio::spawn(async move {
            match accept_async(socket).await {
                Ok(ws) => {
                    if let Err(e) = serve_client(ws, peer, interval).await {
                        warn!("Client {} failed: {}", peer, e);
                    }
                }
                Err(e) => warn!("Handshake with {} failed: {}", peer, e),
            }
            info!("Client disconnected: {}", peer);
        });
    }
}

async fn serve_client(
    ws: WebSocketStream<TcpStream>,
    peer: SocketAddr,
    interval: Duration,
) -> anyhow::Result<()> {
    let (mut sink, mut stream) = ws.split();
    let mut market = Market::new();
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let frame = Frame::Text(text.as_str().to_owned());
                    match codec::decode::<StreamRequest>(&frame) {
                        Ok(request) => {
                            debug!("[{}] {:?} {:?}", peer, request.method, request.params);
                            let response = market.apply(&request);
                            send(&mut sink, &response).await?;
                        }
                        Err(e) => warn!("[{}] Ignoring malformed request: {}", peer, e),
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
            _ = ticker.tick() => {
                for trade in market.tick() {
                    send(&mut sink, &trade).await?;
                }
            }
        }
    }

    Ok(())
}

async fn send<S, T>(sink: &mut S, message: &T) -> anyhow::Result<()>
where
    S: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    T: serde::Serialize,
{
    match codec::encode(message)? {
        Frame::Text(text) => sink.send(Message::Text(text.into())).await?,
        Frame::Binary(bytes) => sink.send(Message::Binary(bytes)).await?,
    }
    Ok(())
}
