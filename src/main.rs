use anyhow::Result;
use feed_shared::{StreamMessage, StreamRequest, TradeEvent};
use trade_feed::{ConnectionManager, DashboardConfig, WebSocketConnector};

use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("TLS crypto provider already installed");
    }

    let config = DashboardConfig::from_env()?;
    let streams = config.streams();

    info!("Trade dashboard starting");
    info!("  Feed: {}", config.url);
    info!("  Streams: {}", streams.join(", "));

    let manager: ConnectionManager<StreamMessage> =
        ConnectionManager::new(WebSocketConnector::new(), config.connection.clone());
    manager.set_handler(handle_stream_message);
    manager.connect(config.url.clone());

    let mut connected = manager.connected();
    let mut request_id: u64 = 0;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            changed = connected.changed() => {
                if changed.is_err() {
                    warn!("Connection manager stopped");
                    break;
                }
                if *connected.borrow_and_update() {
                    // Subscriptions do not survive a reconnect
                    request_id += 1;
                    info!(id = request_id, "Feed connected, subscribing");
                    manager.send(&StreamRequest::subscribe(streams.iter().cloned(), request_id));
                } else {
                    warn!("Feed connection lost");
                }
            }
            _ = &mut ctrl_c => {
                info!("Shutting down");
                break;
            }
        }
    }

    manager.shutdown().await;
    Ok(())
}

fn handle_stream_message(message: StreamMessage) {
    match message {
        StreamMessage::Trade(trade) => log_trade(&trade),
        StreamMessage::Response(response) => {
            debug!(id = response.id, result = ?response.result, "Request acknowledged");
        }
    }
}

fn log_trade(trade: &TradeEvent) {
    let side = if trade.buyer_is_maker { "sell" } else { "buy" };
    let notional = trade
        .price()
        .zip(trade.quantity())
        .map(|(price, quantity)| price * quantity);
    info!(
        symbol = %trade.symbol,
        price = %trade.price,
        quantity = %trade.quantity,
        side,
        notional = ?notional,
        trade_id = trade.trade_id,
        "trade"
    );
}
