//! Synthetic trade generation

use feed_shared::{now_ms, protocol::RequestMethod, RequestResponse, StreamRequest, TradeEvent};
use std::collections::BTreeSet;

/// Per-client subscription set and price state
#[derive(Debug, Default)]
pub struct Market {
    streams: BTreeSet<String>,
    next_trade_id: u64,
}

impl Market {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a control request and build its response
    pub fn apply(&mut self, request: &StreamRequest) -> RequestResponse {
        let result = match request.method {
            RequestMethod::Subscribe => {
                self.streams.extend(request.params.iter().cloned());
                None
            }
            RequestMethod::Unsubscribe => {
                for stream in &request.params {
                    self.streams.remove(stream);
                }
                None
            }
            RequestMethod::ListSubscriptions => Some(serde_json::Value::from(
                self.streams.iter().cloned().collect::<Vec<_>>(),
            )),
        };

        RequestResponse {
            result,
            id: request.id,
        }
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &str> {
        self.streams.iter().map(String::as_str)
    }

    /// One trade for every subscribed trade stream
    pub fn tick(&mut self) -> Vec<TradeEvent> {
        let now = now_ms();
        let symbols: Vec<String> = self
            .streams
            .iter()
            .filter_map(|stream| stream.strip_suffix("@trade"))
            .map(str::to_uppercase)
            .collect();

        symbols
            .into_iter()
            .map(|symbol| {
                self.next_trade_id += 1;
                let id = self.next_trade_id;
                TradeEvent {
                    event_type: "trade".into(),
                    event_time: now,
                    price: format!("{:.2}", synthetic_price(&symbol, id)),
                    quantity: format!("{:.4}", 0.001 * ((id % 97) + 1) as f64),
                    symbol,
                    trade_id: id,
                    trade_time: now,
                    buyer_is_maker: id % 2 == 0,
                }
            })
            .collect()
    }
}

/// Deterministic price wobble around a per-symbol base
fn synthetic_price(symbol: &str, trade_id: u64) -> f64 {
    let base = match symbol {
        "BTCUSDT" => 65_000.0,
        "ETHUSDT" => 3_200.0,
        _ => 100.0,
    };
    let wobble = ((trade_id % 40) as f64 - 20.0) / 1000.0;
    base * (1.0 + wobble)
}
