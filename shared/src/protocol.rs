//! Exchange stream messages
//!
//! Requests and events of the public trade stream. The connection manager
//! treats these as opaque payloads; they are shared here so the dashboard
//! controller and the mock feed agree on the format.

use serde::{Deserialize, Serialize};

/// Request method understood by the stream endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestMethod {
    Subscribe,
    Unsubscribe,
    ListSubscriptions,
}

/// Control request sent to the stream endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRequest {
    pub method: RequestMethod,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<String>,
    pub id: u64,
}

impl StreamRequest {
    /// Subscribe to the given stream names
    pub fn subscribe(streams: impl IntoIterator<Item = impl Into<String>>, id: u64) -> Self {
        Self {
            method: RequestMethod::Subscribe,
            params: streams.into_iter().map(Into::into).collect(),
            id,
        }
    }

    /// Unsubscribe from the given stream names
    pub fn unsubscribe(streams: impl IntoIterator<Item = impl Into<String>>, id: u64) -> Self {
        Self {
            method: RequestMethod::Unsubscribe,
            params: streams.into_iter().map(Into::into).collect(),
            id,
        }
    }
}

/// Response to a [`StreamRequest`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestResponse {
    pub result: Option<serde_json::Value>,
    pub id: u64,
}

/// A single executed trade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeEvent {
    /// Event type, always "trade"
    #[serde(rename = "e")]
    pub event_type: String,
    /// Event time (ms)
    #[serde(rename = "E")]
    pub event_time: u64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "t")]
    pub trade_id: u64,
    /// Decimal price as sent by the exchange
    #[serde(rename = "p")]
    pub price: String,
    /// Decimal quantity as sent by the exchange
    #[serde(rename = "q")]
    pub quantity: String,
    /// Trade time (ms)
    #[serde(rename = "T")]
    pub trade_time: u64,
    #[serde(rename = "m")]
    pub buyer_is_maker: bool,
}

impl TradeEvent {
    pub fn price(&self) -> Option<f64> {
        self.price.parse().ok()
    }

    pub fn quantity(&self) -> Option<f64> {
        self.quantity.parse().ok()
    }
}

/// Any message the stream endpoint pushes to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamMessage {
    Trade(TradeEvent),
    Response(RequestResponse),
}

/// Trade stream name for a symbol, e.g. `btcusdt@trade`
pub fn trade_stream(symbol: &str) -> String {
    format!("{}@trade", symbol.to_lowercase())
}
