//! Dashboard settings read from the environment

use crate::connection::ConnectionConfig;
use anyhow::{Context, Result};
use feed_shared::protocol::trade_stream;
use feed_shared::ReconnectPolicy;
use std::time::Duration;

pub const DEFAULT_FEED_URL: &str = "wss://stream.binance.com:9443/ws";
pub const DEFAULT_SYMBOLS: &str = "btcusdt,ethusdt";

/// Settings for the dashboard controller
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    /// Stream endpoint URL
    pub url: String,
    /// Lowercase symbols to subscribe trades for
    pub symbols: Vec<String>,
    pub connection: ConnectionConfig,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_FEED_URL.into(),
            symbols: parse_symbols(DEFAULT_SYMBOLS),
            connection: ConnectionConfig::default(),
        }
    }
}

impl DashboardConfig {
    /// Build from `FEED_*` environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = lookup("FEED_URL") {
            config.url = url;
        }
        if let Some(symbols) = lookup("FEED_SYMBOLS") {
            config.symbols = parse_symbols(&symbols);
        }

        let mut policy = ReconnectPolicy::default();
        if let Some(value) = lookup("FEED_RECONNECT_INTERVAL_MS") {
            let ms: u64 = value
                .parse()
                .with_context(|| format!("invalid FEED_RECONNECT_INTERVAL_MS: {value}"))?;
            policy = policy.with_base_interval(Duration::from_millis(ms));
        }
        if let Some(value) = lookup("FEED_MAX_RECONNECT_DELAY_MS") {
            let ms: u64 = value
                .parse()
                .with_context(|| format!("invalid FEED_MAX_RECONNECT_DELAY_MS: {value}"))?;
            policy = policy.with_max_delay(Duration::from_millis(ms));
        }
        if let Some(value) = lookup("FEED_MAX_RECONNECT_ATTEMPTS") {
            let attempts: u32 = value
                .parse()
                .with_context(|| format!("invalid FEED_MAX_RECONNECT_ATTEMPTS: {value}"))?;
            policy = policy.with_max_attempts(attempts);
        }
        config.connection.reconnect = policy;

        Ok(config)
    }

    /// Trade stream names for the configured symbols
    pub fn streams(&self) -> Vec<String> {
        self.symbols.iter().map(|s| trade_stream(s)).collect()
    }
}

fn parse_symbols(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}
