use std::env;
use std::time::Duration;

use anyhow::{Context, bail};

use crate::market::normalize_symbol;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Binance,
    Aster,
    Bybit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub symbols: Vec<String>,
    pub exchange: ExchangeKind,
    pub api_port: u16,
    pub http_timeout: Duration,
    pub refresh_interval: Duration,
    pub stream_klines: bool,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset keys take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        // default to BTCUSDT and ETHUSDT if SYMBOLS is not set
        let symbols: Vec<String> = var("SYMBOLS", "BTCUSDT,ETHUSDT")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(normalize_symbol)
            .collect();
        if symbols.is_empty() {
            bail!("SYMBOLS must name at least one symbol");
        }

        let exchange = match var("EXCHANGE", "binance").to_lowercase().as_str() {
            "binance" => ExchangeKind::Binance,
            "aster" => ExchangeKind::Aster,
            "bybit" => ExchangeKind::Bybit,
            other => bail!("EXCHANGE must be binance, aster or bybit, got {other:?}"),
        };

        let api_port = var("API_PORT", "3000")
            .parse::<u16>()
            .context("API_PORT must be a valid port number (1-65535)")?;

        let http_timeout = var("HTTP_TIMEOUT_SECS", "10")
            .parse::<u64>()
            .context("HTTP_TIMEOUT_SECS must be a whole number of seconds")?;

        let refresh_secs = var("REFRESH_SECS", "60")
            .parse::<u64>()
            .context("REFRESH_SECS must be a whole number of seconds")?;
        if refresh_secs == 0 {
            bail!("REFRESH_SECS must be greater than zero");
        }

        let stream_klines = var("STREAM_KLINES", "true")
            .parse::<bool>()
            .context("STREAM_KLINES must be true or false")?;

        let log_format = match var("LOG_FORMAT", "pretty").to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "json" => LogFormat::Json,
            other => bail!("LOG_FORMAT must be pretty or json, got {other:?}"),
        };

        Ok(Self {
            symbols,
            exchange,
            api_port,
            http_timeout: Duration::from_secs(http_timeout),
            refresh_interval: Duration::from_secs(refresh_secs),
            stream_klines,
            log_format,
        })
    }
}
