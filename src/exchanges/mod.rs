use crate::config::ExchangeKind;
use crate::errors::ExchangeError;
use crate::models::{FundingRate, Interval, Kline, OpenInterest};
use crate::store::KlineStore;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub mod binance;
pub mod bybit;

/// Longest wait between stream reconnect attempts.
const MAX_BACKOFF_SECS: u64 = 60;
/// A session that lasted this long counts as healthy and resets the backoff.
const STABLE_SESSION: Duration = Duration::from_secs(60);

#[async_trait]
pub trait Exchange: Send + Sync {
    fn name(&self) -> &'static str;

    /// Historical candles, oldest first.
    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Kline>, ExchangeError>;

    async fn fetch_open_interest(&self, symbol: &str) -> Result<OpenInterest, ExchangeError>;

    async fn fetch_funding_rate(&self, symbol: &str) -> Result<FundingRate, ExchangeError>;

    /// Spawn one tokio task per symbol that seeds the store over REST and then
    /// keeps it current from this exchange's kline WebSocket.
    async fn run_kline_stream(
        &self,
        symbols: &[String],
        intervals: &[Interval],
        store: KlineStore,
    ) -> Result<(), ExchangeError>;
}

/// Builds the client for the configured venue.
pub fn build(kind: ExchangeKind, timeout: Duration) -> Result<Arc<dyn Exchange>, ExchangeError> {
    Ok(match kind {
        ExchangeKind::Binance => Arc::new(binance::BinanceFutures::binance(timeout)?),
        ExchangeKind::Aster => Arc::new(binance::BinanceFutures::aster(timeout)?),
        ExchangeKind::Bybit => Arc::new(bybit::Bybit::new(timeout)?),
    })
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, ExchangeError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// GETs `url`, checks the status and decodes the body as `T`.
/// Every call is counted in `exchange_requests_total`.
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    exchange: &'static str,
    endpoint: &'static str,
    url: &str,
) -> Result<T, ExchangeError> {
    let result = send(client, exchange, url).await;
    let outcome = if result.is_ok() { "ok" } else { "error" };
    metrics::counter!(
        "exchange_requests_total",
        "exchange" => exchange,
        "endpoint" => endpoint,
        "outcome" => outcome
    )
    .increment(1);

    result
}

async fn send<T: DeserializeOwned>(
    client: &reqwest::Client,
    exchange: &'static str,
    url: &str,
) -> Result<T, ExchangeError> {
    tracing::debug!("[{exchange}] GET {url}");

    let response = client.get(url).send().await?;
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(ExchangeError::Status {
            status: status.as_u16(),
            body,
        });
    }

    Ok(serde_json::from_str(&body)?)
}

/// Reads a numeric field that exchanges send either as a JSON number or as a
/// decimal string.
pub(crate) fn number(value: &Value, field: &str) -> Result<f64, ExchangeError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| ExchangeError::UnexpectedData(format!("invalid {field}: {value}")))
}

fn timestamp(value: &Value, field: &str) -> Result<u64, ExchangeError> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse::<u64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| ExchangeError::UnexpectedData(format!("invalid {field}: {value}")))
}

/// Parses Binance-style kline rows:
/// `[openTime, open, high, low, close, volume, closeTime, ...]`.
pub fn parse_klines(rows: &[Vec<Value>]) -> Result<Vec<Kline>, ExchangeError> {
    rows.iter()
        .map(|row| {
            if row.len() < 7 {
                return Err(ExchangeError::UnexpectedData(format!(
                    "kline has {} fields, expected at least 7",
                    row.len()
                )));
            }

            let open_time = timestamp(&row[0], "open time")?;
            if open_time == 0 {
                return Err(ExchangeError::UnexpectedData(
                    "kline open time is zero".to_string(),
                ));
            }

            Ok(Kline {
                open_time,
                open: number(&row[1], "open")?,
                high: number(&row[2], "high")?,
                low: number(&row[3], "low")?,
                close: number(&row[4], "close")?,
                volume: number(&row[5], "volume")?,
                close_time: timestamp(&row[6], "close time")?,
            })
        })
        .collect()
}

/// Mean of a non-empty slice.
pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Runs `connect` until it fails or the stream closes, then reconnects with
/// exponential backoff. A session that stayed up for STABLE_SESSION resets the
/// backoff, however it ended.
pub(crate) async fn reconnect_forever<F, Fut>(name: &'static str, symbol: String, mut connect: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), ExchangeError>>,
{
    let mut backoff_secs = 1;

    loop {
        let started = Instant::now();
        let result = connect().await;
        if started.elapsed() >= STABLE_SESSION {
            backoff_secs = 1;
        }

        match result {
            Ok(()) => tracing::warn!("[{name}] {symbol} kline stream closed, reconnecting"),
            Err(e) => tracing::error!("[{name}] {symbol} kline stream error: {e}"),
        }

        tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
        backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
    }
}
