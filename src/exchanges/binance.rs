use std::time::Duration;

use super::{Exchange, get_json, http_client, mean, parse_klines, reconnect_forever};
use crate::errors::ExchangeError;
use crate::models::{FundingRate, Interval, Kline, OpenInterest};
use crate::store::{DEFAULT_CAPACITY, KlineStore};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Window used for the open interest average (30 x 5m = 2.5h).
const OI_HISTORY_PERIOD: &str = "5m";
const OI_HISTORY_LIMIT: usize = 30;

#[derive(Debug, Deserialize)]
struct OpenInterestResponse {
    #[serde(rename = "openInterest")]
    open_interest: String,
}

#[derive(Debug, Deserialize)]
struct OpenInterestHistEntry {
    #[serde(rename = "sumOpenInterest")]
    sum_open_interest: String,
}

/// The raw JSON shape of the premiumIndex endpoint
#[derive(Debug, Deserialize)]
struct PremiumIndexResponse {
    symbol: String,

    #[serde(rename = "lastFundingRate")]
    last_funding_rate: String,

    #[serde(rename = "nextFundingTime")]
    next_funding_time: u64,
}

/// Wrapper around a combined-stream message. The event is nested under "data".
#[derive(Debug, Deserialize)]
struct StreamEnvelope {
    data: KlineEvent,
}

#[derive(Debug, Deserialize)]
struct KlineEvent {
    #[serde(rename = "k")]
    kline: KlinePayload,
}

#[derive(Debug, Deserialize)]
struct KlinePayload {
    #[serde(rename = "t")]
    open_time: u64,
    #[serde(rename = "T")]
    close_time: u64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "i")]
    interval: String,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
}

impl KlinePayload {
    fn into_kline(self) -> Result<(String, Interval, Kline), ExchangeError> {
        let interval = self
            .interval
            .parse::<Interval>()
            .map_err(ExchangeError::UnexpectedData)?;
        let parse = |s: &str, field: &str| {
            s.parse::<f64>()
                .map_err(|_| ExchangeError::UnexpectedData(format!("invalid {field}: {s}")))
        };

        let kline = Kline {
            open_time: self.open_time,
            open: parse(&self.open, "open")?,
            high: parse(&self.high, "high")?,
            low: parse(&self.low, "low")?,
            close: parse(&self.close, "close")?,
            volume: parse(&self.volume, "volume")?,
            close_time: self.close_time,
        };
        Ok((self.symbol, interval, kline))
    }
}

/// Client for Binance-compatible USDT-margined futures APIs.
#[derive(Clone)]
pub struct BinanceFutures {
    name: &'static str,
    client: reqwest::Client,
    rest_url: String,
    ws_url: String,
}

impl BinanceFutures {
    pub fn binance(timeout: Duration) -> Result<Self, ExchangeError> {
        Self::with_endpoints(
            "binance",
            "https://fapi.binance.com",
            "wss://fstream.binance.com",
            timeout,
        )
    }

    /// Aster mirrors the Binance futures API under its own hosts.
    pub fn aster(timeout: Duration) -> Result<Self, ExchangeError> {
        Self::with_endpoints(
            "aster",
            "https://fapi.asterdex.com",
            "wss://fstream.asterdex.com",
            timeout,
        )
    }

    pub fn with_endpoints(
        name: &'static str,
        rest_url: &str,
        ws_url: &str,
        timeout: Duration,
    ) -> Result<Self, ExchangeError> {
        Ok(Self {
            name,
            client: http_client(timeout)?,
            rest_url: rest_url.trim_end_matches('/').to_string(),
            ws_url: ws_url.trim_end_matches('/').to_string(),
        })
    }

    /// Average of the recent open interest history, if the venue serves it.
    async fn open_interest_average(&self, symbol: &str) -> Result<Option<f64>, ExchangeError> {
        let url = format!(
            "{}/futures/data/openInterestHist?symbol={}&period={}&limit={}",
            self.rest_url, symbol, OI_HISTORY_PERIOD, OI_HISTORY_LIMIT
        );

        let history: Vec<OpenInterestHistEntry> =
            get_json(&self.client, self.name, "open_interest_hist", &url).await?;

        let values = history
            .iter()
            .map(|h| h.sum_open_interest.parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ExchangeError::UnexpectedData(e.to_string()))?;

        Ok(mean(&values))
    }

    /// Seeds the store over REST, then follows the combined kline stream for
    /// one symbol until it closes or fails.
    async fn stream_symbol(
        &self,
        symbol: &str,
        intervals: &[Interval],
        store: &KlineStore,
    ) -> Result<(), ExchangeError> {
        let name = self.name;

        for &interval in intervals {
            let klines = self.fetch_klines(symbol, interval, DEFAULT_CAPACITY).await?;
            tracing::debug!("[{name}] {symbol} {interval} seeded with {} klines", klines.len());
            store.seed(symbol, interval, klines);
        }

        let streams = intervals
            .iter()
            .map(|i| format!("{}@kline_{}", symbol.to_lowercase(), i))
            .collect::<Vec<_>>()
            .join("/");
        let url = format!("{}/stream?streams={}", self.ws_url, streams);

        tracing::info!("[{name}] {symbol} stream connecting to {url}");

        let (ws_stream, _) = connect_async(&url)
            .await
            .map_err(|e| ExchangeError::WebSocket(e.to_string()))?;

        let (_, mut read_stream) = ws_stream.split();

        while let Some(msg) = read_stream.next().await {
            let msg = msg.map_err(|e| ExchangeError::WebSocket(e.to_string()))?;

            if let Message::Text(text) = msg {
                let envelope: StreamEnvelope = serde_json::from_str(&text)?;
                let (symbol, interval, kline) = envelope.data.kline.into_kline()?;
                store.apply(&symbol, interval, kline);
                tracing::trace!("[{name}] {symbol} {interval} close={}", kline.close);
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Exchange for BinanceFutures {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Kline>, ExchangeError> {
        let url = format!(
            "{}/fapi/v1/klines?symbol={}&interval={}&limit={}",
            self.rest_url,
            symbol,
            interval.as_binance(),
            limit
        );

        let rows: Vec<Vec<Value>> = get_json(&self.client, self.name, "klines", &url).await?;
        parse_klines(&rows)
    }

    /// Latest open interest from the openInterest endpoint. The average comes
    /// from openInterestHist and falls back to the latest value when the
    /// venue does not serve history.
    async fn fetch_open_interest(&self, symbol: &str) -> Result<OpenInterest, ExchangeError> {
        let url = format!("{}/fapi/v1/openInterest?symbol={}", self.rest_url, symbol);

        let response: OpenInterestResponse =
            get_json(&self.client, self.name, "open_interest", &url).await?;

        let latest = response
            .open_interest
            .parse::<f64>()
            .map_err(|e| ExchangeError::UnexpectedData(e.to_string()))?;

        let average = match self.open_interest_average(symbol).await {
            Ok(Some(average)) => average,
            Ok(None) => latest,
            Err(e) => {
                tracing::warn!(
                    "[{}] {symbol} open interest history unavailable, using latest: {e}",
                    self.name
                );
                latest
            }
        };

        Ok(OpenInterest { latest, average })
    }

    /// Fetches the current funding rate via the premiumIndex endpoint and maps
    /// the response into the normalized FundingRate model.
    async fn fetch_funding_rate(&self, symbol: &str) -> Result<FundingRate, ExchangeError> {
        let url = format!("{}/fapi/v1/premiumIndex?symbol={}", self.rest_url, symbol);

        let response: PremiumIndexResponse =
            get_json(&self.client, self.name, "premium_index", &url).await?;

        let rate = response
            .last_funding_rate
            .parse::<f64>()
            .map_err(|e| ExchangeError::UnexpectedData(e.to_string()))?;

        Ok(FundingRate {
            exchange: self.name,
            symbol: response.symbol,
            rate,
            next_funding_ms: response.next_funding_time,
        })
    }

    /// Spawns one tokio task per symbol, each maintaining a persistent
    /// combined WebSocket connection for all requested intervals.
    /// Errors inside each task are logged but do not crash the others.
    async fn run_kline_stream(
        &self,
        symbols: &[String],
        intervals: &[Interval],
        store: KlineStore,
    ) -> Result<(), ExchangeError> {
        if intervals.is_empty() {
            return Err(ExchangeError::UnexpectedData(
                "no kline intervals to stream".to_string(),
            ));
        }

        for symbol in symbols {
            let this = self.clone();
            let store = store.clone();
            let symbol = symbol.clone();
            let intervals = intervals.to_vec();

            tokio::spawn(async move {
                reconnect_forever(this.name, symbol.clone(), || {
                    this.stream_symbol(&symbol, &intervals, &store)
                })
                .await;
            });
        }

        Ok(())
    }
}
