use std::time::Duration;

use super::{Exchange, get_json, http_client, mean, number, reconnect_forever};
use crate::errors::ExchangeError;
use crate::models::{FundingRate, Interval, Kline, OpenInterest};
use crate::store::{DEFAULT_CAPACITY, KlineStore};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_tungstenite::{connect_async, tungstenite::Message};

const PING_INTERVAL: Duration = Duration::from_secs(20);
const OI_HISTORY_LIMIT: usize = 30;

#[derive(Debug, Deserialize)]
struct BybitResponse<T> {
    #[serde(rename = "retCode")]
    ret_code: i32,
    #[serde(rename = "retMsg", default)]
    ret_msg: String,
    result: T,
}

impl<T> BybitResponse<T> {
    // Bybit signals errors via retCode, not just HTTP status
    fn into_result(self) -> Result<T, ExchangeError> {
        if self.ret_code != 0 {
            return Err(ExchangeError::UnexpectedData(format!(
                "Bybit retCode {}: {}",
                self.ret_code, self.ret_msg
            )));
        }
        Ok(self.result)
    }
}

#[derive(Debug, Deserialize)]
struct ListResult<T> {
    list: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct BybitTicker {
    symbol: String,

    #[serde(rename = "fundingRate")]
    funding_rate: String,

    #[serde(rename = "nextFundingTime")]
    next_funding_time: String,
}

#[derive(Debug, Deserialize)]
struct BybitOpenInterest {
    #[serde(rename = "openInterest")]
    open_interest: String,
}

#[derive(Debug, Deserialize)]
struct StreamMessage {
    topic: Option<String>,
    op: Option<String>,
    success: Option<bool>,
    #[serde(default)]
    ret_msg: String,
    #[serde(default)]
    data: Vec<StreamKline>,
}

impl StreamMessage {
    /// A rejected subscription leaves the socket open with no data, so it has
    /// to end the session.
    fn check_ack(&self) -> Result<(), ExchangeError> {
        if self.op.as_deref() == Some("subscribe") && self.success == Some(false) {
            return Err(ExchangeError::WebSocket(format!(
                "Bybit rejected subscription: {}",
                self.ret_msg
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct StreamKline {
    start: u64,
    end: u64,
    interval: String,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: String,
}

impl StreamKline {
    fn into_kline(self) -> Result<(Interval, Kline), ExchangeError> {
        let interval = Interval::from_bybit(&self.interval).ok_or_else(|| {
            ExchangeError::UnexpectedData(format!("unknown Bybit interval {}", self.interval))
        })?;

        let kline = Kline {
            open_time: self.start,
            open: number(&Value::String(self.open), "open")?,
            high: number(&Value::String(self.high), "high")?,
            low: number(&Value::String(self.low), "low")?,
            close: number(&Value::String(self.close), "close")?,
            volume: number(&Value::String(self.volume), "volume")?,
            close_time: self.end,
        };
        Ok((interval, kline))
    }
}

/// Bybit kline rows are `[start, open, high, low, close, volume, turnover]`,
/// newest first, with no close time.
fn parse_rows(rows: &[Vec<String>], interval: Interval) -> Result<Vec<Kline>, ExchangeError> {
    let mut klines = rows
        .iter()
        .map(|row| {
            if row.len() < 7 {
                return Err(ExchangeError::UnexpectedData(format!(
                    "Bybit kline has {} fields, expected at least 7",
                    row.len()
                )));
            }
            let field = |i: usize, name: &str| number(&Value::String(row[i].clone()), name);

            let open_time = row[0]
                .parse::<u64>()
                .map_err(|e| ExchangeError::UnexpectedData(format!("invalid start: {e}")))?;
            if open_time == 0 {
                return Err(ExchangeError::UnexpectedData(
                    "Bybit kline start is zero".to_string(),
                ));
            }
            let close_time = open_time.checked_add(interval.millis() - 1).ok_or_else(|| {
                ExchangeError::UnexpectedData(format!("start out of range: {open_time}"))
            })?;

            Ok(Kline {
                open_time,
                open: field(1, "open")?,
                high: field(2, "high")?,
                low: field(3, "low")?,
                close: field(4, "close")?,
                volume: field(5, "volume")?,
                close_time,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    klines.reverse();
    Ok(klines)
}

#[derive(Clone)]
pub struct Bybit {
    client: reqwest::Client,
    rest_url: String,
    ws_url: String,
}

impl Bybit {
    pub fn new(timeout: Duration) -> Result<Self, ExchangeError> {
        Self::with_endpoints(
            "https://api.bybit.com",
            "wss://stream.bybit.com/v5/public/linear",
            timeout,
        )
    }

    pub fn with_endpoints(
        rest_url: &str,
        ws_url: &str,
        timeout: Duration,
    ) -> Result<Self, ExchangeError> {
        Ok(Self {
            client: http_client(timeout)?,
            rest_url: rest_url.trim_end_matches('/').to_string(),
            ws_url: ws_url.to_string(),
        })
    }

    async fn stream_symbol(
        &self,
        symbol: &str,
        intervals: &[Interval],
        store: &KlineStore,
    ) -> Result<(), ExchangeError> {
        let name = self.name();

        for &interval in intervals {
            let klines = self.fetch_klines(symbol, interval, DEFAULT_CAPACITY).await?;
            store.seed(symbol, interval, klines);
        }

        tracing::info!("[{name}] {symbol} stream connecting to {}", self.ws_url);

        let (ws_stream, _) = connect_async(&self.ws_url)
            .await
            .map_err(|e| ExchangeError::WebSocket(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        let topics: Vec<String> = intervals
            .iter()
            .map(|i| format!("kline.{}.{}", i.as_bybit(), symbol))
            .collect();
        let subscribe = json!({ "op": "subscribe", "args": topics }).to_string();
        write
            .send(Message::Text(subscribe.into()))
            .await
            .map_err(|e| ExchangeError::WebSocket(e.to_string()))?;

        let mut ping = tokio::time::interval(PING_INTERVAL);

        loop {
            tokio::select! {
                _ = ping.tick() => {
                    let msg = json!({ "op": "ping" }).to_string();
                    write
                        .send(Message::Text(msg.into()))
                        .await
                        .map_err(|e| ExchangeError::WebSocket(e.to_string()))?;
                }
                msg = read.next() => {
                    let Some(msg) = msg else { return Ok(()) };
                    let msg = msg.map_err(|e| ExchangeError::WebSocket(e.to_string()))?;

                    if let Message::Text(text) = msg {
                        let message: StreamMessage = serde_json::from_str(&text)?;
                        message.check_ack()?;
                        // op acknowledgements and pongs carry no topic
                        if message.topic.is_none() {
                            continue;
                        }
                        for entry in message.data {
                            let (interval, kline) = entry.into_kline()?;
                            store.apply(symbol, interval, kline);
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Exchange for Bybit {
    fn name(&self) -> &'static str {
        "bybit"
    }

    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Kline>, ExchangeError> {
        let url = format!(
            "{}/v5/market/kline?category=linear&symbol={}&interval={}&limit={}",
            self.rest_url,
            symbol,
            interval.as_bybit(),
            limit
        );

        let response: BybitResponse<ListResult<Vec<String>>> =
            get_json(&self.client, self.name(), "klines", &url).await?;

        parse_rows(&response.into_result()?.list, interval)
    }

    /// Latest value is the newest history row, average is the mean of the window.
    async fn fetch_open_interest(&self, symbol: &str) -> Result<OpenInterest, ExchangeError> {
        let url = format!(
            "{}/v5/market/open-interest?category=linear&symbol={}&intervalTime=5min&limit={}",
            self.rest_url, symbol, OI_HISTORY_LIMIT
        );

        let response: BybitResponse<ListResult<BybitOpenInterest>> =
            get_json(&self.client, self.name(), "open_interest", &url).await?;

        let values = response
            .into_result()?
            .list
            .iter()
            .map(|oi| oi.open_interest.parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ExchangeError::UnexpectedData(e.to_string()))?;

        let latest = *values.first().ok_or_else(|| {
            ExchangeError::UnexpectedData(format!("Bybit returned no open interest for {symbol}"))
        })?;
        let average = mean(&values).unwrap_or(latest);

        Ok(OpenInterest { latest, average })
    }

    async fn fetch_funding_rate(&self, symbol: &str) -> Result<FundingRate, ExchangeError> {
        let url = format!(
            "{}/v5/market/tickers?category=linear&symbol={}",
            self.rest_url, symbol
        );

        let response: BybitResponse<ListResult<BybitTicker>> =
            get_json(&self.client, self.name(), "tickers", &url).await?;

        // list always has one item when querying by symbol
        let ticker = response.into_result()?.list.into_iter().next().ok_or_else(|| {
            ExchangeError::UnexpectedData(format!("Bybit returned empty list for {}", symbol))
        })?;

        let rate = ticker
            .funding_rate
            .parse::<f64>()
            .map_err(|e| ExchangeError::UnexpectedData(e.to_string()))?;

        let next_funding_ms = ticker
            .next_funding_time
            .parse::<u64>()
            .map_err(|e| ExchangeError::UnexpectedData(e.to_string()))?;

        Ok(FundingRate {
            exchange: self.name(),
            symbol: ticker.symbol,
            rate,
            next_funding_ms,
        })
    }

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
                reconnect_forever("bybit", symbol.clone(), || {
                    this.stream_symbol(&symbol, &intervals, &store)
                })
                .await;
            });
        }

        Ok(())
    }
}
