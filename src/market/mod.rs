use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::errors::ExchangeError;
use crate::exchanges::Exchange;
use crate::indicators::{atr, closes, ema, macd, rsi};
use crate::models::{
    FundingRate, Interval, IntradaySeries, Kline, LongerTermContext, MarketSnapshot, OpenInterest,
};
use crate::store::KlineStore;

pub const INTRADAY_INTERVAL: Interval = Interval::M3;
pub const INTRADAY_LIMIT: usize = 40;
pub const LONGER_TERM_INTERVAL: Interval = Interval::H4;
pub const LONGER_TERM_LIMIT: usize = 60;

/// Points kept in every indicator series.
const SERIES_LEN: usize = 10;
/// 20 x 3m bars = 1h.
const BARS_PER_HOUR: usize = 20;

/// Uppercases the symbol and appends the USDT quote when it is missing.
pub fn normalize_symbol(symbol: &str) -> String {
    let symbol = symbol.trim().to_uppercase();
    if symbol.ends_with("USDT") {
        symbol
    } else {
        format!("{symbol}USDT")
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn percent_change(from: f64, to: f64) -> f64 {
    if from > 0.0 {
        (to - from) / from * 100.0
    } else {
        0.0
    }
}

impl MarketSnapshot {
    /// Derives a snapshot from intraday (3m) and longer-term (4h) candles,
    /// both oldest first.
    pub fn from_klines(
        symbol: &str,
        intraday: &[Kline],
        longer_term: &[Kline],
        open_interest: Option<OpenInterest>,
        funding_rate: Option<f64>,
    ) -> Result<Self, ExchangeError> {
        let last = intraday.last().ok_or_else(|| {
            ExchangeError::UnexpectedData(format!("no intraday klines for {symbol}"))
        })?;
        let current_price = last.close;
        if current_price <= 0.0 {
            return Err(ExchangeError::UnexpectedData(format!(
                "non-positive price {current_price} for {symbol}"
            )));
        }

        let intraday_closes = closes(intraday);

        let price_change_1h = if intraday.len() > BARS_PER_HOUR {
            percent_change(intraday[intraday.len() - 1 - BARS_PER_HOUR].close, current_price)
        } else {
            0.0
        };

        let price_change_4h = match longer_term {
            [.., prev, _] => percent_change(prev.close, current_price),
            _ => 0.0,
        };

        Ok(Self {
            symbol: symbol.to_string(),
            current_price,
            price_change_1h,
            price_change_4h,
            current_ema20: ema(&intraday_closes, 20),
            current_macd: macd(&intraday_closes),
            current_rsi7: rsi(&intraday_closes, 7),
            open_interest,
            funding_rate,
            intraday: intraday_series(&intraday_closes),
            longer_term: longer_term_context(longer_term),
        })
    }
}

/// Indicator values at each of the last SERIES_LEN bars, each computed over
/// the history up to and including that bar.
fn intraday_series(closes: &[f64]) -> IntradaySeries {
    let mut series = IntradaySeries::default();
    let start = closes.len().saturating_sub(SERIES_LEN);

    for i in start..closes.len() {
        let history = &closes[..=i];
        series.mid_prices.push(closes[i]);
        if i >= 19 {
            series.ema20_values.push(ema(history, 20));
        }
        if i >= 25 {
            series.macd_values.push(macd(history));
        }
        if i >= 7 {
            series.rsi7_values.push(rsi(history, 7));
        }
        if i >= 14 {
            series.rsi14_values.push(rsi(history, 14));
        }
    }

    series
}

fn longer_term_context(klines: &[Kline]) -> LongerTermContext {
    let closes = closes(klines);
    let volumes: Vec<f64> = klines.iter().map(|k| k.volume).collect();

    let mut context = LongerTermContext {
        ema20: ema(&closes, 20),
        ema50: ema(&closes, 50),
        atr3: atr(klines, 3),
        atr14: atr(klines, 14),
        current_volume: volumes.last().copied().unwrap_or(0.0),
        average_volume: if volumes.is_empty() {
            0.0
        } else {
            volumes.iter().sum::<f64>() / volumes.len() as f64
        },
        ..Default::default()
    };

    let start = closes.len().saturating_sub(SERIES_LEN);
    for i in start..closes.len() {
        let history = &closes[..=i];
        if i >= 25 {
            context.macd_values.push(macd(history));
        }
        if i >= 14 {
            context.rsi14_values.push(rsi(history, 14));
        }
    }

    context
}

/// Aggregates candles, open interest and funding from one exchange into
/// market snapshots.
#[derive(Clone)]
pub struct MarketData {
    exchange: Arc<dyn Exchange>,
    store: KlineStore,
}

impl MarketData {
    pub fn new(exchange: Arc<dyn Exchange>, store: KlineStore) -> Self {
        Self { exchange, store }
    }

    /// Candles from the live cache when it holds a full, current window,
    /// otherwise over REST.
    pub async fn klines(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Kline>, ExchangeError> {
        if let Some(klines) = self.store.latest_fresh(symbol, interval, limit, now_ms()) {
            return Ok(klines);
        }
        if self.store.len(symbol, interval) >= limit {
            tracing::debug!("{symbol} {interval} cache is stale, fetching over REST");
        }
        self.exchange.fetch_klines(symbol, interval, limit).await
    }

    pub async fn funding_rate(&self, symbol: &str) -> Result<FundingRate, ExchangeError> {
        self.exchange
            .fetch_funding_rate(&normalize_symbol(symbol))
            .await
    }

    /// Builds a fresh snapshot. Candle failures fail the call; open interest
    /// and funding failures are logged and leave their field empty.
    pub async fn get(&self, symbol: &str) -> Result<MarketSnapshot, ExchangeError> {
        let symbol = normalize_symbol(symbol);
        let name = self.exchange.name();

        let (intraday, longer_term, open_interest, funding) = tokio::join!(
            self.klines(&symbol, INTRADAY_INTERVAL, INTRADAY_LIMIT),
            self.klines(&symbol, LONGER_TERM_INTERVAL, LONGER_TERM_LIMIT),
            self.exchange.fetch_open_interest(&symbol),
            self.exchange.fetch_funding_rate(&symbol),
        );

        let intraday = intraday?;
        let longer_term = longer_term?;

        let open_interest = open_interest
            .inspect_err(|e| tracing::warn!("[{name}] {symbol} open interest unavailable: {e}"))
            .ok();
        let funding_rate = funding
            .inspect_err(|e| tracing::warn!("[{name}] {symbol} funding rate unavailable: {e}"))
            .ok()
            .map(|f| f.rate);

        MarketSnapshot::from_klines(&symbol, &intraday, &longer_term, open_interest, funding_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(closes: impl IntoIterator<Item = f64>) -> Vec<Kline> {
        closes
            .into_iter()
            .enumerate()
            .map(|(i, close)| Kline {
                open_time: 1_700_000_000_000 + i as u64 * 180_000,
                open: close,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 10.0 + i as f64,
                close_time: 1_700_000_000_000 + i as u64 * 180_000 + 179_999,
            })
            .collect()
    }

    #[test]
    fn normalizes_symbols() {
        assert_eq!(normalize_symbol("btc"), "BTCUSDT");
        assert_eq!(normalize_symbol(" ethusdt "), "ETHUSDT");
        assert_eq!(normalize_symbol("SOLUSDT"), "SOLUSDT");
    }

    #[test]
    fn snapshot_from_full_history() {
        let intraday = series((0..40).map(|i| 100.0 + i as f64));
        let longer = series((0..60).map(|i| 50.0 + i as f64));
        let oi = OpenInterest {
            latest: 1_000.0,
            average: 990.0,
        };

        let snap =
            MarketSnapshot::from_klines("BTCUSDT", &intraday, &longer, Some(oi), Some(1e-4)).unwrap();

        assert_eq!(snap.current_price, 139.0);
        // 20 bars back is 119
        assert!((snap.price_change_1h - (139.0 - 119.0) / 119.0 * 100.0).abs() < 1e-9);
        // previous 4h close is 108
        assert!((snap.price_change_4h - (139.0 - 108.0) / 108.0 * 100.0).abs() < 1e-9);
        assert_eq!(snap.current_rsi7, 100.0);
        assert!(snap.current_macd > 0.0);
        assert_eq!(snap.open_interest, Some(oi));

        assert_eq!(snap.intraday.mid_prices.len(), 10);
        assert_eq!(snap.intraday.mid_prices[0], 130.0);
        assert_eq!(snap.intraday.ema20_values.len(), 10);
        assert_eq!(snap.intraday.macd_values.len(), 10);

        assert_eq!(snap.longer_term.current_volume, 69.0);
        assert!((snap.longer_term.average_volume - 39.5).abs() < 1e-9);
        assert!(snap.longer_term.ema20 > snap.longer_term.ema50);
        assert!((snap.longer_term.atr3 - 2.0).abs() < 1e-9);
        assert_eq!(snap.longer_term.rsi14_values.len(), 10);
    }

    #[test]
    fn short_history_leaves_indicators_empty() {
        let intraday = series([100.0, 101.0, 102.0]);

        let snap = MarketSnapshot::from_klines("ETHUSDT", &intraday, &[], None, None).unwrap();

        assert_eq!(snap.current_price, 102.0);
        assert_eq!(snap.price_change_1h, 0.0);
        assert_eq!(snap.price_change_4h, 0.0);
        assert_eq!(snap.current_ema20, 0.0);
        assert_eq!(snap.intraday.mid_prices, vec![100.0, 101.0, 102.0]);
        assert!(snap.intraday.rsi7_values.is_empty());
        assert_eq!(snap.longer_term, LongerTermContext::default());
    }

    #[test]
    fn empty_or_zero_price_is_rejected() {
        assert!(MarketSnapshot::from_klines("BTCUSDT", &[], &[], None, None).is_err());
        assert!(MarketSnapshot::from_klines("BTCUSDT", &series([0.0]), &[], None, None).is_err());
    }
}
