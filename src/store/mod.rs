use crate::models::{Interval, Kline};
use dashmap::DashMap;
use std::sync::Arc;

pub const DEFAULT_CAPACITY: usize = 200;

/// Live candle cache shared between the stream tasks and snapshot reads.
#[derive(Clone)]
pub struct KlineStore {
    inner: Arc<DashMap<String, Vec<Kline>>>,
    capacity: usize,
}

impl Default for KlineStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KlineStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Key format e.g.: "BTCUSDT:3m"
    fn key(symbol: &str, interval: Interval) -> String {
        format!("{}:{}", symbol, interval)
    }

    /// Replaces the whole series, keeping only the newest `capacity` candles.
    pub fn seed(&self, symbol: &str, interval: Interval, mut klines: Vec<Kline>) {
        if klines.len() > self.capacity {
            klines.drain(..klines.len() - self.capacity);
        }
        self.inner.insert(Self::key(symbol, interval), klines);
    }

    /// Applies one streamed candle: same open time replaces the last candle,
    /// a newer one is appended, an older one is dropped.
    pub fn apply(&self, symbol: &str, interval: Interval, kline: Kline) {
        let mut series = self.inner.entry(Self::key(symbol, interval)).or_default();

        match series.last().map(|k| k.open_time) {
            Some(last) if kline.open_time == last => {
                if let Some(slot) = series.last_mut() {
                    *slot = kline;
                }
            }
            Some(last) if kline.open_time < last => {}
            _ => {
                series.push(kline);
                if series.len() > self.capacity {
                    let excess = series.len() - self.capacity;
                    series.drain(..excess);
                }
            }
        }
    }

    /// The newest `limit` candles, oldest first, if the cache holds that many.
    pub fn latest(&self, symbol: &str, interval: Interval, limit: usize) -> Option<Vec<Kline>> {
        let series = self.inner.get(&Self::key(symbol, interval))?;
        if series.len() < limit {
            return None;
        }
        Some(series[series.len() - limit..].to_vec())
    }

    /// Like `latest`, but only while the newest candle is current: it is still
    /// open, or closed less than one interval before `now_ms`. A stream that
    /// stopped updating makes its series stale and callers go back to REST.
    pub fn latest_fresh(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
        now_ms: u64,
    ) -> Option<Vec<Kline>> {
        let klines = self.latest(symbol, interval, limit)?;
        let last = klines.last()?;
        if now_ms.saturating_sub(last.close_time) > interval.millis() {
            return None;
        }
        Some(klines)
    }

    pub fn len(&self, symbol: &str, interval: Interval) -> usize {
        self.inner
            .get(&Self::key(symbol, interval))
            .map(|r| r.len())
            .unwrap_or(0)
    }
}
