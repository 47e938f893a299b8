use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One OHLCV candle, normalized across exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub open_time: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    M1,
    M3,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl Interval {
    /// Interval code used by Binance-style APIs ("3m", "4h").
    pub fn as_binance(&self) -> &'static str {
        match self {
            Interval::M1 => "1m",
            Interval::M3 => "3m",
            Interval::M5 => "5m",
            Interval::M15 => "15m",
            Interval::M30 => "30m",
            Interval::H1 => "1h",
            Interval::H4 => "4h",
            Interval::D1 => "1d",
        }
    }

    /// Interval code used by Bybit v5 (minutes, or "D").
    pub fn as_bybit(&self) -> &'static str {
        match self {
            Interval::M1 => "1",
            Interval::M3 => "3",
            Interval::M5 => "5",
            Interval::M15 => "15",
            Interval::M30 => "30",
            Interval::H1 => "60",
            Interval::H4 => "240",
            Interval::D1 => "D",
        }
    }

    pub fn millis(&self) -> u64 {
        let minutes = match self {
            Interval::M1 => 1,
            Interval::M3 => 3,
            Interval::M5 => 5,
            Interval::M15 => 15,
            Interval::M30 => 30,
            Interval::H1 => 60,
            Interval::H4 => 240,
            Interval::D1 => 1440,
        };
        minutes * 60_000
    }

    pub fn from_bybit(code: &str) -> Option<Self> {
        Self::all().iter().copied().find(|i| i.as_bybit() == code)
    }

    pub fn all() -> &'static [Interval] {
        &[
            Interval::M1,
            Interval::M3,
            Interval::M5,
            Interval::M15,
            Interval::M30,
            Interval::H1,
            Interval::H4,
            Interval::D1,
        ]
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_binance())
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|i| i.as_binance() == s)
            .ok_or_else(|| format!("unknown interval: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpenInterest {
    pub latest: f64,
    pub average: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FundingRate {
    pub exchange: &'static str,
    pub symbol: String,
    pub rate: f64,
    pub next_funding_ms: u64,
}

/// Recent 3-minute points, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IntradaySeries {
    pub mid_prices: Vec<f64>,
    pub ema20_values: Vec<f64>,
    pub macd_values: Vec<f64>,
    pub rsi7_values: Vec<f64>,
    pub rsi14_values: Vec<f64>,
}

/// 4-hour context around the intraday picture.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LongerTermContext {
    pub ema20: f64,
    pub ema50: f64,
    pub atr3: f64,
    pub atr14: f64,
    pub current_volume: f64,
    pub average_volume: f64,
    pub macd_values: Vec<f64>,
    pub rsi14_values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub current_price: f64,
    pub price_change_1h: f64,
    pub price_change_4h: f64,
    pub current_ema20: f64,
    pub current_macd: f64,
    pub current_rsi7: f64,
    pub open_interest: Option<OpenInterest>,
    pub funding_rate: Option<f64>,
    pub intraday: IntradaySeries,
    pub longer_term: LongerTermContext,
}

fn write_series(f: &mut fmt::Formatter<'_>, label: &str, values: &[f64]) -> fmt::Result {
    let joined = values
        .iter()
        .map(|v| format!("{v:.3}"))
        .collect::<Vec<_>>()
        .join(", ");
    writeln!(f, "{label}: [{joined}]")
}

impl fmt::Display for MarketSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} price={:.4} ema20={:.3} macd={:.3} rsi7={:.3}",
            self.symbol, self.current_price, self.current_ema20, self.current_macd, self.current_rsi7
        )?;
        writeln!(
            f,
            "change 1h={:.2}% 4h={:.2}%",
            self.price_change_1h, self.price_change_4h
        )?;

        match &self.open_interest {
            Some(oi) => writeln!(
                f,
                "Open interest: latest={:.2} average={:.2}",
                oi.latest, oi.average
            )?,
            None => writeln!(f, "Open interest: unavailable")?,
        }
        match self.funding_rate {
            Some(rate) => writeln!(f, "Funding rate: {rate:.4e}")?,
            None => writeln!(f, "Funding rate: unavailable")?,
        }

        writeln!(f)?;
        writeln!(f, "Intraday (3m, oldest -> latest)")?;
        write_series(f, "Mid prices", &self.intraday.mid_prices)?;
        write_series(f, "EMA20", &self.intraday.ema20_values)?;
        write_series(f, "MACD", &self.intraday.macd_values)?;
        write_series(f, "RSI7", &self.intraday.rsi7_values)?;
        write_series(f, "RSI14", &self.intraday.rsi14_values)?;

        let lt = &self.longer_term;
        writeln!(f)?;
        writeln!(f, "Longer term (4h)")?;
        writeln!(f, "EMA20={:.3} vs EMA50={:.3}", lt.ema20, lt.ema50)?;
        writeln!(f, "ATR3={:.3} vs ATR14={:.3}", lt.atr3, lt.atr14)?;
        writeln!(
            f,
            "Volume={:.3} vs average={:.3}",
            lt.current_volume, lt.average_volume
        )?;
        write_series(f, "MACD", &lt.macd_values)?;
        write_series(f, "RSI14", &lt.rsi14_values)
    }
}
