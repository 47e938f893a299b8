//! Technical indicators over candle history.
//!
//! Every function returns 0.0 when there is not enough history to produce a
//! meaningful value, so callers can always fill a snapshot field.

use crate::models::Kline;

pub fn closes(klines: &[Kline]) -> Vec<f64> {
    klines.iter().map(|k| k.close).collect()
}

/// Exponential moving average, seeded with the simple average of the first
/// `period` closes.
pub fn ema(closes: &[f64], period: usize) -> f64 {
    if period == 0 || closes.len() < period {
        return 0.0;
    }

    let mut value = closes[..period].iter().sum::<f64>() / period as f64;
    let multiplier = 2.0 / (period as f64 + 1.0);

    for close in &closes[period..] {
        value = (close - value) * multiplier + value;
    }

    value
}

/// MACD line: EMA12 minus EMA26.
pub fn macd(closes: &[f64]) -> f64 {
    if closes.len() < 26 {
        return 0.0;
    }
    ema(closes, 12) - ema(closes, 26)
}

/// Relative strength index with Wilder smoothing.
pub fn rsi(closes: &[f64], period: usize) -> f64 {
    if period == 0 || closes.len() <= period {
        return 0.0;
    }

    let mut gains = 0.0;
    let mut losses = 0.0;
    for w in closes[..=period].windows(2) {
        let change = w[1] - w[0];
        if change > 0.0 {
            gains += change;
        } else {
            losses -= change;
        }
    }

    let n = period as f64;
    let mut avg_gain = gains / n;
    let mut avg_loss = losses / n;

    for w in closes[period..].windows(2) {
        let change = w[1] - w[0];
        let (gain, loss) = if change > 0.0 {
            (change, 0.0)
        } else {
            (0.0, -change)
        };
        avg_gain = (avg_gain * (n - 1.0) + gain) / n;
        avg_loss = (avg_loss * (n - 1.0) + loss) / n;
    }

    if avg_loss == 0.0 {
        return 100.0;
    }

    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

/// Average true range with Wilder smoothing.
pub fn atr(klines: &[Kline], period: usize) -> f64 {
    if period == 0 || klines.len() <= period {
        return 0.0;
    }

    let true_ranges: Vec<f64> = klines
        .windows(2)
        .map(|w| {
            let (prev, cur) = (&w[0], &w[1]);
            (cur.high - cur.low)
                .max((cur.high - prev.close).abs())
                .max((cur.low - prev.close).abs())
        })
        .collect();

    let n = period as f64;
    let mut value = true_ranges[..period].iter().sum::<f64>() / n;
    for tr in &true_ranges[period..] {
        value = (value * (n - 1.0) + tr) / n;
    }

    value
}
