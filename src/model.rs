use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bucket size of a candle series.
///
/// String representations match the backend's `interval` query values
/// (e.g. `"1m"`, `"4h"`, `"1M"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    Min1,
    Min3,
    Min5,
    Min15,
    Min30,
    Hour1,
    Hour2,
    Hour4,
    Hour6,
    Hour8,
    Hour12,
    Day1,
    Day3,
    Week1,
    Month1,
}

impl Interval {
    /// Parse a backend-format string into an `Interval`.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(Self::Min1),
            "3m" => Some(Self::Min3),
            "5m" => Some(Self::Min5),
            "15m" => Some(Self::Min15),
            "30m" => Some(Self::Min30),
            "1h" => Some(Self::Hour1),
            "2h" => Some(Self::Hour2),
            "4h" => Some(Self::Hour4),
            "6h" => Some(Self::Hour6),
            "8h" => Some(Self::Hour8),
            "12h" => Some(Self::Hour12),
            "1d" => Some(Self::Day1),
            "3d" => Some(Self::Day3),
            "1w" => Some(Self::Week1),
            "1M" => Some(Self::Month1),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Min1 => "1m",
            Self::Min3 => "3m",
            Self::Min5 => "5m",
            Self::Min15 => "15m",
            Self::Min30 => "30m",
            Self::Hour1 => "1h",
            Self::Hour2 => "2h",
            Self::Hour4 => "4h",
            Self::Hour6 => "6h",
            Self::Hour8 => "8h",
            Self::Hour12 => "12h",
            Self::Day1 => "1d",
            Self::Day3 => "3d",
            Self::Week1 => "1w",
            Self::Month1 => "1M",
        }
    }

    /// Nominal bucket length in seconds. A month counts as 30 days.
    pub fn seconds(self) -> i64 {
        const MIN: i64 = 60;
        const HOUR: i64 = 60 * MIN;
        const DAY: i64 = 24 * HOUR;
        match self {
            Self::Min1 => MIN,
            Self::Min3 => 3 * MIN,
            Self::Min5 => 5 * MIN,
            Self::Min15 => 15 * MIN,
            Self::Min30 => 30 * MIN,
            Self::Hour1 => HOUR,
            Self::Hour2 => 2 * HOUR,
            Self::Hour4 => 4 * HOUR,
            Self::Hour6 => 6 * HOUR,
            Self::Hour8 => 8 * HOUR,
            Self::Hour12 => 12 * HOUR,
            Self::Day1 => DAY,
            Self::Day3 => 3 * DAY,
            Self::Week1 => 7 * DAY,
            Self::Month1 => 30 * DAY,
        }
    }

    /// Whether `to - from` is a whole number of buckets. Months vary in
    /// length, so any step counts as whole for `1M`.
    pub fn spans_whole_buckets(self, from: i64, to: i64) -> bool {
        self == Self::Month1 || (to - from) % self.seconds() == 0
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetClass {
    Crypto,
    Equity,
}

impl AssetClass {
    /// Accepts `"crypto"`, and either `"stock"` or `"equity"` for equities.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "crypto" => Some(Self::Crypto),
            "stock" | "equity" => Some(Self::Equity),
            _ => None,
        }
    }

    /// Value of the `asset_type` query parameter on the klines endpoint.
    pub fn query_value(self) -> &'static str {
        match self {
            Self::Crypto => "crypto",
            Self::Equity => "stock",
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.query_value())
    }
}

/// The (symbol, interval, asset class) tuple a chart is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Selection {
    pub symbol: String,
    pub interval: Interval,
    pub asset: AssetClass,
}

impl Selection {
    pub fn new(symbol: &str, interval: Interval, asset: AssetClass) -> Self {
        Self {
            symbol: symbol.trim().to_uppercase(),
            interval,
            asset,
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.symbol, self.interval, self.asset)
    }
}

/// One OHLCV bucket. `time` is the bucket's opening timestamp in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl Candle {
    pub fn open_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.time, 0)
    }

    /// Prices are finite and volume is non-negative.
    pub fn is_well_formed(&self) -> bool {
        [self.open, self.high, self.low, self.close]
            .iter()
            .all(|p| p.is_finite())
            && self.volume.is_finite()
            && self.volume >= 0.0
    }
}

/// 24h statistics pushed by the multiplexed ticker stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerStats {
    pub last_price: f64,
    pub price_change: f64,
    pub price_change_percent: f64,
}
