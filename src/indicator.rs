pub mod bollinger;
pub mod kdj;
pub mod ma;
pub mod macd;
pub mod rsi;
pub mod sar;

use std::fmt;

use error_stack::{Report, bail};

use crate::error::IndicatorError;
use crate::model::Candle;

use bollinger::BollingerBands;
use kdj::Kdj;
use ma::{Ema, Sma};
use macd::Macd;
use rsi::Rsi;
use sar::ParabolicSar;

/// A technical indicator computed over a full candle series.
///
/// Candles must be in ascending chronological order (oldest first).
/// Every output line has the same length as the input; positions whose
/// lookback window is not yet filled hold `NaN`. Computation never fails:
/// degenerate input (empty series, NaN closes, zero-range windows) yields
/// `NaN` or the documented neutral value instead.
pub trait Indicator: Send + Sync {
    /// Display label including parameters, e.g. `"MACD(12,26,9)"`.
    fn label(&self) -> String;

    fn calculate(&self, candles: &[Candle]) -> IndicatorSeries;
}

/// One named output line of an indicator.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorLine {
    pub name: &'static str,
    pub values: Vec<f64>,
}

/// Indicator output aligned with the candle series it was computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSeries {
    pub label: String,
    pub time: Vec<i64>,
    pub lines: Vec<IndicatorLine>,
}

impl IndicatorSeries {
    pub fn new(label: String, candles: &[Candle], lines: Vec<IndicatorLine>) -> Self {
        debug_assert!(lines.iter().all(|l| l.values.len() == candles.len()));
        Self {
            label,
            time: candles.iter().map(|c| c.time).collect(),
            lines,
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.time.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    #[cfg(test)]
    pub fn line(&self, name: &str) -> Option<&[f64]> {
        self.lines
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.values.as_slice())
    }

    /// Most recent non-NaN value of each line.
    pub fn latest(&self) -> Vec<(&'static str, Option<f64>)> {
        self.lines
            .iter()
            .map(|l| (l.name, l.values.iter().rev().copied().find(|v| !v.is_nan())))
            .collect()
    }
}

/// Extract close prices from a slice of candles.
pub fn close_prices(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

/// Supported indicator kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorKind {
    Sma,
    Ema,
    Boll,
    Sar,
    Rsi,
    Macd,
    Kdj,
}

impl IndicatorKind {
    pub const ALL: [IndicatorKind; 7] = [
        Self::Sma,
        Self::Ema,
        Self::Boll,
        Self::Sar,
        Self::Rsi,
        Self::Macd,
        Self::Kdj,
    ];

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sma" | "ma" => Some(Self::Sma),
            "ema" => Some(Self::Ema),
            "boll" | "bollinger" => Some(Self::Boll),
            "sar" | "psar" => Some(Self::Sar),
            "rsi" => Some(Self::Rsi),
            "macd" => Some(Self::Macd),
            "kdj" => Some(Self::Kdj),
            _ => None,
        }
    }
}

impl fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Sma => "sma",
            Self::Ema => "ema",
            Self::Boll => "boll",
            Self::Sar => "sar",
            Self::Rsi => "rsi",
            Self::Macd => "macd",
            Self::Kdj => "kdj",
        };
        f.write_str(s)
    }
}

/// An indicator kind with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum IndicatorRequest {
    Sma { period: usize },
    Ema { period: usize },
    Boll { period: usize, multiplier: f64 },
    Sar { step: f64, max_step: f64 },
    Rsi { period: usize },
    Macd { fast: usize, slow: usize, signal: usize },
    Kdj { n: usize, m1: usize, m2: usize },
}

impl IndicatorRequest {
    pub fn with_defaults(kind: IndicatorKind) -> Self {
        match kind {
            IndicatorKind::Sma => Self::Sma { period: 20 },
            IndicatorKind::Ema => Self::Ema { period: 20 },
            IndicatorKind::Boll => Self::Boll {
                period: 20,
                multiplier: 2.0,
            },
            IndicatorKind::Sar => Self::Sar {
                step: 0.02,
                max_step: 0.2,
            },
            IndicatorKind::Rsi => Self::Rsi { period: 14 },
            IndicatorKind::Macd => Self::Macd {
                fast: 12,
                slow: 26,
                signal: 9,
            },
            IndicatorKind::Kdj => Self::Kdj { n: 9, m1: 3, m2: 3 },
        }
    }

    /// Build a request from a kind name and a parameter table.
    ///
    /// Parameters missing from `params` keep their defaults; unknown keys are
    /// ignored.
    pub fn from_params(kind: &str, params: &toml::Table) -> Result<Self, Report<IndicatorError>> {
        let Some(kind) = IndicatorKind::from_str(kind) else {
            bail!(IndicatorError::UnknownKind { kind: kind.into() });
        };

        let get_usize = |key: &str, default: usize| -> Result<usize, Report<IndicatorError>> {
            match params.get(key) {
                None => Ok(default),
                Some(v) => v
                    .as_integer()
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(|| {
                        Report::new(IndicatorError::InvalidParameter {
                            name: format!("{key} must be a non-negative integer"),
                        })
                    }),
            }
        };
        let get_f64 = |key: &str, default: f64| -> Result<f64, Report<IndicatorError>> {
            match params.get(key) {
                None => Ok(default),
                Some(v) => v
                    .as_float()
                    .or_else(|| v.as_integer().map(|n| n as f64))
                    .ok_or_else(|| {
                        Report::new(IndicatorError::InvalidParameter {
                            name: format!("{key} must be a number"),
                        })
                    }),
            }
        };

        let request = match Self::with_defaults(kind) {
            Self::Sma { period } => Self::Sma {
                period: get_usize("period", period)?,
            },
            Self::Ema { period } => Self::Ema {
                period: get_usize("period", period)?,
            },
            Self::Boll { period, multiplier } => Self::Boll {
                period: get_usize("period", period)?,
                multiplier: get_f64("multiplier", multiplier)?,
            },
            Self::Sar { step, max_step } => Self::Sar {
                step: get_f64("step", step)?,
                max_step: get_f64("max_step", max_step)?,
            },
            Self::Rsi { period } => Self::Rsi {
                period: get_usize("period", period)?,
            },
            Self::Macd { fast, slow, signal } => Self::Macd {
                fast: get_usize("fast", fast)?,
                slow: get_usize("slow", slow)?,
                signal: get_usize("signal", signal)?,
            },
            Self::Kdj { n, m1, m2 } => Self::Kdj {
                n: get_usize("n", n)?,
                m1: get_usize("m1", m1)?,
                m2: get_usize("m2", m2)?,
            },
        };
        Ok(request)
    }

    pub fn build(&self) -> Result<Box<dyn Indicator>, Report<IndicatorError>> {
        let indicator: Box<dyn Indicator> = match *self {
            Self::Sma { period } => Box::new(Sma::new(period)?),
            Self::Ema { period } => Box::new(Ema::new(period)?),
            Self::Boll { period, multiplier } => Box::new(BollingerBands::new(period, multiplier)?),
            Self::Sar { step, max_step } => Box::new(ParabolicSar::new(step, max_step)?),
            Self::Rsi { period } => Box::new(Rsi::new(period)?),
            Self::Macd { fast, slow, signal } => Box::new(Macd::new(fast, slow, signal)?),
            Self::Kdj { n, m1, m2 } => Box::new(Kdj::new(n, m1, m2)?),
        };
        Ok(indicator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(src: &str) -> toml::Table {
        toml::from_str(src).unwrap()
    }

    #[test]
    fn kind_aliases() {
        assert_eq!(IndicatorKind::from_str("MA"), Some(IndicatorKind::Sma));
        assert_eq!(IndicatorKind::from_str("bollinger"), Some(IndicatorKind::Boll));
        assert_eq!(IndicatorKind::from_str("psar"), Some(IndicatorKind::Sar));
        assert_eq!(IndicatorKind::from_str("ichimoku"), None);
    }

    #[test]
    fn missing_params_use_defaults() {
        let request = IndicatorRequest::from_params("macd", &toml::Table::new()).unwrap();
        assert_eq!(
            request,
            IndicatorRequest::Macd {
                fast: 12,
                slow: 26,
                signal: 9
            }
        );
    }

    #[test]
    fn params_override_defaults() {
        let request =
            IndicatorRequest::from_params("boll", &table("period = 10\nmultiplier = 3")).unwrap();
        assert_eq!(
            request,
            IndicatorRequest::Boll {
                period: 10,
                multiplier: 3.0
            }
        );
    }

    #[test]
    fn negative_period_rejected() {
        assert!(IndicatorRequest::from_params("rsi", &table("period = -3")).is_err());
    }

    #[test]
    fn unknown_kind_rejected() {
        assert!(IndicatorRequest::from_params("vwap", &toml::Table::new()).is_err());
    }

    #[test]
    fn every_default_request_builds() {
        let kinds = [
            IndicatorKind::Sma,
            IndicatorKind::Ema,
            IndicatorKind::Boll,
            IndicatorKind::Sar,
            IndicatorKind::Rsi,
            IndicatorKind::Macd,
            IndicatorKind::Kdj,
        ];
        for kind in kinds {
            let indicator = IndicatorRequest::with_defaults(kind).build().unwrap();
            let series = indicator.calculate(&[]);
            assert!(series.is_empty(), "{kind} on empty input");
        }
    }

    #[test]
    fn zero_period_fails_to_build() {
        assert!(IndicatorRequest::Sma { period: 0 }.build().is_err());
        assert!(IndicatorRequest::Kdj { n: 9, m1: 0, m2: 3 }.build().is_err());
    }

    #[test]
    fn latest_skips_trailing_nan() {
        let series = IndicatorSeries {
            label: "X".into(),
            time: vec![1, 2, 3],
            lines: vec![IndicatorLine {
                name: "value",
                values: vec![f64::NAN, 5.0, f64::NAN],
            }],
        };
        assert_eq!(series.latest(), vec![("value", Some(5.0))]);
        assert_eq!(series.line("value").map(|v| v.len()), Some(3));
        assert!(series.line("other").is_none());
    }
}
