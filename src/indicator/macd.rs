use error_stack::{Report, bail};

use crate::error::IndicatorError;
use crate::indicator::ma::Ema;
use crate::indicator::{Indicator, IndicatorLine, IndicatorSeries, close_prices};
use crate::model::Candle;

pub struct Macd {
    fast: Ema,
    slow: Ema,
    signal: Ema,
    periods: (usize, usize, usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MacdOutput {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

impl Macd {
    pub fn new(
        fast_period: usize,
        slow_period: usize,
        signal_period: usize,
    ) -> Result<Self, Report<IndicatorError>> {
        if fast_period == 0 || slow_period == 0 || signal_period == 0 {
            bail!(IndicatorError::InvalidParameter {
                name: "all periods must be > 0".into(),
            });
        }
        if fast_period >= slow_period {
            bail!(IndicatorError::InvalidParameter {
                name: "fast period must be < slow period".into(),
            });
        }
        Ok(Self {
            fast: Ema::new(fast_period)?,
            slow: Ema::new(slow_period)?,
            signal: Ema::new(signal_period)?,
            periods: (fast_period, slow_period, signal_period),
        })
    }

    /// MACD line, signal line and histogram, all aligned with `candles`.
    ///
    /// The signal EMA runs over the MACD line starting at its first defined
    /// value and is left-padded with NaN back to full length.
    pub fn calculate_full(&self, candles: &[Candle]) -> MacdOutput {
        let prices = close_prices(candles);
        let fast_ema = self.fast.calculate_prices(&prices);
        let slow_ema = self.slow.calculate_prices(&prices);

        let macd: Vec<f64> = fast_ema
            .iter()
            .zip(slow_ema.iter())
            .map(|(f, s)| f - s)
            .collect();

        let start = macd.iter().position(|v| !v.is_nan()).unwrap_or(macd.len());
        let mut signal = vec![f64::NAN; start];
        signal.extend(self.signal.calculate_prices(&macd[start..]));

        let histogram = macd
            .iter()
            .zip(signal.iter())
            .map(|(&m, &s)| {
                if m.is_nan() || s.is_nan() {
                    f64::NAN
                } else {
                    m - s
                }
            })
            .collect();

        MacdOutput {
            macd,
            signal,
            histogram,
        }
    }
}

impl Indicator for Macd {
    fn label(&self) -> String {
        let (fast, slow, signal) = self.periods;
        format!("MACD({fast},{slow},{signal})")
    }

    fn calculate(&self, candles: &[Candle]) -> IndicatorSeries {
        let output = self.calculate_full(candles);
        IndicatorSeries::new(
            self.label(),
            candles,
            vec![
                IndicatorLine {
                    name: "macd",
                    values: output.macd,
                },
                IndicatorLine {
                    name: "signal",
                    values: output.signal,
                },
                IndicatorLine {
                    name: "histogram",
                    values: output.histogram,
                },
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle {
                time: i as i64 * 60,
                open: c,
                high: c,
                low: c,
                close: c,
                volume: 1.0,
            })
            .collect()
    }

    #[test]
    fn macd_invalid_fast_ge_slow() {
        assert!(Macd::new(26, 12, 9).is_err());
        assert!(Macd::new(12, 12, 9).is_err());
    }

    #[test]
    fn macd_period_zero_invalid() {
        assert!(Macd::new(0, 26, 9).is_err());
    }

    #[test]
    fn macd_flat_prices_returns_zero() {
        let macd = Macd::new(3, 5, 3).unwrap();
        let output = macd.calculate_full(&candles_from_closes(&[10.0_f64; 10]));
        for v in output.macd.iter().chain(&output.histogram) {
            assert!(v.abs() < 1e-9, "expected 0 for flat prices, got {v}");
        }
    }

    #[test]
    fn macd_outputs_match_input_length() {
        let macd = Macd::new(3, 5, 3).unwrap();
        let closes: Vec<f64> = (1..=12).map(|i| i as f64).collect();
        let output = macd.calculate_full(&candles_from_closes(&closes));
        assert_eq!(output.macd.len(), 12);
        assert_eq!(output.signal.len(), 12);
        assert_eq!(output.histogram.len(), 12);
    }

    #[test]
    fn macd_histogram_is_macd_minus_signal() {
        let macd = Macd::new(12, 26, 9).unwrap();
        let closes: Vec<f64> = (0..80)
            .map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0 + i as f64 * 0.1)
            .collect();
        let output = macd.calculate_full(&candles_from_closes(&closes));
        for i in 0..closes.len() {
            let (m, s, h) = (output.macd[i], output.signal[i], output.histogram[i]);
            if !m.is_nan() && !s.is_nan() {
                assert_eq!(h, m - s, "index {i}");
            }
        }
    }

    #[test]
    fn macd_signal_seeds_from_first_macd_value() {
        let macd = Macd::new(2, 4, 3).unwrap();
        let output = macd.calculate_full(&candles_from_closes(&[1.0, 3.0, 2.0, 5.0]));
        assert_eq!(output.signal[0], output.macd[0]);
        assert_eq!(output.histogram[0], 0.0);
    }

    #[test]
    fn macd_nan_prefix_is_padded() {
        let macd = Macd::new(2, 4, 3).unwrap();
        let candles = candles_from_closes(&[f64::NAN, 1.0, 2.0]);
        let output = macd.calculate_full(&candles);
        // EMA seeded from a NaN close stays NaN throughout.
        assert!(output.macd.iter().all(|v| v.is_nan()));
        assert!(output.signal.iter().all(|v| v.is_nan()));
        assert!(output.histogram.iter().all(|v| v.is_nan()));
        assert_eq!(output.signal.len(), 3);
    }

    #[test]
    fn macd_empty_input() {
        let macd = Macd::new(12, 26, 9).unwrap();
        assert!(macd.calculate(&[]).is_empty());
    }
}
