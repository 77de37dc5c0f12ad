use error_stack::{Report, bail};

use crate::error::IndicatorError;
use crate::indicator::{Indicator, IndicatorLine, IndicatorSeries, close_prices};
use crate::model::Candle;

/// Simple Moving Average.
pub struct Sma {
    period: usize,
}

impl Sma {
    pub fn new(period: usize) -> Result<Self, Report<IndicatorError>> {
        if period == 0 {
            bail!(IndicatorError::InvalidParameter {
                name: "period must be > 0".into(),
            });
        }
        Ok(Self { period })
    }

    /// Same-length SMA of `prices`; the first `period - 1` entries are NaN.
    pub fn calculate_prices(&self, prices: &[f64]) -> Vec<f64> {
        let mut values = vec![f64::NAN; prices.len()];
        for (i, window) in prices.windows(self.period).enumerate() {
            values[i + self.period - 1] = window.iter().sum::<f64>() / self.period as f64;
        }
        values
    }
}

impl Indicator for Sma {
    fn label(&self) -> String {
        format!("SMA({})", self.period)
    }

    fn calculate(&self, candles: &[Candle]) -> IndicatorSeries {
        let values = self.calculate_prices(&close_prices(candles));
        IndicatorSeries::new(
            self.label(),
            candles,
            vec![IndicatorLine {
                name: "value",
                values,
            }],
        )
    }
}

/// Exponential Moving Average, seeded with the first price.
pub struct Ema {
    period: usize,
}

impl Ema {
    pub fn new(period: usize) -> Result<Self, Report<IndicatorError>> {
        if period == 0 {
            bail!(IndicatorError::InvalidParameter {
                name: "period must be > 0".into(),
            });
        }
        Ok(Self { period })
    }

    /// Same-length EMA of `prices`. Defined from the first entry on.
    pub fn calculate_prices(&self, prices: &[f64]) -> Vec<f64> {
        let Some((&seed, rest)) = prices.split_first() else {
            return Vec::new();
        };

        let k = 2.0 / (self.period as f64 + 1.0);
        let mut ema = seed;
        let mut values = Vec::with_capacity(prices.len());
        values.push(ema);

        for &price in rest {
            ema = (price - ema) * k + ema;
            values.push(ema);
        }

        values
    }
}

impl Indicator for Ema {
    fn label(&self) -> String {
        format!("EMA({})", self.period)
    }

    fn calculate(&self, candles: &[Candle]) -> IndicatorSeries {
        let values = self.calculate_prices(&close_prices(candles));
        IndicatorSeries::new(
            self.label(),
            candles,
            vec![IndicatorLine {
                name: "value",
                values,
            }],
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
    fn sma_period_zero_invalid() {
        assert!(Sma::new(0).is_err());
    }

    #[test]
    fn sma_has_period_minus_one_leading_nans() {
        for period in 1..=6 {
            let sma = Sma::new(period).unwrap();
            let closes: Vec<f64> = (0..10).map(|i| 100.0 + i as f64).collect();
            let series = sma.calculate(&candles_from_closes(&closes));
            let values = series.line("value").unwrap();
            assert_eq!(values.len(), closes.len());
            let leading = values.iter().take_while(|v| v.is_nan()).count();
            assert_eq!(leading, period - 1, "period {period}");
            assert!(values[period - 1..].iter().all(|v| !v.is_nan()));
        }
    }

    #[test]
    fn sma_shorter_than_period_is_all_nan() {
        let sma = Sma::new(5).unwrap();
        let series = sma.calculate(&candles_from_closes(&[1.0; 4]));
        assert_eq!(series.len(), 4);
        assert!(series.line("value").unwrap().iter().all(|v| v.is_nan()));
    }

    #[test]
    fn sma_known_value() {
        let sma = Sma::new(3).unwrap();
        let values = sma.calculate_prices(&[1.0, 2.0, 3.0, 4.0]);
        // (1+2+3)/3 = 2.0, (2+3+4)/3 = 3.0
        assert!((values[2] - 2.0).abs() < 1e-9);
        assert!((values[3] - 3.0).abs() < 1e-9);
    }

    #[test]
    fn sma_empty_input() {
        let sma = Sma::new(3).unwrap();
        assert!(sma.calculate(&[]).is_empty());
    }

    #[test]
    fn ema_period_zero_invalid() {
        assert!(Ema::new(0).is_err());
    }

    #[test]
    fn ema_single_candle_returns_its_close() {
        let ema = Ema::new(10).unwrap();
        let series = ema.calculate(&candles_from_closes(&[42.5]));
        assert_eq!(series.line("value").unwrap(), &[42.5]);
    }

    #[test]
    fn ema_flat_prices() {
        let ema = Ema::new(3).unwrap();
        let values = ema.calculate_prices(&[10.0; 6]);
        for v in &values {
            assert!((v - 10.0).abs() < 1e-9);
        }
    }

    #[test]
    fn ema_known_value() {
        // k = 2 / (3 + 1) = 0.5
        let ema = Ema::new(3).unwrap();
        let values = ema.calculate_prices(&[2.0, 4.0, 8.0]);
        assert!((values[0] - 2.0).abs() < 1e-9);
        assert!((values[1] - 3.0).abs() < 1e-9);
        assert!((values[2] - 5.5).abs() < 1e-9);
    }

    #[test]
    fn ema_all_nan_closes_yield_all_nan() {
        let ema = Ema::new(3).unwrap();
        let values = ema.calculate_prices(&[f64::NAN; 4]);
        assert_eq!(values.len(), 4);
        assert!(values.iter().all(|v| v.is_nan()));
    }
}
