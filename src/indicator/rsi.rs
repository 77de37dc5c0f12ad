use error_stack::{Report, bail};

use crate::error::IndicatorError;
use crate::indicator::{Indicator, IndicatorLine, IndicatorSeries, close_prices};
use crate::model::Candle;

/// RSI (Relative Strength Index) using Wilder's smoothing method.
pub struct Rsi {
    period: usize,
}

impl Rsi {
    pub fn new(period: usize) -> Result<Self, Report<IndicatorError>> {
        if period == 0 {
            bail!(IndicatorError::InvalidParameter {
                name: "period must be > 0".into(),
            });
        }
        Ok(Self { period })
    }

    /// Same-length RSI of `prices`. The first value lands at index `period`;
    /// with fewer than `period + 1` prices every entry is NaN.
    pub fn calculate_prices(&self, prices: &[f64]) -> Vec<f64> {
        let mut values = vec![f64::NAN; prices.len()];
        if prices.len() < self.period + 1 {
            return values;
        }

        let deltas: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();
        let period = self.period as f64;

        // Seed using simple average of first `period` gains/losses
        let mut avg_gain = deltas[..self.period]
            .iter()
            .map(|&d| split_delta(d).0)
            .sum::<f64>()
            / period;
        let mut avg_loss = deltas[..self.period]
            .iter()
            .map(|&d| split_delta(d).1)
            .sum::<f64>()
            / period;
        values[self.period] = rsi_value(avg_gain, avg_loss);

        // Wilder smoothing for subsequent values
        for (i, &delta) in deltas.iter().enumerate().skip(self.period) {
            let (gain, loss) = split_delta(delta);
            avg_gain = (avg_gain * (period - 1.0) + gain) / period;
            avg_loss = (avg_loss * (period - 1.0) + loss) / period;
            values[i + 1] = rsi_value(avg_gain, avg_loss);
        }

        values
    }
}

impl Indicator for Rsi {
    fn label(&self) -> String {
        format!("RSI({})", self.period)
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

/// Split a price change into (gain, loss). NaN stays NaN in both halves.
fn split_delta(delta: f64) -> (f64, f64) {
    if delta.is_nan() {
        (f64::NAN, f64::NAN)
    } else if delta >= 0.0 {
        (delta, 0.0)
    } else {
        (0.0, -delta)
    }
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}
