use error_stack::{Report, bail};

use crate::error::IndicatorError;
use crate::indicator::ma::Sma;
use crate::indicator::{Indicator, IndicatorLine, IndicatorSeries, close_prices};
use crate::model::Candle;

pub struct BollingerBands {
    sma: Sma,
    period: usize,
    multiplier: f64,
}

/// Band values aligned with the input; the first `period - 1` entries are NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct Bands {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

impl BollingerBands {
    pub fn new(period: usize, multiplier: f64) -> Result<Self, Report<IndicatorError>> {
        let sma = Sma::new(period)?;
        if multiplier.is_nan() || multiplier <= 0.0 {
            bail!(IndicatorError::InvalidParameter {
                name: "multiplier must be > 0".into(),
            });
        }
        Ok(Self {
            sma,
            period,
            multiplier,
        })
    }

    /// Middle band is the SMA; the band width uses the population standard
    /// deviation of the closes in the window.
    pub fn calculate_bands(&self, candles: &[Candle]) -> Bands {
        let prices = close_prices(candles);
        let middle = self.sma.calculate_prices(&prices);

        let mut upper = vec![f64::NAN; prices.len()];
        let mut lower = vec![f64::NAN; prices.len()];

        for (i, window) in prices.windows(self.period).enumerate() {
            let idx = i + self.period - 1;
            let mean = middle[idx];
            let variance =
                window.iter().map(|&p| (p - mean).powi(2)).sum::<f64>() / self.period as f64;
            let std_dev = variance.sqrt();
            upper[idx] = mean + self.multiplier * std_dev;
            lower[idx] = mean - self.multiplier * std_dev;
        }

        Bands {
            upper,
            middle,
            lower,
        }
    }
}

impl Indicator for BollingerBands {
    fn label(&self) -> String {
        format!("BOLL({},{})", self.period, self.multiplier)
    }

    fn calculate(&self, candles: &[Candle]) -> IndicatorSeries {
        let bands = self.calculate_bands(candles);
        IndicatorSeries::new(
            self.label(),
            candles,
            vec![
                IndicatorLine {
                    name: "upper",
                    values: bands.upper,
                },
                IndicatorLine {
                    name: "middle",
                    values: bands.middle,
                },
                IndicatorLine {
                    name: "lower",
                    values: bands.lower,
                },
            ],
        )
    }
}
