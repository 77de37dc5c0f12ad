use error_stack::{Report, bail};

use crate::error::IndicatorError;
use crate::indicator::{Indicator, IndicatorLine, IndicatorSeries};
use crate::model::Candle;

/// K and D start from this value before the first window fills.
const SEED: f64 = 50.0;

/// KDJ stochastic oscillator.
pub struct Kdj {
    n: usize,
    m1: usize,
    m2: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KdjOutput {
    pub k: Vec<f64>,
    pub d: Vec<f64>,
    pub j: Vec<f64>,
}

impl Kdj {
    pub fn new(n: usize, m1: usize, m2: usize) -> Result<Self, Report<IndicatorError>> {
        if n == 0 || m1 == 0 || m2 == 0 {
            bail!(IndicatorError::InvalidParameter {
                name: "n, m1 and m2 must be > 0".into(),
            });
        }
        Ok(Self { n, m1, m2 })
    }

    /// Raw stochastic value of the last candle in `window`; 0 when the
    /// window has no range.
    fn rsv(window: &[Candle]) -> f64 {
        let highest = window
            .iter()
            .map(|c| c.high)
            .fold(f64::NEG_INFINITY, f64::max);
        let lowest = window.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
        let close = window[window.len() - 1].close;

        if highest == lowest {
            return 0.0;
        }
        (close - lowest) / (highest - lowest) * 100.0
    }

    pub fn calculate_full(&self, candles: &[Candle]) -> KdjOutput {
        let len = candles.len();
        let mut output = KdjOutput {
            k: vec![f64::NAN; len],
            d: vec![f64::NAN; len],
            j: vec![f64::NAN; len],
        };

        let (m1, m2) = (self.m1 as f64, self.m2 as f64);
        let mut prev_k = SEED;
        let mut prev_d = SEED;

        for (i, window) in candles.windows(self.n).enumerate() {
            let idx = i + self.n - 1;
            let rsv = Self::rsv(window);
            let k = rsv / m1 + prev_k * (m1 - 1.0) / m1;
            let d = k / m2 + prev_d * (m2 - 1.0) / m2;
            output.k[idx] = k;
            output.d[idx] = d;
            output.j[idx] = 3.0 * k - 2.0 * d;
            prev_k = k;
            prev_d = d;
        }

        output
    }
}

impl Indicator for Kdj {
    fn label(&self) -> String {
        format!("KDJ({},{},{})", self.n, self.m1, self.m2)
    }

    fn calculate(&self, candles: &[Candle]) -> IndicatorSeries {
        let output = self.calculate_full(candles);
        IndicatorSeries::new(
            self.label(),
            candles,
            vec![
                IndicatorLine {
                    name: "k",
                    values: output.k,
                },
                IndicatorLine {
                    name: "d",
                    values: output.d,
                },
                IndicatorLine {
                    name: "j",
                    values: output.j,
                },
            ],
        )
    }
}
