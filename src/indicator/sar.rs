use error_stack::{Report, bail};

use crate::error::IndicatorError;
use crate::indicator::{Indicator, IndicatorLine, IndicatorSeries};
use crate::model::Candle;

/// Parabolic SAR (stop and reverse).
pub struct ParabolicSar {
    step: f64,
    max_step: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SarOutput {
    pub sar: Vec<f64>,
    /// Trend direction at each point, `None` where the stop is undefined.
    pub is_long: Vec<Option<bool>>,
}

/// Running state of the stop. `ep` is the extreme point in the trend
/// direction and `af` the acceleration factor.
struct SarState {
    is_long: bool,
    sar: f64,
    ep: f64,
    af: f64,
}

impl ParabolicSar {
    pub fn new(step: f64, max_step: f64) -> Result<Self, Report<IndicatorError>> {
        if step.is_nan() || step <= 0.0 {
            bail!(IndicatorError::InvalidParameter {
                name: "step must be > 0".into(),
            });
        }
        if max_step.is_nan() || max_step < step {
            bail!(IndicatorError::InvalidParameter {
                name: "max_step must be >= step".into(),
            });
        }
        Ok(Self { step, max_step })
    }

    /// Starts long from the first candle's low. Fewer than two candles
    /// produce an all-NaN result.
    pub fn calculate_full(&self, candles: &[Candle]) -> SarOutput {
        if candles.len() < 2 {
            return SarOutput {
                sar: vec![f64::NAN; candles.len()],
                is_long: vec![None; candles.len()],
            };
        }

        let mut state = SarState {
            is_long: true,
            sar: candles[0].low,
            ep: candles[0].high,
            af: self.step,
        };
        let mut sar = Vec::with_capacity(candles.len());
        let mut is_long = Vec::with_capacity(candles.len());
        sar.push(state.sar);
        is_long.push(Some(state.is_long));

        for i in 1..candles.len() {
            self.advance(&mut state, candles, i);
            sar.push(state.sar);
            is_long.push(Some(state.is_long));
        }

        SarOutput { sar, is_long }
    }

    fn advance(&self, state: &mut SarState, candles: &[Candle], i: usize) {
        let cur = &candles[i];
        let prev = &candles[i - 1];
        let before_prev = i.checked_sub(2).map(|j| &candles[j]);

        state.sar += state.af * (state.ep - state.sar);

        if state.is_long {
            if cur.low < state.sar {
                state.is_long = false;
                state.sar = state.ep;
                state.ep = cur.low;
                state.af = self.step;
                return;
            }
            if cur.high > state.ep {
                state.ep = cur.high;
                state.af = (state.af + self.step).min(self.max_step);
            }
            // The stop may not rise above the lows of the two prior candles.
            if let Some(c) = before_prev
                && c.low < state.sar
            {
                state.sar = c.low;
            }
            if prev.low < state.sar {
                state.sar = prev.low;
            }
        } else {
            if cur.high > state.sar {
                state.is_long = true;
                state.sar = state.ep;
                state.ep = cur.high;
                state.af = self.step;
                return;
            }
            if cur.low < state.ep {
                state.ep = cur.low;
                state.af = (state.af + self.step).min(self.max_step);
            }
            if let Some(c) = before_prev
                && c.high > state.sar
            {
                state.sar = c.high;
            }
            if prev.high > state.sar {
                state.sar = prev.high;
            }
        }
    }
}

impl Indicator for ParabolicSar {
    fn label(&self) -> String {
        format!("SAR({},{})", self.step, self.max_step)
    }

    fn calculate(&self, candles: &[Candle]) -> IndicatorSeries {
        let output = self.calculate_full(candles);
        let trend = output
            .is_long
            .iter()
            .map(|d| match d {
                Some(true) => 1.0,
                Some(false) => -1.0,
                None => f64::NAN,
            })
            .collect();
        IndicatorSeries::new(
            self.label(),
            candles,
            vec![
                IndicatorLine {
                    name: "sar",
                    values: output.sar,
                },
                IndicatorLine {
                    name: "trend",
                    values: trend,
                },
            ],
        )
    }
}
