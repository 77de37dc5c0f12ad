use error_stack::{Report, ResultExt, bail};

use crate::error::FeedError;
use crate::feed::FeedTarget;
use crate::model::{Candle, Selection};

/// Live candle stream for one selection.
pub struct CandleFeed {
    selection: Selection,
}

impl CandleFeed {
    pub fn new(selection: Selection) -> Self {
        Self { selection }
    }
}

impl FeedTarget for CandleFeed {
    type Update = Candle;

    fn path(&self) -> String {
        format!(
            "/market/ws/{}/{}",
            self.selection.symbol, self.selection.interval
        )
    }

    fn parse(&self, text: &str) -> Result<Candle, Report<FeedError>> {
        parse_candle(text).attach_with(|| format!("selection: {}", self.selection))
    }
}

/// Decode one candle payload, rejecting non-finite prices and negative volume.
pub fn parse_candle(text: &str) -> Result<Candle, Report<FeedError>> {
    let candle: Candle = serde_json::from_str(text).change_context(FeedError::ResponseParse {
        endpoint: "candle feed".into(),
    })?;
    if !candle.is_well_formed() {
        bail!(FeedError::ResponseParse {
            endpoint: "candle feed".into(),
        });
    }
    Ok(candle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AssetClass, Interval};

    #[test]
    fn path_uses_symbol_and_interval() {
        let feed = CandleFeed::new(Selection::new("btcusdt", Interval::Min1, AssetClass::Crypto));
        assert_eq!(feed.path(), "/market/ws/BTCUSDT/1m");
    }

    #[test]
    fn parses_candle_payload() {
        let candle = parse_candle(
            r#"{"time":1000,"open":1.0,"high":2.0,"low":0.5,"close":1.5,"volume":12.0}"#,
        )
        .unwrap();
        assert_eq!(candle.time, 1000);
        assert_eq!(candle.close, 1.5);
        assert_eq!(candle.volume, 12.0);
    }

    #[test]
    fn missing_volume_defaults_to_zero() {
        let candle =
            parse_candle(r#"{"time":60,"open":1.0,"high":1.0,"low":1.0,"close":1.0}"#).unwrap();
        assert_eq!(candle.volume, 0.0);
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(parse_candle("not json").is_err());
        assert!(parse_candle(r#"{"time":60,"open":1.0}"#).is_err());
        assert!(
            parse_candle(
                r#"{"time":60,"open":1.0,"high":1.0,"low":1.0,"close":1.0,"volume":-1.0}"#
            )
            .is_err()
        );
    }
}
