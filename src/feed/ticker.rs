use std::collections::HashMap;

use error_stack::{Report, ResultExt};
use serde::Serialize;

use crate::error::FeedError;
use crate::feed::FeedTarget;
use crate::model::TickerStats;

pub const TICKER_PATH: &str = "/market/ws/tickers";

/// Multiplexed 24h ticker stream for the watchlist symbols.
pub struct TickerFeed {
    symbols: Vec<String>,
}

#[derive(Serialize)]
struct SubscribeMessage<'a> {
    action: &'static str,
    symbols: &'a [String],
}

impl TickerFeed {
    pub fn new(symbols: Vec<String>) -> Self {
        Self { symbols }
    }
}

impl FeedTarget for TickerFeed {
    type Update = HashMap<String, TickerStats>;

    fn path(&self) -> String {
        TICKER_PATH.into()
    }

    fn announce(&self) -> Option<String> {
        serde_json::to_string(&SubscribeMessage {
            action: "subscribe",
            symbols: &self.symbols,
        })
        .ok()
    }

    /// A payload is a partial map: only symbols that changed are present.
    fn parse(&self, text: &str) -> Result<Self::Update, Report<FeedError>> {
        serde_json::from_str(text).change_context(FeedError::ResponseParse {
            endpoint: TICKER_PATH.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announce_lists_symbols() {
        let feed = TickerFeed::new(vec!["BTCUSDT".into(), "ETHUSDT".into()]);
        let message: serde_json::Value =
            serde_json::from_str(&feed.announce().unwrap()).unwrap();
        assert_eq!(message["action"], "subscribe");
        assert_eq!(message["symbols"][1], "ETHUSDT");
    }

    #[test]
    fn parses_partial_update() {
        let feed = TickerFeed::new(vec![]);
        let update = feed
            .parse(r#"{"BTCUSDT":{"lastPrice":100.5,"priceChange":-1.5,"priceChangePercent":-1.47}}"#)
            .unwrap();
        assert_eq!(update.len(), 1);
        assert_eq!(update["BTCUSDT"].last_price, 100.5);
        assert_eq!(update["BTCUSDT"].price_change_percent, -1.47);
    }

    #[test]
    fn rejects_garbage() {
        assert!(TickerFeed::new(vec![]).parse("[1,2]").is_err());
    }
}
