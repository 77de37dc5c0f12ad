use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::epoch::EpochCounter;
use crate::feed::ticker::TickerFeed;
use crate::feed::{FeedConnector, FeedSignal, FeedState, Synchronizer};
use crate::model::TickerStats;

/// Latest 24h stats for a fixed list of symbols, merged from partial updates.
#[derive(Debug, Clone, Default)]
pub struct Watchlist {
    symbols: Vec<String>,
    stats: HashMap<String, TickerStats>,
    feed: Option<FeedState>,
}

impl Watchlist {
    pub fn new(symbols: Vec<String>) -> Self {
        Self {
            symbols,
            stats: HashMap::new(),
            feed: None,
        }
    }

    /// Merge one partial update. Symbols not on the list are ignored; listed
    /// symbols missing from the update keep their previous stats.
    /// Returns how many entries were written.
    pub fn apply(&mut self, update: HashMap<String, TickerStats>) -> usize {
        let mut merged = 0;
        for (symbol, stats) in update {
            if self.symbols.contains(&symbol) {
                self.stats.insert(symbol, stats);
                merged += 1;
            } else {
                debug!(symbol = %symbol, "ticker for untracked symbol ignored");
            }
        }
        merged
    }

    pub fn get(&self, symbol: &str) -> Option<&TickerStats> {
        self.stats.get(symbol)
    }

    /// One row per tracked symbol in list order.
    pub fn rows(&self) -> Vec<(&str, Option<&TickerStats>)> {
        self.symbols
            .iter()
            .map(|s| (s.as_str(), self.stats.get(s)))
            .collect()
    }

    pub fn feed_state(&self) -> Option<FeedState> {
        self.feed
    }
}

/// Run the multiplexed ticker feed and publish the merged board until
/// `cancel` fires.
pub fn spawn(
    connector: Arc<dyn FeedConnector>,
    symbols: Vec<String>,
    reconnect_delay: Duration,
    cancel: CancellationToken,
) -> (watch::Receiver<Watchlist>, JoinHandle<()>) {
    let (board_tx, board_rx) = watch::channel(Watchlist::new(symbols.clone()));
    let (tx, mut rx) = mpsc::channel(256);

    let epochs = EpochCounter::new();
    let guard = epochs.guard(epochs.advance());
    let sync = Synchronizer::new(TickerFeed::new(symbols), connector, guard, cancel, tx)
        .with_reconnect_delay(reconnect_delay);

    let handle = tokio::spawn(async move {
        let feed = tokio::spawn(sync.run());
        while let Some(event) = rx.recv().await {
            board_tx.send_modify(|board| match event.signal {
                FeedSignal::State(state) => board.feed = Some(state),
                FeedSignal::Update(update) => {
                    let merged = board.apply(update);
                    debug!(merged, "watchlist updated");
                }
            });
        }
        let _ = feed.await;
        info!("watchlist feed stopped");
    });

    (board_rx, handle)
}
