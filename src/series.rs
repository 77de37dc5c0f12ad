use tracing::{debug, warn};

use crate::epoch::Epoch;
use crate::model::{Candle, Selection};

/// Result of merging one live candle into the series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Same bucket as the last candle; the last candle was replaced.
    Replaced,
    /// Bucket rollover; the candle was appended.
    Appended,
    /// At or before the second-to-last candle. Late re-delivery, dropped.
    Late,
    /// Between the second-to-last and the last candle, dropped.
    OutOfOrder,
    /// The series holds no candles to reconcile against, dropped.
    Empty,
    /// The snapshot for this scope has not landed yet, dropped.
    AwaitingSnapshot,
    /// The candle belongs to a superseded selection, dropped.
    StaleScope,
}

impl ReconcileOutcome {
    pub fn changed(self) -> bool {
        matches!(self, Self::Replaced | Self::Appended)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitializeOutcome {
    /// The series was replaced. `collapsed` counts snapshot entries dropped
    /// because they shared a time with a later entry.
    Applied { len: usize, collapsed: usize },
    StaleScope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingSnapshot,
    Live,
}

#[derive(Debug, Clone)]
struct Scope {
    selection: Selection,
    epoch: Epoch,
}

/// Ordered, time-keyed candles for exactly one selection.
///
/// Within the series `time` is strictly increasing. Every write names the
/// epoch it was produced under; writes for any other epoch are rejected, so
/// the series never mixes candles from two selections.
#[derive(Debug)]
pub struct SeriesStore {
    scope: Option<Scope>,
    phase: Phase,
    candles: Vec<Candle>,
    version: u64,
}

impl Default for SeriesStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SeriesStore {
    pub fn new() -> Self {
        Self {
            scope: None,
            phase: Phase::AwaitingSnapshot,
            candles: Vec::new(),
            version: 0,
        }
    }

    /// Discard all state and scope the store to `selection` under `epoch`.
    ///
    /// The store stays empty until a snapshot for `epoch` is applied.
    pub fn open_scope(&mut self, selection: Selection, epoch: Epoch) {
        self.candles.clear();
        self.phase = Phase::AwaitingSnapshot;
        self.scope = Some(Scope { selection, epoch });
        self.version += 1;
    }

    /// Discard all state without opening a new scope.
    pub fn close(&mut self) {
        self.candles.clear();
        self.phase = Phase::AwaitingSnapshot;
        self.scope = None;
        self.version += 1;
    }

    /// Replace the whole series with a snapshot fetched under `epoch`.
    pub fn initialize(&mut self, epoch: Epoch, mut candles: Vec<Candle>) -> InitializeOutcome {
        if !self.accepts(epoch) {
            return InitializeOutcome::StaleScope;
        }

        let received = candles.len();
        candles.sort_by_key(|c| c.time);
        let mut normalized: Vec<Candle> = Vec::with_capacity(received);
        for candle in candles {
            match normalized.last_mut() {
                Some(last) if last.time == candle.time => *last = candle,
                _ => normalized.push(candle),
            }
        }
        let collapsed = received - normalized.len();
        if collapsed > 0 {
            warn!(collapsed, epoch = %epoch, "snapshot contained duplicate candle times");
        }

        self.candles = normalized;
        self.phase = Phase::Live;
        self.version += 1;

        InitializeOutcome::Applied {
            len: self.candles.len(),
            collapsed,
        }
    }

    /// Merge one live candle into the series.
    ///
    /// Same time as the last candle replaces it, a later time appends, and
    /// anything older is dropped. A candle at or before the second-to-last
    /// candle is reported as [`ReconcileOutcome::Late`], which keeps a one
    /// candle tolerance window distinct from plain reordering.
    pub fn reconcile(&mut self, epoch: Epoch, candle: Candle) -> ReconcileOutcome {
        let outcome = self.merge(epoch, candle);
        if outcome.changed() {
            self.version += 1;
        } else {
            debug!(time = candle.time, epoch = %epoch, ?outcome, "live candle dropped");
        }
        outcome
    }

    fn merge(&mut self, epoch: Epoch, candle: Candle) -> ReconcileOutcome {
        if !self.accepts(epoch) {
            return ReconcileOutcome::StaleScope;
        }
        if self.phase == Phase::AwaitingSnapshot {
            return ReconcileOutcome::AwaitingSnapshot;
        }

        let len = self.candles.len();
        let Some(last_time) = self.candles.last().map(|c| c.time) else {
            return ReconcileOutcome::Empty;
        };

        if len >= 2 && candle.time <= self.candles[len - 2].time {
            return ReconcileOutcome::Late;
        }

        if candle.time == last_time {
            self.candles[len - 1] = candle;
            ReconcileOutcome::Replaced
        } else if candle.time > last_time {
            if let Some(scope) = &self.scope
                && !scope.selection.interval.spans_whole_buckets(last_time, candle.time)
            {
                debug!(
                    last = last_time,
                    time = candle.time,
                    interval = %scope.selection.interval,
                    "appended candle is off the bucket grid"
                );
            }
            self.candles.push(candle);
            ReconcileOutcome::Appended
        } else {
            ReconcileOutcome::OutOfOrder
        }
    }

    fn accepts(&self, epoch: Epoch) -> bool {
        self.scope.as_ref().is_some_and(|s| s.epoch == epoch)
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.scope.as_ref().map(|s| &s.selection)
    }

    pub fn epoch(&self) -> Option<Epoch> {
        self.scope.as_ref().map(|s| s.epoch)
    }

    /// Whether a snapshot has been applied for the current scope.
    pub fn is_ready(&self) -> bool {
        self.scope.is_some() && self.phase == Phase::Live
    }

    /// Incremented on every change to the series contents or scope.
    pub fn version(&self) -> u64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epoch::EpochCounter;
    use crate::model::{AssetClass, Interval};

    fn candle(time: i64, close: f64) -> Candle {
        Candle {
            time,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    fn btc() -> Selection {
        Selection::new("BTCUSDT", Interval::Min1, AssetClass::Crypto)
    }

    fn live_store(times: &[i64]) -> (SeriesStore, Epoch) {
        let counter = EpochCounter::new();
        let epoch = counter.advance();
        let mut store = SeriesStore::new();
        store.open_scope(btc(), epoch);
        let candles = times.iter().map(|&t| candle(t, 100.0)).collect();
        store.initialize(epoch, candles);
        (store, epoch)
    }

    fn times(store: &SeriesStore) -> Vec<i64> {
        store.candles().iter().map(|c| c.time).collect()
    }

    #[test]
    fn same_time_replaces_last() {
        let (mut store, epoch) = live_store(&[8, 9, 10]);
        let outcome = store.reconcile(epoch, candle(10, 105.0));
        assert_eq!(outcome, ReconcileOutcome::Replaced);
        assert_eq!(times(&store), vec![8, 9, 10]);
        assert_eq!(store.candles()[2].close, 105.0);
    }

    #[test]
    fn later_time_appends() {
        let (mut store, epoch) = live_store(&[8, 9, 10]);
        assert_eq!(
            store.reconcile(epoch, candle(11, 106.0)),
            ReconcileOutcome::Appended
        );
        assert_eq!(times(&store), vec![8, 9, 10, 11]);
    }

    #[test]
    fn late_ticks_after_rollover_are_discarded() {
        let (mut store, epoch) = live_store(&[8, 9, 10]);
        store.reconcile(epoch, candle(11, 106.0));
        let before = store.candles().to_vec();

        // 10 is now the second-to-last candle; 9 is older still.
        assert_eq!(store.reconcile(epoch, candle(10, 1.0)), ReconcileOutcome::Late);
        assert_eq!(store.reconcile(epoch, candle(9, 1.0)), ReconcileOutcome::Late);
        assert_eq!(store.candles(), before.as_slice());
    }

    #[test]
    fn gap_between_last_two_is_out_of_order() {
        // Tolerance window: strictly between second-to-last and last.
        let (mut store, epoch) = live_store(&[60, 120]);
        assert_eq!(
            store.reconcile(epoch, candle(90, 1.0)),
            ReconcileOutcome::OutOfOrder
        );
        assert_eq!(times(&store), vec![60, 120]);
    }

    #[test]
    fn single_candle_series_has_no_second_to_last() {
        let (mut store, epoch) = live_store(&[10]);
        assert_eq!(
            store.reconcile(epoch, candle(5, 1.0)),
            ReconcileOutcome::OutOfOrder
        );
        assert_eq!(
            store.reconcile(epoch, candle(10, 2.0)),
            ReconcileOutcome::Replaced
        );
    }

    #[test]
    fn reconcile_is_idempotent_for_redelivered_last_candle() {
        let (mut once, epoch_a) = live_store(&[8, 9, 10]);
        let (mut twice, epoch_b) = live_store(&[8, 9, 10]);
        let tick = candle(10, 104.5);

        once.reconcile(epoch_a, tick);
        twice.reconcile(epoch_b, tick);
        twice.reconcile(epoch_b, tick);

        assert_eq!(once.candles(), twice.candles());
    }

    #[test]
    fn off_grid_append_is_still_kept() {
        let (mut store, epoch) = live_store(&[60, 120]);
        assert_eq!(
            store.reconcile(epoch, candle(150, 101.0)),
            ReconcileOutcome::Appended
        );
        assert_eq!(store.candles().last().map(|c| c.time), Some(150));
    }

    #[test]
    fn empty_snapshot_discards_ticks() {
        let (mut store, epoch) = live_store(&[]);
        assert_eq!(store.reconcile(epoch, candle(1, 1.0)), ReconcileOutcome::Empty);
        assert!(store.candles().is_empty());
    }

    #[test]
    fn ticks_before_snapshot_are_dropped() {
        let counter = EpochCounter::new();
        let epoch = counter.advance();
        let mut store = SeriesStore::new();
        store.open_scope(btc(), epoch);

        assert_eq!(
            store.reconcile(epoch, candle(10, 1.0)),
            ReconcileOutcome::AwaitingSnapshot
        );
        assert!(!store.is_ready());
    }

    #[test]
    fn stale_epoch_is_rejected_everywhere() {
        let counter = EpochCounter::new();
        let old = counter.advance();
        let new = counter.advance();
        let mut store = SeriesStore::new();
        store.open_scope(btc(), new);

        assert_eq!(
            store.initialize(old, vec![candle(1, 1.0)]),
            InitializeOutcome::StaleScope
        );
        store.initialize(new, vec![candle(1, 1.0)]);
        assert_eq!(
            store.reconcile(old, candle(1, 2.0)),
            ReconcileOutcome::StaleScope
        );
        assert_eq!(store.candles()[0].close, 1.0);
    }

    #[test]
    fn closed_store_rejects_writes() {
        let (mut store, epoch) = live_store(&[1, 2]);
        store.close();
        assert!(store.selection().is_none());
        assert_eq!(
            store.initialize(epoch, vec![candle(3, 1.0)]),
            InitializeOutcome::StaleScope
        );
        assert!(store.candles().is_empty());
    }

    #[test]
    fn initialize_sorts_and_collapses_duplicates() {
        let counter = EpochCounter::new();
        let epoch = counter.advance();
        let mut store = SeriesStore::new();
        store.open_scope(btc(), epoch);

        let outcome = store.initialize(
            epoch,
            vec![candle(3, 3.0), candle(1, 1.0), candle(3, 33.0), candle(2, 2.0)],
        );
        assert_eq!(outcome, InitializeOutcome::Applied { len: 3, collapsed: 1 });
        assert_eq!(times(&store), vec![1, 2, 3]);
        assert_eq!(store.candles()[2].close, 33.0);
    }

    #[test]
    fn open_scope_clears_previous_selection() {
        let (mut store, _) = live_store(&[1, 2, 3]);
        let eth = Selection::new("ETHUSDT", Interval::Min1, AssetClass::Crypto);
        store.open_scope(eth.clone(), Epoch::ZERO);
        assert!(store.candles().is_empty());
        assert_eq!(store.selection(), Some(&eth));
        assert!(!store.is_ready());
    }

    #[test]
    fn version_tracks_changes_only() {
        let (mut store, epoch) = live_store(&[8, 9, 10]);
        let v = store.version();
        store.reconcile(epoch, candle(9, 1.0));
        assert_eq!(store.version(), v);
        store.reconcile(epoch, candle(10, 1.0));
        assert_eq!(store.version(), v + 1);
    }
}
