//! The chart session: one actor task that owns the series store.
//!
//! Snapshot fetches and the live feed run as separate tasks and talk to the
//! actor only through channels. Every message carries the epoch it was
//! produced under, and the actor applies it only if that epoch is still the
//! store's scope. A selection change cancels the old scope, advances the
//! epoch and reopens the store in one step of the actor loop, so no stale
//! write can land in between.

use std::sync::Arc;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::epoch::{Epoch, EpochCounter};
use crate::error::{FeedError, SessionError};
use crate::feed::candle::CandleFeed;
use crate::feed::{
    DEFAULT_RECONNECT_DELAY, FeedConnector, FeedSignal, FeedState, SyncEvent, Synchronizer,
};
use crate::indicator::{Indicator, IndicatorSeries};
use crate::model::{Candle, Selection};
use crate::series::{InitializeOutcome, ReconcileOutcome, SeriesStore};
use crate::snapshot::SnapshotSource;

const EVENT_CHANNEL_CAPACITY: usize = 256;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotStatus {
    Loading,
    Ready,
    Failed,
}

/// Everything a renderer needs for one consistent view of the chart.
#[derive(Debug, Clone)]
pub struct ChartFrame {
    pub selection: Option<Selection>,
    pub epoch: Epoch,
    pub version: u64,
    pub snapshot: SnapshotStatus,
    pub feed: FeedState,
    pub candles: Vec<Candle>,
    pub indicators: Vec<IndicatorSeries>,
}

impl ChartFrame {
    pub fn empty() -> Self {
        Self {
            selection: None,
            epoch: Epoch::ZERO,
            version: 0,
            snapshot: SnapshotStatus::Loading,
            feed: FeedState::Idle,
            candles: Vec::new(),
            indicators: Vec::new(),
        }
    }

    pub fn is_loading(&self) -> bool {
        self.snapshot == SnapshotStatus::Loading
    }

    pub fn is_error(&self) -> bool {
        self.snapshot == SnapshotStatus::Failed
    }
}

/// Synchronous session state: the store, its epoch and the indicators.
///
/// Each method runs to completion; the actor calls them one message at a time.
pub struct SessionCore {
    store: SeriesStore,
    epochs: EpochCounter,
    indicators: Vec<Box<dyn Indicator>>,
    snapshot: SnapshotStatus,
    feed: FeedState,
}

impl SessionCore {
    pub fn new(epochs: EpochCounter, indicators: Vec<Box<dyn Indicator>>) -> Self {
        Self {
            store: SeriesStore::new(),
            epochs,
            indicators,
            snapshot: SnapshotStatus::Loading,
            feed: FeedState::Idle,
        }
    }

    /// Discard the current scope and open a new one for `selection`.
    pub fn select(&mut self, selection: Selection) -> Epoch {
        let epoch = self.epochs.advance();
        info!(selection = %selection, epoch = %epoch, "selection scope opened");
        self.store.open_scope(selection, epoch);
        self.snapshot = SnapshotStatus::Loading;
        self.feed = FeedState::Idle;
        epoch
    }

    pub fn epochs(&self) -> &EpochCounter {
        &self.epochs
    }

    /// The open selection and the epoch it was opened under.
    pub fn scope(&self) -> Option<(Selection, Epoch)> {
        Some((self.store.selection()?.clone(), self.store.epoch()?))
    }

    pub fn is_current(&self, epoch: Epoch) -> bool {
        self.store.epoch() == Some(epoch)
    }

    /// Apply a snapshot result. Returns whether the frame changed.
    pub fn on_snapshot(
        &mut self,
        epoch: Epoch,
        result: Result<Vec<Candle>, Report<FeedError>>,
    ) -> bool {
        if !self.is_current(epoch) {
            debug!(epoch = %epoch, "stale snapshot discarded");
            return false;
        }

        match result {
            Ok(candles) => match self.store.initialize(epoch, candles) {
                InitializeOutcome::Applied { len, collapsed } => {
                    info!(epoch = %epoch, len, collapsed, "snapshot applied");
                    self.snapshot = SnapshotStatus::Ready;
                    true
                }
                InitializeOutcome::StaleScope => false,
            },
            Err(e) if self.store.is_ready() => {
                warn!(error = ?e, epoch = %epoch, "snapshot refresh failed, keeping series");
                false
            }
            Err(e) => {
                warn!(error = ?e, epoch = %epoch, "snapshot fetch failed");
                let changed = self.snapshot != SnapshotStatus::Failed;
                self.snapshot = SnapshotStatus::Failed;
                changed
            }
        }
    }

    pub fn on_tick(&mut self, epoch: Epoch, candle: Candle) -> ReconcileOutcome {
        self.store.reconcile(epoch, candle)
    }

    /// Record a feed state reported for `epoch`. Returns whether it changed.
    pub fn on_feed_state(&mut self, epoch: Epoch, state: FeedState) -> bool {
        if !self.is_current(epoch) || self.feed == state {
            return false;
        }
        self.feed = state;
        true
    }

    /// Close the store without opening a new scope.
    pub fn shutdown(&mut self) {
        self.epochs.advance();
        self.store.close();
        self.feed = FeedState::Closed;
    }

    pub fn frame(&self) -> ChartFrame {
        let candles = self.store.candles();
        ChartFrame {
            selection: self.store.selection().cloned(),
            epoch: self.store.epoch().unwrap_or(Epoch::ZERO),
            version: self.store.version(),
            snapshot: self.snapshot,
            feed: self.feed,
            candles: candles.to_vec(),
            indicators: self
                .indicators
                .iter()
                .map(|indicator| indicator.calculate(candles))
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub reconnect_delay: Duration,
    /// Re-fetch the snapshot this often; `None` disables refreshing.
    pub refresh_every: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            refresh_every: Some(Duration::from_secs(60)),
        }
    }
}

enum Command {
    Select(Selection),
    Shutdown,
}

struct SnapshotEvent {
    epoch: Epoch,
    result: Result<Vec<Candle>, Report<FeedError>>,
}

/// Caller side of a running [`ChartSession`].
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    frames: watch::Receiver<ChartFrame>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub async fn select(&self, selection: Selection) -> Result<(), Report<SessionError>> {
        self.commands
            .send(Command::Select(selection))
            .await
            .change_context(SessionError::Closed)
    }

    pub fn frames(&self) -> watch::Receiver<ChartFrame> {
        self.frames.clone()
    }

    /// Tear down the active scope and wait for the actor to stop.
    pub async fn shutdown(self) -> Result<(), Report<SessionError>> {
        let _ = self.commands.send(Command::Shutdown).await;
        self.task.await.change_context(SessionError::Closed)
    }
}

pub struct ChartSession {
    core: SessionCore,
    source: Arc<dyn SnapshotSource>,
    connector: Arc<dyn FeedConnector>,
    options: SessionOptions,
    frames: watch::Sender<ChartFrame>,
    snapshot_tx: mpsc::Sender<SnapshotEvent>,
    snapshot_rx: mpsc::Receiver<SnapshotEvent>,
    feed_tx: mpsc::Sender<SyncEvent<Candle>>,
    feed_rx: mpsc::Receiver<SyncEvent<Candle>>,
    scope: Option<CancellationToken>,
    scope_tasks: Vec<JoinHandle<()>>,
    refresh: Option<Interval>,
}

impl ChartSession {
    pub fn spawn(
        source: Arc<dyn SnapshotSource>,
        connector: Arc<dyn FeedConnector>,
        indicators: Vec<Box<dyn Indicator>>,
        options: SessionOptions,
    ) -> SessionHandle {
        let (commands_tx, commands_rx) = mpsc::channel(16);
        let (frames_tx, frames_rx) = watch::channel(ChartFrame::empty());
        let (snapshot_tx, snapshot_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (feed_tx, feed_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let session = Self {
            core: SessionCore::new(EpochCounter::new(), indicators),
            source,
            connector,
            options,
            frames: frames_tx,
            snapshot_tx,
            snapshot_rx,
            feed_tx,
            feed_rx,
            scope: None,
            scope_tasks: Vec::new(),
            refresh: None,
        };

        SessionHandle {
            commands: commands_tx,
            frames: frames_rx,
            task: tokio::spawn(session.run(commands_rx)),
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Select(selection)) => self.select(selection),
                    Some(Command::Shutdown) | None => break,
                },
                Some(event) = self.snapshot_rx.recv() => {
                    if self.core.on_snapshot(event.epoch, event.result) {
                        self.publish();
                    }
                }
                Some(event) = self.feed_rx.recv() => self.on_feed(event),
                _ = next_refresh(&mut self.refresh) => self.refresh_snapshot(),
            }
        }

        self.shutdown().await;
    }

    fn select(&mut self, selection: Selection) {
        if let Some(scope) = self.scope.take() {
            scope.cancel();
        }
        let epoch = self.core.select(selection.clone());
        let scope = CancellationToken::new();
        self.publish();

        self.spawn_fetch(epoch, selection.clone(), scope.clone());

        let sync = Synchronizer::new(
            CandleFeed::new(selection),
            Arc::clone(&self.connector),
            self.core.epochs().guard(epoch),
            scope.clone(),
            self.feed_tx.clone(),
        )
        .with_reconnect_delay(self.options.reconnect_delay);
        track(&mut self.scope_tasks, tokio::spawn(sync.run()));

        self.refresh = self
            .options
            .refresh_every
            .map(|period| interval_at(Instant::now() + period, period));
        self.scope = Some(scope);
    }

    fn spawn_fetch(&mut self, epoch: Epoch, selection: Selection, cancel: CancellationToken) {
        let source = Arc::clone(&self.source);
        let tx = self.snapshot_tx.clone();
        let task = tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                result = source.fetch(&selection) => result,
            };
            let _ = tx.send(SnapshotEvent { epoch, result }).await;
        });
        track(&mut self.scope_tasks, task);
    }

    fn refresh_snapshot(&mut self) {
        let (Some((selection, epoch)), Some(scope)) = (self.core.scope(), self.scope.clone()) else {
            return;
        };
        debug!(selection = %selection, epoch = %epoch, "snapshot refresh");
        self.spawn_fetch(epoch, selection, scope);
    }

    fn on_feed(&mut self, event: SyncEvent<Candle>) {
        let changed = match event.signal {
            FeedSignal::State(state) => self.core.on_feed_state(event.epoch, state),
            FeedSignal::Update(candle) => {
                let outcome = self.core.on_tick(event.epoch, candle);
                outcome.changed()
            }
        };
        if changed {
            self.publish();
        }
    }

    fn publish(&self) {
        self.frames.send_replace(self.core.frame());
    }

    async fn shutdown(&mut self) {
        if let Some(scope) = self.scope.take() {
            scope.cancel();
        }
        self.core.shutdown();
        self.publish();

        for task in self.scope_tasks.drain(..) {
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, task).await;
        }
        info!("chart session stopped");
    }
}

async fn next_refresh(refresh: &mut Option<Interval>) {
    match refresh {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Keep `task` alongside the scope's other tasks, dropping handles that
/// already finished.
fn track(tasks: &mut Vec<JoinHandle<()>>, task: JoinHandle<()>) {
    tasks.retain(|t| !t.is_finished());
    tasks.push(task);
}
