pub mod candle;
pub mod ticker;
pub mod ws;

use std::sync::Arc;
use std::time::Duration;

use error_stack::Report;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::epoch::{Epoch, EpochGuard};
use crate::error::FeedError;

/// Delay between losing a connection and the next connection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Connection lifecycle of one feed scope.
///
/// `Closed` is reached only through deliberate teardown and is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedEvent {
    Start,
    Connected,
    ConnectFailed,
    ConnectionLost,
    RetryDue,
    Teardown,
}

impl FeedState {
    /// The state reached from `self` on `event`, or `None` if the event is
    /// not valid in this state.
    pub fn on(self, event: FeedEvent) -> Option<FeedState> {
        use FeedEvent::*;
        use FeedState::*;

        match (self, event) {
            (Closed, _) => None,
            (_, Teardown) => Some(Closed),
            (Idle, Start) => Some(Connecting),
            (Connecting, Connected) => Some(Open),
            (Connecting, ConnectFailed) => Some(Reconnecting),
            (Open, ConnectionLost) => Some(Reconnecting),
            (Reconnecting, RetryDue) => Some(Connecting),
            _ => None,
        }
    }
}

/// An established feed connection.
pub trait FeedConnection: Send {
    fn send_text(&mut self, text: String) -> BoxFuture<'_, Result<(), Report<FeedError>>>;

    /// Next text payload; `None` once the peer has closed the connection.
    fn next_text(&mut self) -> BoxFuture<'_, Option<Result<String, Report<FeedError>>>>;

    /// Close the connection from our side.
    fn close(self: Box<Self>) -> BoxFuture<'static, ()>;
}

/// Opens feed connections to a path on the market-data server.
///
/// Uses `BoxFuture` instead of `async fn` to keep the trait object-safe.
pub trait FeedConnector: Send + Sync {
    fn connect(&self, path: &str)
    -> BoxFuture<'_, Result<Box<dyn FeedConnection>, Report<FeedError>>>;
}

/// What a feed connects to and how its payloads are decoded.
pub trait FeedTarget: Send + Sync + 'static {
    type Update: Send + 'static;

    fn path(&self) -> String;

    /// Message sent right after the connection opens, if the feed needs one.
    fn announce(&self) -> Option<String> {
        None
    }

    fn parse(&self, text: &str) -> Result<Self::Update, Report<FeedError>>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedSignal<U> {
    State(FeedState),
    Update(U),
}

/// A feed signal tagged with the epoch of the scope that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncEvent<U> {
    pub epoch: Epoch,
    pub signal: FeedSignal<U>,
}

enum PumpEnd {
    Lost,
    TornDown,
}

/// Drives one feed scope through the [`FeedState`] machine until teardown.
///
/// The scope ends when `cancel` fires or when `guard` goes stale, whichever
/// is observed first. Both are checked before every connection attempt, so
/// a reconnect scheduled under an old selection never opens a connection.
pub struct Synchronizer<T: FeedTarget> {
    target: T,
    connector: Arc<dyn FeedConnector>,
    guard: EpochGuard,
    cancel: CancellationToken,
    reconnect_delay: Duration,
    tx: mpsc::Sender<SyncEvent<T::Update>>,
    state: FeedState,
}

impl<T: FeedTarget> Synchronizer<T> {
    pub fn new(
        target: T,
        connector: Arc<dyn FeedConnector>,
        guard: EpochGuard,
        cancel: CancellationToken,
        tx: mpsc::Sender<SyncEvent<T::Update>>,
    ) -> Self {
        Self {
            target,
            connector,
            guard,
            cancel,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            tx,
            state: FeedState::Idle,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    fn superseded(&self) -> bool {
        self.cancel.is_cancelled() || !self.guard.is_current()
    }

    async fn transition(&mut self, event: FeedEvent) {
        let Some(next) = self.state.on(event) else {
            debug!(state = ?self.state, ?event, "ignored feed event");
            return;
        };
        info!(
            path = %self.target.path(),
            epoch = %self.guard.epoch(),
            from = ?self.state,
            to = ?next,
            "feed state"
        );
        self.state = next;
        let _ = self.emit(FeedSignal::State(next)).await;
    }

    /// Returns `false` once nobody is listening any more.
    async fn emit(&self, signal: FeedSignal<T::Update>) -> bool {
        let event = SyncEvent {
            epoch: self.guard.epoch(),
            signal,
        };
        self.tx.send(event).await.is_ok()
    }

    pub async fn run(mut self) {
        let path = self.target.path();
        self.transition(FeedEvent::Start).await;

        loop {
            if self.superseded() {
                break;
            }

            let connected = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = self.connector.connect(&path) => result,
            };

            match connected {
                Ok(conn) => {
                    if self.superseded() {
                        conn.close().await;
                        break;
                    }
                    self.transition(FeedEvent::Connected).await;
                    match self.pump(conn).await {
                        PumpEnd::TornDown => break,
                        PumpEnd::Lost => self.transition(FeedEvent::ConnectionLost).await,
                    }
                }
                Err(e) => {
                    warn!(error = ?e, path = %path, "feed connect failed");
                    self.transition(FeedEvent::ConnectFailed).await;
                }
            }

            info!(
                path = %path,
                delay_ms = self.reconnect_delay.as_millis() as u64,
                "feed reconnect scheduled"
            );
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = sleep(self.reconnect_delay) => {}
            }
            if self.superseded() {
                debug!(path = %path, epoch = %self.guard.epoch(), "reconnect superseded");
                break;
            }
            self.transition(FeedEvent::RetryDue).await;
        }

        self.transition(FeedEvent::Teardown).await;
    }

    async fn pump(&mut self, mut conn: Box<dyn FeedConnection>) -> PumpEnd {
        if let Some(message) = self.target.announce()
            && let Err(e) = conn.send_text(message).await
        {
            warn!(error = ?e, "feed announce failed");
            conn.close().await;
            return PumpEnd::Lost;
        }

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                next = conn.next_text() => Some(next),
            };
            let Some(next) = next else {
                conn.close().await;
                return PumpEnd::TornDown;
            };

            match next {
                None => {
                    warn!(path = %self.target.path(), "feed closed by peer");
                    return PumpEnd::Lost;
                }
                Some(Err(e)) => {
                    warn!(error = ?e, "feed read failed");
                    conn.close().await;
                    return PumpEnd::Lost;
                }
                Some(Ok(text)) => match self.target.parse(&text) {
                    Ok(update) => {
                        if !self.guard.is_current() || !self.emit(FeedSignal::Update(update)).await
                        {
                            conn.close().await;
                            return PumpEnd::TornDown;
                        }
                    }
                    Err(e) => {
                        warn!(error = ?e, raw = %text, "feed payload dropped");
                    }
                },
            }
        }
    }
}
