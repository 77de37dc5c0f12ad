mod config;
mod controller;
mod epoch;
mod error;
mod feed;
mod indicator;
mod model;
mod series;
mod session;
mod snapshot;
mod watchlist;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use derive_more::{Display, Error};
use error_stack::{Report, ResultExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::AppConfig;
use feed::FeedConnector;
use feed::ws::WsConnector;
use session::{ChartFrame, ChartSession, SessionOptions};
use snapshot::{HttpSnapshotLoader, SnapshotSource};
use watchlist::Watchlist;

#[derive(Debug, Display, Error)]
pub enum AppError {
    #[display("configuration error")]
    Config,
    #[display("runtime error")]
    Runtime,
}

#[derive(Parser)]
#[command(name = "chart-feed", about = "Live candle chart feed with technical indicators")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Initial symbol, overrides `selection.symbol`
    #[arg(long)]
    symbol: Option<String>,

    /// Initial interval, e.g. `1m` or `4h`
    #[arg(long)]
    interval: Option<String>,

    /// Initial asset class: `crypto` or `stock`
    #[arg(long)]
    asset: Option<String>,
}

#[tokio::main]
async fn main() {
    if let Err(report) = run().await {
        eprintln!("{report:?}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Report<AppError>> {
    let cli = Cli::parse();
    let mut config = config::load(Path::new(&cli.config)).change_context(AppError::Config)?;

    init_tracing(&config);

    if let Some(symbol) = cli.symbol {
        config.selection.symbol = symbol;
    }
    if let Some(interval) = cli.interval {
        config.selection.interval = interval;
    }
    if let Some(asset) = cli.asset {
        config.selection.asset = asset;
    }
    let initial = config
        .selection
        .resolve()
        .change_context(AppError::Config)?;
    let indicators = config.build_indicators().change_context(AppError::Config)?;

    // ── Transports ────────────────────────────────────────────────────────────
    let source: Arc<dyn SnapshotSource> = Arc::new(
        HttpSnapshotLoader::new(
            &config.server.api_url,
            config.server.snapshot_rate(),
            config.server.request_timeout(),
        )
        .change_context(AppError::Runtime)?,
    );
    let connector: Arc<dyn FeedConnector> = Arc::new(WsConnector::new(&config.server.ws_url));

    // ── Chart session ─────────────────────────────────────────────────────────
    let handle = ChartSession::spawn(
        source,
        Arc::clone(&connector),
        indicators,
        SessionOptions {
            reconnect_delay: config.server.reconnect_delay(),
            refresh_every: config.server.refresh_every(),
        },
    );
    info!(selection = %initial, "starting chart session");
    handle
        .select(initial)
        .await
        .change_context(AppError::Runtime)?;

    let cancel = CancellationToken::new();
    let mut task_handles = Vec::new();
    task_handles.push(tokio::spawn(log_frames(handle.frames(), cancel.clone())));

    // ── Watchlist ─────────────────────────────────────────────────────────────
    let symbols = config.watchlist_symbols();
    if !symbols.is_empty() {
        let (board, feed_handle) = watchlist::spawn(
            Arc::clone(&connector),
            symbols,
            config.server.reconnect_delay(),
            cancel.clone(),
        );
        task_handles.push(feed_handle);
        task_handles.push(tokio::spawn(log_watchlist(board, cancel.clone())));
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.change_context(AppError::Runtime)?;
            info!("ctrl+c received, shutting down");
        }
        _ = controller::run(&handle, cancel.clone()) => {
            if !cancel.is_cancelled() {
                // stdin closed; keep streaming until ctrl+c
                tokio::signal::ctrl_c()
                    .await
                    .change_context(AppError::Runtime)?;
                info!("ctrl+c received, shutting down");
            }
        }
    }
    cancel.cancel();

    handle.shutdown().await.change_context(AppError::Runtime)?;
    for task in task_handles {
        let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
    }

    info!("shutdown complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::new(&config.general.log_level);
    match config.general.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

/// Stand-in for the chart renderer: one log line per published frame.
async fn log_frames(mut frames: watch::Receiver<ChartFrame>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = frames.changed() => if changed.is_err() { break },
        }
        let summary = summarize(&frames.borrow_and_update());
        info!("{summary}");
    }
}

fn summarize(frame: &ChartFrame) -> String {
    let Some(selection) = &frame.selection else {
        return "no selection".into();
    };
    if frame.is_error() {
        return format!("{selection} ({}): snapshot failed", frame.epoch);
    }
    if frame.is_loading() {
        return format!("{selection} ({}): loading", frame.epoch);
    }

    let last = frame.candles.last();
    let close = last
        .map(|c| format!("{:.4}", c.close))
        .unwrap_or_else(|| "-".into());
    let at = last
        .and_then(|c| c.open_time())
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".into());
    let mut summary = format!(
        "{selection} v{} feed={:?} candles={} at={at} close={close}",
        frame.version,
        frame.feed,
        frame.candles.len()
    );
    for series in &frame.indicators {
        let values: Vec<String> = series
            .latest()
            .into_iter()
            .map(|(name, value)| match value {
                Some(v) => format!("{name}={v:.4}"),
                None => format!("{name}=-"),
            })
            .collect();
        summary.push_str(&format!(" {}[{}]", series.label, values.join(" ")));
    }
    summary
}

async fn log_watchlist(mut board: watch::Receiver<Watchlist>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = board.changed() => if changed.is_err() { break },
        }
        let current = board.borrow_and_update();
        let rows: Vec<String> = current
            .rows()
            .into_iter()
            .map(|(symbol, stats)| match stats {
                Some(s) => format!(
                    "{symbol} {:.4} ({:+.2}%)",
                    s.last_price, s.price_change_percent
                ),
                None => format!("{symbol} -"),
            })
            .collect();
        info!(feed = ?current.feed_state(), watchlist = %rows.join(" | "), "watchlist");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epoch::EpochCounter;
    use crate::feed::FeedState;
    use crate::model::{AssetClass, Candle, Interval, Selection};
    use crate::session::SnapshotStatus;

    #[test]
    fn summary_shows_last_candle_time_and_close() {
        let mut frame = ChartFrame::empty();
        frame.selection = Some(Selection::new("BTCUSDT", Interval::Min1, AssetClass::Crypto));
        frame.epoch = EpochCounter::new().advance();
        frame.version = 3;
        frame.snapshot = SnapshotStatus::Ready;
        frame.feed = FeedState::Open;
        frame.candles = vec![Candle {
            time: 1_700_000_000,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 10.0,
        }];

        assert_eq!(
            summarize(&frame),
            "BTCUSDT 1m crypto v3 feed=Open candles=1 at=2023-11-14 22:13 close=1.5000"
        );
    }

    #[test]
    fn summary_of_empty_series_has_placeholders() {
        let mut frame = ChartFrame::empty();
        frame.selection = Some(Selection::new("AAPL", Interval::Day1, AssetClass::Equity));
        frame.snapshot = SnapshotStatus::Ready;
        assert!(summarize(&frame).contains("candles=0 at=- close=-"));
    }
}
