use error_stack::Report;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::parse_selection;
use crate::error::ConfigError;
use crate::model::{Interval, Selection};
use crate::session::SessionHandle;

#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    Select(Selection),
    Quit,
}

/// Parse one controller line: `SYMBOL INTERVAL [crypto|stock]` or `quit`.
///
/// A blank line yields `None`. The interval defaults to the current one
/// when only a symbol is given.
pub fn parse_line(
    line: &str,
    current: Option<&Selection>,
) -> Option<Result<ControlCommand, Report<ConfigError>>> {
    let mut parts = line.split_whitespace();
    let first = parts.next()?;
    if first.eq_ignore_ascii_case("quit") || first.eq_ignore_ascii_case("exit") {
        return Some(Ok(ControlCommand::Quit));
    }

    let interval = parts
        .next()
        .map(str::to_owned)
        .or_else(|| current.map(|s| s.interval.to_string()))
        .unwrap_or_else(|| Interval::Day1.to_string());
    let asset = parts
        .next()
        .map(str::to_owned)
        .or_else(|| current.map(|s| s.asset.to_string()))
        .unwrap_or_else(|| "crypto".into());

    Some(parse_selection(first, &interval, &asset).map(ControlCommand::Select))
}

/// Read selection changes from stdin until `quit`, then fire `cancel`.
pub async fn run(handle: &SessionHandle, cancel: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => return,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("stdin closed, selection controller stopped");
                return;
            }
            Err(e) => {
                warn!(error = %e, "stdin read failed, selection controller stopped");
                return;
            }
        };

        let current = handle.frames().borrow().selection.clone();
        match parse_line(&line, current.as_ref()) {
            None => {}
            Some(Ok(ControlCommand::Quit)) => {
                info!("quit requested");
                cancel.cancel();
                return;
            }
            Some(Ok(ControlCommand::Select(selection))) => {
                if let Err(e) = handle.select(selection).await {
                    warn!(error = ?e, "selection change rejected");
                    return;
                }
            }
            Some(Err(e)) => warn!(error = ?e, input = %line, "invalid selection"),
        }
    }
}
