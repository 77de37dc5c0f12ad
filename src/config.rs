use std::num::NonZeroU32;
use std::path::Path;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use nonzero_ext::nonzero;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::indicator::{Indicator, IndicatorKind, IndicatorRequest};
use crate::model::{AssetClass, Interval, Selection};

const DEFAULT_SNAPSHOT_RATE: NonZeroU32 = nonzero!(5u32);

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

fn default_api_url() -> String {
    "http://localhost:8000".into()
}

fn default_ws_url() -> String {
    "ws://localhost:8000".into()
}

fn default_reconnect_delay_secs() -> u64 {
    3
}

fn default_snapshot_refresh_secs() -> u64 {
    60
}

fn default_snapshot_requests_per_second() -> u32 {
    DEFAULT_SNAPSHOT_RATE.get()
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_symbol() -> String {
    "BTCUSDT".into()
}

fn default_interval() -> String {
    "1d".into()
}

fn default_asset() -> String {
    "crypto".into()
}

#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub watchlist: WatchlistConfig,
    #[serde(default)]
    pub indicators: Vec<IndicatorConfig>,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Accepted values: `"text"` | `"json"`
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    /// `0` disables periodic snapshot refresh.
    #[serde(default = "default_snapshot_refresh_secs")]
    pub snapshot_refresh_secs: u64,
    #[serde(default = "default_snapshot_requests_per_second")]
    pub snapshot_requests_per_second: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            ws_url: default_ws_url(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            snapshot_refresh_secs: default_snapshot_refresh_secs(),
            snapshot_requests_per_second: default_snapshot_requests_per_second(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ServerConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn refresh_every(&self) -> Option<Duration> {
        (self.snapshot_refresh_secs > 0).then(|| Duration::from_secs(self.snapshot_refresh_secs))
    }

    pub fn snapshot_rate(&self) -> NonZeroU32 {
        NonZeroU32::new(self.snapshot_requests_per_second).unwrap_or(DEFAULT_SNAPSHOT_RATE)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Deserialize)]
pub struct SelectionConfig {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default = "default_interval")]
    pub interval: String,
    /// Accepted values: `"crypto"` | `"stock"`
    #[serde(default = "default_asset")]
    pub asset: String,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            interval: default_interval(),
            asset: default_asset(),
        }
    }
}

impl SelectionConfig {
    pub fn resolve(&self) -> Result<Selection, Report<ConfigError>> {
        parse_selection(&self.symbol, &self.interval, &self.asset)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct WatchlistConfig {
    /// Crypto symbols streamed on the multiplexed ticker feed.
    #[serde(default)]
    pub symbols: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct IndicatorConfig {
    pub kind: String,
    #[serde(default)]
    pub params: toml::Table,
}

impl AppConfig {
    /// Indicator requests in config order. With no `[[indicators]]` entries
    /// every kind is computed with its default parameters.
    pub fn indicator_requests(&self) -> Result<Vec<IndicatorRequest>, Report<ConfigError>> {
        if self.indicators.is_empty() {
            return Ok(IndicatorKind::ALL
                .into_iter()
                .map(IndicatorRequest::with_defaults)
                .collect());
        }

        self.indicators
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                IndicatorRequest::from_params(&entry.kind, &entry.params).change_context(
                    ConfigError::Validation {
                        field: format!("indicators[{i}] ({})", entry.kind),
                    },
                )
            })
            .collect()
    }

    pub fn build_indicators(&self) -> Result<Vec<Box<dyn Indicator>>, Report<ConfigError>> {
        self.indicator_requests()?
            .iter()
            .map(|request| {
                request
                    .build()
                    .change_context(ConfigError::Validation {
                        field: "indicators".into(),
                    })
                    .attach_with(|| format!("request: {request:?}"))
            })
            .collect()
    }

    pub fn watchlist_symbols(&self) -> Vec<String> {
        self.watchlist
            .symbols
            .iter()
            .map(|s| s.trim().to_uppercase())
            .collect()
    }
}

/// Parse user-supplied selection fields, e.g. from the config file or a
/// `SYMBOL INTERVAL ASSET` command line.
pub fn parse_selection(
    symbol: &str,
    interval: &str,
    asset: &str,
) -> Result<Selection, Report<ConfigError>> {
    if symbol.trim().is_empty() {
        return Err(Report::new(ConfigError::Validation {
            field: "selection.symbol must not be empty".into(),
        }));
    }
    let Some(interval) = Interval::from_str(interval) else {
        return Err(Report::new(ConfigError::Validation {
            field: format!("selection.interval: unknown interval \"{interval}\""),
        }));
    };
    let Some(asset) = AssetClass::from_str(asset) else {
        return Err(Report::new(ConfigError::Validation {
            field: format!("selection.asset: unknown asset class \"{asset}\""),
        }));
    };
    Ok(Selection::new(symbol, interval, asset))
}

/// Load and validate an `AppConfig` from a TOML file at `path`.
pub fn load(path: &Path) -> Result<AppConfig, Report<ConfigError>> {
    let content = std::fs::read_to_string(path)
        .change_context(ConfigError::ReadFile)
        .attach_with(|| format!("path: {}", path.display()))?;

    let config: AppConfig = toml::from_str(&content).change_context(ConfigError::Parse {
        reason: "invalid TOML syntax or schema mismatch".into(),
    })?;

    validate(&config)?;

    Ok(config)
}

const VALID_LOG_FORMATS: &[&str] = &["text", "json"];

fn validate(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    validate_general(config)?;
    validate_server(config)?;
    config.selection.resolve()?;
    validate_watchlist(config)?;
    config.build_indicators()?;
    Ok(())
}

fn validate_general(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    if !VALID_LOG_FORMATS.contains(&config.general.log_format.as_str()) {
        return Err(Report::new(ConfigError::Validation {
            field: format!(
                "general.log_format \"{}\" is not valid",
                config.general.log_format
            ),
        }));
    }
    Ok(())
}

fn validate_server(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    let server = &config.server;
    if server.reconnect_delay_secs == 0 {
        return Err(Report::new(ConfigError::Validation {
            field: "server.reconnect_delay_secs must be > 0".into(),
        }));
    }
    if server.snapshot_requests_per_second == 0 {
        return Err(Report::new(ConfigError::Validation {
            field: "server.snapshot_requests_per_second must be > 0".into(),
        }));
    }
    if server.request_timeout_secs == 0 {
        return Err(Report::new(ConfigError::Validation {
            field: "server.request_timeout_secs must be > 0".into(),
        }));
    }
    if !server.ws_url.starts_with("ws://") && !server.ws_url.starts_with("wss://") {
        return Err(Report::new(ConfigError::Validation {
            field: format!("server.ws_url \"{}\" is not a websocket url", server.ws_url),
        }));
    }
    Ok(())
}

fn validate_watchlist(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    let mut seen = std::collections::HashSet::new();
    for symbol in config.watchlist_symbols() {
        if symbol.is_empty() {
            return Err(Report::new(ConfigError::Validation {
                field: "watchlist.symbols: empty symbol".into(),
            }));
        }
        if !seen.insert(symbol.clone()) {
            return Err(Report::new(ConfigError::Validation {
                field: format!("watchlist.symbols: duplicate symbol \"{symbol}\""),
            }));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> AppConfig {
        toml::from_str(toml).expect("parse failed")
    }

    #[test]
    fn valid_full_config_parses() {
        let toml = r#"
[general]
log_level = "debug"
log_format = "json"

[server]
api_url = "http://example.test:8000"
ws_url = "wss://example.test:8000"
reconnect_delay_secs = 5
snapshot_refresh_secs = 0
snapshot_requests_per_second = 2
request_timeout_secs = 30

[selection]
symbol = "ethusdt"
interval = "4h"
asset = "crypto"

[watchlist]
symbols = ["BTCUSDT", "ETHUSDT"]

[[indicators]]
kind = "boll"
params = { period = 20, multiplier = 2.5 }

[[indicators]]
kind = "macd"
"#;
        let config = parse(toml);
        assert!(validate(&config).is_ok());
        assert_eq!(config.general.log_format, "json");
        assert_eq!(config.server.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.server.refresh_every(), None);
        assert_eq!(config.server.snapshot_rate().get(), 2);

        let selection = config.selection.resolve().unwrap();
        assert_eq!(selection.symbol, "ETHUSDT");
        assert_eq!(selection.interval, Interval::Hour4);

        let requests = config.indicator_requests().unwrap();
        assert_eq!(
            requests,
            vec![
                IndicatorRequest::Boll {
                    period: 20,
                    multiplier: 2.5
                },
                IndicatorRequest::Macd {
                    fast: 12,
                    slow: 26,
                    signal: 9
                },
            ]
        );
    }

    #[test]
    fn defaults_applied_when_fields_omitted() {
        let config = parse("");
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.general.log_format, "text");
        assert_eq!(config.server.api_url, "http://localhost:8000");
        assert_eq!(config.server.ws_url, "ws://localhost:8000");
        assert_eq!(config.server.reconnect_delay(), Duration::from_secs(3));
        assert_eq!(config.server.refresh_every(), Some(Duration::from_secs(60)));
        assert_eq!(config.server.snapshot_rate().get(), 5);
        assert_eq!(config.selection.symbol, "BTCUSDT");
        assert_eq!(config.selection.interval, "1d");
        assert!(config.watchlist.symbols.is_empty());
        assert_eq!(config.indicator_requests().unwrap().len(), 7);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn invalid_interval_rejected() {
        let config = parse(
            r#"
[selection]
interval = "2m"
"#,
        );
        assert!(validate(&config).is_err());
    }

    #[test]
    fn stock_asset_accepted() {
        let selection = parse_selection("aapl", "1d", "stock").unwrap();
        assert_eq!(selection.asset, AssetClass::Equity);
        assert_eq!(selection.symbol, "AAPL");
        assert!(parse_selection("AAPL", "1d", "bond").is_err());
        assert!(parse_selection("  ", "1d", "crypto").is_err());
    }

    #[test]
    fn unknown_indicator_kind_rejected() {
        let config = parse(
            r#"
[[indicators]]
kind = "ichimoku"
"#,
        );
        assert!(validate(&config).is_err());
    }

    #[test]
    fn invalid_indicator_params_rejected() {
        let config = parse(
            r#"
[[indicators]]
kind = "macd"
params = { fast = 26, slow = 12 }
"#,
        );
        assert!(validate(&config).is_err());
    }

    #[test]
    fn zero_reconnect_delay_rejected() {
        let config = parse(
            r#"
[server]
reconnect_delay_secs = 0
"#,
        );
        assert!(validate(&config).is_err());
    }

    #[test]
    fn duplicate_watchlist_symbols_rejected() {
        let config = parse(
            r#"
[watchlist]
symbols = ["BTCUSDT", "btcusdt"]
"#,
        );
        assert!(validate(&config).is_err());
    }

    #[test]
    fn unknown_log_format_rejected() {
        let config = parse(
            r#"
[general]
log_format = "xml"
"#,
        );
        assert!(validate(&config).is_err());
    }
}
