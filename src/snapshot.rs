use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::StatusCode;
use tracing::info;

use crate::error::FeedError;
use crate::model::{Candle, Selection};

/// Source of the historical candle series for a selection.
pub trait SnapshotSource: Send + Sync {
    /// One fetch, oldest candle first.
    fn fetch(&self, selection: &Selection)
    -> BoxFuture<'_, Result<Vec<Candle>, Report<FeedError>>>;
}

/// Klines endpoint client. Requests wait on a shared rate limiter so rapid
/// selection switching cannot flood the backend.
pub struct HttpSnapshotLoader {
    client: reqwest::Client,
    base_url: String,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl HttpSnapshotLoader {
    pub fn new(
        base_url: &str,
        requests_per_second: NonZeroU32,
        timeout: Duration,
    ) -> Result<Self, Report<FeedError>> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .change_context(FeedError::Request {
                endpoint: base_url.to_owned(),
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_second(requests_per_second))),
        })
    }

    fn klines_url(&self, symbol: &str) -> String {
        format!("{}/market/klines/{}", self.base_url, symbol)
    }
}

impl SnapshotSource for HttpSnapshotLoader {
    fn fetch(
        &self,
        selection: &Selection,
    ) -> BoxFuture<'_, Result<Vec<Candle>, Report<FeedError>>> {
        let selection = selection.clone();
        Box::pin(async move {
            self.rate_limiter.until_ready().await;

            let url = self.klines_url(&selection.symbol);
            let params = [
                ("interval", selection.interval.as_str()),
                ("asset_type", selection.asset.query_value()),
            ];

            let response = self
                .client
                .get(&url)
                .query(&params)
                .send()
                .await
                .change_context(FeedError::Request {
                    endpoint: url.clone(),
                })?;

            let status = response.status();
            if !status.is_success() {
                let report = Report::new(FeedError::Request {
                    endpoint: url.clone(),
                })
                .attach(format!("HTTP status: {status}"));
                if status == StatusCode::NOT_FOUND {
                    return Err(report.attach(format!("no data for {selection}")));
                }
                return Err(report);
            }

            let candles: Vec<Candle> =
                response
                    .json()
                    .await
                    .change_context(FeedError::ResponseParse {
                        endpoint: url.clone(),
                    })?;

            info!(
                symbol = %selection.symbol,
                interval = %selection.interval,
                fetched = candles.len(),
                "snapshot fetch complete"
            );

            Ok(candles)
        })
    }
}
