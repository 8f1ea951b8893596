//! Historical candle acquisition.
//!
//! Requests are split into sub-windows small enough to stay under the
//! exchange's per-response candle cap, issued one after another with a fixed
//! pause in between, then merged into a single ascending series.

use crate::error::FetchError;
use crate::exchange::ExchangeApi;
use crate::storage_utils::ExchangeConfig;
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// One OHLCV bar. `timestamp` is the bucket start in epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    pub timestamp: i64,
    pub low: f64,
    pub high: f64,
    pub open: f64,
    pub close: f64,
    pub volume: f64,
}

/// Half-open UTC interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The `days` full UTC days before `now`'s midnight, so the last daily
    /// candle is never a partial one.
    pub fn trailing_days(now: DateTime<Utc>, days: u32) -> Self {
        let end = now.date_naive().and_time(NaiveTime::MIN).and_utc();
        let start = end - ChronoDuration::days(i64::from(days));
        Self { start, end }
    }

    /// Consecutive sub-windows of at most `span`, covering the whole window.
    pub fn chunks(&self, span: ChronoDuration) -> Vec<DateWindow> {
        let mut chunks = Vec::new();
        if span <= ChronoDuration::zero() {
            return chunks;
        }

        let mut current = self.start;
        while current < self.end {
            let next = (current + span).min(self.end);
            chunks.push(DateWindow::new(current, next));
            current = next;
        }
        chunks
    }
}

/// Chunked, paced candle downloader on top of an [`ExchangeApi`].
pub struct CandleFetcher<'a, A: ExchangeApi + ?Sized> {
    api: &'a A,
    request_interval: Duration,
    max_candles_per_request: u32,
    max_chunk_requests: usize,
}

impl<'a, A: ExchangeApi + ?Sized> CandleFetcher<'a, A> {
    pub fn new(api: &'a A, config: &ExchangeConfig) -> Self {
        Self {
            api,
            request_interval: config.request_interval(),
            max_candles_per_request: config.max_candles_per_request.max(1),
            max_chunk_requests: config.max_chunk_requests,
        }
    }

    pub fn api(&self) -> &A {
        self.api
    }

    /// Unconditional rate-limit pause.
    pub async fn pace(&self) {
        if !self.request_interval.is_zero() {
            tokio::time::sleep(self.request_interval).await;
        }
    }

    /// Downloads `window` for `pair` chunk by chunk.
    ///
    /// A 400 on a chunk is retried once at `fallback` (when given). Any other
    /// failure, or a failed fallback, aborts the whole fetch; chunks already
    /// downloaded are dropped with it. The result is de-duplicated by
    /// timestamp and sorted ascending.
    pub async fn try_fetch(
        &self,
        pair: &str,
        window: &DateWindow,
        granularity: u32,
        fallback: Option<u32>,
    ) -> Result<Vec<Candle>, FetchError> {
        let span = ChronoDuration::seconds(
            i64::from(granularity) * i64::from(self.max_candles_per_request),
        );
        let chunks = window.chunks(span);

        let mut merged: BTreeMap<i64, Candle> = BTreeMap::new();

        for (n, chunk) in chunks.iter().enumerate() {
            if n >= self.max_chunk_requests {
                debug!(
                    "{}: stopping after {} chunk requests ({} chunks in window)",
                    pair,
                    self.max_chunk_requests,
                    chunks.len()
                );
                break;
            }

            let result = self.api.candles(pair, chunk.start, chunk.end, granularity).await;
            let candles = match (result, fallback) {
                (Err(e), Some(coarser)) if e.is_bad_request() => {
                    debug!("{}: {}s refused, retrying chunk at {}s", pair, granularity, coarser);
                    self.pace().await;
                    self.api
                        .candles(pair, chunk.start, chunk.end, coarser)
                        .await
                        .map_err(|source| FetchError::GranularityRejected {
                            pair: pair.to_string(),
                            granularity,
                            fallback: coarser,
                            source: Box::new(source),
                        })?
                }
                (result, _) => result?,
            };

            debug!("{}: chunk {} returned {} candles", pair, n + 1, candles.len());
            for candle in candles {
                // Neighbouring chunks can both return the boundary candle.
                merged.entry(candle.timestamp).or_insert(candle);
            }

            self.pace().await;
        }

        Ok(merged.into_values().collect())
    }
}
