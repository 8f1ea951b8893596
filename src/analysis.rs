//! This module contains the core screening pipeline logic.
//!
//! Pairs are processed one at a time: daily candles -> history check ->
//! volatility filter -> volume filter -> minimum funds -> SuperTrend sessions.
//! Only the daily fetch can fail a pair; the auxiliary lookups degrade to
//! [`BestEffort::Unavailable`].

use crate::candles::{CandleFetcher, DateWindow};
use crate::error::FetchError;
use crate::exchange::ExchangeApi;
use crate::indicators::calculate_supertrend;
use crate::products::eligible_pairs;
use crate::sessions::{SuperTrendStats, analyze_sessions};
use crate::storage_utils::{AppConfig, ScreeningConfig, SuperTrendConfig};
use crate::volatility::{median_volatility, median_volume};
use std::fmt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const DAILY_GRANULARITY: u32 = 86_400;

/// A value that may legitimately be missing without failing the pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BestEffort<T> {
    Value(T),
    Unavailable,
}

impl<T> BestEffort<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            BestEffort::Value(v) => Some(v),
            BestEffort::Unavailable => None,
        }
    }
}

impl<T: Default + Clone> BestEffort<T> {
    pub fn value_or_default(&self) -> T {
        self.value().cloned().unwrap_or_default()
    }
}

impl<T> From<Option<T>> for BestEffort<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(BestEffort::Unavailable, BestEffort::Value)
    }
}

/// A pair that passed both filters.
#[derive(Debug, Clone, PartialEq)]
pub struct PairRecord {
    pub pair: String,
    pub median_volatility_pct: f64,
    pub median_volume: f64,
    pub min_market_funds: BestEffort<f64>,
    pub supertrend: BestEffort<SuperTrendStats>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    InsufficientHistory { candles: usize, required: usize },
    BelowVolatility { median_pct: f64, threshold: f64 },
    BelowVolume { median_volume: f64, threshold: f64 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::InsufficientHistory { candles, required } => write!(
                f,
                "only {} full day(s) of history in the {}-day window",
                candles, required
            ),
            SkipReason::BelowVolatility {
                median_pct,
                threshold,
            } => write!(f, "median {:.4}% < {:.2}% threshold", median_pct, threshold),
            SkipReason::BelowVolume {
                median_volume,
                threshold,
            } => write!(f, "median volume {:.2} < {:.0} threshold", median_volume, threshold),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PairOutcome {
    Accepted(PairRecord),
    Skipped(SkipReason),
}

/// What a run produced. `records` are in processing order.
#[derive(Debug, Default)]
pub struct ScreeningRun {
    pub records: Vec<PairRecord>,
    pub processed: usize,
    pub cancelled: bool,
}

pub struct ScreeningPipeline<'a, A: ExchangeApi + ?Sized> {
    fetcher: CandleFetcher<'a, A>,
    screening: ScreeningConfig,
    supertrend: SuperTrendConfig,
    window: DateWindow,
}

impl<'a, A: ExchangeApi + ?Sized> ScreeningPipeline<'a, A> {
    pub fn new(api: &'a A, config: &AppConfig, window: DateWindow) -> Self {
        Self {
            fetcher: CandleFetcher::new(api, &config.exchange),
            screening: config.screening.clone(),
            supertrend: config.supertrend.clone(),
            window,
        }
    }

    pub fn window(&self) -> &DateWindow {
        &self.window
    }

    /// Active pairs quoted in the configured currency, sorted.
    pub async fn discover_pairs(&self) -> Result<Vec<String>, FetchError> {
        let products = self.fetcher.api().products().await?;
        self.fetcher.pace().await;
        Ok(eligible_pairs(&products, &self.screening.quote_currency))
    }

    /// Screens `pairs` in order until done or until `cancel` turns true.
    ///
    /// Cancellation drops the pair in flight; records already produced are kept.
    pub async fn run(&self, pairs: &[String], mut cancel: watch::Receiver<bool>) -> ScreeningRun {
        let mut run = ScreeningRun::default();
        let total = pairs.len();

        for (i, pair) in pairs.iter().enumerate() {
            if *cancel.borrow() {
                run.cancelled = true;
                break;
            }

            info!("[{}/{}] Fetching {} ...", i + 1, total, pair);
            let outcome = tokio::select! {
                outcome = self.screen_pair(pair) => Some(outcome),
                _ = cancellation(&mut cancel) => None,
            };
            let Some(outcome) = outcome else {
                run.cancelled = true;
                break;
            };
            run.processed += 1;

            match outcome {
                Ok(PairOutcome::Accepted(record)) => {
                    info!("{} added to results", pair);
                    run.records.push(record);
                }
                Ok(PairOutcome::Skipped(reason)) => info!("Skipping {}: {}", pair, reason),
                Err(e) => warn!("Error for {}: {}", pair, e),
            }
        }

        if run.cancelled {
            warn!(
                "Run cancelled after {} of {} pairs; keeping {} result(s)",
                run.processed,
                total,
                run.records.len()
            );
        }
        run
    }

    /// Runs every stage for one pair, stopping at the first filter it fails.
    pub async fn screen_pair(&self, pair: &str) -> Result<PairOutcome, FetchError> {
        let days = self.screening.days as usize;
        let daily = self
            .fetcher
            .try_fetch(pair, &self.window, DAILY_GRANULARITY, None)
            .await?;

        let Some(median_pct) = median_volatility(&daily, days) else {
            return Ok(PairOutcome::Skipped(SkipReason::InsufficientHistory {
                candles: daily.len(),
                required: days,
            }));
        };
        if median_pct < self.screening.volatility_threshold {
            return Ok(PairOutcome::Skipped(SkipReason::BelowVolatility {
                median_pct,
                threshold: self.screening.volatility_threshold,
            }));
        }
        info!("Median daily range% ({}d): {:.4}", days, median_pct);

        let volume = median_volume(&daily);
        if volume < self.screening.volume_threshold {
            return Ok(PairOutcome::Skipped(SkipReason::BelowVolume {
                median_volume: volume,
                threshold: self.screening.volume_threshold,
            }));
        }
        info!("Median daily volume: {:.2}", volume);

        let min_market_funds = self.min_market_funds(pair).await;
        let supertrend = self.trend_stats(pair).await;

        Ok(PairOutcome::Accepted(PairRecord {
            pair: pair.to_string(),
            median_volatility_pct: median_pct,
            median_volume: volume,
            min_market_funds,
            supertrend,
        }))
    }

    async fn min_market_funds(&self, pair: &str) -> BestEffort<f64> {
        let product = self.fetcher.api().product(pair).await;
        self.fetcher.pace().await;

        match product {
            Ok(product) => product.min_market_funds.into(),
            Err(e) => {
                warn!("Could not fetch min_market_funds for {}: {}", pair, e);
                BestEffort::Unavailable
            }
        }
    }

    async fn trend_stats(&self, pair: &str) -> BestEffort<SuperTrendStats> {
        let config = &self.supertrend;
        let candles = match self
            .fetcher
            .try_fetch(
                pair,
                &self.window,
                config.granularity,
                Some(config.fallback_granularity),
            )
            .await
        {
            Ok(candles) => candles,
            Err(e) => {
                warn!("SuperTrend: no data available for {}: {}", pair, e);
                return BestEffort::Unavailable;
            }
        };

        if candles.len() < config.min_candles.max(config.atr_length + 1) {
            debug!("SuperTrend: only {} candles for {}", candles.len(), pair);
            return BestEffort::Value(SuperTrendStats::default());
        }

        let high: Vec<f64> = candles.iter().map(|c| c.high).collect();
        let low: Vec<f64> = candles.iter().map(|c| c.low).collect();
        let close: Vec<f64> = candles.iter().map(|c| c.close).collect();

        let stats = match calculate_supertrend(&high, &low, &close, config.factor, config.atr_length) {
            Some(trend) => match analyze_sessions(&high, &low, &close, &trend) {
                Some(stats) => stats,
                None => {
                    warn!("SuperTrend: a session for {} opens on a zero close", pair);
                    return BestEffort::Unavailable;
                }
            },
            None => SuperTrendStats::default(),
        };

        if stats.total_sessions > 0 {
            info!(
                "SuperTrend: {} sessions, Avg Long: {:.2}%, Max Long: {:.2}%, Avg Short: {:.2}%, Max Short: {:.2}%",
                stats.total_sessions,
                stats.avg_long_session_pct,
                stats.max_long_session_pct,
                stats.avg_short_session_pct,
                stats.max_short_session_pct
            );
        } else {
            info!("SuperTrend: no flips in the window");
        }

        BestEffort::Value(stats)
    }
}

/// Resolves once `cancel` turns true; never resolves if the sender is gone.
async fn cancellation(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candles::Candle;
    use crate::products::Product;
    use crate::test_support::{FakeExchange, candle, zero_interval_config};
    use chrono::{TimeZone, Utc};

    const DAY: i64 = 86_400;

    fn config(days: u32) -> AppConfig {
        let mut config = AppConfig::default();
        config.exchange = zero_interval_config();
        config.screening.days = days;
        config
    }

    fn window(days: i64) -> DateWindow {
        let end = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        DateWindow::new(end - chrono::Duration::days(days), end)
    }

    fn daily(count: usize, range_pct: f64, volume: f64) -> Vec<Candle> {
        (0..count)
            .map(|i| Candle {
                timestamp: i as i64 * DAY,
                low: 100.0,
                high: 100.0 * (1.0 + range_pct / 100.0),
                open: 100.0,
                close: 101.0,
                volume,
            })
            .collect()
    }

    fn zigzag_candles(len: usize) -> Vec<Candle> {
        (0..len)
            .map(|i| {
                let step = (i % 12) as f64 * 1.5;
                let close = if (i / 12) % 2 == 0 { 100.0 + step } else { 118.0 - step };
                candle(i as i64 * 1800, close)
            })
            .collect()
    }

    fn product(id: &str, min_funds: Option<f64>) -> Product {
        Product {
            id: Some(id.to_string()),
            min_market_funds: min_funds,
            ..Product::default()
        }
    }

    #[tokio::test]
    async fn short_history_is_skipped_without_error() {
        let exchange = FakeExchange::default();
        exchange.route_candles("NEW-USD", DAILY_GRANULARITY, Ok(daily(5, 10.0, 5e6)));
        let config = config(10);
        let pipeline = ScreeningPipeline::new(&exchange, &config, window(10));

        let outcome = pipeline.screen_pair("NEW-USD").await.unwrap();

        assert_eq!(
            outcome,
            PairOutcome::Skipped(SkipReason::InsufficientHistory {
                candles: 5,
                required: 10
            })
        );
        // No auxiliary lookups after a skip.
        assert_eq!(exchange.candle_calls().len(), 1);
    }

    #[tokio::test]
    async fn thresholds_gate_in_order() {
        let exchange = FakeExchange::default();
        exchange.route_candles("CALM-USD", DAILY_GRANULARITY, Ok(daily(10, 1.0, 5e6)));
        exchange.route_candles("THIN-USD", DAILY_GRANULARITY, Ok(daily(10, 5.0, 10.0)));
        let config = config(10);
        let pipeline = ScreeningPipeline::new(&exchange, &config, window(10));

        let calm = pipeline.screen_pair("CALM-USD").await.unwrap();
        assert!(matches!(
            calm,
            PairOutcome::Skipped(SkipReason::BelowVolatility { threshold, .. }) if threshold == 2.0
        ));

        let thin = pipeline.screen_pair("THIN-USD").await.unwrap();
        assert!(matches!(
            thin,
            PairOutcome::Skipped(SkipReason::BelowVolume { median_volume, .. }) if median_volume == 10.0
        ));
    }

    #[tokio::test]
    async fn auxiliary_failures_do_not_reject_the_pair() {
        let exchange = FakeExchange::default();
        exchange.route_candles("ABC-USD", DAILY_GRANULARITY, Ok(daily(10, 5.0, 2e6)));
        exchange.route_candles(
            "ABC-USD",
            1800,
            Err(FetchError::Exchange {
                pair: "ABC-USD".into(),
                message: "NotFound".into(),
            }),
        );
        let config = config(10);
        let pipeline = ScreeningPipeline::new(&exchange, &config, window(10));

        let outcome = pipeline.screen_pair("ABC-USD").await.unwrap();

        let PairOutcome::Accepted(record) = outcome else {
            panic!("expected an accepted pair, got {outcome:?}");
        };
        assert!((record.median_volatility_pct - 5.0).abs() < 1e-9);
        assert_eq!(record.median_volume, 2e6);
        assert_eq!(record.min_market_funds, BestEffort::Unavailable);
        assert_eq!(record.supertrend, BestEffort::Unavailable);
        assert_eq!(record.supertrend.value_or_default(), SuperTrendStats::default());
    }

    #[tokio::test]
    async fn accepted_pair_carries_trend_stats() {
        let exchange = FakeExchange::default();
        exchange.add_product(product("ABC-USD", Some(1.0)));
        exchange.route_candles("ABC-USD", DAILY_GRANULARITY, Ok(daily(10, 5.0, 2e6)));
        let fine = zigzag_candles(120);
        exchange.route_candles("ABC-USD", 1800, Ok(fine.clone()));
        let config = config(10);
        let pipeline = ScreeningPipeline::new(&exchange, &config, window(10));

        let outcome = pipeline.screen_pair("ABC-USD").await.unwrap();

        let PairOutcome::Accepted(record) = outcome else {
            panic!("expected an accepted pair, got {outcome:?}");
        };
        assert_eq!(record.min_market_funds, BestEffort::Value(1.0));

        let high: Vec<f64> = fine.iter().map(|c| c.high).collect();
        let low: Vec<f64> = fine.iter().map(|c| c.low).collect();
        let close: Vec<f64> = fine.iter().map(|c| c.close).collect();
        let trend = calculate_supertrend(&high, &low, &close, 3.0, 10).unwrap();
        let expected = analyze_sessions(&high, &low, &close, &trend).unwrap();

        assert!(expected.total_sessions > 0);
        assert_eq!(record.supertrend, BestEffort::Value(expected));

        // 10 days of 30m candles is two 6-day chunks.
        let fine_calls: Vec<_> = exchange
            .candle_calls()
            .into_iter()
            .filter(|c| c.granularity == 1800)
            .collect();
        assert_eq!(fine_calls.len(), 2);
    }

    #[tokio::test]
    async fn too_few_trend_candles_gives_zeroed_stats() {
        let exchange = FakeExchange::default();
        exchange.route_candles("ABC-USD", DAILY_GRANULARITY, Ok(daily(10, 5.0, 2e6)));
        exchange.route_candles("ABC-USD", 1800, Ok(zigzag_candles(15)));
        let config = config(10);
        let pipeline = ScreeningPipeline::new(&exchange, &config, window(10));

        let PairOutcome::Accepted(record) = pipeline.screen_pair("ABC-USD").await.unwrap() else {
            panic!("expected an accepted pair");
        };

        assert_eq!(record.supertrend, BestEffort::Value(SuperTrendStats::default()));
    }

    #[tokio::test]
    async fn run_survives_a_failing_pair() {
        let exchange = FakeExchange::default();
        exchange.route_candles(
            "BAD-USD",
            DAILY_GRANULARITY,
            Err(FetchError::Exchange {
                pair: "BAD-USD".into(),
                message: "NotFound".into(),
            }),
        );
        exchange.route_candles("GOOD-USD", DAILY_GRANULARITY, Ok(daily(10, 5.0, 2e6)));
        exchange.route_candles("NEW-USD", DAILY_GRANULARITY, Ok(daily(3, 5.0, 2e6)));
        let config = config(10);
        let pipeline = ScreeningPipeline::new(&exchange, &config, window(10));
        let (_tx, rx) = watch::channel(false);

        let pairs = vec!["BAD-USD".to_string(), "GOOD-USD".to_string(), "NEW-USD".to_string()];
        let run = pipeline.run(&pairs, rx).await;

        assert!(!run.cancelled);
        assert_eq!(run.processed, 3);
        assert_eq!(run.records.len(), 1);
        assert_eq!(run.records[0].pair, "GOOD-USD");
    }

    #[tokio::test]
    async fn cancelled_run_stops_before_next_pair() {
        let exchange = FakeExchange::default();
        let config = config(10);
        let pipeline = ScreeningPipeline::new(&exchange, &config, window(10));
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let run = pipeline.run(&["ABC-USD".to_string()], rx).await;

        assert!(run.cancelled);
        assert_eq!(run.processed, 0);
        assert!(run.records.is_empty());
        assert!(exchange.candle_calls().is_empty());
    }

    #[tokio::test]
    async fn cancelling_mid_run_keeps_finished_pairs() {
        let exchange = FakeExchange::default();
        exchange.route_candles("GOOD-USD", DAILY_GRANULARITY, Ok(daily(10, 5.0, 2e6)));
        let in_flight = exchange.hold_pair("SLOW-USD");
        let config = config(10);
        let pipeline = ScreeningPipeline::new(&exchange, &config, window(10));
        let (tx, rx) = watch::channel(false);

        let pairs = vec!["GOOD-USD".to_string(), "SLOW-USD".to_string(), "NEXT-USD".to_string()];
        let (run, _) = tokio::join!(pipeline.run(&pairs, rx), async {
            in_flight.notified().await;
            tx.send(true).unwrap();
        });

        assert!(run.cancelled);
        assert_eq!(run.processed, 1);
        let kept: Vec<&str> = run.records.iter().map(|r| r.pair.as_str()).collect();
        assert_eq!(kept, vec!["GOOD-USD"]);
        assert!(exchange.candle_calls().iter().all(|c| c.pair != "NEXT-USD"));
    }

    #[tokio::test]
    async fn dropped_sender_does_not_cancel() {
        let exchange = FakeExchange::default();
        exchange.route_candles("GOOD-USD", DAILY_GRANULARITY, Ok(daily(10, 5.0, 2e6)));
        let config = config(10);
        let pipeline = ScreeningPipeline::new(&exchange, &config, window(10));
        let (tx, rx) = watch::channel(false);
        drop(tx);

        let run = pipeline.run(&["GOOD-USD".to_string()], rx).await;

        assert!(!run.cancelled);
        assert_eq!(run.records.len(), 1);
    }

    #[tokio::test]
    async fn discovers_quote_pairs_sorted() {
        let exchange = FakeExchange::default();
        exchange.add_product(product("SOL-USD", None));
        exchange.add_product(product("BTC-EUR", None));
        exchange.add_product(product("ADA-USD", None));
        let mut config = config(10);
        config.screening.quote_currency = "USD".into();
        let pipeline = ScreeningPipeline::new(&exchange, &config, window(10));

        let pairs = pipeline.discover_pairs().await.unwrap();

        assert_eq!(pairs, vec!["ADA-USD", "SOL-USD"]);
    }

    #[test]
    fn best_effort_from_option() {
        assert_eq!(BestEffort::from(Some(2.5)), BestEffort::Value(2.5));
        assert_eq!(BestEffort::<f64>::from(None), BestEffort::Unavailable);
        assert_eq!(BestEffort::<f64>::Unavailable.value(), None);
        assert_eq!(BestEffort::Value(0.0).value(), Some(&0.0));
    }
}
