//! Scripted exchange used by the unit tests.

use crate::candles::Candle;
use crate::error::FetchError;
use crate::exchange::ExchangeApi;
use crate::products::Product;
use crate::storage_utils::ExchangeConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

type CandleResult = Result<Vec<Candle>, FetchError>;

#[derive(Debug, Clone, PartialEq)]
pub struct CandleCall {
    pub pair: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub granularity: u32,
}

/// Candle responses are served from a per `(pair, granularity)` queue first,
/// then from a shared queue, then as an empty array.
#[derive(Default)]
pub struct FakeExchange {
    shared: Mutex<VecDeque<CandleResult>>,
    routed: Mutex<HashMap<(String, u32), VecDeque<CandleResult>>>,
    held: Mutex<HashMap<String, Arc<Notify>>>,
    products: Mutex<Vec<Product>>,
    calls: Mutex<Vec<CandleCall>>,
}

impl FakeExchange {
    pub fn push_candles(&self, response: CandleResult) {
        self.shared.lock().unwrap().push_back(response);
    }

    pub fn route_candles(&self, pair: &str, granularity: u32, response: CandleResult) {
        self.routed
            .lock()
            .unwrap()
            .entry((pair.to_string(), granularity))
            .or_default()
            .push_back(response);
    }

    /// Candle requests for `pair` never complete. The returned handle is
    /// notified once such a request is in flight.
    pub fn hold_pair(&self, pair: &str) -> Arc<Notify> {
        let reached = Arc::new(Notify::new());
        self.held
            .lock()
            .unwrap()
            .insert(pair.to_string(), Arc::clone(&reached));
        reached
    }

    pub fn add_product(&self, product: Product) {
        self.products.lock().unwrap().push(product);
    }

    pub fn candle_calls(&self) -> Vec<CandleCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExchangeApi for FakeExchange {
    async fn candles(
        &self,
        pair: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        granularity: u32,
    ) -> Result<Vec<Candle>, FetchError> {
        self.calls.lock().unwrap().push(CandleCall {
            pair: pair.to_string(),
            start,
            end,
            granularity,
        });

        let held = self.held.lock().unwrap().get(pair).cloned();
        if let Some(reached) = held {
            reached.notify_one();
            std::future::pending::<()>().await;
        }

        let routed = self
            .routed
            .lock()
            .unwrap()
            .get_mut(&(pair.to_string(), granularity))
            .and_then(VecDeque::pop_front);
        if let Some(response) = routed {
            return response;
        }

        self.shared.lock().unwrap().pop_front().unwrap_or(Ok(Vec::new()))
    }

    async fn product(&self, pair: &str) -> Result<Product, FetchError> {
        self.products
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id.as_deref() == Some(pair))
            .cloned()
            .ok_or_else(|| FetchError::Status {
                status: StatusCode::NOT_FOUND,
                body: r#"{"message":"NotFound"}"#.to_string(),
            })
    }

    async fn products(&self) -> Result<Vec<Product>, FetchError> {
        Ok(self.products.lock().unwrap().clone())
    }
}

/// A bar with a one-point spread around `close`.
pub fn candle(timestamp: i64, close: f64) -> Candle {
    Candle {
        timestamp,
        low: close - 0.5,
        high: close + 0.5,
        open: close,
        close,
        volume: 1.0,
    }
}

pub fn zero_interval_config() -> ExchangeConfig {
    ExchangeConfig {
        request_interval_ms: 0,
        ..ExchangeConfig::default()
    }
}
