//! Exchange REST access.
//!
//! [`ExchangeApi`] is the seam the screener talks through; [`CoinbaseClient`]
//! is the HTTP implementation used by the binary.

use crate::candles::Candle;
use crate::error::FetchError;
use crate::products::{LenientF64Visitor, Product};
use crate::storage_utils::ExchangeConfig;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Response, header};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;

#[async_trait]
pub trait ExchangeApi: Send + Sync {
    /// Candles for `pair` in `[start, end)` at `granularity` seconds, in whatever
    /// order the exchange returns them.
    async fn candles(
        &self,
        pair: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        granularity: u32,
    ) -> Result<Vec<Candle>, FetchError>;

    async fn product(&self, pair: &str) -> Result<Product, FetchError>;

    async fn products(&self) -> Result<Vec<Product>, FetchError>;
}

pub struct CoinbaseClient {
    client: Client,
    base_url: String,
}

impl CoinbaseClient {
    pub fn new(config: &ExchangeConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout())
            .default_headers({
                let mut headers = header::HeaderMap::new();
                headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
                headers
            })
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn body(response: Response) -> Result<String, FetchError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status { status, body });
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl ExchangeApi for CoinbaseClient {
    async fn candles(
        &self,
        pair: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        granularity: u32,
    ) -> Result<Vec<Candle>, FetchError> {
        let url = format!("{}/products/{}/candles", self.base_url, pair);
        let query = [
            ("start", iso_format(start)),
            ("end", iso_format(end)),
            ("granularity", granularity.to_string()),
        ];
        debug!("GET {} {:?}", url, query);

        let response = self.client.get(&url).query(&query).send().await?;
        let body = Self::body(response).await?;
        parse_candles_body(pair, &body)
    }

    async fn product(&self, pair: &str) -> Result<Product, FetchError> {
        let url = format!("{}/products/{}", self.base_url, pair);
        let response = self.client.get(&url).send().await?;
        let body = Self::body(response).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn products(&self) -> Result<Vec<Product>, FetchError> {
        let url = format!("{}/products", self.base_url);
        let response = self.client.get(&url).send().await?;
        let body = Self::body(response).await?;
        Ok(serde_json::from_str(&body)?)
    }
}

pub fn iso_format(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

struct LenientNumber(Option<f64>);

impl<'de> Deserialize<'de> for LenientNumber {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(LenientF64Visitor).map(LenientNumber)
    }
}

/// Decodes a candles response body.
///
/// An array of `[time, low, high, open, close, volume]` rows becomes candles;
/// rows that are short or non-numeric are skipped. An object is the exchange
/// reporting an error and becomes [`FetchError::Exchange`].
pub fn parse_candles_body(pair: &str, body: &str) -> Result<Vec<Candle>, FetchError> {
    let value: Value = serde_json::from_str(body)?;

    let rows = match value {
        Value::Array(rows) => rows,
        other => {
            let message = other
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Unknown error format")
                .to_string();
            return Err(FetchError::Exchange {
                pair: pair.to_string(),
                message,
            });
        }
    };

    let candles = rows
        .into_iter()
        .filter_map(|row| serde_json::from_value::<Vec<LenientNumber>>(row).ok())
        .filter_map(|row| match row.as_slice() {
            [
                LenientNumber(Some(ts)),
                LenientNumber(Some(low)),
                LenientNumber(Some(high)),
                LenientNumber(Some(open)),
                LenientNumber(Some(close)),
                LenientNumber(Some(volume)),
                ..,
            ] => Some(Candle {
                timestamp: *ts as i64,
                low: *low,
                high: *high,
                open: *open,
                close: *close,
                volume: *volume,
            }),
            _ => None,
        })
        .collect();

    Ok(candles)
}
