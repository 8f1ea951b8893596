use reqwest::StatusCode;
use thiserror::Error;

/// Errors raised while talking to the exchange.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network failure, timeout, or a body that could not be read.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The exchange answered with a non-success status code.
    #[error("exchange returned HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },

    /// The exchange answered with an error object instead of data.
    #[error("candles error for {pair}: {message}")]
    Exchange { pair: String, message: String },

    #[error("malformed response: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Both the requested and the fallback granularity were refused.
    #[error("{pair} does not support {granularity}s or {fallback}s granularity: {source}")]
    GranularityRejected {
        pair: String,
        granularity: u32,
        fallback: u32,
        #[source]
        source: Box<FetchError>,
    },
}

impl FetchError {
    /// A 400 is how the exchange refuses a granularity for a product.
    pub fn is_bad_request(&self) -> bool {
        matches!(self, FetchError::Status { status, .. } if *status == StatusCode::BAD_REQUEST)
    }
}
