use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Exchange returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unexpected data from exchange: {0}")]
    UnexpectedData(String),
}

impl ExchangeError {
    /// True when the exchange rejected the request as malformed (unknown
    /// symbol, bad params). Rate limits and bans are not bad requests.
    pub fn is_bad_request(&self) -> bool {
        matches!(self, ExchangeError::Status { status: 400, .. })
    }
}
