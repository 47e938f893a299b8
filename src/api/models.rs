use serde::Serialize;

/// Body for every failed request
#[derive(Serialize)]
pub struct ErrorResponse {
    pub symbol: String,
    pub error: String,
}
