use super::models::ErrorResponse;
use crate::errors::ExchangeError;
use crate::market::{MarketData, normalize_symbol};
use crate::models::{FundingRate, MarketSnapshot};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use std::sync::Arc;

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Maps an exchange failure to the status returned to our own caller.
fn api_error(symbol: &str, err: ExchangeError) -> ApiError {
    let status = if err.is_bad_request() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::BAD_GATEWAY
    };
    tracing::warn!("{symbol}: {err}");
    (
        status,
        Json(ErrorResponse {
            symbol: symbol.to_string(),
            error: err.to_string(),
        }),
    )
}

/// GET /health: liveness check
pub async fn health() -> &'static str {
    "OK"
}

/// GET /market/{symbol}: fresh snapshot as JSON
pub async fn get_snapshot(
    State(market): State<Arc<MarketData>>,
    Path(symbol): Path<String>,
) -> Result<Json<MarketSnapshot>, ApiError> {
    let symbol = normalize_symbol(&symbol);
    market
        .get(&symbol)
        .await
        .map(Json)
        .map_err(|e| api_error(&symbol, e))
}

/// GET /market/{symbol}/report: the same snapshot as a plain-text report
pub async fn get_report(
    State(market): State<Arc<MarketData>>,
    Path(symbol): Path<String>,
) -> Result<String, ApiError> {
    let symbol = normalize_symbol(&symbol);
    market
        .get(&symbol)
        .await
        .map(|snapshot| snapshot.to_string())
        .map_err(|e| api_error(&symbol, e))
}

/// GET /funding/{symbol}
pub async fn get_funding_rate(
    State(market): State<Arc<MarketData>>,
    Path(symbol): Path<String>,
) -> Result<Json<FundingRate>, ApiError> {
    let symbol = normalize_symbol(&symbol);
    market
        .funding_rate(&symbol)
        .await
        .map(Json)
        .map_err(|e| api_error(&symbol, e))
}
