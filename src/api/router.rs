use super::handlers;
use crate::market::MarketData;
use axum::Router;
use axum::routing::get;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Builds the Axum router with all market routes and shared state.
pub fn build(market: Arc<MarketData>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/market/{symbol}", get(handlers::get_snapshot))
        .route("/market/{symbol}/report", get(handlers::get_report))
        .route("/funding/{symbol}", get(handlers::get_funding_rate))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(market)
}
