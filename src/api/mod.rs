pub mod handlers;
pub mod models;
pub mod router;

use crate::market::MarketData;
use axum::Router;
use axum::routing::get;
use axum_prometheus::PrometheusMetricLayer;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

pub struct ApiServer {
    market: Arc<MarketData>,
}

impl ApiServer {
    /// Wraps the market data service in an Arc for shared handler access.
    pub fn new(market: MarketData) -> Self {
        Self {
            market: Arc::new(market),
        }
    }

    /// The full app: API routes plus `/metrics`.
    ///
    /// Installs the global Prometheus recorder, so call it once per process.
    pub fn into_router(self) -> Router {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

        router::build(self.market)
            .route("/metrics", get(move || async move { metric_handle.render() }))
            .layer(prometheus_layer)
    }

    /// Binds to `port` and serves [`ApiServer::into_router`] until
    /// `shutdown` resolves.
    pub async fn run(
        self,
        port: u16,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let app = self.into_router();
        let addr = SocketAddr::from(([0, 0, 0, 0], port));

        tracing::info!("API server listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}
