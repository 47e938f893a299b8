use marketlens::api::ApiServer;
use marketlens::config::{Config, LogFormat};
use marketlens::exchanges;
use marketlens::market::{INTRADAY_INTERVAL, LONGER_TERM_INTERVAL, MarketData};
use marketlens::store::KlineStore;
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    let exchange = exchanges::build(config.exchange, config.http_timeout)?;
    let store = KlineStore::new();
    let market = MarketData::new(exchange.clone(), store.clone());

    tracing::info!(
        "marketlens starting on {}, watching symbols: {:?} on port {}",
        exchange.name(),
        config.symbols,
        config.api_port
    );

    // ── 1. Fetch funding rates (one-off at startup) ────────────────
    for symbol in &config.symbols {
        match exchange.fetch_funding_rate(symbol).await {
            Ok(fr) => tracing::info!(
                "[{}] {} funding rate: {:.4}%",
                fr.exchange,
                fr.symbol,
                fr.rate * 100.0
            ),
            Err(e) => tracing::error!("[{}] {symbol} funding rate failed: {}", exchange.name(), e),
        }
    }

    // ── 2. Spawn WebSocket kline streams ───────────────────────────
    if config.stream_klines {
        let intervals = [INTRADAY_INTERVAL, LONGER_TERM_INTERVAL];
        if let Err(e) = exchange
            .run_kline_stream(&config.symbols, &intervals, store.clone())
            .await
        {
            tracing::error!("[{}] Failed to start kline streams: {}", exchange.name(), e);
        }
    }

    // ── 3. Spawn snapshot summary loop ─────────────────────────────
    let summary_market = market.clone();
    let symbols = config.symbols.clone();
    let refresh_interval = config.refresh_interval;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(refresh_interval);
        loop {
            interval.tick().await;
            for symbol in &symbols {
                match summary_market.get(symbol).await {
                    Ok(s) => tracing::info!(
                        "{}: price={} 1h={:.2}% rsi7={:.1} funding={}",
                        s.symbol,
                        s.current_price,
                        s.price_change_1h,
                        s.current_rsi7,
                        s.funding_rate
                            .map(|r| format!("{:.4}%", r * 100.0))
                            .unwrap_or_else(|| "n/a".to_string())
                    ),
                    Err(e) => tracing::error!("{symbol} snapshot failed: {e}"),
                }
            }
        }
    });

    // ── 4. Serve the API until Ctrl+C ──────────────────────────────
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
        }
        tracing::info!("Shutting down...");
    };

    ApiServer::new(market).run(config.api_port, shutdown).await
}
