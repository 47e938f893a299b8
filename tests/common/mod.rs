//! A local axum server that impersonates the exchange REST APIs.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use marketlens::exchanges::binance::BinanceFutures;
use marketlens::exchanges::bybit::Bybit;
use serde_json::{Value, json};

pub const UNKNOWN_SYMBOL: &str = "NOPEUSDT";
/// Funding endpoint fails for this one; everything else works.
pub const NO_FUNDING_SYMBOL: &str = "FLAKYUSDT";
/// Kline endpoint answers 429 for this one.
pub const RATE_LIMITED_SYMBOL: &str = "BUSYUSDT";
/// Kline endpoint answers 500 for this one.
pub const UPSTREAM_DOWN_SYMBOL: &str = "DOWNUSDT";
/// Close price of the single live kline every fake stream pushes.
pub const STREAMED_CLOSE: f64 = 999.0;
/// Candles the fake REST endpoints serve when no limit is given, and the
/// position of the streamed kline right after them.
const SEEDED: u64 = 200;
const BASE_OPEN_TIME: u64 = 1_700_000_000_000;

type Params = Query<HashMap<String, String>>;

#[derive(Clone, Copy)]
struct Options {
    oi_history: bool,
}

fn interval_ms(interval: &str) -> u64 {
    match interval {
        "3m" | "3" => 180_000,
        "4h" | "240" => 14_400_000,
        _ => 60_000,
    }
}

/// `limit` Binance-style rows with closes rising by 1 from `base`.
pub fn kline_rows(limit: usize, interval: &str, base: f64) -> Value {
    let step = interval_ms(interval);
    let rows: Vec<Value> = (0..limit)
        .map(|i| {
            let open_time = BASE_OPEN_TIME + i as u64 * step;
            let close = base + i as f64;
            json!([
                open_time,
                format!("{:.2}", close - 0.5),
                format!("{:.2}", close + 1.0),
                format!("{:.2}", close - 1.0),
                format!("{:.2}", close),
                "12.5",
                open_time + step - 1,
                "1000.0",
                42,
                "6.0",
                "500.0",
                "0"
            ])
        })
        .collect();
    Value::Array(rows)
}

fn invalid_symbol() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "code": -1121, "msg": "Invalid symbol." })),
    )
        .into_response()
}

fn param<'a>(params: &'a HashMap<String, String>, key: &str) -> &'a str {
    params.get(key).map(String::as_str).unwrap_or_default()
}

async fn binance_klines(Query(params): Params) -> Response {
    match param(&params, "symbol") {
        UNKNOWN_SYMBOL => return invalid_symbol(),
        RATE_LIMITED_SYMBOL => {
            return (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({ "code": -1003, "msg": "Too many requests." })),
            )
                .into_response();
        }
        UPSTREAM_DOWN_SYMBOL => {
            return (StatusCode::INTERNAL_SERVER_ERROR, "upstream down").into_response();
        }
        _ => {}
    }
    let interval = param(&params, "interval");
    let limit = param(&params, "limit").parse().unwrap_or(500);
    let base = if interval == "4h" { 50.0 } else { 100.0 };
    Json(kline_rows(limit, interval, base)).into_response()
}

async fn binance_open_interest(Query(params): Params) -> Response {
    let symbol = param(&params, "symbol");
    if symbol == UNKNOWN_SYMBOL {
        return invalid_symbol();
    }
    Json(json!({ "symbol": symbol, "openInterest": "1200.000", "time": 1700000000000u64 }))
        .into_response()
}

async fn binance_open_interest_hist(
    State(options): State<Options>,
    Query(params): Params,
) -> Response {
    if !options.oi_history {
        return (StatusCode::NOT_FOUND, "not found").into_response();
    }
    let symbol = param(&params, "symbol");
    Json(json!([
        { "symbol": symbol, "sumOpenInterest": "1000.0", "sumOpenInterestValue": "1", "timestamp": 1 },
        { "symbol": symbol, "sumOpenInterest": "1100.0", "sumOpenInterestValue": "1", "timestamp": 2 },
        { "symbol": symbol, "sumOpenInterest": "1200.0", "sumOpenInterestValue": "1", "timestamp": 3 }
    ]))
    .into_response()
}

async fn binance_premium_index(Query(params): Params) -> Response {
    let symbol = param(&params, "symbol");
    match symbol {
        UNKNOWN_SYMBOL => invalid_symbol(),
        NO_FUNDING_SYMBOL => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
        _ => Json(json!({
            "symbol": symbol,
            "markPrice": "139.00",
            "lastFundingRate": "0.00010000",
            "nextFundingTime": 1700006400000u64,
            "time": 1700000000000u64
        }))
        .into_response(),
    }
}

async fn bybit_klines(Query(params): Params) -> Response {
    let interval = param(&params, "interval");
    let limit = param(&params, "limit").parse().unwrap_or(200);
    let step = interval_ms(interval);
    // newest first, strings only, turnover in the last slot
    let list: Vec<Value> = (0..limit)
        .rev()
        .map(|i: usize| {
            let start = BASE_OPEN_TIME + i as u64 * step;
            let close = 100.0 + i as f64;
            json!([
                start.to_string(),
                close.to_string(),
                (close + 1.0).to_string(),
                (close - 1.0).to_string(),
                close.to_string(),
                "3",
                "300"
            ])
        })
        .collect();
    Json(json!({
        "retCode": 0,
        "retMsg": "OK",
        "result": { "symbol": param(&params, "symbol"), "category": "linear", "list": list }
    }))
    .into_response()
}

async fn bybit_open_interest(Query(params): Params) -> Response {
    Json(json!({
        "retCode": 0,
        "retMsg": "OK",
        "result": {
            "symbol": param(&params, "symbol"),
            "category": "linear",
            "list": [
                { "openInterest": "300", "timestamp": "1700000600000" },
                { "openInterest": "200", "timestamp": "1700000300000" },
                { "openInterest": "100", "timestamp": "1700000000000" }
            ]
        }
    }))
    .into_response()
}

async fn bybit_tickers(Query(params): Params) -> Response {
    let symbol = param(&params, "symbol");
    if symbol == UNKNOWN_SYMBOL {
        return Json(json!({
            "retCode": 10001,
            "retMsg": "params error: symbol invalid",
            "result": { "list": [] }
        }))
        .into_response();
    }
    Json(json!({
        "retCode": 0,
        "retMsg": "OK",
        "result": {
            "category": "linear",
            "list": [{
                "symbol": symbol,
                "fundingRate": "-0.00005",
                "nextFundingTime": "1700006400000"
            }]
        }
    }))
    .into_response()
}

async fn send_text(socket: &mut WebSocket, value: Value) -> bool {
    socket
        .send(WsMessage::Text(value.to_string().into()))
        .await
        .is_ok()
}

/// Drains the socket so it stays open until the client goes away.
async fn hold_open(socket: &mut WebSocket) {
    while let Some(Ok(_)) = socket.recv().await {}
}

/// Combined stream: one kline event per requested `<sym>@kline_<i>`, placed
/// right after the candles the REST endpoint serves.
async fn binance_stream(ws: WebSocketUpgrade, Query(params): Params) -> Response {
    let streams = param(&params, "streams").to_string();

    ws.on_upgrade(move |mut socket| async move {
        for stream in streams.split('/') {
            let Some((symbol, interval)) = stream.split_once("@kline_") else {
                continue;
            };
            let step = interval_ms(interval);
            let open_time = BASE_OPEN_TIME + SEEDED * step;
            let symbol = symbol.to_uppercase();
            let event = json!({
                "stream": stream,
                "data": {
                    "e": "kline",
                    "E": open_time + 1_000,
                    "s": symbol,
                    "k": {
                        "t": open_time,
                        "T": open_time + step - 1,
                        "s": symbol,
                        "i": interval,
                        "o": "998.0",
                        "c": format!("{STREAMED_CLOSE:.1}"),
                        "h": "1000.0",
                        "l": "997.0",
                        "v": "3.5",
                        "x": false
                    }
                }
            });
            if !send_text(&mut socket, event).await {
                return;
            }
        }
        hold_open(&mut socket).await;
    })
}

/// Public linear stream: acks a subscribe and pushes one kline per topic.
/// Pings are ignored.
async fn bybit_stream(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|mut socket| async move {
        while let Some(Ok(msg)) = socket.recv().await {
            let WsMessage::Text(text) = msg else { continue };
            let Ok(request) = serde_json::from_str::<Value>(text.as_str()) else {
                continue;
            };
            if request["op"] != "subscribe" {
                continue;
            }

            let ack = json!({ "success": true, "ret_msg": "", "op": "subscribe", "conn_id": "fake" });
            if !send_text(&mut socket, ack).await {
                return;
            }

            let topics = request["args"].as_array().cloned().unwrap_or_default();
            for topic in topics.iter().filter_map(Value::as_str) {
                let parts: Vec<&str> = topic.split('.').collect();
                let [_, interval, _] = parts[..] else { continue };
                let step = interval_ms(interval);
                let start = BASE_OPEN_TIME + SEEDED * step;
                let message = json!({
                    "topic": topic,
                    "data": [{
                        "start": start,
                        "end": start + step - 1,
                        "interval": interval,
                        "open": "998",
                        "close": STREAMED_CLOSE.to_string(),
                        "high": "1000",
                        "low": "997",
                        "volume": "3.5",
                        "turnover": "3500",
                        "confirm": false,
                        "timestamp": start + 1_000
                    }],
                    "ts": start + 1_000,
                    "type": "snapshot"
                });
                if !send_text(&mut socket, message).await {
                    return;
                }
            }
        }
    })
}

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Starts a fake Binance futures API and returns a client pointed at it.
pub async fn fake_binance(oi_history: bool) -> BinanceFutures {
    let app = Router::new()
        .route("/fapi/v1/klines", get(binance_klines))
        .route("/fapi/v1/openInterest", get(binance_open_interest))
        .route("/futures/data/openInterestHist", get(binance_open_interest_hist))
        .route("/fapi/v1/premiumIndex", get(binance_premium_index))
        .route("/stream", get(binance_stream))
        .with_state(Options { oi_history });

    let addr = serve(app).await;
    BinanceFutures::with_endpoints(
        "fake-binance",
        &format!("http://{addr}"),
        &format!("ws://{addr}"),
        Duration::from_secs(5),
    )
    .unwrap()
}

/// Starts a fake Bybit v5 API and returns a client pointed at it.
pub async fn fake_bybit() -> Bybit {
    let app = Router::new()
        .route("/v5/market/kline", get(bybit_klines))
        .route("/v5/market/open-interest", get(bybit_open_interest))
        .route("/v5/market/tickers", get(bybit_tickers))
        .route("/v5/public/linear", get(bybit_stream));

    let addr = serve(app).await;
    Bybit::with_endpoints(
        &format!("http://{addr}"),
        &format!("ws://{addr}/v5/public/linear"),
        Duration::from_secs(5),
    )
    .unwrap()
}
