//! Mock HTTP server for integration tests.
//!
//! Serves the message API (`/cgi-bin/gettoken`, `/cgi-bin/message/send`),
//! webhook endpoints (`/webhook/{key}`) and the chart endpoint
//! (`/v8/finance/chart/{symbol}`), recording every request it receives.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// A request body received by the mock.
#[derive(Debug, Clone)]
pub struct Received {
    pub path: String,
    pub access_token: Option<String>,
    pub body: Value,
}

#[derive(Default)]
struct MockState {
    token_calls: u32,
    token_lifetime: i64,
    failing_corps: HashSet<String>,
    stale_tokens: HashSet<String>,
    failing_hooks: HashSet<String>,
    charts: HashMap<String, Value>,
    received: Vec<Received>,
}

type Shared = Arc<Mutex<MockState>>;

/// In-process HTTP server bound to an ephemeral port.
pub struct MockHttpServer {
    addr: SocketAddr,
    state: Shared,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockHttpServer {
    /// Start a new mock server on an available port.
    pub async fn start() -> Self {
        let state: Shared = Arc::new(Mutex::new(MockState {
            token_lifetime: 7200,
            ..MockState::default()
        }));

        let app = Router::new()
            .route("/cgi-bin/gettoken", get(get_token))
            .route("/cgi-bin/message/send", post(send_message))
            .route("/webhook/{key}", post(post_webhook))
            .route("/v8/finance/chart/{symbol}", get(get_chart))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn webhook_url(&self, key: &str) -> String {
        format!("{}/webhook/{key}", self.base_url())
    }

    pub fn token_calls(&self) -> u32 {
        self.state.lock().token_calls
    }

    pub fn set_token_lifetime(&self, secs: i64) {
        self.state.lock().token_lifetime = secs;
    }

    /// Answer token requests for this corp id with errcode 40013.
    pub fn fail_corp(&self, corp_id: &str) {
        self.state.lock().failing_corps.insert(corp_id.to_string());
    }

    /// Answer sends carrying this token with errcode 42001.
    pub fn expire_token(&self, token: &str) {
        self.state.lock().stale_tokens.insert(token.to_string());
    }

    /// Answer posts to this webhook key with errcode 93000.
    pub fn fail_hook(&self, key: &str) {
        self.state.lock().failing_hooks.insert(key.to_string());
    }

    /// Serve a chart for `symbol` with the given closes.
    pub fn set_chart(&self, symbol: &str, closes: &[f64], live_price: Option<f64>) {
        let volumes: Vec<u64> = closes.iter().map(|_| 1_000).collect();
        let body = json!({
            "chart": {
                "result": [{
                    "meta": { "regularMarketPrice": live_price },
                    "indicators": { "quote": [{ "close": closes, "volume": volumes }] }
                }],
                "error": null
            }
        });
        self.state.lock().charts.insert(symbol.to_string(), body);
    }

    pub fn received(&self) -> Vec<Received> {
        self.state.lock().received.clone()
    }

    pub fn received_on(&self, prefix: &str) -> Vec<Received> {
        self.received()
            .into_iter()
            .filter(|r| r.path.starts_with(prefix))
            .collect()
    }

    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[derive(Deserialize)]
struct TokenQuery {
    corpid: String,
    #[allow(dead_code)]
    corpsecret: String,
}

async fn get_token(State(state): State<Shared>, Query(q): Query<TokenQuery>) -> Json<Value> {
    let mut state = state.lock();
    state.token_calls += 1;
    if state.failing_corps.contains(&q.corpid) {
        return Json(json!({ "errcode": 40013, "errmsg": "invalid corpid" }));
    }
    Json(json!({
        "errcode": 0,
        "errmsg": "ok",
        "access_token": format!("token-{}", state.token_calls),
        "expires_in": state.token_lifetime,
    }))
}

#[derive(Deserialize)]
struct SendQuery {
    access_token: String,
}

async fn send_message(
    State(state): State<Shared>,
    Query(q): Query<SendQuery>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let mut state = state.lock();
    if state.stale_tokens.contains(&q.access_token) {
        return Json(json!({ "errcode": 42001, "errmsg": "access_token expired" }));
    }
    state.received.push(Received {
        path: "/cgi-bin/message/send".to_string(),
        access_token: Some(q.access_token),
        body,
    });
    Json(json!({ "errcode": 0, "errmsg": "ok" }))
}

async fn post_webhook(
    State(state): State<Shared>,
    Path(key): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let mut state = state.lock();
    if state.failing_hooks.contains(&key) {
        return Json(json!({ "errcode": 93000, "errmsg": "invalid webhook url" }));
    }
    state.received.push(Received {
        path: format!("/webhook/{key}"),
        access_token: None,
        body,
    });
    Json(json!({ "errcode": 0, "errmsg": "ok" }))
}

async fn get_chart(State(state): State<Shared>, Path(symbol): Path<String>) -> Response {
    match state.lock().charts.get(&symbol) {
        Some(body) => Json(body.clone()).into_response(),
        None => (StatusCode::NOT_FOUND, "no such symbol").into_response(),
    }
}
