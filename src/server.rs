//! ==============================================================================
//! server.rs - dashboard web server
//! ==============================================================================
//!
//! routes:
//!     GET  /              -> dashboard page (embedded html)
//!     GET  /api/latest    -> newest reading, or {"error":"no_data"}
//!     GET  /api/history   -> last N readings for the chart
//!     POST /api/command   -> write OPEN/CLOSE/AUTO to the control field
//!     GET  /api/command   -> command currently stored in the control field
//!
//! every api request makes exactly one call through ThingSpeakClient. the
//! handlers share nothing mutable, so requests run fully in parallel.
//!
//! ==============================================================================

use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::State,
    response::{Html, Json},
    routing::get,
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::config::GatewayConfig;
use crate::domain::{Command, CommandOutcome, CommandState, HistoryPoint, LatestResponse};
use crate::error::GatewayError;
use crate::thingspeak::ThingSpeakClient;

const DASHBOARD_HTML: &str = include_str!("dashboard.html");

/// read-only state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub client: ThingSpeakClient,
}

impl AppState {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let client = ThingSpeakClient::new(config.thingspeak.clone())?;
        Ok(Self {
            config: Arc::new(config),
            client,
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(dashboard_handler))
        .route("/api/latest", get(latest_handler))
        .route("/api/history", get(history_handler))
        .route("/api/command", get(command_state_handler).post(command_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_server(state: AppState) -> Result<()> {
    let bind = state.config.server.bind.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("dashboard live at http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

// ==============================================================================
// handlers
// ==============================================================================

async fn dashboard_handler() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

async fn latest_handler(State(state): State<AppState>) -> Result<Json<LatestResponse>, GatewayError> {
    let ts = state.client.settings();
    let feeds = state.client.fetch_feeds(1, ts.latest_timeout()).await?;

    let zone = &state.config.display.timezone;
    let response = match feeds.first() {
        Some(entry) => LatestResponse::Reading(entry.to_latest(zone)),
        None => LatestResponse::no_data(),
    };
    Ok(Json(response))
}

async fn history_handler(State(state): State<AppState>) -> Result<Json<Vec<HistoryPoint>>, GatewayError> {
    let ts = state.client.settings();
    let feeds = state
        .client
        .fetch_feeds(ts.history_results, ts.history_timeout())
        .await?;

    let zone = &state.config.display.timezone;
    Ok(Json(feeds.iter().map(|f| f.to_history_point(zone)).collect()))
}

/// body: {"cmd": "open"}; validated before anything is sent upstream
async fn command_handler(State(state): State<AppState>, body: Bytes) -> Result<Json<CommandOutcome>, GatewayError> {
    let cmd = Command::from_body(&body).ok_or(GatewayError::BadCommand)?;
    info!(cmd = cmd.as_str(), "dispatching command");

    let outcome = state.client.write_command(cmd).await?;
    Ok(Json(outcome))
}

async fn command_state_handler(State(state): State<AppState>) -> Result<Json<CommandState>, GatewayError> {
    Ok(Json(state.client.read_command().await?))
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::coerce::DisplayZone;

    use axum::{
        body::Body,
        extract::Query,
        http::{Request, StatusCode},
    };
    use chrono_tz::Tz;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tower::ServiceExt;

    type Params = Query<HashMap<String, String>>;

    /// stand-in for the remote service; records every query it receives
    #[derive(Clone, Default)]
    struct FakeRemote {
        calls: Arc<AtomicUsize>,
        queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
    }

    impl FakeRemote {
        fn record(&self, params: HashMap<String, String>) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.queries.lock().unwrap().push(params);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn last_query(&self) -> HashMap<String, String> {
            self.queries.lock().unwrap().last().cloned().unwrap_or_default()
        }

        /// serve `feeds.json` with a fixed body
        fn feeds(&self, status: StatusCode, body: String) -> Router {
            let me = self.clone();
            Router::new().route(
                "/channels/:id/feeds.json",
                get(move |Query(p): Params| async move {
                    me.record(p);
                    (status, body)
                }),
            )
        }

        /// serve `update` with a fixed body
        fn update(&self, status: StatusCode, body: &'static str) -> Router {
            let me = self.clone();
            Router::new().route(
                "/update",
                get(move |Query(p): Params| async move {
                    me.record(p);
                    (status, body)
                }),
            )
        }
    }

    async fn spawn_remote(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn gateway(base_url: &str) -> Router {
        let mut config = GatewayConfig::default();
        config.thingspeak.base_url = base_url.to_string();
        config.thingspeak.channel_id = "3199845".to_string();
        config.thingspeak.read_api_key = "READKEY".to_string();
        config.thingspeak.write_api_key = "WRITEKEY".to_string();
        config.thingspeak.latest_timeout_secs = 1;
        config.thingspeak.history_timeout_secs = 1;
        config.thingspeak.command_timeout_secs = 1;
        config.display.timezone = DisplayZone::Named(Tz::UTC);
        router(AppState::new(config).unwrap())
    }

    async fn call(app: &Router, method: &str, uri: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn entry(i: usize) -> Value {
        json!({
            "created_at": format!("2025-12-11T05:{:02}:00Z", i),
            "entry_id": i,
            "field1": format!("{}.5", 20 + i),
            "field2": "55",
            "field3": format!("{}", 100 + i),
        })
    }

    // --------------------------------------------------------------------------
    // latest
    // --------------------------------------------------------------------------

    #[tokio::test]
    async fn test_latest_no_data() {
        let remote = FakeRemote::default();
        let base = spawn_remote(remote.feeds(StatusCode::OK, r#"{"channel":{},"feeds":[]}"#.into())).await;
        let app = gateway(&base);

        let (status, body) = call(&app, "GET", "/api/latest", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "error": "no_data" }));
    }

    #[tokio::test]
    async fn test_latest_reading() {
        let remote = FakeRemote::default();
        let feed = json!({ "feeds": [{
            "field1": "23.5", "field2": "60", "field3": "512",
            "created_at": "2025-12-11T05:42:33Z"
        }]});
        let base = spawn_remote(remote.feeds(StatusCode::OK, feed.to_string())).await;
        let app = gateway(&base);

        let (status, body) = call(&app, "GET", "/api/latest", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({ "temperature": "23.5", "humidity": "60", "ldr": "512", "time": "2025-12-11 05:42:33" })
        );

        let query = remote.last_query();
        assert_eq!(query.get("results").map(String::as_str), Some("1"));
        assert_eq!(query.get("api_key").map(String::as_str), Some("READKEY"));
    }

    #[tokio::test]
    async fn test_latest_malformed_json() {
        let remote = FakeRemote::default();
        let base = spawn_remote(remote.feeds(StatusCode::OK, "-1".into())).await;
        let app = gateway(&base);

        let (status, body) = call(&app, "GET", "/api/latest", "").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "upstream_malformed");
    }

    #[tokio::test]
    async fn test_latest_upstream_status() {
        let remote = FakeRemote::default();
        let base = spawn_remote(remote.feeds(StatusCode::INTERNAL_SERVER_ERROR, "oops".into())).await;
        let app = gateway(&base);

        let (status, body) = call(&app, "GET", "/api/latest", "").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "upstream_status");
        assert_eq!(body["status"], 500);
    }

    // --------------------------------------------------------------------------
    // history
    // --------------------------------------------------------------------------

    #[tokio::test]
    async fn test_history_keeps_order_and_length() {
        let remote = FakeRemote::default();
        let feeds: Vec<Value> = (0..60).map(entry).collect();
        let base = spawn_remote(remote.feeds(StatusCode::OK, json!({ "feeds": feeds }).to_string())).await;
        let app = gateway(&base);

        let (status, body) = call(&app, "GET", "/api/history", "").await;
        assert_eq!(status, StatusCode::OK);

        let points = body.as_array().unwrap();
        assert_eq!(points.len(), 60);
        for (i, point) in points.iter().enumerate() {
            assert_eq!(point["t"], format!("2025-12-11 05:{:02}:00", i));
            assert_eq!(point["temp"], json!(20.5 + i as f64));
            assert_eq!(point["hum"], json!(55.0));
            assert_eq!(point["ldr"], json!(100 + i));
        }
        assert_eq!(remote.last_query().get("results").map(String::as_str), Some("60"));
    }

    #[tokio::test]
    async fn test_history_bad_field_is_null() {
        let remote = FakeRemote::default();
        let feed = json!({ "feeds": [
            { "created_at": "2025-12-11T05:42:33Z", "field1": "abc", "field2": "61.0", "field3": "512.0" },
            { "created_at": "not a time", "field1": "22", "field2": null, "field3": "dark" }
        ]});
        let base = spawn_remote(remote.feeds(StatusCode::OK, feed.to_string())).await;
        let app = gateway(&base);

        let (status, body) = call(&app, "GET", "/api/history", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!([
                { "t": "2025-12-11 05:42:33", "temp": null, "hum": 61.0, "ldr": 512 },
                { "t": "not a time", "temp": 22.0, "hum": null, "ldr": null }
            ])
        );
    }

    #[tokio::test]
    async fn test_history_timeout_then_recovers() {
        let slow_calls = Arc::new(AtomicUsize::new(0));
        let counter = slow_calls.clone();
        let app_remote = Router::new().route(
            "/channels/:id/feeds.json",
            get(move || {
                let counter = counter.clone();
                async move {
                    // first call hangs past the 1s timeout, later calls answer
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        tokio::time::sleep(Duration::from_secs(3)).await;
                    }
                    r#"{"feeds":[]}"#
                }
            }),
        );
        let base = spawn_remote(app_remote).await;
        let app = gateway(&base);

        let (status, body) = call(&app, "GET", "/api/history", "").await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["error"], "upstream_timeout");

        let (status, body) = call(&app, "GET", "/api/history", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
        assert_eq!(slow_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unreachable_remote() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let app = gateway(&format!("http://{}", addr));

        let (status, body) = call(&app, "GET", "/api/history", "").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "upstream_unreachable");

        let (status, _) = call(&app, "POST", "/api/command", r#"{"cmd":"open"}"#).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    // --------------------------------------------------------------------------
    // commands
    // --------------------------------------------------------------------------

    #[tokio::test]
    async fn test_command_normalized_and_accepted() {
        let remote = FakeRemote::default();
        let base = spawn_remote(remote.update(StatusCode::OK, "5")).await;
        let app = gateway(&base);

        for (input, sent) in [("open", "OPEN"), ("CLOSE", "CLOSE"), (" Auto ", "AUTO")] {
            let body = json!({ "cmd": input }).to_string();
            let (status, out) = call(&app, "POST", "/api/command", &body).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(out, json!({ "ok": true, "entry_id": "5" }));

            let query = remote.last_query();
            assert_eq!(query.get("field4").map(String::as_str), Some(sent));
            assert_eq!(query.get("api_key").map(String::as_str), Some("WRITEKEY"));
        }
        assert_eq!(remote.calls(), 3);
    }

    #[tokio::test]
    async fn test_command_rejected_by_remote() {
        let remote = FakeRemote::default();
        let base = spawn_remote(remote.update(StatusCode::OK, "0")).await;
        let app = gateway(&base);

        let (status, out) = call(&app, "POST", "/api/command", r#"{"cmd":"close"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(out, json!({ "ok": false, "entry_id": "0" }));
    }

    #[tokio::test]
    async fn test_command_non_200_keeps_body() {
        let remote = FakeRemote::default();
        let base = spawn_remote(remote.update(StatusCode::BAD_REQUEST, "12")).await;
        let app = gateway(&base);

        let (status, out) = call(&app, "POST", "/api/command", r#"{"cmd":"auto"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(out, json!({ "ok": false, "entry_id": "12" }));
    }

    #[tokio::test]
    async fn test_bad_command_never_reaches_remote() {
        let remote = FakeRemote::default();
        let base = spawn_remote(remote.update(StatusCode::OK, "5")).await;
        let app = gateway(&base);

        for body in [r#"{"cmd":""}"#, r#"{"cmd":"TOGGLE"}"#, r#"{"cmd":null}"#, r#"{}"#, "not json", ""] {
            let (status, out) = call(&app, "POST", "/api/command", body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body {:?}", body);
            assert_eq!(out, json!({ "ok": false, "error": "bad_cmd" }));
        }
        assert_eq!(remote.calls(), 0);
    }

    #[tokio::test]
    async fn test_command_state() {
        let remote = FakeRemote::default();
        let me = remote.clone();
        let base = spawn_remote(Router::new().route(
            "/channels/:id/fields/4/last.txt",
            get(move |Query(p): Params| async move {
                me.record(p);
                "CLOSE"
            }),
        ))
        .await;
        let app = gateway(&base);

        let (status, out) = call(&app, "GET", "/api/command", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(out, json!({ "cmd": "CLOSE", "raw": "CLOSE" }));
        assert_eq!(remote.last_query().get("api_key").map(String::as_str), Some("READKEY"));
    }

    #[tokio::test]
    async fn test_dashboard_page() {
        let app = gateway("http://127.0.0.1:9");
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(html.contains("/api/latest"));
        assert!(html.contains("/api/command"));
    }
}
