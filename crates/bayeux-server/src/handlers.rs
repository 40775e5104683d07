//! HTTP handlers for the Bayeux server.
//!
//! Clients POST a JSON message or array of messages to the Bayeux endpoint.
//! The response body is the array of replies, held open for
//! `/meta/connect` until events arrive or the poll times out.

use crate::config::Config;
use crate::metrics;
use anyhow::Result;
use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bayeux_core::channel::{self, meta};
use bayeux_core::{Engine, Message, ProtocolError};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Shared server state.
pub struct AppState {
    /// The protocol engine.
    pub engine: Engine,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            engine: Engine::with_config(config.engine.engine_config()),
            config,
        }
    }
}

/// Run the HTTP server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = Router::new()
        .route(&config.path, post(bayeux_handler))
        .route("/health", get(health_handler))
        .with_state(Arc::clone(&state));

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Bayeux server listening on {}", addr);
    info!("Bayeux endpoint: http://{}{}", addr, config.path);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    Ok(())
}

/// Wait for Ctrl-C, then release every held poll.
async fn shutdown_signal(state: Arc<AppState>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutting down");
    state.engine.destroy();
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.engine.stats();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "clients": stats.client_count,
        "patterns": stats.pattern_count,
        "subscriptions": stats.subscription_count,
    }))
}

/// Bayeux endpoint handler.
async fn bayeux_handler(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> Response {
    let start = Instant::now();

    let response = Json(process_body(&state.engine, body).await).into_response();

    metrics::set_engine_stats(state.engine.stats());
    metrics::record_latency(start.elapsed().as_secs_f64());
    response
}

/// Decode a request body, run it through the engine and record outcomes.
///
/// Replies to undecodable elements come first, followed by the engine's.
async fn process_body(engine: &Engine, body: Value) -> Vec<Message> {
    let (messages, mut responses) = decode_messages(body);
    debug!(
        messages = messages.len(),
        rejected = responses.len(),
        "Processing request"
    );

    for message in &messages {
        metrics::record_message(channel_kind(&message.channel));
    }

    responses.extend(engine.process(messages).await);

    for response in &responses {
        if let Some(code) = response.error.as_deref().and_then(|e| e.split(':').next()) {
            metrics::record_error(code);
        } else if response.channel == meta::HANDSHAKE && response.is_successful() {
            metrics::record_handshake();
        }
    }
    responses
}

/// Accept either a single message or an array of messages.
///
/// Each element is decoded on its own. Returns the decoded messages and a
/// `bad_request` reply for every element that failed.
fn decode_messages(body: Value) -> (Vec<Message>, Vec<Message>) {
    let elements = match body {
        Value::Array(items) => items,
        other => vec![other],
    };

    let mut messages = Vec::with_capacity(elements.len());
    let mut rejected = Vec::new();
    for element in elements {
        let channel = element
            .get("channel")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let id = element.get("id").filter(|id| !id.is_null()).cloned();

        match serde_json::from_value(element) {
            Ok(message) => messages.push(message),
            Err(e) => {
                debug!(channel = %channel, error = %e, "Rejecting malformed message");
                let mut reply = Message::new(channel.clone());
                reply.id = id;
                reply.settle(Some(ProtocolError::BadRequest(channel)));
                rejected.push(reply);
            }
        }
    }
    (messages, rejected)
}

fn channel_kind(name: &str) -> &'static str {
    if channel::is_meta(name) {
        "meta"
    } else if channel::is_service(name) {
        "service"
    } else {
        "publish"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state() -> AppState {
        let mut config = Config::default();
        config.engine.timeout_ms = 1_000;
        AppState::new(config)
    }

    #[test]
    fn test_decode_single_and_batch() {
        let (single, rejected) = decode_messages(json!({"channel": "/meta/handshake"}));
        assert_eq!(single.len(), 1);
        assert!(rejected.is_empty());

        let (batch, rejected) = decode_messages(json!([
            {"channel": "/meta/connect"},
            {"channel": "/foo", "data": {"text": "hi"}}
        ]));
        assert_eq!(batch.len(), 2);
        assert!(rejected.is_empty());
        assert_eq!(batch[1].data, Some(json!({"text": "hi"})));
    }

    #[test]
    fn test_decode_rejects_malformed_elements() {
        let (messages, rejected) = decode_messages(json!([
            {"channel": "/meta/handshake", "version": 1, "id": "h1"},
            {"channel": "/foo", "data": 1},
            {"data": 2},
            "nope"
        ]));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].channel, "/foo");

        assert_eq!(rejected.len(), 3);
        assert_eq!(rejected[0].channel, "/meta/handshake");
        assert_eq!(rejected[0].id, Some(json!("h1")));
        assert_eq!(rejected[0].successful, Some(false));
        assert_eq!(
            rejected[0].error.as_deref(),
            Some("303:/meta/handshake:Bad request")
        );
        assert_eq!(rejected[1].error.as_deref(), Some("303::Bad request"));
        assert_eq!(rejected[2].channel, "");
    }

    #[test]
    fn test_channel_kind() {
        assert_eq!(channel_kind("/meta/connect"), "meta");
        assert_eq!(channel_kind("/service/echo"), "service");
        assert_eq!(channel_kind("/chat/room"), "publish");
    }

    #[tokio::test(start_paused = true)]
    async fn test_process_body_round_trip() {
        let state = state();

        let responses = process_body(
            &state.engine,
            json!({
                "channel": "/meta/handshake",
                "version": "1.0",
                "supportedConnectionTypes": ["long-polling"]
            }),
        )
        .await;
        let client_id = responses[0].client_id.clone().unwrap();

        let responses = process_body(
            &state.engine,
            json!([
                {"channel": "/meta/subscribe", "clientId": client_id, "subscription": "/chat/*"},
                {"channel": "/chat/lobby", "clientId": client_id, "data": "hello"},
                {"channel": "/meta/connect", "clientId": client_id, "connectionType": "long-polling"}
            ]),
        )
        .await;

        let encoded = serde_json::to_value(&responses).unwrap();
        assert_eq!(encoded[0]["channel"], "/meta/subscribe");
        assert_eq!(encoded[0]["successful"], true);
        assert_eq!(encoded[1]["channel"], "/chat/lobby");
        assert_eq!(encoded[2]["channel"], "/meta/connect");
        assert_eq!(encoded[3]["data"], "hello");
        assert_eq!(state.engine.stats().subscription_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_process_body_skips_malformed_element() {
        let state = state();

        let responses = process_body(
            &state.engine,
            json!([
                {"channel": "/meta/handshake", "version": 1, "supportedConnectionTypes": ["long-polling"]},
                {"channel": "/meta/handshake", "version": "1.0", "supportedConnectionTypes": ["long-polling"]}
            ]),
        )
        .await;

        assert_eq!(responses.len(), 2);
        assert_eq!(
            responses[0].error.as_deref(),
            Some("303:/meta/handshake:Bad request")
        );
        assert!(responses[1].is_successful());
        assert!(responses[1].client_id.is_some());
        assert_eq!(state.engine.client_ids().len(), 1);
    }
}
