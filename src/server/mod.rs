//! Webhook HTTP endpoint
//!
//! `POST /webhook` verifies the delivery signature, answers URL validation
//! challenges, and runs every other event through the correlation engine
//! before acknowledging. Once the signature checks out the sender always
//! gets a 200, whatever happened downstream.

pub mod signature;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time;
use tracing::Instrument;

use crate::api::{CaseApiResolver, CaseClient, TimestampZone};
use crate::config::Config;
use crate::correlation::{CallCorrelator, CorrelatorSettings, MemoryStore};
use crate::events::{self, NormalizeError, NormalizedEvent};
use signature::WebhookSigner;

const TIMESTAMP_HEADER: &str = "x-zm-request-timestamp";
const SIGNATURE_HEADER: &str = "x-zm-signature";

pub struct AppState {
    pub correlator: Arc<CallCorrelator>,
    pub signer: WebhookSigner,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhook", post(handle_webhook))
        .route("/ping", get(ping))
        .with_state(state)
}

async fn ping() -> &'static str {
    "API is running"
}

pub async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Ok(body_str) = std::str::from_utf8(&body) else {
        tracing::warn!("Webhook body is not valid UTF-8");
        return (StatusCode::BAD_REQUEST, "Bad request!").into_response();
    };

    let timestamp = header_str(&headers, TIMESTAMP_HEADER);
    let signature = header_str(&headers, SIGNATURE_HEADER);
    if !state.signer.verify(timestamp, body_str, signature) {
        tracing::warn!("Rejected webhook with invalid signature");
        return (StatusCode::UNAUTHORIZED, "Unauthorized!").into_response();
    }

    let event = match events::normalize(&body) {
        Ok(event) => event,
        Err(NormalizeError::Unrecognized(name)) => {
            tracing::debug!("Ignoring unhandled event {}", name);
            return StatusCode::OK.into_response();
        }
        Err(e) => {
            tracing::warn!("Ignoring webhook: {}", e);
            return StatusCode::OK.into_response();
        }
    };

    if let NormalizedEvent::UrlValidation { plain_token } = &event {
        tracing::info!("Answering endpoint URL validation");
        return Json(json!({
            "plainToken": plain_token,
            "encryptedToken": state.signer.sign(plain_token),
        }))
        .into_response();
    }

    let span = tracing::info_span!(
        "webhook",
        delivery = %uuid::Uuid::new_v4(),
        event = %event.kind(),
        key = event.correlation_key().unwrap_or("-"),
    );

    async {
        tracing::info!("Event received");
        state.correlator.handle(event).await;
    }
    .instrument(span)
    .await;

    StatusCode::OK.into_response()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("")
}

/// Periodically forget calls that never received their recording.
pub fn spawn_stale_sweep(correlator: Arc<CallCorrelator>, ttl: Duration) -> tokio::task::JoinHandle<()> {
    let period = (ttl / 4).clamp(Duration::from_secs(60), Duration::from_secs(3600));

    tokio::spawn(async move {
        let mut ticker = time::interval(period);
        ticker.tick().await; // skip first immediate tick

        loop {
            ticker.tick().await;
            let evicted = correlator.sweep_stale(ttl);
            if evicted > 0 {
                tracing::info!(
                    "Evicted {} stale call records, {} still tracked",
                    evicted,
                    correlator.tracked_calls()
                );
            }
        }
    })
}

/// Build the engine from configuration and serve until Ctrl+C.
pub async fn run(config: Config) -> Result<()> {
    config.validate()?;

    let token = config.case_api.auth_token.clone().unwrap_or_default();
    let secret = config.webhook.secret_token.clone().unwrap_or_default();

    let client = Arc::new(
        CaseClient::new(&config.case_api.base_url, &token, config.request_timeout())
            .context("Failed to build case API client")?,
    );
    let resolver = Arc::new(CaseApiResolver::new(client.clone()));
    let store = Arc::new(MemoryStore::new());

    let settings = CorrelatorSettings {
        case_party: config.correlation.case_party,
        public_base_url: config.public_base_url.clone(),
        timestamps: TimestampZone::from_offset_minutes(config.timestamp_utc_offset_minutes),
    };
    tracing::info!(
        "Resolving cases by {} number, relaying to {}",
        settings.case_party,
        config.case_api.base_url
    );

    let correlator = Arc::new(CallCorrelator::new(client, resolver, store, settings));

    match config.stale_call_ttl() {
        Some(ttl) => {
            tracing::info!("Evicting call records older than {}s", ttl.as_secs());
            spawn_stale_sweep(correlator.clone(), ttl);
        }
        None => {
            tracing::info!("Stale call sweep disabled, records are kept until their recording arrives");
        }
    }

    let state = Arc::new(AppState {
        correlator,
        signer: WebhookSigner::new(&secret),
    });

    let address = config.address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;

    println!("Server listening on {}", address);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            println!("Shutting down...");
        })
        .await
        .context("Server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::util::ServiceExt;

    use crate::api::Resource;
    use crate::correlation::{CallRecordPatch, CorrelationStore};
    use crate::models::RecordId;
    use crate::testing::{FakeCaseApi, FakeResolver};

    const SECRET: &str = "webhook-secret";

    fn app() -> (Router, Arc<FakeCaseApi>) {
        let api = Arc::new(FakeCaseApi::new());
        let correlator = Arc::new(CallCorrelator::new(
            api.clone(),
            Arc::new(FakeResolver::new()),
            Arc::new(MemoryStore::new()),
            CorrelatorSettings::default(),
        ));
        let state = Arc::new(AppState {
            correlator,
            signer: WebhookSigner::new(SECRET),
        });
        (router(state), api)
    }

    fn signed_request(body: &str) -> Request<Body> {
        let ts = "1700000000";
        let sig = WebhookSigner::new(SECRET).expected_signature(ts, body);
        Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json")
            .header(TIMESTAMP_HEADER, ts)
            .header(SIGNATURE_HEADER, sig)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_bytes(response: Response) -> Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_ping() {
        let (app, _) = app();
        let request = Request::builder().uri("/ping").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(&body_bytes(response).await[..], b"API is running");
    }

    #[tokio::test]
    async fn test_invalid_signature_is_rejected() {
        let (app, api) = app();
        let request = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header(TIMESTAMP_HEADER, "1700000000")
            .header(SIGNATURE_HEADER, "v0=deadbeef")
            .body(Body::from(r#"{"event":"phone.caller_ringing","payload":{}}"#))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(&body_bytes(response).await[..], b"Unauthorized!");
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_url_validation_challenge() {
        let (app, api) = app();
        let body = r#"{"event":"endpoint.url_validation","payload":{"plainToken":"qgg8vlvZRS6UYooatFL8Aw"}}"#;

        let response = app.oneshot(signed_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(json["plainToken"], "qgg8vlvZRS6UYooatFL8Aw");
        assert_eq!(
            json["encryptedToken"],
            WebhookSigner::new(SECRET).sign("qgg8vlvZRS6UYooatFL8Aw")
        );
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_ringing_is_relayed() {
        let (app, api) = app();
        let body = json!({
            "event": "phone.caller_ringing",
            "payload": { "object": {
                "call_id": "7301",
                "caller": { "phone_number": "+14155550100" },
                "callee": { "phone_number": "+14155550199" }
            }}
        })
        .to_string();

        let response = app.oneshot(signed_request(&body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let created = api.creates(Resource::TelephonyEvent);
        assert_eq!(created.len(), 1);
        assert_eq!(created[0]["from_number"], "4155550100");
    }

    #[tokio::test]
    async fn test_unrecognized_and_malformed_are_acknowledged() {
        let (app, api) = app();

        let response = app
            .clone()
            .oneshot(signed_request(
                r#"{"event":"phone.callee_answered","payload":{}}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(signed_request("not json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_downstream_failure_still_acknowledged() {
        let (app, api) = app();
        api.fail_creates(Resource::PhoneLog);
        let body = json!({
            "event": "phone.callee_missed",
            "payload": { "object": { "call_id": "7302" } }
        })
        .to_string();

        let response = app.oneshot(signed_request(&body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(api.creates(Resource::PhoneLog).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_sweep_evicts_old_calls() {
        let store = Arc::new(MemoryStore::new());
        let correlator = Arc::new(CallCorrelator::new(
            Arc::new(FakeCaseApi::new()),
            Arc::new(FakeResolver::new()),
            store.clone(),
            CorrelatorSettings::default(),
        ));
        store.merge("old", CallRecordPatch::phone_log(RecordId::new("1")));

        // two hour TTL, swept every 30 minutes
        let sweeper = spawn_stale_sweep(correlator.clone(), Duration::from_secs(2 * 3600));

        time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(correlator.tracked_calls(), 1);
        store.merge("young", CallRecordPatch::phone_log(RecordId::new("2")));

        time::sleep(Duration::from_secs(3600 + 60)).await;
        assert!(store.get("old").is_none());
        assert!(store.get("young").is_some());
        assert_eq!(correlator.tracked_calls(), 1);

        sweeper.abort();
    }
}
