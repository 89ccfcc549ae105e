use crate::app::{AppState, AppStateBuilder};
use crate::call::config_store::MemoryConfigStore;
use crate::call::controller::IvrControllerBuilder;
use crate::call::directive::TECHNICAL_DIFFICULTIES_MESSAGE;
use crate::call::ivr_config::IvrConfig;
use crate::call::session::{CallSessionStore, CallStatus, MemoryCallSessionStore};
use crate::handler::webhook::{self, Dtmf};
use axum::{
    body::{to_bytes, Bytes},
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use std::sync::Arc;

const BUSINESS: &str = "+15553334444";

async fn test_state() -> (AppState, Arc<MemoryCallSessionStore>) {
    let sessions = Arc::new(MemoryCallSessionStore::new());
    let store = MemoryConfigStore::new()
        .with_config(BUSINESS, IvrConfig::default())
        .unwrap();
    // Monday 10:00 in New York
    let now = Utc.with_ymd_and_hms(2024, 1, 15, 15, 0, 0).unwrap();
    let controller = IvrControllerBuilder::new()
        .with_config_store(Arc::new(store))
        .with_session_store(sessions.clone())
        .with_clock(Arc::new(move || now))
        .build()
        .unwrap();
    let state = AppStateBuilder::new()
        .with_controller(controller)
        .build()
        .await
        .unwrap();
    (state, sessions)
}

async fn body_json(response: Response) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn body(value: Value) -> Bytes {
    Bytes::from(serde_json::to_vec(&value).unwrap())
}

#[tokio::test]
async fn test_answer_returns_menu() {
    let (state, sessions) = test_state().await;

    let response = webhook::answer(
        State(state),
        body(json!({"from": "+15551112222", "to": BUSINESS, "uuid": "call-1"})),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let directives = body_json(response).await;
    assert_eq!(directives[0]["kind"], "speak");
    assert_eq!(directives[1]["kind"], "collect_input");
    assert_eq!(directives[1]["maxDigits"], 1);
    assert!(sessions.get("call-1").await.unwrap().is_some());
}

#[tokio::test]
async fn test_answer_without_numbers_returns_fallback() {
    let (state, _) = test_state().await;

    for payload in [Bytes::new(), Bytes::from_static(b"not json"), body(json!({"to": BUSINESS}))] {
        let response = webhook::answer(State(state.clone()), payload).await;
        assert_eq!(response.status(), StatusCode::OK);
        let directives = body_json(response).await;
        assert_eq!(directives.as_array().unwrap().len(), 1);
        assert_eq!(directives[0]["text"], TECHNICAL_DIFFICULTIES_MESSAGE);
    }
}

#[tokio::test]
async fn test_answer_query_assigns_call_id() {
    let (state, sessions) = test_state().await;
    let request = webhook::WebhookRequest {
        from: Some("+15551112222".to_string()),
        to: Some(BUSINESS.to_string()),
        ..Default::default()
    };

    let response = webhook::answer_query(State(state), Ok(Query(request))).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(sessions.len().await, 1);
}

#[tokio::test]
async fn test_input_requires_from() {
    let (state, _) = test_state().await;

    let response = webhook::input(
        State(state.clone()),
        body(json!({"to": BUSINESS, "dtmf": "1", "externalCallId": "call-1"})),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error = body_json(response).await;
    assert!(error["error"].as_str().unwrap().contains("from"));

    let response = webhook::input(State(state), Bytes::from_static(b"{"))
        .await
        .into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_input_routes_digit() {
    let (state, _) = test_state().await;
    webhook::answer(
        State(state.clone()),
        body(json!({"from": "+15551112222", "to": BUSINESS, "externalCallId": "call-1"})),
    )
    .await;

    let response = webhook::input(
        State(state.clone()),
        body(json!({
            "from": "+15551112222",
            "to": BUSINESS,
            "externalCallId": "call-1",
            "dtmf": {"digits": "1", "timed_out": false},
        })),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::OK);
    let directives = body_json(response).await;
    assert_eq!(directives[1]["kind"], "connect");
    assert_eq!(directives[1]["destinationPhone"], "+15550100001");

    let response = webhook::input(
        State(state),
        body(json!({
            "from": "+15551112222",
            "to": BUSINESS,
            "externalCallId": "call-2",
            "dtmf": {"digits": "", "timed_out": true},
        })),
    )
    .await
    .into_response();
    let directives = body_json(response).await;
    assert_eq!(
        directives[0]["text"],
        IvrConfig::default().main_menu.timeout_message
    );
}

#[tokio::test]
async fn test_event_updates_session() {
    let (state, sessions) = test_state().await;
    webhook::answer(
        State(state.clone()),
        body(json!({"from": "+15551112222", "to": BUSINESS, "uuid": "call-1"})),
    )
    .await;

    let status = webhook::event(
        State(state.clone()),
        body(json!({"uuid": "call-1", "status": "completed"})),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(
        sessions.get("call-1").await.unwrap().unwrap().status,
        CallStatus::Completed
    );

    // unknown statuses, missing ids and garbage are all accepted
    for payload in [
        body(json!({"uuid": "call-1", "status": "machine_detected"})),
        body(json!({"status": "completed"})),
        Bytes::from_static(b"garbage"),
    ] {
        let status = webhook::event(State(state.clone()), payload).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }
}

#[tokio::test]
async fn test_recording_stores_url() {
    let (state, sessions) = test_state().await;
    webhook::answer(
        State(state.clone()),
        body(json!({"from": "+15551112222", "to": BUSINESS, "uuid": "call-1"})),
    )
    .await;

    let status = webhook::recording(
        State(state),
        body(json!({"uuid": "call-1", "recording_url": "https://media.example.com/1.mp3"})),
    )
    .await;

    assert_eq!(status, StatusCode::NO_CONTENT);
    let session = sessions.get("call-1").await.unwrap().unwrap();
    assert_eq!(session.status, CallStatus::VoicemailRecorded);
    assert_eq!(
        session.recording_url.as_deref(),
        Some("https://media.example.com/1.mp3")
    );
}

#[tokio::test]
async fn test_health() {
    let response = webhook::health().await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

#[test]
fn test_dtmf_shapes() {
    let digits = |value: Value| serde_json::from_value::<Dtmf>(value).unwrap();
    assert_eq!(digits(json!("3")).digits(), Some("3"));
    assert_eq!(digits(json!(" ")).digits(), None);
    assert_eq!(digits(json!({"digits": "7"})).digits(), Some("7"));
    assert_eq!(
        digits(json!({"digits": "7", "timed_out": true})).digits(),
        None
    );
    assert_eq!(digits(json!({})).digits(), None);
}
