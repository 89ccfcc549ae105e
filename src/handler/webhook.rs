use crate::app::AppState;
use crate::call::controller::CallProgress;
use crate::call::directive::DirectiveCompiler;
use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ivr/answer", get(answer_query).post(answer))
        .route("/ivr/input", post(input))
        .route("/ivr/event", post(event))
        .route("/ivr/recording", post(recording))
        .route("/health", get(health))
}

/// Fields the carrier may send on any IVR webhook.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRequest {
    pub from: Option<String>,
    pub to: Option<String>,
    #[serde(alias = "uuid")]
    pub external_call_id: Option<String>,
    pub dtmf: Option<Dtmf>,
    pub status: Option<String>,
    #[serde(alias = "recording_url")]
    pub recording_url: Option<String>,
}

/// Either a bare digit string or the carrier's `{digits, timed_out}` object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Dtmf {
    Digits(String),
    Detailed {
        digits: Option<String>,
        #[serde(default)]
        timed_out: bool,
    },
}

impl Dtmf {
    /// `None` when the caller pressed nothing.
    pub fn digits(&self) -> Option<&str> {
        let digits = match self {
            Dtmf::Digits(digits) => Some(digits.as_str()),
            Dtmf::Detailed {
                timed_out: true, ..
            } => None,
            Dtmf::Detailed { digits, .. } => digits.as_deref(),
        };
        digits.map(str::trim).filter(|d| !d.is_empty())
    }
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("malformed request body: {0}")]
    MalformedBody(#[from] serde_json::Error),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        warn!("rejecting webhook: {}", self);
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub async fn answer(State(state): State<AppState>, body: Bytes) -> Response {
    let request = if body.is_empty() {
        WebhookRequest::default()
    } else {
        serde_json::from_slice(&body).unwrap_or_else(|e| {
            warn!("unreadable answer webhook: {}", e);
            WebhookRequest::default()
        })
    };
    answer_call(state, request).await
}

pub async fn answer_query(
    State(state): State<AppState>,
    query: Result<Query<WebhookRequest>, QueryRejection>,
) -> Response {
    let request = match query {
        Ok(Query(request)) => request,
        Err(e) => {
            warn!("unreadable answer webhook: {}", e);
            WebhookRequest::default()
        }
    };
    answer_call(state, request).await
}

async fn answer_call(state: AppState, request: WebhookRequest) -> Response {
    let call_id =
        present(request.external_call_id).unwrap_or_else(|| Uuid::new_v4().to_string());
    let (Some(from), Some(to)) = (present(request.from), present(request.to)) else {
        warn!(call_id = %call_id, "answer webhook without from/to");
        return Json(DirectiveCompiler::fallback()).into_response();
    };
    info!(call_id = %call_id, from = %from, to = %to, "inbound call");
    let directives = state
        .controller
        .handle_call_started(&from, &to, &call_id)
        .await;
    Json(directives).into_response()
}

pub async fn input(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, WebhookError> {
    let request: WebhookRequest = serde_json::from_slice(&body)?;
    let from = present(request.from).ok_or(WebhookError::MissingField("from"))?;
    let to = present(request.to).unwrap_or_default();
    let call_id = present(request.external_call_id).unwrap_or_else(|| {
        warn!(from = %from, "input webhook without call id");
        Uuid::new_v4().to_string()
    });
    let digit = request.dtmf.as_ref().and_then(Dtmf::digits);
    debug!(call_id = %call_id, digit, "input webhook");

    let directives = state
        .controller
        .handle_digit_collected(&from, &to, digit, &call_id)
        .await;
    Ok(Json(directives).into_response())
}

pub async fn event(State(state): State<AppState>, body: Bytes) -> StatusCode {
    let Some((call_id, request)) = progress_request(&body) else {
        return StatusCode::NO_CONTENT;
    };
    let status = request.status.unwrap_or_default();
    match CallProgress::parse(&status, request.recording_url) {
        Some(progress) => state.controller.handle_call_progress(&call_id, progress).await,
        None => debug!(call_id = %call_id, status = %status, "ignoring call status"),
    }
    StatusCode::NO_CONTENT
}

pub async fn recording(State(state): State<AppState>, body: Bytes) -> StatusCode {
    let Some((call_id, request)) = progress_request(&body) else {
        return StatusCode::NO_CONTENT;
    };
    let progress = CallProgress::RecordingFinished {
        recording_url: present(request.recording_url),
    };
    state.controller.handle_call_progress(&call_id, progress).await;
    StatusCode::NO_CONTENT
}

fn progress_request(body: &[u8]) -> Option<(String, WebhookRequest)> {
    let mut request: WebhookRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(e) => {
            warn!("unreadable event webhook: {}", e);
            return None;
        }
    };
    match present(request.external_call_id.take()) {
        Some(call_id) => Some((call_id, request)),
        None => {
            warn!("event webhook without call id");
            None
        }
    }
}

pub async fn health() -> Response {
    let version = crate::version::get_version_info();
    Json(serde_json::json!({
        "status": "ok",
        "version": crate::version::get_short_version(),
        "buildTime": version.build_time,
    }))
    .into_response()
}
