//! `POST /api/v1/send` handler: the HTTP submission API's only route.
//!
//! Builds a [`Context`] out of the JSON request body and hands it to the
//! same [`SubmissionService`] the SMTP server uses, so both intakes share
//! one admission path.

use std::sync::Arc;

use ahash::AHashMap;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use empath_common::{
    address::{Address, AddressList},
    context::Context,
    envelope::Envelope,
};
use empath_submission::{Source, SubmissionError, SubmissionService};
use serde::{Deserialize, Serialize};

use crate::ApiConfig;

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub from: String,
    pub to: Vec<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub headers: AHashMap<String, String>,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub variables: AHashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub id: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: message.into() })).into_response()
}

pub struct ApiState {
    pub config: ApiConfig,
    pub submission: Arc<SubmissionService>,
}

/// Checks `Authorization: Bearer <key>` against the configured key set.
///
/// Returns the presented key on success so the caller can thread it through
/// to the submission path for the `apikey:` rate-limit axis.
fn authenticate<'a>(config: &ApiConfig, headers: &'a HeaderMap) -> Result<&'a str, Response> {
    let Some(value) = headers.get(axum::http::header::AUTHORIZATION) else {
        return Err(error_response(StatusCode::UNAUTHORIZED, "missing Authorization header"));
    };

    let Ok(value) = value.to_str() else {
        return Err(error_response(StatusCode::UNAUTHORIZED, "malformed Authorization header"));
    };

    let Some(key) = value.strip_prefix("Bearer ") else {
        return Err(error_response(StatusCode::UNAUTHORIZED, "expected a Bearer token"));
    };

    if config.api_keys.contains(key) {
        Ok(key)
    } else {
        Err(error_response(StatusCode::UNAUTHORIZED, "invalid API key"))
    }
}

fn build_message(req: &SendRequest) -> Result<Vec<u8>, String> {
    let content = match (&req.html, &req.body, &req.template_id) {
        (Some(html), _, _) => (html.clone(), true),
        (None, Some(body), _) => (body.clone(), false),
        (None, None, Some(_)) => {
            return Err("template rendering is not supported by this intake".to_string());
        }
        (None, None, None) => return Err("one of `body`, `html`, or `template_id` is required".to_string()),
    };
    let (content, is_html) = content;

    let mut raw = String::new();
    raw.push_str(&format!("From: {}\r\n", req.from));
    raw.push_str(&format!("To: {}\r\n", req.to.join(", ")));
    if let Some(subject) = &req.subject {
        raw.push_str(&format!("Subject: {subject}\r\n"));
    }
    for (name, value) in &req.headers {
        raw.push_str(&format!("{name}: {value}\r\n"));
    }
    raw.push_str(if is_html {
        "Content-Type: text/html; charset=utf-8\r\n"
    } else {
        "Content-Type: text/plain; charset=utf-8\r\n"
    });
    raw.push_str("\r\n");
    raw.push_str(&content);

    Ok(raw.into_bytes())
}

fn parse_address_list(addrs: &[String]) -> Result<AddressList, String> {
    addrs
        .iter()
        .map(|a| {
            mailparse::addrparse(a)
                .map_err(|e| format!("invalid address {a:?}: {e}"))
                .map(|mut list| Address(list.remove(0)))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(AddressList::from)
}

#[allow(clippy::unused_async)]
pub async fn send(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(req): Json<SendRequest>,
) -> Response {
    let api_key = match authenticate(&state.config, &headers) {
        Ok(key) => key.to_string(),
        Err(response) => return response,
    };

    if req.to.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "`to` must contain at least one recipient");
    }

    let sender = match mailparse::addrparse(&req.from) {
        Ok(mut list) if !list.is_empty() => Address(list.remove(0)),
        _ => return error_response(StatusCode::BAD_REQUEST, "invalid `from` address"),
    };

    let recipients = match parse_address_list(&req.to) {
        Ok(list) => list,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };

    let data = match build_message(&req) {
        Ok(data) => data,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };

    let mut envelope = Envelope::default();
    *envelope.sender_mut() = Some(sender);
    *envelope.recipients_mut() = Some(recipients);

    let context = Context {
        envelope,
        data: Some(std::sync::Arc::from(data)),
        ..Default::default()
    };

    match state
        .submission
        .submit(context, None, Some(&api_key), Source::Http)
        .await
    {
        Ok(outcome) => (
            StatusCode::ACCEPTED,
            Json(SendResponse { id: outcome.id().to_string() }),
        )
            .into_response(),
        Err(SubmissionError::InvalidEnvelope(reason)) => {
            error_response(StatusCode::BAD_REQUEST, reason)
        }
        Err(SubmissionError::RateLimited { retry_after, .. }) => {
            let mut response = error_response(StatusCode::TOO_MANY_REQUESTS, "rate limited");
            if let Ok(value) = axum::http::HeaderValue::from_str(&retry_after.as_secs().to_string()) {
                response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
            }
            response
        }
        Err(SubmissionError::Storage(e)) => {
            tracing::error!("submission API storage error: {e}");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "storage unavailable")
        }
    }
}
