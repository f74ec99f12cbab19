//! Taxonomy of terminal outcomes the pipeline can produce on its own (as opposed to
//! forwarding whatever the upstream returned). Mirrors the teacher's `ProxyError`:
//! one enum, one `into_response`, no variant that can leak an internal error message
//! to the client.

use axum::Json;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::lockout::LockoutStatus;

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
	#[error("origin not allowed")]
	OriginNotAllowed { origin_present: bool },

	#[error("path not permitted")]
	PathNotAllowed,

	#[error("unsafe path")]
	UnsafePath,

	#[error("method not allowed for this resource")]
	MethodNotAllowed,

	#[error("rate limited")]
	RateLimited,

	#[error("locked out")]
	LockedOut(LockoutStatus),

	#[error("kill switch engaged")]
	KillSwitch,

	#[error("upstream request failed")]
	UpstreamUnavailable(#[source] anyhow::Error),
}

impl IntoResponse for PipelineError {
	fn into_response(self) -> Response {
		match self {
			PipelineError::OriginNotAllowed { .. } => (
				StatusCode::FORBIDDEN,
				"Forbidden: Origin not allowed",
			)
				.into_response(),
			PipelineError::PathNotAllowed | PipelineError::UnsafePath => {
				(StatusCode::FORBIDDEN, "Forbidden: path not allowed").into_response()
			},
			PipelineError::MethodNotAllowed => {
				(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed").into_response()
			},
			PipelineError::RateLimited => {
				(StatusCode::TOO_MANY_REQUESTS, "Too many requests").into_response()
			},
			PipelineError::LockedOut(status) => {
				let body = Json(json!({
					"error": "account temporarily locked",
					"lockedUntil": status.locked_until,
					"remainingSeconds": status.remaining_seconds,
				}));
				let mut resp = (StatusCode::LOCKED, body).into_response();
				if let Ok(value) = HeaderValue::from_str(&status.remaining_seconds.to_string()) {
					resp
						.headers_mut()
						.insert(HeaderName::from_static("retry-after"), value);
				}
				resp
			},
			PipelineError::KillSwitch => {
				let mut resp = StatusCode::SERVICE_UNAVAILABLE.into_response();
				resp.headers_mut().insert(
					HeaderName::from_static("retry-after"),
					HeaderValue::from_static("86400"),
				);
				resp
			},
			PipelineError::UpstreamUnavailable(err) => {
				tracing::warn!(error = %err, "upstream request failed");
				(StatusCode::BAD_GATEWAY, "Bad Gateway").into_response()
			},
		}
	}
}
