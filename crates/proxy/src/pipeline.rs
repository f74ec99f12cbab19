//! The request pipeline: the single fixed sequence of checks and transforms spec
//! §4.6 describes, composing every other module in this crate. Mirrors the
//! teacher's shape (one `proxy_internal`-style async function built from small,
//! independently-testable policy checks, wrapped by an outer function that
//! guarantees exactly one log line and never lets a panic cross the task boundary)
//! while replacing the mesh-specific content with this proxy's 17 steps.

use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::extract::{ConnectInfo, State};
use axum::response::{IntoResponse, Response};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};

use crate::config::Config;
use crate::error::PipelineError;
use crate::lockout::{self, KvStore};
use crate::log::{RequestLog, TerminalReason};
use crate::metrics::Metrics;
use crate::ratelimit::RateLimiter;
use crate::sniff;
use crate::upstream::{self, UpstreamClient, UpstreamResponse};
use crate::{classify, cookie_rewrite, formdata};

/// Everything a request handler needs, shared across the process. Cheaply cloned
/// (every field is an `Arc` or `Copy`); the only mutable state reachable from a
/// request is the `KvStore` and the `RateLimiter`, both accessed through their own
/// internal synchronization — never a global mutable singleton.
#[derive(Clone)]
pub struct AppState {
	pub config: Arc<Config>,
	pub kv: Arc<dyn KvStore>,
	pub rate_limiter: Option<Arc<dyn RateLimiter>>,
	pub upstream: UpstreamClient,
	pub metrics: Arc<Metrics>,
}

/// Body buffering (spec §5: "Body buffering for auth requests suspends until the
/// incoming stream is fully consumed") applies to every request, not only auth
/// ones, since the pipeline is linear and the body must be fully read before it can
/// be forwarded. This bounds how much of it we'll hold in memory at once.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

fn client_ip(headers: &HeaderMap, connect_info: Option<std::net::SocketAddr>) -> String {
	if let Some(v) = headers
		.get("cf-connecting-ip")
		.and_then(|v| v.to_str().ok())
	{
		return v.to_string();
	}
	if let Some(v) = headers
		.get("x-forwarded-for")
		.and_then(|v| v.to_str().ok())
	{
		if let Some(first) = v.split(',').next() {
			return first.trim().to_string();
		}
	}
	connect_info
		.map(|a| a.ip().to_string())
		.unwrap_or_else(|| "unknown".to_string())
}

fn now_ms() -> i64 {
	chrono::Utc::now().timestamp_millis()
}

fn cors_headers(origin: &str) -> Vec<(HeaderName, HeaderValue)> {
	let mut out = vec![(
		HeaderName::from_static("access-control-allow-credentials"),
		HeaderValue::from_static("true"),
	)];
	if let Ok(value) = HeaderValue::from_str(origin) {
		out.push((HeaderName::from_static("access-control-allow-origin"), value));
	}
	out
}

fn apply_cors(resp: &mut Response, origin: Option<&str>) {
	if let Some(origin) = origin {
		for (name, value) in cors_headers(origin) {
			resp.headers_mut().insert(name, value);
		}
	}
}

fn preflight_response(origin: Option<&str>) -> Response {
	let mut resp = StatusCode::NO_CONTENT.into_response();
	let headers = resp.headers_mut();
	headers.insert(
		HeaderName::from_static("access-control-allow-methods"),
		HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
	);
	headers.insert(
		HeaderName::from_static("access-control-allow-headers"),
		HeaderValue::from_static("Content-Type, Accept"),
	);
	headers.insert(
		HeaderName::from_static("access-control-max-age"),
		HeaderValue::from_static("86400"),
	);
	apply_cors(&mut resp, origin);
	resp
}

fn no_cache_headers(resp: &mut Response) {
	let headers = resp.headers_mut();
	headers.remove(http::header::ETAG);
	headers.remove(http::header::LAST_MODIFIED);
	headers.insert(
		http::header::CACHE_CONTROL,
		HeaderValue::from_static("no-store, no-cache, must-revalidate, max-age=0"),
	);
	headers.insert(http::header::PRAGMA, HeaderValue::from_static("no-cache"));
	headers.insert(http::header::EXPIRES, HeaderValue::from_static("0"));
}

/// Entry point wired into the axum router's fallback. Guarantees a `RequestLog` is
/// emitted exactly once, regardless of which step terminates the request, and never
/// propagates a panic out to the listener task (axum already isolates a per-request
/// panic into a 500, but every branch here returns a `Response` rather than
/// unwinding).
pub async fn handle(
	State(state): State<AppState>,
	ConnectInfo(peer): ConnectInfo<std::net::SocketAddr>,
	req: axum::extract::Request,
) -> Response {
	let method = req.method().clone();
	let path = req.uri().path().to_string();
	let raw_path_and_search = req
		.uri()
		.path_and_query()
		.map(|pq| pq.as_str().to_string())
		.unwrap_or_else(|| path.clone());
	let headers = req.headers().clone();
	let origin = headers
		.get(http::header::ORIGIN)
		.and_then(|v| v.to_str().ok())
		.map(str::to_string);
	let ip = client_ip(&headers, Some(peer));

	let mut log = RequestLog::new(&method, &path, &ip);

	let resp = run_pipeline(
		&state,
		method,
		path,
		raw_path_and_search,
		headers,
		origin.as_deref(),
		&ip,
		req.into_body(),
		&mut log,
	)
	.await;

	log.set_status(resp.status().as_u16());
	state
		.metrics
		.record_outcome(&resp.status().as_u16().to_string());
	resp
}

#[allow(clippy::too_many_arguments)]
async fn run_pipeline(
	state: &AppState,
	method: Method,
	path: String,
	raw_path_and_search: String,
	headers: HeaderMap,
	origin: Option<&str>,
	ip: &str,
	body: Body,
	log: &mut RequestLog,
) -> Response {
	// 1. robots.txt precedes the kill switch so crawler directives are honored
	// even during an outage.
	if path == "/robots.txt" {
		return (
			StatusCode::OK,
			[(http::header::CONTENT_TYPE, "text/plain")],
			"User-agent: *\nDisallow: /\n",
		)
			.into_response();
	}

	// 2. Kill switch.
	if state.config.kill_switch {
		log.set_terminal_reason(TerminalReason::KillSwitch);
		return PipelineError::KillSwitch.into_response();
	}

	// 3. Health check (origin-gated diagnostic).
	if path == "/health" {
		return health_response(state, origin).await;
	}

	if path == "/metrics" {
		return (StatusCode::OK, state.metrics.render()).into_response();
	}

	// 4. Origin gate.
	if !classify::is_allowed_origin(origin, &state.config.allowed_origins) {
		log.set_terminal_reason(TerminalReason::OriginDenied);
		let mut resp = PipelineError::OriginNotAllowed {
			origin_present: origin.is_some(),
		}
		.into_response();
		apply_cors(&mut resp, origin);
		return resp;
	}

	// 5. Rate limit gate.
	if let Some(limiter) = &state.rate_limiter {
		if !limiter.check(ip).await {
			log.set_terminal_reason(TerminalReason::RateLimited);
			state.metrics.rate_limit_rejections.inc();
			let mut resp = PipelineError::RateLimited.into_response();
			apply_cors(&mut resp, origin);
			return resp;
		}
	}

	// 6. CORS preflight.
	if method == Method::OPTIONS {
		return preflight_response(origin);
	}

	// 7. iCal requests.
	if let Some(code) = classify::extract_ical_code(&path) {
		return handle_ical(state, &method, code, origin).await;
	}

	// 8. Path safety + allow-list.
	match classify::is_path_safe(&path) {
		Ok(true) => {},
		Ok(false) | Err(_) => {
			log.set_terminal_reason(TerminalReason::PathDenied);
			let mut resp = PipelineError::UnsafePath.into_response();
			apply_cors(&mut resp, origin);
			return resp;
		},
	}
	if !classify::is_allowed_path(&path) {
		log.set_terminal_reason(TerminalReason::PathDenied);
		let mut resp = PipelineError::PathNotAllowed.into_response();
		apply_cors(&mut resp, origin);
		return resp;
	}

	// 9. Auth-lockout gate.
	let is_auth = lockout::is_auth_request(&path, &method);
	if is_auth {
		let state_record = lockout::get_auth_lockout_state(state.kv.as_ref(), ip).await;
		let status = lockout::check_lockout_status(state_record.as_ref(), now_ms());
		if status.locked {
			log.set_terminal_reason(TerminalReason::LockedOut);
			let mut resp = PipelineError::LockedOut(status).into_response();
			apply_cors(&mut resp, origin);
			return resp;
		}
	}

	// 10. Body preparation (auth endpoint only).
	let body_bytes = match to_bytes(body, MAX_BODY_BYTES).await {
		Ok(b) => b,
		Err(_) => return StatusCode::PAYLOAD_TOO_LARGE.into_response(),
	};
	// The transform is only meaningful on a buffered form body; a GET auth
	// resubmission naturally has none and falls through to the `is_empty` branch.
	let forward_body = if body_bytes.is_empty() {
		None
	} else if is_auth {
		match std::str::from_utf8(&body_bytes) {
			Ok(text) => Some(bytes::Bytes::from(formdata::transform_auth_form_data(text))),
			Err(_) => Some(body_bytes.clone()),
		}
	} else {
		Some(body_bytes.clone())
	};

	// 11. URL rebuild.
	let forward_path = upstream::rebuild_forward_path(&raw_path_and_search);
	let upstream_url = upstream::build_upstream_url(&state.config.target_host, &forward_path);

	// 12. Header preparation.
	let upstream_headers =
		upstream::prepare_upstream_headers(&headers, &state.config.target_authority());

	// 13-14. Forward upstream; measure latency.
	let fetch_start = std::time::Instant::now();
	let upstream_resp = match state
		.upstream
		.forward(method, &upstream_url, upstream_headers, forward_body)
		.await
	{
		Ok(resp) => resp,
		Err(err) => {
			let mut resp = PipelineError::UpstreamUnavailable(err).into_response();
			apply_cors(&mut resp, origin);
			return resp;
		},
	};
	let latency_ms = fetch_start.elapsed().as_millis();
	state
		.metrics
		.upstream_latency_seconds
		.observe(fetch_start.elapsed().as_secs_f64());

	// 15. Response rewrite + 16. lockout bookkeeping.
	let resp = rewrite_response(&upstream_resp, origin, latency_ms);

	if is_auth {
		if sniff::is_successful_login_response(&upstream_resp) {
			lockout::clear_auth_lockout(state.kv.as_ref(), ip).await;
		} else if sniff::is_failed_login_response(&upstream_resp, upstream_resp.body_text()) {
			state.metrics.lockouts_active.inc();
			lockout::record_failed_attempt(state.kv.as_ref(), ip, now_ms()).await;
		}
	}

	resp
}

async fn handle_ical(
	state: &AppState,
	method: &Method,
	code: &str,
	origin: Option<&str>,
) -> Response {
	if *method != Method::GET && *method != Method::HEAD {
		let mut resp = PipelineError::MethodNotAllowed.into_response();
		apply_cors(&mut resp, origin);
		return resp;
	}
	if !classify::is_valid_ical_code(code) {
		let mut resp = PipelineError::PathNotAllowed.into_response();
		apply_cors(&mut resp, origin);
		return resp;
	}

	let forward_path = format!("/indoor/iCal/referee/{code}");
	let upstream_url = upstream::build_upstream_url(&state.config.target_host, &forward_path);
	let upstream_headers = HeaderMap::new();

	let upstream_resp = match state
		.upstream
		.forward(method.clone(), &upstream_url, upstream_headers, None)
		.await
	{
		Ok(resp) => resp,
		Err(err) => {
			let mut resp = PipelineError::UpstreamUnavailable(err).into_response();
			apply_cors(&mut resp, origin);
			return resp;
		},
	};

	// iCal responses retain the upstream's own caching (static content).
	let mut resp = Response::builder()
		.status(upstream_resp.status)
		.body(Body::from(upstream_resp.body.clone()))
		.unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response());
	*resp.headers_mut() = upstream_resp.headers.clone();
	apply_cors(&mut resp, origin);
	resp
}

fn rewrite_response(upstream_resp: &UpstreamResponse, origin: Option<&str>, latency_ms: u128) -> Response {
	let mut resp = Response::builder()
		.status(StatusCode::from_u16(upstream_resp.status).unwrap_or(StatusCode::BAD_GATEWAY))
		.body(Body::from(upstream_resp.body.clone()))
		.unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response());

	let headers = resp.headers_mut();
	for (name, value) in upstream_resp.headers.iter() {
		if name != http::header::SET_COOKIE {
			headers.insert(name.clone(), value.clone());
		}
	}
	for cookie in upstream_resp.set_cookies() {
		let rewritten = cookie_rewrite::rewrite_cookie(cookie);
		if let Ok(value) = HeaderValue::from_str(&rewritten) {
			headers.append(http::header::SET_COOKIE, value);
		}
	}

	if sniff::is_dynamic_content(upstream_resp.content_type()) {
		no_cache_headers(&mut resp);
	}

	if sniff::detect_session_issue(upstream_resp, upstream_resp.body_text()) {
		resp.headers_mut().insert(
			HeaderName::from_static("x-proxy-session-warning"),
			HeaderValue::from_static("potential-session-issue"),
		);
	}

	let timestamp = chrono::Utc::now().to_rfc3339();
	if let Ok(value) = HeaderValue::from_str(&format!("{timestamp}; latency={latency_ms}ms")) {
		resp.headers_mut()
			.insert(HeaderName::from_static("x-proxy-timestamp"), value);
	}

	apply_cors(&mut resp, origin);
	resp
}

async fn health_response(state: &AppState, origin: Option<&str>) -> Response {
	if !classify::is_allowed_origin(origin, &state.config.allowed_origins) {
		let mut resp = PipelineError::OriginNotAllowed {
			origin_present: origin.is_some(),
		}
		.into_response();
		apply_cors(&mut resp, origin);
		return resp;
	}

	let lockout_store_ok = lockout::kv::probe(state.kv.as_ref()).await;
	let rate_limiter_status = if state.rate_limiter.is_some() {
		"ok"
	} else {
		"disabled"
	};
	let overall_ok = !state.config.kill_switch && lockout_store_ok;

	let body = serde_json::json!({
		"status": if overall_ok { "healthy" } else { "degraded" },
		"services": {
			"proxy": "ok",
			"lockout_store": if lockout_store_ok { "ok" } else { "degraded" },
			"rate_limiter": rate_limiter_status,
		}
	});

	let status = if overall_ok {
		StatusCode::OK
	} else {
		StatusCode::SERVICE_UNAVAILABLE
	};
	let mut resp = (status, axum::Json(body)).into_response();
	apply_cors(&mut resp, origin);
	resp
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn cors_headers_include_credentials_and_echoed_origin() {
		let headers = cors_headers("https://app.example");
		assert!(headers.iter().any(|(n, _)| n.as_str() == "access-control-allow-credentials"));
		assert!(headers.iter().any(|(n, v)| n.as_str() == "access-control-allow-origin"
			&& v.to_str().unwrap() == "https://app.example"));
	}

	#[test]
	fn no_cache_headers_strip_etag_and_last_modified() {
		let mut resp = Response::new(Body::empty());
		resp.headers_mut().insert(http::header::ETAG, HeaderValue::from_static("\"x\""));
		resp.headers_mut().insert(
			http::header::CACHE_CONTROL,
			HeaderValue::from_static("max-age=3600"),
		);
		no_cache_headers(&mut resp);
		assert!(resp.headers().get(http::header::ETAG).is_none());
		assert_eq!(
			resp.headers().get(http::header::CACHE_CONTROL).unwrap(),
			"no-store, no-cache, must-revalidate, max-age=0"
		);
	}
}
