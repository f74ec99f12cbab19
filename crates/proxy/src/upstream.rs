//! URL rebuilding and the upstream HTTP client. Raw-URL preservation is essential:
//! the upstream's path grammar uses percent-encoded backslashes (`%5c`) as a
//! namespace separator, so the outbound path is built by string-slicing the
//! original request URL, never by round-tripping it through a `Url` parser (which
//! would re-encode `%5c` as `%255c`).

use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue, Method};
use url::Url;

use crate::classify;
use crate::sniff::SniffableResponse;

pub const USER_AGENT: &str = "VolleyKit/1.0 (PWA; https://volleykit.example)";

/// Extracts the path+query portion of a raw request-URL string, without
/// constructing a `Url` (which would normalize percent-escapes). `raw` is the
/// literal string as received, e.g. `/a/b%5cc?x=1`.
pub fn extract_raw_path_and_search(raw: &str) -> &str {
	// Strip an optional scheme://authority prefix if the caller handed us a full URL
	// rather than an origin-relative path; origin-relative is the common case.
	let after_authority = if let Some(idx) = raw.find("://") {
		let rest = &raw[idx + 3..];
		rest.find('/').map(|i| &rest[i..]).unwrap_or("/")
	} else {
		raw
	};
	after_authority
}

/// Builds the upstream-facing path+query for `raw_path_and_search` (as returned by
/// [`extract_raw_path_and_search`]), inserting the literal `/api` segment right
/// after the matched allow-list prefix when [`classify::requires_api_prefix`] says
/// to. `raw_path_and_search` must already have passed the allow-list check.
pub fn rebuild_forward_path(raw_path_and_search: &str) -> String {
	let (path, query) = match raw_path_and_search.split_once('?') {
		Some((p, q)) => (p, Some(q)),
		None => (raw_path_and_search, None),
	};

	let rewritten_path = if classify::requires_api_prefix(path) {
		match classify::matched_prefix(path) {
			Some((prefix, remainder)) => format!("{prefix}/api{remainder}"),
			None => path.to_string(),
		}
	} else {
		path.to_string()
	};

	match query {
		Some(q) => format!("{rewritten_path}?{q}"),
		None => rewritten_path,
	}
}

/// Joins the target host's scheme+authority with an already-rebuilt path+query.
pub fn build_upstream_url(target_host: &Url, forward_path_and_search: &str) -> String {
	format!(
		"{}://{}{}",
		target_host.scheme(),
		target_host.host_str().unwrap_or_default(),
		target_host
			.port()
			.map(|p| format!(":{p}"))
			.unwrap_or_default()
	) + forward_path_and_search
}

/// Clones `incoming`, removes `Host`, sets it to the target authority, and replaces
/// `User-Agent` with the fixed VolleyKit identifier. Every other header (`Cookie`,
/// `Accept`, `Content-Type`, CSRF tokens, ...) passes through verbatim.
pub fn prepare_upstream_headers(incoming: &HeaderMap, target_authority: &str) -> HeaderMap {
	let mut headers = incoming.clone();
	headers.remove(http::header::HOST);
	if let Ok(value) = HeaderValue::from_str(target_authority) {
		headers.insert(http::header::HOST, value);
	}
	headers.insert(
		http::header::USER_AGENT,
		HeaderValue::from_static(USER_AGENT),
	);
	headers
}

/// Minimal wrapper over the buffered upstream response this proxy needs: status,
/// headers, and (for sniffing/transform purposes) the body already read to a
/// string when it was text.
pub struct UpstreamResponse {
	pub status: u16,
	pub headers: HeaderMap,
	pub body: bytes::Bytes,
}

impl SniffableResponse for UpstreamResponse {
	fn status(&self) -> u16 {
		self.status
	}

	fn header(&self, name: &str) -> Option<&str> {
		self
			.headers
			.get(HeaderName::from_bytes(name.as_bytes()).ok()?)
			.and_then(|v| v.to_str().ok())
	}

	fn set_cookies(&self) -> Vec<&str> {
		self
			.headers
			.get_all(http::header::SET_COOKIE)
			.iter()
			.filter_map(|v| v.to_str().ok())
			.collect()
	}
}

impl UpstreamResponse {
	pub fn content_type(&self) -> Option<&str> {
		self.header("content-type")
	}

	pub fn body_text(&self) -> Option<&str> {
		std::str::from_utf8(&self.body).ok()
	}
}

/// Thin wrapper around `reqwest::Client`: credentials-forwarding, manual-redirect
/// posture (redirects are inspected by the pipeline, never followed here).
#[derive(Clone)]
pub struct UpstreamClient {
	client: reqwest::Client,
}

impl UpstreamClient {
	pub fn new() -> anyhow::Result<Self> {
		let client = reqwest::Client::builder()
			.redirect(reqwest::redirect::Policy::none())
			.timeout(Duration::from_secs(30))
			.build()?;
		Ok(UpstreamClient { client })
	}

	pub async fn forward(
		&self,
		method: Method,
		url: &str,
		headers: HeaderMap,
		body: Option<bytes::Bytes>,
	) -> anyhow::Result<UpstreamResponse> {
		let mut req = self.client.request(method, url).headers(headers);
		if let Some(body) = body {
			req = req.body(body);
		}
		let resp = req.send().await?;
		let status = resp.status().as_u16();
		let headers = resp.headers().clone();
		let body = resp.bytes().await?;
		Ok(UpstreamResponse {
			status,
			headers,
			body,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn extract_raw_never_reencodes_backslash_escapes() {
		let raw = "/indoorvolleyball.refadmin/api%5crefereeconvocation/search";
		assert_eq!(extract_raw_path_and_search(raw), raw);
		assert!(!extract_raw_path_and_search(raw).contains("%255c"));
	}

	#[test]
	fn extract_raw_strips_scheme_and_authority() {
		assert_eq!(
			extract_raw_path_and_search("https://edge.example/a/b?x=1"),
			"/a/b?x=1"
		);
	}

	#[test]
	fn rebuild_inserts_api_segment_after_matched_prefix() {
		let raw = "/indoorvolleyball.refadmin/api%5crefereeconvocation/search";
		assert_eq!(
			rebuild_forward_path(raw),
			"/indoorvolleyball.refadmin/api/api%5crefereeconvocation/search"
		);
	}

	#[test]
	fn rebuild_skips_insertion_for_no_api_exception() {
		let raw = "/indoorvolleyball.refadmin/refereestatementofexpenses/downloadrefereestatementofexpenses?refereeConvocation=abc-123";
		assert_eq!(rebuild_forward_path(raw), raw);
	}

	#[test]
	fn header_prep_replaces_host_and_user_agent() {
		let mut incoming = HeaderMap::new();
		incoming.insert(http::header::HOST, HeaderValue::from_static("edge.example"));
		incoming.insert(http::header::USER_AGENT, HeaderValue::from_static("Mozilla/5.0"));
		incoming.insert(http::header::COOKIE, HeaderValue::from_static("sid=abc"));

		let out = prepare_upstream_headers(&incoming, "upstream.example");
		assert_eq!(out.get(http::header::HOST).unwrap(), "upstream.example");
		assert_eq!(out.get(http::header::USER_AGENT).unwrap(), USER_AGENT);
		assert_eq!(out.get(http::header::COOKIE).unwrap(), "sid=abc");
	}
}
