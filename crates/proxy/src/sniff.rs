//! Response sniffers: dynamic-vs-static content, session anomalies, and login
//! success/failure detection. Per DESIGN NOTES §9 these operate against a small
//! capability trait rather than a concrete response type, so they are testable
//! against plain fixtures and reusable against both `reqwest::Response` and
//! integration-test doubles.

/// The upstream's session cookie name; its presence on a `Set-Cookie` implies a
/// successful authentication.
const SESSION_COOKIE_NAME: &str = "neos_session";

/// Capability a sniffable response must expose: a numeric status and case-insensitive
/// header lookup. Implemented for the real upstream response and for test fixtures.
pub trait SniffableResponse {
	fn status(&self) -> u16;
	/// Returns the first value of `name` (case-insensitive), if present.
	fn header(&self, name: &str) -> Option<&str>;
	/// All `Set-Cookie` header values, in order.
	fn set_cookies(&self) -> Vec<&str>;
}

/// True when `content_type` is absent, or matches a content type this proxy treats as
/// dynamic (`text/html`, `application/json`, `application/x-www-form-urlencoded`).
/// Everything else — `text/calendar`, `image/*`, `application/pdf`, stylesheets,
/// scripts — is static.
pub fn is_dynamic_content(content_type: Option<&str>) -> bool {
	let Some(ct) = content_type else {
		return true;
	};
	let lower = ct.to_ascii_lowercase();
	lower.starts_with("text/html")
		|| lower.starts_with("application/json")
		|| lower.starts_with("application/x-www-form-urlencoded")
}

fn location_points_at_login(location: &str) -> bool {
	let lower = location.to_ascii_lowercase();
	lower.contains("/login") || lower.ends_with('/') || lower.contains("authentication")
}

fn body_looks_like_login_form(body: &str) -> bool {
	body.contains("name=\"username\"") && body.contains("name=\"password\"") && body.to_ascii_lowercase().contains("login")
}

/// True when the response shows any sign of a session problem: a redirect back to
/// the login/authentication surface, a bare-root redirect, a 401/403, or a login form
/// echoed back in the body.
pub fn detect_session_issue(resp: &impl SniffableResponse, body: Option<&str>) -> bool {
	let status = resp.status();
	if (300..400).contains(&status) {
		if let Some(loc) = resp.header("location") {
			if location_points_at_login(loc) {
				return true;
			}
		}
	}
	if status == 401 || status == 403 {
		return true;
	}
	if let Some(body) = body {
		if body_looks_like_login_form(body) {
			return true;
		}
	}
	false
}

/// Fragments the upstream renders in/near the username or password field to signal
/// rejected credentials (its CSS error-state classes/colors).
const ERROR_INDICATORS: &[&str] = &["is-invalid", "alert-danger", "color: red", "color:#ff0000", "color: #ff0000"];

/// `detect_session_issue`, plus a trigger on the upstream's visible
/// rejected-credentials error markers.
pub fn is_failed_login_response(resp: &impl SniffableResponse, body: Option<&str>) -> bool {
	if detect_session_issue(resp, body) {
		return true;
	}
	if let Some(body) = body {
		if body_looks_like_login_form(body) && ERROR_INDICATORS.iter().any(|m| body.contains(m)) {
			return true;
		}
	}
	false
}

/// (a) any `Set-Cookie` carrying the session cookie name; (b) a 3xx redirect whose
/// `Location` is neither the login/authentication endpoint nor a bare host root; or
/// (c) a 200 carrying the session cookie.
pub fn is_successful_login_response(resp: &impl SniffableResponse) -> bool {
	let has_session_cookie = resp
		.set_cookies()
		.iter()
		.any(|c| c.to_ascii_lowercase().contains(SESSION_COOKIE_NAME));
	if has_session_cookie {
		return true;
	}
	let status = resp.status();
	if (300..400).contains(&status) {
		if let Some(loc) = resp.header("location") {
			if !location_points_at_login(loc) {
				return true;
			}
		}
	}
	false
}

#[cfg(test)]
mod tests {
	use super::*;

	struct Fixture {
		status: u16,
		headers: Vec<(&'static str, &'static str)>,
		set_cookies: Vec<&'static str>,
	}

	impl SniffableResponse for Fixture {
		fn status(&self) -> u16 {
			self.status
		}
		fn header(&self, name: &str) -> Option<&str> {
			self.headers
				.iter()
				.find(|(k, _)| k.eq_ignore_ascii_case(name))
				.map(|(_, v)| *v)
		}
		fn set_cookies(&self) -> Vec<&str> {
			self.set_cookies.clone()
		}
	}

	#[test]
	fn dynamic_content_classification() {
		assert!(is_dynamic_content(None));
		assert!(is_dynamic_content(Some("text/html; charset=utf-8")));
		assert!(is_dynamic_content(Some("APPLICATION/JSON")));
		assert!(!is_dynamic_content(Some("text/calendar")));
		assert!(!is_dynamic_content(Some("image/png")));
		assert!(!is_dynamic_content(Some("application/pdf")));
	}

	#[test]
	fn session_issue_on_redirect_to_login_or_4xx() {
		let f = Fixture {
			status: 302,
			headers: vec![("Location", "/login")],
			set_cookies: vec![],
		};
		assert!(detect_session_issue(&f, None));

		let f = Fixture {
			status: 401,
			headers: vec![],
			set_cookies: vec![],
		};
		assert!(detect_session_issue(&f, None));

		let f = Fixture {
			status: 200,
			headers: vec![],
			set_cookies: vec![],
		};
		assert!(!detect_session_issue(&f, None));
	}

	#[test]
	fn failed_login_on_error_markers() {
		let f = Fixture {
			status: 200,
			headers: vec![],
			set_cookies: vec![],
		};
		let body = "<form>login <input name=\"username\"><input name=\"password\" class=\"is-invalid\"></form>";
		assert!(is_failed_login_response(&f, Some(body)));
	}

	#[test]
	fn successful_login_on_session_cookie_or_non_login_redirect() {
		let f = Fixture {
			status: 302,
			headers: vec![("Location", "/dashboard")],
			set_cookies: vec!["Neos_Session=abc; Path=/"],
		};
		assert!(is_successful_login_response(&f));

		let f = Fixture {
			status: 302,
			headers: vec![("Location", "/login")],
			set_cookies: vec![],
		};
		assert!(!is_successful_login_response(&f));

		let f = Fixture {
			status: 302,
			headers: vec![("Location", "/sportmanager.volleyball/main/dashboard?__csrftoken=x")],
			set_cookies: vec![],
		};
		assert!(is_successful_login_response(&f));
	}
}
