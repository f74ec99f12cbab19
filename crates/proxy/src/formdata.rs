//! Login form reshaping: the client submits a plain `username`/`password` pair, the
//! upstream expects them nested under its own form namespace.

/// The upstream's nested field name for the username, in its literal bracketed form.
const NESTED_USERNAME_RAW: &str = "loginform[username]";
/// The same field name as it appears percent-encoded in a `application/x-www-form-urlencoded` body.
const NESTED_USERNAME_ENCODED: &str = "loginform%5Busername%5D";
const NESTED_PASSWORD_RAW: &str = "loginform[password]";

/// True if `body` already carries the nested form (in either encoding), or carries a
/// plain `username`+`password` pair.
pub fn has_auth_credentials(body: &str) -> bool {
	if body.contains(NESTED_USERNAME_RAW) || body.contains(NESTED_USERNAME_ENCODED) {
		return true;
	}
	let pairs = parse_form(body);
	pairs.iter().any(|(k, _)| k == "username") && pairs.iter().any(|(k, _)| k == "password")
}

fn parse_form(body: &str) -> Vec<(String, String)> {
	serde_urlencoded::from_str::<Vec<(String, String)>>(body).unwrap_or_default()
}

/// Reshapes a plain `username`/`password` body into the upstream's nested field
/// layout, preserving every other key/value untouched. A no-op (returns the input
/// unchanged) when the body already carries the nested form.
pub fn transform_auth_form_data(body: &str) -> String {
	if body.contains(NESTED_USERNAME_RAW) || body.contains(NESTED_USERNAME_ENCODED) {
		return body.to_string();
	}

	let pairs = parse_form(body);
	let mut out: Vec<(String, String)> = Vec::with_capacity(pairs.len());
	for (k, v) in pairs {
		match k.as_str() {
			"username" => out.push((NESTED_USERNAME_RAW.to_string(), v)),
			"password" => out.push((NESTED_PASSWORD_RAW.to_string(), v)),
			other => out.push((other.to_string(), v)),
		}
	}
	serde_urlencoded::to_string(&out).unwrap_or_else(|_| body.to_string())
}
