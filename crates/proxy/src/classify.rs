//! Origin, path, and iCal-code classifiers. Every function here is pure and total —
//! no I/O, no clock, no allocation beyond what the return type needs — so they are
//! tested as plain `#[test]`s against table-driven fixtures.

use percent_encoding::percent_decode_str;
use url::Url;

/// Path prefixes that forward verbatim, without an `/api` segment inserted.
const NO_API_PREFIXES: &[&str] = &[
	"/indoorvolleyball.refadmin/refereestatementofexpenses",
	"/indoorvolleyball.refadmin/documents",
	"/indoorvolleyball.refadmin/images",
];

/// Path prefixes whose forwarded path gets `api` inserted right after the prefix.
const WITH_API_PREFIXES: &[&str] = &[
	"/indoorvolleyball.refadmin",
	"/indoorvolleyball.clubadmin",
];

/// Exact-match paths, forwarded as-is.
const EXACT_PATHS: &[&str] = &["/", "/login", "/logout"];

/// Members of [`EXACT_PATHS`] (or paths that would otherwise fall outside the prefix
/// lists) that nonetheless require the `/api` insertion.
const NEED_API_EXCEPTIONS: &[&str] = &["/login", "/logout"];

/// Members of [`WITH_API_PREFIXES`] whose downloads must NOT get the `/api`
/// insertion (binary download endpoints with their own route grammar).
const NO_API_EXCEPTIONS: &[&str] = &[
	"/indoorvolleyball.refadmin/refereestatementofexpenses/downloadrefereestatementofexpenses",
];

/// Splits a comma-separated origin list, trimming whitespace and dropping empties.
pub fn parse_allowed_origins(s: &str) -> Vec<String> {
	s.split(',')
		.map(str::trim)
		.filter(|s| !s.is_empty())
		.map(str::to_string)
		.collect()
}

#[derive(thiserror::Error, Debug)]
pub enum OriginConfigError {
	#[error("allowed origin '{0}' is not a valid absolute URL: {1}")]
	NotAUrl(String, url::ParseError),
	#[error("allowed origin '{0}' must use http or https")]
	BadScheme(String),
	#[error("allowed origin '{0}' must not carry a path, query, or fragment")]
	NotBare(String),
}

/// Validates every entry of an allowed-origin list, called once at start-up.
/// Failure here is fatal to the process.
pub fn validate_allowed_origins(list: &[String]) -> Result<(), OriginConfigError> {
	for entry in list {
		let url = Url::parse(entry).map_err(|e| OriginConfigError::NotAUrl(entry.clone(), e))?;
		if url.scheme() != "http" && url.scheme() != "https" {
			return Err(OriginConfigError::BadScheme(entry.clone()));
		}
		let path_is_bare = url.path() == "/" || url.path().is_empty();
		if !path_is_bare || url.query().is_some() || url.fragment().is_some() {
			return Err(OriginConfigError::NotBare(entry.clone()));
		}
	}
	Ok(())
}

fn normalize_origin(o: &str) -> String {
	o.strip_suffix('/').unwrap_or(o).to_ascii_lowercase()
}

/// True iff `origin` (an `Origin:` header value) is present and matches an entry in
/// `list`, ignoring a single trailing slash and ASCII case.
pub fn is_allowed_origin(origin: Option<&str>, list: &[String]) -> bool {
	let Some(origin) = origin else {
		return false;
	};
	let normalized = normalize_origin(origin);
	list.iter().any(|entry| normalize_origin(entry) == normalized)
}

/// Exact membership, or a prefix match against either prefix list.
pub fn is_allowed_path(pathname: &str) -> bool {
	if EXACT_PATHS.contains(&pathname) {
		return true;
	}
	NO_API_PREFIXES
		.iter()
		.chain(WITH_API_PREFIXES)
		.any(|p| pathname.starts_with(p))
}

/// Whether the forwarded path for `pathname` needs a literal `api` segment inserted
/// right after the matched prefix. Exceptions override the base classification in
/// both directions; see spec §4.1.
pub fn requires_api_prefix(pathname: &str) -> bool {
	if NO_API_EXCEPTIONS.iter().any(|p| pathname.starts_with(p)) {
		return false;
	}
	if NEED_API_EXCEPTIONS.contains(&pathname) {
		return true;
	}
	WITH_API_PREFIXES.iter().any(|p| pathname.starts_with(p))
}

/// Returns the matched allow-list entry and the remainder of `pathname` after it —
/// an exact match if one exists, else the longest matching prefix. Used by the URL
/// rebuilder to find the insertion point for the `/api` segment; callers should only
/// insert when [`requires_api_prefix`] says to.
pub fn matched_prefix(pathname: &str) -> Option<(&'static str, &str)> {
	if let Some(&exact) = EXACT_PATHS.iter().find(|&&p| p == pathname) {
		return Some((exact, ""));
	}
	NO_API_PREFIXES
		.iter()
		.chain(WITH_API_PREFIXES)
		.filter(|&&p| pathname.starts_with(p))
		.max_by_key(|p| p.len())
		.map(|&p| (p, &pathname[p.len()..]))
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("unsafe path")]
pub struct UnsafePathError;

/// True if `pathname` contains a `%` not followed by two hex digits.
/// `percent_decode_str` treats a malformed escape as a literal `%` rather than
/// erroring, the way `decodeURIComponent` does — so this has to be checked
/// separately against the raw string before decoding.
fn has_malformed_percent_escape(pathname: &str) -> bool {
	let bytes = pathname.as_bytes();
	let mut i = 0;
	while i < bytes.len() {
		if bytes[i] == b'%' {
			let valid = bytes
				.get(i + 1)
				.zip(bytes.get(i + 2))
				.is_some_and(|(a, b)| a.is_ascii_hexdigit() && b.is_ascii_hexdigit());
			if !valid {
				return true;
			}
			i += 3;
			continue;
		}
		i += 1;
	}
	false
}

/// Percent-decodes `pathname` once and rejects `..`, `//`, NUL, and invalid
/// percent-escapes. Backslashes are intentionally permitted — the upstream's
/// namespace separator uses them.
pub fn is_path_safe(pathname: &str) -> Result<bool, UnsafePathError> {
	if has_malformed_percent_escape(pathname) {
		return Err(UnsafePathError);
	}
	let decoded = percent_decode_str(pathname)
		.decode_utf8()
		.map_err(|_| UnsafePathError)?;
	if decoded.contains("..") || decoded.contains("//") || decoded.contains('\0') {
		return Ok(false);
	}
	Ok(true)
}

/// Exactly six case-sensitive alphanumeric characters.
pub fn is_valid_ical_code(code: &str) -> bool {
	code.chars().count() == 6 && code.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Returns the trailing segment iff `pathname` is exactly `/iCal/referee/<segment>`.
pub fn extract_ical_code(pathname: &str) -> Option<&str> {
	pathname.strip_prefix("/iCal/referee/").filter(|rest| {
		!rest.is_empty() && !rest.contains('/')
	})
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;

	#[rstest]
	#[case("/", true, false)]
	#[case("/login", true, true)]
	#[case("/logout", true, true)]
	#[case("/indoorvolleyball.refadmin/api%5crefereeconvocation/search", true, true)]
	#[case(
		"/indoorvolleyball.refadmin/refereestatementofexpenses/downloadrefereestatementofexpenses",
		true,
		false
	)]
	#[case("/indoorvolleyball.clubadmin/roster", true, true)]
	#[case("/not-on-the-list", false, false)]
	fn path_allow_list_and_api_prefix_table(
		#[case] path: &str,
		#[case] allowed: bool,
		#[case] needs_api: bool,
	) {
		assert_eq!(is_allowed_path(path), allowed, "allow-list mismatch for {path}");
		if allowed {
			assert_eq!(requires_api_prefix(path), needs_api, "api-prefix mismatch for {path}");
		}
	}

	#[rstest]
	#[case("Ab3dE9", true)]
	#[case("000000", true)]
	#[case("Ab3dE", false)]
	#[case("Ab3dE99", false)]
	#[case("Ab3d-9", false)]
	#[case("Ab3d 9", false)]
	fn ical_code_shape_table(#[case] code: &str, #[case] valid: bool) {
		assert_eq!(is_valid_ical_code(code), valid);
	}

	#[test]
	fn parses_and_trims_origin_list() {
		assert_eq!(
			parse_allowed_origins(" https://a.example , ,https://b.example/"),
			vec!["https://a.example", "https://b.example/"]
		);
	}

	#[test]
	fn validates_scheme_and_bare_path() {
		assert!(validate_allowed_origins(&["https://a.example".into()]).is_ok());
		assert!(validate_allowed_origins(&["ftp://a.example".into()]).is_err());
		assert!(validate_allowed_origins(&["https://a.example/path".into()]).is_err());
		assert!(validate_allowed_origins(&["https://a.example?x=1".into()]).is_err());
	}

	#[test]
	fn origin_match_ignores_trailing_slash_and_case() {
		let list = vec!["https://App.Example".to_string()];
		assert!(is_allowed_origin(Some("https://app.example/"), &list));
		assert!(is_allowed_origin(Some("https://APP.EXAMPLE"), &list));
		assert!(!is_allowed_origin(None, &list));
		assert!(!is_allowed_origin(Some("https://other.example"), &list));
	}

	#[test]
	fn exactly_one_policy_resolves_for_allowed_paths() {
		assert!(is_allowed_path("/login"));
		assert!(requires_api_prefix("/login"));

		assert!(is_allowed_path(
			"/indoorvolleyball.refadmin/refereestatementofexpenses/downloadrefereestatementofexpenses"
		));
		assert!(!requires_api_prefix(
			"/indoorvolleyball.refadmin/refereestatementofexpenses/downloadrefereestatementofexpenses"
		));

		assert!(is_allowed_path("/indoorvolleyball.refadmin/api%5crefereeconvocation/search"));
		assert!(requires_api_prefix(
			"/indoorvolleyball.refadmin/api%5crefereeconvocation/search"
		));
	}

	#[test]
	fn path_safety_rejects_traversal_and_nul_but_allows_backslash() {
		assert_eq!(is_path_safe("/a/../b").unwrap(), false);
		assert_eq!(is_path_safe("/a//b").unwrap(), false);
		assert_eq!(is_path_safe("/a%00b").unwrap(), false);
		assert_eq!(is_path_safe("/api%5crefereeconvocation/search").unwrap(), true);
	}

	#[test]
	fn path_safety_rejects_malformed_percent_escapes() {
		assert!(is_path_safe("/a%2").is_err());
		assert!(is_path_safe("/a%2z").is_err());
		assert!(is_path_safe("/a%zz").is_err());
		assert!(is_path_safe("/a%").is_err());
	}

	#[test]
	fn ical_code_shape() {
		assert!(is_valid_ical_code("Ab3dE9"));
		assert!(!is_valid_ical_code("Ab3dE"));
		assert!(!is_valid_ical_code("Ab3d-9"));
		assert_eq!(extract_ical_code("/iCal/referee/Ab3dE9"), Some("Ab3dE9"));
		assert_eq!(extract_ical_code("/iCal/referee/Ab3dE9/x"), None);
		assert_eq!(extract_ical_code("/iCal/referee/"), None);
	}
}
