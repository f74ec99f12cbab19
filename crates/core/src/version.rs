//! Build/version metadata, reported on the `/health` endpoint and logged once at start-up.

#[derive(Clone, Debug, serde::Serialize)]
pub struct BuildInfo {
	pub version: &'static str,
	pub rust_version: &'static str,
}

impl BuildInfo {
	pub fn new() -> Self {
		Self {
			version: env!("CARGO_PKG_VERSION"),
			rust_version: option_env!("CARGO_PKG_RUST_VERSION").unwrap_or("unknown"),
		}
	}
}

impl Default for BuildInfo {
	fn default() -> Self {
		Self::new()
	}
}
