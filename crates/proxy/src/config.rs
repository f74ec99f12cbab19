//! Process configuration. Grounded in the teacher's `RawConfig`/`Config` split: a
//! `RawConfig` collects raw, all-optional environment input; `Config::from_env`
//! validates it into the immutable type the rest of the process consumes. Any
//! validation failure here is fatal — the process should not start serving traffic
//! with a malformed allow-list or target host.

use std::net::SocketAddr;
use std::str::FromStr;

use url::Url;

use crate::classify::{self, OriginConfigError};

/// Raw, all-`Option` deserialization target for the environment variables this
/// process reads. Nothing here is validated yet.
#[derive(Debug, Clone, Default)]
pub struct RawConfig {
	pub allowed_origins: Option<String>,
	pub target_host: Option<String>,
	pub kill_switch: Option<String>,
	pub bind_addr: Option<String>,
	pub rate_limit_per_minute: Option<String>,
	pub lockout_store: Option<String>,
}

impl RawConfig {
	/// Reads the raw environment variables this process cares about, without
	/// validating any of them.
	pub fn from_env() -> Self {
		RawConfig {
			allowed_origins: std::env::var("ALLOWED_ORIGINS").ok(),
			target_host: std::env::var("TARGET_HOST").ok(),
			kill_switch: std::env::var("KILL_SWITCH").ok(),
			bind_addr: std::env::var("BIND_ADDR").ok(),
			rate_limit_per_minute: std::env::var("RATE_LIMIT_PER_MINUTE").ok(),
			lockout_store: std::env::var("LOCKOUT_STORE").ok(),
		}
	}
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
	#[error("ALLOWED_ORIGINS is required and must be non-empty")]
	MissingAllowedOrigins,
	#[error("invalid allowed origin list: {0}")]
	InvalidOrigin(#[from] OriginConfigError),
	#[error("TARGET_HOST is required")]
	MissingTargetHost,
	#[error("TARGET_HOST '{0}' is not a valid absolute URL: {1}")]
	InvalidTargetHost(String, url::ParseError),
	#[error("BIND_ADDR '{0}' is not a valid socket address: {1}")]
	InvalidBindAddr(String, std::net::AddrParseError),
	#[error("RATE_LIMIT_PER_MINUTE '{0}' is not a positive integer")]
	InvalidRateLimit(String),
	#[error("LOCKOUT_STORE '{0}' is not supported")]
	UnsupportedLockoutStore(String),
}

/// Which `KvStore` backend to use. `Redis` records the URL but the trait wiring (not
/// a real client) is all this repository exercises — see SPEC_FULL.md §6a.
#[derive(Debug, Clone)]
pub enum LockoutStoreKind {
	Memory,
	Redis(String),
}

/// Validated, immutable runtime configuration, assembled once at start-up.
#[derive(Debug, Clone)]
pub struct Config {
	pub allowed_origins: Vec<String>,
	pub target_host: Url,
	pub kill_switch: bool,
	pub bind_addr: SocketAddr,
	pub rate_limit_per_minute: Option<u32>,
	pub lockout_store: LockoutStoreKind,
}

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

impl Config {
	pub fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
		let allowed_origins_raw = raw
			.allowed_origins
			.filter(|s| !s.trim().is_empty())
			.ok_or(ConfigError::MissingAllowedOrigins)?;
		let allowed_origins = classify::parse_allowed_origins(&allowed_origins_raw);
		if allowed_origins.is_empty() {
			return Err(ConfigError::MissingAllowedOrigins);
		}
		classify::validate_allowed_origins(&allowed_origins)?;

		let target_host_raw = raw.target_host.ok_or(ConfigError::MissingTargetHost)?;
		let target_host = Url::parse(&target_host_raw)
			.map_err(|e| ConfigError::InvalidTargetHost(target_host_raw.clone(), e))?;

		// Only the exact literal "true" enables the kill switch; anything else
		// (missing, "false", typos) leaves the proxy serving traffic.
		let kill_switch = raw.kill_switch.as_deref() == Some("true");

		let bind_addr_raw = raw.bind_addr.unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
		let bind_addr = SocketAddr::from_str(&bind_addr_raw)
			.map_err(|e| ConfigError::InvalidBindAddr(bind_addr_raw.clone(), e))?;

		let rate_limit_per_minute = match raw.rate_limit_per_minute {
			None => None,
			Some(s) => Some(
				s.parse::<u32>()
					.ok()
					.filter(|n| *n > 0)
					.ok_or_else(|| ConfigError::InvalidRateLimit(s.clone()))?,
			),
		};

		let lockout_store = match raw.lockout_store.as_deref() {
			None | Some("memory") => LockoutStoreKind::Memory,
			Some(s) if s.starts_with("redis://") => LockoutStoreKind::Redis(s.to_string()),
			Some(other) => return Err(ConfigError::UnsupportedLockoutStore(other.to_string())),
		};

		Ok(Config {
			allowed_origins,
			target_host,
			kill_switch,
			bind_addr,
			rate_limit_per_minute,
			lockout_store,
		})
	}

	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_raw(RawConfig::from_env())
	}

	/// The authority (host[:port]) the outgoing `Host` header must carry.
	pub fn target_authority(&self) -> String {
		match self.target_host.port() {
			Some(port) => format!("{}:{}", self.target_host.host_str().unwrap_or_default(), port),
			None => self.target_host.host_str().unwrap_or_default().to_string(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn raw(origins: &str, target: &str) -> RawConfig {
		RawConfig {
			allowed_origins: Some(origins.to_string()),
			target_host: Some(target.to_string()),
			kill_switch: None,
			bind_addr: None,
			rate_limit_per_minute: None,
			lockout_store: None,
		}
	}

	#[test]
	fn builds_valid_config() {
		let cfg = Config::from_raw(raw("https://app.example", "https://upstream.example")).unwrap();
		assert_eq!(cfg.allowed_origins, vec!["https://app.example".to_string()]);
		assert!(!cfg.kill_switch);
		assert_eq!(cfg.bind_addr.to_string(), DEFAULT_BIND_ADDR);
	}

	#[test]
	fn rejects_missing_or_malformed_fields() {
		assert!(matches!(
			Config::from_raw(RawConfig::default()),
			Err(ConfigError::MissingAllowedOrigins)
		));
		assert!(matches!(
			Config::from_raw(raw("not a url", "https://upstream.example")),
			Err(ConfigError::InvalidOrigin(_))
		));
		assert!(matches!(
			Config::from_raw(raw("https://app.example", "not a url")),
			Err(ConfigError::InvalidTargetHost(_, _))
		));
	}

	#[test]
	fn kill_switch_requires_exact_literal() {
		let mut r = raw("https://app.example", "https://upstream.example");
		r.kill_switch = Some("TRUE".to_string());
		assert!(!Config::from_raw(r).unwrap().kill_switch);

		let mut r = raw("https://app.example", "https://upstream.example");
		r.kill_switch = Some("true".to_string());
		assert!(Config::from_raw(r).unwrap().kill_switch);
	}
}
