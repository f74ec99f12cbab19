//! One structured log line per request. Grounded in the teacher's
//! `RequestLog`/`DropOnLog` pattern: a value that guarantees exactly one `tracing`
//! event per request is emitted even on an early-return error path, by logging from
//! `Drop` rather than from every return site.

use std::time::Instant;

/// Why the pipeline terminated a request before reaching the upstream, if it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalReason {
	KillSwitch,
	OriginDenied,
	PathDenied,
	RateLimited,
	LockedOut,
}

impl TerminalReason {
	fn as_str(&self) -> &'static str {
		match self {
			TerminalReason::KillSwitch => "kill_switch",
			TerminalReason::OriginDenied => "origin_denied",
			TerminalReason::PathDenied => "path_denied",
			TerminalReason::RateLimited => "rate_limited",
			TerminalReason::LockedOut => "locked_out",
		}
	}
}

/// Per-request fields accumulated across the pipeline and emitted as a single event
/// when the guard drops. Never carries cookie or credential contents.
pub struct RequestLog {
	start: Instant,
	method: String,
	path: String,
	client_ip: String,
	status: Option<u16>,
	terminal_reason: Option<TerminalReason>,
}

impl RequestLog {
	pub fn new(method: &http::Method, path: &str, client_ip: &str) -> Self {
		RequestLog {
			start: Instant::now(),
			method: method.to_string(),
			path: path.to_string(),
			client_ip: client_ip.to_string(),
			status: None,
			terminal_reason: None,
		}
	}

	pub fn set_status(&mut self, status: u16) {
		self.status = Some(status);
	}

	pub fn set_terminal_reason(&mut self, reason: TerminalReason) {
		self.terminal_reason = Some(reason);
	}
}

impl Drop for RequestLog {
	fn drop(&mut self) {
		let latency_ms = self.start.elapsed().as_millis();
		let status = self.status.unwrap_or(0);
		let reason = self.terminal_reason.map(TerminalReason::as_str);
		if status >= 500 || status == 0 {
			tracing::warn!(
				method = %self.method,
				path = %self.path,
				client_ip = %self.client_ip,
				status,
				latency_ms,
				terminal_reason = reason,
				"request completed"
			);
		} else {
			tracing::info!(
				method = %self.method,
				path = %self.path,
				client_ip = %self.client_ip,
				status,
				latency_ms,
				terminal_reason = reason,
				"request completed"
			);
		}
	}
}
