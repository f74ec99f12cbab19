//! Tracing/logging bootstrap. Kept deliberately small relative to the teacher's
//! `telemetry::trc` module: no OTLP exporter, no span-per-policy-check — this process
//! has one flat pipeline and one log line per request (see `proxy::log::RequestLog`).

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

/// Output format for log lines.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
	/// Human-readable, for local/interactive use.
	#[default]
	Compact,
	/// One JSON object per line, for log-shipping in production.
	Json,
}

impl std::str::FromStr for LogFormat {
	type Err = anyhow::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"json" => Ok(LogFormat::Json),
			"compact" | "" => Ok(LogFormat::Compact),
			other => anyhow::bail!("unknown log format '{other}', expected 'compact' or 'json'"),
		}
	}
}

/// Initialize the global tracing subscriber. Must be called exactly once, as early as
/// possible in `main`. The filter is read from `RUST_LOG` (falling back to `info`).
pub fn init(format: LogFormat) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

	let builder = tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_span_events(FmtSpan::NONE)
		.with_target(false);

	match format {
		LogFormat::Json => builder.json().init(),
		LogFormat::Compact => builder.compact().init(),
	}
}
