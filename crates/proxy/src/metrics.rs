//! Prometheus-format metrics, built on `prometheus-client` (the same crate the
//! teacher's `core::tokio_metrics` collector uses). Ambient observability, not a
//! feature the spec's Non-goals scope out.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
	pub outcome: String,
}

pub struct Metrics {
	registry: Registry,
	pub requests_total: Family<OutcomeLabels, Counter>,
	pub lockouts_active: Counter,
	pub rate_limit_rejections: Counter,
	pub upstream_latency_seconds: Histogram,
}

impl Default for Metrics {
	fn default() -> Self {
		Self::new()
	}
}

impl Metrics {
	pub fn new() -> Self {
		let mut registry = Registry::with_prefix("volleykit_proxy");

		let requests_total = Family::<OutcomeLabels, Counter>::default();
		registry.register(
			"requests",
			"total requests handled, by terminal outcome",
			requests_total.clone(),
		);

		let lockouts_active = Counter::default();
		registry.register(
			"lockouts_triggered",
			"number of times an IP crossed the lockout threshold",
			lockouts_active.clone(),
		);

		let rate_limit_rejections = Counter::default();
		registry.register(
			"rate_limit_rejections",
			"requests rejected by the per-IP rate limiter",
			rate_limit_rejections.clone(),
		);

		let upstream_latency_seconds = Histogram::new(
			[0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0].into_iter(),
		);
		registry.register(
			"upstream_latency_seconds",
			"latency of the upstream fetch",
			upstream_latency_seconds.clone(),
		);

		Metrics {
			registry,
			requests_total,
			lockouts_active,
			rate_limit_rejections,
			upstream_latency_seconds,
		}
	}

	/// Registers the teacher's Tokio runtime collector (global queue depth, alive
	/// task count, worker count) against this registry, so `/metrics` also reports
	/// on the async runtime the process is handling requests on.
	pub fn register_tokio_collector(&mut self, handle: &tokio::runtime::Handle) {
		volleykit_core::tokio_metrics::TokioCollector::register(&mut self.registry, handle);
	}

	pub fn record_outcome(&self, outcome: &str) {
		self.requests_total
			.get_or_create(&OutcomeLabels {
				outcome: outcome.to_string(),
			})
			.inc();
	}

	/// Renders the registry in Prometheus text exposition format for `/metrics`.
	pub fn render(&self) -> String {
		let mut buf = String::new();
		// `encode` cannot fail against a `String` sink.
		let _ = encode(&mut buf, &self.registry);
		buf
	}
}
