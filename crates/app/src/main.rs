//! Process entry point: reads configuration from the environment, wires the
//! `KvStore`/`RateLimiter`/upstream client into an `AppState`, and serves the
//! pipeline's single fallback handler over plain HTTP. TLS termination is assumed
//! to be provided by the hosting runtime in front of this process (spec.md §1
//! Non-goals).

use std::str::FromStr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;

use volleykit_core::telemetry::{self, LogFormat};
use volleykit_core::version::BuildInfo;
use volleykit_proxy::config::{Config, LockoutStoreKind};
use volleykit_proxy::lockout::{KvStore, MemoryKvStore};
use volleykit_proxy::metrics::Metrics;
use volleykit_proxy::pipeline::{self, AppState};
use volleykit_proxy::ratelimit::{FixedWindowRateLimiter, RateLimiter};
use volleykit_proxy::upstream::UpstreamClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let log_format = std::env::var("LOG_FORMAT")
		.ok()
		.and_then(|s| LogFormat::from_str(&s).ok())
		.unwrap_or_default();
	telemetry::init(log_format);

	let build = BuildInfo::new();
	tracing::info!(version = build.version, "starting volleykit-proxy");

	let config = Config::from_env().map_err(|err| {
		tracing::error!(error = %err, "invalid configuration, refusing to start");
		err
	})?;

	let kv: Arc<dyn KvStore> = match &config.lockout_store {
		LockoutStoreKind::Memory => Arc::new(MemoryKvStore::new()),
		LockoutStoreKind::Redis(url) => {
			// The `KvStore` trait is externalizable to a distributed backend (spec
			// SPEC_FULL.md §6a), but wiring an actual Redis client is out of scope
			// for this repository; fall back to the in-process store rather than
			// silently pretending a distributed store is in use.
			tracing::warn!(%url, "LOCKOUT_STORE=redis://... has no client wired up yet, using in-process store");
			Arc::new(MemoryKvStore::new())
		},
	};

	let rate_limiter: Option<Arc<dyn RateLimiter>> = config
		.rate_limit_per_minute
		.map(|limit| Arc::new(FixedWindowRateLimiter::per_minute(limit)) as Arc<dyn RateLimiter>);

	let upstream = UpstreamClient::new()?;

	let mut metrics = Metrics::new();
	metrics.register_tokio_collector(&tokio::runtime::Handle::current());

	let bind_addr = config.bind_addr;
	let state = AppState {
		config: Arc::new(config),
		kv,
		rate_limiter,
		upstream,
		metrics: Arc::new(metrics),
	};

	let app = axum::Router::new()
		.fallback(pipeline::handle)
		.with_state(state);

	let listener = TcpListener::bind(bind_addr).await?;
	tracing::info!(%bind_addr, "listening");

	axum::serve(
		listener,
		app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
	)
	.with_graceful_shutdown(shutdown_signal())
	.await?;

	Ok(())
}

/// Waits for either Ctrl+C or, on Unix, SIGTERM — the usual pair a container
/// orchestrator sends on a rolling restart.
async fn shutdown_signal() {
	let ctrl_c = async {
		signal::ctrl_c()
			.await
			.expect("failed to install Ctrl+C handler");
	};

	#[cfg(unix)]
	let terminate = async {
		signal::unix::signal(signal::unix::SignalKind::terminate())
			.expect("failed to install SIGTERM handler")
			.recv()
			.await;
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}

	tracing::info!("shutdown signal received, draining in-flight requests");
}
