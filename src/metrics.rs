//! Metrics helpers and per-key-store telemetry bookkeeping.

// std
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "prometheus")] use std::sync::OnceLock;
// crates.io
use metrics::Label;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use smallvec::SmallVec;
// self
use crate::_prelude::*;

type LabelSet = SmallVec<[Label; 4]>;

const METRIC_VALIDATIONS_TOTAL: &str = "oidc_guard_validations_total";
const METRIC_KEY_REFRESH_TOTAL: &str = "oidc_guard_key_refresh_total";
const METRIC_KEY_REFRESH_DURATION: &str = "oidc_guard_key_refresh_duration_seconds";
const METRIC_KEY_REFRESH_ERRORS: &str = "oidc_guard_key_refresh_errors_total";
const METRIC_KEYS_CACHED: &str = "oidc_guard_keys_cached";

/// Shared Prometheus handle installed by [`install_default_exporter`].
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Thread-safe refresh accumulator for a single key store.
#[derive(Debug, Default)]
pub struct KeyStoreMetrics {
	refresh_successes: AtomicU64,
	refresh_errors: AtomicU64,
	on_demand_refreshes: AtomicU64,
	last_refresh_micros: AtomicU64,
}
impl KeyStoreMetrics {
	/// Create a new metrics accumulator.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Record a successful refresh and latency.
	pub fn record_refresh_success(&self, duration: Duration) {
		self.refresh_successes.fetch_add(1, Ordering::Relaxed);
		self.last_refresh_micros.store(duration.as_micros() as u64, Ordering::Relaxed);
	}

	/// Record refresh failure.
	pub fn record_refresh_error(&self) {
		self.refresh_errors.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a refresh forced by an unknown key identifier.
	pub fn record_on_demand(&self) {
		self.on_demand_refreshes.fetch_add(1, Ordering::Relaxed);
	}

	/// Take a point-in-time snapshot for status reporting.
	pub fn snapshot(&self) -> KeyStoreMetricsSnapshot {
		KeyStoreMetricsSnapshot {
			refresh_successes: self.refresh_successes.load(Ordering::Relaxed),
			refresh_errors: self.refresh_errors.load(Ordering::Relaxed),
			on_demand_refreshes: self.on_demand_refreshes.load(Ordering::Relaxed),
			last_refresh_micros: match self.last_refresh_micros.load(Ordering::Relaxed) {
				0 => None,
				value => Some(value),
			},
		}
	}
}

/// Read-only snapshot of key store counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyStoreMetricsSnapshot {
	/// Count of successful refreshes, including the initial fetch.
	pub refresh_successes: u64,
	/// Count of refresh attempts that failed.
	pub refresh_errors: u64,
	/// Count of refreshes triggered by an unknown `kid`.
	pub on_demand_refreshes: u64,
	/// Microsecond latency of the most recent successful refresh.
	pub last_refresh_micros: Option<u64>,
}

/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the recorder is installed.
#[cfg(feature = "prometheus")]
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle = PrometheusBuilder::new().install_recorder()?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Access the global Prometheus exporter handle when installed.
#[cfg(feature = "prometheus")]
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

/// Record the outcome of a token validation (`accepted` or an error code).
pub fn record_validation(issuer: &str, outcome: &'static str) {
	let mut labels = issuer_labels(issuer);

	labels.push(Label::new("outcome", outcome));

	metrics::counter!(METRIC_VALIDATIONS_TOTAL, labels.iter()).increment(1);
}

/// Record a successful key refresh along with its latency and resulting key count.
pub fn record_refresh_success(
	endpoint: &str,
	trigger: &'static str,
	duration: Duration,
	keys: usize,
) {
	metrics::counter!(METRIC_KEY_REFRESH_TOTAL, refresh_labels(endpoint, trigger, "success").iter())
		.increment(1);
	metrics::histogram!(METRIC_KEY_REFRESH_DURATION, endpoint_labels(endpoint).iter())
		.record(duration.as_secs_f64());
	metrics::gauge!(METRIC_KEYS_CACHED, endpoint_labels(endpoint).iter()).set(keys as f64);
}

/// Record a failed key refresh.
pub fn record_refresh_error(endpoint: &str, trigger: &'static str) {
	metrics::counter!(METRIC_KEY_REFRESH_TOTAL, refresh_labels(endpoint, trigger, "error").iter())
		.increment(1);
	metrics::counter!(METRIC_KEY_REFRESH_ERRORS, endpoint_labels(endpoint).iter()).increment(1);
}

fn issuer_labels(issuer: &str) -> LabelSet {
	let mut labels = LabelSet::with_capacity(2);

	labels.push(Label::new("issuer", issuer.to_owned()));

	labels
}

fn endpoint_labels(endpoint: &str) -> LabelSet {
	let mut labels = LabelSet::with_capacity(3);

	labels.push(Label::new("endpoint", endpoint.to_owned()));

	labels
}

fn refresh_labels(endpoint: &str, trigger: &'static str, status: &'static str) -> LabelSet {
	let mut labels = endpoint_labels(endpoint);

	labels.push(Label::new("trigger", trigger));
	labels.push(Label::new("status", status));

	labels
}
