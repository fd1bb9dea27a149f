//! Shared key store: initial fetch, scheduled refresh, and single-flight on-demand refresh.

// std
use std::{
	fmt::{Debug, Formatter, Result as FmtResult},
	sync::{
		Weak,
		atomic::{AtomicU64, Ordering},
	},
};
// crates.io
use rand::Rng;
use reqwest::Client;
use serde::Serialize;
use tokio::{
	sync::{Mutex, RwLock},
	task::JoinHandle,
};
use url::Url;
// self
use crate::{
	_prelude::*,
	config::{DEFAULT_JWKS_CACHE_MINUTES, DEFAULT_REFRESH_TIMEOUT},
	http::client::{self, DEFAULT_MAX_RESPONSE_BYTES},
	keys::set::{JwksDocument, KeySet, VerificationKey},
	metrics::{self, KeyStoreMetrics},
};

/// Upper bound of the random delay added to every scheduled refresh.
pub const DEFAULT_REFRESH_JITTER: Duration = Duration::from_secs(5);
/// Minimum spacing between two refreshes forced by unknown key identifiers.
pub const DEFAULT_ON_DEMAND_COOLDOWN: Duration = Duration::from_secs(10);

/// Refresh behaviour of a [`KeyStore`].
#[derive(Clone, Debug)]
pub struct KeyStoreOptions {
	/// Interval between scheduled refreshes.
	pub refresh_interval: Duration,
	/// Timeout applied to each fetch.
	pub attempt_timeout: Duration,
	/// Maximum random delay added on top of `refresh_interval`.
	pub refresh_jitter: Duration,
	/// Size guard for the JWKS response body.
	pub max_response_bytes: u64,
	/// Minimum time between on-demand refreshes; misses inside the window use the current
	/// snapshot.
	pub on_demand_cooldown: Duration,
}
impl KeyStoreOptions {
	/// Override the scheduled refresh interval.
	pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
		self.refresh_interval = interval;

		self
	}

	/// Override the scheduled refresh jitter.
	pub fn with_refresh_jitter(mut self, jitter: Duration) -> Self {
		self.refresh_jitter = jitter;

		self
	}

	/// Override the minimum spacing of on-demand refreshes.
	pub fn with_on_demand_cooldown(mut self, cooldown: Duration) -> Self {
		self.on_demand_cooldown = cooldown;

		self
	}

	fn next_delay(&self) -> Duration {
		let jitter_ms = self.refresh_jitter.as_millis() as u64;

		if jitter_ms == 0 {
			return self.refresh_interval;
		}

		self.refresh_interval + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
	}
}
impl Default for KeyStoreOptions {
	fn default() -> Self {
		Self {
			refresh_interval: Duration::from_secs(DEFAULT_JWKS_CACHE_MINUTES * 60),
			attempt_timeout: DEFAULT_REFRESH_TIMEOUT,
			refresh_jitter: DEFAULT_REFRESH_JITTER,
			max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
			on_demand_cooldown: DEFAULT_ON_DEMAND_COOLDOWN,
		}
	}
}

/// Why a refresh ran.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshTrigger {
	/// First fetch during construction.
	Initial,
	/// Periodic background refresh.
	Scheduled,
	/// Refresh forced by a token whose `kid` is not cached.
	OnDemand,
	/// Refresh requested through [`KeyStore::refresh`].
	Manual,
}
impl RefreshTrigger {
	/// Label used in logs and metrics.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Initial => "initial",
			Self::Scheduled => "scheduled",
			Self::OnDemand => "on_demand",
			Self::Manual => "manual",
		}
	}
}

/// Point-in-time view of a [`KeyStore`], served by readiness endpoints.
#[derive(Clone, Debug, Serialize)]
pub struct KeyStoreStatus {
	/// Endpoint the keys are fetched from.
	pub jwks_uri: String,
	/// Number of usable keys in the current snapshot.
	pub key_count: usize,
	/// Sorted key identifiers in the current snapshot.
	pub kids: Vec<String>,
	/// When the current snapshot was fetched.
	pub refreshed_at: DateTime<Utc>,
	/// Most recent refresh failure, cleared by the next success.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub last_error: Option<String>,
	/// Successful refreshes, including the initial fetch.
	pub refresh_successes: u64,
	/// Failed refresh attempts.
	pub refresh_errors: u64,
	/// Refreshes forced by unknown key identifiers.
	pub on_demand_refreshes: u64,
}

/// Verification keys for one JWKS endpoint, kept fresh in the background.
///
/// Dropping the store aborts its background task.
pub struct KeyStore {
	inner: Arc<Inner>,
	refresh_task: JoinHandle<()>,
}
impl KeyStore {
	/// Fetch the key set once and start the background refresh task.
	///
	/// Fails with [`Error::Discovery`] when the endpoint cannot be fetched or yields no usable key.
	#[tracing::instrument(skip_all, fields(jwks_uri = %jwks_uri))]
	pub async fn connect(client: Client, jwks_uri: Url, options: KeyStoreOptions) -> Result<Self> {
		let inner = Arc::new(Inner {
			jwks_uri,
			client,
			options,
			state: RwLock::new(StoreState { keys: Arc::new(KeySet::empty()), last_error: None }),
			single_flight: Mutex::new(None),
			generation: AtomicU64::new(0),
			metrics: KeyStoreMetrics::new(),
		});

		{
			let _guard = inner.single_flight.lock().await;

			inner.refresh_locked(RefreshTrigger::Initial).await.map_err(|err| {
				Error::Discovery { issuer: inner.jwks_uri.to_string(), reason: err.to_string() }
			})?;
		}

		let refresh_task = tokio::spawn(refresh_loop(Arc::downgrade(&inner)));

		Ok(Self { inner, refresh_task })
	}

	/// Endpoint the keys are fetched from.
	pub fn jwks_uri(&self) -> &Url {
		&self.inner.jwks_uri
	}

	/// Current key snapshot.
	pub async fn current(&self) -> Arc<KeySet> {
		self.inner.current().await
	}

	/// Look up a key in the current snapshot without touching the network.
	pub async fn lookup(&self, kid: &str) -> Option<Arc<VerificationKey>> {
		self.inner.current().await.get(kid)
	}

	/// Look up a key, refreshing once when the `kid` is unknown.
	///
	/// Concurrent misses share a single fetch, and at most one on-demand fetch runs per
	/// [`KeyStoreOptions::on_demand_cooldown`]. A failed refresh keeps the previous snapshot and
	/// reports the key as absent.
	pub async fn resolve(&self, kid: &str) -> Option<Arc<VerificationKey>> {
		let observed = self.inner.generation.load(Ordering::Acquire);

		if let Some(key) = self.lookup(kid).await {
			return Some(key);
		}

		tracing::debug!(kid, jwks_uri = %self.inner.jwks_uri, "unknown kid; refreshing keys");

		self.inner.refresh_on_demand(observed).await.get(kid)
	}

	/// Force a refresh now, regardless of the schedule and the on-demand cooldown.
	pub async fn refresh(&self) -> Result<Arc<KeySet>> {
		let _guard = self.inner.single_flight.lock().await;

		self.inner.refresh_locked(RefreshTrigger::Manual).await
	}

	/// Status snapshot for readiness reporting.
	pub async fn status(&self) -> KeyStoreStatus {
		let (keys, last_error) = {
			let state = self.inner.state.read().await;

			(state.keys.clone(), state.last_error.clone())
		};
		let counters = self.inner.metrics.snapshot();

		KeyStoreStatus {
			jwks_uri: self.inner.jwks_uri.to_string(),
			key_count: keys.len(),
			kids: keys.kids(),
			refreshed_at: keys.refreshed_at(),
			last_error,
			refresh_successes: counters.refresh_successes,
			refresh_errors: counters.refresh_errors,
			on_demand_refreshes: counters.on_demand_refreshes,
		}
	}
}
impl Debug for KeyStore {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("KeyStore")
			.field("jwks_uri", &self.inner.jwks_uri.as_str())
			.field("options", &self.inner.options)
			.finish_non_exhaustive()
	}
}
impl Drop for KeyStore {
	fn drop(&mut self) {
		self.refresh_task.abort();
	}
}

struct StoreState {
	keys: Arc<KeySet>,
	last_error: Option<String>,
}

struct Inner {
	jwks_uri: Url,
	client: Client,
	options: KeyStoreOptions,
	state: RwLock<StoreState>,
	// Held for the duration of every fetch; stores when the last on-demand fetch started.
	single_flight: Mutex<Option<Instant>>,
	// Bumped after every completed attempt; waiters compare it to skip duplicate fetches.
	generation: AtomicU64,
	metrics: Arc<KeyStoreMetrics>,
}
impl Inner {
	async fn current(&self) -> Arc<KeySet> {
		self.state.read().await.keys.clone()
	}

	async fn refresh_on_demand(&self, observed: u64) -> Arc<KeySet> {
		let mut last_on_demand = self.single_flight.lock().await;

		if self.generation.load(Ordering::Acquire) != observed {
			return self.current().await;
		}
		if last_on_demand.is_some_and(|at| at.elapsed() < self.options.on_demand_cooldown) {
			tracing::debug!("on-demand refresh skipped; cooldown active");

			return self.current().await;
		}

		*last_on_demand = Some(Instant::now());

		self.metrics.record_on_demand();

		match self.refresh_locked(RefreshTrigger::OnDemand).await {
			Ok(keys) => keys,
			Err(_) => self.current().await,
		}
	}

	#[tracing::instrument(skip_all, fields(jwks_uri = %self.jwks_uri, trigger = trigger.as_str()))]
	async fn refresh_locked(&self, trigger: RefreshTrigger) -> Result<Arc<KeySet>> {
		let started = Instant::now();
		let result = self.fetch().await;

		self.generation.fetch_add(1, Ordering::AcqRel);

		match result {
			Ok(keys) => {
				let keys = Arc::new(keys);
				let elapsed = started.elapsed();

				{
					let mut state = self.state.write().await;

					state.keys = keys.clone();
					state.last_error = None;
				}

				self.metrics.record_refresh_success(elapsed);
				metrics::record_refresh_success(
					self.jwks_uri.as_str(),
					trigger.as_str(),
					elapsed,
					keys.len(),
				);
				tracing::debug!(keys = keys.len(), elapsed = ?elapsed, "key set refreshed");

				Ok(keys)
			},
			Err(err) => {
				self.state.write().await.last_error = Some(err.to_string());
				self.metrics.record_refresh_error();
				metrics::record_refresh_error(self.jwks_uri.as_str(), trigger.as_str());
				tracing::warn!(error = %err, "key refresh failed; keeping previous key set");

				Err(err)
			},
		}
	}

	async fn fetch(&self) -> Result<KeySet> {
		let fetched = client::fetch_json::<JwksDocument>(
			&self.client,
			&self.jwks_uri,
			self.options.attempt_timeout,
			self.options.max_response_bytes,
		)
		.await?;
		let keys = KeySet::from_document(fetched.body);

		if keys.is_empty() {
			return Err(Error::Validation {
				field: "keys",
				reason: "JWKS contains no usable signature key.".into(),
			});
		}

		Ok(keys)
	}
}

async fn refresh_loop(inner: Weak<Inner>) {
	loop {
		let delay = match inner.upgrade() {
			Some(inner) => inner.options.next_delay(),
			None => return,
		};

		tokio::time::sleep(delay).await;

		let Some(inner) = inner.upgrade() else {
			return;
		};
		let _guard = inner.single_flight.lock().await;
		let _ = inner.refresh_locked(RefreshTrigger::Scheduled).await;
	}
}
