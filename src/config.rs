//! Authenticator configuration and validation.

// std
use std::env;
// crates.io
use serde::{Deserialize, Serialize};
use url::Url;
// self
use crate::{_prelude::*, security};

/// Default key-cache refresh interval in minutes.
pub const DEFAULT_JWKS_CACHE_MINUTES: u64 = 60;
/// Default timeout for the discovery request.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);
/// Default timeout applied to each JWKS fetch attempt.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings consumed by [`crate::Authenticator::new`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
	/// Issuer URL of the identity provider.
	pub issuer: String,
	/// Expected `aud` value; the audience check is skipped when unset.
	#[serde(default)]
	pub audience: Option<String>,
	/// Interval between scheduled key refreshes, in minutes.
	#[serde(default = "default_jwks_cache_minutes")]
	pub jwks_cache_minutes: u64,
	/// Accept token issuers on other hosts when they carry the configured `/t/{tenant}` segment.
	#[serde(default)]
	pub relaxed_tenant_match: bool,
	/// Fall back to `{issuer}/jwks` when discovery fails instead of refusing to start.
	#[serde(default)]
	pub jwks_fallback: bool,
	/// Whether the issuer and key endpoints must use HTTPS.
	#[serde(default = "default_true")]
	pub require_https: bool,
	/// Optional suffix allowlist for the key endpoint host.
	#[serde(default, deserialize_with = "crate::security::deserialize_allowed_domains")]
	pub allowed_jwks_domains: Vec<String>,
	/// Clock skew tolerated on `exp` and `nbf`, in seconds.
	#[serde(default)]
	pub leeway_secs: u64,
	/// Timeout for the discovery request.
	#[serde(default = "default_discovery_timeout")]
	pub discovery_timeout: Duration,
	/// Timeout for each JWKS fetch attempt.
	#[serde(default = "default_refresh_timeout")]
	pub refresh_timeout: Duration,
}
impl AuthConfig {
	/// Create a configuration for the given issuer with default settings.
	pub fn new(issuer: impl Into<String>) -> Self {
		Self {
			issuer: issuer.into(),
			audience: None,
			jwks_cache_minutes: DEFAULT_JWKS_CACHE_MINUTES,
			relaxed_tenant_match: false,
			jwks_fallback: false,
			require_https: true,
			allowed_jwks_domains: Vec::new(),
			leeway_secs: 0,
			discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
			refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
		}
	}

	/// Read the configuration from the process environment.
	///
	/// Returns `None` when `OIDC_ISSUER` is unset or blank, which leaves authentication disabled.
	pub fn from_env() -> Option<Self> {
		Self::from_lookup(|key| env::var(key).ok())
	}

	/// Build the configuration from an arbitrary variable lookup.
	pub fn from_lookup<F>(lookup: F) -> Option<Self>
	where
		F: Fn(&str) -> Option<String>,
	{
		let get = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());
		let flag = |key: &str, default: bool| {
			get(key)
				.map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
				.unwrap_or(default)
		};
		let mut config = Self::new(get("OIDC_ISSUER")?);

		config.audience = get("OIDC_AUDIENCE");
		config.jwks_cache_minutes = get("JWKS_CACHE_MINUTES")
			.and_then(|v| v.parse().ok())
			.unwrap_or(DEFAULT_JWKS_CACHE_MINUTES);
		config.relaxed_tenant_match = flag("OIDC_RELAXED_TENANT_MATCH", false);
		config.jwks_fallback = flag("OIDC_JWKS_FALLBACK", false);
		config.require_https = flag("OIDC_REQUIRE_HTTPS", true);
		config.allowed_jwks_domains = security::normalize_allowlist(
			get("OIDC_ALLOWED_JWKS_DOMAINS")
				.map(|v| v.split(',').map(str::to_owned).collect())
				.unwrap_or_default(),
		);
		config.leeway_secs = get("OIDC_LEEWAY_SECS").and_then(|v| v.parse().ok()).unwrap_or(0);

		Some(config)
	}

	/// Set the expected audience.
	pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
		self.audience = Some(audience.into());

		self
	}

	/// Set HTTPS requirement to the desired value.
	pub fn with_require_https(mut self, require_https: bool) -> Self {
		self.require_https = require_https;

		self
	}

	/// Toggle tenant-relaxed issuer matching.
	pub fn with_relaxed_tenant_match(mut self, enabled: bool) -> Self {
		self.relaxed_tenant_match = enabled;

		self
	}

	/// Toggle the `{issuer}/jwks` discovery fallback.
	pub fn with_jwks_fallback(mut self, enabled: bool) -> Self {
		self.jwks_fallback = enabled;

		self
	}

	/// Effective interval between scheduled key refreshes.
	///
	/// A zero minute setting falls back to the default hour.
	pub fn refresh_interval(&self) -> Duration {
		let minutes = match self.jwks_cache_minutes {
			0 => DEFAULT_JWKS_CACHE_MINUTES,
			minutes => minutes,
		};

		Duration::from_secs(minutes.saturating_mul(60))
	}

	/// Clock skew tolerance as a duration.
	pub fn leeway(&self) -> Duration {
		Duration::from_secs(self.leeway_secs)
	}

	/// Issuer with surrounding whitespace and trailing slashes removed.
	pub fn normalized_issuer(&self) -> &str {
		self.issuer.trim().trim_end_matches('/')
	}

	/// Validate the configuration against the documented constraints.
	pub fn validate(&self) -> Result<()> {
		let issuer = self.normalized_issuer();

		if issuer.is_empty() {
			return Err(Error::Validation { field: "issuer", reason: "Must not be empty.".into() });
		}

		let url = Url::parse(issuer).map_err(|err| Error::Validation {
			field: "issuer",
			reason: format!("Must be an absolute URL: {err}."),
		})?;

		if url.host_str().is_none() {
			return Err(Error::Validation {
				field: "issuer",
				reason: "Must include a host component.".into(),
			});
		}
		if self.require_https {
			security::enforce_https(&url)?;
		}
		if let Some(audience) = &self.audience
			&& audience.trim().is_empty()
		{
			return Err(Error::Validation {
				field: "audience",
				reason: "Must be omitted rather than blank.".into(),
			});
		}
		if self.discovery_timeout.is_zero() {
			return Err(Error::Validation {
				field: "discovery_timeout",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.refresh_timeout.is_zero() {
			return Err(Error::Validation {
				field: "refresh_timeout",
				reason: "Must be greater than zero.".into(),
			});
		}

		for domain in &self.allowed_jwks_domains {
			match security::canonicalize_dns_name(domain) {
				Some(canonical) if canonical == *domain => {},
				Some(_) =>
					return Err(Error::Validation {
						field: "allowed_jwks_domains",
						reason: "Entries must be canonical hostnames (lowercase, no trailing dot)."
							.into(),
					}),
				None =>
					return Err(Error::Validation {
						field: "allowed_jwks_domains",
						reason: "Entries must be non-empty hostnames.".into(),
					}),
			}
		}

		Ok(())
	}
}

fn default_true() -> bool {
	true
}

fn default_jwks_cache_minutes() -> u64 {
	DEFAULT_JWKS_CACHE_MINUTES
}

fn default_discovery_timeout() -> Duration {
	DEFAULT_DISCOVERY_TIMEOUT
}

fn default_refresh_timeout() -> Duration {
	DEFAULT_REFRESH_TIMEOUT
}
