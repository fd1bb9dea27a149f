//! Transport checks applied to every provider endpoint before it is trusted.
//!
//! Discovery hands back a `jwks_uri` chosen by the provider (or guessed by the fallback), so the
//! URL that ends up supplying verification keys is checked here against the HTTPS requirement and
//! the optional host allowlist before the key store is allowed to fetch from it.

// std
use std::collections::HashSet;
// crates.io
use serde::{Deserialize, de::Deserializer};
use url::Url;
// self
use crate::_prelude::*;

/// Lowercase a hostname and drop surrounding whitespace and trailing dots.
///
/// Returns `None` when nothing is left.
pub fn canonicalize_dns_name(value: &str) -> Option<String> {
	let name = value.trim().trim_end_matches('.');

	(!name.is_empty()).then(|| name.to_ascii_lowercase())
}

/// Canonicalise allowlist entries, dropping blanks and repeats while keeping order.
pub fn normalize_allowlist(domains: Vec<String>) -> Vec<String> {
	let mut seen = HashSet::with_capacity(domains.len());

	domains
		.iter()
		.filter_map(|domain| canonicalize_dns_name(domain))
		.filter(|domain| seen.insert(domain.clone()))
		.collect()
}

/// Deserialize an allowlist and canonicalise it on the way in.
pub fn deserialize_allowed_domains<'de, D>(
	deserializer: D,
) -> std::result::Result<Vec<String>, D::Error>
where
	D: Deserializer<'de>,
{
	Vec::<String>::deserialize(deserializer).map(normalize_allowlist)
}

/// Reject any scheme other than `https`.
pub fn enforce_https(url: &Url) -> Result<()> {
	match url.scheme() {
		"https" => Ok(()),
		scheme =>
			Err(Error::Security(format!("Provider URL {url} uses {scheme}; HTTPS is required."))),
	}
}

/// Whether `host` equals an allowlisted domain or sits below one.
///
/// An empty allowlist admits every host.
pub fn host_is_allowed(host: &str, allowed_domains: &[String]) -> bool {
	if allowed_domains.is_empty() {
		return true;
	}

	let Some(host) = canonicalize_dns_name(host) else {
		return false;
	};

	allowed_domains.iter().filter_map(|domain| canonicalize_dns_name(domain)).any(|domain| {
		host == domain
			|| host.strip_suffix(domain.as_str()).is_some_and(|label| label.ends_with('.'))
	})
}

/// Check an endpoint URL against the HTTPS requirement and the host allowlist.
pub fn ensure_trusted_endpoint(
	url: &Url,
	require_https: bool,
	allowed_domains: &[String],
) -> Result<()> {
	if require_https {
		enforce_https(url)?;
	}

	let Some(host) = url.host_str() else {
		return Err(Error::Security(format!("Provider URL {url} has no host component.")));
	};

	if !host_is_allowed(host, allowed_domains) {
		return Err(Error::Security(format!("Host '{host}' is not in the allowed_jwks_domains list.")));
	}

	Ok(())
}
