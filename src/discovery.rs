//! OIDC discovery: locating the provider's signing-key endpoint.

// crates.io
use reqwest::Client;
use serde::Deserialize;
use url::Url;
// self
use crate::{
	_prelude::*,
	http::client::{self, DEFAULT_MAX_RESPONSE_BYTES},
	security,
};

/// Path appended to the issuer to locate the discovery document.
pub const WELL_KNOWN_PATH: &str = "/.well-known/openid-configuration";
/// Path appended to the issuer when discovery falls back.
pub const FALLBACK_JWKS_PATH: &str = "/jwks";

/// Where a [`DiscoveryDocument`] came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiscoverySource {
	/// The provider served a usable discovery document.
	Provider,
	/// Discovery failed and the endpoint was derived from the issuer.
	Fallback,
}

/// Issuer and signing-key endpoint pair consumed to build the key store.
#[derive(Clone, Debug)]
pub struct DiscoveryDocument {
	/// Issuer to validate tokens against.
	pub issuer: String,
	/// Endpoint serving the JSON Web Key Set.
	pub jwks_uri: Url,
	/// Whether the provider answered or the fallback was used.
	pub source: DiscoverySource,
}

/// Knobs for [`resolve`].
#[derive(Clone, Debug)]
pub struct DiscoveryOptions {
	/// Timeout for the discovery request.
	pub timeout: Duration,
	/// Derive `{issuer}/jwks` when discovery fails instead of returning an error.
	pub allow_fallback: bool,
	/// Require HTTPS for the resolved key endpoint.
	pub require_https: bool,
	/// Host allowlist for the resolved key endpoint.
	pub allowed_jwks_domains: Vec<String>,
}
impl Default for DiscoveryOptions {
	fn default() -> Self {
		Self {
			timeout: Duration::from_secs(10),
			allow_fallback: false,
			require_https: true,
			allowed_jwks_domains: Vec::new(),
		}
	}
}

#[derive(Debug, Deserialize)]
struct ProviderMetadata {
	#[serde(default)]
	issuer: Option<String>,
	#[serde(default)]
	jwks_uri: Option<String>,
}

/// Fetch the discovery document for `issuer` and derive the key endpoint.
///
/// The provider-reported issuer is preferred over the input when present. Any failure either
/// falls back to `{issuer}/jwks` (with a warning) or is returned, depending on
/// [`DiscoveryOptions::allow_fallback`].
#[tracing::instrument(skip(client, options), fields(fallback = options.allow_fallback))]
pub async fn resolve(
	client: &Client,
	issuer: &str,
	options: &DiscoveryOptions,
) -> Result<DiscoveryDocument> {
	let issuer = issuer.trim().trim_end_matches('/');
	let document = match fetch_metadata(client, issuer, options.timeout).await {
		Ok(document) => document,
		Err(reason) if options.allow_fallback => {
			let jwks_uri = Url::parse(&format!("{issuer}{FALLBACK_JWKS_PATH}"))?;

			tracing::warn!(
				issuer = %issuer,
				jwks_uri = %jwks_uri,
				reason = %reason,
				"discovery failed; falling back to a derived JWKS endpoint"
			);

			DiscoveryDocument {
				issuer: issuer.to_owned(),
				jwks_uri,
				source: DiscoverySource::Fallback,
			}
		},
		Err(reason) => {
			return Err(Error::Discovery { issuer: issuer.to_owned(), reason });
		},
	};

	security::ensure_trusted_endpoint(
		&document.jwks_uri,
		options.require_https,
		&options.allowed_jwks_domains,
	)?;

	tracing::info!(
		issuer = %document.issuer,
		jwks_uri = %document.jwks_uri,
		source = ?document.source,
		"discovery resolved"
	);

	Ok(document)
}

async fn fetch_metadata(
	client: &Client,
	issuer: &str,
	timeout: Duration,
) -> std::result::Result<DiscoveryDocument, String> {
	let url = Url::parse(&format!("{issuer}{WELL_KNOWN_PATH}"))
		.map_err(|err| format!("invalid discovery URL: {err}"))?;
	let metadata = client::fetch_json::<ProviderMetadata>(
		client,
		&url,
		timeout,
		DEFAULT_MAX_RESPONSE_BYTES,
	)
	.await
	.map_err(|err| err.to_string())?
	.body;
	let jwks_uri = metadata
		.jwks_uri
		.map(|uri| uri.trim().to_owned())
		.filter(|uri| !uri.is_empty())
		.ok_or_else(|| "discovery document has no jwks_uri".to_owned())?;
	let jwks_uri = Url::parse(&jwks_uri).map_err(|err| format!("invalid jwks_uri: {err}"))?;
	let reported = metadata
		.issuer
		.map(|value| value.trim().trim_end_matches('/').to_owned())
		.filter(|value| !value.is_empty());

	Ok(DiscoveryDocument {
		issuer: reported.unwrap_or_else(|| issuer.to_owned()),
		jwks_uri,
		source: DiscoverySource::Provider,
	})
}
