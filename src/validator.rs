//! Bearer-token verification against a discovered provider.

// crates.io
use axum::{
	Json,
	response::{IntoResponse, Response},
};
use http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use jsonwebtoken::{Algorithm, Validation};
use serde_json::json;
// self
use crate::{
	_prelude::*,
	claims::Claims,
	config::AuthConfig,
	discovery::{self, DiscoveryOptions},
	http::client::build_client,
	issuer::IssuerMatcher,
	keys::{KeyStore, KeyStoreOptions, KeyStoreStatus},
	metrics,
};

/// Token algorithms accepted in the JOSE header. Symmetric algorithms are never accepted.
pub const ALLOWED_ALGORITHMS: [Algorithm; 9] = [
	Algorithm::RS256,
	Algorithm::RS384,
	Algorithm::RS512,
	Algorithm::PS256,
	Algorithm::PS384,
	Algorithm::PS512,
	Algorithm::ES256,
	Algorithm::ES384,
	Algorithm::EdDSA,
];

const NOT_CONFIGURED_MESSAGE: &str = "OIDC authentication is not configured or discovery failed. \
	Ensure OIDC_ISSUER is set and reachable.";

/// Per-request authentication and authorization failures.
///
/// The display string is the public message; no internal detail leaks to the caller.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
	/// No usable `Authorization: Bearer` header.
	#[error("missing bearer token")]
	MissingToken,
	/// Unparseable header or an algorithm outside [`ALLOWED_ALGORITHMS`].
	#[error("invalid token")]
	UnsupportedAlgorithm,
	/// Unknown `kid` or failed signature verification.
	#[error("invalid token")]
	InvalidSignature,
	/// `iss` does not match the configured issuer.
	#[error("invalid issuer")]
	InvalidIssuer,
	/// `aud` does not contain the configured audience.
	#[error("invalid audience")]
	InvalidAudience,
	/// `exp` is in the past.
	#[error("expired or not yet valid")]
	TokenExpired,
	/// `nbf` is in the future.
	#[error("expired or not yet valid")]
	TokenNotYetValid,
	/// A required scope is absent.
	#[error("missing scope: {0}")]
	MissingScope(String),
	/// A protected handler ran without verified claims.
	#[error("no auth context")]
	NotAuthenticated,
	/// Authentication could not be set up.
	#[error("auth_not_configured")]
	NotConfigured,
}
impl AuthError {
	/// Stable machine-readable code.
	pub fn code(&self) -> &'static str {
		match self {
			Self::MissingToken => "missing_token",
			Self::UnsupportedAlgorithm => "unsupported_algorithm",
			Self::InvalidSignature => "invalid_signature",
			Self::InvalidIssuer => "invalid_issuer",
			Self::InvalidAudience => "invalid_audience",
			Self::TokenExpired => "token_expired",
			Self::TokenNotYetValid => "token_not_yet_valid",
			Self::MissingScope(_) => "missing_scope",
			Self::NotAuthenticated => "not_authenticated",
			Self::NotConfigured => "auth_not_configured",
		}
	}

	/// HTTP status the failure maps to.
	pub fn status(&self) -> StatusCode {
		match self {
			Self::MissingScope(_) => StatusCode::FORBIDDEN,
			Self::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
			_ => StatusCode::UNAUTHORIZED,
		}
	}
}
impl IntoResponse for AuthError {
	fn into_response(self) -> Response {
		let body = match &self {
			Self::NotConfigured => json!({
				"error": self.to_string(),
				"code": self.code(),
				"message": NOT_CONFIGURED_MESSAGE,
			}),
			_ => json!({ "error": self.to_string(), "code": self.code() }),
		};

		(self.status(), Json(body)).into_response()
	}
}

/// Extract the bearer token from the `Authorization` header.
///
/// The scheme is matched case-insensitively and the remainder must be non-empty after trimming.
pub fn bearer_token(headers: &HeaderMap) -> std::result::Result<&str, AuthError> {
	let value = headers
		.get(AUTHORIZATION)
		.and_then(|value| value.to_str().ok())
		.ok_or(AuthError::MissingToken)?
		.trim();
	let (scheme, token) = value.split_once(' ').ok_or(AuthError::MissingToken)?;
	let token = token.trim();

	if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
		return Err(AuthError::MissingToken);
	}

	Ok(token)
}

/// Verifies bearer tokens issued by one identity provider.
///
/// Built once at startup and shared behind an `Arc`; only the key store changes afterwards.
#[derive(Debug)]
pub struct Authenticator {
	matcher: IssuerMatcher,
	audience: Option<String>,
	leeway: Duration,
	keys: KeyStore,
}
impl Authenticator {
	/// Run discovery and the initial key fetch for `config`.
	#[tracing::instrument(skip(config), fields(issuer = %config.normalized_issuer()))]
	pub async fn new(config: AuthConfig) -> Result<Self> {
		config.validate()?;

		let client = build_client()?;
		let options = DiscoveryOptions {
			timeout: config.discovery_timeout,
			allow_fallback: config.jwks_fallback,
			require_https: config.require_https,
			allowed_jwks_domains: config.allowed_jwks_domains.clone(),
		};
		let document = discovery::resolve(&client, config.normalized_issuer(), &options).await?;
		let keys = KeyStore::connect(
			client,
			document.jwks_uri,
			KeyStoreOptions {
				refresh_interval: config.refresh_interval(),
				attempt_timeout: config.refresh_timeout,
				..Default::default()
			},
		)
		.await?;
		let leeway = config.leeway();
		let authenticator = Self::from_parts(
			IssuerMatcher::new(document.issuer, config.relaxed_tenant_match),
			config.audience,
			leeway,
			keys,
		);

		tracing::info!(
			issuer = authenticator.issuer(),
			tenant = authenticator.matcher.tenant(),
			audience = authenticator.audience.as_deref(),
			"authenticator ready"
		);

		Ok(authenticator)
	}

	/// Assemble an authenticator from already-built parts.
	pub fn from_parts(
		matcher: IssuerMatcher,
		audience: Option<String>,
		leeway: Duration,
		keys: KeyStore,
	) -> Self {
		let audience = audience.map(|aud| aud.trim().to_owned()).filter(|aud| !aud.is_empty());

		Self { matcher, audience, leeway, keys }
	}

	/// Issuer tokens are validated against.
	pub fn issuer(&self) -> &str {
		self.matcher.issuer()
	}

	/// Expected audience, when one is enforced.
	pub fn audience(&self) -> Option<&str> {
		self.audience.as_deref()
	}

	/// Key store backing signature verification.
	pub fn keys(&self) -> &KeyStore {
		&self.keys
	}

	/// Status of the key store.
	pub async fn key_status(&self) -> KeyStoreStatus {
		self.keys.status().await
	}

	/// Extract and validate the bearer token carried by `headers`.
	pub async fn authenticate(&self, headers: &HeaderMap) -> std::result::Result<Claims, AuthError> {
		let token = match bearer_token(headers) {
			Ok(token) => token,
			Err(err) => {
				self.record(&err);

				return Err(err);
			},
		};

		self.validate(token).await
	}

	/// Validate a compact JWS and return its claims.
	#[tracing::instrument(skip_all, fields(issuer = self.matcher.issuer()))]
	pub async fn validate(&self, token: &str) -> std::result::Result<Claims, AuthError> {
		let result = self.verify(token).await;

		match &result {
			Ok(claims) => {
				metrics::record_validation(self.matcher.issuer(), "accepted");
				tracing::debug!(sub = claims.subject(), "token accepted");
			},
			Err(err) => self.record(err),
		}

		result
	}

	fn record(&self, err: &AuthError) {
		metrics::record_validation(self.matcher.issuer(), err.code());
		tracing::debug!(reason = err.code(), "token rejected");
	}

	async fn verify(&self, token: &str) -> std::result::Result<Claims, AuthError> {
		let header =
			jsonwebtoken::decode_header(token).map_err(|_| AuthError::UnsupportedAlgorithm)?;

		if !ALLOWED_ALGORITHMS.contains(&header.alg) {
			return Err(AuthError::UnsupportedAlgorithm);
		}

		let kid = header.kid.as_deref().ok_or(AuthError::InvalidSignature)?;
		let key = self.keys.resolve(kid).await.ok_or(AuthError::InvalidSignature)?;

		if key.algorithm().is_some_and(|pinned| pinned != header.alg) {
			return Err(AuthError::InvalidSignature);
		}

		let claims = jsonwebtoken::decode::<Claims>(
			token,
			key.decoding_key(),
			&signature_only(header.alg),
		)
		.map_err(|err| {
			tracing::debug!(kid, error = %err, "signature verification failed");

			AuthError::InvalidSignature
		})?
		.claims;

		if !claims.issuer().is_some_and(|iss| self.matcher.matches(iss)) {
			return Err(AuthError::InvalidIssuer);
		}
		if let Some(audience) = &self.audience
			&& !claims.audiences().contains(&audience.as_str())
		{
			return Err(AuthError::InvalidAudience);
		}

		check_time_window(&claims, Utc::now().timestamp(), self.leeway)?;

		Ok(claims)
	}
}

fn signature_only(algorithm: Algorithm) -> Validation {
	let mut validation = Validation::new(algorithm);

	validation.validate_exp = false;
	validation.validate_nbf = false;
	validation.validate_aud = false;
	validation.required_spec_claims.clear();

	validation
}

fn check_time_window(
	claims: &Claims,
	now: i64,
	leeway: Duration,
) -> std::result::Result<(), AuthError> {
	let leeway = i64::try_from(leeway.as_secs()).unwrap_or(i64::MAX);

	if let Some(exp) = claims.expires_at()
		&& now > exp.saturating_add(leeway)
	{
		return Err(AuthError::TokenExpired);
	}
	if let Some(nbf) = claims.not_before()
		&& now.saturating_add(leeway) < nbf
	{
		return Err(AuthError::TokenNotYetValid);
	}

	Ok(())
}
