//! Axum boundary: authentication middleware, scope guard, and the claims extractor.

// crates.io
use axum::{
	extract::{FromRequestParts, Request, State},
	http::request::Parts,
	middleware::Next,
	response::{IntoResponse, Response},
};
// self
use crate::{
	_prelude::*,
	claims::Claims,
	config::AuthConfig,
	guard::RequiredScopes,
	validator::{AuthError, Authenticator},
};

/// Router state: a ready authenticator, or the reason authentication is unavailable.
#[derive(Clone, Debug, Default)]
pub struct AuthGate {
	authenticator: Option<Arc<Authenticator>>,
	issuer: Option<String>,
	error: Option<String>,
}
impl AuthGate {
	/// Build the gate from optional configuration.
	///
	/// Never fails: a missing config or a failed construction leaves the gate in degraded mode,
	/// where protected routes answer `503 auth_not_configured`.
	pub async fn from_config(config: Option<AuthConfig>) -> Self {
		let Some(config) = config else {
			tracing::warn!("OIDC_ISSUER is not set; authentication is disabled");

			return Self::disabled();
		};
		let issuer = config.normalized_issuer().to_owned();

		match Authenticator::new(config).await {
			Ok(authenticator) => Self::configured(Arc::new(authenticator)),
			Err(err) => {
				tracing::warn!(issuer = %issuer, error = %err, "authentication setup failed");

				Self { authenticator: None, issuer: Some(issuer), error: Some(err.to_string()) }
			},
		}
	}

	/// Gate with no authenticator.
	pub fn disabled() -> Self {
		Self::default()
	}

	/// Gate backed by a ready authenticator.
	pub fn configured(authenticator: Arc<Authenticator>) -> Self {
		let issuer = Some(authenticator.issuer().to_owned());

		Self { authenticator: Some(authenticator), issuer, error: None }
	}

	/// The authenticator, when setup succeeded.
	pub fn authenticator(&self) -> Option<&Arc<Authenticator>> {
		self.authenticator.as_ref()
	}

	/// Configured issuer, even when setup failed.
	pub fn issuer(&self) -> Option<&str> {
		self.issuer.as_deref()
	}

	/// Why setup failed.
	pub fn error(&self) -> Option<&str> {
		self.error.as_deref()
	}

	/// Whether requests can be authenticated.
	pub fn is_configured(&self) -> bool {
		self.authenticator.is_some()
	}
}

/// Verify the bearer token and insert [`Claims`] into the request extensions.
pub async fn authenticate(
	State(gate): State<AuthGate>,
	mut request: Request,
	next: Next,
) -> Response {
	let Some(authenticator) = gate.authenticator() else {
		return AuthError::NotConfigured.into_response();
	};

	match authenticator.authenticate(request.headers()).await {
		Ok(claims) => {
			request.extensions_mut().insert(claims);

			next.run(request).await
		},
		Err(err) => err.into_response(),
	}
}

/// Reject requests whose claims lack any of the required scopes.
///
/// Must run after [`authenticate`].
pub async fn require_scopes(
	State(required): State<Arc<RequiredScopes>>,
	request: Request,
	next: Next,
) -> Response {
	let Some(claims) = request.extensions().get::<Claims>() else {
		return AuthError::NotAuthenticated.into_response();
	};

	match required.check(claims) {
		Ok(()) => next.run(request).await,
		Err(err) => {
			tracing::debug!(reason = %err, sub = claims.subject(), "scope check failed");

			err.into_response()
		},
	}
}

/// Extractor for the verified claims of the current request.
#[derive(Clone, Debug)]
pub struct Authenticated(pub Claims);
impl<S> FromRequestParts<S> for Authenticated
where
	S: Send + Sync,
{
	type Rejection = AuthError;

	async fn from_request_parts(
		parts: &mut Parts,
		_state: &S,
	) -> std::result::Result<Self, Self::Rejection> {
		parts.extensions.get::<Claims>().cloned().map(Authenticated).ok_or(AuthError::NotAuthenticated)
	}
}
