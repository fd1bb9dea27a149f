//! Minimal service routes: liveness, readiness, and the caller's profile.

// crates.io
use axum::{
	Json, Router,
	extract::State,
	middleware::from_fn_with_state,
	routing::get,
};
use serde::Serialize;
use serde_json::{Value, json};
// self
use crate::{
	claims::Claims,
	middleware::{AuthGate, Authenticated, authenticate},
};

/// Profile returned by `GET /api/v1/me`.
#[derive(Debug, Serialize)]
pub struct Profile {
	/// Subject identifier.
	pub sub: Option<String>,
	/// Email address.
	pub email: Option<String>,
	/// Granted scopes.
	pub scopes: Vec<String>,
	/// Role or group memberships.
	pub roles: Vec<String>,
	/// Every verified claim.
	pub claims: Claims,
}
impl From<Claims> for Profile {
	fn from(claims: Claims) -> Self {
		Self {
			sub: claims.subject().map(str::to_owned),
			email: claims.email().map(str::to_owned),
			scopes: claims.scopes().into_iter().collect(),
			roles: claims.roles(),
			claims,
		}
	}
}

/// Build the service router around `gate`.
///
/// `/health` and `/ready` are public; everything under `/api/v1` requires a valid token.
pub fn router(gate: AuthGate) -> Router {
	let protected = Router::new()
		.route("/api/v1/me", get(me))
		.route_layer(from_fn_with_state(gate.clone(), authenticate));

	Router::new()
		.route("/health", get(health))
		.route("/ready", get(ready))
		.with_state(gate)
		.merge(protected)
}

async fn health() -> Json<Value> {
	Json(json!({ "status": "ok" }))
}

async fn ready(State(gate): State<AuthGate>) -> Json<Value> {
	let mut body = json!({
		"auth_configured": gate.is_configured(),
		"issuer": gate.issuer().unwrap_or_default(),
	});

	if let Some(error) = gate.error() {
		body["error"] = json!(error);
	}
	if let Some(authenticator) = gate.authenticator() {
		body["keys"] = json!(authenticator.key_status().await.key_count);
	}

	Json(body)
}

async fn me(Authenticated(claims): Authenticated) -> Json<Profile> {
	Json(Profile::from(claims))
}
