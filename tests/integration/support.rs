//! Mock provider and token minting helpers.

// crates.io
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use oidc_guard::{AuthConfig, Authenticator};
use serde_json::{Value, json};
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};

pub const AUDIENCE: &str = "transit-api";
pub const PRIMARY_PEM: &[u8] = include_bytes!("../fixtures/rsa_primary.pem");
pub const ROTATED_PEM: &[u8] = include_bytes!("../fixtures/rsa_rotated.pem");
pub const EC_PEM: &[u8] = include_bytes!("../fixtures/ec_p256.pem");

pub fn jwks_primary() -> Value {
	serde_json::from_str(include_str!("../fixtures/jwks_primary.json")).expect("fixture")
}

pub fn jwks_mixed() -> Value {
	serde_json::from_str(include_str!("../fixtures/jwks_mixed.json")).expect("fixture")
}

pub fn jwks_rotated() -> Value {
	serde_json::from_str(include_str!("../fixtures/jwks_rotated.json")).expect("fixture")
}

pub fn now() -> i64 {
	Utc::now().timestamp()
}

/// Serve a discovery document under `prefix` that reports `issuer` and `{server}/jwks`.
pub async fn mount_discovery(server: &MockServer, prefix: &str, issuer: &str) {
	let body = json!({
		"issuer": issuer,
		"jwks_uri": format!("{}/jwks", server.uri()),
	});

	Mock::given(method("GET"))
		.and(path(format!("{prefix}/.well-known/openid-configuration")))
		.respond_with(ResponseTemplate::new(200).set_body_json(body))
		.mount(server)
		.await;
}

/// Serve `body` from `/jwks` for the first `times` requests.
pub async fn mount_jwks(server: &MockServer, body: Value, times: u64) {
	Mock::given(method("GET"))
		.and(path("/jwks"))
		.respond_with(ResponseTemplate::new(200).set_body_json(body))
		.up_to_n_times(times)
		.expect(times)
		.mount(server)
		.await;
}

pub fn config(server: &MockServer) -> AuthConfig {
	AuthConfig::new(server.uri()).with_require_https(false).with_audience(AUDIENCE)
}

/// Discovery plus one JWKS fetch, then build the authenticator.
pub async fn authenticator(server: &MockServer) -> Authenticator {
	mount_discovery(server, "", &server.uri()).await;
	mount_jwks(server, jwks_primary(), 1).await;

	Authenticator::new(config(server)).await.expect("authenticator")
}

pub fn claims(server: &MockServer) -> Value {
	let now = now();

	json!({
		"iss": server.uri(),
		"aud": AUDIENCE,
		"sub": "user-1",
		"email": "user-1@example.com",
		"scope": "read write",
		"roles": ["rider"],
		"iat": now,
		"exp": now + 300,
	})
}

pub fn mint(pem: &[u8], kid: Option<&str>, algorithm: Algorithm, claims: &Value) -> String {
	let mut header = Header::new(algorithm);

	header.kid = kid.map(str::to_owned);

	jsonwebtoken::encode(&header, claims, &EncodingKey::from_rsa_pem(pem).expect("pem"))
		.expect("token")
}

pub fn mint_primary(claims: &Value) -> String {
	mint(PRIMARY_PEM, Some("primary"), Algorithm::RS256, claims)
}
