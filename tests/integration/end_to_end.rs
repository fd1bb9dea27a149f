//! Requests flowing through the router, middleware, and validator.

// std
use std::{borrow::Borrow, sync::Arc, time::Duration};
// crates.io
use axum::{
	Router,
	body::Body,
	http::{Request, StatusCode, header::AUTHORIZATION},
	middleware::from_fn_with_state,
	routing::get,
};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use metrics_util::{
	CompositeKey, MetricKind,
	debugging::{DebugValue, DebuggingRecorder},
};
use oidc_guard::{
	AuthConfig, AuthError, AuthGate, Authenticator, IssuerMatcher, RequiredScopes,
	http::client::build_client,
	keys::{KeyStore, KeyStoreOptions},
	middleware::{authenticate, require_scopes},
	routes,
};
use serde_json::{Value, json};
use tower::ServiceExt;
use url::Url;
use wiremock::MockServer;
// self
use crate::support::{self, AUDIENCE, EC_PEM, PRIMARY_PEM};

async fn call(app: Router, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
	let mut request = Request::builder().uri(uri);

	if let Some(token) = token {
		request = request.header(AUTHORIZATION, format!("Bearer {token}"));
	}

	let response = app.oneshot(request.body(Body::empty()).unwrap()).await.unwrap();
	let status = response.status();
	let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();

	(status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn app(server: &MockServer) -> Router {
	let authenticator = support::authenticator(server).await;

	routes::router(AuthGate::configured(Arc::new(authenticator)))
}

#[tokio::test]
async fn valid_token_reaches_the_profile_endpoint() {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let app = app(&server).await;
	let token = support::mint_primary(&support::claims(&server));
	let (status, body) = call(app, "/api/v1/me", Some(&token)).await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["sub"], "user-1");
	assert_eq!(body["email"], "user-1@example.com");
	assert_eq!(body["scopes"], json!(["read", "write"]));
	assert_eq!(body["roles"], json!(["rider"]));
	assert_eq!(body["claims"]["aud"], AUDIENCE);
}

#[tokio::test]
async fn missing_and_expired_tokens_are_rejected() {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let app = app(&server).await;
	let (status, body) = call(app.clone(), "/api/v1/me", None).await;

	assert_eq!(status, StatusCode::UNAUTHORIZED);
	assert_eq!(body, json!({ "error": "missing bearer token", "code": "missing_token" }));

	let mut claims = support::claims(&server);

	claims["exp"] = json!(support::now() - 60);

	let (status, body) = call(app, "/api/v1/me", Some(&support::mint_primary(&claims))).await;

	assert_eq!(status, StatusCode::UNAUTHORIZED);
	assert_eq!(body, json!({ "error": "expired or not yet valid", "code": "token_expired" }));
}

#[tokio::test]
async fn issuer_audience_and_time_checks() {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let authenticator = support::authenticator(&server).await;
	let base = support::claims(&server);
	let with = |field: &str, value: Value| {
		let mut claims = base.clone();

		claims[field] = value;

		support::mint_primary(&claims)
	};

	assert!(authenticator.validate(&support::mint_primary(&base)).await.is_ok());
	// Trailing slash on the token issuer canonicalizes away.
	assert!(authenticator.validate(&with("iss", json!(format!("{}/", server.uri())))).await.is_ok());
	assert_eq!(
		authenticator.validate(&with("iss", json!("https://other.example.com"))).await,
		Err(AuthError::InvalidIssuer)
	);
	assert_eq!(
		authenticator.validate(&with("aud", json!("someone-else"))).await,
		Err(AuthError::InvalidAudience)
	);
	assert!(
		authenticator.validate(&with("aud", json!(["someone-else", AUDIENCE]))).await.is_ok()
	);
	assert_eq!(
		authenticator.validate(&with("nbf", json!(support::now() + 600))).await,
		Err(AuthError::TokenNotYetValid)
	);
}

#[tokio::test]
async fn audience_is_not_checked_when_unset() {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	support::mount_discovery(&server, "", &server.uri()).await;
	support::mount_jwks(&server, support::jwks_primary(), 2).await;

	let unset = Authenticator::new(AuthConfig::new(server.uri()).with_require_https(false))
		.await
		.expect("authenticator");
	let jwks_uri = Url::parse(&format!("{}/jwks", server.uri())).unwrap();
	let keys = KeyStore::connect(build_client().unwrap(), jwks_uri, KeyStoreOptions::default())
		.await
		.expect("store");
	let blank = Authenticator::from_parts(
		IssuerMatcher::new(server.uri(), false),
		Some("   ".into()),
		Duration::ZERO,
		keys,
	);
	let mut claims = support::claims(&server);

	assert_eq!(unset.audience(), None);
	assert_eq!(blank.audience(), None);

	for aud in [json!("someone-else"), json!(["a", "b"]), json!(AUDIENCE)] {
		claims["aud"] = aud;

		let token = support::mint_primary(&claims);

		assert!(unset.validate(&token).await.is_ok());
		assert!(blank.validate(&token).await.is_ok());
	}

	claims.as_object_mut().unwrap().remove("aud");

	let token = support::mint_primary(&claims);

	assert!(unset.validate(&token).await.is_ok());
	assert!(blank.validate(&token).await.is_ok());

	server.verify().await;
}

#[tokio::test]
async fn signature_level_failures_are_invalid_tokens() {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let authenticator = support::authenticator(&server).await;
	let claims = support::claims(&server);
	let mut hmac = Header::new(Algorithm::HS256);

	hmac.kid = Some("primary".into());

	let hmac_token =
		jsonwebtoken::encode(&hmac, &claims, &EncodingKey::from_secret(b"shared-secret")).unwrap();

	assert_eq!(authenticator.validate(&hmac_token).await, Err(AuthError::UnsupportedAlgorithm));
	assert_eq!(authenticator.validate("not-a-jwt").await, Err(AuthError::UnsupportedAlgorithm));
	assert_eq!(
		authenticator.validate(&support::mint(PRIMARY_PEM, None, Algorithm::RS256, &claims)).await,
		Err(AuthError::InvalidSignature)
	);
	// The key pins RS256; the same key material under PS256 is refused.
	assert_eq!(
		authenticator
			.validate(&support::mint(PRIMARY_PEM, Some("primary"), Algorithm::PS256, &claims))
			.await,
		Err(AuthError::InvalidSignature)
	);

	let mut tampered = support::mint_primary(&claims);

	tampered.push('x');

	assert_eq!(authenticator.validate(&tampered).await, Err(AuthError::InvalidSignature));
}

#[tokio::test]
async fn elliptic_curve_keys_verify() {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	support::mount_discovery(&server, "", &server.uri()).await;
	support::mount_jwks(&server, support::jwks_mixed(), 1).await;

	let authenticator = Authenticator::new(support::config(&server)).await.expect("authenticator");
	let claims = support::claims(&server);
	let mut header = Header::new(Algorithm::ES256);

	header.kid = Some("ec-primary".into());

	let token =
		jsonwebtoken::encode(&header, &claims, &EncodingKey::from_ec_pem(EC_PEM).unwrap()).unwrap();

	assert!(authenticator.validate(&token).await.is_ok());
	assert!(authenticator.validate(&support::mint_primary(&claims)).await.is_ok());
	assert_eq!(
		authenticator.key_status().await.kids,
		vec!["ec-primary".to_string(), "primary".to_string()]
	);
}

#[tokio::test]
async fn scope_guard_runs_after_authentication() {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let gate = AuthGate::configured(Arc::new(support::authenticator(&server).await));
	let app = Router::new()
		.route("/fleet", get(|| async { "ok" }))
		.route_layer(from_fn_with_state(Arc::new(RequiredScopes::new(["read"])), require_scopes))
		.route_layer(from_fn_with_state(gate, authenticate));
	let mut claims = support::claims(&server);

	claims["scope"] = json!("write");

	let (status, body) = call(app.clone(), "/fleet", Some(&support::mint_primary(&claims))).await;

	assert_eq!(status, StatusCode::FORBIDDEN);
	assert_eq!(body, json!({ "error": "missing scope: read", "code": "missing_scope" }));

	let token = support::mint_primary(&support::claims(&server));
	let response = app
		.oneshot(
			Request::builder()
				.uri("/fleet")
				.header(AUTHORIZATION, format!("Bearer {token}"))
				.body(Body::empty())
				.unwrap(),
		)
		.await
		.unwrap();

	assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn tenant_relaxed_matching_is_opt_in() {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let issuer = format!("{}/t/acme/oauth2/token", server.uri());

	support::mount_discovery(&server, "/t/acme", &issuer).await;
	support::mount_jwks(&server, support::jwks_primary(), 2).await;

	let config = AuthConfig::new(format!("{}/t/acme", server.uri()))
		.with_require_https(false)
		.with_audience(AUDIENCE);
	let strict = Authenticator::new(config.clone()).await.expect("strict");
	let relaxed = Authenticator::new(config.with_relaxed_tenant_match(true)).await.expect("relaxed");
	let mut claims = support::claims(&server);

	claims["iss"] = json!("https://api.idp.example.com/t/acme/oauth2/token");

	let token = support::mint_primary(&claims);

	assert_eq!(strict.issuer(), issuer);
	assert_eq!(strict.validate(&token).await, Err(AuthError::InvalidIssuer));
	assert!(relaxed.validate(&token).await.is_ok());

	claims["iss"] = json!("https://api.idp.example.com/t/acme-evil/oauth2/token");

	assert_eq!(
		relaxed.validate(&support::mint_primary(&claims)).await,
		Err(AuthError::InvalidIssuer)
	);
}

#[tokio::test]
async fn ready_reports_configured_auth() {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let (status, body) = call(app(&server).await, "/ready", None).await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(body, json!({ "auth_configured": true, "issuer": server.uri(), "keys": 1 }));
}

#[tokio::test]
async fn unreachable_discovery_degrades_the_gate() {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let gate = AuthGate::from_config(Some(support::config(&server))).await;
	let (status, body) = call(routes::router(gate), "/ready", None).await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["auth_configured"], false);
	assert_eq!(body["issuer"], server.uri());
	assert!(body["error"].as_str().is_some_and(|error| error.contains("Discovery failed")));
}

#[tokio::test]
async fn validation_outcomes_are_counted() {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let authenticator = support::authenticator(&server).await;
	let recorder = DebuggingRecorder::new();
	let snapshotter = recorder.snapshotter();
	let _guard = metrics::set_default_local_recorder(&recorder);
	let mut expired = support::claims(&server);

	expired["exp"] = json!(support::now() - 60);

	assert!(authenticator.validate(&support::mint_primary(&support::claims(&server))).await.is_ok());
	assert!(authenticator.validate(&support::mint_primary(&expired)).await.is_err());
	assert!(authenticator.validate(&support::mint_primary(&expired)).await.is_err());

	let counters: Vec<(CompositeKey, DebugValue)> = snapshotter
		.snapshot()
		.into_vec()
		.into_iter()
		.map(|(key, _, _, value)| (key, value))
		.collect();
	let count = |outcome: &str| {
		counters
			.iter()
			.filter(|(key, _)| {
				key.kind() == MetricKind::Counter
					&& Borrow::<str>::borrow(key.key().name()) == "oidc_guard_validations_total"
					&& key.key().labels().any(|l| l.key() == "outcome" && l.value() == outcome)
			})
			.map(|(_, value)| match value {
				DebugValue::Counter(value) => *value,
				_ => 0,
			})
			.sum::<u64>()
	};

	assert_eq!(count("accepted"), 1);
	assert_eq!(count("token_expired"), 2);
}
