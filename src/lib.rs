//! OIDC bearer-token verification for axum services: discovery, background JWKS refresh,
//! tenant-aware issuer matching, tolerant claims, and scope guards.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod claims;
pub mod config;
pub mod discovery;
pub mod guard;
pub mod http;
pub mod issuer;
pub mod keys;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod security;
pub mod validator;

mod error;
mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use chrono::{DateTime, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}

#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;
pub use crate::{
	claims::{ClaimValue, Claims},
	config::AuthConfig,
	error::{Error, Result},
	guard::RequiredScopes,
	issuer::IssuerMatcher,
	middleware::{AuthGate, Authenticated},
	validator::{AuthError, Authenticator},
};

/// Install a `tracing` subscriber filtered by `RUST_LOG`, defaulting to `info`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
	let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
