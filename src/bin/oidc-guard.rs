//! Demo service exposing `/health`, `/ready`, and the protected `/api/v1/me`.

// std
use std::{env, net::SocketAddr};
// crates.io
use oidc_guard::{AuthConfig, AuthGate, routes};

const DEFAULT_PORT: u16 = 8080;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	oidc_guard::init_tracing();

	#[cfg(feature = "prometheus")]
	oidc_guard::install_default_exporter()?;

	let gate = AuthGate::from_config(AuthConfig::from_env()).await;
	let port = env::var("PORT").ok().and_then(|port| port.trim().parse().ok()).unwrap_or(DEFAULT_PORT);
	let addr = SocketAddr::from(([0, 0, 0, 0], port));
	let listener = tokio::net::TcpListener::bind(addr).await?;

	tracing::info!(%addr, auth_configured = gate.is_configured(), "listening");

	let app = routes::router(gate);
	#[cfg(feature = "prometheus")]
	let app = app.route(
		"/metrics",
		axum::routing::get(|| async {
			oidc_guard::metrics::prometheus_handle().map(|handle| handle.render()).unwrap_or_default()
		}),
	);

	axum::serve(listener, app).await?;

	Ok(())
}
