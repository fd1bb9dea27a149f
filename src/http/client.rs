//! Outbound HTTP client used for discovery and JWKS retrieval.

// crates.io
use http::{StatusCode, header::ACCEPT};
use reqwest::{Client, redirect::Policy};
use serde::de::DeserializeOwned;
use url::Url;
// self
use crate::_prelude::*;

/// Maximum redirect depth followed for provider requests.
pub const MAX_REDIRECTS: usize = 5;
/// Size guard for provider documents (1 MiB).
pub const DEFAULT_MAX_RESPONSE_BYTES: u64 = 1_048_576;

/// Build the reqwest client shared by every provider request.
pub fn build_client() -> Result<Client> {
	let client = Client::builder()
		.redirect(Policy::limited(MAX_REDIRECTS))
		.user_agent(format!("oidc-guard/{}", env!("CARGO_PKG_VERSION")))
		.connect_timeout(Duration::from_secs(5))
		.build()?;

	Ok(client)
}

/// Metadata returned alongside a fetched document.
#[derive(Clone, Debug)]
pub struct Fetched<T> {
	/// Parsed response body.
	pub body: T,
	/// Status returned by the upstream.
	pub status: StatusCode,
	/// Round-trip duration of the exchange.
	pub elapsed: Duration,
}

/// GET a JSON document with a per-attempt timeout and a response size guard.
pub async fn fetch_json<T>(
	client: &Client,
	url: &Url,
	attempt_timeout: Duration,
	max_response_bytes: u64,
) -> Result<Fetched<T>>
where
	T: DeserializeOwned,
{
	let start = Instant::now();
	let mut response = client
		.get(url.clone())
		.header(ACCEPT, "application/json")
		.timeout(attempt_timeout)
		.send()
		.await?;
	let status = response.status();

	if status != StatusCode::OK {
		return Err(Error::HttpStatus { status, url: url.clone() });
	}

	if let Some(declared) = response.content_length()
		&& declared > max_response_bytes
	{
		return Err(oversized(declared, max_response_bytes));
	}

	let mut bytes = Vec::new();

	while let Some(chunk) = response.chunk().await? {
		let size = (bytes.len() + chunk.len()) as u64;

		if size > max_response_bytes {
			return Err(oversized(size, max_response_bytes));
		}

		bytes.extend_from_slice(&chunk);
	}

	let elapsed = start.elapsed();
	let body = serde_json::from_slice(&bytes)?;

	tracing::debug!(url = %url, status = %status, elapsed = ?elapsed, "provider fetch complete");

	Ok(Fetched { body, status, elapsed })
}

fn oversized(size: u64, limit: u64) -> Error {
	Error::Validation {
		field: "max_response_bytes",
		reason: format!("Response size of at least {size} bytes exceeds the guard of {limit} bytes."),
	}
}
