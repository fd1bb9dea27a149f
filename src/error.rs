//! Crate-wide error types and `Result` alias.

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Construction and configuration errors.
///
/// Per-request token failures are reported through [`crate::AuthError`] instead; nothing in this
/// enum is ever rendered to a caller of a protected endpoint.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	Serde(#[from] serde_json::Error),
	#[error(transparent)]
	Url(#[from] url::ParseError),

	#[error("Discovery failed for {issuer}: {reason}")]
	Discovery { issuer: String, reason: String },
	#[error("Upstream HTTP status {status} from {url}")]
	HttpStatus { status: http::StatusCode, url: url::Url },
	#[error("Metrics error: {0}")]
	Metrics(String),
	#[error("Security violation: {0}")]
	Security(String),
	#[error("Validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
}
#[cfg(feature = "prometheus")]
impl From<metrics_exporter_prometheus::BuildError> for Error {
	fn from(value: metrics_exporter_prometheus::BuildError) -> Self {
		Self::Metrics(value.to_string())
	}
}
