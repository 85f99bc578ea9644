//! Broker-level error types shared by the token store, scheduler, and upstream services.

// std
use std::time::Duration as StdDuration;
// self
use crate::{_prelude::*, auth::ApiScope};

/// Broker-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical broker error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Durable token cache failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// Token endpoint refused to issue a token for the scope.
	#[error("Token endpoint failed for the {scope} scope: {message}.")]
	UpstreamAuth {
		/// Scope whose token could not be obtained.
		scope: ApiScope,
		/// Endpoint- or broker-supplied message.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Upstream kept answering 429 after every retry was spent.
	#[error("Upstream rate limit persisted after retries (status {status}).")]
	RateLimited {
		/// HTTP status code (normally 429).
		status: u16,
		/// Retry-After hint from the last response, if supplied.
		retry_after: Option<StdDuration>,
	},
	/// Upstream returned a non-success status that is not retried.
	#[error("Upstream returned status {status}: {body}.")]
	Upstream {
		/// HTTP status code.
		status: u16,
		/// Response body preview for diagnostics.
		body: String,
	},
	/// Outbound call exceeded its deadline.
	#[error("Upstream call timed out.")]
	Timeout,
	/// Upstream answered with JSON that does not match the expected shape.
	#[error("Upstream returned malformed JSON.")]
	Parse {
		/// Structured parsing failure including the JSON path.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
	/// Request scheduler was shut down before the call could be admitted.
	#[error("Request scheduler is shut down.")]
	SchedulerClosed,
	/// Caller-supplied parameters are unusable.
	#[error("Invalid request: {reason}.")]
	InvalidRequest {
		/// Human-readable validation failure.
		reason: String,
	},
}
impl Error {
	/// HTTP status the calling layer should answer with for this error.
	pub fn http_status(&self) -> u16 {
		match self {
			Self::RateLimited { .. } => 429,
			Self::Timeout => 504,
			Self::SchedulerClosed => 503,
			Self::InvalidRequest { .. } => 400,
			Self::UpstreamAuth { .. } | Self::Upstream { .. } | Self::Parse { .. } => 502,
			Self::Transport(_) => 502,
			Self::Storage(_) | Self::Config(_) => 500,
		}
	}

	/// Returns `true` when the error came from an upstream 429.
	pub fn is_rate_limited(&self) -> bool {
		matches!(self, Self::RateLimited { .. })
	}

	/// Returns `true` for token endpoint failures.
	pub fn is_auth(&self) -> bool {
		matches!(self, Self::UpstreamAuth { .. })
	}

	pub(crate) fn invalid_request(reason: impl Into<String>) -> Self {
		Self::InvalidRequest { reason: reason.into() }
	}
}

/// Configuration and validation failures raised at startup.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// Client id or client secret is absent or blank.
	#[error("Upstream client credentials are missing: {field} is not set.")]
	MissingCredentials {
		/// Name of the missing setting.
		field: &'static str,
	},
	/// A configured URL cannot be parsed.
	#[error("Setting `{field}` is not a valid URL.")]
	InvalidUrl {
		/// Name of the offending setting.
		field: &'static str,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Remote endpoints must use HTTPS.
	#[error("Setting `{field}` must use HTTPS: {url}.")]
	InsecureUrl {
		/// Name of the offending setting.
		field: &'static str,
		/// URL that failed validation.
		url: String,
	},
	/// A numeric setting is outside its accepted range.
	#[error("Setting `{field}` is out of range: {reason}.")]
	OutOfRange {
		/// Name of the offending setting.
		field: &'static str,
		/// Why the value was rejected.
		reason: &'static str,
	},
	/// Environment source could not be read or deserialized.
	#[error(transparent)]
	Environment(#[from] config::ConfigError),
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures.
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the upstream.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}
