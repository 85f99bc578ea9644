//! Validated runtime configuration for the upstream client.
//!
//! Build it with [`UpstreamConfig::builder`] or load it from `RENTAL_BROKER_*` environment
//! variables with [`UpstreamConfig::from_env`]. Missing client credentials fail fast so the
//! process never serves traffic without them.

// std
use std::{env, path::PathBuf, time::Duration as StdDuration};
// self
use crate::{_prelude::*, auth::ApiScope, error::ConfigError};

const DEFAULT_OPEN_API_TOKEN_URL: &str = "https://open-api.example-pms.com/oauth2/token";
const DEFAULT_BOOKING_TOKEN_URL: &str = "https://booking.example-pms.com/oauth2/token";
const DEFAULT_OPEN_API_BASE_URL: &str = "https://open-api.example-pms.com/v1";
const DEFAULT_BOOKING_BASE_URL: &str = "https://booking.example-pms.com/api";

/// Fully validated settings consumed by [`UpstreamClient`](crate::client::UpstreamClient).
#[derive(Clone)]
pub struct UpstreamConfig {
	/// OAuth client identifier.
	pub client_id: String,
	/// OAuth client secret.
	pub client_secret: String,
	/// Token endpoint for [`ApiScope::OpenApi`].
	pub open_api_token_url: Url,
	/// Token endpoint for [`ApiScope::BookingEngine`].
	pub booking_token_url: Url,
	/// Base URL of the listings/availability API.
	pub open_api_base_url: Url,
	/// Base URL of the booking-engine API (quotes).
	pub booking_base_url: Url,
	/// Maximum simultaneous upstream calls.
	pub max_concurrent: usize,
	/// Minimum spacing between two upstream call starts.
	pub min_interval: StdDuration,
	/// Deadline applied to every outbound request.
	pub request_timeout: StdDuration,
	/// Total attempts (first try included) for rate-limited calls.
	pub retry_max_attempts: u32,
	/// First backoff step.
	pub retry_base_delay: StdDuration,
	/// Backoff ceiling.
	pub retry_max_delay: StdDuration,
	/// Subtracted from `expires_in` when computing a token's expiry.
	pub token_safety_margin: Duration,
	/// Tokens closer than this to expiry are refreshed before use.
	pub token_refresh_window: Duration,
	/// Lifetime of the single-slot listings cache.
	pub listings_ttl: Duration,
	/// Lifetime of availability cache entries.
	pub availability_ttl: Duration,
	/// Lifetime of quote cache entries.
	pub quote_ttl: Duration,
	/// Maximum availability cache entries.
	pub availability_cache_size: usize,
	/// Maximum quote cache entries.
	pub quote_cache_size: usize,
	/// Page size requested from the listings endpoint.
	pub listings_page_size: u32,
	/// Directory holding the durable token documents.
	pub token_cache_dir: PathBuf,
}
impl UpstreamConfig {
	/// Creates a builder seeded with the defaults.
	pub fn builder() -> UpstreamConfigBuilder {
		UpstreamConfigBuilder::default()
	}

	/// Loads settings from `RENTAL_BROKER_*` environment variables on top of the defaults.
	///
	/// `RENTAL_BROKER_CLIENT_ID` and `RENTAL_BROKER_CLIENT_SECRET` are required.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_source(config::Environment::with_prefix("RENTAL_BROKER").try_parsing(true))
	}

	/// Loads settings from any `config` source (environment, file, in-memory map).
	pub fn from_source<S>(source: S) -> Result<Self, ConfigError>
	where
		S: 'static + config::Source + Send + Sync,
	{
		let raw: RawSettings = config::Config::builder()
			.set_default("open_api_token_url", DEFAULT_OPEN_API_TOKEN_URL)?
			.set_default("booking_token_url", DEFAULT_BOOKING_TOKEN_URL)?
			.set_default("open_api_base_url", DEFAULT_OPEN_API_BASE_URL)?
			.set_default("booking_base_url", DEFAULT_BOOKING_BASE_URL)?
			.set_default("max_concurrent", 1)?
			.set_default("min_interval_ms", 1_200)?
			.set_default("request_timeout_ms", 10_000)?
			.set_default("retry_max_attempts", 5)?
			.set_default("retry_base_delay_ms", 500)?
			.set_default("retry_max_delay_ms", 30_000)?
			.set_default("token_safety_margin_secs", 60)?
			.set_default("token_refresh_window_secs", 30)?
			.set_default("listings_ttl_secs", 60)?
			.set_default("availability_ttl_secs", 600)?
			.set_default("quote_ttl_secs", 900)?
			.set_default("availability_cache_size", 500)?
			.set_default("quote_cache_size", 200)?
			.set_default("listings_page_size", 100)?
			.add_source(source)
			.build()?
			.try_deserialize()?;

		raw.into_builder().build()
	}

	/// Token endpoint for the scope.
	pub fn token_url(&self, scope: ApiScope) -> &Url {
		match scope {
			ApiScope::OpenApi => &self.open_api_token_url,
			ApiScope::BookingEngine => &self.booking_token_url,
		}
	}
}
impl Debug for UpstreamConfig {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("UpstreamConfig")
			.field("client_id", &self.client_id)
			.field("client_secret", &"<redacted>")
			.field("open_api_base_url", &self.open_api_base_url.as_str())
			.field("booking_base_url", &self.booking_base_url.as_str())
			.field("max_concurrent", &self.max_concurrent)
			.field("min_interval", &self.min_interval)
			.field("request_timeout", &self.request_timeout)
			.field("retry_max_attempts", &self.retry_max_attempts)
			.finish_non_exhaustive()
	}
}

#[derive(Deserialize)]
struct RawSettings {
	client_id: Option<String>,
	client_secret: Option<String>,
	open_api_token_url: String,
	booking_token_url: String,
	open_api_base_url: String,
	booking_base_url: String,
	max_concurrent: usize,
	min_interval_ms: u64,
	request_timeout_ms: u64,
	retry_max_attempts: u32,
	retry_base_delay_ms: u64,
	retry_max_delay_ms: u64,
	token_safety_margin_secs: i64,
	token_refresh_window_secs: i64,
	listings_ttl_secs: i64,
	availability_ttl_secs: i64,
	quote_ttl_secs: i64,
	availability_cache_size: usize,
	quote_cache_size: usize,
	listings_page_size: u32,
	token_cache_dir: Option<PathBuf>,
}
impl RawSettings {
	fn into_builder(self) -> UpstreamConfigBuilder {
		let mut builder = UpstreamConfig::builder()
			.open_api_token_url(self.open_api_token_url)
			.booking_token_url(self.booking_token_url)
			.open_api_base_url(self.open_api_base_url)
			.booking_base_url(self.booking_base_url)
			.max_concurrent(self.max_concurrent)
			.min_interval(StdDuration::from_millis(self.min_interval_ms))
			.request_timeout(StdDuration::from_millis(self.request_timeout_ms))
			.retry_max_attempts(self.retry_max_attempts)
			.retry_base_delay(StdDuration::from_millis(self.retry_base_delay_ms))
			.retry_max_delay(StdDuration::from_millis(self.retry_max_delay_ms))
			.token_safety_margin(Duration::seconds(self.token_safety_margin_secs))
			.token_refresh_window(Duration::seconds(self.token_refresh_window_secs))
			.listings_ttl(Duration::seconds(self.listings_ttl_secs))
			.availability_ttl(Duration::seconds(self.availability_ttl_secs))
			.quote_ttl(Duration::seconds(self.quote_ttl_secs))
			.availability_cache_size(self.availability_cache_size)
			.quote_cache_size(self.quote_cache_size)
			.listings_page_size(self.listings_page_size);

		if let Some(id) = self.client_id {
			builder = builder.client_id(id);
		}
		if let Some(secret) = self.client_secret {
			builder = builder.client_secret(secret);
		}
		if let Some(dir) = self.token_cache_dir {
			builder = builder.token_cache_dir(dir);
		}

		builder
	}
}

/// Builder for [`UpstreamConfig`]; URLs are validated on [`build`](Self::build).
#[derive(Clone, Debug)]
pub struct UpstreamConfigBuilder {
	client_id: Option<String>,
	client_secret: Option<String>,
	open_api_token_url: String,
	booking_token_url: String,
	open_api_base_url: String,
	booking_base_url: String,
	max_concurrent: usize,
	min_interval: StdDuration,
	request_timeout: StdDuration,
	retry_max_attempts: u32,
	retry_base_delay: StdDuration,
	retry_max_delay: StdDuration,
	token_safety_margin: Duration,
	token_refresh_window: Duration,
	listings_ttl: Duration,
	availability_ttl: Duration,
	quote_ttl: Duration,
	availability_cache_size: usize,
	quote_cache_size: usize,
	listings_page_size: u32,
	token_cache_dir: Option<PathBuf>,
}
impl Default for UpstreamConfigBuilder {
	fn default() -> Self {
		Self {
			client_id: None,
			client_secret: None,
			open_api_token_url: DEFAULT_OPEN_API_TOKEN_URL.into(),
			booking_token_url: DEFAULT_BOOKING_TOKEN_URL.into(),
			open_api_base_url: DEFAULT_OPEN_API_BASE_URL.into(),
			booking_base_url: DEFAULT_BOOKING_BASE_URL.into(),
			max_concurrent: 1,
			min_interval: StdDuration::from_millis(1_200),
			request_timeout: StdDuration::from_secs(10),
			retry_max_attempts: 5,
			retry_base_delay: StdDuration::from_millis(500),
			retry_max_delay: StdDuration::from_secs(30),
			token_safety_margin: Duration::seconds(60),
			token_refresh_window: Duration::seconds(30),
			listings_ttl: Duration::seconds(60),
			availability_ttl: Duration::minutes(10),
			quote_ttl: Duration::minutes(15),
			availability_cache_size: 500,
			quote_cache_size: 200,
			listings_page_size: 100,
			token_cache_dir: None,
		}
	}
}
impl UpstreamConfigBuilder {
	/// Sets the OAuth client identifier.
	pub fn client_id(mut self, value: impl Into<String>) -> Self {
		self.client_id = Some(value.into());

		self
	}

	/// Sets the OAuth client secret.
	pub fn client_secret(mut self, value: impl Into<String>) -> Self {
		self.client_secret = Some(value.into());

		self
	}

	/// Overrides the open-api token endpoint.
	pub fn open_api_token_url(mut self, value: impl Into<String>) -> Self {
		self.open_api_token_url = value.into();

		self
	}

	/// Overrides the booking-engine token endpoint.
	pub fn booking_token_url(mut self, value: impl Into<String>) -> Self {
		self.booking_token_url = value.into();

		self
	}

	/// Overrides the listings/availability API base URL.
	pub fn open_api_base_url(mut self, value: impl Into<String>) -> Self {
		self.open_api_base_url = value.into();

		self
	}

	/// Overrides the booking-engine API base URL.
	pub fn booking_base_url(mut self, value: impl Into<String>) -> Self {
		self.booking_base_url = value.into();

		self
	}

	/// Sets the concurrency cap for upstream calls.
	pub fn max_concurrent(mut self, value: usize) -> Self {
		self.max_concurrent = value;

		self
	}

	/// Sets the minimum spacing between upstream call starts.
	pub fn min_interval(mut self, value: StdDuration) -> Self {
		self.min_interval = value;

		self
	}

	/// Sets the per-request deadline.
	pub fn request_timeout(mut self, value: StdDuration) -> Self {
		self.request_timeout = value;

		self
	}

	/// Sets the total attempt ceiling for rate-limited calls.
	pub fn retry_max_attempts(mut self, value: u32) -> Self {
		self.retry_max_attempts = value;

		self
	}

	/// Sets the first backoff step.
	pub fn retry_base_delay(mut self, value: StdDuration) -> Self {
		self.retry_base_delay = value;

		self
	}

	/// Sets the backoff ceiling.
	pub fn retry_max_delay(mut self, value: StdDuration) -> Self {
		self.retry_max_delay = value;

		self
	}

	/// Sets the margin subtracted from `expires_in`.
	pub fn token_safety_margin(mut self, value: Duration) -> Self {
		self.token_safety_margin = value;

		self
	}

	/// Sets the early-refresh window.
	pub fn token_refresh_window(mut self, value: Duration) -> Self {
		self.token_refresh_window = value;

		self
	}

	/// Sets the listings cache TTL.
	pub fn listings_ttl(mut self, value: Duration) -> Self {
		self.listings_ttl = value;

		self
	}

	/// Sets the availability cache TTL.
	pub fn availability_ttl(mut self, value: Duration) -> Self {
		self.availability_ttl = value;

		self
	}

	/// Sets the quote cache TTL.
	pub fn quote_ttl(mut self, value: Duration) -> Self {
		self.quote_ttl = value;

		self
	}

	/// Sets the availability cache bound.
	pub fn availability_cache_size(mut self, value: usize) -> Self {
		self.availability_cache_size = value;

		self
	}

	/// Sets the quote cache bound.
	pub fn quote_cache_size(mut self, value: usize) -> Self {
		self.quote_cache_size = value;

		self
	}

	/// Sets the listings page size.
	pub fn listings_page_size(mut self, value: u32) -> Self {
		self.listings_page_size = value;

		self
	}

	/// Sets the durable token cache directory (defaults to the system temp dir).
	pub fn token_cache_dir(mut self, value: impl Into<PathBuf>) -> Self {
		self.token_cache_dir = Some(value.into());

		self
	}

	/// Validates the settings and produces an [`UpstreamConfig`].
	pub fn build(self) -> Result<UpstreamConfig, ConfigError> {
		let client_id = required("client_id", self.client_id)?;
		let client_secret = required("client_secret", self.client_secret)?;

		if self.max_concurrent == 0 {
			return Err(ConfigError::OutOfRange {
				field: "max_concurrent",
				reason: "at least one concurrent call is required",
			});
		}
		if self.retry_max_attempts == 0 {
			return Err(ConfigError::OutOfRange {
				field: "retry_max_attempts",
				reason: "at least one attempt is required",
			});
		}
		if self.request_timeout.is_zero() {
			return Err(ConfigError::OutOfRange {
				field: "request_timeout",
				reason: "the deadline must be positive",
			});
		}
		if self.listings_page_size == 0 {
			return Err(ConfigError::OutOfRange {
				field: "listings_page_size",
				reason: "pages must hold at least one listing",
			});
		}
		if self.token_safety_margin.is_negative() || self.token_refresh_window.is_negative() {
			return Err(ConfigError::OutOfRange {
				field: "token_safety_margin",
				reason: "token margins cannot be negative",
			});
		}

		Ok(UpstreamConfig {
			client_id,
			client_secret,
			open_api_token_url: parse_url("open_api_token_url", &self.open_api_token_url)?,
			booking_token_url: parse_url("booking_token_url", &self.booking_token_url)?,
			open_api_base_url: parse_url("open_api_base_url", &self.open_api_base_url)?,
			booking_base_url: parse_url("booking_base_url", &self.booking_base_url)?,
			max_concurrent: self.max_concurrent,
			min_interval: self.min_interval,
			request_timeout: self.request_timeout,
			retry_max_attempts: self.retry_max_attempts,
			retry_base_delay: self.retry_base_delay,
			retry_max_delay: self.retry_max_delay.max(self.retry_base_delay),
			token_safety_margin: self.token_safety_margin,
			token_refresh_window: self.token_refresh_window,
			listings_ttl: self.listings_ttl,
			availability_ttl: self.availability_ttl,
			quote_ttl: self.quote_ttl,
			availability_cache_size: self.availability_cache_size.max(1),
			quote_cache_size: self.quote_cache_size.max(1),
			listings_page_size: self.listings_page_size,
			token_cache_dir: self.token_cache_dir.unwrap_or_else(env::temp_dir),
		})
	}
}

fn required(field: &'static str, value: Option<String>) -> Result<String, ConfigError> {
	match value.map(|v| v.trim().to_owned()) {
		Some(v) if !v.is_empty() => Ok(v),
		_ => Err(ConfigError::MissingCredentials { field }),
	}
}

fn parse_url(field: &'static str, raw: &str) -> Result<Url, ConfigError> {
	let url = Url::parse(raw).map_err(|source| ConfigError::InvalidUrl { field, source })?;
	let loopback = matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "[::1]"));

	if url.scheme() != "https" && !loopback {
		return Err(ConfigError::InsecureUrl { field, url: url.to_string() });
	}

	Ok(url)
}
