//! Transport primitives shared by the token exchange and the data endpoints.
//!
//! [`ReqwestHttpClient`] owns the single reqwest client (request deadline, no redirects).
//! Token exchanges run through [`InstrumentedHandle`], which records the HTTP status and any
//! `Retry-After` hint in a [`ResponseMetadataSlot`] so rate-limited token responses can be told
//! apart from credential failures after `oauth2` has parsed the body. Data calls go through
//! [`ReqwestHttpClient::send`], which classifies every response into the broker taxonomy.

// std
use std::time::Duration as StdDuration;
// crates.io
use oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse};
use reqwest::{
	Method, StatusCode,
	header::{HeaderMap, RETRY_AFTER},
	redirect::Policy,
};
use time::format_description::well_known::Rfc2822;
// self
use crate::{
	_prelude::*,
	error::{ConfigError, TransportError},
};

const BODY_PREVIEW_LIMIT: usize = 512;

/// Captures metadata from the most recent HTTP response for downstream error mapping.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadata {
	/// HTTP status code returned by the endpoint, if available.
	pub status: Option<u16>,
	/// Retry-After hint expressed as a relative duration.
	pub retry_after: Option<StdDuration>,
}

/// Thread-safe slot for sharing [`ResponseMetadata`] between transport and error layers.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadataSlot(Arc<Mutex<Option<ResponseMetadata>>>);
impl ResponseMetadataSlot {
	/// Stores new metadata for the current request.
	pub fn store(&self, meta: ResponseMetadata) {
		*self.0.lock() = Some(meta);
	}

	/// Returns the captured metadata, if any, consuming it from the slot.
	pub fn take(&self) -> Option<ResponseMetadata> {
		self.0.lock().take()
	}
}

/// Outbound data request handed to [`ReqwestHttpClient::send`].
#[derive(Clone, Debug)]
pub struct UpstreamRequest {
	/// HTTP method.
	pub method: Method,
	/// Fully resolved endpoint URL.
	pub url: Url,
	/// Query string pairs appended to `url`.
	pub query: Vec<(String, String)>,
	/// Optional JSON body.
	pub body: Option<Value>,
}
impl UpstreamRequest {
	/// Creates a GET request.
	pub fn get(url: Url) -> Self {
		Self { method: Method::GET, url, query: Vec::new(), body: None }
	}

	/// Creates a POST request carrying a JSON body.
	pub fn post_json(url: Url, body: Value) -> Self {
		Self { method: Method::POST, url, query: Vec::new(), body: Some(body) }
	}

	/// Appends a query pair.
	pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.query.push((key.into(), value.into()));

		self
	}

	/// Looks up the first query value for `key`.
	pub fn query_value(&self, key: &str) -> Option<&str> {
		self.query.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
	}
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
#[derive(Clone, Debug)]
pub struct ReqwestHttpClient(ReqwestClient);
impl ReqwestHttpClient {
	/// Builds a client with the request deadline applied to every call.
	///
	/// Redirects are disabled: the token endpoint must answer directly, and data endpoints
	/// never redirect in normal operation.
	pub fn with_timeout(timeout: StdDuration) -> Result<Self, ConfigError> {
		let client = ReqwestClient::builder().timeout(timeout).redirect(Policy::none()).build()?;

		Ok(Self(client))
	}

	/// Builds an instrumented handle for the `oauth2` token exchange.
	pub fn instrumented(&self, slot: ResponseMetadataSlot) -> InstrumentedHandle {
		InstrumentedHandle::new(self.0.clone(), slot)
	}

	/// Sends a data request with the bearer token and classifies the response.
	///
	/// 2xx bodies are parsed as JSON (an empty body becomes `null`), 429 becomes
	/// [`Error::RateLimited`] carrying the `Retry-After` hint, any other status becomes
	/// [`Error::Upstream`] with a body preview, and a missed deadline becomes
	/// [`Error::Timeout`].
	pub async fn send(&self, request: UpstreamRequest, bearer: &str) -> Result<Value> {
		let mut builder = self.0.request(request.method, request.url).bearer_auth(bearer);

		if !request.query.is_empty() {
			builder = builder.query(&request.query);
		}
		if let Some(body) = &request.body {
			builder = builder.json(body);
		}

		let response = builder.send().await.map_err(map_reqwest_error)?;
		let status = response.status();
		let retry_after = parse_retry_after(response.headers());
		let bytes = response.bytes().await.map_err(map_reqwest_error)?;

		classify_response(status, retry_after, &bytes)
	}
}

/// Instrumented adapter that implements [`AsyncHttpClient`] for reqwest.
pub(crate) struct InstrumentedHttpClient {
	client: ReqwestClient,
	slot: ResponseMetadataSlot,
}

/// Handle returned by [`ReqwestHttpClient::instrumented`].
#[derive(Clone)]
pub struct InstrumentedHandle(Arc<InstrumentedHttpClient>);
impl InstrumentedHandle {
	fn new(client: ReqwestClient, slot: ResponseMetadataSlot) -> Self {
		Self(Arc::new(InstrumentedHttpClient { client, slot }))
	}
}
impl<'c> AsyncHttpClient<'c> for InstrumentedHandle {
	type Error = HttpClientError<ReqwestError>;
	type Future =
		Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send + Sync>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		let client = Arc::clone(&self.0);

		Box::pin(async move {
			client.slot.take();

			let response = client
				.client
				.execute(request.try_into().map_err(Box::new)?)
				.await
				.map_err(Box::new)?;
			let status = response.status();
			let headers = response.headers().to_owned();
			let retry_after = parse_retry_after(&headers);

			client.slot.store(ResponseMetadata { status: Some(status.as_u16()), retry_after });

			let mut response_new =
				HttpResponse::new(response.bytes().await.map_err(Box::new)?.to_vec());

			*response_new.status_mut() = status;
			*response_new.headers_mut() = headers;

			Ok(response_new)
		})
	}
}

pub(crate) fn map_reqwest_error(err: ReqwestError) -> Error {
	if err.is_timeout() {
		return Error::Timeout;
	}
	if err.is_builder() {
		return ConfigError::from(err).into();
	}

	TransportError::from(err).into()
}

fn classify_response(
	status: StatusCode,
	retry_after: Option<StdDuration>,
	bytes: &[u8],
) -> Result<Value> {
	if status == StatusCode::TOO_MANY_REQUESTS {
		return Err(Error::RateLimited { status: status.as_u16(), retry_after });
	}
	if !status.is_success() {
		return Err(Error::Upstream { status: status.as_u16(), body: body_preview(bytes) });
	}
	if bytes.iter().all(u8::is_ascii_whitespace) {
		return Ok(Value::Null);
	}

	let de = &mut serde_json::Deserializer::from_slice(bytes);

	serde_path_to_error::deserialize(de).map_err(|source| Error::Parse { source })
}

pub(crate) fn body_preview(bytes: &[u8]) -> String {
	let text = String::from_utf8_lossy(bytes);
	let trimmed = text.trim();

	if trimmed.chars().count() <= BODY_PREVIEW_LIMIT {
		return trimmed.to_owned();
	}

	let mut preview: String = trimmed.chars().take(BODY_PREVIEW_LIMIT).collect();

	preview.push('…');

	preview
}

/// Parses a `Retry-After` header given either as delta-seconds or as an HTTP date.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<StdDuration> {
	let value = headers.get(RETRY_AFTER)?;
	let raw = value.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<u64>() {
		return Some(StdDuration::from_secs(secs));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() {
			return StdDuration::try_from(delta).ok();
		}
	}

	None
}

#[cfg(test)]
mod tests {
	// crates.io
	use reqwest::header::HeaderValue;
	// self
	use super::*;

	#[test]
	fn retry_after_accepts_seconds_and_dates() {
		let mut headers = HeaderMap::new();

		headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));

		assert_eq!(parse_retry_after(&headers), Some(StdDuration::from_secs(7)));

		headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));

		assert_eq!(parse_retry_after(&headers), None);

		headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));

		assert_eq!(parse_retry_after(&headers), None);
	}

	#[test]
	fn classification_distinguishes_rate_limits() {
		let limited =
			classify_response(StatusCode::TOO_MANY_REQUESTS, Some(StdDuration::from_secs(2)), b"")
				.expect_err("429 should be an error.");

		assert!(matches!(
			limited,
			Error::RateLimited { status: 429, retry_after: Some(d) } if d == StdDuration::from_secs(2)
		));

		let upstream = classify_response(StatusCode::BAD_GATEWAY, None, b"  gateway down ")
			.expect_err("502 should be an error.");

		assert!(matches!(upstream, Error::Upstream { status: 502, ref body } if body == "gateway down"));
	}

	#[test]
	fn classification_parses_success_bodies() {
		let value = classify_response(StatusCode::OK, None, br#"{"results":[]}"#)
			.expect("A JSON body should parse.");

		assert_eq!(value["results"], Value::Array(Vec::new()));
		assert_eq!(
			classify_response(StatusCode::NO_CONTENT, None, b"").expect("Empty body is null."),
			Value::Null
		);
		assert!(matches!(
			classify_response(StatusCode::OK, None, b"{oops"),
			Err(Error::Parse { .. })
		));
	}

	#[test]
	fn body_preview_truncates_long_payloads() {
		let long = "x".repeat(BODY_PREVIEW_LIMIT + 10);
		let preview = body_preview(long.as_bytes());

		assert_eq!(preview.chars().count(), BODY_PREVIEW_LIMIT + 1);
		assert!(preview.ends_with('…'));
	}

	#[test]
	fn request_builder_collects_query_pairs() {
		let url = Url::parse("https://pms.example.com/v1/listings").expect("URL should parse.");
		let request = UpstreamRequest::get(url).query("city", "Miami").query("limit", "50");

		assert_eq!(request.query_value("city"), Some("Miami"));
		assert_eq!(request.query_value("cursor"), None);
	}
}
