//! Client-credentials exchange built on the `oauth2` crate.
//!
//! The facade posts `grant_type=client_credentials`, the scope string, and the client id and
//! secret in the form body, then turns the provider response into an [`AccessToken`]. Failures
//! are classified with the metadata captured by the instrumented transport: a 429 becomes
//! [`Error::RateLimited`] (so the retry policy can back off), everything else becomes
//! [`Error::UpstreamAuth`].

pub use oauth2;

// std
use std::time::Duration as StdDuration;
// crates.io
use oauth2::{
	AuthType, ClientId, ClientSecret, EndpointNotSet, EndpointSet, HttpClientError,
	RequestTokenError, Scope, TokenResponse, TokenUrl,
	basic::{BasicClient, BasicRequestTokenError, BasicTokenResponse},
};
// self
use crate::{
	_prelude::*,
	auth::{AccessToken, ApiScope},
	http::{ReqwestHttpClient, ResponseMetadata, ResponseMetadataSlot, map_reqwest_error},
};

type ConfiguredBasicClient =
	BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Issues client-credentials token requests for one scope.
pub(crate) struct TokenFacade {
	scope: ApiScope,
	oauth_client: ConfiguredBasicClient,
	http_client: ReqwestHttpClient,
}
impl TokenFacade {
	pub(crate) fn new(
		scope: ApiScope,
		token_url: &Url,
		client_id: &str,
		client_secret: &str,
		http_client: ReqwestHttpClient,
	) -> Result<Self> {
		let token_url = TokenUrl::new(token_url.to_string()).map_err(|e| Error::UpstreamAuth {
			scope,
			message: format!("Token endpoint URL is invalid: {e}"),
			status: None,
		})?;
		let oauth_client = BasicClient::new(ClientId::new(client_id.to_owned()))
			.set_client_secret(ClientSecret::new(client_secret.to_owned()))
			.set_token_uri(token_url)
			.set_auth_type(AuthType::RequestBody);

		Ok(Self { scope, oauth_client, http_client })
	}

	/// Performs one exchange; `safety_margin` is subtracted from the granted lifetime.
	pub(crate) async fn exchange(&self, safety_margin: Duration) -> Result<AccessToken> {
		let meta = ResponseMetadataSlot::default();
		let instrumented = self.http_client.instrumented(meta.clone());
		let response = self
			.oauth_client
			.exchange_client_credentials()
			.add_scope(Scope::new(self.scope.oauth_scope().to_owned()))
			.request_async(&instrumented)
			.await
			.map_err(|err| map_request_error(self.scope, meta.take(), err))?;

		map_token_response(self.scope, response, safety_margin, OffsetDateTime::now_utc())
	}
}

fn map_token_response(
	scope: ApiScope,
	response: BasicTokenResponse,
	safety_margin: Duration,
	issued_at: OffsetDateTime,
) -> Result<AccessToken> {
	let expires_in = response
		.expires_in()
		.ok_or_else(|| auth_error(scope, "Token response is missing expires_in", None))?
		.as_secs();
	let expires_in = i64::try_from(expires_in)
		.map_err(|_| auth_error(scope, "The expires_in value exceeds the supported range", None))?;

	if expires_in <= 0 {
		return Err(auth_error(scope, "The expires_in value must be positive", None));
	}

	let granted = Duration::seconds(expires_in);
	// At most a quarter of the grant is held back.
	let lifetime = granted - safety_margin.clamp(Duration::ZERO, granted / 4);

	AccessToken::builder(scope)
		.access_token(response.access_token().secret().to_owned())
		.issued_at(issued_at)
		.expires_in(lifetime)
		.build()
		.map_err(|e| auth_error(scope, &e.to_string(), None))
}

fn map_request_error(
	scope: ApiScope,
	meta: Option<ResponseMetadata>,
	err: BasicRequestTokenError<HttpClientError<ReqwestError>>,
) -> Error {
	let status = meta.as_ref().and_then(|m| m.status);
	let retry_after = meta.as_ref().and_then(|m| m.retry_after);

	if status == Some(429) {
		return rate_limited(retry_after);
	}

	match err {
		RequestTokenError::ServerResponse(response) => {
			let message = match response.error_description() {
				Some(description) => format!("{}: {description}", response.error().as_ref()),
				None => response.error().as_ref().to_owned(),
			};

			auth_error(scope, &message, status)
		},
		RequestTokenError::Request(HttpClientError::Reqwest(inner)) =>
			match map_reqwest_error(*inner) {
				Error::Timeout => Error::Timeout,
				other => auth_error(scope, &other.to_string(), status),
			},
		RequestTokenError::Request(other) => auth_error(scope, &other.to_string(), status),
		RequestTokenError::Parse(error, _body) =>
			auth_error(scope, &format!("Token response could not be parsed: {error}"), status),
		RequestTokenError::Other(message) => auth_error(scope, &message, status),
	}
}

fn rate_limited(retry_after: Option<StdDuration>) -> Error {
	Error::RateLimited { status: 429, retry_after }
}

fn auth_error(scope: ApiScope, message: &str, status: Option<u16>) -> Error {
	Error::UpstreamAuth { scope, message: message.to_owned(), status }
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn response(body: &str) -> BasicTokenResponse {
		serde_json::from_str(body).expect("Token response fixture should deserialize.")
	}

	#[test]
	fn expiry_subtracts_the_safety_margin() {
		let issued = macros::datetime!(2025-06-01 00:00 UTC);
		let token = map_token_response(
			ApiScope::OpenApi,
			response(r#"{"access_token":"abc","token_type":"bearer","expires_in":86400}"#),
			Duration::seconds(60),
			issued,
		)
		.expect("A complete response should map.");

		assert_eq!(token.expires_at, issued + Duration::seconds(86_340));
		assert_eq!(token.access_token.expose(), "abc");
	}

	#[test]
	fn short_lifetimes_cap_the_margin() {
		let issued = macros::datetime!(2025-06-01 00:00 UTC);
		let token = map_token_response(
			ApiScope::BookingEngine,
			response(r#"{"access_token":"abc","token_type":"bearer","expires_in":80}"#),
			Duration::seconds(60),
			issued,
		)
		.expect("A short-lived response should still map.");

		assert_eq!(token.expires_at, issued + Duration::seconds(60));
		assert!(token.is_fresh_at(issued + Duration::seconds(40), Duration::seconds(30)));
	}

	#[test]
	fn missing_expiry_is_an_auth_error() {
		let err = map_token_response(
			ApiScope::OpenApi,
			response(r#"{"access_token":"abc","token_type":"bearer"}"#),
			Duration::ZERO,
			OffsetDateTime::now_utc(),
		)
		.expect_err("A response without expires_in should be rejected.");

		assert!(matches!(err, Error::UpstreamAuth { scope: ApiScope::OpenApi, .. }));
	}

	#[test]
	fn rate_limited_metadata_wins_over_parse_failures() {
		let meta = ResponseMetadata {
			status: Some(429),
			retry_after: Some(StdDuration::from_secs(3)),
		};
		let err = map_request_error(
			ApiScope::OpenApi,
			Some(meta),
			RequestTokenError::Other("throttled".into()),
		);

		assert!(matches!(err, Error::RateLimited { status: 429, retry_after: Some(_) }));

		let err = map_request_error(
			ApiScope::OpenApi,
			Some(ResponseMetadata { status: Some(401), retry_after: None }),
			RequestTokenError::Other("denied".into()),
		);

		assert!(matches!(err, Error::UpstreamAuth { status: Some(401), .. }));
	}
}
