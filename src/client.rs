//! Process-wide entry point tying tokens, admission control, retry, and the services together.
//!
//! Construct one [`UpstreamClient`] at startup and share it (by reference or `Arc`) with every
//! request handler so they all see the same tokens, scheduler, and caches.

// self
use crate::{
	_prelude::*,
	auth::{AccessToken, ApiScope},
	config::UpstreamConfig,
	http::{ReqwestHttpClient, UpstreamRequest},
	obs::{CallKind, CallOutcome, CallSpan, record_call_outcome, record_result},
	retry::RetryPolicy,
	scheduler::RequestScheduler,
	services::{
		AvailabilityQuery, AvailabilityResolver, AvailabilityResult, CallFuture, ListingQuery,
		ListingsFetcher, ListingsResponse, Quote, QuoteRequest, QuoteService, UpstreamCall,
	},
	store::{FileTokenCache, TokenCache},
	tokens::TokenStore,
};

/// Shared upstream state: one token store, one scheduler, and the response caches.
#[derive(Debug)]
pub struct UpstreamClient {
	gateway: Gateway,
	listings: ListingsFetcher,
	availability: AvailabilityResolver,
	quotes: QuoteService,
}
impl UpstreamClient {
	/// Builds a client that persists tokens under `config.token_cache_dir`.
	pub fn new(config: UpstreamConfig) -> Result<Self> {
		let cache = FileTokenCache::open(&config.token_cache_dir)?;

		Self::with_token_cache(config, Arc::new(cache))
	}

	/// Builds a client on top of a caller-provided durable token cache.
	pub fn with_token_cache(config: UpstreamConfig, cache: Arc<dyn TokenCache>) -> Result<Self> {
		let http = ReqwestHttpClient::with_timeout(config.request_timeout)?;
		let gateway = Gateway {
			tokens: TokenStore::new(&config, http.clone(), cache)?,
			scheduler: RequestScheduler::from_config(&config),
			retry: RetryPolicy::from_config(&config),
			http,
		};

		Ok(Self {
			gateway,
			listings: ListingsFetcher::new(
				config.open_api_base_url.clone(),
				config.listings_page_size,
				config.listings_ttl,
			),
			availability: AvailabilityResolver::new(
				config.open_api_base_url.clone(),
				config.availability_ttl,
				config.availability_cache_size,
			),
			quotes: QuoteService::new(
				config.booking_base_url.clone(),
				config.quote_ttl,
				config.quote_cache_size,
			),
		})
	}

	/// Walks the listings endpoint for `query`.
	pub async fn list_listings(&self, query: &ListingQuery) -> Result<ListingsResponse> {
		let span = CallSpan::new(CallKind::Listings, "list_listings");

		span.instrument(async {
			record_call_outcome(CallKind::Listings, CallOutcome::Attempt);

			let response = self.listings.fetch_all(&self.gateway, query).await;

			if matches!(response, Ok(ListingsResponse { cached: true, .. })) {
				record_call_outcome(CallKind::Listings, CallOutcome::CacheHit);
			}

			record_result(CallKind::Listings, response)
		})
		.await
	}

	/// Resolves availability for one listing and stay.
	pub async fn get_availability(&self, query: &AvailabilityQuery) -> Result<AvailabilityResult> {
		let span = CallSpan::new(CallKind::Availability, "get_availability");

		span.instrument(async {
			record_call_outcome(CallKind::Availability, CallOutcome::Attempt);

			let result = self.availability.resolve(&self.gateway, query).await;

			if matches!(result, Ok(AvailabilityResult { cached: true, .. })) {
				record_call_outcome(CallKind::Availability, CallOutcome::CacheHit);
			}

			record_result(CallKind::Availability, result)
		})
		.await
	}

	/// Requests (or reuses) a price quote.
	pub async fn create_quote(&self, request: &QuoteRequest) -> Result<Quote> {
		let span = CallSpan::new(CallKind::Quote, "create_quote");

		span.instrument(async {
			record_call_outcome(CallKind::Quote, CallOutcome::Attempt);

			let quote = self.quotes.create_quote(&self.gateway, request).await;

			if matches!(quote, Ok(Quote { cached: true, .. })) {
				record_call_outcome(CallKind::Quote, CallOutcome::CacheHit);
			}

			record_result(CallKind::Quote, quote)
		})
		.await
	}

	/// Returns a valid token for `scope`, refreshing it when needed.
	pub async fn access_token(&self, scope: ApiScope) -> Result<AccessToken> {
		self.gateway.tokens.access_token(scope).await
	}

	/// Scheduler shared by every upstream call.
	pub fn scheduler(&self) -> &RequestScheduler {
		&self.gateway.scheduler
	}

	/// Drops the cached listings result set.
	pub fn clear_listings_cache(&self) {
		self.listings.clear_cache();
	}
}

/// Token + scheduler + retry pipeline behind every service call.
#[derive(Debug)]
struct Gateway {
	http: ReqwestHttpClient,
	tokens: TokenStore,
	scheduler: RequestScheduler,
	retry: RetryPolicy,
}
impl Gateway {
	async fn execute(&self, scope: ApiScope, request: UpstreamRequest) -> Result<Value> {
		self.retry.run(|_| self.attempt(scope, request.clone())).await
	}

	// One admitted round trip; an upstream 401 invalidates the token and is replayed once.
	async fn attempt(&self, scope: ApiScope, request: UpstreamRequest) -> Result<Value> {
		let token = self.tokens.access_token(scope).await?;
		let first = self
			.scheduler
			.schedule(self.http.send(request.clone(), token.access_token.expose()))
			.await;

		match first {
			Err(Error::Upstream { status: 401, .. }) => {
				tracing::warn!(%scope, "Upstream rejected the token; refreshing it once.");

				self.tokens.invalidate(scope).await;

				let token = self.tokens.access_token(scope).await?;

				self.scheduler.schedule(self.http.send(request, token.access_token.expose())).await
			},
			other => other,
		}
	}
}
impl UpstreamCall for Gateway {
	fn call(&self, scope: ApiScope, request: UpstreamRequest) -> CallFuture<'_> {
		Box::pin(self.execute(scope, request))
	}
}
