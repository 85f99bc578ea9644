//! Per-scope access tokens with in-memory reuse, durable reuse, and singleflight refresh.
//!
//! Lookup order: the in-memory copy, then (under the scope's async guard) the memory copy again,
//! the durable [`TokenCache`], and finally a client-credentials exchange retried on 429.
//! Concurrent callers for a stale scope therefore share a single token request.

// self
use crate::{
	_prelude::*,
	auth::{AccessToken, ApiScope},
	config::UpstreamConfig,
	http::ReqwestHttpClient,
	oauth::TokenFacade,
	obs::{CallKind, CallOutcome, CallSpan, record_call_outcome, record_result},
	retry::RetryPolicy,
	store::TokenCache,
};

/// Owns the token for every [`ApiScope`] on behalf of the whole process.
pub struct TokenStore {
	open_api: TokenFacade,
	booking_engine: TokenFacade,
	memory: RwLock<HashMap<ApiScope, AccessToken>>,
	guards: Mutex<HashMap<ApiScope, Arc<AsyncMutex<()>>>>,
	cache: Arc<dyn TokenCache>,
	retry: RetryPolicy,
	safety_margin: Duration,
	refresh_window: Duration,
}
impl TokenStore {
	/// Builds the store with one token facade per scope.
	pub fn new(
		config: &UpstreamConfig,
		http_client: ReqwestHttpClient,
		cache: Arc<dyn TokenCache>,
	) -> Result<Self> {
		let facade = |scope: ApiScope| {
			TokenFacade::new(
				scope,
				config.token_url(scope),
				&config.client_id,
				&config.client_secret,
				http_client.clone(),
			)
		};

		Ok(Self {
			open_api: facade(ApiScope::OpenApi)?,
			booking_engine: facade(ApiScope::BookingEngine)?,
			memory: RwLock::new(HashMap::new()),
			guards: Mutex::new(HashMap::new()),
			cache,
			retry: RetryPolicy::from_config(config),
			safety_margin: config.token_safety_margin,
			refresh_window: config.token_refresh_window,
		})
	}

	/// Returns a token for `scope` that stays valid past the refresh window.
	pub async fn access_token(&self, scope: ApiScope) -> Result<AccessToken> {
		if let Some(token) = self.fresh_in_memory(scope, OffsetDateTime::now_utc()) {
			return Ok(token);
		}

		let span = CallSpan::new(CallKind::Token, "access_token");

		span.instrument(self.refresh(scope)).await
	}

	/// Drops the scope's token from memory and from the durable cache so the next caller
	/// obtains a new one.
	pub async fn invalidate(&self, scope: ApiScope) {
		self.memory.write().remove(&scope);

		if let Err(e) = self.cache.remove(scope).await {
			tracing::warn!(%scope, error = %e, "Failed to drop the durable token.");
		}
	}

	async fn refresh(&self, scope: ApiScope) -> Result<AccessToken> {
		let guard = self.guard(scope);
		let _lock = guard.lock().await;
		let now = OffsetDateTime::now_utc();

		if let Some(token) = self.fresh_in_memory(scope, now) {
			return Ok(token);
		}

		match self.cache.load(scope).await {
			Ok(Some(token)) if token.is_fresh_at(now, self.refresh_window) => {
				tracing::debug!(%scope, "Adopted the durably cached token.");
				record_call_outcome(CallKind::Token, CallOutcome::CacheHit);

				self.memory.write().insert(scope, token.clone());

				return Ok(token);
			},
			Ok(_) => (),
			Err(e) => tracing::warn!(%scope, error = %e, "Failed to read the durable token."),
		}

		record_call_outcome(CallKind::Token, CallOutcome::Attempt);

		let facade = self.facade(scope);
		let token = record_result(
			CallKind::Token,
			self.retry.run(|_| facade.exchange(self.safety_margin)).await,
		)?;

		self.memory.write().insert(scope, token.clone());

		if let Err(e) = self.cache.store(token.clone()).await {
			tracing::warn!(%scope, error = %e, "Failed to persist the new token.");
		}

		tracing::debug!(%scope, expires_at = %token.expires_at, "Obtained a new token.");

		Ok(token)
	}

	fn fresh_in_memory(&self, scope: ApiScope, now: OffsetDateTime) -> Option<AccessToken> {
		self.memory
			.read()
			.get(&scope)
			.filter(|token| token.is_fresh_at(now, self.refresh_window))
			.cloned()
	}

	fn guard(&self, scope: ApiScope) -> Arc<AsyncMutex<()>> {
		let mut guards = self.guards.lock();

		guards.entry(scope).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
	}

	fn facade(&self, scope: ApiScope) -> &TokenFacade {
		match scope {
			ApiScope::OpenApi => &self.open_api,
			ApiScope::BookingEngine => &self.booking_engine,
		}
	}
}
impl Debug for TokenStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let cached = self.memory.read().keys().copied().collect::<Vec<_>>();

		f.debug_struct("TokenStore")
			.field("cached_scopes", &cached)
			.field("retry", &self.retry)
			.field("refresh_window", &self.refresh_window)
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::time::Duration as StdDuration;
	// self
	use super::*;
	use crate::{_preludet::test_config, store::MemoryTokenCache};

	fn offline_store(cache: Arc<MemoryTokenCache>) -> TokenStore {
		// Port 9 (discard) on loopback; any exchange attempt would fail.
		let config = test_config("http://127.0.0.1:9");
		let http = ReqwestHttpClient::with_timeout(StdDuration::from_millis(200))
			.expect("HTTP client should build.");

		TokenStore::new(&config, http, cache).expect("Token store should build.")
	}

	fn token(scope: ApiScope, secret: &str, lifetime: Duration) -> AccessToken {
		AccessToken::builder(scope)
			.access_token(secret)
			.expires_in(lifetime)
			.build()
			.expect("Token fixture should build.")
	}

	#[tokio::test]
	async fn durable_tokens_are_adopted_without_network() {
		let cache = Arc::new(MemoryTokenCache::default());

		cache
			.store(token(ApiScope::OpenApi, "durable", Duration::hours(1)))
			.await
			.expect("Seeding the cache should succeed.");

		let store = offline_store(cache.clone());
		let first = store.access_token(ApiScope::OpenApi).await.expect("Durable token is usable.");
		let second = store.access_token(ApiScope::OpenApi).await.expect("Memory token is usable.");

		assert_eq!(first.access_token.expose(), "durable");
		assert_eq!(second.access_token.expose(), "durable");
		assert_eq!(cache.writes(), 1);
	}

	#[tokio::test]
	async fn tokens_inside_the_refresh_window_are_not_reused() {
		let cache = Arc::new(MemoryTokenCache::default());

		cache
			.store(token(ApiScope::BookingEngine, "stale", Duration::seconds(10)))
			.await
			.expect("Seeding the cache should succeed.");

		let store = offline_store(cache);
		let err = store
			.access_token(ApiScope::BookingEngine)
			.await
			.expect_err("A nearly expired token must trigger an exchange, which fails offline.");

		assert!(!matches!(err, Error::RateLimited { .. }));
	}

	#[tokio::test]
	async fn invalidate_clears_memory_and_durable_copies() {
		let cache = Arc::new(MemoryTokenCache::default());

		cache
			.store(token(ApiScope::OpenApi, "revoked", Duration::hours(1)))
			.await
			.expect("Seeding the cache should succeed.");

		let store = offline_store(cache.clone());

		store.access_token(ApiScope::OpenApi).await.expect("Durable token is usable.");
		store.invalidate(ApiScope::OpenApi).await;

		assert!(cache.peek(ApiScope::OpenApi).is_none());
		assert!(store.fresh_in_memory(ApiScope::OpenApi, OffsetDateTime::now_utc()).is_none());
	}
}
