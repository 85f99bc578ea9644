//! Thread-safe in-memory [`TokenCache`] for tests and single-process deployments.

// self
use crate::{
	_prelude::*,
	auth::{AccessToken, ApiScope},
	store::{StoreFuture, TokenCache},
};

type CacheMap = Arc<RwLock<HashMap<ApiScope, AccessToken>>>;

/// Keeps tokens in-process; also counts writes so tests can assert persistence.
#[derive(Clone, Debug, Default)]
pub struct MemoryTokenCache {
	map: CacheMap,
	writes: Arc<Mutex<u64>>,
}
impl MemoryTokenCache {
	/// Number of successful `store` calls so far.
	pub fn writes(&self) -> u64 {
		*self.writes.lock()
	}

	/// Synchronous peek used by tests and diagnostics.
	pub fn peek(&self, scope: ApiScope) -> Option<AccessToken> {
		self.map.read().get(&scope).cloned()
	}
}
impl TokenCache for MemoryTokenCache {
	fn load(&self, scope: ApiScope) -> StoreFuture<'_, Option<AccessToken>> {
		let map = self.map.clone();

		Box::pin(async move { Ok(map.read().get(&scope).cloned()) })
	}

	fn store(&self, token: AccessToken) -> StoreFuture<'_, ()> {
		let map = self.map.clone();
		let writes = self.writes.clone();

		Box::pin(async move {
			map.write().insert(token.scope, token);
			*writes.lock() += 1;

			Ok(())
		})
	}

	fn remove(&self, scope: ApiScope) -> StoreFuture<'_, ()> {
		let map = self.map.clone();

		Box::pin(async move {
			map.write().remove(&scope);

			Ok(())
		})
	}
}
