//! Durable token cache contract and the built-in implementations.
//!
//! The token store consults a [`TokenCache`] after its in-memory copy goes stale and before it
//! calls the token endpoint, and writes every freshly issued token back. Write failures are
//! logged by the caller and never fail a request.

pub mod file;
pub mod memory;

pub use file::FileTokenCache;
pub use memory::MemoryTokenCache;

// self
use crate::{
	_prelude::*,
	auth::{AccessToken, ApiScope},
};

/// Boxed future returned by [`TokenCache`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Load/store contract for durably cached access tokens, one record per scope.
pub trait TokenCache
where
	Self: Send + Sync,
{
	/// Fetches the cached token for the scope, if present.
	fn load(&self, scope: ApiScope) -> StoreFuture<'_, Option<AccessToken>>;

	/// Persists or replaces the token for its scope.
	fn store(&self, token: AccessToken) -> StoreFuture<'_, ()>;

	/// Drops the cached token for the scope.
	fn remove(&self, scope: ApiScope) -> StoreFuture<'_, ()>;
}

/// Error type produced by [`TokenCache`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}
