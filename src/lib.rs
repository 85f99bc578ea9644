//! Rate-limit aware broker between a public booking website and a property-management API.
//!
//! One [`UpstreamClient`](client::UpstreamClient) per process owns the OAuth token store, the
//! global request scheduler, the retry policy, and the short-lived response caches, so every
//! request handler shares token reuse, scheduler fairness, and cache hits.

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod oauth;
pub mod obs;
pub mod retry;
pub mod scheduler;
pub mod services;
pub mod store;
pub mod tokens;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// std
	use std::time::Duration as StdDuration;
	// self
	use crate::{
		client::UpstreamClient,
		config::UpstreamConfig,
		store::{MemoryTokenCache, TokenCache},
	};

	/// Client id used by every mock-backed test configuration.
	pub const TEST_CLIENT_ID: &str = "test-client";
	/// Client secret used by every mock-backed test configuration.
	pub const TEST_CLIENT_SECRET: &str = "test-secret";

	/// Builds a configuration whose endpoints all point at `base` (typically an `httpmock`
	/// server URL) with scheduler spacing and retry delays shrunk for fast tests.
	pub fn test_config(base: &str) -> UpstreamConfig {
		let base = base.trim_end_matches('/');

		UpstreamConfig::builder()
			.client_id(TEST_CLIENT_ID)
			.client_secret(TEST_CLIENT_SECRET)
			.open_api_token_url(format!("{base}/oauth2/token"))
			.booking_token_url(format!("{base}/booking/oauth2/token"))
			.open_api_base_url(format!("{base}/v1"))
			.booking_base_url(format!("{base}/api"))
			.min_interval(StdDuration::from_millis(1))
			.retry_base_delay(StdDuration::from_millis(5))
			.retry_max_delay(StdDuration::from_millis(50))
			.build()
			.expect("Test configuration should be valid.")
	}

	/// Constructs an [`UpstreamClient`] backed by an in-memory token cache.
	pub fn build_test_client(config: UpstreamConfig) -> (UpstreamClient, Arc<MemoryTokenCache>) {
		let cache_backend = Arc::new(MemoryTokenCache::default());
		let cache: Arc<dyn TokenCache> = cache_backend.clone();
		let client = UpstreamClient::with_token_cache(config, cache)
			.expect("Test client should build from a valid configuration.");

		(client, cache_backend)
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap, VecDeque},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use serde_json::Value;
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use reqwest;
pub use url;
#[cfg(test)] use httpmock as _;
