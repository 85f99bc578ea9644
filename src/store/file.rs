//! File-backed [`TokenCache`] writing one small JSON document per scope.
//!
//! Each document looks like `{"access_token": "...", "expires_at": 1717200000000}` with the
//! expiry stored as unix milliseconds, so a cold-started process can reuse a token minted by
//! its predecessor.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	auth::{AccessToken, ApiScope},
	store::{StoreError, StoreFuture, TokenCache},
};

#[derive(Serialize, Deserialize)]
struct TokenDocument {
	access_token: String,
	expires_at: i64,
}

/// Persists tokens under a directory, one file per scope.
#[derive(Clone, Debug)]
pub struct FileTokenCache {
	dir: PathBuf,
	prefix: String,
}
impl FileTokenCache {
	const DEFAULT_PREFIX: &'static str = "rental_broker_token";

	/// Uses `dir` for token documents, creating it when missing.
	pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let dir = dir.into();

		fs::create_dir_all(&dir).map_err(|e| StoreError::Backend {
			message: format!("Failed to create token cache directory {}: {e}", dir.display()),
		})?;

		Ok(Self { dir, prefix: Self::DEFAULT_PREFIX.into() })
	}

	/// Overrides the file name prefix (useful when several processes share a directory).
	pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.prefix = prefix.into();

		self
	}

	/// Path of the document holding the scope's token.
	pub fn path_for(&self, scope: ApiScope) -> PathBuf {
		self.dir.join(format!("{}_{}.json", self.prefix, scope.as_str()))
	}

	fn read_document(path: &Path, scope: ApiScope) -> Result<Option<AccessToken>, StoreError> {
		if !path.exists() {
			return Ok(None);
		}

		let bytes = fs::read(path).map_err(|e| StoreError::Backend {
			message: format!("Failed to read {}: {e}", path.display()),
		})?;

		if bytes.is_empty() {
			return Ok(None);
		}

		let document: TokenDocument =
			serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
				message: format!("Failed to parse {}: {e}", path.display()),
			})?;
		let expires_at = OffsetDateTime::from_unix_timestamp_nanos(
			i128::from(document.expires_at) * 1_000_000,
		)
		.map_err(|e| StoreError::Serialization {
			message: format!("Invalid expiry in {}: {e}", path.display()),
		})?;
		let token = AccessToken::builder(scope)
			.access_token(document.access_token)
			.expires_at(expires_at)
			.build()
			.map_err(|e| StoreError::Serialization {
				message: format!("Invalid token in {}: {e}", path.display()),
			})?;

		Ok(Some(token))
	}

	fn write_document(&self, token: &AccessToken) -> Result<(), StoreError> {
		let path = self.path_for(token.scope);
		let expires_at = i64::try_from(token.expires_at.unix_timestamp_nanos() / 1_000_000)
			.map_err(|_| StoreError::Serialization {
				message: "Token expiry does not fit in unix milliseconds".into(),
			})?;
		let document =
			TokenDocument { access_token: token.access_token.expose().to_owned(), expires_at };
		let serialized = serde_json::to_vec(&document).map_err(|e| StoreError::Serialization {
			message: format!("Failed to serialize token document: {e}"),
		})?;
		let mut tmp_path = path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", path.display()),
		})
	}
}
impl TokenCache for FileTokenCache {
	fn load(&self, scope: ApiScope) -> StoreFuture<'_, Option<AccessToken>> {
		Box::pin(async move { Self::read_document(&self.path_for(scope), scope) })
	}

	fn store(&self, token: AccessToken) -> StoreFuture<'_, ()> {
		Box::pin(async move { self.write_document(&token) })
	}

	fn remove(&self, scope: ApiScope) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			let path = self.path_for(scope);

			if !path.exists() {
				return Ok(());
			}

			fs::remove_file(&path).map_err(|e| StoreError::Backend {
				message: format!("Failed to remove {}: {e}", path.display()),
			})
		})
	}
}
