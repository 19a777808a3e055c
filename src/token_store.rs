//! Persistence of sync tokens between reconciliation runs
use std::{
	collections::BTreeMap,
	path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::connector::SyncToken;

/// Where sync tokens are kept, keyed by sync task name
#[async_trait]
pub trait TokenStore: Send + Sync {
	/// The last persisted token of a task
	async fn load(&self, task: &str) -> Result<Option<SyncToken>>;

	/// Persist the token of a task
	async fn store(&self, task: &str, token: &SyncToken) -> Result<()>;
}

/// Token store backed by a single bincode file
#[derive(Debug)]
pub struct FileTokenStore {
	/// Path of the token file
	path: PathBuf,
	/// Serializes read-modify-write cycles on the file
	lock: Mutex<()>,
}

impl FileTokenStore {
	/// Use the file at `path`; it is created on first store
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into(), lock: Mutex::new(()) }
	}
}

#[async_trait]
impl TokenStore for FileTokenStore {
	async fn load(&self, task: &str) -> Result<Option<SyncToken>> {
		let _guard = self.lock.lock().await;
		Ok(read_tokens(&self.path).await?.remove(task))
	}

	async fn store(&self, task: &str, token: &SyncToken) -> Result<()> {
		let _guard = self.lock.lock().await;
		let mut tokens = read_tokens(&self.path).await?;
		tokens.insert(task.to_owned(), token.clone());
		tokio::fs::write(
			&self.path,
			bincode::serialize(&tokens).context("failed to serialize sync tokens")?,
		)
		.await
		.context("failed to write sync tokens")?;
		Ok(())
	}
}

/// Read the token file
async fn read_tokens(path: &Path) -> Result<BTreeMap<String, SyncToken>> {
	Ok(match tokio::fs::read(path).await {
		Ok(data) => bincode::deserialize(&data).context("sync token deserialization failed")?,
		Err(err) => {
			if err.kind() == std::io::ErrorKind::NotFound {
				tracing::info!("Sync token file missing, starting without tokens");
				BTreeMap::new()
			} else {
				bail!(err)
			}
		}
	})
}
