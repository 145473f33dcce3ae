//! Object store adapter — named blobs with create/read/delete/list.
//!
//! Backends expose revision tokens for optimistic concurrency; the adapter
//! resolves them internally so protocol code only deals in names and bytes.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

/// How many times `put` re-resolves a revision after losing a race.
const PUT_ATTEMPTS: usize = 3;

/// Opaque token identifying one version of an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Revision(pub String);

/// Object content plus the revision needed to replace or remove it.
#[derive(Debug, Clone)]
pub struct Versioned {
    pub content: Bytes,
    pub revision: Revision,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Network, I/O or rate-limit trouble. Retry on the next tick.
    #[error("transient store failure: {0}")]
    Transient(String),
    /// The expected revision no longer matches the stored object.
    #[error("revision conflict on {0}")]
    Conflict(String),
    #[error("invalid object name: {0:?}")]
    InvalidName(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_) | StoreError::Conflict(_))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Transient(e.to_string())
    }
}

/// Revision-aware primitive operations of a backing store.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Current content and revision, or None if absent.
    async fn fetch(&self, name: &str) -> Result<Option<Versioned>, StoreError>;

    /// Create (`expected = None`) or replace (`expected = Some(current)`).
    /// Fails with `Conflict` if the object's state differs from `expected`.
    async fn store(
        &self,
        name: &str,
        content: Bytes,
        expected: Option<Revision>,
    ) -> Result<Revision, StoreError>;

    /// Remove the given revision. Ok(false) if the object is already gone.
    async fn remove(&self, name: &str, revision: &Revision) -> Result<bool, StoreError>;

    /// Names of every object in the store.
    async fn names(&self) -> Result<Vec<String>, StoreError>;
}

/// Shared handle protocol code uses to talk to the store.
#[derive(Clone)]
pub struct ObjectStore {
    backend: Arc<dyn Backend>,
}

impl ObjectStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Create or overwrite `name`.
    pub async fn put(&self, name: &str, content: impl Into<Bytes>) -> Result<(), StoreError> {
        let content = content.into();
        for attempt in 1..=PUT_ATTEMPTS {
            let expected = self.backend.fetch(name).await?.map(|v| v.revision);
            match self.backend.store(name, content.clone(), expected).await {
                Ok(_) => return Ok(()),
                Err(StoreError::Conflict(_)) => {
                    tracing::debug!(name, attempt, "revision moved underneath put, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(StoreError::Transient(format!("revision conflict on {name}")))
    }

    pub async fn get(&self, name: &str) -> Result<Option<Bytes>, StoreError> {
        Ok(self.backend.fetch(name).await?.map(|v| v.content))
    }

    /// Content decoded as UTF-8 (lossily); envelopes are text.
    pub async fn get_text(&self, name: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .get(name)
            .await?
            .map(|b| String::from_utf8_lossy(&b).into_owned()))
    }

    /// Remove `name`. Ok(false) if it did not exist.
    pub async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        for _ in 0..PUT_ATTEMPTS {
            let Some(current) = self.backend.fetch(name).await? else {
                return Ok(false);
            };
            match self.backend.remove(name, &current.revision).await {
                Err(StoreError::Conflict(_)) => continue,
                other => return other,
            }
        }
        Err(StoreError::Transient(format!("revision conflict on {name}")))
    }

    /// Names in the store, optionally restricted to a prefix, sorted.
    pub async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>, StoreError> {
        let mut names = self.backend.names().await?;
        if let Some(prefix) = prefix {
            names.retain(|n| n.starts_with(prefix));
        }
        names.sort();
        Ok(names)
    }
}

/// Object names must be a single, non-hidden path component.
pub fn validate_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\', '\0']) {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}
