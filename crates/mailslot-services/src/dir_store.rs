//! Directory-backed store for a folder both roles can see (network mount,
//! synced folder). Each object is one file; its revision is the BLAKE3 digest
//! of the content.
//!
//! The revision check and the replace are two separate filesystem calls, so
//! concurrent writers to the same name can still interleave. That matches the
//! protocol's single-writer-per-object assumption.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;

use crate::store::{validate_name, Backend, Revision, StoreError, Versioned};

pub struct DirBackend {
    root: PathBuf,
    tmp_counter: AtomicU64,
}

fn revision_of(content: &[u8]) -> Revision {
    Revision(hex::encode(blake3::hash(content).as_bytes()))
}

impl DirBackend {
    /// Open (and create if needed) the store directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            tmp_counter: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &str) -> Result<PathBuf, StoreError> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    /// Hidden temp names never show up in `names()`.
    fn tmp_path(&self, name: &str) -> PathBuf {
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(format!(".{name}.{}.{n}.tmp", std::process::id()))
    }

    async fn read_current(&self, path: &Path) -> Result<Option<Versioned>, StoreError> {
        match tokio::fs::read(path).await {
            Ok(data) => {
                let revision = revision_of(&data);
                Ok(Some(Versioned {
                    content: Bytes::from(data),
                    revision,
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Backend for DirBackend {
    async fn fetch(&self, name: &str) -> Result<Option<Versioned>, StoreError> {
        let path = self.path_of(name)?;
        self.read_current(&path).await
    }

    async fn store(
        &self,
        name: &str,
        content: Bytes,
        expected: Option<Revision>,
    ) -> Result<Revision, StoreError> {
        let path = self.path_of(name)?;
        let current = self.read_current(&path).await?.map(|v| v.revision);
        if current != expected {
            return Err(StoreError::Conflict(name.to_string()));
        }

        let revision = revision_of(&content);
        let tmp = self.tmp_path(name);
        if let Err(e) = tokio::fs::write(&tmp, &content).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(revision)
    }

    async fn remove(&self, name: &str, revision: &Revision) -> Result<bool, StoreError> {
        let path = self.path_of(name)?;
        match self.read_current(&path).await? {
            None => Ok(false),
            Some(current) if &current.revision != revision => {
                Err(StoreError::Conflict(name.to_string()))
            }
            Some(_) => match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            },
        }
    }

    async fn names(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }
}
