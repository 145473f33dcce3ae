use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::store::{validate_name, Backend, Revision, StoreError, Versioned};

/// In-process store. Clones share the same objects, so a server and a client
/// built from clones of one backend see each other's writes.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    objects: Arc<DashMap<String, Versioned>>,
    next_revision: Arc<AtomicU64>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn mint_revision(&self) -> Revision {
        Revision(
            self.next_revision
                .fetch_add(1, Ordering::Relaxed)
                .to_string(),
        )
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn fetch(&self, name: &str) -> Result<Option<Versioned>, StoreError> {
        validate_name(name)?;
        Ok(self.objects.get(name).map(|v| v.clone()))
    }

    async fn store(
        &self,
        name: &str,
        content: Bytes,
        expected: Option<Revision>,
    ) -> Result<Revision, StoreError> {
        validate_name(name)?;
        let revision = self.mint_revision();
        let fresh = Versioned {
            content,
            revision: revision.clone(),
        };
        match (self.objects.entry(name.to_string()), expected) {
            (Entry::Vacant(slot), None) => {
                slot.insert(fresh);
            }
            (Entry::Occupied(mut slot), Some(expected)) if slot.get().revision == expected => {
                slot.insert(fresh);
            }
            _ => return Err(StoreError::Conflict(name.to_string())),
        }
        Ok(revision)
    }

    async fn remove(&self, name: &str, revision: &Revision) -> Result<bool, StoreError> {
        validate_name(name)?;
        match self.objects.entry(name.to_string()) {
            Entry::Vacant(_) => Ok(false),
            Entry::Occupied(slot) if &slot.get().revision == revision => {
                slot.remove();
                Ok(true)
            }
            Entry::Occupied(_) => Err(StoreError::Conflict(name.to_string())),
        }
    }

    async fn names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.objects.iter().map(|e| e.key().clone()).collect())
    }
}
