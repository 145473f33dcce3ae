//! mailslot integration test harness.
//!
//! Each test runs a real server loop and a real client in one process,
//! talking through a shared in-memory (or temp-directory) store with short
//! tick intervals. Shell commands are executed for real.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use mailslot_core::config::{ClientSettings, ServerSettings};
use mailslot_core::ChannelId;
use mailslot_services::{
    Backend, Client, MemoryBackend, ObjectStore, Revision, Server, StoreError, Versioned,
};

mod cleanup;
mod faults;
mod staleness;

// ── Harness ───────────────────────────────────────────────────────────────────

pub fn server_settings() -> ServerSettings {
    ServerSettings {
        poll_interval_ms: 20,
        exec_timeout_secs: 1,
        work_dir: None,
    }
}

pub fn client_settings(download_dir: &Path) -> ClientSettings {
    ClientSettings {
        poll_interval_ms: 10,
        response_timeout_secs: 5,
        discovery_interval_ms: 10,
        download_dir: download_dir.to_path_buf(),
    }
}

pub fn memory_store() -> ObjectStore {
    ObjectStore::new(Arc::new(MemoryBackend::new()))
}

/// A server loop running in the background.
pub struct RunningServer {
    pub channel: ChannelId,
    pub cancel: CancellationToken,
    pub task: JoinHandle<Server>,
}

impl RunningServer {
    /// Cancel the loop and wait for cleanup to finish.
    pub async fn stop(self) -> Result<Server> {
        self.cancel.cancel();
        self.task.await.context("server task panicked")
    }
}

pub fn spawn_server(store: ObjectStore) -> RunningServer {
    let mut server = Server::new(store, server_settings());
    let channel = server.channel().clone();
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let task = tokio::spawn(async move {
        server.run(token).await.expect("server loop failed");
        server
    });
    RunningServer {
        channel,
        cancel,
        task,
    }
}

/// Client bound to the first server it discovers.
pub async fn discovered_client(store: ObjectStore, download_dir: &Path) -> Result<Client> {
    let mut client = Client::new(store, client_settings(download_dir));
    let cancel = CancellationToken::new();
    tokio::time::timeout(
        std::time::Duration::from_secs(5),
        client.discover(None, &cancel),
    )
    .await
    .context("discovery took too long")??;
    Ok(client)
}

/// Backend that fails transiently for names ending in `suffix`: `store`
/// until `failures` is used up, and `fetch` until `fetch_failures` is.
pub struct FlakyBackend {
    pub inner: MemoryBackend,
    pub suffix: &'static str,
    pub failures: AtomicUsize,
    pub fetch_failures: AtomicUsize,
}

impl FlakyBackend {
    pub fn new(suffix: &'static str, failures: usize) -> Self {
        Self {
            inner: MemoryBackend::new(),
            suffix,
            failures: AtomicUsize::new(failures),
            fetch_failures: AtomicUsize::new(0),
        }
    }

    /// Reads of `suffix` objects fail `failures` times; writes always work.
    pub fn failing_fetch(suffix: &'static str, failures: usize) -> Self {
        Self {
            fetch_failures: AtomicUsize::new(failures),
            ..Self::new(suffix, 0)
        }
    }

    fn take_failure(&self, name: &str, budget: &AtomicUsize) -> bool {
        name.ends_with(self.suffix)
            && budget
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
    }
}

#[async_trait]
impl Backend for FlakyBackend {
    async fn fetch(&self, name: &str) -> Result<Option<Versioned>, StoreError> {
        if self.take_failure(name, &self.fetch_failures) {
            return Err(StoreError::Transient("simulated read timeout".into()));
        }
        self.inner.fetch(name).await
    }

    async fn store(
        &self,
        name: &str,
        content: Bytes,
        expected: Option<Revision>,
    ) -> Result<Revision, StoreError> {
        if self.take_failure(name, &self.failures) {
            return Err(StoreError::Transient("simulated rate limit".into()));
        }
        self.inner.store(name, content, expected).await
    }

    async fn remove(&self, name: &str, revision: &Revision) -> Result<bool, StoreError> {
        self.inner.remove(name, revision).await
    }

    async fn names(&self) -> Result<Vec<String>, StoreError> {
        self.inner.names().await
    }
}
