//! Client side of the protocol: channel discovery, command round-trips, and
//! bulk writes.
//!
//! Every request carries a stamp taken immediately before it is written. A
//! reply is only accepted if its stamp is strictly newer; anything else is a
//! leftover from an earlier round and is left alone while polling continues.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use mailslot_core::config::ClientSettings;
use mailslot_core::envelope::decode_payload;
use mailslot_core::{
    ChannelId, Command, Envelope, EnvelopeError, Origin, ReadinessMarker, Slot, Stamp,
    StampSource, WriteRequest,
};

use crate::guard::is_fresh_reply;
use crate::store::{ObjectStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("not attached to a channel")]
    NotAttached,
    #[error("failed to publish request: {0}")]
    Publish(#[source] StoreError),
    #[error("no fresh reply within {waited:?}")]
    Timeout { waited: Duration },
    #[error("reply could not be decoded: {0}")]
    BadReply(#[source] EnvelopeError),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cancelled")]
    Cancelled,
}

/// Decoded answer to a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub text: String,
    /// Set when a `read` reply was saved to the download directory.
    pub saved_to: Option<PathBuf>,
    pub stamp: Stamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteStatus {
    pub succeeded: bool,
    pub message: String,
    pub stamp: Stamp,
}

pub struct Client {
    store: ObjectStore,
    settings: ClientSettings,
    channel: Option<ChannelId>,
    stamps: StampSource,
}

impl Client {
    pub fn new(store: ObjectStore, settings: ClientSettings) -> Self {
        Self {
            store,
            settings,
            channel: None,
            stamps: StampSource::new(),
        }
    }

    /// Bind to a known channel without scanning the store.
    pub fn attach(&mut self, channel: ChannelId) {
        self.channel = Some(channel);
    }

    pub fn channel(&self) -> Option<&ChannelId> {
        self.channel.as_ref()
    }

    // ── Discovery ─────────────────────────────────────────────────────────────

    /// One pass over the store looking for a live readiness marker,
    /// optionally restricted to `wanted`.
    pub async fn scan(&self, wanted: Option<&ChannelId>) -> Result<Option<ChannelId>, StoreError> {
        for name in self.store.list(None).await? {
            let Some(id) = ChannelId::from_marker_name(&name) else {
                continue;
            };
            if wanted.is_some_and(|w| w != &id) {
                continue;
            }
            match self.store.get_text(&name).await? {
                Some(text) if ReadinessMarker::parse(&text).is_ok() => return Ok(Some(id)),
                _ => tracing::debug!(name = %name, "ignoring marker without server tag"),
            }
        }
        Ok(None)
    }

    /// Scan until a server shows up. There is no timeout; only `cancel` ends
    /// the wait early.
    pub async fn discover(
        &mut self,
        wanted: Option<&ChannelId>,
        cancel: &CancellationToken,
    ) -> Result<ChannelId, ClientError> {
        tracing::info!(wanted = ?wanted.map(|w| w.to_string()), "looking for active server");
        loop {
            match self.scan(wanted).await {
                Ok(Some(id)) => {
                    tracing::info!(channel = %id, "found server channel");
                    self.channel = Some(id.clone());
                    return Ok(id);
                }
                Ok(None) => tracing::debug!("no server yet"),
                Err(e) => tracing::warn!(error = %e, "discovery scan failed"),
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                _ = tokio::time::sleep(self.settings.discovery_interval()) => {}
            }
        }
    }

    // ── Round-trips ───────────────────────────────────────────────────────────

    /// Publish `command` and wait for its reply. For `read <path>` the file
    /// is also saved under the download directory.
    pub async fn send_command(&self, command: &str) -> Result<CommandReply, ClientError> {
        let channel = self.channel.as_ref().ok_or(ClientError::NotAttached)?;

        let request = Envelope::new(Origin::Client, self.stamps.next(), command);
        self.store
            .put(&channel.object_name(Slot::In), request.encode())
            .await
            .map_err(ClientError::Publish)?;
        tracing::info!(stamp = %request.stamp, "command sent, waiting for response");

        let reply = self.await_reply(channel, Slot::Out, request.stamp).await?;
        let decoded = decode_payload(&reply.body).map_err(ClientError::BadReply)?;
        let text = String::from_utf8_lossy(&decoded).into_owned();

        let saved_to = match Command::parse(command) {
            Command::ReadFile(remote) => self.save_download(&remote, &text).await,
            _ => None,
        };

        Ok(CommandReply {
            text,
            saved_to,
            stamp: reply.stamp,
        })
    }

    /// Push a local file to `remote` on the server's filesystem.
    pub async fn write_file(&self, local: &Path, remote: &str) -> Result<WriteStatus, ClientError> {
        let channel = self.channel.as_ref().ok_or(ClientError::NotAttached)?;

        let content = tokio::fs::read(local).await.map_err(|source| ClientError::Io {
            path: local.to_path_buf(),
            source,
        })?;
        let request = WriteRequest {
            origin: Origin::Client,
            stamp: self.stamps.next(),
            path: remote.to_string(),
            content,
        };
        self.store
            .put(&channel.object_name(Slot::Write), request.encode())
            .await
            .map_err(ClientError::Publish)?;
        tracing::info!(stamp = %request.stamp, remote, "write request sent, waiting for status");

        let status = self
            .await_reply(channel, Slot::WriteStatus, request.stamp)
            .await?;
        Ok(WriteStatus {
            succeeded: status.body.starts_with("Write successful"),
            message: status.body,
            stamp: status.stamp,
        })
    }

    /// Poll `slot` until a server envelope newer than `request` appears,
    /// then consume it.
    async fn await_reply(
        &self,
        channel: &ChannelId,
        slot: Slot,
        request: Stamp,
    ) -> Result<Envelope, ClientError> {
        let name = channel.object_name(slot);
        let started = Instant::now();
        let deadline = started + self.settings.response_timeout();

        loop {
            match self.store.get_text(&name).await {
                Ok(Some(text)) => match Envelope::parse(&text) {
                    Ok(reply) if reply.origin != Origin::Server => {
                        tracing::warn!(name = %name, origin = %reply.origin, "ignoring reply not written by a server");
                    }
                    Ok(reply) if is_fresh_reply(request, reply.stamp) => {
                        if let Err(e) = self.store.delete(&name).await {
                            tracing::warn!(name = %name, error = %e, "failed to delete consumed reply");
                        }
                        return Ok(reply);
                    }
                    Ok(reply) => {
                        tracing::debug!(reply = %reply.stamp, request = %request, "ignoring stale reply");
                    }
                    Err(e) => tracing::warn!(name = %name, error = %e, "ignoring malformed reply"),
                },
                Ok(None) => {}
                Err(e) => tracing::warn!(name = %name, error = %e, "failed to poll for reply"),
            }

            if Instant::now() >= deadline {
                tracing::warn!(name = %name, "response timeout");
                return Err(ClientError::Timeout {
                    waited: started.elapsed(),
                });
            }
            tokio::time::sleep(self.settings.poll_interval()).await;
        }
    }

    /// `read` replies carry the file base64-encoded once more. Anything that
    /// does not decode is a server-side error message and is not saved.
    async fn save_download(&self, remote: &Path, text: &str) -> Option<PathBuf> {
        let content = match decode_payload(text) {
            Ok(content) => content,
            Err(_) => {
                tracing::warn!(remote = %remote.display(), "read reply is not file content");
                return None;
            }
        };
        let file_name = remote
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "download".into());
        let local = self.settings.download_dir.join(file_name);
        match tokio::fs::write(&local, &content).await {
            Ok(()) => {
                tracing::info!(path = %local.display(), bytes = content.len(), "file saved locally");
                Some(local)
            }
            Err(e) => {
                tracing::warn!(path = %local.display(), error = %e, "failed to save file");
                None
            }
        }
    }
}
