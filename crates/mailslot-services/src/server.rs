//! Server poll loop.
//!
//! ```text
//! STARTING → READY → (POLLING ⇄ EXECUTING) → SHUTTING_DOWN → STOPPED
//! ```
//!
//! Each tick reads `<id>.in` and `<id>.write`, rejects anything not newer
//! than the stream's bookmark, executes, publishes the reply, and removes the
//! consumed input. The input is only removed after the reply is written, so a
//! crash in between causes a duplicate read (rejected by the bookmark), never
//! a lost command.

use std::path::Path;

use tokio_util::sync::CancellationToken;

use mailslot_core::config::ServerSettings;
use mailslot_core::envelope::encode_payload;
use mailslot_core::{
    ChannelId, Command, Envelope, Origin, ReadinessMarker, Slot, StampSource, WriteRequest,
};

use crate::guard::{PendingReply, ServerState, Stream};
use crate::shell;
use crate::store::{ObjectStore, StoreError};

/// Ticks to wait for the client to collect the reply to `terminate`.
const TERMINATE_GRACE_TICKS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPhase {
    Starting,
    Ready,
    ShuttingDown,
    Stopped,
}

/// What one poll of one inbound slot did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing waiting.
    Idle,
    /// The store could not be reached; try again next tick.
    Unavailable,
    /// Object was not newer than the bookmark and was discarded.
    Stale,
    /// Object could not be parsed and was discarded.
    Malformed,
    /// Request executed and the reply published.
    Handled,
    /// Reply could not be published; it is parked for the next tick.
    Retrying,
    /// A terminate command was answered; the loop should stop.
    Terminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub command: TickOutcome,
    pub write: TickOutcome,
}

impl TickReport {
    pub fn wants_shutdown(&self) -> bool {
        self.command == TickOutcome::Terminate
    }
}

pub struct Server {
    store: ObjectStore,
    channel: ChannelId,
    settings: ServerSettings,
    stamps: StampSource,
    state: ServerState,
    phase: ServerPhase,
}

impl Server {
    /// New server with a freshly minted channel id.
    pub fn new(store: ObjectStore, settings: ServerSettings) -> Self {
        Self::with_channel(store, settings, ChannelId::mint())
    }

    pub fn with_channel(store: ObjectStore, settings: ServerSettings, channel: ChannelId) -> Self {
        Self {
            store,
            channel,
            settings,
            stamps: StampSource::new(),
            state: ServerState::new(),
            phase: ServerPhase::Starting,
        }
    }

    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    pub fn phase(&self) -> ServerPhase {
        self.phase
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    /// Publish the readiness marker. Moves to `Ready` on success.
    pub async fn start(&mut self) -> Result<(), StoreError> {
        self.phase = ServerPhase::Starting;
        let marker = ReadinessMarker::ready(self.stamps.next());
        self.store
            .put(&self.channel.object_name(Slot::Server), marker.encode())
            .await?;
        self.phase = ServerPhase::Ready;
        tracing::info!(channel = %self.channel, "server ready");
        Ok(())
    }

    /// Start, poll until cancelled or told to terminate, then clean up.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), StoreError> {
        let mut interval = tokio::time::interval(self.settings.poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        while self.phase == ServerPhase::Starting {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => match self.start().await {
                    Ok(()) => {}
                    Err(e) if e.is_transient() => {
                        tracing::warn!(error = %e, "failed to publish readiness marker, retrying");
                    }
                    Err(e) => return Err(e),
                },
            }
        }

        if self.phase == ServerPhase::Ready {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("shutdown requested");
                        break;
                    }
                    _ = interval.tick() => {
                        if self.tick().await.wants_shutdown() {
                            tracing::info!("terminate command received");
                            self.await_reply_pickup(&mut interval, &cancel).await;
                            break;
                        }
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Give the client a few ticks to consume the final reply before cleanup
    /// deletes it.
    async fn await_reply_pickup(
        &self,
        interval: &mut tokio::time::Interval,
        cancel: &CancellationToken,
    ) {
        let out = self.channel.object_name(Slot::Out);
        for _ in 0..TERMINATE_GRACE_TICKS {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = interval.tick() => {}
            }
            if let Ok(None) = self.store.get(&out).await {
                return;
            }
        }
        tracing::debug!("final reply not collected, cleaning up anyway");
    }

    /// One poll of both inbound slots.
    pub async fn tick(&mut self) -> TickReport {
        let command = self.poll_command().await;
        let write = self.poll_write().await;
        TickReport { command, write }
    }

    /// Delete every object the channel owns. Each delete is attempted even if
    /// an earlier one fails; leftovers only cost clients a discovery timeout.
    pub async fn shutdown(&mut self) {
        self.phase = ServerPhase::ShuttingDown;
        let mut failed = 0usize;
        for name in self.channel.all_object_names() {
            if let Err(e) = self.store.delete(&name).await {
                failed += 1;
                tracing::warn!(name = %name, error = %e, "failed to delete channel object");
            }
        }
        self.phase = ServerPhase::Stopped;
        tracing::info!(channel = %self.channel, failed, "server stopped");
    }

    // ── Command path ──────────────────────────────────────────────────────────

    pub async fn poll_command(&mut self) -> TickOutcome {
        let name = self.channel.object_name(Slot::In);
        let text = match self.store.get_text(&name).await {
            Ok(Some(text)) => text,
            Ok(None) => return TickOutcome::Idle,
            Err(e) => {
                tracing::warn!(name = %name, error = %e, "failed to read command object");
                return TickOutcome::Unavailable;
            }
        };

        let request = match Envelope::parse(&text) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(name = %name, error = %e, "discarding malformed command");
                self.discard(&name).await;
                return TickOutcome::Malformed;
            }
        };

        let stream = Stream::for_command(&request.body);
        if !self.state.is_fresh(&stream, request.stamp) {
            tracing::debug!(
                kind = stream.key(),
                stamp = %request.stamp,
                last = ?self.state.bookmark(&stream).map(|s| s.to_string()),
                "ignoring stale command"
            );
            self.discard(&name).await;
            return TickOutcome::Stale;
        }

        let command = Command::parse(&request.body);
        let payload = match self.state.take_pending(&stream, request.stamp) {
            Some(parked) => {
                tracing::info!(kind = stream.key(), stamp = %request.stamp, "re-sending parked reply");
                parked.payload
            }
            None => {
                tracing::info!(kind = stream.key(), stamp = %request.stamp, "processing command");
                encode_payload(self.execute(&command).await.as_bytes())
            }
        };

        let reply = Envelope::new(Origin::Server, self.stamps.next(), payload.clone());
        if let Err(e) = self
            .store
            .put(&self.channel.object_name(Slot::Out), reply.encode())
            .await
        {
            tracing::warn!(error = %e, "failed to publish response, parking it");
            self.state.park(
                stream,
                PendingReply {
                    request: request.stamp,
                    payload,
                },
            );
            return TickOutcome::Retrying;
        }
        tracing::info!(reply = %reply.stamp, request = %request.stamp, "response sent");

        self.discard(&name).await;
        self.state.record(stream, self.stamps.next());

        if command == Command::Terminate {
            TickOutcome::Terminate
        } else {
            TickOutcome::Handled
        }
    }

    async fn execute(&self, command: &Command) -> String {
        match command {
            Command::Run(shell) => match shell::execute(
                shell,
                self.settings.exec_timeout(),
                self.settings.work_dir.as_deref(),
            )
            .await
            {
                Ok(out) => out.render(),
                Err(e) => format!("Error executing command: {e}"),
            },
            Command::ReadFile(path) => match tokio::fs::read(path).await {
                Ok(data) => encode_payload(&data),
                Err(e) => format!("Error reading file: {e}"),
            },
            Command::ListDir(path) => list_dir(path).await,
            Command::Terminate => "Server terminating".to_string(),
            Command::Unknown(text) => {
                format!("Unknown or invalid command: {}", Command::kind(text))
            }
        }
    }

    // ── Write path ────────────────────────────────────────────────────────────

    pub async fn poll_write(&mut self) -> TickOutcome {
        let name = self.channel.object_name(Slot::Write);
        let text = match self.store.get_text(&name).await {
            Ok(Some(text)) => text,
            Ok(None) => return TickOutcome::Idle,
            Err(e) => {
                tracing::warn!(name = %name, error = %e, "failed to read write request");
                return TickOutcome::Unavailable;
            }
        };

        let outcome = match WriteRequest::parse(&text) {
            Err(e) => {
                tracing::warn!(name = %name, error = %e, "discarding malformed write request");
                self.publish_status(&format!("Write failed: {e}")).await;
                TickOutcome::Malformed
            }
            Ok(req) if !self.state.is_fresh(&Stream::Write, req.stamp) => {
                tracing::debug!(stamp = %req.stamp, "ignoring stale write request");
                TickOutcome::Stale
            }
            Ok(req) => {
                tracing::info!(stamp = %req.stamp, path = %req.path, bytes = req.content.len(), "processing write request");
                match tokio::fs::write(&req.path, &req.content).await {
                    Ok(()) => {
                        self.publish_status(&format!("Write successful: {}", req.path)).await;
                        self.state.record(Stream::Write, self.stamps.next());
                    }
                    Err(e) => {
                        tracing::warn!(path = %req.path, error = %e, "write failed");
                        self.publish_status(&format!("Write failed: {e}")).await;
                    }
                }
                TickOutcome::Handled
            }
        };

        // The request is consumed whatever happened to it.
        self.discard(&name).await;
        outcome
    }

    /// Best effort. Unlike command replies a lost status is not parked; the
    /// request is consumed either way.
    async fn publish_status(&self, status: &str) {
        let env = Envelope::new(Origin::Server, self.stamps.next(), status);
        if let Err(e) = self
            .store
            .put(&self.channel.object_name(Slot::WriteStatus), env.encode())
            .await
        {
            tracing::warn!(error = %e, "failed to publish write status");
        }
    }

    async fn discard(&self, name: &str) {
        if let Err(e) = self.store.delete(name).await {
            tracing::warn!(name = %name, error = %e, "failed to delete consumed object");
        }
    }
}

async fn list_dir(path: &Path) -> String {
    let mut entries = match tokio::fs::read_dir(path).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return "Err: No such dir".to_string()
        }
        Err(e) => return format!("Err: {e}"),
    };
    let mut names = Vec::new();
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => names.push(entry.file_name().to_string_lossy().into_owned()),
            Ok(None) => break,
            Err(e) => return format!("Err: {e}"),
        }
    }
    names.sort();
    names.join("\n")
}
