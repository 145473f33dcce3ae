//! Staleness guard.
//!
//! The store has no message ids and no atomic read-and-delete, so both roles
//! decide "have I already handled this?" from timestamps alone. The server
//! keeps one bookmark per command kind (plus one for bulk writes); the client
//! compares each reply against the stamp of its own outstanding request.
//!
//! Dedup is per kind, not per message: a second distinct `run` command whose
//! stamp is not newer than the last completed `run` is dropped.

use std::collections::HashMap;

use mailslot_core::{Command, Stamp, WRITE_KIND};

/// A logical stream of requests sharing one bookmark.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Stream {
    Command(String),
    Write,
}

impl Stream {
    pub fn for_command(text: &str) -> Self {
        Stream::Command(Command::kind(text).to_string())
    }

    pub fn key(&self) -> &str {
        match self {
            Stream::Command(kind) => kind,
            Stream::Write => WRITE_KIND,
        }
    }
}

/// A reply that was computed but could not be published. Kept so the next
/// read of the same request re-sends it instead of executing again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReply {
    pub request: Stamp,
    pub payload: String,
}

/// Server-side dedup state, owned by the poll loop and passed to each step.
#[derive(Debug, Default)]
pub struct ServerState {
    bookmarks: HashMap<Stream, Stamp>,
    pending: HashMap<Stream, PendingReply>,
}

impl ServerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bookmark(&self, stream: &Stream) -> Option<Stamp> {
        self.bookmarks.get(stream).copied()
    }

    /// True if `stamp` is strictly newer than the bookmark, or none exists.
    pub fn is_fresh(&self, stream: &Stream, stamp: Stamp) -> bool {
        self.bookmark(stream).map_or(true, |last| stamp > last)
    }

    /// Record completion. Bookmarks never move backwards.
    pub fn record(&mut self, stream: Stream, at: Stamp) {
        let slot = self.bookmarks.entry(stream).or_insert(at);
        if at > *slot {
            *slot = at;
        }
    }

    pub fn park(&mut self, stream: Stream, reply: PendingReply) {
        self.pending.insert(stream, reply);
    }

    /// Take the parked reply for `stream` if it answers the request stamped
    /// `request`. A parked reply for an older request is dropped.
    pub fn take_pending(&mut self, stream: &Stream, request: Stamp) -> Option<PendingReply> {
        let reply = self.pending.remove(stream)?;
        (reply.request == request).then_some(reply)
    }

    pub fn has_pending(&self, stream: &Stream) -> bool {
        self.pending.contains_key(stream)
    }
}

/// Client-side check: a reply only answers a request it is strictly newer than.
pub fn is_fresh_reply(request: Stamp, reply: Stamp) -> bool {
    reply > request
}
