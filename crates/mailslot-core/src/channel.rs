//! Channel naming — the fixed object names one server instance owns.
//!
//! Every object in the store that belongs to a channel is named
//! `<channel-id>.<suffix>`. The id is minted by the server at startup and has
//! no internal structure.

use std::fmt;

use uuid::Uuid;

use crate::envelope::{Envelope, EnvelopeError, Origin, Stamp};

/// The objects a channel consists of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Readiness marker published by the server.
    Server,
    /// Client → server command.
    In,
    /// Server → client response.
    Out,
    /// Client → server bulk-write request.
    Write,
    /// Server → client bulk-write status.
    WriteStatus,
}

impl Slot {
    pub const ALL: [Slot; 5] = [
        Slot::Server,
        Slot::In,
        Slot::Out,
        Slot::Write,
        Slot::WriteStatus,
    ];

    pub fn suffix(&self) -> &'static str {
        match self {
            Slot::Server => "server",
            Slot::In => "in",
            Slot::Out => "out",
            Slot::Write => "write",
            Slot::WriteStatus => "write_status",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelId(String);

impl ChannelId {
    /// Fresh random id for a new server instance.
    pub fn mint() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accept an externally supplied id. Ids are opaque, but they must not
    /// contain `.` (it would make the suffix ambiguous) or path separators.
    pub fn parse(id: &str) -> Option<Self> {
        let id = id.trim();
        if id.is_empty() || id.contains(['.', '/', '\\']) {
            return None;
        }
        Some(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn object_name(&self, slot: Slot) -> String {
        format!("{}.{}", self.0, slot.suffix())
    }

    pub fn all_object_names(&self) -> Vec<String> {
        Slot::ALL.iter().map(|s| self.object_name(*s)).collect()
    }

    /// Recover the channel id from a readiness marker's object name.
    pub fn from_marker_name(name: &str) -> Option<Self> {
        let id = name.strip_suffix(".server")?;
        Self::parse(id)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content of the `<id>.server` object: `SERVER|<start time>|READY`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessMarker {
    pub started_at: Stamp,
    pub status: String,
}

impl ReadinessMarker {
    pub const READY: &'static str = "READY";

    pub fn ready(started_at: Stamp) -> Self {
        Self {
            started_at,
            status: Self::READY.to_string(),
        }
    }

    pub fn encode(&self) -> String {
        Envelope::new(Origin::Server, self.started_at, self.status.clone()).encode()
    }

    /// Only markers written by a server role are well-formed.
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        let env = Envelope::parse(text)?;
        if env.origin != Origin::Server {
            return Err(EnvelopeError::UnknownOrigin(env.origin.to_string()));
        }
        Ok(Self {
            started_at: env.stamp,
            status: env.body,
        })
    }
}
