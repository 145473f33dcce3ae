//! Envelope wire format — the `|`-delimited records exchanged through
//! channel objects.
//!
//! ```text
//! command       <ORIGIN>|<timestamp>|<command text>
//! response      <ORIGIN>|<timestamp>|<base64 payload>
//! write-request <ORIGIN>|<timestamp>|<path>|<base64 body>
//! write-status  <ORIGIN>|<timestamp>|<status text>
//! ```
//!
//! Timestamps are the only ordering information the protocol has. A reader
//! accepts an object only when its stamp is strictly newer than the last one
//! it accepted for the same stream, so stamps must round-trip through their
//! text form without losing precision.

use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, SubsecRound, TimeDelta, Utc};

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },
    #[error("unknown origin tag: {0:?}")]
    UnknownOrigin(String),
    #[error("unparseable timestamp: {0:?}")]
    BadStamp(String),
    #[error("invalid base64 payload: {0}")]
    BadBase64(String),
}

// ── Origin ────────────────────────────────────────────────────────────────────

/// Which role wrote an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    Client,
    Server,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Client => "CLIENT",
            Origin::Server => "SERVER",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Origin {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CLIENT" => Ok(Origin::Client),
            "SERVER" => Ok(Origin::Server),
            other => Err(EnvelopeError::UnknownOrigin(other.to_string())),
        }
    }
}

// ── Stamp ─────────────────────────────────────────────────────────────────────

/// Wall-clock timestamp with microsecond precision.
///
/// Rendered as RFC 3339 in UTC (`2024-05-01T10:00:00.123456Z`). Parsing also
/// accepts offset-less ISO-8601, which is read as UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Stamp(DateTime<Utc>);

impl Stamp {
    pub fn now() -> Self {
        Self(Utc::now().trunc_subsecs(6))
    }

    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(at.trunc_subsecs(6))
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// The smallest representable stamp after this one.
    pub fn succ(&self) -> Self {
        Self(self.0 + TimeDelta::microseconds(1))
    }

    pub fn parse(s: &str) -> Result<Self, EnvelopeError> {
        if let Ok(at) = DateTime::parse_from_rfc3339(s) {
            return Ok(Self::from_datetime(at.with_timezone(&Utc)));
        }
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| Self::from_datetime(naive.and_utc()))
            .map_err(|_| EnvelopeError::BadStamp(s.to_string()))
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_rfc3339_opts(SecondsFormat::Micros, true))
    }
}

/// Issues strictly increasing stamps within one process.
///
/// Two writes in the same microsecond (or across a backwards clock step) still
/// get distinct, ordered stamps.
#[derive(Debug, Default)]
pub struct StampSource {
    last: Mutex<Option<Stamp>>,
}

impl StampSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> Stamp {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let now = Stamp::now();
        let stamp = match *last {
            Some(prev) if now <= prev => prev.succ(),
            _ => now,
        };
        *last = Some(stamp);
        stamp
    }
}

// ── Envelopes ─────────────────────────────────────────────────────────────────

/// Three-field envelope used for commands, responses, write statuses and the
/// readiness marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub origin: Origin,
    pub stamp: Stamp,
    pub body: String,
}

impl Envelope {
    pub fn new(origin: Origin, stamp: Stamp, body: impl Into<String>) -> Self {
        Self {
            origin,
            stamp,
            body: body.into(),
        }
    }

    pub fn encode(&self) -> String {
        format!("{}|{}|{}", self.origin, self.stamp, self.body)
    }

    /// The body may itself contain `|`; only the first two separators count.
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        let parts: Vec<&str> = text.splitn(3, '|').collect();
        if parts.len() != 3 {
            return Err(EnvelopeError::FieldCount {
                expected: 3,
                found: parts.len(),
            });
        }
        Ok(Self {
            origin: parts[0].parse()?,
            stamp: Stamp::parse(parts[1])?,
            body: parts[2].to_string(),
        })
    }
}

/// Bulk-write request: a target path on the server plus the file body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub origin: Origin,
    pub stamp: Stamp,
    pub path: String,
    pub content: Vec<u8>,
}

impl WriteRequest {
    pub fn encode(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.origin,
            self.stamp,
            self.path,
            encode_payload(&self.content)
        )
    }

    /// Base64 never contains `|`, so the body is split off from the right and
    /// the path keeps any separators it carries.
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        let head = Envelope::parse(text)?;
        let (path, body) = head
            .body
            .rsplit_once('|')
            .ok_or(EnvelopeError::FieldCount {
                expected: 4,
                found: 3,
            })?;
        Ok(Self {
            origin: head.origin,
            stamp: head.stamp,
            path: path.to_string(),
            content: decode_payload(body)?,
        })
    }
}

// ── Payload codec ─────────────────────────────────────────────────────────────

pub fn encode_payload(data: &[u8]) -> String {
    STANDARD.encode(data)
}

pub fn decode_payload(text: &str) -> Result<Vec<u8>, EnvelopeError> {
    STANDARD
        .decode(text.trim())
        .map_err(|e| EnvelopeError::BadBase64(e.to_string()))
}
