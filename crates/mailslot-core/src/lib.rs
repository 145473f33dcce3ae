//! mailslot-core — channel naming, envelope wire format, and command parsing.
//! All other mailslot crates depend on this one.

pub mod channel;
pub mod command;
pub mod config;
pub mod envelope;

pub use channel::{ChannelId, ReadinessMarker, Slot};
pub use command::{Command, WRITE_KIND};
pub use envelope::{Envelope, EnvelopeError, Origin, Stamp, StampSource, WriteRequest};
