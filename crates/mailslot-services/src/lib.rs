//! mailslot-services — store adapter, command execution, and the two poll
//! loops that correlate requests with responses through the store.

pub mod client;
pub mod dir_store;
pub mod guard;
pub mod memory_store;
pub mod server;
pub mod shell;
pub mod store;

pub use client::{Client, ClientError, CommandReply, WriteStatus};
pub use dir_store::DirBackend;
pub use guard::{PendingReply, ServerState, Stream};
pub use memory_store::MemoryBackend;
pub use server::{Server, ServerPhase, TickOutcome, TickReport};
pub use shell::ExecOutput;
pub use store::{Backend, ObjectStore, Revision, StoreError, Versioned};
