//! Commands a client can ask a server to perform.

use std::path::PathBuf;

/// Bookmark key reserved for the bulk-write stream.
pub const WRITE_KIND: &str = "write";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `run <shell>` — execute and capture combined stdout+stderr.
    Run(String),
    /// `read <path>` — return the file's bytes.
    ReadFile(PathBuf),
    /// `ls <path>` — newline-separated directory listing.
    ListDir(PathBuf),
    /// `terminate` or `done` — reply, then shut the server down.
    Terminate,
    /// Anything else, kept verbatim for the error reply.
    Unknown(String),
}

impl Command {
    /// First whitespace-delimited token; the unit of server-side dedup.
    pub fn kind(text: &str) -> &str {
        text.split_whitespace().next().unwrap_or("")
    }

    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        let (kind, arg) = match text.split_once(char::is_whitespace) {
            Some((kind, arg)) => (kind, arg.trim()),
            None => (text, ""),
        };
        match (kind, arg.is_empty()) {
            ("run", false) => Command::Run(arg.to_string()),
            ("read", false) => Command::ReadFile(PathBuf::from(arg)),
            ("ls", false) => Command::ListDir(PathBuf::from(arg)),
            ("terminate" | "done", _) => Command::Terminate,
            _ => Command::Unknown(text.to_string()),
        }
    }
}
