//! Interactive client prompt.

use std::path::Path;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

use mailslot_services::Client;

/// What a line typed at the prompt asks for.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Quit,
    Empty,
    Write { local: &'a str, remote: &'a str },
    WriteUsage,
    Send(&'a str),
}

fn classify(line: &str) -> Input<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
        return Input::Quit;
    }
    if let Some(rest) = line.strip_prefix("write ") {
        return match rest.trim().split_once(char::is_whitespace) {
            Some((local, remote)) if !remote.trim().is_empty() => Input::Write {
                local,
                remote: remote.trim(),
            },
            _ => Input::WriteUsage,
        };
    }
    Input::Send(line)
}

pub async fn run(client: &Client, cancel: &CancellationToken) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"Command> ").await?;
        stdout.flush().await?;

        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
        };

        match classify(&line) {
            Input::Quit => break,
            Input::Empty => continue,
            Input::WriteUsage => println!("Usage: write <local_path> <remote_path>"),
            Input::Write { local, remote } => {
                match client.write_file(Path::new(local), remote).await {
                    Ok(status) => println!("Server status: {}", status.message),
                    Err(e) => println!("Write failed: {e}"),
                }
            }
            Input::Send(command) => match client.send_command(command).await {
                Ok(reply) => match reply.saved_to {
                    Some(path) => println!("File saved locally as: {}", path.display()),
                    None => print!("{}", with_trailing_newline(&reply.text)),
                },
                Err(e) => println!("Request failed: {e}"),
            },
        }
    }
    Ok(())
}

fn with_trailing_newline(text: &str) -> String {
    if text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{text}\n")
    }
}
