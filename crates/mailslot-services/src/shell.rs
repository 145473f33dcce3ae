//! Shell command execution with a hard timeout.
//!
//! Commands run under `sh -c` in their own process group so a timeout can
//! kill the whole pipeline, not just the shell. Output is drained while the
//! command runs; whatever was collected before the kill is returned.

use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

/// How long to wait for pipes to reach EOF once the shell has exited.
/// Background jobs that inherited the pipes would otherwise hold them open.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// stdout followed by stderr, lossily decoded.
    pub output: String,
    pub timed_out: bool,
    pub timeout: Duration,
}

impl ExecOutput {
    /// Text sent back as the response body.
    pub fn render(&self) -> String {
        if self.timed_out {
            format!(
                "Command timed out after {} seconds.\nPartial output:\n{}",
                format_secs(self.timeout),
                self.output
            )
        } else {
            self.output.clone()
        }
    }
}

fn format_secs(d: Duration) -> String {
    if d.subsec_nanos() == 0 {
        d.as_secs().to_string()
    } else {
        format!("{:.1}", d.as_secs_f64())
    }
}

/// Run `command` and capture its combined output. Only spawn failures are
/// errors; a timeout is reported through `ExecOutput::timed_out`.
pub async fn execute(
    command: &str,
    timeout: Duration,
    work_dir: Option<&Path>,
) -> std::io::Result<ExecOutput> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);
    if let Some(dir) = work_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn()?;

    let stdout_buf = Arc::new(Mutex::new(Vec::new()));
    let stderr_buf = Arc::new(Mutex::new(Vec::new()));
    let mut readers = Vec::new();
    if let Some(out) = child.stdout.take() {
        readers.push(tokio::spawn(drain(out, stdout_buf.clone())));
    }
    if let Some(err) = child.stderr.take() {
        readers.push(tokio::spawn(drain(err, stderr_buf.clone())));
    }

    let timed_out = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => {
            tracing::debug!(?status, "command exited");
            false
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "failed to wait for command");
            false
        }
        Err(_) => {
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "command timed out, killing");
            kill_group(&mut child);
            let _ = child.wait().await;
            true
        }
    };

    let _ = tokio::time::timeout(DRAIN_GRACE, async {
        for reader in readers.iter_mut() {
            let _ = reader.await;
        }
    })
    .await;
    for reader in &readers {
        reader.abort();
    }

    let mut combined = take(&stdout_buf);
    combined.extend_from_slice(&take(&stderr_buf));

    Ok(ExecOutput {
        output: String::from_utf8_lossy(&combined).into_owned(),
        timed_out,
        timeout,
    })
}

async fn drain<R: AsyncRead + Unpin>(mut reader: R, sink: Arc<Mutex<Vec<u8>>>) {
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => sink
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .extend_from_slice(&buf[..n]),
        }
    }
}

fn take(buf: &Mutex<Vec<u8>>) -> Vec<u8> {
    std::mem::take(&mut *buf.lock().unwrap_or_else(|e| e.into_inner()))
}

fn kill_group(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // Negative pid addresses the process group created by process_group(0).
            unsafe {
                libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
            }
        }
    }
    let _ = child.start_kill();
}
