//! Child process supervision: spawn, capture, wait or stop.

use std::io::Write;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::context::{Cancelled, RunContext};

/// Time a child gets between the stop signal and a hard kill.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// Captured output of one process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    /// `None` when the process was ended by a signal.
    pub exit_code: Option<i32>,
    /// The signal that ended the process, if any.
    pub signal: Option<i32>,
}

/// Outcome of [`supervise`].
#[derive(Debug)]
pub struct Supervised {
    pub output: ProcOutput,
    /// Set when the context fired before the child exited on its own.
    pub cancelled: Option<Cancelled>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Stream {
    Stdout,
    Stderr,
}

/// Run `cmd` to completion, or until `ctx` fires.
///
/// On cancellation the child gets SIGTERM, then `grace` to exit, then
/// SIGKILL. Either way the child is reaped before this returns.
pub async fn supervise(
    ctx: &RunContext,
    mut cmd: Command,
    label: &str,
    echo: bool,
    grace: Duration,
) -> std::io::Result<Supervised> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;
    debug!(peer = %label, pid = ?child.id(), "process started");

    let mut out_task = tokio::spawn(collect_lines(
        child.stdout.take(),
        label.to_string(),
        Stream::Stdout,
        echo,
    ));
    let mut err_task = tokio::spawn(collect_lines(
        child.stderr.take(),
        label.to_string(),
        Stream::Stderr,
        echo,
    ));

    let (status, cancelled) = tokio::select! {
        status = child.wait() => (status?, None),
        reason = ctx.done() => {
            debug!(peer = %label, ?reason, "stopping process");
            (stop(&mut child, label, grace).await?, Some(reason))
        }
    };

    let stdout = drain(&mut out_task, grace).await;
    let stderr = drain(&mut err_task, grace).await;
    let signal = exit_signal(&status);
    debug!(peer = %label, code = ?status.code(), ?signal, "process exited");

    Ok(Supervised {
        output: ProcOutput {
            stdout,
            stderr,
            exit_code: status.code(),
            signal,
        },
        cancelled,
    })
}

/// Signal, wait up to `grace`, then kill.
async fn stop(child: &mut Child, label: &str, grace: Duration) -> std::io::Result<ExitStatus> {
    if let Some(pid) = child.id() {
        terminate(pid);
    }
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(peer = %label, grace_ms = grace.as_millis() as u64, "process ignored stop signal, killing");
            child.kill().await?;
            child.wait().await
        }
    }
}

#[cfg(unix)]
fn terminate(pid: u32) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions.
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn terminate(_pid: u32) {}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Wait for a reader task; a grandchild holding the pipe open must not
/// hold up the caller past `grace`.
async fn drain(task: &mut JoinHandle<Vec<String>>, grace: Duration) -> Vec<String> {
    match tokio::time::timeout(grace, &mut *task).await {
        Ok(Ok(lines)) => lines,
        Ok(Err(e)) => {
            warn!(error = %e, "output reader failed");
            Vec::new()
        }
        Err(_) => {
            task.abort();
            warn!("output pipe still open after exit, dropping remaining output");
            Vec::new()
        }
    }
}

/// Echo one line of peer output to our own stdout or stderr.
///
/// Write errors are ignored: a closed pipe downstream must not take the
/// supervising task with it.
pub(crate) fn echo_line(stream: Stream, label: &str, line: &str) {
    let _ = match stream {
        Stream::Stdout => writeln!(std::io::stdout().lock(), "[{label}] {line}"),
        Stream::Stderr => writeln!(std::io::stderr().lock(), "[{label}] {line}"),
    };
}

async fn collect_lines<R>(reader: Option<R>, label: String, stream: Stream, echo: bool) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut lines = Vec::new();
    let Some(reader) = reader else {
        return lines;
    };

    let mut reader = BufReader::new(reader).lines();
    loop {
        match reader.next_line().await {
            Ok(Some(line)) => {
                if echo {
                    echo_line(stream, &label, &line);
                }
                lines.push(line);
            }
            Ok(None) => break,
            Err(e) => {
                debug!(peer = %label, error = %e, "stopped reading process output");
                break;
            }
        }
    }
    lines
}
