//! Child-process helpers for subprocess-backed generators.

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured output of one finished (or killed) child.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Last `max_chars` characters of stderr, for error messages.
    pub fn stderr_tail(&self, max_chars: usize) -> String {
        let text = String::from_utf8_lossy(&self.stderr);
        let text = text.trim();
        let total = text.chars().count();
        text.chars().skip(total.saturating_sub(max_chars)).collect()
    }
}

/// Run `cmd` to completion or until `timeout`, feeding `stdin` and capturing
/// at most `output_limit_bytes` of each output stream.
///
/// Stdin is written and both output pipes are drained on their own threads, so
/// large prompts and chatty children cannot deadlock on full pipe buffers.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes = output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| {
        error!(err = %e, "failed to spawn command");
        anyhow::Error::new(e).context("spawn command")
    })?;

    let writer = match stdin {
        Some(input) => {
            let mut pipe = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            let input = input.to_vec();
            Some(thread::spawn(move || -> Result<()> {
                pipe.write_all(&input).context("write stdin")?;
                Ok(())
            }))
        }
        None => None,
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_reader = thread::spawn(move || read_limited(stdout, output_limit_bytes));
    let stderr_reader = thread::spawn(move || read_limited(stderr, output_limit_bytes));

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => (status, false),
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            child.kill().context("kill command")?;
            (child.wait().context("wait command after kill")?, true)
        }
    };

    if let Some(writer) = writer {
        // A child that exits without reading its input closes the pipe early.
        if let Err(err) = join(writer) {
            debug!(err = %err, "stdin writer did not finish");
        }
    }
    let (stdout, stdout_truncated) = join(stdout_reader).context("join stdout")?;
    let (stderr, stderr_truncated) = join(stderr_reader).context("join stderr")?;
    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

fn join<T>(handle: thread::JoinHandle<Result<T>>) -> Result<T> {
    handle
        .join()
        .map_err(|_| anyhow!("pipe thread panicked"))?
}

/// Drain `reader` completely, keeping only the first `limit` bytes.
fn read_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut kept = Vec::new();
    let mut dropped = 0usize;
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(kept.len()).min(n);
        kept.extend_from_slice(&chunk[..room]);
        dropped += n - room;
    }
    Ok((kept, dropped))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn echoes_stdin_through_cat() {
        let output = run_command_with_timeout(
            Command::new("cat"),
            Some(b"the courier waits"),
            Duration::from_secs(10),
            1024,
        )
        .expect("run cat");
        assert!(output.status.success());
        assert_eq!(output.stdout_text(), "the courier waits");
        assert!(!output.timed_out);
    }

    #[test]
    fn truncates_beyond_limit_but_drains() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "printf 'abcdefghij'"]);
        let output = run_command_with_timeout(cmd, None, Duration::from_secs(10), 4).expect("run");
        assert_eq!(output.stdout, b"abcd");
        assert_eq!(output.stdout_truncated, 6);
    }

    #[test]
    fn kills_on_timeout() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let output =
            run_command_with_timeout(cmd, None, Duration::from_millis(100), 1024).expect("run");
        assert!(output.timed_out);
    }

    #[test]
    fn stderr_tail_keeps_the_end() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "printf 'first line\\nlast words' 1>&2; exit 3"]);
        let output = run_command_with_timeout(cmd, None, Duration::from_secs(10), 1024).expect("run");
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.stderr_tail(10), "last words");
    }
}
