//! Helpers for running child processes with timeouts and bounded output.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, instrument, warn};

/// How long output readers may keep draining once the child has exited or
/// been killed.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    /// `None` when the child was killed after timing out.
    pub status: Option<ExitStatus>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.is_some_and(|status| status.success())
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.status.and_then(|status| status.code())
    }

    pub fn stderr_tail(&self, max_chars: usize) -> String {
        let text = String::from_utf8_lossy(&self.stderr);
        let trimmed = text.trim();
        let count = trimmed.chars().count();
        if count <= max_chars {
            return trimmed.to_string();
        }
        trimmed.chars().skip(count - max_chars).collect()
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr kept in memory (bytes beyond this are discarded while still draining the pipe).
/// The timeout covers writing stdin and waiting for exit; the child is killed when it expires or
/// the returned future is dropped. Output still open after a short grace period is discarded.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub async fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_task = tokio::spawn(read_stream_limited(stdout, output_limit_bytes));
    let stderr_task = tokio::spawn(read_stream_limited(stderr, output_limit_bytes));

    // Writing stdin counts against the timeout: a child that never reads
    // would otherwise block the write until it exits.
    let deadline = Instant::now() + timeout;
    let child_stdin = child.stdin.take();
    let waited = tokio::time::timeout_at(deadline, async {
        if let (Some(input), Some(mut pipe)) = (stdin, child_stdin) {
            match pipe.write_all(input).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => {
                    debug!("child closed stdin before reading all input");
                }
                Err(err) => return Err(err).context("write stdin"),
            }
        }
        child.wait().await.context("wait for command")
    })
    .await;

    let mut timed_out = false;
    let status = match waited {
        Ok(status) => Some(status?),
        Err(_) => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().await.context("kill command")?;
            None
        }
    };

    // A grandchild can keep the pipes open after the child is gone.
    let drain_deadline = deadline.max(Instant::now()) + OUTPUT_DRAIN_GRACE;
    let (stdout, stdout_truncated) = join_output(stdout_task, drain_deadline)
        .await
        .context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_task, drain_deadline)
        .await
        .context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.and_then(|s| s.code()), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

async fn join_output(
    mut handle: JoinHandle<Result<(Vec<u8>, usize)>>,
    deadline: Instant,
) -> Result<(Vec<u8>, usize)> {
    match tokio::time::timeout_at(deadline, &mut handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(anyhow!("output reader task panicked")),
        Err(_) => {
            handle.abort();
            warn!("output pipe still open after the command finished, discarding");
            Ok((Vec::new(), 0))
        }
    }
}

async fn read_stream_limited<R: AsyncRead + Unpin>(
    mut reader: R,
    limit: usize,
) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).await.context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[tokio::test]
    async fn captures_stdout_and_stdin() {
        let output = run_command_with_timeout(
            sh("cat"),
            Some(b"hello"),
            Duration::from_secs(5),
            1024,
        )
        .await
        .expect("run");
        assert!(output.success());
        assert_eq!(output.stdout, b"hello");
    }

    #[tokio::test]
    async fn truncates_output_beyond_limit() {
        let output = run_command_with_timeout(
            sh("printf 0123456789"),
            None,
            Duration::from_secs(5),
            4,
        )
        .await
        .expect("run");
        assert_eq!(output.stdout, b"0123");
        assert_eq!(output.stdout_truncated, 6);
    }

    #[tokio::test]
    async fn kills_on_timeout() {
        let output = run_command_with_timeout(
            sh("sleep 5"),
            None,
            Duration::from_millis(100),
            1024,
        )
        .await
        .expect("run");
        assert!(output.timed_out);
        assert!(!output.success());
        assert_eq!(output.exit_code(), None);
    }

    #[tokio::test]
    async fn timeout_holds_when_a_grandchild_keeps_pipes_open() {
        let started = std::time::Instant::now();
        let output = run_command_with_timeout(
            sh("sleep 6 & sleep 6"),
            None,
            Duration::from_millis(200),
            1024,
        )
        .await
        .expect("run");
        assert!(output.timed_out);
        assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());
    }

    #[tokio::test]
    async fn timeout_covers_stdin_the_child_never_reads() {
        let input = vec![b'x'; 1024 * 1024];
        let started = std::time::Instant::now();
        let output = run_command_with_timeout(
            sh("sleep 6"),
            Some(&input),
            Duration::from_millis(200),
            1024,
        )
        .await
        .expect("run");
        assert!(output.timed_out);
        assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());
    }

    #[tokio::test]
    async fn child_exiting_without_reading_stdin_is_not_an_error() {
        let input = vec![b'x'; 1024 * 1024];
        let output = run_command_with_timeout(
            sh("echo done"),
            Some(&input),
            Duration::from_secs(5),
            1024,
        )
        .await
        .expect("run");
        assert!(output.success());
        assert_eq!(output.stdout, b"done\n");
    }

    #[test]
    fn stderr_tail_keeps_last_chars() {
        let output = CommandOutput {
            status: None,
            stdout: Vec::new(),
            stderr: b"  first line\nlast line \n".to_vec(),
            stdout_truncated: 0,
            stderr_truncated: 0,
            timed_out: false,
        };
        assert_eq!(output.stderr_tail(9), "last line");
    }
}
