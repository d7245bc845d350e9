//! Helpers for running child processes with timeouts and bounded output.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

const KILL_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    /// `None` when the child was killed after a timeout.
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

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Stdout and stderr joined, with truncation notices appended.
    pub fn combined(&self, label: &str) -> String {
        let mut buf = String::from_utf8_lossy(&self.stdout).into_owned();
        if self.stdout_truncated > 0 {
            buf.push_str(&format!(
                "\n[{label} stdout truncated {} bytes]\n",
                self.stdout_truncated
            ));
        }
        if !self.stderr.is_empty() {
            if !buf.is_empty() && !buf.ends_with('\n') {
                buf.push('\n');
            }
            buf.push_str(&String::from_utf8_lossy(&self.stderr));
        }
        if self.stderr_truncated > 0 {
            buf.push_str(&format!(
                "\n[{label} stderr truncated {} bytes]\n",
                self.stderr_truncated
            ));
        }
        buf
    }
}

/// Build a `sh -c <script>` command.
pub fn shell_command(script: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(script);
    cmd
}

/// Build a command from an argv list.
pub fn argv_command(argv: &[String]) -> Result<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("empty command"))?;
    let mut cmd = Command::new(program);
    cmd.args(args);
    Ok(cmd)
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is drained concurrently while the child runs. `output_limit_bytes` bounds the
/// amount of stdout/stderr kept in memory (bytes beyond this are discarded while still
/// draining the pipe). On timeout the child is killed and `timed_out` is set.
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

    let child_stdin = match stdin {
        Some(input) => {
            let pipe = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            Some((pipe, input))
        }
        None => None,
    };

    // Feeding stdin counts against the timeout.
    let finished = tokio::time::timeout(timeout, async {
        if let Some((mut pipe, input)) = child_stdin {
            // The child may exit without reading all of stdin.
            if let Err(e) = pipe.write_all(input).await {
                warn!(err = %e, "child closed stdin early");
            }
            drop(pipe);
        }
        child.wait().await
    })
    .await;

    let (status, timed_out) = match finished {
        Ok(status) => (Some(status.context("wait for command")?), false),
        Err(_) => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            child.kill().await.context("kill command")?;
            (None, true)
        }
    };

    let (stdout, stdout_truncated) = join_output(stdout_task, timed_out)
        .await
        .context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_task, timed_out)
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

/// Grandchildren of a killed command can keep its pipes open; after a
/// timeout, readers get a short grace period and are then abandoned.
async fn join_output(
    handle: JoinHandle<Result<(Vec<u8>, usize)>>,
    timed_out: bool,
) -> Result<(Vec<u8>, usize)> {
    if !timed_out {
        return handle.await.context("output reader task failed")?;
    }
    let abort = handle.abort_handle();
    match tokio::time::timeout(KILL_DRAIN_GRACE, handle).await {
        Ok(joined) => joined.context("output reader task failed")?,
        Err(_) => {
            abort.abort();
            warn!("output pipe still open after kill, discarding");
            Ok((Vec::new(), 0))
        }
    }
}

async fn read_stream_limited<R>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)>
where
    R: AsyncRead + Unpin,
{
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

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_exit_code_and_output() {
        let out = run_command_with_timeout(
            shell_command("echo hello; echo oops >&2; exit 3"),
            None,
            Duration::from_secs(10),
            1024,
        )
        .await
        .expect("run");
        assert!(!out.success());
        assert_eq!(out.exit_code(), Some(3));
        assert_eq!(out.stdout_lossy(), "hello\n");
        assert!(out.combined("test").contains("oops"));
    }

    #[tokio::test]
    async fn pipes_stdin_to_child() {
        let out = run_command_with_timeout(
            shell_command("cat"),
            Some(b"prompt text"),
            Duration::from_secs(10),
            1024,
        )
        .await
        .expect("run");
        assert!(out.success());
        assert_eq!(out.stdout_lossy(), "prompt text");
    }

    #[tokio::test]
    async fn bounds_captured_output() {
        let out = run_command_with_timeout(
            shell_command("printf '%0100d' 0"),
            None,
            Duration::from_secs(10),
            10,
        )
        .await
        .expect("run");
        assert_eq!(out.stdout.len(), 10);
        assert_eq!(out.stdout_truncated, 90);
        assert!(out.combined("test").contains("[test stdout truncated 90 bytes]"));
    }

    #[tokio::test]
    async fn kills_on_timeout() {
        let out = run_command_with_timeout(
            shell_command("exec sleep 5"),
            None,
            Duration::from_millis(100),
            1024,
        )
        .await
        .expect("run");
        assert!(out.timed_out);
        assert!(!out.success());
        assert_eq!(out.exit_code(), None);
    }

    /// A child that never reads stdin cannot stall a large write past the timeout.
    #[tokio::test]
    async fn unread_stdin_is_bounded_by_timeout() {
        let input = vec![b'x'; 1 << 20];
        let out = run_command_with_timeout(
            shell_command("exec sleep 5"),
            Some(input.as_slice()),
            Duration::from_millis(200),
            1024,
        )
        .await
        .expect("run");
        assert!(out.timed_out);
    }

    #[tokio::test]
    async fn spawn_failure_is_an_error() {
        let cmd = argv_command(&["/definitely/not/a/binary".to_string()]).expect("argv");
        assert!(
            run_command_with_timeout(cmd, None, Duration::from_secs(1), 10)
                .await
                .is_err()
        );
    }
}
