//! Running external programs for process-backed capabilities.
//!
//! # Security
//!
//! - The environment is cleared except for an allow-list of variables, and
//!   `PATH` is restricted to system directories (when sandboxing is on).
//! - Arguments reach the child as JSON on stdin, never through a shell.
//! - Stdout is read incrementally and the child is killed as soon as the
//!   output ceiling is crossed.
//! - The child is spawned with `kill_on_drop`, so cancelling the future (the
//!   executor does this on timeout) kills it.

use std::process::Stdio;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::registry::ResolvedCommand;

/// Environment variables that are safe to inherit from the parent process.
const ALLOWED_ENV_VARS: &[&str] = &[
    "HOME", "USER", "TERM", "LANG", "LC_ALL", "LC_CTYPE", "TMPDIR", "TMP", "TEMP",
];

/// Directories searched for programs in sandboxed execution.
#[cfg(unix)]
const SAFE_PATH_DIRS: &[&str] = &["/usr/bin", "/bin", "/usr/local/bin"];

#[cfg(windows)]
const SAFE_PATH_DIRS: &[&str] = &[r"C:\Windows\System32", r"C:\Windows"];

const READ_CHUNK: usize = 8 * 1024;

/// Stderr kept for the log when a child fails.
const STDERR_LIMIT: usize = 4 * 1024;

/// Why a child process did not produce a result.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ProcessFailure {
    /// The program could not be started.
    #[error("failed to spawn: {0}")]
    Spawn(#[source] std::io::Error),
    /// Reading the child's output failed.
    #[error("failed to read output: {0}")]
    Io(#[source] std::io::Error),
    /// Stdout crossed the ceiling; the child was killed.
    #[error("output ceiling exceeded")]
    OutputTooLarge,
    /// The child exited unsuccessfully.
    #[error("exited with {}: {}", exit_code(.code), .stderr.trim())]
    Exit {
        /// Exit code, if the child was not killed by a signal.
        code: Option<i32>,
        /// Leading part of stderr.
        stderr: String,
    },
}

#[allow(clippy::ref_option)]
fn exit_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "signal".to_owned(), |c| c.to_string())
}

fn safe_path() -> String {
    SAFE_PATH_DIRS.join(if cfg!(windows) { ";" } else { ":" })
}

/// Run `command` with `input` on stdin and return its stdout, parsed as JSON
/// when possible.
pub(crate) async fn run(
    command: ResolvedCommand,
    input: Vec<u8>,
    max_output_bytes: usize,
    sandboxed: bool,
) -> Result<Value, ProcessFailure> {
    debug!(
        program = %command.program,
        args = ?command.args,
        sandboxed,
        "Spawning capability process"
    );

    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if sandboxed {
        cmd.env_clear();
        cmd.env("PATH", safe_path());
        for var in ALLOWED_ENV_VARS {
            if let Ok(value) = std::env::var(var) {
                cmd.env(var, value);
            }
        }
    }

    let mut child = cmd.spawn().map_err(ProcessFailure::Spawn)?;

    // Written from its own task so a child that never reads stdin cannot
    // block us while we drain stdout.
    if let Some(mut stdin) = child.stdin.take() {
        tokio::spawn(async move {
            let _ = stdin.write_all(&input).await;
            let _ = stdin.shutdown().await;
        });
    }

    let stderr_task = child
        .stderr
        .take()
        .map(|stderr| tokio::spawn(read_capped(stderr, STDERR_LIMIT)));

    let Some(mut stdout) = child.stdout.take() else {
        return Err(ProcessFailure::Io(std::io::Error::other("stdout not captured")));
    };

    let mut output = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = stdout.read(&mut chunk).await.map_err(ProcessFailure::Io)?;
        if n == 0 {
            break;
        }
        if output.len().saturating_add(n) > max_output_bytes {
            warn!(
                program = %command.program,
                limit = max_output_bytes,
                "Process output exceeded ceiling, killing child"
            );
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill child process");
            }
            return Err(ProcessFailure::OutputTooLarge);
        }
        output.extend_from_slice(&chunk[..n]);
    }

    let status = child.wait().await.map_err(ProcessFailure::Io)?;
    if !status.success() {
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        return Err(ProcessFailure::Exit {
            code: status.code(),
            stderr,
        });
    }

    Ok(parse_output(&output))
}

/// Read up to `limit` bytes, then keep draining so the child never blocks on
/// a full pipe.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> String {
    let mut kept = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    while let Ok(n) = reader.read(&mut chunk).await {
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(kept.len());
        kept.extend_from_slice(&chunk[..n.min(room)]);
    }
    String::from_utf8_lossy(&kept).into_owned()
}

/// JSON if stdout parses as JSON, otherwise the text without its trailing
/// newline.
fn parse_output(output: &[u8]) -> Value {
    if let Ok(value) = serde_json::from_slice::<Value>(output) {
        return value;
    }
    let text = String::from_utf8_lossy(output);
    Value::String(text.trim_end_matches(['\n', '\r']).to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn command(program: &str, args: &[&str]) -> ResolvedCommand {
        ResolvedCommand {
            program: program.to_owned(),
            args: args.iter().map(|s| (*s).to_owned()).collect(),
        }
    }

    #[test]
    fn test_parse_output() {
        assert_eq!(parse_output(b"{\"a\":1}\n"), json!({"a": 1}));
        assert_eq!(parse_output(b"hello\nworld\n"), json!("hello\nworld"));
        assert_eq!(parse_output(b""), json!(""));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdin_carries_arguments() {
        let input = br#"{"x":1}"#.to_vec();
        let value = run(command("cat", &[]), input, 1024, true).await.unwrap();
        assert_eq!(value, json!({"x": 1}));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_text_output() {
        let value = run(command("echo", &["hello"]), Vec::new(), 1024, true)
            .await
            .unwrap();
        assert_eq!(value, json!("hello"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_ceiling_kills_child() {
        // `yes` writes forever; only the ceiling stops it.
        let result = run(command("yes", &[]), Vec::new(), 64 * 1024, true).await;
        assert!(matches!(result, Err(ProcessFailure::OutputTooLarge)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit() {
        let result = run(command("false", &[]), Vec::new(), 1024, true).await;
        assert!(matches!(result, Err(ProcessFailure::Exit { code: Some(1), .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sandbox_clears_environment() {
        let value = run(command("env", &[]), Vec::new(), 64 * 1024, true)
            .await
            .unwrap();
        let text = value.as_str().unwrap().to_owned();
        assert!(text.contains("PATH=/usr/bin:/bin:/usr/local/bin"));
        assert!(!text.contains("CARGO_PKG_NAME="));
    }

    #[test]
    fn test_failure_messages() {
        let exit = ProcessFailure::Exit {
            code: Some(2),
            stderr: "no such file\n".to_owned(),
        };
        assert_eq!(exit.to_string(), "exited with 2: no such file");

        let killed = ProcessFailure::Exit {
            code: None,
            stderr: String::new(),
        };
        assert_eq!(killed.to_string(), "exited with signal: ");

        let spawn = ProcessFailure::Spawn(std::io::Error::other("denied"));
        assert!(std::error::Error::source(&spawn).is_some());
        assert_eq!(spawn.to_string(), "failed to spawn: denied");
    }

    #[tokio::test]
    async fn test_missing_program() {
        let result = run(
            command("tollgate-no-such-program", &[]),
            Vec::new(),
            1024,
            true,
        )
        .await;
        assert!(matches!(result, Err(ProcessFailure::Spawn(_))));
    }
}
