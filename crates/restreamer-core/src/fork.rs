// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Fork Reader (spec.md 4.E).
//!
//! Spawns a child process whose stdout becomes the upstream byte stream.
//! stderr is forwarded line-by-line to `tracing`; exit is surfaced through
//! [`ForkReader::wait`] as an event, not an error -- retry policy belongs
//! to F, the upstream client, which awaits `wait()` alongside its other
//! select arms.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;

#[derive(Debug, thiserror::Error)]
pub enum ForkError {
    #[error("empty argv")]
    EmptyArgv,
    #[error("failed to spawn child process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("child process did not expose a stdout pipe")]
    NoStdout,
}

/// Emitted when the child process exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkExit {
    pub code: Option<i32>,
}

pub struct ForkReader {
    child: Child,
    stdout: Option<ChildStdout>,
    stderr_task: Option<JoinHandle<()>>,
}

impl ForkReader {
    /// Spawn `argv[0]` with the remaining elements as arguments.
    pub fn spawn(argv: &[String]) -> Result<Self, ForkError> {
        let (program, args) = argv.split_first().ok_or(ForkError::EmptyArgv)?;

        let mut child = Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ForkError::Spawn)?;

        let stdout = child.stdout.take().ok_or(ForkError::NoStdout)?;
        let stderr = child.stderr.take();

        let stderr_task = stderr.map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::warn!(event = "fork_stderr", line = %line);
                }
            })
        });

        Ok(Self {
            child,
            stdout: Some(stdout),
            stderr_task,
        })
    }

    /// Take the stdout pipe for framing; can only be called once.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// Await the child's exit, yielding a `fork_exit` event. Intended to be
    /// raced inside the upstream client's `select!` loop.
    pub async fn wait(&mut self) -> ForkExit {
        match self.child.wait().await {
            Ok(status) => ForkExit { code: status.code() },
            Err(_) => ForkExit { code: None },
        }
    }

    /// Terminate the child (SIGKILL-equivalent).
    pub async fn close(&mut self) {
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawns_and_reads_stdout() {
        let mut reader = ForkReader::spawn(&[
            "/bin/sh".to_string(),
            "-c".to_string(),
            "printf hello".to_string(),
        ])
        .unwrap();

        let mut stdout = reader.take_stdout().unwrap();
        let mut buf = Vec::new();
        use tokio::io::AsyncReadExt;
        stdout.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello");

        let exit = reader.wait().await;
        assert_eq!(exit.code, Some(0));
    }

    #[tokio::test]
    async fn close_kills_long_running_child() {
        let mut reader = ForkReader::spawn(&[
            "/bin/sh".to_string(),
            "-c".to_string(),
            "sleep 60".to_string(),
        ])
        .unwrap();
        reader.close().await;
    }

    #[tokio::test]
    async fn empty_argv_is_rejected() {
        assert!(matches!(ForkReader::spawn(&[]), Err(ForkError::EmptyArgv)));
    }
}
