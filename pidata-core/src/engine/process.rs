//! Subprocess invocation
//!
//! Every engine call and every render helper call goes through
//! [`ProcessRunner`], so tests can substitute a scripted fake for the real
//! process spawn.

use crate::error::{Error, Result};
use std::io::{Read, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How often a running child is checked for exit or cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Captured output of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Exit code, `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
}

impl ProcessOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: Vec::new(),
            exit_code: Some(0),
        }
    }

    /// Failed output with the given stderr.
    pub fn failed(exit_code: i32, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: stderr.into(),
            exit_code: Some(exit_code),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim_end().to_string()
    }
}

/// Runs external programs to completion, honoring a cancellation token.
pub trait ProcessRunner: Send + Sync {
    /// Run `program` with `args`, feeding `stdin` if given.
    ///
    /// A missing executable is reported as [`Error::Config`]; a fired token
    /// terminates the child and returns [`Error::Cancelled`]. A non-zero exit
    /// is *not* an error at this layer.
    fn run(
        &self,
        program: &Path,
        args: &[String],
        stdin: Option<&[u8]>,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput>;
}

/// [`ProcessRunner`] backed by `std::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessRunner;

impl ProcessRunner for SystemProcessRunner {
    fn run(
        &self,
        program: &Path,
        args: &[String],
        stdin: Option<&[u8]>,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut child = Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    Error::Config(format!("executable not found: {}", program.display()))
                }
                _ => Error::Io(e),
            })?;

        tracing::debug!(program = %program.display(), pid = child.id(), "spawned process");

        let stdin_writer = match (stdin, child.stdin.take()) {
            (Some(input), Some(mut pipe)) => {
                let input = input.to_vec();
                Some(thread::spawn(move || pipe.write_all(&input)))
            }
            _ => None,
        };
        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);

        // On cancellation the reader threads are detached, not joined: a grandchild
        // may still hold the pipes open.
        let status = wait_or_cancel(&mut child, cancel)?;

        if let Some(writer) = stdin_writer {
            match writer.join() {
                Ok(Ok(())) => {}
                // The child may exit without consuming all input.
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Ok(Err(e)) => return Err(Error::Io(e)),
                Err(_) => return Err(Error::Execution("stdin writer panicked".to_string())),
            }
        }

        Ok(ProcessOutput {
            stdout: collect(stdout_reader)?,
            stderr: collect(stderr_reader)?,
            exit_code: status.code(),
        })
    }
}

fn wait_or_cancel(
    child: &mut Child,
    cancel: &CancellationToken,
) -> Result<std::process::ExitStatus> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if cancel.is_cancelled() {
            tracing::warn!(pid = child.id(), "cancellation requested, killing process");
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::Cancelled);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<std::io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

fn collect(reader: Option<JoinHandle<std::io::Result<Vec<u8>>>>) -> Result<Vec<u8>> {
    match reader {
        None => Ok(Vec::new()),
        Some(handle) => handle
            .join()
            .map_err(|_| Error::Execution("output reader panicked".to_string()))?
            .map_err(Error::Io),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pre_cancelled_token_never_spawns() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = SystemProcessRunner
            .run(Path::new("definitely-not-a-real-binary"), &[], None, &cancel)
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn test_missing_binary_is_config_error() {
        let err = SystemProcessRunner
            .run(
                Path::new("pidata-no-such-binary-3f9a"),
                &[],
                None,
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), "configuration");
        assert!(err.to_string().contains("pidata-no-such-binary-3f9a"));
    }

    #[cfg(unix)]
    #[test]
    fn test_captures_stdout_stderr_and_exit_code() {
        let output = SystemProcessRunner
            .run(
                Path::new("sh"),
                &["-c".to_string(), "cat; echo oops >&2; exit 3".to_string()],
                Some(b"hello"),
                &CancellationToken::new(),
            )
            .unwrap();

        assert_eq!(output.stdout, b"hello");
        assert_eq!(output.stderr_text(), "oops");
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
    }

    #[cfg(unix)]
    #[test]
    fn test_cancellation_kills_running_process() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = SystemProcessRunner
            .run(Path::new("sleep"), &["5".to_string()], None, &cancel)
            .unwrap_err();
        canceller.join().unwrap();

        assert!(matches!(err, Error::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
