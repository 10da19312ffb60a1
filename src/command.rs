//! External process invocation
//!
//! All of the heavy lifting (mount, rsync, gupload) is delegated to existing
//! executables. Every invocation runs under a bounded timeout so a hung
//! external process cannot stall the agent loop forever.

use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::{Error, Result};

/// Captured result of an external command
#[derive(Debug)]
pub struct CommandOutput {
    /// Whether the process exited with status zero
    pub success: bool,
    /// Exit code, when the process exited normally
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Lines of the combined output stream (stdout first, then stderr)
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines().chain(self.stderr.lines())
    }
}

/// Run `program` with `args`, capturing output, bounded by `timeout`.
///
/// The child is killed if the timeout elapses.
pub async fn run_with_timeout(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<CommandOutput> {
    debug!("Running: {} {}", program, args.join(" "));

    let child = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(timeout, child)
        .await
        .map_err(|_| Error::CommandTimeout {
            command: program.to_string(),
            seconds: timeout.as_secs(),
        })??;

    Ok(CommandOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Helper for passing paths as command arguments
pub fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_command() {
        let out = run_with_timeout("true", &[], Duration::from_secs(5))
            .await
            .unwrap();
        assert!(out.success);
        assert_eq!(out.code, Some(0));
    }

    #[tokio::test]
    async fn test_failing_command() {
        let out = run_with_timeout("false", &[], Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!out.success);
    }

    #[tokio::test]
    async fn test_output_capture() {
        let out = run_with_timeout("echo", &["hello"], Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.lines().collect::<Vec<_>>(), vec!["hello"]);
    }

    #[tokio::test]
    async fn test_timeout_kills_hung_command() {
        let err = run_with_timeout("sleep", &["30"], Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommandTimeout { .. }));
    }
}
