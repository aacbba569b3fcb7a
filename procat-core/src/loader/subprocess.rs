//! External tool invocation.
//!
//! The loader shells out to the schema compiler (`buf`) and to `git`. Both
//! run through the [`CommandRunner`] seam so tests can substitute a fake
//! without spawning processes. Stderr is always captured into memory; it is
//! the only diagnostic a failed compile or clone leaves behind.

use std::future::Future;
use std::io;
use std::process::Stdio;

use tokio::process::Command;

/// Captured result of a finished subprocess.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Whether the process exited with a zero status.
    pub success: bool,
    pub stdout: Vec<u8>,
    /// Stderr, lossily decoded. Surfaced verbatim in load errors.
    pub stderr: String,
}

/// Runs an external program to completion and captures its output.
pub trait CommandRunner: Send + Sync {
    fn run(
        &self,
        program: &str,
        args: &[&str],
    ) -> impl Future<Output = io::Result<CommandOutput>> + Send;
}

/// [`CommandRunner`] that spawns real processes via [`tokio::process`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
