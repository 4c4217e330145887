//! Shell command task used by the `flightlock run` subcommand.
//!
//! The captured output (including a non-zero exit status) is the published
//! result; only a failure to spawn the process counts as a task failure.

use std::process::Stdio;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, instrument};

/// Result of one command execution, shared with every follower.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Exit code, or `-1` if the process was terminated by a signal.
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Run `program args…` to completion and capture its output.
#[instrument(skip(args), fields(%program, argc = args.len()))]
pub async fn run_command(program: &str, args: &[String]) -> Result<CommandOutput> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    debug!("spawning command");

    let output = cmd
        .output()
        .await
        .with_context(|| format!("failed to spawn {program}"))?;

    let result = CommandOutput {
        status: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };
    debug!(status = result.status, "command finished");
    Ok(result)
}
