//! Collaborator interfaces for the external systems `stacker` coordinates:
//!
//! - [`git`]: typed operations over the git CLI (commit/branch/rebase
//!   primitives, including the scripted message rewrite)
//! - [`github`]: pull request management via the GitHub CLI
//!
//! Each submodule provides a trait-based abstraction with a real subprocess
//! implementation and a mock for tests. All calls are blocking round-trips
//! issued one at a time; every subprocess runs under a timeout and is killed
//! if it exceeds it.

use std::path::Path;
use std::process::Output;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use tokio::process::Command;

pub mod git;
pub mod github;

/// How long a single external command may run before being killed.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Run an external command to completion, capturing its output.
///
/// The child is killed if it outlives [`COMMAND_TIMEOUT`]; a timeout is a
/// hard error, never a silent hang.
pub(crate) async fn run_command(
    program: &str,
    args: &[&str],
    dir: &Path,
    envs: &[(&str, &str)],
) -> Result<Output> {
    let mut command = Command::new(program);
    command.current_dir(dir).args(args).kill_on_drop(true);
    for (key, value) in envs {
        command.env(key, value);
    }

    let output = tokio::time::timeout(COMMAND_TIMEOUT, command.output()).await;
    match output {
        Ok(output) => output.with_context(|| format!("Failed to execute {program} command")),
        Err(_) => bail!(
            "{program} {} timed out after {}s",
            args.first().unwrap_or(&""),
            COMMAND_TIMEOUT.as_secs()
        ),
    }
}
