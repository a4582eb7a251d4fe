//! Subprocess plumbing for the external tool adapters
//!
//! All external I/O (restic, docker, in-container database clients) goes
//! through these helpers. Calls block until the tool finishes; the snapshot
//! store backend owns its own timeout behavior.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::{Command, Output, Stdio};
use tracing::{debug, error};

/// Run a command, failing on non-zero exit status.
///
/// `envs` are injected into the child's environment. Credentials must travel
/// this way, never on the command line, so they stay out of logs and `ps`.
pub fn run_command(
    program: &str,
    args: &[&str],
    working_dir: Option<&Path>,
    envs: &[(String, String)],
) -> Result<Output> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    for (key, value) in envs {
        cmd.env(key, value);
    }

    debug!("Running command: {} {}", program, args.join(" "));

    let output = cmd
        .output()
        .with_context(|| format!("Failed to execute {}", program))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!("Command failed: {} {}", program, args.join(" "));
        error!("Stderr: {}", stderr);
        anyhow::bail!(
            "Command failed with exit code {:?}: {}",
            output.status.code(),
            stderr
        );
    }

    Ok(output)
}

/// Run a command and return stdout as a string.
pub fn run_command_stdout(
    program: &str,
    args: &[&str],
    working_dir: Option<&Path>,
    envs: &[(String, String)],
) -> Result<String> {
    let output = run_command(program, args, working_dir, envs)?;
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Run a shell pipeline (dump-and-compress, replay-from-file).
///
/// The pipeline text is logged, so callers must reference secrets through
/// `envs` (e.g. `docker exec -e PGPASSWORD ...` pass-through), not inline.
pub fn run_shell(
    pipeline: &str,
    working_dir: Option<&Path>,
    envs: &[(String, String)],
) -> Result<Output> {
    debug!("Running shell pipeline: {}", pipeline);

    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(pipeline);
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    for (key, value) in envs {
        cmd.env(key, value);
    }

    let output = cmd.output().context("Failed to spawn shell")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!("Pipeline failed: {}", pipeline);
        anyhow::bail!(
            "Pipeline failed with exit code {:?}: {}",
            output.status.code(),
            stderr
        );
    }

    Ok(output)
}
