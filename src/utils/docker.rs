//! Docker / compose CLI adapter
//!
//! Text parsing of docker output is isolated here; everything above works
//! with typed results.

use super::command::{run_command, run_command_stdout, run_shell};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

/// Host mountpoint of a named volume
pub fn volume_mountpoint(volume: &str) -> Result<PathBuf> {
    let output = run_command_stdout(
        "docker",
        &["volume", "inspect", "--format", "{{ .Mountpoint }}", volume],
        None,
        &[],
    )
    .with_context(|| format!("Failed to inspect volume '{}'", volume))?;

    let mountpoint = output.trim();
    if mountpoint.is_empty() {
        anyhow::bail!("Volume '{}' has no mountpoint", volume);
    }

    Ok(PathBuf::from(mountpoint))
}

/// Whether a named volume exists
pub fn volume_exists(volume: &str) -> Result<bool> {
    let output = run_command_stdout(
        "docker",
        &["volume", "ls", "--format", "{{.Name}}"],
        None,
        &[],
    )?;
    Ok(output.lines().any(|v| v.trim() == volume))
}

/// Stop a compose stack (containers are preserved)
pub fn stop_stack(compose_dir: &Path) -> Result<()> {
    info!("Stopping compose stack at {:?}", compose_dir);
    run_command("docker", &["compose", "stop"], Some(compose_dir), &[])
        .with_context(|| format!("Failed to stop stack at {:?}", compose_dir))?;
    Ok(())
}

/// Start a previously stopped compose stack
pub fn start_stack(compose_dir: &Path) -> Result<()> {
    info!("Starting compose stack at {:?}", compose_dir);
    run_command("docker", &["compose", "start"], Some(compose_dir), &[])
        .with_context(|| format!("Failed to start stack at {:?}", compose_dir))?;
    Ok(())
}

/// Run a command inside a container, returning stdout.
///
/// Env var names listed in `pass_env` are forwarded from this process into
/// the container (`docker exec -e NAME` pass-through), so secrets never
/// appear on the command line.
pub fn exec_in_container(
    container: &str,
    pass_env: &[(String, String)],
    command: &[&str],
) -> Result<String> {
    let mut args: Vec<&str> = vec!["exec"];
    let env_flags: Vec<String> = pass_env.iter().map(|(k, _)| format!("-e{}", k)).collect();
    for flag in &env_flags {
        args.push(flag.as_str());
    }
    args.push(container);
    args.extend_from_slice(command);

    run_command_stdout("docker", &args, None, pass_env)
        .with_context(|| format!("Exec in container '{}' failed", container))
}

/// Run a host-side shell pipeline around `docker exec` (dump-and-compress,
/// replay-from-file). Same env pass-through discipline as `exec_in_container`.
pub fn exec_pipeline(pipeline: &str, pass_env: &[(String, String)]) -> Result<String> {
    let output = run_shell(pipeline, None, pass_env)?;
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
