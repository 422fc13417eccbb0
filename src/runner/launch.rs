use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};

use crate::error::{Result, SonaError};

/// Resolve the worker executable on PATH (or check an explicit path)
pub(crate) fn resolve_binary(name: &str) -> Result<PathBuf> {
    which::which(name).map_err(|e| {
        tracing::debug!(binary = %name, error = %e, "Worker binary lookup failed");
        SonaError::ExecutableNotFound {
            binary: name.to_string(),
        }
    })
}

/// Start `<binary> serve --port <port>` with stdout and stderr piped back to us
///
/// Does not wait for readiness.
pub(crate) fn spawn(binary: &Path, port: u16, extra_args: &[String]) -> Result<Child> {
    tracing::debug!(
        binary = %binary.display(),
        port,
        args = ?extra_args,
        "Spawning worker"
    );

    let child = Command::new(binary)
        .arg("serve")
        .arg("--port")
        .arg(port.to_string())
        .args(extra_args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(SonaError::Spawn)?;

    tracing::info!(
        pid = child.id().unwrap_or(0),
        binary = %binary.display(),
        "Worker spawned"
    );

    Ok(child)
}
