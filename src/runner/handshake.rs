use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt};

use crate::error::{Result, SonaError};
use crate::messages::ReadySignal;

/// Read the worker's first stdout line and return the port it bound
///
/// Reads exactly one line. Stderr is only consumed when stdout closes
/// without a line, so it can be forwarded afterwards on success. Nothing
/// drains stderr while waiting, so a worker that fills the stderr pipe before
/// signalling blocks forever unless `ready_timeout_secs` is set.
pub(crate) async fn await_ready<O, E>(stdout: &mut O, stderr: &mut E) -> Result<u16>
where
    O: AsyncBufRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut line = Vec::new();
    let read = stdout.read_until(b'\n', &mut line).await?;

    if read == 0 {
        let mut captured = Vec::new();
        stderr.read_to_end(&mut captured).await?;
        let stderr = String::from_utf8_lossy(&captured).trim().to_string();
        return Err(SonaError::WorkerExitedEarly { stderr });
    }

    let signal: ReadySignal =
        serde_json::from_slice(&line).map_err(|source| SonaError::HandshakeParse {
            line: String::from_utf8_lossy(&line).trim_end().to_string(),
            source,
        })?;

    match signal.ready_port() {
        Some(port) => {
            tracing::debug!(port, "Ready signal received");
            Ok(port)
        }
        None => Err(SonaError::UnexpectedReadySignal { signal }),
    }
}
