//! Error types for the sona runner

use std::io;
use thiserror::Error;

use crate::messages::ReadySignal;

/// Everything that can go wrong while bringing a `sona` worker up
///
/// Stopping a worker is not represented here: `Runner::stop` absorbs
/// signal and kill failures instead of surfacing them.
#[derive(Debug, Error)]
pub enum SonaError {
    /// The worker binary could not be resolved
    #[error("'{binary}' binary not found on PATH. Install it or add its location to PATH.")]
    ExecutableNotFound { binary: String },

    /// The OS refused to start the resolved executable
    #[error("Failed to spawn sona: {0}")]
    Spawn(#[source] io::Error),

    /// Stdout closed before any ready signal was written
    #[error("sona exited before ready signal: {stderr}")]
    WorkerExitedEarly { stderr: String },

    /// The first stdout line was not a JSON record
    #[error("Malformed ready signal {line:?}: {source}")]
    HandshakeParse {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    /// The first stdout line parsed but did not announce readiness
    #[error("unexpected ready signal: {signal}")]
    UnexpectedReadySignal { signal: ReadySignal },

    /// No ready signal within the configured bound
    #[error("sona did not signal readiness within {seconds}s")]
    ReadyTimeout { seconds: u64 },

    /// Pipe I/O failed while reading the handshake
    #[error("I/O error while waiting for sona: {0}")]
    Io(#[from] io::Error),
}

/// Result type for runner operations
pub type Result<T> = std::result::Result<T, SonaError>;
