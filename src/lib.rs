//! # sona-runner
//!
//! Launches a `sona serve` worker, waits for the one-line JSON ready signal
//! it prints on stdout, and shuts it down again (SIGTERM, then a kill once
//! the stop timeout runs out).
//!
//! ```rust,no_run
//! use sona_runner::{RunnerConfig, scoped, transcription};
//! use std::path::Path;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let config = RunnerConfig::default();
//!
//! let text = scoped(&config, |endpoint| async move {
//!     let client = transcription::create_client(&endpoint);
//!     let settings = transcription::TranscriptionConfig {
//!         model: "whisper-1".to_string(),
//!         prompt: String::new(),
//!         language: "en".to_string(),
//!     };
//!     transcription::transcribe(Path::new("jfk.wav"), &client, &settings).await
//! })
//! .await??;
//!
//! println!("{}", text);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod messages;
pub mod runner;
pub mod transcription;

pub use config::{Config, RunnerConfig};
pub use error::{Result, SonaError};
pub use messages::{ReadySignal, WorkerState};
pub use runner::{Endpoint, Runner, scoped};
