use anyhow::Result;
use sona_runner::{Config, scoped, transcription};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let audio_paths: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    if audio_paths.is_empty() {
        anyhow::bail!("usage: sona-runner <audio>...");
    }

    let config = Config::load()?;
    config.validate()?;
    let transcription_config = config.transcription();

    scoped(&config.runner, |endpoint| async move {
        tracing::info!("Sona running on port {}", endpoint.port());
        let client = transcription::create_client(&endpoint);

        match transcription::list_models(&client).await {
            Ok(models) => tracing::info!("Serving models: {:?}", models),
            Err(e) => tracing::warn!("Could not list models: {:#}", e),
        }

        for path in &audio_paths {
            tokio::select! {
                result = transcription::transcribe(path, &client, &transcription_config) => {
                    println!("{}", result?);
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Received Ctrl+C, shutting down");
                    break;
                }
            }
        }

        Ok::<(), anyhow::Error>(())
    })
    .await??;

    tracing::info!("sona-runner shutdown complete");
    Ok(())
}
