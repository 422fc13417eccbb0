//! Client for the worker's OpenAI-compatible `/v1` API

use anyhow::{Context, Result};
use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::{AudioResponseFormat, CreateTranscriptionRequestArgs};
use std::path::Path;

use crate::runner::Endpoint;

/// The worker does not check keys, but the client insists on one
const API_KEY: &str = "sona";

/// Configuration for transcription
#[derive(Debug, Clone)]
pub struct TranscriptionConfig {
    pub model: String,
    pub prompt: String,
    pub language: String,
}

/// Create a client for the worker's OpenAI-compatible API
pub fn create_client(endpoint: &Endpoint) -> Client<OpenAIConfig> {
    let openai_config = OpenAIConfig::new()
        .with_api_base(endpoint.api_base())
        .with_api_key(API_KEY);

    Client::with_config(openai_config)
}

pub async fn transcribe(
    audio_path: &Path,
    client: &Client<OpenAIConfig>,
    config: &TranscriptionConfig,
) -> Result<String> {
    tracing::info!("Transcribing file: {:?}", audio_path);

    let request = CreateTranscriptionRequestArgs::default()
        .file(audio_path.to_str().context("Invalid path")?)
        .model(&config.model)
        .prompt(&config.prompt)
        .language(&config.language)
        .response_format(AudioResponseFormat::Json)
        .build()
        .context("Failed to build transcription request")?;

    let response = client
        .audio()
        .transcribe(request)
        .await
        .context("Transcription API call failed")?;

    tracing::info!("Transcription complete: {} chars", response.text.len());
    Ok(response.text)
}

/// Names of the models the worker is serving
pub async fn list_models(client: &Client<OpenAIConfig>) -> Result<Vec<String>> {
    let response = client
        .models()
        .list()
        .await
        .context("Failed to list models")?;

    Ok(response.data.into_iter().map(|model| model.id).collect())
}
