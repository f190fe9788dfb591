//! Transcription of recorded utterances through a Whisper-compatible API.

use thiserror::Error;
use tracing::debug;

use zara_core::config::TranscriptionConfig;

const SAMPLE_RATE: u32 = 16_000;
const DEFAULT_MODEL: &str = "whisper-large-v3-turbo";

#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("No transcription API key configured")]
    MissingKey,

    #[error("Transcription API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("transcription request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Wrap mono 16-bit PCM in a WAV container.
pub fn pcm_to_wav(pcm: &[i16], sample_rate: u32) -> Vec<u8> {
    const CHANNELS: u16 = 1;
    const BITS: u16 = 16;
    let data_len = (pcm.len() * 2) as u32;
    let block_align = CHANNELS * BITS / 8;
    let byte_rate = sample_rate * u32::from(block_align);

    let mut wav = Vec::with_capacity(44 + data_len as usize);
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&CHANNELS.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&BITS.to_le_bytes());

    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    for sample in pcm {
        wav.extend_from_slice(&sample.to_le_bytes());
    }
    wav
}

/// Transcription endpoint for a provider name. Unknown names use Groq.
pub fn provider_url(provider: &str) -> &'static str {
    match provider {
        "openai" => "https://api.openai.com/v1/audio/transcriptions",
        _ => "https://api.groq.com/openai/v1/audio/transcriptions",
    }
}

/// Reduce a locale tag like `en-US` to the ISO-639-1 code the API accepts.
fn language_code(language: &str) -> &str {
    language.split(['-', '_']).next().unwrap_or(language)
}

/// Sends recorded PCM to the configured transcription provider.
#[derive(Debug, Clone)]
pub struct Transcriber {
    config: TranscriptionConfig,
    language: Option<String>,
    http: reqwest::Client,
}

impl Transcriber {
    pub fn new(config: TranscriptionConfig, language: Option<String>) -> Self {
        Self {
            config,
            language,
            http: reqwest::Client::new(),
        }
    }

    pub fn has_key(&self) -> bool {
        self.config.resolve_api_key().is_some()
    }

    pub async fn transcribe(&self, pcm: &[i16]) -> Result<String, TranscribeError> {
        let api_key = self
            .config
            .resolve_api_key()
            .ok_or(TranscribeError::MissingKey)?;

        let wav = pcm_to_wav(pcm, SAMPLE_RATE);
        let url = provider_url(&self.config.provider);
        let model = self.config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        debug!(url, model, wav_bytes = wav.len(), "Sending utterance for transcription");

        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("utterance.wav")
            .mime_str("audio/wav")?;
        let mut form = reqwest::multipart::Form::new()
            .text("model", model.to_string())
            .text("response_format", "text")
            .part("file", part);
        if let Some(language) = &self.language {
            form = form.text("language", language_code(language).to_string());
        }

        let resp = self
            .http
            .post(url)
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TranscribeError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.text().await?.trim().to_string())
    }
}
