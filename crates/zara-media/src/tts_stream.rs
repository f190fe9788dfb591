//! Speech synthesis for replies that arrive as text.
//!
//! A [`Synthesizer`] turns reply text into the same [`ChunkStream`] shape a
//! streamed-audio reply has, so both reply modes share one playback path.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use zara_core::config::{Config, SynthesisConfig};
use zara_core::{AbortToken, SessionError};
use zara_transport::{ChunkStream, RequestError, abortable};

/// Default local synthesizer, writing a WAV stream to stdout.
pub const DEFAULT_SYNTH_COMMAND: &[&str] = &["espeak-ng", "--stdout"];

const ELEVENLABS_BASE: &str = "https://api.elevenlabs.io";

/// Voice ID of the stock "Rachel" voice.
pub const DEFAULT_VOICE_ID: &str = "21m00Tcm4TlvDq8ikWAM";

#[derive(Debug, Error)]
pub enum SynthError {
    #[error("speech synthesis unsupported: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Request(#[from] RequestError),
}

impl From<SynthError> for SessionError {
    fn from(err: SynthError) -> Self {
        match err {
            SynthError::Unsupported(msg) => SessionError::PlaybackUnsupported(msg),
            SynthError::Request(RequestError::Cancelled) => SessionError::UserCancelled,
            SynthError::Request(e) => SessionError::Playback(e.to_string()),
        }
    }
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    fn name(&self) -> &str;

    /// Start speaking `text`. The stream stops once `abort` fires.
    async fn synthesize(&self, text: &str, abort: &AbortToken) -> Result<ChunkStream, SynthError>;
}

// --- Local command ---

/// Runs a local TTS program with the text as its last argument and streams
/// its stdout.
pub struct CommandSynthesizer {
    command: Vec<String>,
}

impl CommandSynthesizer {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl Default for CommandSynthesizer {
    fn default() -> Self {
        Self::new(DEFAULT_SYNTH_COMMAND.iter().map(|s| s.to_string()).collect())
    }
}

#[async_trait]
impl Synthesizer for CommandSynthesizer {
    fn name(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or("command")
    }

    async fn synthesize(&self, text: &str, abort: &AbortToken) -> Result<ChunkStream, SynthError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| SynthError::Unsupported("empty synthesis command".into()))?;

        let mut child = Command::new(program)
            .args(args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    SynthError::Unsupported(format!("synthesizer '{program}' not found"))
                }
                _ => SynthError::Request(RequestError::Source(e)),
            })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SynthError::Unsupported("synthesizer has no stdout".into()))?;
        debug!(program, text_len = text.len(), "Synthesizing reply locally");

        // The child rides along with the stream: dropping the stream kills it,
        // draining it reaps it and surfaces a non-zero exit.
        let program = program.clone();
        let exit = futures::stream::once(async move {
            match child.wait().await {
                Ok(status) if status.success() => Ok(Bytes::new()),
                Ok(status) => Err(std::io::Error::other(format!("{program} exited with {status}"))),
                Err(e) => Err(e),
            }
        });

        Ok(abortable(ReaderStream::new(stdout).chain(exit), abort.clone()))
    }
}

// --- ElevenLabs ---

/// Build the ElevenLabs streaming TTS URL for a voice.
pub fn build_tts_url(base: &str, voice: &str, output_format: &str) -> String {
    format!(
        "{}/v1/text-to-speech/{voice}/stream?output_format={output_format}",
        base.trim_end_matches('/')
    )
}

/// One entry of the account's voice library.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VoiceInfo {
    pub voice_id: String,
    pub name: String,
}

#[derive(Deserialize)]
struct VoiceList {
    voices: Vec<VoiceInfo>,
}

/// ElevenLabs voice IDs are 20 alphanumeric characters; anything else is
/// treated as a display name.
fn looks_like_voice_id(voice: &str) -> bool {
    voice.len() == 20 && voice.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Pick the voice whose name matches `name`, ignoring case.
pub fn find_voice<'a>(voices: &'a [VoiceInfo], name: &str) -> Option<&'a VoiceInfo> {
    voices.iter().find(|v| v.name.eq_ignore_ascii_case(name))
}

/// Streams synthesized speech from the ElevenLabs API.
pub struct ElevenLabsSynthesizer {
    base_url: String,
    api_key: String,
    voice: String,
    voice_id: OnceCell<String>,
    model: String,
    output_format: String,
    http: reqwest::Client,
}

impl ElevenLabsSynthesizer {
    pub fn from_config(config: &SynthesisConfig) -> Result<Self, SynthError> {
        let api_key = config
            .resolve_api_key()
            .ok_or_else(|| SynthError::Unsupported("No TTS API key configured".into()))?;
        Ok(Self {
            base_url: ELEVENLABS_BASE.into(),
            api_key,
            voice: config
                .default_voice
                .clone()
                .unwrap_or_else(|| DEFAULT_VOICE_ID.into()),
            voice_id: OnceCell::new(),
            model: config
                .default_model
                .clone()
                .unwrap_or_else(|| "eleven_turbo_v2".into()),
            output_format: config
                .output_format
                .clone()
                .unwrap_or_else(|| "mp3_44100_128".into()),
            http: reqwest::Client::new(),
        })
    }

    /// Point at another API host. Used for self-hosted proxies and tests.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Fetch the voices available to the configured API key.
    pub async fn list_voices(&self) -> Result<Vec<VoiceInfo>, SynthError> {
        let url = format!("{}/v1/voices", self.base_url.trim_end_matches('/'));
        let resp = self
            .http
            .get(&url)
            .header("xi-api-key", &self.api_key)
            .send()
            .await
            .map_err(RequestError::from)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RequestError::Status {
                status: status.as_u16(),
                message: format!("Voice listing failed {status}: {body}"),
            }
            .into());
        }

        let list: VoiceList = resp.json().await.map_err(RequestError::from)?;
        debug!(count = list.voices.len(), "Fetched voice library");
        Ok(list.voices)
    }

    /// The configured voice as an ID, looking a display name up once.
    async fn resolve_voice(&self) -> Result<&str, SynthError> {
        self.voice_id
            .get_or_try_init(|| async {
                if looks_like_voice_id(&self.voice) {
                    return Ok::<_, SynthError>(self.voice.clone());
                }
                let voices = self.list_voices().await?;
                let found = find_voice(&voices, &self.voice).ok_or_else(|| {
                    SynthError::Unsupported(format!(
                        "unknown ElevenLabs voice '{}', run `zara voices` to list them",
                        self.voice
                    ))
                })?;
                info!(name = %found.name, voice_id = %found.voice_id, "Resolved voice name");
                Ok::<_, SynthError>(found.voice_id.clone())
            })
            .await
            .map(String::as_str)
    }
}

#[async_trait]
impl Synthesizer for ElevenLabsSynthesizer {
    fn name(&self) -> &str {
        "elevenlabs"
    }

    async fn synthesize(&self, text: &str, abort: &AbortToken) -> Result<ChunkStream, SynthError> {
        let voice_id = tokio::select! {
            biased;
            _ = abort.fired() => return Err(RequestError::Cancelled.into()),
            voice_id = self.resolve_voice() => voice_id?,
        };
        let url = build_tts_url(&self.base_url, voice_id, &self.output_format);
        debug!(voice_id, model = %self.model, text_len = text.len(), "Starting TTS stream");

        let pending = self
            .http
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(&serde_json::json!({
                "text": text,
                "model_id": self.model,
            }))
            .send();
        let resp = tokio::select! {
            biased;
            _ = abort.fired() => return Err(RequestError::Cancelled.into()),
            resp = pending => resp.map_err(RequestError::from)?,
        };

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RequestError::Status {
                status: status.as_u16(),
                message: format!("TTS API error {status}: {body}"),
            }
            .into());
        }

        info!(voice_id, "Streaming synthesized reply");
        Ok(abortable(resp.bytes_stream(), abort.clone()))
    }
}

/// Build the synthesizer named by `synthesis.provider`. `"none"` yields `None`.
pub fn synthesizer_from_config(config: &Config) -> Result<Option<Arc<dyn Synthesizer>>, SynthError> {
    let synthesis = config.synthesis();
    match synthesis.provider.as_str() {
        "none" => Ok(None),
        "command" => Ok(Some(Arc::new(match synthesis.command {
            Some(command) => CommandSynthesizer::new(command),
            None => CommandSynthesizer::default(),
        }))),
        "elevenlabs" => Ok(Some(Arc::new(ElevenLabsSynthesizer::from_config(&synthesis)?))),
        other => Err(SynthError::Unsupported(format!(
            "unknown synthesis provider '{other}'"
        ))),
    }
}
