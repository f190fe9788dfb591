//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level Zara client configuration, read from a JSON5 file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Name the assistant is announced with in status messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech: Option<SpeechConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<SynthesisConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub playback: Option<PlaybackConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub visual: Option<VisualConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Chat endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_chat_path")]
    pub chat_path: String,

    /// Accept self-signed certificates (the development server runs with an
    /// ad-hoc certificate).
    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// Connection establishment timeout. The exchange itself is unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            chat_path: default_chat_path(),
            accept_invalid_certs: false,
            connect_timeout_secs: None,
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:5000".into()
}

fn default_chat_path() -> String {
    "/chat".into()
}

/// Speech capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    /// Provider: "console" (typed utterances, default) or "recording".
    #[serde(default = "default_speech_provider")]
    pub provider: String,

    /// Command writing raw 16 kHz mono PCM16 to stdout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_command: Option<Vec<String>>,

    /// Upper bound on one utterance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_seconds: Option<u64>,

    /// RMS energy above which a frame counts as speech.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vad_threshold: Option<f64>,

    /// Trailing silence that ends an utterance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub silence_ms: Option<u64>,

    /// Recognition language hint (e.g. "en").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<TranscriptionConfig>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            provider: default_speech_provider(),
            capture_command: None,
            max_seconds: None,
            vad_threshold: None,
            silence_ms: None,
            language: None,
            transcription: None,
        }
    }
}

fn default_speech_provider() -> String {
    "console".into()
}

/// Voice transcription configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Provider: "groq" or "openai" (default: "groq").
    #[serde(default = "default_transcription_provider")]
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Model name (e.g. "whisper-large-v3-turbo").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            provider: default_transcription_provider(),
            api_key: None,
            api_key_env: None,
            model: None,
        }
    }
}

fn default_transcription_provider() -> String {
    "groq".into()
}

impl TranscriptionConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Speech synthesis for replies that arrive as text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Provider: "command" (default), "elevenlabs" or "none".
    #[serde(default = "default_synthesis_provider")]
    pub provider: String,

    /// Local TTS command; the reply text is appended as the last argument.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_voice: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            provider: default_synthesis_provider(),
            command: None,
            api_key: None,
            api_key_env: None,
            default_voice: None,
            default_model: None,
            output_format: None,
        }
    }
}

fn default_synthesis_provider() -> String {
    "command".into()
}

impl SynthesisConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Where reply audio goes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Sink: "command" (default), "file" or "null".
    #[serde(default = "default_sink")]
    pub sink: String,

    /// Player command reading the encoded stream from stdin.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,

    /// Directory for the "file" sink (default: `~/.zara/replies`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sink: default_sink(),
            command: None,
            output_dir: None,
        }
    }
}

fn default_sink() -> String {
    "command".into()
}

/// Optional visual context attached to requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisualConfig {
    /// Source: "none" (default), "fixed" or "file".
    #[serde(default = "default_visual_source")]
    pub source: String,

    /// JSON file kept up to date by an external sensor ("file" source).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default)]
    pub is_smiling: bool,

    #[serde(default)]
    pub fingers_up: u32,
}

fn default_visual_source() -> String {
    "none".into()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "zara_media=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> crate::error::Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| crate::error::ZaraError::Config(e.to_string()))?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned())
}

/// Expand `~` in a configured path.
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    /// Parse config text (JSON5 with `${ENV_VAR}` references).
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let substituted = substitute_env_vars(raw)?;
        json5::from_str(&substituted).map_err(|e| crate::error::ZaraError::Config(e.to_string()))
    }

    /// Default config file location.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn assistant_name(&self) -> &str {
        self.assistant_name.as_deref().unwrap_or("Zara")
    }

    pub fn server(&self) -> ServerConfig {
        self.server.clone().unwrap_or_default()
    }

    pub fn speech(&self) -> SpeechConfig {
        self.speech.clone().unwrap_or_default()
    }

    pub fn synthesis(&self) -> SynthesisConfig {
        self.synthesis.clone().unwrap_or_default()
    }

    pub fn playback(&self) -> PlaybackConfig {
        self.playback.clone().unwrap_or_default()
    }

    pub fn visual(&self) -> VisualConfig {
        self.visual.clone().unwrap_or_else(|| VisualConfig {
            source: default_visual_source(),
            ..VisualConfig::default()
        })
    }

    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_else(|| LoggingConfig {
            format: default_log_format(),
            level: None,
            filters: Vec::new(),
            output: default_log_output(),
        })
    }

    /// Full URL of the chat endpoint.
    pub fn chat_url(&self) -> String {
        let server = self.server();
        format!(
            "{}/{}",
            server.base_url.trim_end_matches('/'),
            server.chat_path.trim_start_matches('/')
        )
    }

    /// Directory for the file sink.
    pub fn replies_dir(&self) -> PathBuf {
        self.playback
            .as_ref()
            .and_then(|p| p.output_dir.as_deref())
            .map(expand_path)
            .unwrap_or_else(|| data_dir().join("replies"))
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        let server = self.server();
        if !server.base_url.starts_with("http://") && !server.base_url.starts_with("https://") {
            errors.push(format!(
                "Server base_url must start with http:// or https://: {}",
                server.base_url
            ));
        }
        if server.accept_invalid_certs {
            warnings.push("TLS certificate verification is disabled".to_string());
        }

        let speech = self.speech();
        match speech.provider.as_str() {
            "console" => {}
            "recording" => {
                let has_key = speech
                    .transcription
                    .as_ref()
                    .and_then(|t| t.resolve_api_key())
                    .is_some();
                if !has_key {
                    warnings.push(
                        "Speech provider 'recording' has no transcription API key configured"
                            .to_string(),
                    );
                }
            }
            other => errors.push(format!("Unknown speech provider: {other}")),
        }
        if speech.capture_command.as_ref().is_some_and(|c| c.is_empty()) {
            errors.push("speech.capture_command cannot be empty".to_string());
        }

        let synthesis = self.synthesis();
        match synthesis.provider.as_str() {
            "command" | "none" => {}
            "elevenlabs" => {
                if synthesis.resolve_api_key().is_none() {
                    warnings.push(
                        "Synthesis provider 'elevenlabs' has no API key configured".to_string(),
                    );
                }
            }
            other => errors.push(format!("Unknown synthesis provider: {other}")),
        }
        if synthesis.command.as_ref().is_some_and(|c| c.is_empty()) {
            errors.push("synthesis.command cannot be empty".to_string());
        }

        let playback = self.playback();
        if !matches!(playback.sink.as_str(), "command" | "file" | "null") {
            errors.push(format!("Unknown playback sink: {}", playback.sink));
        }
        if playback.command.as_ref().is_some_and(|c| c.is_empty()) {
            errors.push("playback.command cannot be empty".to_string());
        }

        let visual = self.visual();
        match visual.source.as_str() {
            "none" | "fixed" => {}
            "file" if visual.path.is_none() => {
                errors.push("Visual source 'file' requires visual.path".to_string());
            }
            "file" => {}
            other => errors.push(format!("Unknown visual source: {other}")),
        }

        (warnings, errors)
    }

    /// Save config to a file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Base directory for Zara data: `~/.zara/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".zara")
}
