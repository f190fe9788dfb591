//! One-shot speech capture.
//!
//! [`SpeechInputAdapter::start`] begins listening for a single utterance and
//! reports the outcome exactly once through its completion callback, unless
//! the capture is stopped first, in which case nothing is reported.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use zara_core::SessionError;
use zara_core::config::Config;

use crate::stt::{TranscribeError, Transcriber};
use crate::vad::{FRAME_SAMPLES, SpeechDetector, VoiceEvent, samples_from_le_bytes};

/// Default recorder: raw 16 kHz mono PCM16 on stdout.
pub const DEFAULT_CAPTURE_COMMAND: &[&str] =
    &["arecord", "-q", "-f", "S16_LE", "-r", "16000", "-c", "1", "-t", "raw"];

const DEFAULT_MAX_SECONDS: u64 = 15;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("speech capture unsupported: {0}")]
    Unsupported(String),

    #[error("no speech detected")]
    NoSpeech,

    #[error("capture failed: {0}")]
    Failed(String),
}

impl From<CaptureError> for SessionError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::Unsupported(msg) => SessionError::CaptureUnsupported(msg),
            CaptureError::NoSpeech => SessionError::Capture("no-speech".into()),
            CaptureError::Failed(msg) => SessionError::Capture(msg),
        }
    }
}

impl From<TranscribeError> for CaptureError {
    fn from(err: TranscribeError) -> Self {
        match err {
            TranscribeError::MissingKey => CaptureError::Unsupported(err.to_string()),
            other => CaptureError::Failed(other.to_string()),
        }
    }
}

/// A platform speech recognizer producing one final transcript per call.
#[async_trait]
pub trait SpeechInput: Send + Sync {
    fn name(&self) -> &str;

    /// Listen for one utterance. Dropping the future abandons the capture.
    async fn capture(&self) -> Result<String, CaptureError>;
}

/// Wraps a [`SpeechInput`] into start/stop semantics.
#[derive(Clone)]
pub struct SpeechInputAdapter {
    input: Arc<dyn SpeechInput>,
}

impl SpeechInputAdapter {
    pub fn new(input: Arc<dyn SpeechInput>) -> Self {
        Self { input }
    }

    pub fn name(&self) -> &str {
        self.input.name()
    }

    /// Begin a single capture. `on_done` receives the trimmed transcript or
    /// the capture error; a blank transcript is reported as `NoSpeech`.
    pub fn start<F>(&self, on_done: F) -> CaptureHandle
    where
        F: FnOnce(Result<String, CaptureError>) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let input = self.input.clone();

        let task = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(input = input.name(), "Capture stopped before a result");
                }
                outcome = input.capture() => {
                    let outcome = outcome.and_then(|text| {
                        let text = text.trim();
                        if text.is_empty() {
                            Err(CaptureError::NoSpeech)
                        } else {
                            Ok(text.to_string())
                        }
                    });
                    on_done(outcome);
                }
            }
        });

        CaptureHandle { cancel, task }
    }
}

/// A running capture.
pub struct CaptureHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl CaptureHandle {
    /// Abandon the capture and wait for it to wind down. No outcome is
    /// delivered after this returns.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(%e, "Capture task ended abnormally");
        }
    }
}

// --- Console input ---

/// Typed utterances, one line per capture. Used when no microphone is wired up.
pub struct ConsoleSpeechInput {
    lines: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl ConsoleSpeechInput {
    /// Returns the input and the sender that feeds it lines.
    pub fn new() -> (Self, mpsc::UnboundedSender<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                lines: Mutex::new(rx),
            },
            tx,
        )
    }
}

#[async_trait]
impl SpeechInput for ConsoleSpeechInput {
    fn name(&self) -> &str {
        "console"
    }

    async fn capture(&self) -> Result<String, CaptureError> {
        let mut lines = self.lines.lock().await;
        match lines.recv().await {
            Some(line) if line.trim().is_empty() => Err(CaptureError::NoSpeech),
            Some(line) => Ok(line),
            None => Err(CaptureError::Unsupported("console input closed".into())),
        }
    }
}

// --- Recorder + transcription ---

/// Records from a capture command until the speaker stops, then transcribes.
pub struct RecordingSpeechInput {
    command: Vec<String>,
    max_duration: Duration,
    threshold: Option<f64>,
    silence_ms: Option<u64>,
    transcriber: Transcriber,
}

impl RecordingSpeechInput {
    pub fn new(command: Vec<String>, max_duration: Duration, transcriber: Transcriber) -> Self {
        Self {
            command,
            max_duration,
            threshold: None,
            silence_ms: None,
            transcriber,
        }
    }

    pub fn with_detector(mut self, threshold: Option<f64>, silence_ms: Option<u64>) -> Self {
        self.threshold = threshold;
        self.silence_ms = silence_ms;
        self
    }

    pub fn from_config(config: &Config) -> Self {
        let speech = config.speech();
        let command = speech
            .capture_command
            .clone()
            .unwrap_or_else(|| DEFAULT_CAPTURE_COMMAND.iter().map(|s| s.to_string()).collect());
        let transcriber = Transcriber::new(
            speech.transcription.clone().unwrap_or_default(),
            speech.language.clone(),
        );
        Self::new(
            command,
            Duration::from_secs(speech.max_seconds.unwrap_or(DEFAULT_MAX_SECONDS)),
            transcriber,
        )
        .with_detector(speech.vad_threshold, speech.silence_ms)
    }

    /// Read frames until the utterance ends, the deadline passes or the
    /// recorder exits. Returns the samples and whether speech was heard.
    async fn record(&self) -> Result<(Vec<i16>, bool), CaptureError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| CaptureError::Unsupported("empty capture command".into()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    CaptureError::Unsupported(format!("recorder '{program}' not found"))
                }
                _ => CaptureError::Failed(e.to_string()),
            })?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::Failed("recorder has no stdout".into()))?;

        let mut detector = SpeechDetector::from_settings(self.threshold, self.silence_ms);
        let deadline = tokio::time::Instant::now() + self.max_duration;
        let mut frame = vec![0u8; FRAME_SAMPLES * 2];
        let mut pcm = Vec::new();

        loop {
            let read = tokio::time::timeout_at(deadline, stdout.read_exact(&mut frame)).await;
            let samples = match read {
                Err(_) => {
                    debug!("Capture reached its time limit");
                    break;
                }
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Ok(Err(e)) => return Err(CaptureError::Failed(e.to_string())),
                Ok(Ok(_)) => samples_from_le_bytes(&frame),
            };
            let event = detector.push_frame(&samples);
            pcm.extend_from_slice(&samples);
            if event == Some(VoiceEvent::SpeechEnded) {
                break;
            }
        }

        if let Err(e) = child.start_kill() {
            debug!(%e, "Recorder already exited");
        }
        let _ = child.wait().await;
        Ok((pcm, detector.heard_speech()))
    }
}

#[async_trait]
impl SpeechInput for RecordingSpeechInput {
    fn name(&self) -> &str {
        "recording"
    }

    async fn capture(&self) -> Result<String, CaptureError> {
        if !self.transcriber.has_key() {
            return Err(TranscribeError::MissingKey.into());
        }
        let (pcm, heard_speech) = self.record().await?;
        if !heard_speech {
            return Err(CaptureError::NoSpeech);
        }
        info!(samples = pcm.len(), "Utterance recorded");
        Ok(self.transcriber.transcribe(&pcm).await?)
    }
}

/// Build the capture backend named by `speech.provider`.
///
/// For the console provider the returned sender feeds typed lines to it.
pub fn speech_input_from_config(
    config: &Config,
) -> Result<(Arc<dyn SpeechInput>, Option<mpsc::UnboundedSender<String>>), CaptureError> {
    match config.speech().provider.as_str() {
        "console" => {
            let (input, lines) = ConsoleSpeechInput::new();
            Ok((Arc::new(input), Some(lines)))
        }
        "recording" => Ok((Arc::new(RecordingSpeechInput::from_config(config)), None)),
        other => Err(CaptureError::Unsupported(format!(
            "unknown speech provider '{other}'"
        ))),
    }
}
