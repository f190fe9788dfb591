//! Audio sinks — the incremental decode/output targets for one turn.
//!
//! A sink is created fresh for every turn by a [`SinkFactory`] and never
//! reused: a decoder that saw an aborted stream cannot be rewound safely.
//! Implementations release their resources in [`AudioSink::stop`] and on drop.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, info, warn};

use zara_core::config::Config;
use zara_core::{Chunk, SessionError};

/// Default external decoder/player, reading the encoded stream from stdin.
pub const DEFAULT_PLAYER_COMMAND: &[&str] =
    &["ffplay", "-nodisp", "-autoexit", "-loglevel", "quiet", "-i", "-"];

/// What the sink can do with the data absorbed so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    /// Still collecting data before anything is decodable.
    Buffering,
    /// Has decodable content; output has begun or can begin.
    Ready,
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink buffer quota exceeded")]
    QuotaExceeded,

    #[error("audio output unsupported: {0}")]
    Unsupported(String),

    #[error("sink closed")]
    Closed,

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("sink IO error: {0}")]
    Io(std::io::Error),
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::StorageFull | ErrorKind::OutOfMemory => SinkError::QuotaExceeded,
            ErrorKind::BrokenPipe => SinkError::Closed,
            _ => SinkError::Io(err),
        }
    }
}

impl From<SinkError> for SessionError {
    fn from(err: SinkError) -> Self {
        match err {
            SinkError::Unsupported(msg) => SessionError::PlaybackUnsupported(msg),
            other => SessionError::Playback(other.to_string()),
        }
    }
}

/// Incremental audio output target.
///
/// Callers never run two operations on one sink at a time; the `&mut self`
/// receivers make that a compile-time property.
#[async_trait]
pub trait AudioSink: Send {
    fn name(&self) -> &str;

    /// Absorb one chunk. Returning is the sink's readiness signal for the next.
    async fn append(&mut self, chunk: &Chunk) -> Result<SinkState, SinkError>;

    /// End of stream: play out what was absorbed and wait until done.
    async fn finish(&mut self) -> Result<(), SinkError>;

    /// Stop output immediately and release the underlying device.
    async fn stop(&mut self);
}

/// Builds the one sink of a turn.
pub trait SinkFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn AudioSink>, SinkError>;
}

// --- Command sink ---

/// Pipes the encoded stream into an external decoder/player process.
///
/// A write that blocks on a full pipe is the player's backpressure.
pub struct CommandSink {
    program: String,
    child: Child,
    stdin: Option<ChildStdin>,
    written: usize,
}

impl CommandSink {
    pub fn spawn(command: &[String]) -> Result<Self, SinkError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| SinkError::Unsupported("empty player command".into()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    SinkError::Unsupported(format!("player '{program}' not found"))
                }
                _ => SinkError::Io(e),
            })?;

        let stdin = child.stdin.take();
        debug!(program, pid = child.id(), "Spawned audio player");

        Ok(Self {
            program: program.clone(),
            child,
            stdin,
            written: 0,
        })
    }
}

#[async_trait]
impl AudioSink for CommandSink {
    fn name(&self) -> &str {
        &self.program
    }

    async fn append(&mut self, chunk: &Chunk) -> Result<SinkState, SinkError> {
        let stdin = self.stdin.as_mut().ok_or(SinkError::Closed)?;
        stdin.write_all(chunk.as_bytes()).await?;
        stdin.flush().await?;
        self.written += chunk.len();
        Ok(SinkState::Ready)
    }

    async fn finish(&mut self) -> Result<(), SinkError> {
        // Closing stdin is the end-of-stream signal for the player.
        drop(self.stdin.take());
        let status = self.child.wait().await?;
        if !status.success() {
            return Err(SinkError::Decode(format!(
                "{} exited with {status}",
                self.program
            )));
        }
        debug!(program = %self.program, bytes = self.written, "Audio player drained");
        Ok(())
    }

    async fn stop(&mut self) {
        drop(self.stdin.take());
        if let Err(e) = self.child.start_kill() {
            debug!(%e, "Audio player already exited");
        }
        let _ = self.child.wait().await;
    }
}

pub struct CommandSinkFactory {
    command: Vec<String>,
}

impl CommandSinkFactory {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl Default for CommandSinkFactory {
    fn default() -> Self {
        Self::new(DEFAULT_PLAYER_COMMAND.iter().map(|s| s.to_string()).collect())
    }
}

impl SinkFactory for CommandSinkFactory {
    fn create(&self) -> Result<Box<dyn AudioSink>, SinkError> {
        Ok(Box::new(CommandSink::spawn(&self.command)?))
    }
}

// --- File sink ---

/// Writes each reply to its own file. The extension is sniffed from the first
/// bytes of the stream.
pub struct FileSink {
    dir: PathBuf,
    stem: String,
    path: Option<PathBuf>,
    file: Option<tokio::fs::File>,
    written: usize,
}

impl FileSink {
    pub fn new(dir: PathBuf) -> Self {
        let ts = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self {
            dir,
            stem: format!("reply_{ts}_{}", &id[..8]),
            path: None,
            file: None,
            written: 0,
        }
    }

    /// Path of the file being written, once the first chunk arrived.
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }
}

/// Guess a file extension from the leading bytes of an encoded stream.
pub fn sniff_extension(head: &[u8]) -> &'static str {
    match head {
        [b'R', b'I', b'F', b'F', ..] => "wav",
        [b'O', b'g', b'g', b'S', ..] => "ogg",
        [b'f', b'L', b'a', b'C', ..] => "flac",
        [b'I', b'D', b'3', ..] => "mp3",
        [0xFF, b, ..] if b & 0xE0 == 0xE0 => "mp3",
        _ => "bin",
    }
}

#[async_trait]
impl AudioSink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    async fn append(&mut self, chunk: &Chunk) -> Result<SinkState, SinkError> {
        if self.file.is_none() {
            let path = self
                .dir
                .join(format!("{}.{}", self.stem, sniff_extension(chunk.as_bytes())));
            self.file = Some(tokio::fs::File::create(&path).await?);
            self.path = Some(path);
        }
        let file = self.file.as_mut().ok_or(SinkError::Closed)?;
        file.write_all(chunk.as_bytes()).await?;
        self.written += chunk.len();
        Ok(SinkState::Ready)
    }

    async fn finish(&mut self) -> Result<(), SinkError> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        if let Some(path) = &self.path {
            info!(path = %path.display(), bytes = self.written, "Saved reply audio");
        }
        Ok(())
    }

    async fn stop(&mut self) {
        drop(self.file.take());
        if let Some(path) = self.path.take() {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), %e, "Failed to remove partial reply file");
            }
        }
    }
}

pub struct FileSinkFactory {
    dir: PathBuf,
}

impl FileSinkFactory {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

impl SinkFactory for FileSinkFactory {
    fn create(&self) -> Result<Box<dyn AudioSink>, SinkError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| SinkError::Unsupported(format!("{}: {e}", self.dir.display())))?;
        Ok(Box::new(FileSink::new(self.dir.clone())))
    }
}

// --- Null sink ---

/// Discards audio (muted mode).
#[derive(Debug, Default)]
pub struct NullSink {
    absorbed: usize,
}

#[async_trait]
impl AudioSink for NullSink {
    fn name(&self) -> &str {
        "null"
    }

    async fn append(&mut self, chunk: &Chunk) -> Result<SinkState, SinkError> {
        self.absorbed += chunk.len();
        Ok(SinkState::Ready)
    }

    async fn finish(&mut self) -> Result<(), SinkError> {
        debug!(bytes = self.absorbed, "Discarded reply audio");
        Ok(())
    }

    async fn stop(&mut self) {}
}

#[derive(Debug, Default)]
pub struct NullSinkFactory;

impl SinkFactory for NullSinkFactory {
    fn create(&self) -> Result<Box<dyn AudioSink>, SinkError> {
        Ok(Box::new(NullSink::default()))
    }
}

/// Select the sink factory named by `playback.sink`.
pub fn sink_factory_from_config(config: &Config) -> Result<Arc<dyn SinkFactory>, SinkError> {
    let playback = config.playback();
    match playback.sink.as_str() {
        "command" => Ok(Arc::new(match playback.command {
            Some(command) => CommandSinkFactory::new(command),
            None => CommandSinkFactory::default(),
        })),
        "file" => Ok(Arc::new(FileSinkFactory::new(config.replies_dir()))),
        "null" => Ok(Arc::new(NullSinkFactory)),
        other => Err(SinkError::Unsupported(format!("unknown playback sink '{other}'"))),
    }
}
