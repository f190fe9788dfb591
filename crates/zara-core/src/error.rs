use thiserror::Error;

#[derive(Debug, Error)]
pub enum ZaraError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ZaraError>;

/// Message shown when the chat endpoint cannot be reached at all.
pub const UNREACHABLE_MESSAGE: &str = "Error connecting to the brain. Is the server running?";

/// Message shown after a failed capture attempt.
pub const RETRY_CAPTURE_MESSAGE: &str = "I didn't quite catch that. Try again.";

/// Message shown when playback of a reply fails.
pub const PLAYBACK_FAILED_MESSAGE: &str = "Error making me speak.";

/// Classification of everything that can end a turn early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    CaptureUnsupported,
    CaptureError,
    NetworkError,
    UserCancelled,
    PlaybackUnsupported,
    PlaybackError,
}

/// Errors surfaced to the session controller.
///
/// Every variant ends the current turn. Recoverable kinds return the session
/// to idle with a status message; fatal kinds additionally disable the
/// affected capability.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("speech capture unsupported: {0}")]
    CaptureUnsupported(String),

    #[error("speech capture failed: {0}")]
    Capture(String),

    #[error("{message}")]
    Network {
        status: Option<u16>,
        message: String,
    },

    #[error("cancelled by user")]
    UserCancelled,

    #[error("audio playback unsupported: {0}")]
    PlaybackUnsupported(String),

    #[error("audio playback failed: {0}")]
    Playback(String),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CaptureUnsupported(_) => ErrorKind::CaptureUnsupported,
            Self::Capture(_) => ErrorKind::CaptureError,
            Self::Network { .. } => ErrorKind::NetworkError,
            Self::UserCancelled => ErrorKind::UserCancelled,
            Self::PlaybackUnsupported(_) => ErrorKind::PlaybackUnsupported,
            Self::Playback(_) => ErrorKind::PlaybackError,
        }
    }

    /// Fatal kinds disable a capability instead of only failing one attempt.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::CaptureUnsupported | ErrorKind::PlaybackUnsupported
        )
    }

    /// Cancellation is never reported as a failure.
    pub fn is_silent(&self) -> bool {
        self.kind() == ErrorKind::UserCancelled
    }

    /// Status text for the user. `None` for silent kinds.
    pub fn user_message(&self) -> Option<String> {
        match self {
            Self::CaptureUnsupported(_) => {
                Some("Sorry, speech recognition is not supported here.".into())
            }
            Self::Capture(_) => Some(RETRY_CAPTURE_MESSAGE.into()),
            Self::Network { message, .. } => Some(message.clone()),
            Self::UserCancelled => None,
            Self::PlaybackUnsupported(_) => {
                Some("Sorry, audio playback is not supported here.".into())
            }
            Self::Playback(_) => Some(PLAYBACK_FAILED_MESSAGE.into()),
        }
    }
}
