//! Messages flowing into and out of the session controller.

use zara_core::SessionError;

use crate::state::SessionState;

/// Identifies one capture + reply cycle. Events carrying an older id are stale.
pub type TurnId = u64;

pub const LISTENING_MESSAGE: &str = "Listening...";
pub const THINKING_MESSAGE: &str = "Thinking...";
pub const IDLE_PROMPT: &str = "Press Enter and start speaking.";

/// Reports from capture and turn tasks.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The capture finished with a transcript or an error.
    Captured {
        turn: TurnId,
        outcome: Result<String, SessionError>,
    },
    /// The server answered in text; it is spoken through the synthesizer.
    ReplyText { turn: TurnId, text: String },
    FirstChunkReady { turn: TurnId },
    PlaybackEnded { turn: TurnId },
    Failed { turn: TurnId, error: SessionError },
}

impl SessionEvent {
    pub fn turn(&self) -> TurnId {
        match self {
            Self::Captured { turn, .. }
            | Self::ReplyText { turn, .. }
            | Self::FirstChunkReady { turn }
            | Self::PlaybackEnded { turn }
            | Self::Failed { turn, .. } => *turn,
        }
    }
}

/// Requests from a front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Start,
    Cancel,
    Toggle,
    /// Run a turn with a transcript that did not come from capture.
    Submit(String),
    Shutdown,
}

/// Status update for front ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionNotice {
    pub state: SessionState,
    pub message: String,
}
