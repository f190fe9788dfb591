//! The session state machine.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Listening,
    AwaitingReply,
    Speaking,
    Error,
}

/// What happened, independent of who reported it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Start,
    Transcript,
    FirstChunkReady,
    PlaybackEnded,
    Cancel,
    Fail,
    Recover,
}

impl SessionState {
    /// The state `trigger` leads to, or `None` if it is not valid here.
    pub fn next(self, trigger: Trigger) -> Option<SessionState> {
        use SessionState::*;
        use Trigger::*;
        match (self, trigger) {
            (Idle | Speaking, Start) => Some(Listening),
            (Listening, Transcript) => Some(AwaitingReply),
            (AwaitingReply, FirstChunkReady) => Some(Speaking),
            // A reply with no audible content ends without ever speaking.
            (Speaking | AwaitingReply, PlaybackEnded) => Some(Idle),
            (Idle | Listening | AwaitingReply | Speaking, Cancel) => Some(Idle),
            (Listening | AwaitingReply | Speaking, Fail) => Some(Error),
            (Error, Recover) => Some(Idle),
            _ => None,
        }
    }

    /// A turn is in progress.
    pub fn is_active(self) -> bool {
        !matches!(self, SessionState::Idle | SessionState::Error)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::AwaitingReply => "awaiting_reply",
            Self::Speaking => "speaking",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}
