//! Voice session orchestration.
//!
//! The [`SessionController`] walks each turn through
//! `Idle → Listening → AwaitingReply → Speaking → Idle`, owning the capture,
//! the chat request and the player of that turn. Capture and turn tasks report
//! back through [`SessionEvent`]s; front ends drive it with
//! [`SessionCommand`]s and observe it through [`SessionNotice`]s.

pub mod controller;
pub mod event;
pub mod state;
mod turn;

pub use controller::SessionController;
pub use event::{SessionCommand, SessionEvent, SessionNotice, TurnId};
pub use state::{SessionState, Trigger};
