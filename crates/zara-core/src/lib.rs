//! Core types, config, and errors for the Zara voice client.

pub mod abort;
pub mod config;
pub mod error;
pub mod types;

pub use abort::AbortToken;
pub use error::{ErrorKind, SessionError};
pub use types::{ChatRequest, ChatResponse, Chunk, ErrorBody, VisualContext};
