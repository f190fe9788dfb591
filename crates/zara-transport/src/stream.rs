//! Cancellable chunk streams.
//!
//! Wraps any byte stream (an HTTP body, a synthesizer's stdout) into a
//! `Stream<Item = Result<Chunk, RequestError>>` that stops at the next
//! suspension point once the turn's [`AbortToken`] fires.

use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use tokio_stream::StreamExt;

use zara_core::{AbortToken, Chunk};

use crate::RequestError;

/// A lazy, finite, non-restartable sequence of reply chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Chunk, RequestError>> + Send>>;

/// Make `inner` observe `abort`.
///
/// After the token fires the stream yields exactly one
/// `Err(RequestError::Cancelled)` and then ends. The stream also ends after
/// the first error from `inner`. Empty buffers are skipped.
pub fn abortable<S, E>(inner: S, abort: AbortToken) -> ChunkStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<RequestError> + Send + 'static,
{
    let state = AbortableState {
        inner: Box::pin(inner),
        abort,
        done: false,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }
        loop {
            tokio::select! {
                biased;
                _ = state.abort.fired() => {
                    state.done = true;
                    return Some((Err(RequestError::Cancelled), state));
                }
                next = state.inner.next() => match next {
                    Some(Ok(bytes)) if bytes.is_empty() => continue,
                    Some(Ok(bytes)) => return Some((Ok(Chunk::from(bytes)), state)),
                    Some(Err(e)) => {
                        state.done = true;
                        return Some((Err(e.into()), state));
                    }
                    None => return None,
                },
            }
        }
    }))
}

struct AbortableState<E> {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, E>> + Send>>,
    abort: AbortToken,
    done: bool,
}
