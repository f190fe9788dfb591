//! Per-turn cooperative cancellation handle.

use tokio_util::sync::CancellationToken;

/// Cancellation handle shared by the network and playback halves of a turn.
///
/// Clones observe the same token. Firing is idempotent; everything waiting on
/// [`AbortToken::fired`] wakes at its next suspension point.
#[derive(Debug, Clone, Default)]
pub struct AbortToken {
    inner: CancellationToken,
}

impl AbortToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) {
        self.inner.cancel();
    }

    pub fn is_fired(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Resolves once the token has been fired.
    pub async fn fired(&self) {
        self.inner.cancelled().await
    }
}
