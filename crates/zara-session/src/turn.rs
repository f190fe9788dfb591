//! The task driving one reply: request, optional synthesis, playback.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use zara_core::{ChatRequest, SessionError};
use zara_media::{AudioSink, AudioStreamPlayer, PlayerEvent, Synthesizer};
use zara_transport::{ChunkStream, Reply, RequestLifecycle};

use crate::event::{SessionEvent, TurnId};

pub(crate) struct TurnContext {
    pub turn: TurnId,
    pub lifecycle: RequestLifecycle,
    pub request: ChatRequest,
    pub sink: Box<dyn AudioSink>,
    pub synthesizer: Option<Arc<dyn Synthesizer>>,
    pub events: mpsc::UnboundedSender<SessionEvent>,
}

/// Run a turn to completion. Reports milestones and failures as events;
/// a cancelled turn reports nothing.
pub(crate) async fn run_turn(ctx: TurnContext) {
    let TurnContext {
        turn,
        lifecycle,
        request,
        sink,
        synthesizer,
        events,
    } = ctx;

    let mut player = AudioStreamPlayer::new(sink);
    let outcome = drive(turn, &lifecycle, &request, synthesizer, &mut player, &events).await;
    // Releases the sink on every path; a finished player is already released.
    player.cancel().await;

    match outcome {
        Ok(()) => debug!(turn, "Turn complete"),
        Err(SessionError::UserCancelled) => debug!(turn, "Turn cancelled"),
        Err(error) => {
            warn!(turn, kind = ?error.kind(), %error, "Turn failed");
            let _ = events.send(SessionEvent::Failed { turn, error });
        }
    }
}

async fn drive(
    turn: TurnId,
    lifecycle: &RequestLifecycle,
    request: &ChatRequest,
    synthesizer: Option<Arc<dyn Synthesizer>>,
    player: &mut AudioStreamPlayer,
    events: &mpsc::UnboundedSender<SessionEvent>,
) -> Result<(), SessionError> {
    let abort = lifecycle.abort_token().clone();

    let mut chunks: ChunkStream = match lifecycle.send(request).await? {
        Reply::Audio { content_type, chunks } => {
            debug!(turn, %content_type, "Playing streamed reply");
            chunks
        }
        Reply::Text(text) => {
            // Shown even when it cannot be spoken.
            let _ = events.send(SessionEvent::ReplyText {
                turn,
                text: text.clone(),
            });
            let synthesizer = synthesizer.ok_or_else(|| {
                SessionError::PlaybackUnsupported("no speech synthesizer configured".into())
            })?;
            debug!(turn, synthesizer = synthesizer.name(), "Synthesizing text reply");
            synthesizer.synthesize(&text, &abort).await?
        }
    };

    let mut network_open = true;
    loop {
        tokio::select! {
            biased;
            _ = abort.fired() => return Err(SessionError::UserCancelled),
            progress = player.progress(), if player.is_busy() => match progress? {
                Some(PlayerEvent::Started) => {
                    let _ = events.send(SessionEvent::FirstChunkReady { turn });
                }
                Some(PlayerEvent::ChunksDropped(dropped)) => {
                    debug!(turn, dropped, "Continuing after dropped chunks");
                }
                Some(PlayerEvent::Ended) => {
                    info!(
                        turn,
                        chunks = player.chunks_delivered(),
                        bytes = player.bytes_delivered(),
                        "Reply played"
                    );
                    let _ = events.send(SessionEvent::PlaybackEnded { turn });
                    return Ok(());
                }
                None => {}
            },
            next = chunks.next(), if network_open => match next {
                Some(Ok(chunk)) => player.enqueue(chunk),
                Some(Err(e)) => return Err(e.into()),
                None => {
                    debug!(turn, "Reply stream complete");
                    network_open = false;
                    player.mark_end();
                }
            },
        }
    }
}
