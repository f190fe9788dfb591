//! Progressive playback of one streamed reply.
//!
//! [`AudioStreamPlayer`] feeds queued chunks into its sink strictly one at a
//! time. The sink itself moves into the in-flight operation, so a second
//! concurrent delivery cannot be expressed. The operation is stored on the
//! player and [`AudioStreamPlayer::progress`] only awaits it, which makes
//! `progress` safe to use as a `tokio::select!` branch.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;

use tracing::{debug, info, warn};

use zara_core::Chunk;

use crate::sink::{AudioSink, SinkError, SinkState};

/// FIFO of received, not yet delivered chunks.
#[derive(Debug, Default)]
pub struct ChunkQueue {
    chunks: VecDeque<Chunk>,
    bytes: usize,
}

impl ChunkQueue {
    pub fn push(&mut self, chunk: Chunk) {
        self.bytes += chunk.len();
        self.chunks.push_back(chunk);
    }

    pub fn pop(&mut self) -> Option<Chunk> {
        let chunk = self.chunks.pop_front()?;
        self.bytes -= chunk.len();
        Some(chunk)
    }

    /// Drop everything queued, returning how many chunks were discarded.
    pub fn clear(&mut self) -> usize {
        let dropped = self.chunks.len();
        self.chunks.clear();
        self.bytes = 0;
        dropped
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

/// Observable milestones of a playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    /// The sink became ready for output for the first time.
    Started,
    /// The sink ran out of room; this many queued chunks were discarded.
    ChunksDropped(usize),
    /// End of stream was marked, everything was delivered and output finished.
    Ended,
}

enum Step {
    Append(usize),
    Finish,
}

struct Completion {
    sink: Box<dyn AudioSink>,
    step: Step,
    result: Result<SinkState, SinkError>,
}

type InFlight = Pin<Box<dyn Future<Output = Completion> + Send>>;

enum SinkSlot {
    Idle(Box<dyn AudioSink>),
    Busy(InFlight),
    Released,
}

/// Incremental decode-and-play of one reply.
pub struct AudioStreamPlayer {
    sink_name: String,
    queue: ChunkQueue,
    slot: SinkSlot,
    end_marked: bool,
    started: bool,
    ended: bool,
    chunks_delivered: usize,
    bytes_delivered: usize,
}

impl AudioStreamPlayer {
    pub fn new(sink: Box<dyn AudioSink>) -> Self {
        Self {
            sink_name: sink.name().to_string(),
            queue: ChunkQueue::default(),
            slot: SinkSlot::Idle(sink),
            end_marked: false,
            started: false,
            ended: false,
            chunks_delivered: 0,
            bytes_delivered: 0,
        }
    }

    /// Append a chunk to the pending queue and deliver it if the sink is idle.
    pub fn enqueue(&mut self, chunk: Chunk) {
        if matches!(self.slot, SinkSlot::Released) {
            debug!(len = chunk.len(), "Dropping chunk for released sink");
            return;
        }
        self.queue.push(chunk);
        self.pump();
    }

    /// No more chunks will be enqueued. Output finishes once the queue drains.
    pub fn mark_end(&mut self) {
        if self.end_marked {
            return;
        }
        self.end_marked = true;
        self.pump();
    }

    /// A sink operation is in flight.
    pub fn is_busy(&self) -> bool {
        matches!(self.slot, SinkSlot::Busy(_))
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Playback ended normally.
    pub fn is_finished(&self) -> bool {
        self.ended
    }

    /// The sink has been given up (finished, failed or cancelled).
    pub fn is_released(&self) -> bool {
        matches!(self.slot, SinkSlot::Released)
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn chunks_delivered(&self) -> usize {
        self.chunks_delivered
    }

    pub fn bytes_delivered(&self) -> usize {
        self.bytes_delivered
    }

    /// Wait for the in-flight sink operation and advance the queue.
    ///
    /// Returns `Ok(None)` immediately when nothing is in flight. Any sink
    /// error other than quota exhaustion tears playback down and is returned.
    pub async fn progress(&mut self) -> Result<Option<PlayerEvent>, SinkError> {
        let SinkSlot::Busy(in_flight) = &mut self.slot else {
            return Ok(None);
        };
        let Completion { sink, step, result } = in_flight.await;
        self.slot = SinkSlot::Idle(sink);

        match (step, result) {
            (Step::Append(len), Ok(state)) => {
                self.chunks_delivered += 1;
                self.bytes_delivered += len;
                let event = if state == SinkState::Ready && !self.started {
                    self.started = true;
                    info!(sink = %self.sink_name, "Playback started");
                    Some(PlayerEvent::Started)
                } else {
                    None
                };
                self.pump();
                Ok(event)
            }
            (Step::Append(len), Err(SinkError::QuotaExceeded)) => {
                let dropped_bytes = len + self.queue.bytes();
                let dropped = self.queue.clear();
                warn!(
                    sink = %self.sink_name,
                    dropped,
                    dropped_bytes,
                    "Sink quota exceeded, dropped queued chunks"
                );
                self.pump();
                Ok(Some(PlayerEvent::ChunksDropped(dropped)))
            }
            (Step::Finish, Ok(_)) => {
                self.ended = true;
                self.slot = SinkSlot::Released;
                info!(
                    sink = %self.sink_name,
                    chunks = self.chunks_delivered,
                    bytes = self.bytes_delivered,
                    "Playback ended"
                );
                Ok(Some(PlayerEvent::Ended))
            }
            (_, Err(e)) => {
                warn!(sink = %self.sink_name, error = %e, "Playback failed");
                self.cancel().await;
                Err(e)
            }
        }
    }

    /// Stop output, discard queued chunks and release the sink. Idempotent.
    pub async fn cancel(&mut self) {
        let dropped_bytes = self.queue.bytes();
        let dropped = self.queue.clear();
        match std::mem::replace(&mut self.slot, SinkSlot::Released) {
            SinkSlot::Idle(mut sink) => {
                sink.stop().await;
                debug!(sink = %self.sink_name, dropped, dropped_bytes, "Playback cancelled");
            }
            SinkSlot::Busy(in_flight) => {
                // Dropping the operation drops the sink it owns.
                drop(in_flight);
                debug!(
                    sink = %self.sink_name,
                    dropped,
                    dropped_bytes,
                    "Playback cancelled mid-delivery"
                );
            }
            SinkSlot::Released => {}
        }
    }

    /// Start the next sink operation if the sink is idle and there is work.
    fn pump(&mut self) {
        if !matches!(self.slot, SinkSlot::Idle(_)) {
            return;
        }
        let step = match self.queue.pop() {
            Some(chunk) => Some(chunk),
            None if self.end_marked && !self.ended => None,
            None => return,
        };
        if let SinkSlot::Idle(mut sink) = std::mem::replace(&mut self.slot, SinkSlot::Released) {
            self.slot = SinkSlot::Busy(Box::pin(async move {
                match step {
                    Some(chunk) => {
                        let result = sink.append(&chunk).await;
                        Completion {
                            sink,
                            step: Step::Append(chunk.len()),
                            result,
                        }
                    }
                    None => {
                        let result = sink.finish().await.map(|()| SinkState::Ready);
                        Completion {
                            sink,
                            step: Step::Finish,
                            result,
                        }
                    }
                }
            }));
        }
    }
}
