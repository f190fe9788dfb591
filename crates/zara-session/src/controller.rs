//! Session controller: owns the single live turn and its state.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use zara_core::{AbortToken, ChatRequest, ErrorKind, SessionError};
use zara_media::{CaptureHandle, SinkFactory, SpeechInputAdapter, Synthesizer, VisualContextSource};
use zara_media::visual::NoVisualContext;
use zara_transport::ChatClient;

use crate::event::{
    IDLE_PROMPT, LISTENING_MESSAGE, SessionCommand, SessionEvent, SessionNotice, THINKING_MESSAGE,
    TurnId,
};
use crate::state::{SessionState, Trigger};
use crate::turn::{TurnContext, run_turn};

const NOTICE_CAPACITY: usize = 64;

struct ActiveTurn {
    id: TurnId,
    abort: AbortToken,
    task: JoinHandle<()>,
}

/// Drives capture, request and playback for one conversation, one turn at a
/// time.
pub struct SessionController {
    assistant_name: String,
    state: SessionState,
    turn: TurnId,
    capture: Option<CaptureHandle>,
    active: Option<ActiveTurn>,
    capture_enabled: bool,
    last_error: Option<SessionError>,
    speech: SpeechInputAdapter,
    client: ChatClient,
    sinks: Arc<dyn SinkFactory>,
    synthesizer: Option<Arc<dyn Synthesizer>>,
    visual: Arc<dyn VisualContextSource>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    notices: broadcast::Sender<SessionNotice>,
}

impl SessionController {
    pub fn new(speech: SpeechInputAdapter, client: ChatClient, sinks: Arc<dyn SinkFactory>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            assistant_name: "Zara".into(),
            state: SessionState::Idle,
            turn: 0,
            capture: None,
            active: None,
            capture_enabled: true,
            last_error: None,
            speech,
            client,
            sinks,
            synthesizer: None,
            visual: Arc::new(NoVisualContext),
            events_tx,
            events_rx,
            notices,
        }
    }

    pub fn with_assistant_name(mut self, name: impl Into<String>) -> Self {
        self.assistant_name = name.into();
        self
    }

    pub fn with_synthesizer(mut self, synthesizer: Option<Arc<dyn Synthesizer>>) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    pub fn with_visual_source(mut self, visual: Arc<dyn VisualContextSource>) -> Self {
        self.visual = visual;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn turn_id(&self) -> TurnId {
        self.turn
    }

    pub fn capture_enabled(&self) -> bool {
        self.capture_enabled
    }

    /// The most recent surfaced failure, if any.
    pub fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    /// Begin listening. From `Speaking` this is a barge-in: the playing turn
    /// is torn down completely before capture begins.
    pub async fn start(&mut self) -> bool {
        if !self.capture_enabled {
            let message = SessionError::CaptureUnsupported(String::new()).user_message();
            self.notify(message.unwrap_or_default());
            return false;
        }
        if self.state.next(Trigger::Start).is_none() {
            debug!(state = %self.state, "Start ignored");
            return false;
        }
        if self.state == SessionState::Speaking {
            info!(turn = self.turn, "Barge-in, stopping playback");
        }
        self.teardown().await;

        let turn = self.turn;
        let events = self.events_tx.clone();
        self.capture = Some(self.speech.start(move |outcome| {
            let _ = events.send(SessionEvent::Captured {
                turn,
                outcome: outcome.map_err(SessionError::from),
            });
        }));
        self.transition(Trigger::Start);
        info!(turn, input = self.speech.name(), "Listening");
        self.notify(LISTENING_MESSAGE);
        true
    }

    /// Run a turn with `text` as the transcript, skipping capture.
    pub async fn submit(&mut self, text: impl Into<String>) -> bool {
        if self.state.next(Trigger::Start).is_none() {
            debug!(state = %self.state, "Submit ignored");
            return false;
        }
        self.teardown().await;
        self.transition(Trigger::Start);
        self.on_transcript(text.into()).await;
        true
    }

    /// Capture produced a transcript: send it and start the reply.
    pub async fn on_transcript(&mut self, text: String) {
        if self.state != SessionState::Listening {
            debug!(state = %self.state, "Transcript ignored");
            return;
        }
        if let Some(capture) = self.capture.take() {
            capture.stop().await;
        }

        let sink = match self.sinks.create() {
            Ok(sink) => sink,
            Err(e) => return self.on_error(e.into()).await,
        };

        self.transition(Trigger::Transcript);
        info!(turn = self.turn, text_len = text.len(), "Transcript received");
        self.notify(format!("You said: \"{text}\""));
        self.notify(THINKING_MESSAGE);

        let visual = self.visual.snapshot().await;
        let request = ChatRequest::new(text).with_visual_context(visual);
        let abort = AbortToken::new();
        let task = tokio::spawn(run_turn(TurnContext {
            turn: self.turn,
            lifecycle: self.client.lifecycle(abort.clone()),
            request,
            sink,
            synthesizer: self.synthesizer.clone(),
            events: self.events_tx.clone(),
        }));
        self.active = Some(ActiveTurn {
            id: self.turn,
            abort,
            task,
        });
    }

    pub fn on_first_chunk_ready(&mut self) {
        if self.transition(Trigger::FirstChunkReady) {
            self.notify(format!("{} is speaking...", self.assistant_name));
        }
    }

    pub async fn on_playback_ended(&mut self) {
        if self.state.next(Trigger::PlaybackEnded).is_none() {
            debug!(state = %self.state, "Playback end ignored");
            return;
        }
        if let Some(active) = self.active.take() {
            join_turn(active).await;
        }
        self.transition(Trigger::PlaybackEnded);
        self.notify(IDLE_PROMPT);
    }

    /// Stop whatever is active and return to `Idle` without an error.
    pub async fn on_cancel_requested(&mut self) {
        let had_work = self.capture.is_some() || self.active.is_some();
        self.teardown().await;
        if self.state == SessionState::Idle && !had_work {
            return;
        }
        info!(state = %self.state, "Cancelled");
        self.transition(Trigger::Cancel);
        self.notify(IDLE_PROMPT);
    }

    /// Release everything, surface the failure and return to `Idle`.
    pub async fn on_error(&mut self, error: SessionError) {
        if error.is_silent() {
            return self.on_cancel_requested().await;
        }
        warn!(state = %self.state, kind = ?error.kind(), %error, "Session error");
        self.teardown().await;
        if error.kind() == ErrorKind::CaptureUnsupported {
            self.capture_enabled = false;
        }

        self.transition(Trigger::Fail);
        if let Some(message) = error.user_message() {
            self.notify(message);
        }
        self.last_error = Some(error);
        if !self.transition(Trigger::Recover) {
            self.state = SessionState::Idle;
        }
    }

    /// Push-button semantics: stop while listening, otherwise start.
    pub async fn toggle(&mut self) {
        if self.state == SessionState::Listening {
            self.on_cancel_requested().await;
        } else {
            self.start().await;
        }
    }

    /// Apply one event from a capture or turn task.
    pub async fn handle(&mut self, event: SessionEvent) {
        if event.turn() != self.turn {
            debug!(event_turn = event.turn(), turn = self.turn, "Ignoring stale event");
            return;
        }
        match event {
            SessionEvent::Captured { outcome, .. } => {
                if self.state != SessionState::Listening {
                    debug!(state = %self.state, "Capture outcome ignored");
                    return;
                }
                match outcome {
                    Ok(text) => self.on_transcript(text).await,
                    Err(error) => self.on_error(error).await,
                }
            }
            SessionEvent::ReplyText { text, .. } => {
                self.notify(format!("{}: {text}", self.assistant_name));
            }
            SessionEvent::FirstChunkReady { .. } => self.on_first_chunk_ready(),
            SessionEvent::PlaybackEnded { .. } => self.on_playback_ended().await,
            SessionEvent::Failed { error, .. } => self.on_error(error).await,
        }
    }

    /// Wait for the next event and apply it.
    pub async fn step(&mut self) {
        if let Some(event) = self.events_rx.recv().await {
            self.handle(event).await;
        }
    }

    /// Process events until the session is back to `Idle`.
    pub async fn run_until_idle(&mut self) {
        while self.state != SessionState::Idle {
            self.step().await;
        }
    }

    /// Main loop: interleave front-end commands with task events until
    /// `Shutdown` or the command channel closes.
    pub async fn run(&mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) {
        self.notify(IDLE_PROMPT);
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SessionCommand::Start) => {
                        self.start().await;
                    }
                    Some(SessionCommand::Cancel) => self.on_cancel_requested().await,
                    Some(SessionCommand::Toggle) => self.toggle().await,
                    Some(SessionCommand::Submit(text)) => {
                        self.submit(text).await;
                    }
                    Some(SessionCommand::Shutdown) | None => break,
                },
                Some(event) = self.events_rx.recv() => self.handle(event).await,
            }
        }
        self.on_cancel_requested().await;
        info!("Session loop stopped");
    }

    fn transition(&mut self, trigger: Trigger) -> bool {
        match self.state.next(trigger) {
            Some(next) => {
                debug!(from = %self.state, to = %next, ?trigger, "State transition");
                self.state = next;
                true
            }
            None => {
                debug!(state = %self.state, ?trigger, "Invalid transition ignored");
                false
            }
        }
    }

    fn notify(&self, message: impl Into<String>) {
        let _ = self.notices.send(SessionNotice {
            state: self.state,
            message: message.into(),
        });
    }

    /// Stop capture and the active turn, waiting for both to finish. Retires
    /// the current turn id so queued events from it become stale.
    async fn teardown(&mut self) {
        if let Some(capture) = self.capture.take() {
            capture.stop().await;
        }
        if let Some(active) = self.active.take() {
            active.abort.fire();
            join_turn(active).await;
        }
        self.turn += 1;
    }
}

async fn join_turn(active: ActiveTurn) {
    if let Err(e) = active.task.await {
        warn!(turn = active.id, %e, "Turn task ended abnormally");
    }
    debug!(turn = active.id, "Turn released");
}
