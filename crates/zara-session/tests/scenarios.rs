//! End-to-end turns against a local chat endpoint with recording sinks.
//!
//! Run with: `cargo test -p zara-session --test scenarios`

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{MethodRouter, post};
use bytes::Bytes;
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};

use zara_core::error::{PLAYBACK_FAILED_MESSAGE, RETRY_CAPTURE_MESSAGE};
use zara_core::{AbortToken, Chunk, ErrorKind, SessionError, VisualContext};
use zara_media::sink::{AudioSink, SinkError, SinkFactory, SinkState};
use zara_media::visual::FixedVisualContext;
use zara_media::{ConsoleSpeechInput, SpeechInputAdapter, SynthError, Synthesizer};
use zara_session::event::IDLE_PROMPT;
use zara_session::{SessionCommand, SessionController, SessionEvent, SessionNotice, SessionState};
use zara_transport::{ChatClient, ChunkStream, abortable};

// --- Chat endpoint ---

#[derive(Default)]
struct Endpoint {
    hits: AtomicUsize,
    bodies: Mutex<Vec<Value>>,
}

type Shared = Arc<Endpoint>;

fn record(endpoint: &Endpoint, body: Value) {
    endpoint.hits.fetch_add(1, Ordering::SeqCst);
    endpoint.bodies.lock().unwrap().push(body);
}

async fn audio_reply(State(ep): State<Shared>, axum::Json(body): axum::Json<Value>) -> impl IntoResponse {
    record(&ep, body);
    let chunks = futures::stream::iter([100usize, 200, 50]).then(|n| async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok::<_, std::io::Error>(Bytes::from(vec![n as u8; n]))
    });
    ([(header::CONTENT_TYPE, "audio/mpeg")], Body::from_stream(chunks))
}

async fn endless_audio(State(ep): State<Shared>, axum::Json(body): axum::Json<Value>) -> impl IntoResponse {
    record(&ep, body);
    let chunks = futures::stream::repeat(()).then(|()| async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok::<_, std::io::Error>(Bytes::from(vec![7u8; 32]))
    });
    ([(header::CONTENT_TYPE, "audio/mpeg")], Body::from_stream(chunks))
}

async fn silent_audio(State(ep): State<Shared>, axum::Json(body): axum::Json<Value>) -> impl IntoResponse {
    record(&ep, body);
    ([(header::CONTENT_TYPE, "audio/mpeg")], Body::empty())
}

async fn busy(State(ep): State<Shared>, axum::Json(body): axum::Json<Value>) -> impl IntoResponse {
    record(&ep, body);
    (
        StatusCode::SERVICE_UNAVAILABLE,
        axum::Json(json!({ "error": "busy" })),
    )
}

async fn text_reply(State(ep): State<Shared>, axum::Json(body): axum::Json<Value>) -> axum::Json<Value> {
    record(&ep, body);
    axum::Json(json!({ "response": "hi there" }))
}

async fn stalled(State(ep): State<Shared>, axum::Json(body): axum::Json<Value>) -> &'static str {
    record(&ep, body);
    tokio::time::sleep(Duration::from_secs(60)).await;
    "late"
}

// --- Recording sinks ---

#[derive(Debug, Default)]
struct SinkLog {
    created: usize,
    live: usize,
    max_live: usize,
    in_flight: usize,
    max_in_flight: usize,
    finished: usize,
    /// Bytes received, per created sink.
    received: Vec<Vec<u8>>,
    /// Chunk sizes, per created sink.
    appends: Vec<Vec<usize>>,
    /// Append call (per sink, from zero) that fails to decode.
    fail_at: Option<usize>,
    /// Append call (per sink, from zero) that runs out of room.
    quota_at: Option<usize>,
}

struct RecordingFactory(Arc<Mutex<SinkLog>>);

impl SinkFactory for RecordingFactory {
    fn create(&self) -> Result<Box<dyn AudioSink>, SinkError> {
        let mut log = self.0.lock().unwrap();
        log.created += 1;
        log.live += 1;
        log.max_live = log.max_live.max(log.live);
        log.received.push(Vec::new());
        log.appends.push(Vec::new());
        Ok(Box::new(RecordingSink {
            index: log.created - 1,
            calls: 0,
            log: self.0.clone(),
        }))
    }
}

struct RecordingSink {
    index: usize,
    calls: usize,
    log: Arc<Mutex<SinkLog>>,
}

impl Drop for RecordingSink {
    fn drop(&mut self) {
        self.log.lock().unwrap().live -= 1;
    }
}

#[async_trait]
impl AudioSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn append(&mut self, chunk: &Chunk) -> Result<SinkState, SinkError> {
        {
            let mut log = self.log.lock().unwrap();
            log.in_flight += 1;
            log.max_in_flight = log.max_in_flight.max(log.in_flight);
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
        let call = self.calls;
        self.calls += 1;
        let mut log = self.log.lock().unwrap();
        log.in_flight -= 1;
        if log.fail_at == Some(call) {
            return Err(SinkError::Decode("bad".into()));
        }
        if log.quota_at == Some(call) {
            return Err(SinkError::QuotaExceeded);
        }
        log.received[self.index].extend_from_slice(chunk.as_bytes());
        log.appends[self.index].push(chunk.len());
        Ok(SinkState::Ready)
    }

    async fn finish(&mut self) -> Result<(), SinkError> {
        self.log.lock().unwrap().finished += 1;
        Ok(())
    }

    async fn stop(&mut self) {}
}

/// Speaks text by streaming its words as chunks.
struct WordSynthesizer;

#[async_trait]
impl Synthesizer for WordSynthesizer {
    fn name(&self) -> &str {
        "words"
    }

    async fn synthesize(&self, text: &str, abort: &AbortToken) -> Result<ChunkStream, SynthError> {
        let words: Vec<Result<Bytes, std::io::Error>> = text
            .split_inclusive(' ')
            .map(|w| Ok(Bytes::copy_from_slice(w.as_bytes())))
            .collect();
        Ok(abortable(futures::stream::iter(words), abort.clone()))
    }
}

// --- Harness ---

struct Harness {
    controller: SessionController,
    lines: mpsc::UnboundedSender<String>,
    sinks: Arc<Mutex<SinkLog>>,
    endpoint: Shared,
    notices: broadcast::Receiver<SessionNotice>,
}

async fn harness(route: MethodRouter<Shared>) -> Harness {
    harness_with(route, |controller| controller).await
}

async fn harness_with(
    route: MethodRouter<Shared>,
    configure: impl FnOnce(SessionController) -> SessionController,
) -> Harness {
    let endpoint = Shared::default();
    let router = Router::new().route("/chat", route).with_state(endpoint.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    let (input, lines) = ConsoleSpeechInput::new();
    let sinks = Arc::new(Mutex::new(SinkLog::default()));
    let controller = configure(SessionController::new(
        SpeechInputAdapter::new(Arc::new(input)),
        ChatClient::new(format!("http://{addr}/chat")),
        Arc::new(RecordingFactory(sinks.clone())),
    ));
    let notices = controller.subscribe();

    Harness {
        controller,
        lines,
        sinks,
        endpoint,
        notices,
    }
}

impl Harness {
    fn say(&self, text: &str) {
        self.lines.send(text.to_string()).unwrap();
    }

    async fn step_until(&mut self, target: SessionState) {
        within(async {
            while self.controller.state() != target {
                self.controller.step().await;
            }
        })
        .await;
    }

    async fn finish_turn(&mut self) {
        within(self.controller.run_until_idle()).await;
    }

    fn notices(&mut self) -> Vec<SessionNotice> {
        let mut out = Vec::new();
        while let Ok(notice) = self.notices.try_recv() {
            out.push(notice);
        }
        out
    }

    fn messages(&mut self) -> Vec<String> {
        self.notices().into_iter().map(|n| n.message).collect()
    }

    fn hits(&self) -> usize {
        self.endpoint.hits.load(Ordering::SeqCst)
    }
}

async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out")
}

// --- Scenarios ---

#[tokio::test]
async fn test_streamed_reply_plays_in_order() {
    let mut h = harness(post(audio_reply)).await;

    h.say("hello");
    assert!(h.controller.start().await);
    assert_eq!(h.controller.state(), SessionState::Listening);
    h.step_until(SessionState::AwaitingReply).await;
    h.finish_turn().await;

    assert_eq!(h.controller.state(), SessionState::Idle);
    assert!(h.controller.last_error().is_none());
    assert_eq!(h.endpoint.bodies.lock().unwrap()[0]["message"], "hello");

    let mut expected = vec![100u8; 100];
    expected.extend(vec![200u8; 200]);
    expected.extend(vec![50u8; 50]);
    {
        let log = h.sinks.lock().unwrap();
        assert_eq!(log.created, 1);
        assert_eq!(log.received[0], expected);
        assert_eq!(log.max_in_flight, 1);
        assert_eq!(log.finished, 1);
        assert_eq!(log.live, 0);
    }

    let messages = h.messages();
    assert_eq!(
        messages,
        vec![
            "Listening...".to_string(),
            "You said: \"hello\"".into(),
            "Thinking...".into(),
            "Zara is speaking...".into(),
            IDLE_PROMPT.into(),
        ]
    );
}

#[tokio::test]
async fn test_cancel_while_speaking() {
    let mut h = harness(post(endless_audio)).await;

    h.say("tell me everything");
    h.controller.start().await;
    h.step_until(SessionState::Speaking).await;
    let turn = h.controller.turn_id();

    h.controller.on_cancel_requested().await;

    assert_eq!(h.controller.state(), SessionState::Idle);
    assert!(h.controller.last_error().is_none());
    {
        let log = h.sinks.lock().unwrap();
        assert_eq!(log.live, 0);
        assert_eq!(log.finished, 0);
        assert!(!log.received[0].is_empty());
    }
    let notices = h.notices();
    assert!(notices.iter().all(|n| n.state != SessionState::Error));
    assert_eq!(notices.last().unwrap().message, IDLE_PROMPT);

    // Anything the cancelled turn left behind is stale.
    h.controller
        .handle(SessionEvent::FirstChunkReady { turn })
        .await;
    h.controller.handle(SessionEvent::PlaybackEnded { turn }).await;
    h.controller
        .handle(SessionEvent::Failed {
            turn,
            error: SessionError::Playback("late".into()),
        })
        .await;
    assert_eq!(h.controller.state(), SessionState::Idle);
    assert!(h.controller.last_error().is_none());
    assert!(h.notices().is_empty());
}

#[tokio::test]
async fn test_server_error_message_surfaces() {
    let mut h = harness(post(busy)).await;

    h.say("hello");
    h.controller.start().await;
    h.step_until(SessionState::AwaitingReply).await;
    h.finish_turn().await;

    assert_eq!(h.controller.state(), SessionState::Idle);
    assert_eq!(
        h.controller.last_error(),
        Some(&SessionError::Network {
            status: Some(503),
            message: "busy".into()
        })
    );
    let notices = h.notices();
    let error = notices.iter().find(|n| n.state == SessionState::Error).unwrap();
    assert_eq!(error.message, "busy");
    assert_eq!(h.sinks.lock().unwrap().live, 0);
}

#[tokio::test]
async fn test_no_speech_prompts_retry_without_request() {
    let mut h = harness(post(audio_reply)).await;

    h.say("   ");
    h.controller.start().await;
    h.finish_turn().await;

    assert_eq!(h.controller.state(), SessionState::Idle);
    assert_eq!(h.hits(), 0);
    assert_eq!(h.sinks.lock().unwrap().created, 0);
    assert!(h.messages().contains(&RETRY_CAPTURE_MESSAGE.to_string()));
    assert_eq!(
        h.controller.last_error().map(|e| e.kind()),
        Some(ErrorKind::CaptureError)
    );

    // Recoverable: the next attempt works.
    h.say("again");
    assert!(h.controller.start().await);
}

// --- Lifecycle properties ---

#[tokio::test]
async fn test_barge_in_tears_down_before_capture() {
    let mut h = harness(post(endless_audio)).await;

    h.say("first");
    h.controller.start().await;
    h.step_until(SessionState::Speaking).await;

    assert!(h.controller.start().await);
    assert_eq!(h.controller.state(), SessionState::Listening);
    {
        let log = h.sinks.lock().unwrap();
        assert_eq!(log.created, 1);
        assert_eq!(log.live, 0);
    }

    h.say("second");
    h.step_until(SessionState::Speaking).await;
    h.controller.on_cancel_requested().await;

    let log = h.sinks.lock().unwrap();
    assert_eq!(log.created, 2);
    assert_eq!(log.max_live, 1);
    assert_eq!(log.live, 0);
    assert_eq!(h.hits(), 2);
}

#[tokio::test]
async fn test_cancel_while_listening() {
    let mut h = harness(post(audio_reply)).await;

    h.controller.start().await;
    h.controller.on_cancel_requested().await;

    assert_eq!(h.controller.state(), SessionState::Idle);
    assert_eq!(h.hits(), 0);

    // A line typed after the cancel does not resurrect the old capture.
    h.say("ghost");
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.controller.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_cancel_while_awaiting_reply() {
    let mut h = harness(post(stalled)).await;

    h.say("hello");
    h.controller.start().await;
    h.step_until(SessionState::AwaitingReply).await;

    within(h.controller.on_cancel_requested()).await;

    assert_eq!(h.controller.state(), SessionState::Idle);
    assert!(h.controller.last_error().is_none());
    let log = h.sinks.lock().unwrap();
    assert_eq!(log.created, 1);
    assert_eq!(log.live, 0);
}

#[tokio::test]
async fn test_toggle_starts_and_stops_listening() {
    let mut h = harness(post(audio_reply)).await;

    h.controller.toggle().await;
    assert_eq!(h.controller.state(), SessionState::Listening);
    h.controller.toggle().await;
    assert_eq!(h.controller.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_text_reply_is_synthesized() {
    let mut h = harness_with(post(text_reply), |c| {
        c.with_synthesizer(Some(Arc::new(WordSynthesizer)))
    })
    .await;

    h.say("hello");
    h.controller.start().await;
    h.step_until(SessionState::AwaitingReply).await;
    h.finish_turn().await;

    assert!(h.controller.last_error().is_none());
    let messages = h.messages();
    assert!(messages.contains(&"Zara: hi there".to_string()));
    assert!(messages.contains(&"Zara is speaking...".to_string()));
    let log = h.sinks.lock().unwrap();
    assert_eq!(log.received[0], b"hi there");
    assert_eq!(log.appends[0], vec![3, 5]);
}

#[tokio::test]
async fn test_text_reply_without_synthesizer() {
    let mut h = harness(post(text_reply)).await;

    h.say("hello");
    h.controller.start().await;
    h.step_until(SessionState::AwaitingReply).await;
    h.finish_turn().await;

    assert_eq!(
        h.controller.last_error().map(|e| e.kind()),
        Some(ErrorKind::PlaybackUnsupported)
    );
    assert_eq!(h.sinks.lock().unwrap().live, 0);
    assert!(h.messages().contains(&"Zara: hi there".to_string()));
}

#[tokio::test]
async fn test_sink_failure_while_speaking() {
    let mut h = harness(post(audio_reply)).await;
    h.sinks.lock().unwrap().fail_at = Some(1);

    h.say("hello");
    h.controller.start().await;
    h.step_until(SessionState::Speaking).await;
    h.finish_turn().await;

    assert_eq!(h.controller.state(), SessionState::Idle);
    assert_eq!(
        h.controller.last_error(),
        Some(&SessionError::Playback("decode failed: bad".into()))
    );
    {
        let log = h.sinks.lock().unwrap();
        assert_eq!(log.live, 0);
        assert_eq!(log.finished, 0);
        assert_eq!(log.received[0], vec![100u8; 100]);
    }
    let notices = h.notices();
    assert!(notices.iter().any(|n| {
        n.state == SessionState::Error && n.message == PLAYBACK_FAILED_MESSAGE
    }));

    // Playback errors are recoverable.
    h.say("again");
    assert!(h.controller.start().await);
    assert_eq!(h.controller.state(), SessionState::Listening);
}

#[tokio::test]
async fn test_sink_quota_drops_and_continues() {
    let mut h = harness(post(audio_reply)).await;
    h.sinks.lock().unwrap().quota_at = Some(1);

    h.say("hello");
    h.controller.start().await;
    h.step_until(SessionState::Speaking).await;
    h.finish_turn().await;

    assert_eq!(h.controller.state(), SessionState::Idle);
    assert!(h.controller.last_error().is_none());
    let mut expected = vec![100u8; 100];
    expected.extend(vec![50u8; 50]);
    let log = h.sinks.lock().unwrap();
    assert_eq!(log.received[0], expected);
    assert_eq!(log.finished, 1);
    assert_eq!(log.live, 0);
}

#[tokio::test]
async fn test_empty_reply_returns_to_idle() {
    let mut h = harness(post(silent_audio)).await;

    h.say("hello");
    h.controller.start().await;
    h.step_until(SessionState::AwaitingReply).await;
    h.finish_turn().await;

    assert!(h.controller.last_error().is_none());
    assert!(!h.messages().contains(&"Zara is speaking...".to_string()));
    assert_eq!(h.sinks.lock().unwrap().finished, 1);
}

#[tokio::test]
async fn test_capture_unsupported_disables_start() {
    // Dropping every sender closes the console input.
    let (input, lines) = ConsoleSpeechInput::new();
    drop(lines);
    let sinks = Arc::new(Mutex::new(SinkLog::default()));
    let mut controller = SessionController::new(
        SpeechInputAdapter::new(Arc::new(input)),
        ChatClient::new("http://127.0.0.1:9/chat"),
        Arc::new(RecordingFactory(sinks.clone())),
    );

    assert!(controller.start().await);
    within(controller.run_until_idle()).await;

    assert!(!controller.capture_enabled());
    assert_eq!(
        controller.last_error().map(|e| e.kind()),
        Some(ErrorKind::CaptureUnsupported)
    );
    assert!(!controller.start().await);
    assert_eq!(controller.state(), SessionState::Idle);
    assert_eq!(sinks.lock().unwrap().created, 0);
}

#[tokio::test]
async fn test_visual_context_is_attached() {
    let context = VisualContext {
        is_smiling: true,
        fingers_up: 2,
    };
    let mut h = harness_with(post(audio_reply), |c| {
        c.with_visual_source(Arc::new(FixedVisualContext(context)))
            .with_assistant_name("Nova")
    })
    .await;

    assert!(h.controller.submit("look at me").await);
    h.finish_turn().await;

    let bodies = h.endpoint.bodies.lock().unwrap();
    assert_eq!(bodies[0]["message"], "look at me");
    assert_eq!(bodies[0]["visualContext"]["isSmiling"], true);
    assert_eq!(bodies[0]["visualContext"]["fingersUp"], 2);
    drop(bodies);
    assert!(h.messages().contains(&"Nova is speaking...".to_string()));
}

#[tokio::test]
async fn test_run_loop_processes_commands() {
    let mut h = harness(post(audio_reply)).await;
    let (commands, rx) = mpsc::unbounded_channel();
    let sinks = h.sinks.clone();
    let mut notices = h.controller.subscribe();

    commands.send(SessionCommand::Submit("hi".into())).unwrap();
    let driver = async {
        while let Ok(notice) = notices.recv().await {
            let turn_over = sinks.lock().unwrap().finished == 1;
            if notice.message == IDLE_PROMPT && turn_over {
                commands.send(SessionCommand::Shutdown).unwrap();
                break;
            }
        }
    };
    let controller = &mut h.controller;
    within(async { tokio::join!(controller.run(rx), driver) }).await;

    assert_eq!(h.controller.state(), SessionState::Idle);
    assert_eq!(h.hits(), 1);
}
