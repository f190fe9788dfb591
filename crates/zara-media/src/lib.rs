//! Audio in and out for a voice session: speech capture, progressive reply
//! playback, speech synthesis and visual context.

pub mod player;
pub mod sink;
pub mod speech;
pub mod stt;
pub mod tts_stream;
pub mod vad;
pub mod visual;

pub use player::{AudioStreamPlayer, ChunkQueue, PlayerEvent};
pub use sink::{AudioSink, SinkError, SinkFactory, SinkState, sink_factory_from_config};
pub use speech::{
    CaptureError, CaptureHandle, ConsoleSpeechInput, RecordingSpeechInput, SpeechInput,
    SpeechInputAdapter, speech_input_from_config,
};
pub use tts_stream::{SynthError, Synthesizer, synthesizer_from_config};
pub use visual::{VisualContextSource, visual_source_from_config};
