//! Energy-based end-of-utterance detection for recorded speech.

/// Samples per 20 ms frame at 16 kHz.
pub const FRAME_SAMPLES: usize = 320;

/// Duration of one frame.
pub const FRAME_MS: u64 = 20;

const DEFAULT_THRESHOLD: f64 = 300.0;
const DEFAULT_SILENCE_MS: u64 = 800;

/// Transition reported by [`SpeechDetector::push_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceEvent {
    SpeechStarted,
    SpeechEnded,
}

/// Tracks whether the speaker is talking, one PCM frame at a time.
pub struct SpeechDetector {
    threshold: f64,
    hangover_frames: usize,
    active: bool,
    silent_frames: usize,
    heard_speech: bool,
}

impl SpeechDetector {
    /// `hangover_frames` consecutive quiet frames end an utterance.
    pub fn new(threshold: f64, hangover_frames: usize) -> Self {
        Self {
            threshold,
            hangover_frames: hangover_frames.max(1),
            active: false,
            silent_frames: 0,
            heard_speech: false,
        }
    }

    /// Build from the `speech` config values, falling back to defaults.
    pub fn from_settings(threshold: Option<f64>, silence_ms: Option<u64>) -> Self {
        let silence_ms = silence_ms.unwrap_or(DEFAULT_SILENCE_MS);
        Self::new(
            threshold.unwrap_or(DEFAULT_THRESHOLD),
            silence_ms.div_ceil(FRAME_MS) as usize,
        )
    }

    pub fn rms(samples: &[i16]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
        (sum / samples.len() as f64).sqrt()
    }

    pub fn push_frame(&mut self, pcm: &[i16]) -> Option<VoiceEvent> {
        if Self::rms(pcm) > self.threshold {
            self.silent_frames = 0;
            if !self.active {
                self.active = true;
                self.heard_speech = true;
                return Some(VoiceEvent::SpeechStarted);
            }
            return None;
        }

        if self.active {
            self.silent_frames += 1;
            if self.silent_frames >= self.hangover_frames {
                self.active = false;
                self.silent_frames = 0;
                return Some(VoiceEvent::SpeechEnded);
            }
        }
        None
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Any frame so far crossed the threshold.
    pub fn heard_speech(&self) -> bool {
        self.heard_speech
    }
}

/// Decode little-endian PCM16 bytes into samples. A trailing odd byte is ignored.
pub fn samples_from_le_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}
