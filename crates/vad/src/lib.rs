//! VAD gate: turns per-frame detector confidence into speech edges.
//!
//! The detector itself (Silero-style) lives outside this crate; the gate
//! consumes `(frame, confidence)` pairs and applies hysteresis:
//!
//! - entry debounce: `min_speech_frames` consecutive frames above the
//!   positive threshold before `speech-start` fires
//! - exit redemption: `redemption_frames` frames below the negative
//!   threshold before `speech-end` fires (brief pauses don't end the turn)
//! - pre-speech padding: the last `pre_speech_pad_frames` frames before the
//!   trigger are prepended to the capture so first syllables are not clipped

mod scorer;

pub use scorer::{EnergyScorer, VadScorer};

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

use llmrtc_domain::audio::{pcm_duration_ms, UPSTREAM_SAMPLE_RATE_HZ};
use llmrtc_domain::config::VadConfig;

/// An edge event emitted by the gate.
#[derive(Debug, Clone)]
pub enum VadEvent {
    SpeechStart,
    /// The utterance ended; carries the captured audio (pre-speech pad
    /// included) and its PCM duration.
    SpeechEnd { audio: Bytes, duration_ms: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    /// Below the positive threshold.
    Silence,
    /// Above the positive threshold, debouncing toward speech-start.
    Pending,
    /// Speech asserted.
    Speaking,
}

/// Per-connection gate. Not shared: one gate per audio stream.
pub struct VadGate {
    config: VadConfig,
    sample_rate_hz: u32,
    state: GateState,
    /// Frames above threshold while Pending.
    speech_frames: usize,
    /// Frames below the negative threshold while Speaking.
    silence_frames: usize,
    /// Ring of recent frames, retained for pre-speech padding.
    pad_ring: VecDeque<Bytes>,
    /// Frames buffered while Pending (they belong to the utterance if the
    /// debounce completes).
    pending_frames: Vec<Bytes>,
    /// Captured utterance audio while Speaking.
    captured: BytesMut,
}

impl VadGate {
    pub fn new(config: VadConfig) -> Self {
        Self::with_sample_rate(config, UPSTREAM_SAMPLE_RATE_HZ)
    }

    pub fn with_sample_rate(config: VadConfig, sample_rate_hz: u32) -> Self {
        Self {
            config,
            sample_rate_hz,
            state: GateState::Silence,
            speech_frames: 0,
            silence_frames: 0,
            pad_ring: VecDeque::new(),
            pending_frames: Vec::new(),
            captured: BytesMut::new(),
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.state == GateState::Speaking
    }

    /// Feed one PCM frame with its detector confidence. Returns an edge
    /// event when one fires.
    pub fn process(&mut self, frame: Bytes, confidence: f32) -> Option<VadEvent> {
        match self.state {
            GateState::Silence => {
                if confidence >= self.config.positive_threshold {
                    self.state = GateState::Pending;
                    self.speech_frames = 1;
                    self.pending_frames.clear();
                    self.pending_frames.push(frame);
                    return self.maybe_assert_start();
                }
                self.push_pad(frame);
                None
            }
            GateState::Pending => {
                if confidence >= self.config.positive_threshold {
                    self.speech_frames += 1;
                    self.pending_frames.push(frame);
                    return self.maybe_assert_start();
                }
                // Debounce failed: the burst was noise. Frames flow back
                // into the pad ring so nothing is lost if speech follows.
                self.state = GateState::Silence;
                self.speech_frames = 0;
                for pending in self.pending_frames.drain(..) {
                    push_pad_ring(
                        &mut self.pad_ring,
                        self.config.pre_speech_pad_frames,
                        pending,
                    );
                }
                self.push_pad(frame);
                None
            }
            GateState::Speaking => {
                self.captured.extend_from_slice(&frame);
                if confidence < self.config.negative_threshold {
                    self.silence_frames += 1;
                    if self.silence_frames >= self.config.redemption_frames {
                        return Some(self.assert_end());
                    }
                } else {
                    self.silence_frames = 0;
                }
                None
            }
        }
    }

    /// Flush an in-progress utterance (transport closed mid-speech).
    pub fn flush(&mut self) -> Option<VadEvent> {
        if self.state == GateState::Speaking && !self.captured.is_empty() {
            return Some(self.assert_end());
        }
        self.reset();
        None
    }

    fn maybe_assert_start(&mut self) -> Option<VadEvent> {
        if self.speech_frames < self.config.min_speech_frames.max(1) {
            return None;
        }
        self.state = GateState::Speaking;
        self.silence_frames = 0;
        self.captured.clear();
        // Pre-speech pad first, then the debounced frames.
        for frame in self.pad_ring.drain(..) {
            self.captured.extend_from_slice(&frame);
        }
        for frame in self.pending_frames.drain(..) {
            self.captured.extend_from_slice(&frame);
        }
        tracing::debug!(bytes = self.captured.len(), "speech start");
        Some(VadEvent::SpeechStart)
    }

    fn assert_end(&mut self) -> VadEvent {
        let audio = std::mem::take(&mut self.captured).freeze();
        let duration_ms = pcm_duration_ms(audio.len(), self.sample_rate_hz);
        tracing::debug!(bytes = audio.len(), duration_ms, "speech end");
        self.reset();
        VadEvent::SpeechEnd { audio, duration_ms }
    }

    fn reset(&mut self) {
        self.state = GateState::Silence;
        self.speech_frames = 0;
        self.silence_frames = 0;
        self.pad_ring.clear();
        self.pending_frames.clear();
        self.captured = BytesMut::new();
    }

    fn push_pad(&mut self, frame: Bytes) {
        push_pad_ring(&mut self.pad_ring, self.config.pre_speech_pad_frames, frame);
    }
}

fn push_pad_ring(ring: &mut VecDeque<Bytes>, cap: usize, frame: Bytes) {
    if cap == 0 {
        return;
    }
    if ring.len() == cap {
        ring.pop_front();
    }
    ring.push_back(frame);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
