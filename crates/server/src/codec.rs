//! Frame Codec (C2): turns raw inbound WebSocket binary frames into
//! `AudioFrame`s, smooths arrival jitter through a bounded ring buffer, and
//! derives a voice-activity hint from short-term energy. Oversized frames
//! are dropped with a warning rather than decoded, per the gateway's frame
//! size invariant; a full jitter buffer drops its oldest frame rather than
//! ever blocking the read loop.

use std::collections::VecDeque;

use voice_agent_config::AudioConfig;
use voice_agent_core::audio::{AudioFrame, Channels, SampleRate};

/// Sample rates the gateway's `ready` handshake advertises and `FrameCodec`
/// will decode inbound PCM16 frames at; anything else falls back to
/// [`SampleRate::Hz16000`].
pub const SUPPORTED_SAMPLE_RATES_HZ: [u32; 3] = [48000, 44100, 16000];

pub fn negotiate_sample_rate(requested_hz: Option<u32>) -> SampleRate {
    match requested_hz {
        Some(48000) => SampleRate::Hz48000,
        Some(44100) => SampleRate::Hz44100,
        Some(16000) => SampleRate::Hz16000,
        _ => SampleRate::Hz16000,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VadHint {
    pub active: bool,
    pub level: f32,
}

/// Per-session ring buffer absorbing arrival jitter, sized in frames by
/// `AudioConfig::jitter_buffer_frames`.
pub struct JitterBuffer {
    capacity: usize,
    frames: VecDeque<AudioFrame>,
    dropped: u64,
}

impl JitterBuffer {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), frames: VecDeque::new(), dropped: 0 }
    }

    /// Pushes a frame, preserving arrival order; drops the oldest frame
    /// under backpressure instead of growing unbounded.
    pub fn push(&mut self, frame: AudioFrame) {
        if self.frames.len() >= self.capacity {
            self.frames.pop_front();
            self.dropped += 1;
            tracing::warn!(dropped_total = self.dropped, "jitter buffer full, dropping oldest frame");
        }
        self.frames.push_back(frame);
    }

    pub fn pop(&mut self) -> Option<AudioFrame> {
        self.frames.pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Classifies and decodes one inbound binary payload per call. Input is
/// assumed PCM16 little-endian mono at the session's negotiated sample rate
/// (one of [`SUPPORTED_SAMPLE_RATES_HZ`]); Opus is not supported — the
/// `ready` handshake only ever advertises `pcm16`. Every decoded frame passes
/// through a per-session [`JitterBuffer`] before being handed back, so a
/// burst of arrivals is smoothed and, under sustained backpressure, the
/// oldest buffered frame is dropped rather than ever blocking the caller.
pub struct FrameCodec {
    config: AudioConfig,
    sample_rate: SampleRate,
    sequence: u64,
    jitter: JitterBuffer,
}

impl FrameCodec {
    pub fn new(config: AudioConfig, sample_rate: SampleRate) -> Self {
        let jitter = JitterBuffer::new(config.jitter_buffer_frames);
        Self { config, sample_rate, sequence: 0, jitter }
    }

    /// Decodes PCM16 bytes, pushes the result through the jitter buffer, and
    /// returns the oldest buffered frame with a VAD hint computed from it.
    /// Returns `None` if the inbound frame was oversized and dropped before
    /// ever reaching the buffer.
    pub fn decode(&mut self, bytes: &[u8]) -> Option<(AudioFrame, VadHint)> {
        if bytes.len() > self.config.max_frame_bytes {
            tracing::warn!(
                len = bytes.len(),
                max = self.config.max_frame_bytes,
                "dropping oversized audio frame"
            );
            return None;
        }

        let seq = self.sequence;
        self.sequence += 1;
        let mut frame = AudioFrame::from_pcm16(bytes, self.sample_rate, Channels::Mono, seq);
        let hint = self.vad_hint(&frame);
        frame.vad_probability = Some(if hint.active { 1.0 } else { 0.0 });
        frame.is_speech = hint.active;

        self.jitter.push(frame);
        let buffered = self.jitter.pop()?;
        let hint = if buffered.sequence == seq { hint } else { self.vad_hint(&buffered) };
        Some((buffered, hint))
    }

    /// Total frames dropped by the jitter buffer under sustained backpressure.
    pub fn dropped_frames(&self) -> u64 {
        self.jitter.dropped()
    }

    fn vad_hint(&self, frame: &AudioFrame) -> VadHint {
        VadHint { active: !frame.is_likely_silence(self.config.vad_energy_floor_db), level: frame.energy_db }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AudioConfig {
        AudioConfig {
            frame_ms: 20,
            max_frame_bytes: 4096,
            jitter_buffer_frames: 10,
            vad_energy_floor_db: -50.0,
        }
    }

    fn silence_bytes(samples: usize) -> Vec<u8> {
        vec![0u8; samples * 2]
    }

    fn tone_bytes(samples: usize) -> Vec<u8> {
        (0..samples).flat_map(|i| if i % 2 == 0 { 20000i16 } else { -20000i16 }.to_le_bytes()).collect()
    }

    #[test]
    fn oversized_frame_is_dropped() {
        let mut codec = FrameCodec::new(AudioConfig { max_frame_bytes: 8, ..config() }, SampleRate::Hz16000);
        assert!(codec.decode(&silence_bytes(100)).is_none());
    }

    #[test]
    fn silence_yields_inactive_vad_hint() {
        let mut codec = FrameCodec::new(config(), SampleRate::Hz16000);
        let (_, hint) = codec.decode(&silence_bytes(320)).unwrap();
        assert!(!hint.active);
    }

    #[test]
    fn loud_tone_yields_active_vad_hint() {
        let mut codec = FrameCodec::new(config(), SampleRate::Hz16000);
        let (_, hint) = codec.decode(&tone_bytes(320)).unwrap();
        assert!(hint.active);
    }

    #[test]
    fn jitter_buffer_drops_oldest_under_pressure() {
        let mut buffer = JitterBuffer::new(2);
        let mut codec = FrameCodec::new(config(), SampleRate::Hz16000);
        for _ in 0..3 {
            let (frame, _) = codec.decode(&silence_bytes(320)).unwrap();
            buffer.push(frame);
        }
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.dropped(), 1);
    }

    #[test]
    fn codec_preserves_arrival_order_through_its_own_jitter_buffer() {
        let mut codec = FrameCodec::new(config(), SampleRate::Hz16000);
        let (first, _) = codec.decode(&silence_bytes(320)).unwrap();
        let (second, _) = codec.decode(&silence_bytes(320)).unwrap();
        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
        assert_eq!(codec.dropped_frames(), 0);
    }
}
