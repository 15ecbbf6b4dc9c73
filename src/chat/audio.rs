//! Audio playback seam.
//!
//! The pipeline forwards streamed audio segments here; playback itself is
//! out of scope.

use std::sync::{Mutex, PoisonError};

/// One streamed audio segment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AudioChunk {
    /// Base64 payload.
    pub audio: String,
    /// Container/codec name (`mp3`, `opus`, ...).
    pub audio_format: String,
    /// Position in the response's audio stream.
    pub chunk_index: u32,
}

/// Audio player collaborator.
pub trait AudioSink: Send + Sync {
    /// Queue a segment.
    fn add_chunk(&self, chunk: AudioChunk);
    /// Drop queued segments before a new response starts.
    fn reset(&self);
    /// Stop playback immediately.
    fn stop(&self);
}

/// Sink that discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopAudioSink;

impl AudioSink for NoopAudioSink {
    fn add_chunk(&self, _chunk: AudioChunk) {}
    fn reset(&self) {}
    fn stop(&self) {}
}

/// Events observed by a [`RecordingAudioSink`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AudioEvent {
    /// `add_chunk` was called.
    Chunk(AudioChunk),
    /// `reset` was called.
    Reset,
    /// `stop` was called.
    Stop,
}

/// Sink that records every call, for tests and diagnostics.
#[derive(Debug, Default)]
pub struct RecordingAudioSink {
    events: Mutex<Vec<AudioEvent>>,
}

impl RecordingAudioSink {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<AudioEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Recorded segments only.
    #[must_use]
    pub fn chunks(&self) -> Vec<AudioChunk> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                AudioEvent::Chunk(chunk) => Some(chunk),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: AudioEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl AudioSink for RecordingAudioSink {
    fn add_chunk(&self, chunk: AudioChunk) {
        self.record(AudioEvent::Chunk(chunk));
    }

    fn reset(&self) {
        self.record(AudioEvent::Reset);
    }

    fn stop(&self) {
        self.record(AudioEvent::Stop);
    }
}
