//! Voice-over audio.
//!
//! The bridge does not decode or play audio. It requests voice-over frames
//! from the host endpoint and hands raw PCM to an [`AudioSink`].
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `tts` | [`TtsPlayer`] and [`TtsVoice`] |

// ============================================================================
// Submodules
// ============================================================================

/// Text-to-speech player.
pub mod tts;

// ============================================================================
// Re-exports
// ============================================================================

pub use tts::{TtsPlayer, TtsVoice};

// ============================================================================
// Constants
// ============================================================================

/// Sample rate of voice-over audio.
pub const SAMPLE_RATE: u32 = 44_100;

/// Divisor mapping `i16` samples onto `[-1.0, 1.0)`.
const NORMALIZATION_FACTOR: f32 = 32_768.0;

// ============================================================================
// PcmChunk
// ============================================================================

/// Mono signed 16-bit PCM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmChunk {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl PcmChunk {
    /// Decodes little-endian `i16` samples. A trailing odd byte is dropped.
    #[must_use]
    pub fn from_le_bytes(bytes: &[u8]) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        Self {
            samples,
            sample_rate: SAMPLE_RATE,
        }
    }

    /// Returns the samples scaled to `[-1.0, 1.0)`.
    #[must_use]
    pub fn normalized(&self) -> Vec<f32> {
        self.samples
            .iter()
            .map(|&sample| f32::from(sample) / NORMALIZATION_FACTOR)
            .collect()
    }

    /// Returns the playback duration, zero when the sample rate is zero.
    #[must_use]
    pub fn duration(&self) -> std::time::Duration {
        if self.sample_rate == 0 {
            return std::time::Duration::ZERO;
        }
        std::time::Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }
}

// ============================================================================
// AudioSink
// ============================================================================

/// Consumer of voice-over audio, implemented by the embedding application.
pub trait AudioSink: Send + Sync {
    /// Queues a chunk for playback, after every chunk pushed before it.
    fn push(&self, chunk: PcmChunk);

    /// Stops playback and drops queued chunks.
    fn stop(&self);
}

// ============================================================================
// Tests
// ============================================================================
