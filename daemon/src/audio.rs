//! Audio chunks and sample conversion.
//!
//! All audio is 16 kHz mono; clients resample before sending.

use std::time::Instant;

pub use livescribe_common::protocol::SAMPLE_RATE;

/// One unit of audio submitted by the producer. Immutable once created.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Vec<i16>,
    /// When the chunk reached the session.
    pub arrival_time: Instant,
    /// Position of the first sample in the stream, in seconds since the last reset.
    pub stream_offset_seconds: f64,
    /// Session epoch the chunk belongs to; advanced by every reset.
    pub(crate) epoch: u64,
}

impl AudioChunk {
    pub fn new(samples: Vec<i16>, stream_offset_seconds: f64) -> Self {
        Self {
            samples,
            arrival_time: Instant::now(),
            stream_offset_seconds,
            epoch: 0,
        }
    }

    pub(crate) fn with_epoch(mut self, epoch: u64) -> Self {
        self.epoch = epoch;
        self
    }

    /// Duration of the chunk in seconds.
    pub fn duration_secs(&self) -> f64 {
        samples_to_seconds(self.samples.len())
    }
}

/// Convert a sample count at [`SAMPLE_RATE`] to seconds.
pub fn samples_to_seconds(samples: usize) -> f64 {
    samples as f64 / SAMPLE_RATE as f64
}

/// Convert 16-bit PCM to f32 in [-1, 1].
pub fn pcm_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Largest absolute sample value.
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
}

/// Scale `samples` in place so the peak magnitude is 1.0.
///
/// Silence (peak of zero) is left untouched. Returns the peak before scaling.
pub fn peak_normalize(samples: &mut [f32]) -> f32 {
    let peak = peak(samples);
    if peak > 0.0 {
        for sample in samples.iter_mut() {
            *sample /= peak;
        }
    }
    peak
}

/// Convert 16-bit PCM to f32 and peak-normalize the chunk.
///
/// Also returns the peak before scaling; zero means the chunk is silent.
pub fn normalize_pcm(samples: &[i16]) -> (Vec<f32>, f32) {
    let mut audio = pcm_to_f32(samples);
    let peak = peak_normalize(&mut audio);
    (audio, peak)
}

#[cfg(test)]
#[path = "audio_test.rs"]
mod tests;
