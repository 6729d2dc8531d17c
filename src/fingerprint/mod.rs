//! Fingerprint pipeline glue.
//!
//! Wires spectrogram analysis, peak extraction and constellation hashing
//! together to turn a PCM buffer into the landmark sequence the index
//! and matcher operate on.

use crate::config::EngineConfig;
use crate::decode::PcmAudio;
use crate::error::Result;

pub mod hashing;
pub mod peaks;
pub mod spectrogram;

pub use hashing::{FingerprintGenerator, HashLayout, Landmark};
pub use peaks::{Peak, PeakExtractor};
pub use spectrogram::{Spectrogram, SpectrogramProcessor};

/// Result of fingerprinting one PCM buffer.
#[derive(Debug, Clone)]
pub struct FingerprintOutput {
    pub landmarks: Vec<Landmark>,
    /// Spectrogram frames covered by the input; anchor frames are always
    /// below this.
    pub duration_frames: u32,
    pub peak_count: usize,
}

/// Run the end-to-end fingerprint pipeline on a PCM buffer.
pub fn fingerprint_pcm(config: &EngineConfig, pcm: &PcmAudio) -> Result<FingerprintOutput> {
    let spectrogram = SpectrogramProcessor::new(config.audio.clone()).process(
        &pcm.samples,
        pcm.sample_rate,
        pcm.channels,
    )?;
    let peaks =
        PeakExtractor::new(config.peaks.clone(), config.audio.db_floor).extract(&spectrogram);
    let landmarks = FingerprintGenerator::new(config.fingerprint.clone())?.generate(&peaks);

    Ok(FingerprintOutput {
        landmarks,
        duration_frames: spectrogram.num_frames() as u32,
        peak_count: peaks.len(),
    })
}
