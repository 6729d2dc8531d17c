//! Engine configuration.
//!
//! All tunables live in one immutable value handed to the engine at
//! construction. Defaults reproduce the stock pipeline; `validate` rejects
//! combinations the pipeline cannot honor.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Spectrogram analysis parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Canonical sample rate; input at other rates is resampled.
    pub sample_rate: u32,
    /// STFT window size in samples.
    pub fft_size: usize,
    /// Samples between successive frames.
    pub hop_length: usize,
    /// Lower clamp for log-magnitude values, in dB.
    pub db_floor: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 22_050,
            fft_size: 2048,
            hop_length: 512,
            db_floor: -80.0,
        }
    }
}

/// Peak extraction parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeakConfig {
    /// Half-width of the local-maximum neighborhood along frequency, in bins.
    pub freq_neighborhood: usize,
    /// Half-width of the local-maximum neighborhood along time, in frames.
    pub time_neighborhood: usize,
    /// Margin above the per-frame mean, in standard deviations.
    pub threshold_sigma: f32,
    /// Global cap on retained peaks, per second of audio.
    pub peaks_per_second_cap: usize,
}

impl Default for PeakConfig {
    fn default() -> Self {
        Self {
            freq_neighborhood: 10,
            time_neighborhood: 10,
            threshold_sigma: 0.5,
            peaks_per_second_cap: 30,
        }
    }
}

/// Constellation hashing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintConfig {
    /// Maximum targets paired with each anchor.
    pub fan_value: usize,
    /// Forward time window `(min_dt, max_dt)` for anchor-target pairs, in frames.
    pub target_zone: (u32, u32),
    /// Bit widths `(anchor_freq, target_freq, delta_t)` of the packed hash.
    pub hash_bits: (u32, u32, u32),
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            fan_value: 5,
            target_zone: (1, 20),
            hash_bits: (12, 12, 8),
        }
    }
}

/// Match scoring and acceptance parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Minimum histogram-peak score for a candidate to be reported.
    pub score_min: u32,
    /// Required ratio between the best and second-best score.
    pub margin: f32,
    /// Offset histogram bin width, in frames.
    pub offset_quantization: u32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            score_min: 5,
            margin: 1.5,
            offset_quantization: 1,
        }
    }
}

/// Index store parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Fingerprint rows per insert statement during ingest.
    pub batch_size: usize,
    /// SQLite database location. `None` selects the in-memory store.
    pub storage_path: Option<PathBuf>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            storage_path: None,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub audio: AudioConfig,
    pub peaks: PeakConfig,
    pub fingerprint: FingerprintConfig,
    pub matcher: MatcherConfig,
    pub index: IndexConfig,
    /// Wall-clock budget for a single identification, in seconds.
    pub identify_budget_secs: f64,
    /// Longest query excerpt processed during identification, in seconds.
    pub max_query_secs: f64,
}

impl EngineConfig {
    /// Check internal consistency. Called by the engine at construction.
    pub fn validate(&self) -> Result<()> {
        if self.audio.fft_size == 0 || !self.audio.fft_size.is_power_of_two() {
            return Err(Error::InvalidInput(format!(
                "fft_size must be a nonzero power of two, got {}",
                self.audio.fft_size
            )));
        }
        if self.audio.hop_length == 0 || self.audio.hop_length > self.audio.fft_size {
            return Err(Error::InvalidInput(format!(
                "hop_length must be in 1..=fft_size, got {}",
                self.audio.hop_length
            )));
        }
        if self.audio.db_floor >= 0.0 {
            return Err(Error::InvalidInput(
                "db_floor must be negative".to_string(),
            ));
        }
        if self.peaks.peaks_per_second_cap == 0 {
            return Err(Error::InvalidInput(
                "peaks_per_second_cap must be at least 1".to_string(),
            ));
        }
        let (t_min, t_max) = self.fingerprint.target_zone;
        if t_min == 0 || t_min > t_max {
            return Err(Error::InvalidInput(format!(
                "target_zone must satisfy 1 <= min <= max, got ({t_min}, {t_max})"
            )));
        }
        let (fa, fb, dt) = self.fingerprint.hash_bits;
        if fa == 0 || fb == 0 || dt == 0 || fa + fb + dt > 32 {
            return Err(Error::InvalidInput(format!(
                "hash_bits must be nonzero and pack into 32 bits, got ({fa}, {fb}, {dt})"
            )));
        }
        if t_max >= (1u32 << dt) {
            return Err(Error::InvalidInput(format!(
                "target_zone max {t_max} does not fit in {dt} delta-t bits"
            )));
        }
        if self.matcher.margin < 1.0 {
            return Err(Error::InvalidInput(
                "matcher margin must be at least 1.0".to_string(),
            ));
        }
        if self.matcher.offset_quantization == 0 {
            return Err(Error::InvalidInput(
                "offset_quantization must be at least 1 frame".to_string(),
            ));
        }
        if self.index.batch_size == 0 {
            return Err(Error::InvalidInput(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.identify_budget_secs <= 0.0 {
            return Err(Error::InvalidInput(
                "identify_budget_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Seconds of audio represented by one spectrogram frame.
    pub fn frame_secs(&self) -> f64 {
        self.audio.hop_length as f64 / self.audio.sample_rate as f64
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            peaks: PeakConfig::default(),
            fingerprint: FingerprintConfig::default(),
            matcher: MatcherConfig::default(),
            index: IndexConfig::default(),
            identify_budget_secs: 30.0,
            max_query_secs: 30.0,
        }
    }
}
