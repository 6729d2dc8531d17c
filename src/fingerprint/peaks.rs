//! Spectral peak extraction.
//!
//! A bin survives when it is the maximum of its time-frequency
//! neighborhood and clears a per-frame adaptive threshold. Sparse local
//! maxima are what remains of a signal after additive noise and speaker
//! coloration, which is why the downstream hashes match across recordings.

use crate::config::PeakConfig;
use crate::fingerprint::spectrogram::Spectrogram;
use rayon::prelude::*;

/// A locally-maximal spectrogram bin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub freq_bin: u16,
    pub frame: u32,
    pub magnitude: f32,
}

/// Peak extractor bound to one [`PeakConfig`].
#[derive(Debug, Clone)]
pub struct PeakExtractor {
    config: PeakConfig,
    db_floor: f32,
}

impl PeakExtractor {
    pub fn new(config: PeakConfig, db_floor: f32) -> Self {
        Self { config, db_floor }
    }

    /// Extract peaks, ordered by frame ascending then frequency bin
    /// ascending.
    pub fn extract(&self, spectrogram: &Spectrogram) -> Vec<Peak> {
        let frames = &spectrogram.frames;
        if frames.is_empty() {
            return Vec::new();
        }

        let thresholds: Vec<f32> = frames
            .iter()
            .map(|frame| self.adaptive_threshold(frame))
            .collect();

        let mut peaks: Vec<Peak> = frames
            .par_iter()
            .enumerate()
            .flat_map_iter(|(t, frame)| {
                let mut frame_peaks = Vec::new();
                for (f, &value) in frame.iter().enumerate() {
                    // Bins clamped to the floor are not landmarks; without
                    // this, flat floor regions tie-break into a lattice of
                    // spurious peaks.
                    if value <= self.db_floor || value < thresholds[t] {
                        continue;
                    }
                    if self.is_neighborhood_max(frames, f, t, value) {
                        frame_peaks.push(Peak {
                            freq_bin: f as u16,
                            frame: t as u32,
                            magnitude: value,
                        });
                    }
                }
                frame_peaks
            })
            .collect();

        self.apply_cap(&mut peaks, frames.len() as f64 * spectrogram.frame_secs);

        peaks.sort_by(|a, b| a.frame.cmp(&b.frame).then(a.freq_bin.cmp(&b.freq_bin)));
        peaks
    }

    /// Per-frame mean plus a standard-deviation margin. Spectrogram values
    /// are already clamped to the dB floor, so the result never drops
    /// below it.
    fn adaptive_threshold(&self, frame: &[f32]) -> f32 {
        let n = frame.len() as f32;
        let mean = frame.iter().sum::<f32>() / n;
        let variance = frame.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
        let threshold = mean + self.config.threshold_sigma * variance.sqrt();
        threshold.max(self.db_floor)
    }

    /// True when no neighbor is strictly larger and no equal-valued
    /// neighbor precedes `(f, t)` in lexicographic order. Exactly one bin
    /// survives per tie group.
    fn is_neighborhood_max(&self, frames: &[Vec<f32>], f: usize, t: usize, value: f32) -> bool {
        let f_nb = self.config.freq_neighborhood as isize;
        let t_nb = self.config.time_neighborhood as isize;
        let num_frames = frames.len() as isize;
        let num_bins = frames[0].len() as isize;

        for df in -f_nb..=f_nb {
            let nf = f as isize + df;
            if nf < 0 || nf >= num_bins {
                continue;
            }
            for dt in -t_nb..=t_nb {
                let nt = t as isize + dt;
                if nt < 0 || nt >= num_frames || (df == 0 && dt == 0) {
                    continue;
                }
                let neighbor = frames[nt as usize][nf as usize];
                if neighbor > value {
                    return false;
                }
                if neighbor == value && (nf, nt) < (f as isize, t as isize) {
                    return false;
                }
            }
        }
        true
    }

    /// Keep the globally largest peaks when the per-second cap is
    /// exceeded.
    fn apply_cap(&self, peaks: &mut Vec<Peak>, duration_secs: f64) {
        let cap = (self.config.peaks_per_second_cap as f64 * duration_secs).ceil() as usize;
        let cap = cap.max(1);
        if peaks.len() <= cap {
            return;
        }
        peaks.sort_by(|a, b| {
            b.magnitude
                .total_cmp(&a.magnitude)
                .then(a.frame.cmp(&b.frame))
                .then(a.freq_bin.cmp(&b.freq_bin))
        });
        peaks.truncate(cap);
    }
}
