//! Constellation hashing.
//!
//! Pairs each anchor peak with nearby forward targets and packs
//! `(anchor_freq, target_freq, delta_t)` into a fixed-width hash. Each
//! anchor fans out to several independent hashes, so losing individual
//! peaks only degrades recall.

use crate::config::FingerprintConfig;
use crate::error::{Error, Result};
use crate::fingerprint::peaks::Peak;
use serde::{Deserialize, Serialize};

/// One fingerprint: a packed anchor-target hash and the anchor frame it
/// was emitted at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Landmark {
    pub hash: u32,
    pub anchor_frame: u32,
}

/// Bit layout of the packed hash. Injective over its declared ranges;
/// peaks outside a range are skipped, never clamped, so two distinct
/// peak pairs can never alias.
#[derive(Debug, Clone, Copy)]
pub struct HashLayout {
    anchor_bits: u32,
    target_bits: u32,
    delta_bits: u32,
}

impl HashLayout {
    pub fn new(bits: (u32, u32, u32)) -> Result<Self> {
        let (anchor_bits, target_bits, delta_bits) = bits;
        if anchor_bits == 0 || target_bits == 0 || delta_bits == 0 {
            return Err(Error::InvalidInput(
                "hash bit widths must be nonzero".to_string(),
            ));
        }
        if anchor_bits + target_bits + delta_bits > 32 {
            return Err(Error::InvalidInput(format!(
                "hash bit widths ({anchor_bits}, {target_bits}, {delta_bits}) exceed 32 bits"
            )));
        }
        Ok(Self {
            anchor_bits,
            target_bits,
            delta_bits,
        })
    }

    /// Pack a peak pair. `None` when a field exceeds its range.
    pub fn pack(&self, f_anchor: u32, f_target: u32, delta_t: u32) -> Option<u32> {
        if f_anchor >= (1 << self.anchor_bits)
            || f_target >= (1 << self.target_bits)
            || delta_t >= (1 << self.delta_bits)
        {
            return None;
        }
        Some(
            (f_anchor << (self.target_bits + self.delta_bits))
                | (f_target << self.delta_bits)
                | delta_t,
        )
    }

    #[cfg(test)]
    fn unpack(&self, hash: u32) -> (u32, u32, u32) {
        let delta_mask = (1 << self.delta_bits) - 1;
        let target_mask = (1 << self.target_bits) - 1;
        (
            hash >> (self.target_bits + self.delta_bits),
            (hash >> self.delta_bits) & target_mask,
            hash & delta_mask,
        )
    }
}

/// Fingerprint generator bound to one [`FingerprintConfig`].
#[derive(Debug, Clone)]
pub struct FingerprintGenerator {
    config: FingerprintConfig,
    layout: HashLayout,
}

impl FingerprintGenerator {
    pub fn new(config: FingerprintConfig) -> Result<Self> {
        let layout = HashLayout::new(config.hash_bits)?;
        Ok(Self { config, layout })
    }

    /// Generate landmarks from a peak list sorted by `(frame, freq_bin)`.
    ///
    /// For each anchor, target-zone peaks are ranked by ascending time
    /// difference, then ascending frequency distance, and the first
    /// `fan_value` are paired with it.
    pub fn generate(&self, peaks: &[Peak]) -> Vec<Landmark> {
        let (t_min, t_max) = self.config.target_zone;
        let mut landmarks = Vec::new();

        for (i, anchor) in peaks.iter().enumerate() {
            let mut targets: Vec<&Peak> = peaks[i + 1..]
                .iter()
                .take_while(|p| p.frame <= anchor.frame + t_max)
                .filter(|p| p.frame >= anchor.frame + t_min)
                .collect();

            targets.sort_by_key(|p| {
                let df = (p.freq_bin as i32 - anchor.freq_bin as i32).unsigned_abs();
                (p.frame - anchor.frame, df, p.freq_bin)
            });

            for target in targets.into_iter().take(self.config.fan_value) {
                let delta_t = target.frame - anchor.frame;
                if let Some(hash) = self.layout.pack(
                    anchor.freq_bin as u32,
                    target.freq_bin as u32,
                    delta_t,
                ) {
                    landmarks.push(Landmark {
                        hash,
                        anchor_frame: anchor.frame,
                    });
                }
            }
        }

        landmarks
    }
}
