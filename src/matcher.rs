//! Offset-histogram matching.
//!
//! True matches line up: every correct hash coincidence between a query
//! and its source track shares the same reference-minus-query time
//! offset, while chance collisions scatter. Voting offsets into a
//! per-track histogram and taking the tallest bin isolates the aligned
//! signal.

use crate::config::MatcherConfig;
use crate::error::Result;
use crate::fingerprint::Landmark;
use crate::store::{HashHit, IndexStore, TrackId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// One scored track candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub track_id: TrackId,
    /// Tallest offset-histogram bin: aligned hash coincidences.
    pub score: u32,
    /// Reference-minus-query offset at the tallest bin, in frames.
    pub offset_frames: i64,
    /// All hash coincidences with this track, aligned or not.
    pub matched_hashes: u32,
}

/// Ranked result of one match run.
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    /// The top candidate when it passes the acceptance rule.
    pub best: Option<Candidate>,
    /// All candidates at or above `score_min`, strongest first.
    pub candidates: Vec<Candidate>,
}

/// Offset-histogram matcher bound to one [`MatcherConfig`].
#[derive(Debug, Clone)]
pub struct Matcher {
    config: MatcherConfig,
}

impl Matcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    /// Look up the query's hashes and rank the resulting candidates.
    pub async fn rank(&self, store: &dyn IndexStore, query: &[Landmark]) -> Result<MatchOutcome> {
        if query.is_empty() {
            return Ok(MatchOutcome::default());
        }

        let hashes: Vec<u32> = {
            let mut seen = HashSet::new();
            query
                .iter()
                .filter(|lm| seen.insert(lm.hash))
                .map(|lm| lm.hash)
                .collect()
        };

        let hits = store.lookup_many(&hashes).await?;
        debug!(
            query_hashes = hashes.len(),
            postings = hits.len(),
            "matched query against index"
        );
        Ok(self.vote(query, &hits))
    }

    /// Histogram voting over pre-fetched postings. Pure; exposed for
    /// direct use with already-looked-up hits.
    pub fn vote(&self, query: &[Landmark], hits: &[HashHit]) -> MatchOutcome {
        // Query times per hash, deduplicated: a repeated (hash, t_q)
        // pair must not vote twice.
        let mut query_times: HashMap<u32, Vec<u32>> = HashMap::new();
        for lm in query {
            let times = query_times.entry(lm.hash).or_default();
            if !times.contains(&lm.anchor_frame) {
                times.push(lm.anchor_frame);
            }
        }

        let quant = self.config.offset_quantization as i64;
        let mut histograms: HashMap<TrackId, HashMap<i64, u32>> = HashMap::new();
        let mut totals: HashMap<TrackId, u32> = HashMap::new();

        for hit in hits {
            let Some(times) = query_times.get(&hit.hash) else {
                continue;
            };
            for &t_q in times {
                let delta = hit.anchor_frame as i64 - t_q as i64;
                let bin = delta.div_euclid(quant);
                *histograms
                    .entry(hit.track_id)
                    .or_default()
                    .entry(bin)
                    .or_default() += 1;
                *totals.entry(hit.track_id).or_default() += 1;
            }
        }

        let mut candidates: Vec<Candidate> = histograms
            .into_iter()
            .filter_map(|(track_id, histogram)| {
                // Tallest bin wins; equal bins resolve to the earliest
                // offset so the result is deterministic.
                let (&bin, &score) = histogram
                    .iter()
                    .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))?;
                Some(Candidate {
                    track_id,
                    score,
                    offset_frames: bin * quant,
                    matched_hashes: totals[&track_id],
                })
            })
            .filter(|c| c.score >= self.config.score_min)
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then(b.matched_hashes.cmp(&a.matched_hashes))
                .then(a.track_id.cmp(&b.track_id))
        });

        let best = self.accept(&candidates);
        MatchOutcome { best, candidates }
    }

    /// Acceptance rule: a clear winner, or the only candidate standing.
    fn accept(&self, candidates: &[Candidate]) -> Option<Candidate> {
        match candidates {
            [] => None,
            [single] => Some(*single),
            [first, second, ..] => {
                if first.score as f32 >= self.config.margin * second.score as f32 {
                    Some(*first)
                } else {
                    None
                }
            }
        }
    }
}
