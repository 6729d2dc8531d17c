//! Fingerprint index persistence.
//!
//! The [`IndexStore`] trait is the only shared mutable resource in the
//! engine. Two implementations ship with the crate: a SQLite-backed store
//! for durable catalogs and an in-memory store for tests and ephemeral
//! use.

use crate::error::Result;
use crate::fingerprint::Landmark;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Stable monotonic track identifier.
pub type TrackId = i64;

/// Metadata supplied when a track is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTrack {
    pub title: String,
    pub artist: Option<String>,
    /// Spectrogram frames covered by the ingested audio.
    pub duration_frames: u32,
}

/// Stored track metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackMeta {
    pub id: TrackId,
    pub title: String,
    pub artist: Option<String>,
    pub duration_frames: u32,
    /// Ingestion time, seconds since the Unix epoch.
    pub created_at: i64,
    pub fingerprint_count: u64,
}

/// One stored fingerprint row returned from a bulk lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashHit {
    pub hash: u32,
    pub track_id: TrackId,
    pub anchor_frame: u32,
}

/// Aggregate store statistics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StoreStats {
    pub tracks: u64,
    pub fingerprints: u64,
    /// Approximate on-disk (or in-memory) footprint.
    pub bytes: u64,
}

/// Persistence contract for fingerprint records and track metadata.
///
/// Implementations must make `insert_fingerprints` atomic per track: after
/// a failure the track has none of the submitted records. `delete_track`
/// is idempotent and removes the track's records with it. `lookup` is
/// index-backed; its cost is proportional to the output.
#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn create_track(&self, new: NewTrack) -> Result<TrackId>;

    /// Insert fingerprints for a track and update its fingerprint count.
    /// Returns the number of records written.
    async fn insert_fingerprints(&self, track_id: TrackId, landmarks: &[Landmark]) -> Result<u64>;

    async fn delete_track(&self, track_id: TrackId) -> Result<()>;

    /// All `(track, anchor_frame)` postings for one hash.
    async fn lookup(&self, hash: u32) -> Result<Vec<(TrackId, u32)>>;

    /// Bulk lookup; the preferred form for matching.
    async fn lookup_many(&self, hashes: &[u32]) -> Result<Vec<HashHit>>;

    async fn get_track(&self, track_id: TrackId) -> Result<Option<TrackMeta>>;

    async fn list_tracks(&self) -> Result<Vec<TrackMeta>>;

    async fn stats(&self) -> Result<StoreStats>;

    /// Reclaim space and refresh secondary structures. Semantics are
    /// unchanged afterwards.
    async fn optimize(&self) -> Result<()>;
}
