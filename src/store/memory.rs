//! In-memory index store.
//!
//! Hash maps behind a single `RwLock`; writes hold the lock for their
//! whole operation, which gives per-track atomicity for free.

use crate::error::{Error, Result};
use crate::fingerprint::Landmark;
use crate::store::{HashHit, IndexStore, NewTrack, StoreStats, TrackId, TrackMeta};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

#[derive(Default)]
struct Inner {
    next_id: TrackId,
    tracks: BTreeMap<TrackId, TrackMeta>,
    index: HashMap<u32, Vec<(TrackId, u32)>>,
    fingerprints: u64,
}

/// Volatile [`IndexStore`] for tests and ephemeral catalogs.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                next_id: 1,
                ..Inner::default()
            }),
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| Error::Storage("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| Error::Storage("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl IndexStore for MemoryStore {
    async fn create_track(&self, new: NewTrack) -> Result<TrackId> {
        let mut inner = self.write()?;
        let id = inner.next_id;
        inner.next_id += 1;
        inner.tracks.insert(
            id,
            TrackMeta {
                id,
                title: new.title,
                artist: new.artist,
                duration_frames: new.duration_frames,
                created_at: chrono::Utc::now().timestamp(),
                fingerprint_count: 0,
            },
        );
        Ok(id)
    }

    async fn insert_fingerprints(&self, track_id: TrackId, landmarks: &[Landmark]) -> Result<u64> {
        let mut inner = self.write()?;
        if !inner.tracks.contains_key(&track_id) {
            return Err(Error::TrackNotFound(track_id));
        }
        for lm in landmarks {
            inner
                .index
                .entry(lm.hash)
                .or_default()
                .push((track_id, lm.anchor_frame));
        }
        inner.fingerprints += landmarks.len() as u64;
        if let Some(meta) = inner.tracks.get_mut(&track_id) {
            meta.fingerprint_count += landmarks.len() as u64;
        }
        Ok(landmarks.len() as u64)
    }

    async fn delete_track(&self, track_id: TrackId) -> Result<()> {
        let mut inner = self.write()?;
        if inner.tracks.remove(&track_id).is_none() {
            return Ok(());
        }
        let mut removed = 0u64;
        inner.index.retain(|_, postings| {
            let before = postings.len();
            postings.retain(|(id, _)| *id != track_id);
            removed += (before - postings.len()) as u64;
            !postings.is_empty()
        });
        inner.fingerprints -= removed;
        Ok(())
    }

    async fn lookup(&self, hash: u32) -> Result<Vec<(TrackId, u32)>> {
        let inner = self.read()?;
        Ok(inner.index.get(&hash).cloned().unwrap_or_default())
    }

    async fn lookup_many(&self, hashes: &[u32]) -> Result<Vec<HashHit>> {
        let inner = self.read()?;
        let mut hits = Vec::new();
        for &hash in hashes {
            if let Some(postings) = inner.index.get(&hash) {
                hits.extend(postings.iter().map(|&(track_id, anchor_frame)| HashHit {
                    hash,
                    track_id,
                    anchor_frame,
                }));
            }
        }
        Ok(hits)
    }

    async fn get_track(&self, track_id: TrackId) -> Result<Option<TrackMeta>> {
        Ok(self.read()?.tracks.get(&track_id).cloned())
    }

    async fn list_tracks(&self) -> Result<Vec<TrackMeta>> {
        Ok(self.read()?.tracks.values().cloned().collect())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let inner = self.read()?;
        let posting_bytes = inner.fingerprints * std::mem::size_of::<(TrackId, u32)>() as u64;
        let slot_bytes = inner.index.len() as u64 * std::mem::size_of::<u32>() as u64;
        Ok(StoreStats {
            tracks: inner.tracks.len() as u64,
            fingerprints: inner.fingerprints,
            bytes: posting_bytes + slot_bytes,
        })
    }

    async fn optimize(&self) -> Result<()> {
        let mut inner = self.write()?;
        for postings in inner.index.values_mut() {
            postings.shrink_to_fit();
        }
        inner.index.shrink_to_fit();
        Ok(())
    }
}
