//! Engine orchestration.
//!
//! Ties the decoder, the fingerprint pipeline, the index store and the
//! matcher together behind the two top-level operations: ingest and
//! identify. The engine itself is stateless apart from its store and
//! decoder handles; DSP runs on the blocking pool and never suspends.

use crate::config::EngineConfig;
use crate::decode::{AudioSource, Decoder, PcmAudio, SymphoniaDecoder};
use crate::error::{Error, Result};
use crate::fingerprint::{self, FingerprintOutput};
use crate::matcher::{Candidate, Matcher};
use crate::store::{IndexStore, MemoryStore, NewTrack, SqliteStore, StoreStats, TrackId, TrackMeta};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Caller-supplied metadata for a track being ingested.
#[derive(Debug, Clone)]
pub struct TrackInfo {
    pub title: String,
    pub artist: Option<String>,
}

/// Successful ingest summary.
#[derive(Debug, Clone, Copy)]
pub struct IngestReport {
    pub track_id: TrackId,
    pub fingerprints_added: u64,
}

/// The accepted result of an identification.
#[derive(Debug, Clone)]
pub struct TrackMatch {
    pub track: TrackMeta,
    pub score: u32,
    pub offset_frames: i64,
    /// Position of the query within the matched track, in seconds.
    pub offset_secs: f64,
}

/// Full identification outcome.
#[derive(Debug, Clone, Default)]
pub struct Identification {
    /// Set when a candidate passed the acceptance rule.
    pub best: Option<TrackMatch>,
    /// Ranked candidates at or above the score threshold.
    pub candidates: Vec<Candidate>,
    /// Landmarks the query produced.
    pub query_hashes: usize,
}

/// Audio identification engine.
pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn IndexStore>,
    decoder: Arc<dyn Decoder>,
    matcher: Matcher,
}

impl Engine {
    /// Build an engine over `store` with the bundled symphonia decoder.
    pub fn new(config: EngineConfig, store: Arc<dyn IndexStore>) -> Result<Self> {
        Self::with_decoder(config, store, Arc::new(SymphoniaDecoder))
    }

    /// Build an engine whose store follows the index configuration: a
    /// SQLite catalog at `storage_path`, or the in-memory store when
    /// unset.
    pub async fn open(config: EngineConfig) -> Result<Self> {
        let store: Arc<dyn IndexStore> = match &config.index.storage_path {
            Some(path) => Arc::new(SqliteStore::open(path, config.index.batch_size).await?),
            None => Arc::new(MemoryStore::new()),
        };
        Self::new(config, store)
    }

    /// Build an engine with a caller-supplied decoder.
    pub fn with_decoder(
        config: EngineConfig,
        store: Arc<dyn IndexStore>,
        decoder: Arc<dyn Decoder>,
    ) -> Result<Self> {
        config.validate()?;
        let matcher = Matcher::new(config.matcher.clone());
        Ok(Self {
            config,
            store,
            decoder,
            matcher,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn IndexStore> {
        &self.store
    }

    /// Fingerprint `source` and add it to the catalog.
    pub async fn ingest(&self, source: AudioSource, info: TrackInfo) -> Result<IngestReport> {
        self.ingest_with(source, info, CancellationToken::new())
            .await
    }

    /// [`ingest`](Self::ingest) with cooperative cancellation. The token
    /// is honored between pipeline stages; cancelling after the track
    /// row exists triggers the same compensating deletion as a failure.
    pub async fn ingest_with(
        &self,
        source: AudioSource,
        info: TrackInfo,
        cancel: CancellationToken,
    ) -> Result<IngestReport> {
        let pcm = self.decode_stage(source, &cancel).await?;
        let fp = self.fingerprint_stage(pcm, &cancel).await?;
        self.commit_track(&info, &fp, &cancel).await
    }

    /// Identify `source` against the catalog.
    pub async fn identify(&self, source: AudioSource) -> Result<Identification> {
        self.identify_with(source, CancellationToken::new()).await
    }

    /// [`identify`](Self::identify) with cooperative cancellation.
    ///
    /// Runs under the configured wall-clock budget; on expiry the error
    /// carries any candidates gathered so far as tentative results.
    /// Silent or featureless queries return an empty identification.
    pub async fn identify_with(
        &self,
        source: AudioSource,
        cancel: CancellationToken,
    ) -> Result<Identification> {
        let started = Instant::now();
        let budget = Duration::from_secs_f64(self.config.identify_budget_secs);

        let pcm = self.decode_stage(source, &cancel).await?;
        check_budget(started, budget, &[])?;

        let pcm = self.truncate_query(pcm);
        let fp = match self.fingerprint_stage(pcm, &cancel).await {
            Ok(fp) => fp,
            // The matcher never errors on low-quality input; silence
            // simply identifies nothing.
            Err(Error::SilentAudio) => return Ok(Identification::default()),
            Err(e) => return Err(e),
        };
        check_budget(started, budget, &[])?;
        check_cancelled(&cancel)?;

        if fp.landmarks.is_empty() {
            return Ok(Identification::default());
        }

        let outcome = self.matcher.rank(self.store.as_ref(), &fp.landmarks).await?;
        check_budget(started, budget, &outcome.candidates)?;

        let best = match outcome.best {
            Some(candidate) => match self.store.get_track(candidate.track_id).await? {
                Some(track) => Some(TrackMatch {
                    track,
                    score: candidate.score,
                    offset_frames: candidate.offset_frames,
                    offset_secs: candidate.offset_frames as f64 * self.config.frame_secs(),
                }),
                // Deleted between matching and metadata fetch.
                None => None,
            },
            None => None,
        };

        info!(
            query_hashes = fp.landmarks.len(),
            candidates = outcome.candidates.len(),
            matched = best.is_some(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "identification finished"
        );

        Ok(Identification {
            best,
            candidates: outcome.candidates,
            query_hashes: fp.landmarks.len(),
        })
    }

    /// Ingest many sources: analysis fans out to the worker pool while
    /// all store writes funnel through this call, one track at a time.
    /// Results keep the input order; one failure does not stop the rest.
    pub async fn ingest_batch(
        &self,
        items: Vec<(AudioSource, TrackInfo)>,
    ) -> Vec<Result<IngestReport>> {
        let total = items.len();
        let (tx, mut rx) = mpsc::channel::<(usize, TrackInfo, Result<FingerprintOutput>)>(
            total.max(1),
        );

        for (idx, (source, info)) in items.into_iter().enumerate() {
            let decoder = Arc::clone(&self.decoder);
            let config = self.config.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let analyzed = tokio::task::spawn_blocking(move || {
                    let pcm = decoder.decode(source)?;
                    fingerprint::fingerprint_pcm(&config, &pcm)
                })
                .await
                .map_err(|e| Error::Processing(format!("analysis task failed: {e}")))
                .and_then(|r| r);
                let _ = tx.send((idx, info, analyzed)).await;
            });
        }
        drop(tx);

        let mut results: Vec<Option<Result<IngestReport>>> = (0..total).map(|_| None).collect();
        let never = CancellationToken::new();
        while let Some((idx, info, analyzed)) = rx.recv().await {
            let result = match analyzed {
                Ok(fp) => self.commit_track(&info, &fp, &never).await,
                Err(e) => Err(e),
            };
            results[idx] = Some(result);
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(Error::Processing("analysis worker vanished".into()))))
            .collect()
    }

    /// Remove a track and its fingerprints. Idempotent.
    pub async fn delete_track(&self, track_id: TrackId) -> Result<()> {
        self.store.delete_track(track_id).await
    }

    pub async fn get_track(&self, track_id: TrackId) -> Result<Option<TrackMeta>> {
        self.store.get_track(track_id).await
    }

    pub async fn list_tracks(&self) -> Result<Vec<TrackMeta>> {
        self.store.list_tracks().await
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.store.stats().await
    }

    /// Compact the index store.
    pub async fn optimize(&self) -> Result<()> {
        self.store.optimize().await
    }

    async fn decode_stage(
        &self,
        source: AudioSource,
        cancel: &CancellationToken,
    ) -> Result<PcmAudio> {
        check_cancelled(cancel)?;
        let decoder = Arc::clone(&self.decoder);
        tokio::task::spawn_blocking(move || decoder.decode(source))
            .await
            .map_err(|e| Error::Processing(format!("decode task failed: {e}")))?
    }

    async fn fingerprint_stage(
        &self,
        pcm: PcmAudio,
        cancel: &CancellationToken,
    ) -> Result<FingerprintOutput> {
        check_cancelled(cancel)?;
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || fingerprint::fingerprint_pcm(&config, &pcm))
            .await
            .map_err(|e| Error::Processing(format!("fingerprint task failed: {e}")))?
    }

    /// Create the track row and insert its fingerprints; on any failure
    /// or cancellation after the row exists, delete it again so the
    /// store never holds a partially ingested track.
    async fn commit_track(
        &self,
        info: &TrackInfo,
        fp: &FingerprintOutput,
        cancel: &CancellationToken,
    ) -> Result<IngestReport> {
        check_cancelled(cancel)?;
        let track_id = self
            .store
            .create_track(NewTrack {
                title: info.title.clone(),
                artist: info.artist.clone(),
                duration_frames: fp.duration_frames,
            })
            .await?;

        let outcome = if cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            self.store.insert_fingerprints(track_id, &fp.landmarks).await
        };

        match outcome {
            Ok(fingerprints_added) => {
                info!(
                    track_id,
                    title = %info.title,
                    fingerprints_added,
                    peaks = fp.peak_count,
                    "ingested track"
                );
                Ok(IngestReport {
                    track_id,
                    fingerprints_added,
                })
            }
            Err(e) => {
                warn!(track_id, error = %e, "ingest failed, removing partial track");
                if let Err(del) = self.store.delete_track(track_id).await {
                    warn!(track_id, error = %del, "compensating delete failed");
                }
                Err(e)
            }
        }
    }

    /// Limit a query to the configured excerpt length.
    fn truncate_query(&self, mut pcm: PcmAudio) -> PcmAudio {
        let channels = pcm.channels.max(1) as usize;
        let mut max_samples =
            (self.config.max_query_secs * pcm.sample_rate as f64) as usize * channels;
        max_samples -= max_samples % channels;
        if pcm.samples.len() > max_samples {
            pcm.samples.truncate(max_samples);
        }
        pcm
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}

fn check_budget(started: Instant, budget: Duration, tentative: &[Candidate]) -> Result<()> {
    let elapsed = started.elapsed();
    if elapsed > budget {
        return Err(Error::Timeout {
            elapsed,
            tentative: tentative.to_vec(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Landmark;
    use crate::store::{HashHit, MemoryStore};
    use async_trait::async_trait;
    use std::f32::consts::PI;

    /// Linear chirp with enough spectral motion to produce landmarks.
    fn chirp_pcm(f0: f32, f1: f32, secs: f32) -> PcmAudio {
        let rate = 22_050u32;
        let total = (secs * rate as f32) as usize;
        let samples = (0..total)
            .map(|i| {
                let t = i as f32 / rate as f32;
                let phase = 2.0 * PI * (f0 * t + (f1 - f0) * t * t / (2.0 * secs));
                phase.sin() * 0.8
            })
            .collect();
        PcmAudio {
            samples,
            sample_rate: rate,
            channels: 1,
        }
    }

    fn engine(store: Arc<dyn IndexStore>) -> Engine {
        Engine::new(EngineConfig::default(), store).unwrap()
    }

    fn info(title: &str) -> TrackInfo {
        TrackInfo {
            title: title.into(),
            artist: None,
        }
    }

    /// Store whose fingerprint inserts always fail mid-ingest.
    struct FailingStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl IndexStore for FailingStore {
        async fn create_track(&self, new: NewTrack) -> Result<TrackId> {
            self.inner.create_track(new).await
        }
        async fn insert_fingerprints(&self, _: TrackId, _: &[Landmark]) -> Result<u64> {
            Err(Error::Storage("disk full".to_string()))
        }
        async fn delete_track(&self, track_id: TrackId) -> Result<()> {
            self.inner.delete_track(track_id).await
        }
        async fn lookup(&self, hash: u32) -> Result<Vec<(TrackId, u32)>> {
            self.inner.lookup(hash).await
        }
        async fn lookup_many(&self, hashes: &[u32]) -> Result<Vec<HashHit>> {
            self.inner.lookup_many(hashes).await
        }
        async fn get_track(&self, track_id: TrackId) -> Result<Option<TrackMeta>> {
            self.inner.get_track(track_id).await
        }
        async fn list_tracks(&self) -> Result<Vec<TrackMeta>> {
            self.inner.list_tracks().await
        }
        async fn stats(&self) -> Result<StoreStats> {
            self.inner.stats().await
        }
        async fn optimize(&self) -> Result<()> {
            self.inner.optimize().await
        }
    }

    #[tokio::test]
    async fn ingest_then_identify_round_trip() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store);
        let pcm = chirp_pcm(300.0, 4_000.0, 3.0);

        let report = engine
            .ingest(AudioSource::Pcm(pcm.clone()), info("chirp"))
            .await
            .unwrap();
        assert!(report.fingerprints_added > 0);

        let result = engine.identify(AudioSource::Pcm(pcm)).await.unwrap();
        let best = result.best.expect("self-identification must succeed");
        assert_eq!(best.track.id, report.track_id);
        assert_eq!(best.offset_frames, 0);
        assert_eq!(best.track.title, "chirp");
    }

    #[tokio::test]
    async fn failed_insert_rolls_back_track() {
        let store = Arc::new(FailingStore {
            inner: MemoryStore::new(),
        });
        let engine = engine(store.clone());

        let err = engine
            .ingest(AudioSource::Pcm(chirp_pcm(300.0, 4_000.0, 2.0)), info("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));

        // Compensating delete ran: neither the track nor any records.
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.tracks, 0);
        assert_eq!(stats.fingerprints, 0);
    }

    #[tokio::test]
    async fn pre_cancelled_ingest_leaves_store_untouched() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());

        let token = CancellationToken::new();
        token.cancel();
        let err = engine
            .ingest_with(
                AudioSource::Pcm(chirp_pcm(300.0, 4_000.0, 2.0)),
                info("x"),
                token,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(store.stats().await.unwrap().tracks, 0);
    }

    #[tokio::test]
    async fn identify_of_silence_is_empty_not_error() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store);
        let silence = PcmAudio {
            samples: vec![0.0; 22_050 * 5],
            sample_rate: 22_050,
            channels: 1,
        };

        let result = engine.identify(AudioSource::Pcm(silence)).await.unwrap();
        assert!(result.best.is_none());
        assert!(result.candidates.is_empty());
        assert_eq!(result.query_hashes, 0);
    }

    #[tokio::test]
    async fn ingest_of_silence_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());
        let silence = PcmAudio {
            samples: vec![0.0; 22_050],
            sample_rate: 22_050,
            channels: 1,
        };

        let err = engine
            .ingest(AudioSource::Pcm(silence), info("quiet"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SilentAudio));
        assert_eq!(store.stats().await.unwrap().tracks, 0);
    }

    #[tokio::test]
    async fn exhausted_budget_times_out() {
        let store = Arc::new(MemoryStore::new());
        let mut config = EngineConfig::default();
        config.identify_budget_secs = 1e-9;
        let engine = Engine::new(config, store).unwrap();

        let err = engine
            .identify(AudioSource::Pcm(chirp_pcm(300.0, 4_000.0, 2.0)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn unknown_audio_identifies_nothing() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store);

        let result = engine
            .identify(AudioSource::Pcm(chirp_pcm(500.0, 3_000.0, 2.0)))
            .await
            .unwrap();
        assert!(result.best.is_none());
        assert!(result.candidates.is_empty());
    }

    #[tokio::test]
    async fn batch_ingest_reports_per_item() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());

        let items = vec![
            (
                AudioSource::Pcm(chirp_pcm(200.0, 3_000.0, 2.0)),
                info("first"),
            ),
            (
                AudioSource::Pcm(PcmAudio {
                    samples: vec![0.0; 22_050],
                    sample_rate: 22_050,
                    channels: 1,
                }),
                info("silent"),
            ),
            (
                AudioSource::Pcm(chirp_pcm(900.0, 6_000.0, 2.0)),
                info("third"),
            ),
        ];

        let results = engine.ingest_batch(items).await;
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(Error::SilentAudio)));
        assert!(results[2].is_ok());
        assert_eq!(store.stats().await.unwrap().tracks, 2);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_at_construction() {
        let mut config = EngineConfig::default();
        config.matcher.margin = 0.5;
        assert!(Engine::new(config, Arc::new(MemoryStore::new())).is_err());
    }
}
