//! Content-based audio identification.
//!
//! `earmark` matches short, possibly noisy recordings against a catalog
//! of ingested reference tracks. Audio is reduced to a constellation of
//! spectral peaks, peak pairs are packed into 32-bit landmark hashes,
//! and queries are resolved by offset-histogram voting: aligned hash
//! coincidences pile into one histogram bin for the true track while
//! chance collisions scatter.
//!
//! ```no_run
//! use earmark::{AudioSource, Engine, EngineConfig, MemoryStore, TrackInfo};
//! use std::sync::Arc;
//!
//! # async fn demo() -> earmark::Result<()> {
//! let engine = Engine::new(EngineConfig::default(), Arc::new(MemoryStore::new()))?;
//!
//! engine
//!     .ingest(
//!         AudioSource::File("reference.mp3".into()),
//!         TrackInfo { title: "Reference".into(), artist: None },
//!     )
//!     .await?;
//!
//! let result = engine.identify(AudioSource::File("clip.wav".into())).await?;
//! if let Some(found) = result.best {
//!     println!("{} at {:.1}s", found.track.title, found.offset_secs);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod decode;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod matcher;
pub mod store;

pub use config::{
    AudioConfig, EngineConfig, FingerprintConfig, IndexConfig, MatcherConfig, PeakConfig,
};
pub use decode::{AudioSource, Decoder, PcmAudio, SymphoniaDecoder};
pub use engine::{Engine, Identification, IngestReport, TrackInfo, TrackMatch};
pub use error::{Error, Result};
pub use fingerprint::{Landmark, Peak, Spectrogram};
pub use matcher::{Candidate, MatchOutcome, Matcher};
pub use store::{
    HashHit, IndexStore, MemoryStore, NewTrack, SqliteStore, StoreStats, TrackId, TrackMeta,
};
