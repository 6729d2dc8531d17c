//! SQLite-backed index store.
//!
//! One `tracks` table, one `fingerprints` table with a covering index on
//! `hash`. WAL journaling keeps readers live while a single writer
//! ingests; per-track insert batches commit as one transaction.

use crate::error::{Error, Result};
use crate::fingerprint::Landmark;
use crate::store::{HashHit, IndexStore, NewTrack, StoreStats, TrackId, TrackMeta};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Hashes per `IN (...)` clause during bulk lookup, safely below
/// SQLite's bind-parameter limit.
const LOOKUP_CHUNK: usize = 500;

/// Durable [`IndexStore`] over a single SQLite database file.
pub struct SqliteStore {
    pool: SqlitePool,
    batch_size: usize,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and ensure the schema.
    pub async fn open(path: &Path, batch_size: usize) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        info!(path = %path.display(), "opened fingerprint index");

        let store = Self { pool, batch_size };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tracks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                artist TEXT,
                duration_frames INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                fingerprint_count INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS fingerprints (
                hash INTEGER NOT NULL,
                anchor_time INTEGER NOT NULL,
                track_id INTEGER NOT NULL REFERENCES tracks(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Covering index: matching reads (hash, track_id, anchor_time)
        // without touching the table.
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_fingerprints_hash
             ON fingerprints (hash, track_id, anchor_time)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_fingerprints_track
             ON fingerprints (track_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn meta_from_row(row: &SqliteRow) -> Result<TrackMeta> {
        Ok(TrackMeta {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            artist: row.try_get("artist")?,
            duration_frames: row.try_get::<i64, _>("duration_frames")? as u32,
            created_at: row.try_get("created_at")?,
            fingerprint_count: row.try_get::<i64, _>("fingerprint_count")? as u64,
        })
    }
}

#[async_trait]
impl IndexStore for SqliteStore {
    async fn create_track(&self, new: NewTrack) -> Result<TrackId> {
        let row = sqlx::query(
            r#"
            INSERT INTO tracks (title, artist, duration_frames, created_at, fingerprint_count)
            VALUES (?, ?, ?, ?, 0)
            RETURNING id
            "#,
        )
        .bind(&new.title)
        .bind(&new.artist)
        .bind(new.duration_frames as i64)
        .bind(chrono::Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("id")?)
    }

    async fn insert_fingerprints(&self, track_id: TrackId, landmarks: &[Landmark]) -> Result<u64> {
        let exists = sqlx::query("SELECT 1 FROM tracks WHERE id = ?")
            .bind(track_id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(Error::TrackNotFound(track_id));
        }
        if landmarks.is_empty() {
            return Ok(0);
        }

        // All batches of one track commit together; a mid-batch failure
        // rolls the whole track's records back.
        let mut tx = self.pool.begin().await?;
        for chunk in landmarks.chunks(self.batch_size) {
            let mut qb = QueryBuilder::<Sqlite>::new(
                "INSERT INTO fingerprints (hash, anchor_time, track_id) ",
            );
            qb.push_values(chunk, |mut b, lm| {
                b.push_bind(lm.hash as i64)
                    .push_bind(lm.anchor_frame as i64)
                    .push_bind(track_id);
            });
            qb.build().execute(&mut *tx).await?;
        }

        sqlx::query("UPDATE tracks SET fingerprint_count = fingerprint_count + ? WHERE id = ?")
            .bind(landmarks.len() as i64)
            .bind(track_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(track_id, count = landmarks.len(), "inserted fingerprints");
        Ok(landmarks.len() as u64)
    }

    async fn delete_track(&self, track_id: TrackId) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM fingerprints WHERE track_id = ?")
            .bind(track_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM tracks WHERE id = ?")
            .bind(track_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        if result.rows_affected() > 0 {
            debug!(track_id, "deleted track");
        }
        Ok(())
    }

    async fn lookup(&self, hash: u32) -> Result<Vec<(TrackId, u32)>> {
        let rows = sqlx::query("SELECT track_id, anchor_time FROM fingerprints WHERE hash = ?")
            .bind(hash as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok((
                    row.try_get("track_id")?,
                    row.try_get::<i64, _>("anchor_time")? as u32,
                ))
            })
            .collect()
    }

    async fn lookup_many(&self, hashes: &[u32]) -> Result<Vec<HashHit>> {
        let mut hits = Vec::new();
        for chunk in hashes.chunks(LOOKUP_CHUNK) {
            let mut qb = QueryBuilder::<Sqlite>::new(
                "SELECT hash, track_id, anchor_time FROM fingerprints WHERE hash IN (",
            );
            let mut sep = qb.separated(", ");
            for &hash in chunk {
                sep.push_bind(hash as i64);
            }
            qb.push(")");

            for row in qb.build().fetch_all(&self.pool).await? {
                hits.push(HashHit {
                    hash: row.try_get::<i64, _>("hash")? as u32,
                    track_id: row.try_get("track_id")?,
                    anchor_frame: row.try_get::<i64, _>("anchor_time")? as u32,
                });
            }
        }
        Ok(hits)
    }

    async fn get_track(&self, track_id: TrackId) -> Result<Option<TrackMeta>> {
        let row = sqlx::query(
            "SELECT id, title, artist, duration_frames, created_at, fingerprint_count
             FROM tracks WHERE id = ?",
        )
        .bind(track_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::meta_from_row).transpose()
    }

    async fn list_tracks(&self) -> Result<Vec<TrackMeta>> {
        let rows = sqlx::query(
            "SELECT id, title, artist, duration_frames, created_at, fingerprint_count
             FROM tracks ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::meta_from_row).collect()
    }

    async fn stats(&self) -> Result<StoreStats> {
        let tracks: i64 = sqlx::query("SELECT COUNT(*) AS n FROM tracks")
            .fetch_one(&self.pool)
            .await?
            .try_get("n")?;
        let fingerprints: i64 = sqlx::query("SELECT COUNT(*) AS n FROM fingerprints")
            .fetch_one(&self.pool)
            .await?
            .try_get("n")?;
        let bytes: i64 = sqlx::query(
            "SELECT page_count * page_size AS bytes FROM pragma_page_count(), pragma_page_size()",
        )
        .fetch_one(&self.pool)
        .await?
        .try_get("bytes")?;

        Ok(StoreStats {
            tracks: tracks as u64,
            fingerprints: fingerprints as u64,
            bytes: bytes as u64,
        })
    }

    async fn optimize(&self) -> Result<()> {
        sqlx::query("ANALYZE").execute(&self.pool).await?;
        sqlx::query("VACUUM").execute(&self.pool).await?;
        info!("optimized fingerprint index");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn landmark(hash: u32, anchor_frame: u32) -> Landmark {
        Landmark { hash, anchor_frame }
    }

    async fn temp_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("index.db"), 1000)
            .await
            .unwrap();
        (dir, store)
    }

    fn track(title: &str) -> NewTrack {
        NewTrack {
            title: title.into(),
            artist: Some("tester".into()),
            duration_frames: 500,
        }
    }

    #[tokio::test]
    async fn create_insert_lookup_round_trip() {
        let (_dir, store) = temp_store().await;
        let id = store.create_track(track("one")).await.unwrap();

        let n = store
            .insert_fingerprints(id, &[landmark(10, 1), landmark(10, 4), landmark(11, 2)])
            .await
            .unwrap();
        assert_eq!(n, 3);

        let mut hits = store.lookup(10).await.unwrap();
        hits.sort();
        assert_eq!(hits, vec![(id, 1), (id, 4)]);

        let meta = store.get_track(id).await.unwrap().unwrap();
        assert_eq!(meta.title, "one");
        assert_eq!(meta.fingerprint_count, 3);
        assert_eq!(meta.duration_frames, 500);
    }

    #[tokio::test]
    async fn batching_spans_multiple_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("index.db"), 16)
            .await
            .unwrap();
        let id = store.create_track(track("bulk")).await.unwrap();

        let landmarks: Vec<Landmark> = (0..100).map(|i| landmark(i, i)).collect();
        assert_eq!(
            store.insert_fingerprints(id, &landmarks).await.unwrap(),
            100
        );
        assert_eq!(store.stats().await.unwrap().fingerprints, 100);
    }

    #[tokio::test]
    async fn insert_into_missing_track_fails() {
        let (_dir, store) = temp_store().await;
        let err = store
            .insert_fingerprints(12345, &[landmark(1, 0)])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TrackNotFound(12345)));
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_cascades() {
        let (_dir, store) = temp_store().await;
        let id = store.create_track(track("gone")).await.unwrap();
        store
            .insert_fingerprints(id, &[landmark(7, 0), landmark(8, 1)])
            .await
            .unwrap();

        store.delete_track(id).await.unwrap();
        store.delete_track(id).await.unwrap();

        assert!(store.get_track(id).await.unwrap().is_none());
        assert!(store.lookup(7).await.unwrap().is_empty());
        assert_eq!(store.stats().await.unwrap().fingerprints, 0);
    }

    #[tokio::test]
    async fn lookup_many_spans_chunks() {
        let (_dir, store) = temp_store().await;
        let id = store.create_track(track("wide")).await.unwrap();
        let landmarks: Vec<Landmark> = (0..700).map(|i| landmark(i, i)).collect();
        store.insert_fingerprints(id, &landmarks).await.unwrap();

        let hashes: Vec<u32> = (0..700).collect();
        let hits = store.lookup_many(&hashes).await.unwrap();
        assert_eq!(hits.len(), 700);
    }

    #[tokio::test]
    async fn track_ids_are_monotonic() {
        let (_dir, store) = temp_store().await;
        let a = store.create_track(track("a")).await.unwrap();
        let b = store.create_track(track("b")).await.unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn optimize_preserves_contents() {
        let (_dir, store) = temp_store().await;
        let id = store.create_track(track("keep")).await.unwrap();
        store
            .insert_fingerprints(id, &[landmark(99, 3)])
            .await
            .unwrap();

        store.optimize().await.unwrap();

        assert_eq!(store.lookup(99).await.unwrap(), vec![(id, 3)]);
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.tracks, 1);
        assert!(stats.bytes > 0);
    }

    #[tokio::test]
    async fn reopen_preserves_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        {
            let store = SqliteStore::open(&path, 1000).await.unwrap();
            let id = store.create_track(track("durable")).await.unwrap();
            store
                .insert_fingerprints(id, &[landmark(55, 8)])
                .await
                .unwrap();
        }
        let store = SqliteStore::open(&path, 1000).await.unwrap();
        assert_eq!(store.stats().await.unwrap().tracks, 1);
        assert_eq!(store.lookup(55).await.unwrap().len(), 1);
    }
}
