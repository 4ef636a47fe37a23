//! SQLite-backed Cache Store (§4.1).
//!
//! WAL mode for concurrent readers; writes serialize per record via a
//! single connection mutex (short-lived exclusive lock, §5 "Shared-resource
//! policy"). Image bytes live beside the database as
//! `<cacheDir>/<urlHash>.jpg`; the row and the file are mutated together so
//! the "row exists iff file exists" invariant holds except for the
//! documented self-healing case (missing file, existing row → miss).

use super::{url_hash, CacheStats, CachedFeatureRecord, CleanupReport};
use super::traits::CacheStore;
use crate::core::features::serialize::{deserialize_orb, deserialize_sift, serialize_orb, serialize_sift};
use crate::core::features::{BinarySet, FeatureSet, ScaleInvariantSet};
use crate::error::CacheError;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const JPEG_QUALITY: u8 = 85;

pub struct SqliteCache {
    conn: Mutex<Connection>,
    cache_dir: PathBuf,
    image_hits: AtomicU64,
    image_misses: AtomicU64,
    feature_hits: AtomicU64,
    feature_misses: AtomicU64,
    processing_time_saved: Mutex<f64>,
}

impl SqliteCache {
    pub fn open(db_path: &Path, cache_dir: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CacheError::OpenFailed {
                path: db_path.to_path_buf(),
                reason: e.to_string(),
            })?;
        }
        std::fs::create_dir_all(cache_dir).map_err(|e| CacheError::OpenFailed {
            path: cache_dir.to_path_buf(),
            reason: e.to_string(),
        })?;

        let conn = Connection::open(db_path).map_err(|e| CacheError::OpenFailed {
            path: db_path.to_path_buf(),
            reason: e.to_string(),
        })?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| CacheError::QueryFailed(e.to_string()))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cached_images (
                url_hash TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                file_path TEXT NOT NULL,
                byte_size INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                last_accessed_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_cached_images_url ON cached_images(url);
            CREATE INDEX IF NOT EXISTS idx_cached_images_last_accessed ON cached_images(last_accessed_at);

            CREATE TABLE IF NOT EXISTS cached_features (
                url_hash TEXT PRIMARY KEY REFERENCES cached_images(url_hash) ON DELETE CASCADE,
                url TEXT NOT NULL,
                sift_blob BLOB NOT NULL,
                sift_count INTEGER NOT NULL,
                orb_blob BLOB NOT NULL,
                orb_count INTEGER NOT NULL,
                processing_time_seconds REAL NOT NULL,
                image_width INTEGER NOT NULL,
                image_height INTEGER NOT NULL,
                was_cropped INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                last_accessed_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_cached_features_url ON cached_features(url);
            CREATE INDEX IF NOT EXISTS idx_cached_features_last_accessed ON cached_features(last_accessed_at);",
        )
        .map_err(|e| CacheError::QueryFailed(e.to_string()))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| CacheError::QueryFailed(e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(conn),
            cache_dir: cache_dir.to_path_buf(),
            image_hits: AtomicU64::new(0),
            image_misses: AtomicU64::new(0),
            feature_hits: AtomicU64::new(0),
            feature_misses: AtomicU64::new(0),
            processing_time_saved: Mutex::new(0.0),
        })
    }

    fn image_path(&self, hash: &str) -> PathBuf {
        self.cache_dir.join(format!("{hash}.jpg"))
    }

    fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs() as i64
    }
}

impl CacheStore for SqliteCache {
    fn get_image(&self, url: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let hash = url_hash(url);
        let conn = self.conn.lock().expect("cache connection poisoned");

        let row: Option<String> = conn
            .query_row(
                "SELECT file_path FROM cached_images WHERE url_hash = ?1",
                params![hash],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| CacheError::QueryFailed(e.to_string()))?;

        let Some(file_path) = row else {
            self.image_misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        match std::fs::read(&file_path) {
            Ok(bytes) => {
                conn.execute(
                    "UPDATE cached_images SET last_accessed_at = ?1 WHERE url_hash = ?2",
                    params![Self::now(), hash],
                )
                .map_err(|e| CacheError::QueryFailed(e.to_string()))?;
                self.image_hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(bytes))
            }
            Err(_) => {
                // Row exists but the backing file is gone: self-heal by
                // treating this as a miss and dropping the stale row.
                conn.execute("DELETE FROM cached_images WHERE url_hash = ?1", params![hash])
                    .map_err(|e| CacheError::QueryFailed(e.to_string()))?;
                self.image_misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    fn put_image(&self, url: &str, bytes: &[u8]) -> Result<PathBuf, CacheError> {
        let hash = url_hash(url);
        let path = self.image_path(&hash);

        let encoded = reencode_as_jpeg(bytes, JPEG_QUALITY).unwrap_or_else(|| bytes.to_vec());
        std::fs::write(&path, &encoded).map_err(|source| CacheError::WriteFailed {
            url_hash: hash.clone(),
            source,
        })?;

        let conn = self.conn.lock().expect("cache connection poisoned");
        let now = Self::now();
        conn.execute(
            "INSERT INTO cached_images (url_hash, url, file_path, byte_size, created_at, last_accessed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(url_hash) DO UPDATE SET
                file_path = excluded.file_path,
                byte_size = excluded.byte_size,
                last_accessed_at = excluded.last_accessed_at",
            params![hash, url, path.to_string_lossy(), encoded.len() as i64, now],
        )
        .map_err(|e| CacheError::QueryFailed(e.to_string()))?;

        Ok(path)
    }

    fn get_features(&self, url: &str) -> Result<Option<CachedFeatureRecord>, CacheError> {
        let hash = url_hash(url);
        let conn = self.conn.lock().expect("cache connection poisoned");

        let row = conn
            .query_row(
                "SELECT sift_blob, orb_blob, processing_time_seconds, image_width, image_height,
                        was_cropped, created_at
                 FROM cached_features WHERE url_hash = ?1",
                params![hash],
                |row| {
                    Ok((
                        row.get::<_, Vec<u8>>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| CacheError::QueryFailed(e.to_string()))?;

        let Some((sift_blob, orb_blob, processing_time, width, height, was_cropped, created_at)) = row
        else {
            self.feature_misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        let sift = deserialize_sift(&sift_blob)?;
        let orb = deserialize_orb(&orb_blob)?;

        let now = Self::now();
        conn.execute(
            "UPDATE cached_features SET last_accessed_at = ?1 WHERE url_hash = ?2",
            params![now, hash],
        )
        .map_err(|e| CacheError::QueryFailed(e.to_string()))?;

        self.feature_hits.fetch_add(1, Ordering::Relaxed);
        *self.processing_time_saved.lock().expect("poisoned") += processing_time;

        Ok(Some(CachedFeatureRecord {
            url_hash: hash.clone(),
            url: url.to_string(),
            features: FeatureSet { sift, orb },
            processing_time_seconds: processing_time,
            image_shape: (width as u32, height as u32),
            was_cropped: was_cropped != 0,
            created_at: UNIX_EPOCH + Duration::from_secs(created_at.max(0) as u64),
            last_accessed_at: UNIX_EPOCH + Duration::from_secs(now.max(0) as u64),
        }))
    }

    fn put_features(
        &self,
        url: &str,
        features: &FeatureSet,
        processing_time_seconds: f64,
        image_shape: (u32, u32),
        was_cropped: bool,
    ) -> Result<(), CacheError> {
        let hash = url_hash(url);
        let conn = self.conn.lock().expect("cache connection poisoned");

        let exists: bool = conn
            .query_row(
                "SELECT 1 FROM cached_images WHERE url_hash = ?1",
                params![hash],
                |_| Ok(true),
            )
            .optional()
            .map_err(|e| CacheError::QueryFailed(e.to_string()))?
            .unwrap_or(false);
        if !exists {
            return Err(CacheError::MissingImageRow { url_hash: hash });
        }

        let sift_blob = serialize_sift(&features.sift);
        let orb_blob = serialize_orb(&features.orb);
        let now = Self::now();

        conn.execute(
            "INSERT INTO cached_features
                (url_hash, url, sift_blob, sift_count, orb_blob, orb_count,
                 processing_time_seconds, image_width, image_height, was_cropped,
                 created_at, last_accessed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
             ON CONFLICT(url_hash) DO UPDATE SET
                sift_blob = excluded.sift_blob,
                sift_count = excluded.sift_count,
                orb_blob = excluded.orb_blob,
                orb_count = excluded.orb_count,
                processing_time_seconds = excluded.processing_time_seconds,
                image_width = excluded.image_width,
                image_height = excluded.image_height,
                was_cropped = excluded.was_cropped,
                last_accessed_at = excluded.last_accessed_at",
            params![
                hash,
                url,
                sift_blob,
                features.sift.count() as i64,
                orb_blob,
                features.orb.count() as i64,
                processing_time_seconds,
                image_shape.0 as i64,
                image_shape.1 as i64,
                was_cropped as i64,
                now,
            ],
        )
        .map_err(|e| CacheError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    fn stats(&self) -> Result<CacheStats, CacheError> {
        let conn = self.conn.lock().expect("cache connection poisoned");

        let cached_images: i64 = conn
            .query_row("SELECT COUNT(*) FROM cached_images", [], |row| row.get(0))
            .map_err(|e| CacheError::QueryFailed(e.to_string()))?;
        let cached_features: i64 = conn
            .query_row("SELECT COUNT(*) FROM cached_features", [], |row| row.get(0))
            .map_err(|e| CacheError::QueryFailed(e.to_string()))?;
        let disk_bytes: i64 = conn
            .query_row("SELECT COALESCE(SUM(byte_size), 0) FROM cached_images", [], |row| {
                row.get(0)
            })
            .map_err(|e| CacheError::QueryFailed(e.to_string()))?;

        let image_hits = self.image_hits.load(Ordering::Relaxed);
        let image_misses = self.image_misses.load(Ordering::Relaxed);
        let feature_hits = self.feature_hits.load(Ordering::Relaxed);
        let feature_misses = self.feature_misses.load(Ordering::Relaxed);

        let hit_rate = |hits: u64, misses: u64| {
            let total = hits + misses;
            if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            }
        };

        Ok(CacheStats {
            cached_images: cached_images as u64,
            cached_features: cached_features as u64,
            disk_bytes: disk_bytes as u64,
            processing_time_saved: *self.processing_time_saved.lock().expect("poisoned"),
            hit_rate_image: hit_rate(image_hits, image_misses),
            hit_rate_feature: hit_rate(feature_hits, feature_misses),
        })
    }

    fn cleanup(&self, older_than_days: u32) -> Result<CleanupReport, CacheError> {
        let cutoff = Self::now() - (older_than_days as i64) * 86_400;
        let conn = self.conn.lock().expect("cache connection poisoned");

        let mut stmt = conn
            .prepare("SELECT url_hash, file_path FROM cached_images WHERE last_accessed_at < ?1")
            .map_err(|e| CacheError::QueryFailed(e.to_string()))?;
        let stale: Vec<(String, String)> = stmt
            .query_map(params![cutoff], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(|e| CacheError::QueryFailed(e.to_string()))?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);

        let features_removed: u64 = conn
            .query_row(
                "SELECT COUNT(*) FROM cached_features WHERE url_hash IN
                    (SELECT url_hash FROM cached_images WHERE last_accessed_at < ?1)",
                params![cutoff],
                |row| row.get::<_, i64>(0),
            )
            .map_err(|e| CacheError::QueryFailed(e.to_string()))? as u64;

        conn.execute(
            "DELETE FROM cached_images WHERE last_accessed_at < ?1",
            params![cutoff],
        )
        .map_err(|e| CacheError::QueryFailed(e.to_string()))?;

        for (_, file_path) in &stale {
            let _ = std::fs::remove_file(file_path);
        }

        Ok(CleanupReport {
            images_removed: stale.len() as u64,
            features_removed,
        })
    }
}

/// Re-encode arbitrary image bytes as JPEG at the configured quality
/// (§4.1 `putImage`). Returns `None` if the bytes can't be decoded, in
/// which case the caller falls back to storing the original bytes.
fn reencode_as_jpeg(bytes: &[u8], quality: u8) -> Option<Vec<u8>> {
    let image = crate::core::imgio::decode_bytes(bytes).ok()?;
    let mut out = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality);
    image.write_with_encoder(encoder).ok()?;
    Some(out)
}

// Silence an unused-import warning when the ScaleInvariantSet/BinarySet
// aliases aren't referenced directly (they're reached through FeatureSet).
#[allow(unused_imports)]
use {BinarySet as _, ScaleInvariantSet as _};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::features::keypoint::Keypoint;
    use tempfile::TempDir;

    fn sample_features() -> FeatureSet {
        FeatureSet {
            sift: ScaleInvariantSet {
                keypoints: vec![Keypoint::new(1.0, 2.0, 4.0, 0.9)],
                descriptors: vec![[0.5f32; 128]],
            },
            orb: BinarySet::empty(),
        }
    }

    #[test]
    fn put_then_get_image_round_trips_bytes() {
        let dir = TempDir::new().unwrap();
        let cache = SqliteCache::open(&dir.path().join("cache.db"), &dir.path().join("images")).unwrap();

        let jpeg_bytes = sample_jpeg();
        cache.put_image("https://example.com/a.jpg", &jpeg_bytes).unwrap();
        let fetched = cache.get_image("https://example.com/a.jpg").unwrap();
        assert!(fetched.is_some());
    }

    #[test]
    fn get_image_is_a_miss_when_absent() {
        let dir = TempDir::new().unwrap();
        let cache = SqliteCache::open(&dir.path().join("cache.db"), &dir.path().join("images")).unwrap();
        assert!(cache.get_image("https://example.com/missing.jpg").unwrap().is_none());
    }

    #[test]
    fn put_features_requires_prior_image_row() {
        let dir = TempDir::new().unwrap();
        let cache = SqliteCache::open(&dir.path().join("cache.db"), &dir.path().join("images")).unwrap();
        let err = cache.put_features("https://example.com/a.jpg", &sample_features(), 0.1, (100, 100), false);
        assert!(err.is_err());
    }

    #[test]
    fn put_then_get_features_round_trips() {
        let dir = TempDir::new().unwrap();
        let cache = SqliteCache::open(&dir.path().join("cache.db"), &dir.path().join("images")).unwrap();
        cache.put_image("https://example.com/a.jpg", &sample_jpeg()).unwrap();
        cache
            .put_features("https://example.com/a.jpg", &sample_features(), 0.25, (100, 150), true)
            .unwrap();

        let record = cache.get_features("https://example.com/a.jpg").unwrap().unwrap();
        assert_eq!(record.features.sift.count(), 1);
        assert_eq!(record.image_shape, (100, 150));
        assert!(record.was_cropped);
    }

    #[test]
    fn stats_track_hits_and_misses() {
        let dir = TempDir::new().unwrap();
        let cache = SqliteCache::open(&dir.path().join("cache.db"), &dir.path().join("images")).unwrap();
        cache.put_image("https://example.com/a.jpg", &sample_jpeg()).unwrap();
        cache.get_image("https://example.com/a.jpg").unwrap();
        cache.get_image("https://example.com/missing.jpg").unwrap();

        let stats = cache.stats().unwrap();
        assert_eq!(stats.cached_images, 1);
        assert!(stats.hit_rate_image > 0.0 && stats.hit_rate_image < 1.0);
    }

    #[test]
    fn cleanup_cascades_to_feature_rows_and_files() {
        let dir = TempDir::new().unwrap();
        let cache = SqliteCache::open(&dir.path().join("cache.db"), &dir.path().join("images")).unwrap();
        cache.put_image("https://example.com/a.jpg", &sample_jpeg()).unwrap();
        cache
            .put_features("https://example.com/a.jpg", &sample_features(), 0.1, (10, 10), false)
            .unwrap();

        // Force the row to look stale by back-dating last_accessed_at.
        {
            let conn = cache.conn.lock().unwrap();
            conn.execute("UPDATE cached_images SET last_accessed_at = 0", []).unwrap();
        }

        let report = cache.cleanup(30).unwrap();
        assert_eq!(report.images_removed, 1);
        assert_eq!(report.features_removed, 1);
        assert_eq!(cache.stats().unwrap().cached_images, 0);
    }

    fn sample_jpeg() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(16, 16, image::Rgb([200u8, 10, 10]));
        let mut bytes = Vec::new();
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, 90);
        image::DynamicImage::ImageRgb8(img).write_with_encoder(encoder).unwrap();
        bytes
    }
}
