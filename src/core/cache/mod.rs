//! # Cache Store (§4.1)
//!
//! Persistent two-table store (`cached_images`, `cached_features`) with a
//! filesystem side-channel for image bytes, keyed by the hex MD5 of the
//! source URL. A feature record may exist only when its image row already
//! exists; deleting the image row cascades to the feature row and its
//! backing file.

mod sqlite;
mod traits;

pub use sqlite::SqliteCache;
pub use traits::CacheStore;

use crate::core::features::FeatureSet;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// `urlHash` = hex MD5 of the URL string (§3 "Cached Image").
pub fn url_hash(url: &str) -> String {
    let digest = md5::compute(url.as_bytes());
    format!("{digest:x}")
}

/// A downloaded candidate image, tracked by the cache (§3 "Cached Image").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedImage {
    pub url_hash: String,
    pub url: String,
    pub byte_size: u64,
    pub created_at: SystemTime,
    pub last_accessed_at: SystemTime,
}

/// A cached extraction result (§3 "Cached Feature Record").
#[derive(Debug, Clone)]
pub struct CachedFeatureRecord {
    pub url_hash: String,
    pub url: String,
    pub features: FeatureSet,
    pub processing_time_seconds: f64,
    pub image_shape: (u32, u32),
    pub was_cropped: bool,
    pub created_at: SystemTime,
    pub last_accessed_at: SystemTime,
}

/// Aggregate cache statistics (§4.1 `stats()`).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub cached_images: u64,
    pub cached_features: u64,
    pub disk_bytes: u64,
    pub processing_time_saved: f64,
    pub hit_rate_image: f64,
    pub hit_rate_feature: f64,
}

/// Outcome of a `cleanup(older_than_days)` sweep.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupReport {
    pub images_removed: u64,
    pub features_removed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_hash_is_stable_and_hex() {
        let a = url_hash("https://example.com/cover.jpg");
        let b = url_hash("https://example.com/cover.jpg");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn url_hash_differs_for_different_urls() {
        assert_ne!(
            url_hash("https://example.com/a.jpg"),
            url_hash("https://example.com/b.jpg")
        );
    }
}
