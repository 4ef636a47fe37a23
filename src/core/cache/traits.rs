//! Cache Store trait (§4.1). Implementations must satisfy: writes are
//! atomic per record; `put_features` requires a prior `put_image` for the
//! same URL; concurrent `put_image` calls for the same URL are idempotent.

use super::{CacheStats, CachedFeatureRecord, CleanupReport};
use crate::core::features::FeatureSet;
use crate::error::CacheError;

pub trait CacheStore: Send + Sync {
    /// `getImage(url) → bytes | miss` (§4.1). A missing backing file with an
    /// existing row is treated as a miss (self-healing).
    fn get_image(&self, url: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// `putImage(url, bytes) → path`. Writes bytes to
    /// `<cacheDir>/<urlHash>.jpg` and upserts the row.
    fn put_image(&self, url: &str, bytes: &[u8]) -> Result<std::path::PathBuf, CacheError>;

    /// `getFeatures(url) → FeatureSet | miss`.
    fn get_features(&self, url: &str) -> Result<Option<CachedFeatureRecord>, CacheError>;

    /// `putFeatures(url, featureSet, processingTime, shape, wasCropped)`.
    fn put_features(
        &self,
        url: &str,
        features: &FeatureSet,
        processing_time_seconds: f64,
        image_shape: (u32, u32),
        was_cropped: bool,
    ) -> Result<(), CacheError>;

    /// `stats() → {cachedImages, cachedFeatures, diskBytes,
    /// processingTimeSaved, hitRateImage, hitRateFeature}`.
    fn stats(&self) -> Result<CacheStats, CacheError>;

    /// Remove image rows whose `lastAccessedAt` predates the cutoff,
    /// cascading feature rows and deleting backing files.
    fn cleanup(&self, older_than_days: u32) -> Result<CleanupReport, CacheError>;
}
