//! Image Fetcher (§4.2): downloads candidate images over HTTP, consulting
//! the Cache Store first and writing through to it on a miss.
//!
//! Batch downloads run on a scoped rayon pool sized from config (default
//! 4-8 workers, §5 "Scheduling model"). A per-URL failure never aborts the
//! batch: it simply leaves that URL out of the returned map, which the
//! caller (the Match Pipeline) turns into a `failed_download` result.

use crate::core::cache::CacheStore;
use crate::error::FetchError;
use image::DynamicImage;
use std::collections::HashMap;
use std::time::Duration;

const USER_AGENT: &str = "inferno-comics-matcher/0.1";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_WORKERS: usize = 6;

pub struct ImageFetcher {
    client: reqwest::blocking::Client,
    workers: usize,
}

impl ImageFetcher {
    pub fn new(timeout: Duration, workers: usize) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .expect("reqwest client configuration is always valid");
        Self {
            client,
            workers: workers.max(1),
        }
    }

    /// Fetch one URL, consulting `cache` first. Returns both the decoded
    /// image and the raw bytes that were (or would have been) cached, so
    /// callers that only need bytes (e.g. session image copies) can reuse
    /// the download without decoding twice.
    pub fn fetch_one(
        &self,
        cache: &dyn CacheStore,
        url: &str,
    ) -> Result<(DynamicImage, Vec<u8>), FetchError> {
        if let Some(bytes) = cache.get_image(url).unwrap_or(None) {
            let image = crate::core::imgio::decode_bytes(&bytes).map_err(|e| FetchError::NotAnImage {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
            return Ok((image, bytes));
        }

        let bytes = self.download(url)?;
        let image = crate::core::imgio::decode_bytes(&bytes).map_err(|e| FetchError::NotAnImage {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let _ = cache.put_image(url, &bytes);
        Ok((image, bytes))
    }

    fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout { url: url.to_string() }
            } else {
                FetchError::RequestFailed {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        if !response.status().is_success() {
            return Err(FetchError::RequestFailed {
                url: url.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        response.bytes().map(|b| b.to_vec()).map_err(|e| FetchError::RequestFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    /// Batch fetch, coalescing duplicate URLs and never failing fast
    /// (§4.2). Downloads run on a scoped pool of `self.workers` threads.
    pub fn fetch_batch(
        &self,
        cache: &dyn CacheStore,
        urls: &[String],
    ) -> HashMap<String, DynamicImage> {
        let mut unique: Vec<&String> = Vec::new();
        for url in urls {
            if !unique.iter().any(|u| *u == url) {
                unique.push(url);
            }
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .expect("thread pool configuration is always valid");

        let results: Vec<(String, Option<DynamicImage>)> = pool.install(|| {
            use rayon::prelude::*;
            unique
                .par_iter()
                .map(|url| {
                    let outcome = self.fetch_one(cache, url).ok().map(|(image, _)| image);
                    ((*url).clone(), outcome)
                })
                .collect()
        });

        results
            .into_iter()
            .filter_map(|(url, image)| image.map(|img| (url, img)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::SqliteCache;
    use tempfile::TempDir;

    #[test]
    fn fetch_one_returns_failed_download_for_unreachable_host() {
        let dir = TempDir::new().unwrap();
        let cache = SqliteCache::open(&dir.path().join("cache.db"), &dir.path().join("images")).unwrap();
        let fetcher = ImageFetcher::new(Duration::from_millis(200), 1);
        let result = fetcher.fetch_one(&cache, "http://127.0.0.1:1/no-such-host.jpg");
        assert!(result.is_err());
    }

    #[test]
    fn fetch_batch_coalesces_duplicate_urls() {
        let dir = TempDir::new().unwrap();
        let cache = SqliteCache::open(&dir.path().join("cache.db"), &dir.path().join("images")).unwrap();
        let fetcher = ImageFetcher::new(Duration::from_millis(200), 2);
        let urls = vec![
            "http://127.0.0.1:1/a.jpg".to_string(),
            "http://127.0.0.1:1/a.jpg".to_string(),
        ];
        // Unreachable host: batch should simply omit the URL, not panic
        // or fail fast on the duplicate.
        let results = fetcher.fetch_batch(&cache, &urls);
        assert!(results.is_empty());
    }
}
