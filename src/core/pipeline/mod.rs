//! # Match Pipeline (§4.6)
//!
//! Orchestrates one `matchBatch(sessionId, queryImages[], candidateCovers[])`
//! call end to end: preprocess each query image, resolve every candidate
//! URL (cache hit or fetch+extract+cache), match, rank, and persist.
//!
//! ## Stages and progress bands
//! 1. `processing_data` (12→20%) — flatten candidates, reject empty input
//! 2. `initializing_matcher` (20→25%) — size the worker pool
//! 3. `extracting_features` (25→35%) — preprocess + extract each query image
//! 4. `comparing_images` (35→85%) — per-candidate cache/fetch/extract/match
//! 5. `processing_results` (85→95%) — attach metadata, sort by similarity
//! 6. `finalizing` (95→100%) — truncate to top-K, persist, write the document

mod model;
mod stages;

pub use model::{
    CandidateCover, CoverMetadata, MatchDetails, QueryImage, QueryResult, RankedResult,
    ResultStatus, SessionResult,
};

use crate::core::cache::CacheStore;
use crate::core::config::Config;
use crate::core::fetch::ImageFetcher;
use crate::core::progress::ProgressReporter;
use crate::core::session::SessionStore;
use crate::error::PipelineError;
use std::sync::Arc;

/// Shared, injected dependencies (Design Note: "injected `Services`
/// instead of globals"). One instance is built per process and handed to
/// every pipeline invocation.
pub struct Services {
    pub cache: Arc<dyn CacheStore>,
    pub fetcher: Arc<ImageFetcher>,
    pub session_store: Arc<SessionStore>,
    pub config: Config,
}

/// Runs one session end to end. This is `matchBatch` (§4.6).
pub fn match_batch(
    session_id: &str,
    query_images: Vec<QueryImage>,
    candidate_covers: Vec<CandidateCover>,
    services: &Services,
    reporter: &ProgressReporter,
) -> Result<SessionResult, PipelineError> {
    stages::run(session_id, query_images, candidate_covers, services, reporter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::SqliteCache;
    use crate::core::progress::NullTransport;
    use crate::events::{EventChannel, Stage};
    use std::time::Duration;
    use tempfile::TempDir;

    fn services(dir: &TempDir) -> Services {
        let cache = SqliteCache::open(&dir.path().join("cache.db"), &dir.path().join("images")).unwrap();
        Services {
            cache: Arc::new(cache),
            fetcher: Arc::new(ImageFetcher::new(Duration::from_millis(300), 2)),
            session_store: Arc::new(SessionStore::new(dir.path().join("storage"))),
            config: Config::default(),
        }
    }

    #[test]
    fn empty_candidates_is_rejected() {
        let dir = TempDir::new().unwrap();
        let services = services(&dir);
        let (sender, _receiver) = EventChannel::new();
        let reporter = ProgressReporter::new("s1", Box::new(NullTransport), sender);

        let result = match_batch("s1", vec![], vec![], &services, &reporter);
        assert!(matches!(result, Err(PipelineError::EmptyCandidates)));
    }

    #[test]
    fn undecodable_query_image_yields_error_result_not_a_panic() {
        let dir = TempDir::new().unwrap();
        let services = services(&dir);
        let (sender, _receiver) = EventChannel::new();
        let reporter = ProgressReporter::new("s1", Box::new(NullTransport), sender);

        let query = QueryImage {
            bytes: b"not an image".to_vec(),
            ext: "jpg".to_string(),
        };
        let cover = CandidateCover {
            name: "Amazing".to_string(),
            issue_number: "1".to_string(),
            urls: vec!["http://127.0.0.1:1/cover.jpg".to_string()],
            comic_vine_id: None,
            parent_comic_vine_id: None,
            error: None,
        };

        let result = match_batch("s1", vec![query], vec![cover], &services, &reporter).unwrap();
        assert_eq!(result.queries.len(), 1);
        assert_eq!(result.queries[0].total_matches, 0);
        assert!(result.queries[0].error.is_some());
    }

    #[test]
    fn stage_rank_ordering_matches_pipeline_sequence() {
        assert!(Stage::ProcessingData.rank() < Stage::InitializingMatcher.rank());
        assert!(Stage::ComparingImages.rank() < Stage::ProcessingResults.rank());
    }
}
