//! Pipeline input/output data model (§3 "Candidate Cover", "Match
//! Detail", "Ranked Result", §4.6 `SessionResult`).

use crate::core::matcher::MatchDetail;
use serde::{Deserialize, Serialize};

/// One uploaded query image, pre-decode (§6 `POST /image-matcher`).
#[derive(Debug, Clone)]
pub struct QueryImage {
    pub bytes: Vec<u8>,
    pub ext: String,
}

/// Upstream catalog record (§3 "Candidate Cover").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateCover {
    pub name: String,
    pub issue_number: String,
    pub urls: Vec<String>,
    pub comic_vine_id: Option<i64>,
    pub parent_comic_vine_id: Option<i64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverMetadata {
    pub name: String,
    pub issue_number: String,
    pub comic_vine_id: Option<i64>,
    pub parent_comic_vine_id: Option<i64>,
}

/// §7 error taxonomy, restricted to the per-candidate statuses a ranked
/// result can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    FailedDownload,
    FailedFeatures,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MatchDetails {
    pub sift: MatchDetail,
    pub orb: MatchDetail,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CandidateFeatureCounts {
    pub sift: usize,
    pub orb: usize,
}

/// One candidate's outcome against one query image (§3 "Ranked Result").
/// Field names are snake_case over the wire (§6): this is served directly
/// in `/image-matcher`, `/image-matcher-multiple`, and the persisted
/// session result document, matching `ImageMatcher.py`'s plain-dict JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedResult {
    pub url: String,
    pub similarity: f64,
    pub status: ResultStatus,
    pub match_details: MatchDetails,
    pub candidate_feature_counts: CandidateFeatureCounts,
    pub cover_metadata: Option<CoverMetadata>,
}

/// One query image's full outcome within a session.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QueryResult {
    pub matches: Vec<RankedResult>,
    pub total_matches: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SessionSummary {
    pub total_images_processed: u64,
    pub successful_images: u64,
    pub failed_images: u64,
    pub total_matches_all_images: u64,
    pub total_covers_processed: u64,
    pub total_urls_processed: u64,
}

/// The in-memory result of one `matchBatch` call, before being handed to
/// the Session & Result Store for JSON persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResult {
    pub session_id: String,
    pub queries: Vec<QueryResult>,
    pub summary: SessionSummary,
}
