//! Progress event payloads (§3 "Progress Event", §4.8).

use serde::{Deserialize, Serialize};

/// The closed set of pipeline stages (§4.8), in their fixed sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ProcessingData,
    InitializingMatcher,
    ExtractingFeatures,
    ComparingImages,
    ProcessingResults,
    Finalizing,
    Complete,
    Error,
}

impl Stage {
    /// Fixed stage order, used to validate §8 invariant 1 (stages appear
    /// in this order for a session).
    pub const ORDER: [Stage; 8] = [
        Stage::ProcessingData,
        Stage::InitializingMatcher,
        Stage::ExtractingFeatures,
        Stage::ComparingImages,
        Stage::ProcessingResults,
        Stage::Finalizing,
        Stage::Complete,
        Stage::Error,
    ];

    pub fn rank(self) -> usize {
        Self::ORDER.iter().position(|s| *s == self).unwrap_or(usize::MAX)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Complete | Stage::Error)
    }
}

/// Structured counters the reporter extracts from message text (§4.8
/// "Extraction"), exposed to callers as `extractedStats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedStats {
    pub total_items: Option<u64>,
    pub processed_items: Option<u64>,
    pub successful_items: Option<u64>,
    pub failed_items: Option<u64>,
}

/// One progress update for a session (§3 "Progress Event").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub session_id: String,
    pub stage: Stage,
    pub progress: f64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_stats: Option<ExtractedStats>,
    pub timestamp_millis: u64,
}

/// Metadata for a single processed file, reported via
/// `reportProcessedFile` (§4.8) and forwarded to the outbound
/// `progress/processed-file` endpoint (§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedFileEvent {
    pub session_id: String,
    pub file_hash: String,
    pub stored_file_name: String,
    pub original_file_name: String,
}

/// What the local subscriber stream delivers: either a progress update
/// or a processed-file notification, carried on one channel so a single
/// subscriber sees the full, ordered event sequence for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    Progress(ProgressEvent),
    ProcessedFile(ProcessedFileEvent),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_order_matches_pipeline_sequence() {
        assert_eq!(Stage::ProcessingData.rank(), 0);
        assert!(Stage::ExtractingFeatures.rank() < Stage::ComparingImages.rank());
        assert!(Stage::Finalizing.rank() < Stage::Complete.rank());
    }

    #[test]
    fn complete_and_error_are_terminal() {
        assert!(Stage::Complete.is_terminal());
        assert!(Stage::Error.is_terminal());
        assert!(!Stage::ComparingImages.is_terminal());
    }
}
