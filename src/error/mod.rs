//! # Error Module
//!
//! Layered error types for the comic cover matching service.
//!
//! ## Design Principles
//! - Per-candidate and per-query failures are never propagated as `Err` —
//!   they are captured as `status` fields on results (see `core::pipeline`).
//!   Only truly unrecoverable faults reach these types.
//! - Each sub-error maps onto exactly one §7 error kind, surfaced to HTTP
//!   callers via `ErrorKind`.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level application error.
#[derive(Error, Debug)]
pub enum MatcherError {
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("detect error: {0}")]
    Detect(#[from] DetectError),

    #[error("feature extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("match error: {0}")]
    Match(#[from] MatchErrorKind),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("session store error: {0}")]
    Store(#[from] StoreError),

    #[error("progress error: {0}")]
    Progress(#[from] ProgressError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// The closed set of error kinds from §7, used to pick an HTTP status and
/// to label error progress/session documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    DecodeFailure,
    FailedDownload,
    FailedFeatures,
    PersistenceFailure,
    TransportFailure,
    Fatal,
}

impl MatcherError {
    /// Classify this error into the closed §7 error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MatcherError::Cache(_) => ErrorKind::PersistenceFailure,
            MatcherError::Fetch(_) => ErrorKind::FailedDownload,
            MatcherError::Detect(_) => ErrorKind::Fatal,
            MatcherError::Extract(e) => match e {
                ExtractError::Decode { .. } => ErrorKind::DecodeFailure,
                _ => ErrorKind::FailedFeatures,
            },
            MatcherError::Match(_) => ErrorKind::Fatal,
            MatcherError::Pipeline(e) => match e {
                PipelineError::EmptyCandidates | PipelineError::BadRequest(_) => {
                    ErrorKind::BadRequest
                }
                _ => ErrorKind::Fatal,
            },
            MatcherError::Store(_) => ErrorKind::PersistenceFailure,
            MatcherError::Progress(_) => ErrorKind::TransportFailure,
            MatcherError::Config(_) => ErrorKind::Fatal,
        }
    }
}

/// Errors from the Cache Store (§4.1).
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("failed to open cache database at {path}: {reason}")]
    OpenFailed { path: PathBuf, reason: String },

    #[error("database query failed: {0}")]
    QueryFailed(String),

    #[error("cache row exists for {url_hash} but a feature record requires a prior image row")]
    MissingImageRow { url_hash: String },

    #[error("failed to serialize feature data: {0}")]
    SerializationFailed(String),

    #[error("failed to write cached image bytes for {url_hash}: {source}")]
    WriteFailed {
        url_hash: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the Image Fetcher (§4.2).
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("request to {url} failed: {reason}")]
    RequestFailed { url: String, reason: String },

    #[error("response from {url} was not a decodable image: {reason}")]
    NotAnImage { url: String, reason: String },
}

/// Errors from the Comic-Area Detector (§4.3).
#[derive(Error, Debug)]
pub enum DetectError {
    #[error("input image has zero area")]
    EmptyImage,
}

/// Errors from the Feature Extractor (§4.4).
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("failed to decode image: {reason}")]
    Decode { reason: String },

    #[error("both descriptor families produced zero keypoints")]
    NoKeypoints,
}

/// Errors from the Matcher (§4.5).
#[derive(Error, Debug)]
pub enum MatchErrorKind {
    #[error("descriptor dimensionality mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Errors from the Match Pipeline (§4.6).
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("candidate_covers list is empty")]
    EmptyCandidates,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("no query images could be decoded")]
    AllQueriesFailed,

    #[error("unexpected fault during {stage}: {reason}")]
    Unexpected { stage: String, reason: String },
}

/// Errors from the Session & Result Store (§4.7).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to create session directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to persist image at {path}: {source}")]
    WriteImage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize session result document: {0}")]
    SerializationFailed(String),

    #[error("failed to write session result document at {path}: {source}")]
    WriteDocument {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("session document not found for session {session_id}")]
    NotFound { session_id: String },

    #[error("resolved path escapes the session directory")]
    PathTraversal,
}

/// Errors from the Progress Reporter (§4.8). All of these are logged and
/// swallowed by the reporter itself; they exist so the transport layer has
/// something concrete to log.
#[derive(Error, Debug)]
pub enum ProgressError {
    #[error("progress transport to {url} failed: {reason}")]
    TransportFailed { url: String, reason: String },

    #[error("progress transport to {url} returned status {status}")]
    NonSuccessStatus { url: String, status: u16 },
}

/// Errors from Configuration (§4.9).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config YAML: {0}")]
    ParseFailed(String),

    #[error("unknown performance preset: {0}")]
    UnknownPreset(String),

    #[error("invalid similarity_threshold value: {0}")]
    InvalidThreshold(String),
}

/// Convenience `Result` alias for fatal, pipeline-terminating errors.
pub type Result<T> = std::result::Result<T, MatcherError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_error_maps_to_persistence_failure() {
        let err = MatcherError::Cache(CacheError::QueryFailed("disk full".into()));
        assert_eq!(err.kind(), ErrorKind::PersistenceFailure);
    }

    #[test]
    fn empty_candidates_maps_to_bad_request() {
        let err = MatcherError::Pipeline(PipelineError::EmptyCandidates);
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn decode_failure_is_distinguished_from_feature_failure() {
        let decode = MatcherError::Extract(ExtractError::Decode {
            reason: "bad header".into(),
        });
        let features = MatcherError::Extract(ExtractError::NoKeypoints);
        assert_eq!(decode.kind(), ErrorKind::DecodeFailure);
        assert_eq!(features.kind(), ErrorKind::FailedFeatures);
    }

    #[test]
    fn transport_error_never_escalates_to_fatal() {
        let err = MatcherError::Progress(ProgressError::NonSuccessStatus {
            url: "http://x/progress/update".into(),
            status: 500,
        });
        assert_eq!(err.kind(), ErrorKind::TransportFailure);
    }
}
