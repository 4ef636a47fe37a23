//! Session & Result Store (§4.7): per-session storage of query images,
//! candidate image copies, and the final session result document.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// One candidate's outcome against one query image, as persisted in the
/// session result document (§3 "Ranked Result"). Field names are
/// snake_case over the wire (§6), matching `ImageMatcherService.py`'s
/// plain-dict JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedMatch {
    pub url: String,
    pub local_url: Option<String>,
    pub similarity: f64,
    pub status: String,
}

/// One query image's outcome within a session (§3 "Session Result
/// Document").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub local_query_url: String,
    pub matches: Vec<PersistedMatch>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SessionSummary {
    pub total_images_processed: u64,
    pub successful_images: u64,
    pub failed_images: u64,
    pub total_matches_all_images: u64,
}

/// The persisted outcome of one session (§3 "Session Result Document").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResultDocument {
    pub session_id: String,
    pub timestamp_millis: u64,
    pub similarity_threshold: f64,
    pub queries: Vec<QueryOutcome>,
    pub summary: SessionSummary,
}

/// A minimal fallback document written when the full document can't be
/// serialized (§4.7 "On JSON serialization failure...").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinimalErrorDocument {
    pub session_id: String,
    pub timestamp_millis: u64,
    pub error: String,
}

pub struct SessionStore {
    storage_root: PathBuf,
}

impl SessionStore {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
        }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.storage_root.join("stored_images").join(session_id)
    }

    fn results_dir(&self) -> PathBuf {
        self.storage_root.join("results")
    }

    /// Create `<storageRoot>/stored_images/<sessionId>/` (§4.7).
    pub fn create_session_dir(&self, session_id: &str) -> Result<PathBuf, StoreError> {
        let dir = self.session_dir(session_id);
        std::fs::create_dir_all(&dir).map_err(|source| StoreError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        Ok(dir)
    }

    /// Persist one query image's bytes, content-addressed by SHA-256 so
    /// duplicate uploads within a session dedupe to the same file.
    /// Returns the path relative to the session directory.
    pub fn persist_query_image(&self, session_id: &str, bytes: &[u8], ext: &str) -> Result<String, StoreError> {
        let dir = self.create_session_dir(session_id)?;
        let hash = hex_sha256(bytes);
        let file_name = format!("query_{hash}.{ext}");
        let path = dir.join(&file_name);
        if !path.exists() {
            std::fs::write(&path, bytes).map_err(|source| StoreError::WriteImage {
                path: path.clone(),
                source,
            })?;
        }
        Ok(file_name)
    }

    /// Persist a candidate image copy, preferring cache bytes over a
    /// fresh re-download (§4.7). `url_hash` is the full cache key; only
    /// its first 8 hex characters appear in the file name.
    pub fn persist_candidate_image(
        &self,
        session_id: &str,
        bytes: &[u8],
        safe_name: &str,
        issue_number: &str,
        url_hash: &str,
        ext: &str,
    ) -> Result<String, StoreError> {
        let dir = self.create_session_dir(session_id)?;
        let short_hash = &url_hash[..url_hash.len().min(8)];
        let file_name = format!("candidate_{safe_name}_{issue_number}_{short_hash}.{ext}");
        let path = dir.join(&file_name);
        if !path.exists() {
            std::fs::write(&path, bytes).map_err(|source| StoreError::WriteImage {
                path: path.clone(),
                source,
            })?;
        }
        Ok(file_name)
    }

    /// Resolve `<sessionId>/<filename>` against the session directory,
    /// rejecting any path that would escape it (§8 invariant 8).
    pub fn resolve_stored_path(&self, session_id: &str, filename: &str) -> Result<PathBuf, StoreError> {
        let dir = self.session_dir(session_id);
        let candidate = dir.join(filename);
        let canonical_dir = dir.canonicalize().unwrap_or(dir.clone());
        let canonical_candidate = candidate
            .canonicalize()
            .unwrap_or_else(|_| normalize_lexically(&candidate));
        if !canonical_candidate.starts_with(&canonical_dir) {
            return Err(StoreError::PathTraversal);
        }
        Ok(candidate)
    }

    /// Write the session result document once (§4.7, §3 lifecycle
    /// "immutable thereafter"). Falls back to a minimal error document
    /// if serialization fails.
    pub fn write_result(&self, document: &SessionResultDocument) -> Result<PathBuf, StoreError> {
        let dir = self.results_dir();
        std::fs::create_dir_all(&dir).map_err(|source| StoreError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        let path = dir.join(format!("{}.json", document.session_id));

        match serde_json::to_string_pretty(&sanitize_document(document)) {
            Ok(json) => {
                std::fs::write(&path, json).map_err(|source| StoreError::WriteDocument {
                    path: path.clone(),
                    source,
                })?;
            }
            Err(e) => {
                let fallback = MinimalErrorDocument {
                    session_id: document.session_id.clone(),
                    timestamp_millis: document.timestamp_millis,
                    error: e.to_string(),
                };
                let json = serde_json::to_string_pretty(&fallback)
                    .unwrap_or_else(|_| "{\"error\":\"unserializable session document\"}".to_string());
                std::fs::write(&path, json).map_err(|source| StoreError::WriteDocument {
                    path: path.clone(),
                    source,
                })?;
            }
        }
        Ok(path)
    }

    /// Write a minimal error document directly (§7 `persistence_failure`
    /// recovery path, and the pipeline's own fatal-fault handling).
    pub fn write_error_document(&self, session_id: &str, error: &str) -> Result<PathBuf, StoreError> {
        let dir = self.results_dir();
        std::fs::create_dir_all(&dir).map_err(|source| StoreError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        let path = dir.join(format!("{session_id}.json"));
        let document = MinimalErrorDocument {
            session_id: session_id.to_string(),
            timestamp_millis: now_millis(),
            error: error.to_string(),
        };
        let json = serde_json::to_string_pretty(&document)
            .unwrap_or_else(|_| "{\"error\":\"unserializable error document\"}".to_string());
        std::fs::write(&path, json).map_err(|source| StoreError::WriteDocument {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    pub fn read_result(&self, session_id: &str) -> Result<String, StoreError> {
        let path = self.results_dir().join(format!("{session_id}.json"));
        std::fs::read_to_string(&path).map_err(|_| StoreError::NotFound {
            session_id: session_id.to_string(),
        })
    }
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Coerce every float in the document to a finite value (§4.7 "all
/// floating-point values coerced to finite IEEE-754 doubles"). `f64`
/// fields here already come from similarity scores in `[0,1]`, but NaN
/// can appear if a family's descriptor count denominator was zero
/// upstream; this is the last line of defense before serialization.
fn sanitize_document(document: &SessionResultDocument) -> SessionResultDocument {
    let mut sanitized = document.clone();
    if !sanitized.similarity_threshold.is_finite() {
        sanitized.similarity_threshold = 0.0;
    }
    for query in &mut sanitized.queries {
        for m in &mut query.matches {
            if !m.similarity.is_finite() {
                m.similarity = 0.0;
            }
        }
    }
    sanitized
}

/// Lexical `.`/`..` normalization for paths that don't exist yet (a
/// freshly-built candidate file name never has `.`/`..` segments, but a
/// malicious `filename` query parameter might).
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use predicates::prelude::*;
    use tempfile::TempDir;

    #[test]
    fn create_session_dir_lays_out_the_expected_path() {
        let dir = assert_fs::TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        store.create_session_dir("s1").unwrap();
        dir.child("stored_images").child("s1").assert(predicate::path::is_dir());
    }

    #[test]
    fn write_result_lands_under_results_as_json() {
        let dir = assert_fs::TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        let document = SessionResultDocument {
            session_id: "s1".to_string(),
            timestamp_millis: 0,
            similarity_threshold: 0.55,
            queries: vec![],
            summary: SessionSummary::default(),
        };
        store.write_result(&document).unwrap();
        dir.child("results").child("s1.json").assert(predicate::path::is_file());
        dir.child("results")
            .child("s1.json")
            .assert(predicate::str::contains("\"session_id\""));
    }

    #[test]
    fn persisting_the_same_query_bytes_twice_dedupes() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        let a = store.persist_query_image("s1", b"hello", "jpg").unwrap();
        let b = store.persist_query_image("s1", b"hello", "jpg").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_bytes_produce_different_files() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        let a = store.persist_query_image("s1", b"hello", "jpg").unwrap();
        let b = store.persist_query_image("s1", b"world", "jpg").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn path_traversal_outside_session_dir_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        store.create_session_dir("s1").unwrap();
        let result = store.resolve_stored_path("s1", "../../etc/passwd");
        assert!(result.is_err());
    }

    #[test]
    fn ordinary_filename_resolves_inside_session_dir() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        let session_dir = store.create_session_dir("s1").unwrap();
        std::fs::write(session_dir.join("candidate_x_1_abcd1234.jpg"), b"data").unwrap();
        let resolved = store.resolve_stored_path("s1", "candidate_x_1_abcd1234.jpg").unwrap();
        assert!(resolved.starts_with(&session_dir));
    }

    #[test]
    fn write_result_is_readable_back() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        let document = SessionResultDocument {
            session_id: "s1".to_string(),
            timestamp_millis: 0,
            similarity_threshold: 0.55,
            queries: vec![],
            summary: SessionSummary::default(),
        };
        store.write_result(&document).unwrap();
        let read_back = store.read_result("s1").unwrap();
        assert!(read_back.contains("\"session_id\""));
    }
}
