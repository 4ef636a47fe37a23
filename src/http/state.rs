//! Shared state for the HTTP API layer (§6).

use crate::core::pipeline::Services;
use crate::events::EventReceiver;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Liveness of an asynchronously-running session, tracked for
/// `GET /image-matcher/status` (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Running,
    Complete,
    Error,
}

pub struct SessionEntry {
    pub status: SessionStatus,
    /// Taken by the first SSE subscriber; subsequent calls see `None`
    /// (one subscriber stream per session, matching one pipeline run).
    pub receiver: Option<EventReceiver>,
}

#[derive(Clone)]
pub struct AppState {
    pub services: Arc<Services>,
    pub sessions: Arc<Mutex<HashMap<String, SessionEntry>>>,
    pub config_path: PathBuf,
    /// Base URL of the external progress service (§6 "External progress
    /// service"), if one was configured; `None` disables outbound HTTP
    /// progress transport entirely (local subscriber stream still works).
    pub progress_base_url: Option<String>,
}

impl AppState {
    pub fn new(services: Arc<Services>, config_path: PathBuf, progress_base_url: Option<String>) -> Self {
        Self {
            services,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            config_path,
            progress_base_url,
        }
    }

    pub fn register_session(&self, session_id: String, receiver: EventReceiver) {
        self.sessions.lock().expect("session registry poisoned").insert(
            session_id,
            SessionEntry {
                status: SessionStatus::Running,
                receiver: Some(receiver),
            },
        );
    }

    pub fn mark_status(&self, session_id: &str, status: SessionStatus) {
        if let Some(entry) = self.sessions.lock().expect("session registry poisoned").get_mut(session_id) {
            entry.status = status;
        }
    }

    pub fn status_of(&self, session_id: &str) -> Option<SessionStatus> {
        self.sessions
            .lock()
            .expect("session registry poisoned")
            .get(session_id)
            .map(|e| e.status)
    }

    pub fn take_receiver(&self, session_id: &str) -> Option<EventReceiver> {
        self.sessions
            .lock()
            .expect("session registry poisoned")
            .get_mut(session_id)
            .and_then(|e| e.receiver.take())
    }
}
