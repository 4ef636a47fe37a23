//! Progress Reporter (§4.8): the single object through which every other
//! component reports progress for one session. Owns the stage machine,
//! rate limiting, message-field extraction, and the dual transport
//! (external HTTP POST + local subscriber channel).
//!
//! Grounded in `original_source/inferno-comics-recog/src/models/SSEProgressTracker.py`
//! for the event shape (`{type, sessionId, stage, progress, message,
//! timestamp}` / `{type:'complete', ...}` / `{type:'error', ...}`) and the
//! "log a warning and drop on overflow" local-queue policy.

mod extract;
mod transport;

pub use transport::{HttpProgressTransport, NullTransport, ProgressTransport};

use crate::events::{Event, EventSender, ExtractedStats, ProgressEvent, Stage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const DEFAULT_MIN_INTERVAL_MS: u64 = 200;
const RATE_LIMIT_DELTA_THRESHOLD: f64 = 3.0;
const ALWAYS_SEND_FIRST_N: u64 = 5;

struct RateLimitState {
    last_sent_at: Option<Instant>,
    last_stage: Option<Stage>,
    last_progress: f64,
}

/// Per-session progress reporter. One instance is owned by one Match
/// Pipeline invocation and shared (via `Arc`) with its worker threads.
pub struct ProgressReporter {
    session_id: String,
    transport: Box<dyn ProgressTransport>,
    local: EventSender,
    min_interval: Duration,
    state: Mutex<RateLimitState>,
    updates_sent: AtomicU64,
}

impl ProgressReporter {
    pub fn new(session_id: impl Into<String>, transport: Box<dyn ProgressTransport>, local: EventSender) -> Self {
        Self {
            session_id: session_id.into(),
            transport,
            local,
            min_interval: Duration::from_millis(DEFAULT_MIN_INTERVAL_MS),
            state: Mutex::new(RateLimitState {
                last_sent_at: None,
                last_stage: None,
                last_progress: -1.0,
            }),
            updates_sent: AtomicU64::new(0),
        }
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// `update(stage, progress, message)` (§4.8). Applies rate limiting
    /// and bypass rules, then fans out to both transports on bypass.
    pub fn update(&self, stage: Stage, progress: f64, message: impl Into<String>) {
        let message = message.into();
        let progress = progress.clamp(0.0, 100.0);

        if !self.should_send(stage, progress, &message) {
            return;
        }
        self.mark_sent(stage, progress);
        self.emit(stage, progress, message);
    }

    /// `complete(result)`: always delivered, retries once on transport
    /// failure (§4.8, §5 "Cancellation and timeouts").
    pub fn complete(&self, message: impl Into<String>) {
        let message = message.into();
        self.emit(Stage::Complete, 100.0, message.clone());
        self.transport.send_complete(&self.session_id, &message);
    }

    /// `error(message)`: always delivered, exactly once (§8 invariant 7).
    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        self.emit(Stage::Error, 100.0, message.clone());
        self.transport.send_error(&self.session_id, &message);
    }

    /// `reportProcessedFile(metadata)` (§4.8).
    pub fn report_processed_file(&self, file_hash: &str, stored_file_name: &str, original_file_name: &str) {
        self.transport
            .send_processed_file(&self.session_id, file_hash, stored_file_name, original_file_name);
        self.local.send(Event::ProcessedFile(crate::events::ProcessedFileEvent {
            session_id: self.session_id.clone(),
            file_hash: file_hash.to_string(),
            stored_file_name: stored_file_name.to_string(),
            original_file_name: original_file_name.to_string(),
        }));
    }

    fn should_send(&self, stage: Stage, progress: f64, message: &str) -> bool {
        if self.updates_sent.load(Ordering::Relaxed) < ALWAYS_SEND_FIRST_N {
            return true;
        }
        if stage.is_terminal() || progress >= 100.0 {
            return true;
        }
        if extract::is_per_image_event(message) {
            return true;
        }

        let state = self.state.lock().expect("progress state poisoned");
        if state.last_stage != Some(stage) {
            return true;
        }
        if (progress - state.last_progress).abs() >= RATE_LIMIT_DELTA_THRESHOLD {
            return true;
        }
        match state.last_sent_at {
            Some(last) => last.elapsed() >= self.min_interval,
            None => true,
        }
    }

    fn mark_sent(&self, stage: Stage, progress: f64) {
        let mut state = self.state.lock().expect("progress state poisoned");
        state.last_sent_at = Some(Instant::now());
        state.last_stage = Some(stage);
        state.last_progress = progress;
        self.updates_sent.fetch_add(1, Ordering::Relaxed);
    }

    fn emit(&self, stage: Stage, progress: f64, message: String) {
        let stats = extract::extract_stats(&message);
        let event = ProgressEvent {
            session_id: self.session_id.clone(),
            stage,
            progress,
            message,
            extracted_stats: non_empty(stats),
            timestamp_millis: now_millis(),
        };
        self.local.send(Event::Progress(event.clone()));
        self.transport.send_update(&event);
    }
}

fn non_empty(stats: ExtractedStats) -> Option<ExtractedStats> {
    if stats == ExtractedStats::default() {
        None
    } else {
        Some(stats)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::NullTransport;
    use crate::events::EventChannel;

    fn reporter() -> (ProgressReporter, crate::events::EventReceiver) {
        let (sender, receiver) = EventChannel::new();
        let reporter = ProgressReporter::new("s1", Box::new(NullTransport), sender);
        (reporter, receiver)
    }

    #[test]
    fn first_five_updates_are_always_sent() {
        let (reporter, receiver) = reporter();
        for i in 0..5 {
            reporter.update(Stage::ComparingImages, i as f64 * 0.1, "tick");
        }
        let mut count = 0;
        while receiver.try_recv().is_some() {
            count += 1;
        }
        assert_eq!(count, 5);
    }

    #[test]
    fn small_deltas_are_rate_limited_after_warmup() {
        let (reporter, receiver) = reporter();
        for _ in 0..5 {
            reporter.update(Stage::ComparingImages, 50.0, "warmup");
        }
        while receiver.try_recv().is_some() {}

        reporter.update(Stage::ComparingImages, 50.1, "tiny delta");
        assert!(receiver.try_recv().is_none());
    }

    #[test]
    fn large_delta_bypasses_rate_limit() {
        let (reporter, receiver) = reporter();
        for _ in 0..5 {
            reporter.update(Stage::ComparingImages, 50.0, "warmup");
        }
        while receiver.try_recv().is_some() {}

        reporter.update(Stage::ComparingImages, 55.0, "jump");
        assert!(receiver.try_recv().is_some());
    }

    #[test]
    fn stage_transition_bypasses_rate_limit() {
        let (reporter, receiver) = reporter();
        for _ in 0..5 {
            reporter.update(Stage::ComparingImages, 50.0, "warmup");
        }
        while receiver.try_recv().is_some() {}

        reporter.update(Stage::ProcessingResults, 50.0, "next stage");
        assert!(receiver.try_recv().is_some());
    }

    #[test]
    fn completion_is_always_delivered() {
        let (reporter, receiver) = reporter();
        reporter.complete("done");
        let mut saw_complete = false;
        while let Some(Event::Progress(p)) = receiver.try_recv() {
            if p.stage == Stage::Complete {
                saw_complete = true;
            }
        }
        assert!(saw_complete);
    }
}
