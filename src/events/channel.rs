//! Local progress subscriber stream (§4.8), backed by crossbeam-channel.
//!
//! The bounded variant never blocks a producer: on overflow it drops the
//! newest event and logs a warning (§5 "Backpressure"). The unbounded
//! variant exists for tests and CLI single-consumer use where bounding
//! isn't needed.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};

use super::Event;

/// Sends events to the local subscriber stream. Cheaply cloneable; safe
/// to hand to worker threads.
#[derive(Clone)]
pub struct EventSender {
    inner: Sender<Event>,
    bounded: bool,
}

impl EventSender {
    /// Send an event. If the receiver has been dropped, the event is
    /// silently discarded — progress reporting is always optional. If
    /// the channel is bounded and full, the event is dropped and a
    /// warning is logged; the call never blocks.
    pub fn send(&self, event: Event) {
        if self.bounded {
            match self.inner.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!("progress subscriber queue full, dropping newest event");
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        } else {
            let _ = self.inner.send(event);
        }
    }
}

/// Receives events from the local subscriber stream.
pub struct EventReceiver {
    inner: Receiver<Event>,
}

impl EventReceiver {
    pub fn recv(&self) -> Option<Event> {
        self.inner.recv().ok()
    }

    pub fn try_recv(&self) -> Option<Event> {
        self.inner.try_recv().ok()
    }

    /// Block for at most `timeout`, returning `None` on expiry or
    /// disconnection. Used by the SSE bridge to interleave heartbeats
    /// with real events.
    pub fn recv_timeout(&self, timeout: std::time::Duration) -> Option<Event> {
        self.inner.recv_timeout(timeout).ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        self.inner.iter()
    }
}

/// A bidirectional event channel between the core pipeline and any
/// subscriber (SSE handler, CLI progress bar, test harness).
pub struct EventChannel;

impl EventChannel {
    /// Default subscriber queue depth when none is configured.
    pub const DEFAULT_CAPACITY: usize = 256;

    /// Unbounded channel; used by callers (tests, the CLI's single
    /// local consumer) that don't need drop-on-overflow semantics.
    pub fn new() -> (EventSender, EventReceiver) {
        let (sender, receiver) = unbounded();
        (
            EventSender { inner: sender, bounded: false },
            EventReceiver { inner: receiver },
        )
    }

    /// Bounded channel with drop-newest-on-overflow semantics (§5
    /// "Backpressure").
    pub fn bounded(capacity: usize) -> (EventSender, EventReceiver) {
        let (sender, receiver) = bounded(capacity);
        (
            EventSender { inner: sender, bounded: true },
            EventReceiver { inner: receiver },
        )
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        EventChannel
    }
}

/// A no-op event sender for callers that don't need progress reporting.
pub fn null_sender() -> EventSender {
    let (sender, _receiver) = EventChannel::new();
    sender
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ProgressEvent, Stage};
    use std::thread;

    fn sample_event(progress: f64) -> Event {
        Event::Progress(ProgressEvent {
            session_id: "s1".to_string(),
            stage: Stage::ComparingImages,
            progress,
            message: "working".to_string(),
            extracted_stats: None,
            timestamp_millis: 0,
        })
    }

    #[test]
    fn events_can_be_sent_across_threads() {
        let (sender, receiver) = EventChannel::new();

        let handle = thread::spawn(move || {
            sender.send(sample_event(42.0));
        });
        handle.join().unwrap();

        match receiver.recv().unwrap() {
            Event::Progress(p) => assert_eq!(p.progress, 42.0),
            _ => panic!("wrong event type"),
        }
    }

    #[test]
    fn null_sender_does_not_panic() {
        let sender = null_sender();
        sender.send(sample_event(0.0));
    }

    #[test]
    fn bounded_channel_drops_newest_on_overflow_without_blocking() {
        let (sender, receiver) = EventChannel::bounded(2);

        sender.send(sample_event(1.0));
        sender.send(sample_event(2.0));
        sender.send(sample_event(3.0)); // should be dropped, not block

        assert!(receiver.try_recv().is_some());
        assert!(receiver.try_recv().is_some());
        assert!(receiver.try_recv().is_none());
    }
}
