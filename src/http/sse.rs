//! Bridges the synchronous local subscriber stream onto an async SSE
//! response (§6 `GET /image-matcher/progress`). Frames are
//! `data: <json>\n\n` with `type ∈ {progress, complete, error, heartbeat}`.

use crate::events::Event;
use serde_json::json;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const BRIDGE_CHANNEL_CAPACITY: usize = 64;

/// Spawn a blocking bridge thread that forwards `receiver`'s events as
/// JSON strings into a tokio mpsc channel, injecting a heartbeat frame
/// whenever no event arrives within [`HEARTBEAT_INTERVAL`].
pub fn bridge(receiver: crate::events::EventReceiver) -> ReceiverStream<String> {
    let (tx, rx) = tokio::sync::mpsc::channel(BRIDGE_CHANNEL_CAPACITY);

    std::thread::spawn(move || loop {
        match receiver.recv_timeout(HEARTBEAT_INTERVAL) {
            Some(event) => {
                let payload = encode(&event);
                if tx.blocking_send(payload).is_err() {
                    break;
                }
                if is_terminal(&event) {
                    break;
                }
            }
            None => {
                let heartbeat = json!({ "type": "heartbeat" }).to_string();
                if tx.blocking_send(heartbeat).is_err() {
                    break;
                }
            }
        }
    });

    ReceiverStream::new(rx)
}

fn encode(event: &Event) -> String {
    match event {
        Event::Progress(p) if p.stage.is_terminal() => {
            let kind = if p.stage == crate::events::Stage::Complete { "complete" } else { "error" };
            json!({
                "type": kind,
                "sessionId": p.session_id,
                "stage": p.stage,
                "progress": p.progress,
                "message": p.message,
            })
            .to_string()
        }
        Event::Progress(p) => json!({
            "type": "progress",
            "sessionId": p.session_id,
            "stage": p.stage,
            "progress": p.progress,
            "message": p.message,
            "extractedStats": p.extracted_stats,
        })
        .to_string(),
        Event::ProcessedFile(f) => json!({
            "type": "processed_file",
            "sessionId": f.session_id,
            "fileHash": f.file_hash,
            "storedFileName": f.stored_file_name,
        })
        .to_string(),
    }
}

fn is_terminal(event: &Event) -> bool {
    matches!(event, Event::Progress(p) if p.stage.is_terminal())
}
