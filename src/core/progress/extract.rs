//! Message-field extraction (§4.8 "Extraction"): pulls structured
//! counters out of free-text progress messages like `"Image 3/10:
//! cover.jpg"` or `"candidate 7/120"`.

use crate::events::ExtractedStats;
use regex::Regex;
use std::sync::OnceLock;

fn image_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)image\s+(\d+)\s*/\s*(\d+)").expect("valid regex"))
}

fn candidate_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)candidate\s+(\d+)\s*/\s*(\d+)").expect("valid regex"))
}

fn per_image_event_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(starting|completed|failed|processing)\b.*\bimage\b").expect("valid regex")
    })
}

/// Extract `{totalItems, processedItems}` from "Image i/N" or
/// "candidate i/N" style messages. `successfulItems`/`failedItems` are
/// left to the caller's explicit bookkeeping; this function only parses
/// what's present in the message text itself.
pub fn extract_stats(message: &str) -> ExtractedStats {
    if let Some(caps) = image_pattern().captures(message).or_else(|| candidate_pattern().captures(message)) {
        let processed: Option<u64> = caps.get(1).and_then(|m| m.as_str().parse().ok());
        let total: Option<u64> = caps.get(2).and_then(|m| m.as_str().parse().ok());
        return ExtractedStats {
            total_items: total,
            processed_items: processed,
            successful_items: None,
            failed_items: None,
        };
    }
    ExtractedStats::default()
}

/// Whether `message` names a per-image lifecycle event (§4.8 bypass rule
/// (e)): start, completion, or failure of a specific query image.
pub fn is_per_image_event(message: &str) -> bool {
    per_image_event_pattern().is_match(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_image_progress_counters() {
        let stats = extract_stats("Image 3/10: cover.jpg");
        assert_eq!(stats.processed_items, Some(3));
        assert_eq!(stats.total_items, Some(10));
    }

    #[test]
    fn extracts_candidate_progress_counters() {
        let stats = extract_stats("comparing candidate 7/120");
        assert_eq!(stats.processed_items, Some(7));
        assert_eq!(stats.total_items, Some(120));
    }

    #[test]
    fn unmatched_message_yields_defaults() {
        assert_eq!(extract_stats("finalizing results"), ExtractedStats::default());
    }

    #[test]
    fn per_image_events_are_detected() {
        assert!(is_per_image_event("Starting image 2/5"));
        assert!(is_per_image_event("Completed image 2/5: cover.jpg"));
        assert!(is_per_image_event("Failed image 2/5: decode error"));
        assert!(!is_per_image_event("comparing_images 40%"));
    }
}
