//! # Progress Events
//!
//! Carries the Progress Reporter's event sequence to local subscribers
//! (SSE handlers, the CLI's progress bar, tests) independent of the
//! external HTTP transport in `core::progress`.
//!
//! ## Example
//! ```rust,ignore
//! let (sender, receiver) = EventChannel::bounded(256);
//!
//! std::thread::spawn(move || {
//!     for event in receiver.iter() {
//!         match event {
//!             Event::Progress(p) => println!("{:?} {}%", p.stage, p.progress),
//!             Event::ProcessedFile(f) => println!("stored {}", f.stored_file_name),
//!         }
//!     }
//! });
//! ```

mod channel;
mod types;

pub use channel::{null_sender, EventChannel, EventReceiver, EventSender};
pub use types::{Event, ExtractedStats, ProcessedFileEvent, ProgressEvent, Stage};
