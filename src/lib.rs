//! # Inferno Comics Matcher
//!
//! Identifies a photographed comic book cover against a candidate set of
//! digital covers.
//!
//! ## Architecture
//! The library is split into a transport-agnostic core engine and the
//! presentation layers built on top of it:
//! - `core` - the matching engine (cache, fetch, detect, features, matcher,
//!   pipeline, progress, session, config)
//! - `events` - progress event types and the local subscriber channel
//! - `error` - the crate's error taxonomy
//! - `http` - the async HTTP API layer
//! - `cli` - the command-line interface

pub mod core;
pub mod error;
pub mod events;
pub mod http;

pub use error::{MatcherError, Result};
