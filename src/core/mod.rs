//! # Core Module
//!
//! The transport-agnostic comic-cover matching engine.
//!
//! ## Modules
//! - `cache` - Persists downloaded images and extracted features
//! - `config` - Layered YAML + environment configuration
//! - `detect` - Locates and crops the dominant comic region in a photo
//! - `features` - Scale-invariant and binary descriptor extraction
//! - `fetch` - Downloads candidate images with bounded concurrency
//! - `imgio` - Shared decode/resize/read primitives
//! - `matcher` - Descriptor-set comparison and similarity fusion
//! - `pipeline` - Orchestrates the full matching workflow
//! - `progress` - Centralized, rate-limited progress reporting
//! - `session` - Per-session query/candidate image and result storage

pub mod cache;
pub mod config;
pub mod detect;
pub mod features;
pub mod fetch;
pub mod imgio;
pub mod matcher;
pub mod pipeline;
pub mod progress;
pub mod session;
