//! # Feature Extractor (§4.4) and shared Feature Set types (§3)
//!
//! A comic cover's visual identity is captured as two independent descriptor
//! families, fused later by the matcher (§4.5):
//!
//! - `scale_invariant` — a from-scratch difference-of-Gaussians detector
//!   paired with a rotation-normalized gradient-histogram descriptor,
//!   playing the role of the "scale-invariant set" (up to 1000 keypoints,
//!   128-D float descriptors).
//! - `binary` — a FAST-corner detector paired with a BRIEF-style binary
//!   descriptor, playing the role of the "binary set" (up to 1000
//!   keypoints, fixed-width binary descriptors).
//!
//! Both families are extracted independently; a failure in one is
//! non-fatal and contributes an empty set (§4.4).

pub mod binary;
mod extractor;
pub mod keypoint;
pub mod scale_invariant;
pub mod serialize;

pub use extractor::{extract, FeatureSet};
pub use keypoint::Keypoint;

/// Dimensionality of a scale-invariant descriptor.
pub const SIFT_DESCRIPTOR_DIM: usize = 128;
/// Width, in bytes, of a binary descriptor (256 bits).
pub const ORB_DESCRIPTOR_BYTES: usize = 32;
/// A family is short-circuited by the matcher below this many entries (§4.5).
pub const MIN_DESCRIPTORS_FOR_MATCH: usize = 11;

/// The scale-invariant descriptor family of a Feature Set (§3).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScaleInvariantSet {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<[f32; SIFT_DESCRIPTOR_DIM]>,
}

impl ScaleInvariantSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.keypoints.len()
    }
}

/// The binary descriptor family of a Feature Set (§3).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BinarySet {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<[u8; ORB_DESCRIPTOR_BYTES]>,
}

impl BinarySet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.keypoints.len()
    }
}
