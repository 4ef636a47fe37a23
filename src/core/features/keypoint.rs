//! Keypoint type shared by both descriptor families (§3 "Feature Set").

use serde::{Deserialize, Serialize};

/// A single detected keypoint, carrying enough information to reconstruct
/// the image-space geometry used during matching and scoring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// Diameter of the region the descriptor was computed over.
    pub size: f32,
    /// Dominant orientation in degrees, `[0, 360)`.
    pub angle: f32,
    /// Detector-specific strength used to rank and truncate keypoints.
    pub response: f32,
    /// Pyramid octave the keypoint was found in (0 for single-scale detectors).
    pub octave: i32,
    /// Detector-assigned class id; unused here but carried for schema parity.
    pub class_id: i32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, size: f32, response: f32) -> Self {
        Self {
            x,
            y,
            size,
            angle: 0.0,
            response,
            octave: 0,
            class_id: -1,
        }
    }
}
