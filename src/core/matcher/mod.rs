//! Matcher (§4.5): ratio-test kNN matching and similarity fusion.

use crate::core::features::{BinarySet, ScaleInvariantSet, MIN_DESCRIPTORS_FOR_MATCH};
use serde::{Deserialize, Serialize};

/// Lowe's ratio-test threshold for the scale-invariant family.
pub const SIFT_RATIO: f32 = 0.75;
/// Lowe's ratio-test threshold for the binary family.
pub const ORB_RATIO: f32 = 0.70;
/// Fusion weight for the scale-invariant family when both contribute.
pub const SIFT_FUSION_WEIGHT: f32 = 0.7;
/// Fusion weight for the binary family when both contribute.
pub const ORB_FUSION_WEIGHT: f32 = 0.3;

/// Per-algorithm match detail (§3 "Match Detail").
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchDetail {
    pub total_matches: usize,
    pub good_matches: usize,
    pub similarity: f32,
}

/// Both families' match detail plus the fused overall similarity.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MatchResult {
    pub overall_similarity: f32,
    pub sift: MatchDetail,
    pub orb: MatchDetail,
}

/// Compare a query Feature Set against a candidate Feature Set.
pub fn match_features(
    query_sift: &ScaleInvariantSet,
    query_orb: &BinarySet,
    candidate_sift: &ScaleInvariantSet,
    candidate_orb: &BinarySet,
) -> MatchResult {
    let sift = match_sift(query_sift, candidate_sift);
    let orb = match_orb(query_orb, candidate_orb);
    let overall_similarity = fuse(sift.similarity, orb.similarity);
    MatchResult {
        overall_similarity,
        sift,
        orb,
    }
}

/// Fusion rules (§4.5), evaluated in order: both non-zero → weighted sum;
/// exactly one non-zero → that value; both zero → zero.
pub fn fuse(sift_similarity: f32, orb_similarity: f32) -> f32 {
    match (sift_similarity > 0.0, orb_similarity > 0.0) {
        (true, true) => SIFT_FUSION_WEIGHT * sift_similarity + ORB_FUSION_WEIGHT * orb_similarity,
        (true, false) => sift_similarity,
        (false, true) => orb_similarity,
        (false, false) => 0.0,
    }
}

fn match_sift(query: &ScaleInvariantSet, candidate: &ScaleInvariantSet) -> MatchDetail {
    if query.descriptors.len() < MIN_DESCRIPTORS_FOR_MATCH
        || candidate.descriptors.len() < MIN_DESCRIPTORS_FOR_MATCH
    {
        return MatchDetail::default();
    }

    let mut good_matches = 0usize;
    for q in &query.descriptors {
        if let Some((best, second)) = two_nearest(q, &candidate.descriptors, l2_distance) {
            if best < SIFT_RATIO * second {
                good_matches += 1;
            }
        }
    }

    let denom = query.count().max(candidate.count()).max(1) as f32;
    MatchDetail {
        total_matches: query.count(),
        good_matches,
        similarity: good_matches as f32 / denom,
    }
}

fn match_orb(query: &BinarySet, candidate: &BinarySet) -> MatchDetail {
    if query.descriptors.len() < MIN_DESCRIPTORS_FOR_MATCH
        || candidate.descriptors.len() < MIN_DESCRIPTORS_FOR_MATCH
    {
        return MatchDetail::default();
    }

    let mut good_matches = 0usize;
    for q in &query.descriptors {
        if let Some((best, second)) = two_nearest(q, &candidate.descriptors, hamming_distance) {
            if best < ORB_RATIO * second {
                good_matches += 1;
            }
        }
    }

    let denom = query.count().max(candidate.count()).max(1) as f32;
    MatchDetail {
        total_matches: query.count(),
        good_matches,
        similarity: good_matches as f32 / denom,
    }
}

/// Scan `candidates` for the nearest and second-nearest distance to `query`
/// under `distance`, without materializing the full distance matrix.
fn two_nearest<T, F>(query: &T, candidates: &[T], distance: F) -> Option<(f32, f32)>
where
    F: Fn(&T, &T) -> f32,
{
    let mut best = f32::INFINITY;
    let mut second = f32::INFINITY;
    for c in candidates {
        let d = distance(query, c);
        if d < best {
            second = best;
            best = d;
        } else if d < second {
            second = d;
        }
    }
    if second.is_finite() {
        Some((best, second))
    } else {
        None
    }
}

fn l2_distance(a: &[f32; crate::core::features::SIFT_DESCRIPTOR_DIM], b: &[f32; crate::core::features::SIFT_DESCRIPTOR_DIM]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum::<f32>().sqrt()
}

fn hamming_distance(a: &[u8; crate::core::features::ORB_DESCRIPTOR_BYTES], b: &[u8; crate::core::features::ORB_DESCRIPTOR_BYTES]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum::<u32>() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::features::keypoint::Keypoint;

    fn sift_set(vectors: Vec<[f32; 128]>) -> ScaleInvariantSet {
        ScaleInvariantSet {
            keypoints: vectors.iter().map(|_| Keypoint::new(0.0, 0.0, 1.0, 1.0)).collect(),
            descriptors: vectors,
        }
    }

    fn filled(value: f32, seed: usize) -> [f32; 128] {
        let mut v = [value; 128];
        v[seed % 128] += 1.0;
        v
    }

    #[test]
    fn identical_sets_match_every_descriptor_with_self() {
        let descriptors: Vec<[f32; 128]> = (0..20).map(|i| filled(i as f32 * 0.1, i)).collect();
        let set = sift_set(descriptors);
        let result = match_sift(&set, &set);
        assert!(result.similarity > 0.0);
    }

    #[test]
    fn short_descriptor_set_is_short_circuited() {
        let descriptors: Vec<[f32; 128]> = (0..5).map(|i| filled(i as f32, i)).collect();
        let set = sift_set(descriptors);
        let result = match_sift(&set, &set);
        assert_eq!(result.similarity, 0.0);
        assert_eq!(result.good_matches, 0);
    }

    #[test]
    fn fusion_both_zero_is_zero() {
        assert_eq!(fuse(0.0, 0.0), 0.0);
    }

    #[test]
    fn fusion_one_sided_passes_through() {
        assert_eq!(fuse(0.4, 0.0), 0.4);
        assert_eq!(fuse(0.0, 0.6), 0.6);
    }

    #[test]
    fn fusion_both_present_is_weighted_sum() {
        let fused = fuse(0.8, 0.4);
        assert!((fused - (0.7 * 0.8 + 0.3 * 0.4)).abs() < 1e-6);
    }

    #[test]
    fn hamming_distance_counts_bit_differences() {
        let a = [0u8; 32];
        let mut b = [0u8; 32];
        b[0] = 0b0000_0011;
        assert_eq!(hamming_distance(&a, &b), 2.0);
    }
}
