//! Fixed binary schema for keypoint/descriptor persistence (Design Note
//! "Serialized foreign objects → explicit schema"). Each family is stored
//! as `header | keypoints | flat descriptor array` so the cache can
//! round-trip a `FeatureSet` without depending on any language-native
//! pickling format.
//!
//! Layout (little-endian throughout):
//! ```text
//! magic: [u8; 4]     // b"SIFT" or b"ORBB"
//! version: u16        // schema version, currently 1
//! count: u32          // number of keypoints
//! descriptor_dim: u32  // 128 for SIFT-like, 32 (bytes) for ORB-like
//! keypoints[count]:    // x,y,size,angle,response: f32 ×5, octave,class_id: i32 ×2
//! descriptors: flat array, `count * descriptor_dim` elements
//! ```

use super::keypoint::Keypoint;
use super::{BinarySet, ScaleInvariantSet, ORB_DESCRIPTOR_BYTES, SIFT_DESCRIPTOR_DIM};
use crate::error::CacheError;

const SIFT_MAGIC: &[u8; 4] = b"SIFT";
const ORB_MAGIC: &[u8; 4] = b"ORBB";
const SCHEMA_VERSION: u16 = 1;
const KEYPOINT_BYTES: usize = 4 * 5 + 4 * 2;

fn write_keypoint(buf: &mut Vec<u8>, kp: &Keypoint) {
    buf.extend_from_slice(&kp.x.to_le_bytes());
    buf.extend_from_slice(&kp.y.to_le_bytes());
    buf.extend_from_slice(&kp.size.to_le_bytes());
    buf.extend_from_slice(&kp.angle.to_le_bytes());
    buf.extend_from_slice(&kp.response.to_le_bytes());
    buf.extend_from_slice(&kp.octave.to_le_bytes());
    buf.extend_from_slice(&kp.class_id.to_le_bytes());
}

fn read_keypoint(bytes: &[u8]) -> Result<Keypoint, CacheError> {
    if bytes.len() < KEYPOINT_BYTES {
        return Err(CacheError::SerializationFailed(
            "truncated keypoint record".to_string(),
        ));
    }
    let f = |i: usize| f32::from_le_bytes(bytes[i * 4..i * 4 + 4].try_into().unwrap());
    let i = |off: usize| i32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
    Ok(Keypoint {
        x: f(0),
        y: f(1),
        size: f(2),
        angle: f(3),
        response: f(4),
        octave: i(20),
        class_id: i(24),
    })
}

pub fn serialize_sift(set: &ScaleInvariantSet) -> Vec<u8> {
    let mut buf = Vec::with_capacity(
        10 + set.keypoints.len() * KEYPOINT_BYTES + set.descriptors.len() * SIFT_DESCRIPTOR_DIM * 4,
    );
    buf.extend_from_slice(SIFT_MAGIC);
    buf.extend_from_slice(&SCHEMA_VERSION.to_le_bytes());
    buf.extend_from_slice(&(set.keypoints.len() as u32).to_le_bytes());
    buf.extend_from_slice(&(SIFT_DESCRIPTOR_DIM as u32).to_le_bytes());
    for kp in &set.keypoints {
        write_keypoint(&mut buf, kp);
    }
    for descriptor in &set.descriptors {
        for v in descriptor.iter() {
            buf.extend_from_slice(&v.to_le_bytes());
        }
    }
    buf
}

pub fn deserialize_sift(bytes: &[u8]) -> Result<ScaleInvariantSet, CacheError> {
    if bytes.len() < 10 || &bytes[0..4] != SIFT_MAGIC {
        return Err(CacheError::SerializationFailed(
            "bad SIFT-family header".to_string(),
        ));
    }
    let count = u32::from_le_bytes(bytes[6..10].try_into().unwrap()) as usize;
    let dim = u32::from_le_bytes(bytes[10..14].try_into().unwrap()) as usize;
    let mut offset = 14;
    let mut keypoints = Vec::with_capacity(count);
    for _ in 0..count {
        keypoints.push(read_keypoint(&bytes[offset..])?);
        offset += KEYPOINT_BYTES;
    }
    let mut descriptors = Vec::with_capacity(count);
    for _ in 0..count {
        let mut descriptor = [0f32; SIFT_DESCRIPTOR_DIM];
        for slot in descriptor.iter_mut().take(dim.min(SIFT_DESCRIPTOR_DIM)) {
            *slot = f32::from_le_bytes(bytes[offset..offset + 4].try_into().map_err(|_| {
                CacheError::SerializationFailed("truncated descriptor array".to_string())
            })?);
            offset += 4;
        }
        descriptors.push(descriptor);
    }
    Ok(ScaleInvariantSet {
        keypoints,
        descriptors,
    })
}

pub fn serialize_orb(set: &BinarySet) -> Vec<u8> {
    let mut buf = Vec::with_capacity(
        10 + set.keypoints.len() * KEYPOINT_BYTES + set.descriptors.len() * ORB_DESCRIPTOR_BYTES,
    );
    buf.extend_from_slice(ORB_MAGIC);
    buf.extend_from_slice(&SCHEMA_VERSION.to_le_bytes());
    buf.extend_from_slice(&(set.keypoints.len() as u32).to_le_bytes());
    buf.extend_from_slice(&(ORB_DESCRIPTOR_BYTES as u32).to_le_bytes());
    for kp in &set.keypoints {
        write_keypoint(&mut buf, kp);
    }
    for descriptor in &set.descriptors {
        buf.extend_from_slice(descriptor);
    }
    buf
}

pub fn deserialize_orb(bytes: &[u8]) -> Result<BinarySet, CacheError> {
    if bytes.len() < 10 || &bytes[0..4] != ORB_MAGIC {
        return Err(CacheError::SerializationFailed(
            "bad ORB-family header".to_string(),
        ));
    }
    let count = u32::from_le_bytes(bytes[6..10].try_into().unwrap()) as usize;
    let dim = u32::from_le_bytes(bytes[10..14].try_into().unwrap()) as usize;
    let mut offset = 14;
    let mut keypoints = Vec::with_capacity(count);
    for _ in 0..count {
        keypoints.push(read_keypoint(&bytes[offset..])?);
        offset += KEYPOINT_BYTES;
    }
    let mut descriptors = Vec::with_capacity(count);
    for _ in 0..count {
        let mut descriptor = [0u8; ORB_DESCRIPTOR_BYTES];
        let take = dim.min(ORB_DESCRIPTOR_BYTES);
        descriptor[..take].copy_from_slice(&bytes[offset..offset + take]);
        offset += dim;
        descriptors.push(descriptor);
    }
    Ok(BinarySet {
        keypoints,
        descriptors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_sift() -> ScaleInvariantSet {
        ScaleInvariantSet {
            keypoints: vec![Keypoint::new(1.0, 2.0, 4.0, 0.5), Keypoint::new(5.0, 6.0, 4.0, 0.9)],
            descriptors: vec![[0.1f32; SIFT_DESCRIPTOR_DIM], [0.2f32; SIFT_DESCRIPTOR_DIM]],
        }
    }

    fn sample_orb() -> BinarySet {
        BinarySet {
            keypoints: vec![Keypoint::new(3.0, 4.0, 7.0, 40.0)],
            descriptors: vec![[0xABu8; ORB_DESCRIPTOR_BYTES]],
        }
    }

    #[test]
    fn sift_round_trips_bit_exact() {
        let original = sample_sift();
        let bytes = serialize_sift(&original);
        let restored = deserialize_sift(&bytes).unwrap();
        assert_eq!(original.keypoints, restored.keypoints);
        assert_eq!(original.descriptors, restored.descriptors);
    }

    #[test]
    fn orb_round_trips_bit_exact() {
        let original = sample_orb();
        let bytes = serialize_orb(&original);
        let restored = deserialize_orb(&bytes).unwrap();
        assert_eq!(original.keypoints, restored.keypoints);
        assert_eq!(original.descriptors, restored.descriptors);
    }

    #[test]
    fn sift_header_rejects_mismatched_magic() {
        let bytes = serialize_orb(&sample_orb());
        assert!(deserialize_sift(&bytes).is_err());
    }
}
