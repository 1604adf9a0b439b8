//! Snapshot framing: payload length (4 bytes LE) + format version (4 bytes LE)
//! + SHA-256 of version and payload + bincode payload in that version's layout.

use sha2::{Digest, Sha256};

use crate::snapshot::{
    ResumeSnapshot, SnapshotV1, SnapshotV2, MIN_SNAPSHOT_VERSION, SNAPSHOT_VERSION,
};

const LEN_SIZE: usize = 4;
const VERSION_SIZE: usize = 4;
const CHECKSUM_SIZE: usize = 32;
const HEADER_SIZE: usize = LEN_SIZE + VERSION_SIZE + CHECKSUM_SIZE;
const MAX_SNAPSHOT_LEN: u32 = 16 * 1024 * 1024; // 16 MiB

fn checksum(version: u32, payload: &[u8]) -> [u8; CHECKSUM_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(version.to_le_bytes());
    hasher.update(payload);
    hasher.finalize().into()
}

fn supported(version: u32) -> bool {
    (MIN_SNAPSHOT_VERSION..=SNAPSHOT_VERSION).contains(&version)
}

/// Encode a snapshot into a single durable blob, in the layout of
/// `snapshot.version`.
pub fn encode_snapshot(snapshot: &ResumeSnapshot) -> Result<Vec<u8>, SnapshotEncodeError> {
    let version = snapshot.version;
    let payload = match version {
        1 => bincode::serialize(&SnapshotV1::from(snapshot))?,
        2 => bincode::serialize(&SnapshotV2::from(snapshot))?,
        SNAPSHOT_VERSION => bincode::serialize(snapshot)?,
        _ => return Err(SnapshotEncodeError::UnsupportedVersion(version)),
    };
    if payload.len() > MAX_SNAPSHOT_LEN as usize {
        return Err(SnapshotEncodeError::TooLarge);
    }
    let len = payload.len() as u32;
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&version.to_le_bytes());
    out.extend_from_slice(&checksum(version, &payload));
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Error encoding a snapshot (bincode, size limit or unknown version).
#[derive(Debug, thiserror::Error)]
pub enum SnapshotEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("snapshot too large")]
    TooLarge,
    #[error("snapshot version {0} has no persisted layout")]
    UnsupportedVersion(u32),
}

/// Decode a snapshot blob written by this or any older supported version.
/// The result keeps the version it was written with; run it through
/// [`crate::migrate::migrate`] to bring it up to date. Trailing bytes are rejected.
pub fn decode_snapshot(bytes: &[u8]) -> Result<ResumeSnapshot, SnapshotDecodeError> {
    if bytes.len() < HEADER_SIZE {
        return Err(SnapshotDecodeError::NeedMore);
    }
    let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if len > MAX_SNAPSHOT_LEN as usize {
        return Err(SnapshotDecodeError::TooLarge);
    }
    if bytes.len() < HEADER_SIZE + len {
        return Err(SnapshotDecodeError::NeedMore);
    }
    if bytes.len() > HEADER_SIZE + len {
        return Err(SnapshotDecodeError::TrailingBytes);
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let payload = &bytes[HEADER_SIZE..];
    if checksum(version, payload)[..] != bytes[LEN_SIZE + VERSION_SIZE..HEADER_SIZE] {
        return Err(SnapshotDecodeError::ChecksumMismatch);
    }
    if !supported(version) {
        return Err(SnapshotDecodeError::UnsupportedVersion(version));
    }
    let snapshot: ResumeSnapshot = match version {
        1 => bincode::deserialize::<SnapshotV1>(payload)?.into(),
        2 => bincode::deserialize::<SnapshotV2>(payload)?.into(),
        _ => {
            let mut snapshot: ResumeSnapshot = bincode::deserialize(payload)?;
            snapshot.version = version;
            snapshot
        }
    };
    Ok(snapshot)
}

/// Error decoding a snapshot blob (truncated, too large, corrupt, unknown
/// version, or bincode failure).
#[derive(Debug, thiserror::Error)]
pub enum SnapshotDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("snapshot too large")]
    TooLarge,
    #[error("trailing bytes after snapshot")]
    TrailingBytes,
    #[error("snapshot checksum mismatch")]
    ChecksumMismatch,
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::InfoHash;
    use crate::snapshot::{PeerHint, QueuePriority, UploadCountersV1};
    use std::collections::BTreeSet;

    /// Frame a raw payload the way `encode_snapshot` does.
    fn frame(version: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = (payload.len() as u32).to_le_bytes().to_vec();
        out.extend_from_slice(&version.to_le_bytes());
        out.extend_from_slice(&checksum(version, payload));
        out.extend_from_slice(payload);
        out
    }

    fn sample_snapshot() -> ResumeSnapshot {
        let mut snap = ResumeSnapshot::new(InfoHash::from_bytes([3u8; 20]), 40);
        snap.set_verified([1usize, 5, 39]);
        snap.set_peer_connections(vec![PeerHint {
            addr: "192.0.2.1:6881".into(),
            peer_id: Some(vec![1, 2, 3]),
        }]);
        snap.set_queue(Some(2), QueuePriority::High);
        snap.upload_statistics.record_upload("192.0.2.1:6881", 4096);
        snap.upload_statistics.record_rate(512);
        snap
    }

    #[test]
    fn roundtrip_snapshot() {
        let snap = sample_snapshot();
        let blob = encode_snapshot(&snap).unwrap();
        let decoded = decode_snapshot(&blob).unwrap();
        assert_eq!(decoded, snap);
        assert_eq!(decoded.verified().len(), 3);
    }

    #[test]
    fn truncated_blob_needs_more() {
        let blob = encode_snapshot(&sample_snapshot()).unwrap();
        assert!(matches!(
            decode_snapshot(&blob[..2]),
            Err(SnapshotDecodeError::NeedMore)
        ));
        assert!(matches!(
            decode_snapshot(&blob[..blob.len() - 1]),
            Err(SnapshotDecodeError::NeedMore)
        ));
    }

    #[test]
    fn flipped_payload_bit_fails_checksum() {
        let mut blob = encode_snapshot(&sample_snapshot()).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        assert!(matches!(
            decode_snapshot(&blob),
            Err(SnapshotDecodeError::ChecksumMismatch)
        ));
    }

    #[test]
    fn oversized_length_rejected() {
        let mut blob = vec![0u8; HEADER_SIZE];
        blob[..4].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            decode_snapshot(&blob),
            Err(SnapshotDecodeError::TooLarge)
        ));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut blob = encode_snapshot(&sample_snapshot()).unwrap();
        blob.push(0);
        assert!(matches!(
            decode_snapshot(&blob),
            Err(SnapshotDecodeError::TrailingBytes)
        ));
    }

    #[test]
    fn v1_layout_blob_decodes_with_defaults() {
        let bitmap = crate::bitmap::encode_bitmap([2usize, 7], 8);
        let v1 = SnapshotV1 {
            info_hash: InfoHash::from_bytes([9; 20]),
            total_pieces: 8,
            bitmap: bitmap.clone(),
            peer_connections: vec![PeerHint {
                addr: "198.51.100.2:6881".into(),
                peer_id: None,
            }],
            upload_statistics: UploadCountersV1 {
                bytes_uploaded: 77,
                contributors: BTreeSet::from(["198.51.100.2:6881".to_string()]),
            },
            created_at: 10,
            updated_at: 20,
        };
        let blob = frame(1, &bincode::serialize(&v1).unwrap());

        let snap = decode_snapshot(&blob).unwrap();
        assert_eq!(snap.version, 1);
        assert_eq!(snap.info_hash, v1.info_hash);
        assert_eq!(snap.bitmap, bitmap);
        assert_eq!(snap.verified(), BTreeSet::from([2, 7]));
        assert_eq!(snap.upload_statistics.bytes_uploaded, 77);
        assert!(snap.upload_statistics.rate_history.is_empty());
        assert!(snap.file_selection.is_empty());
        assert_eq!(snap.queue_priority, QueuePriority::Normal);
        assert_eq!((snap.created_at, snap.updated_at), (10, 20));
    }

    #[test]
    fn old_versions_encode_in_their_own_layout() {
        let mut snap = sample_snapshot();
        snap.version = 2;
        let blob = encode_snapshot(&snap).unwrap();
        let expected = bincode::serialize(&SnapshotV2::from(&snap)).unwrap();
        assert_eq!(&blob[HEADER_SIZE..], &expected[..]);

        let back = decode_snapshot(&blob).unwrap();
        assert_eq!(back.version, 2);
        assert_eq!(back.queue_priority, QueuePriority::High);
        assert!(back.upload_statistics.rate_history.is_empty());
    }

    #[test]
    fn unknown_versions_rejected() {
        let payload = bincode::serialize(&sample_snapshot()).unwrap();
        for version in [0, SNAPSHOT_VERSION + 1] {
            assert!(matches!(
                decode_snapshot(&frame(version, &payload)),
                Err(SnapshotDecodeError::UnsupportedVersion(v)) if v == version
            ));
        }
        let mut snap = sample_snapshot();
        snap.version = 0;
        assert!(matches!(
            encode_snapshot(&snap),
            Err(SnapshotEncodeError::UnsupportedVersion(0))
        ));
    }

    #[test]
    fn header_version_is_checksummed() {
        let mut blob = encode_snapshot(&sample_snapshot()).unwrap();
        blob[LEN_SIZE] = 2;
        assert!(matches!(
            decode_snapshot(&blob),
            Err(SnapshotDecodeError::ChecksumMismatch)
        ));
    }
}
