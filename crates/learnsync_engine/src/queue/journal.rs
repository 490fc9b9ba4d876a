//! Journal record framing.
//!
//! Frame layout (little-endian):
//!
//! ```text
//! | magic "LSQJ" (4) | version (2) | kind (1) | len (4) | payload (len) | crc32 (4) |
//! ```
//!
//! The CRC covers header and payload. A `Put` payload is the CBOR-encoded
//! operation, a `Remove` payload is the UTF-8 id, `Clear` has none.

use crate::error::{SyncError, SyncResult};
use learnsync_protocol::SyncOperation;

/// Magic bytes identifying a journal frame.
pub const JOURNAL_MAGIC: [u8; 4] = *b"LSQJ";

/// Current journal format version.
pub const JOURNAL_VERSION: u16 = 1;

/// magic (4) + version (2) + kind (1) + length (4)
pub(crate) const HEADER_SIZE: usize = 11;

const CRC_SIZE: usize = 4;

const KIND_PUT: u8 = 1;
const KIND_REMOVE: u8 = 2;
const KIND_CLEAR: u8 = 3;

/// One mutation of the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum JournalRecord {
    /// Operation added or replaced.
    Put(SyncOperation),
    /// Operation removed by id.
    Remove(String),
    /// Queue emptied.
    Clear,
}

impl JournalRecord {
    fn kind(&self) -> u8 {
        match self {
            JournalRecord::Put(_) => KIND_PUT,
            JournalRecord::Remove(_) => KIND_REMOVE,
            JournalRecord::Clear => KIND_CLEAR,
        }
    }

    /// Encodes the record as a complete frame.
    pub fn encode(&self) -> SyncResult<Vec<u8>> {
        let payload = match self {
            JournalRecord::Put(op) => op.encode()?,
            JournalRecord::Remove(id) => id.as_bytes().to_vec(),
            JournalRecord::Clear => Vec::new(),
        };
        let len = u32::try_from(payload.len())
            .map_err(|_| SyncError::Corrupted("journal frame larger than 4 GiB".into()))?;

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        frame.extend_from_slice(&JOURNAL_MAGIC);
        frame.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
        frame.push(self.kind());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);
        let crc = compute_crc32(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        Ok(frame)
    }

    fn decode_payload(kind: u8, payload: &[u8]) -> SyncResult<Self> {
        match kind {
            KIND_PUT => Ok(JournalRecord::Put(SyncOperation::decode(payload)?)),
            KIND_REMOVE => String::from_utf8(payload.to_vec())
                .map(JournalRecord::Remove)
                .map_err(|_| SyncError::Corrupted("remove record id is not UTF-8".into())),
            KIND_CLEAR => Ok(JournalRecord::Clear),
            other => Err(SyncError::Corrupted(format!("unknown record kind {other}"))),
        }
    }
}

/// Result of scanning a journal image.
#[derive(Debug)]
pub struct Replay {
    /// Complete records, in write order.
    pub records: Vec<JournalRecord>,
    /// Length of the valid prefix; anything after it is a torn tail.
    pub valid_len: u64,
}

/// Scans a journal image.
///
/// An incomplete header or payload at the end is a torn write and ends the
/// scan. A checksum mismatch on the final frame is treated the same way;
/// anywhere else it is corruption.
pub fn replay(bytes: &[u8]) -> SyncResult<Replay> {
    let mut records = Vec::new();
    let mut offset = 0usize;

    while offset < bytes.len() {
        let rest = &bytes[offset..];
        if rest.len() < HEADER_SIZE {
            break;
        }
        if rest[0..4] != JOURNAL_MAGIC {
            return Err(SyncError::Corrupted(format!(
                "bad frame magic at offset {offset}"
            )));
        }
        let version = u16::from_le_bytes([rest[4], rest[5]]);
        if version != JOURNAL_VERSION {
            return Err(SyncError::Corrupted(format!(
                "unsupported journal version {version} at offset {offset}"
            )));
        }
        let kind = rest[6];
        let len = u32::from_le_bytes([rest[7], rest[8], rest[9], rest[10]]) as usize;

        let frame_len = HEADER_SIZE + len + CRC_SIZE;
        if rest.len() < frame_len {
            break;
        }

        let body = &rest[..HEADER_SIZE + len];
        let stored_crc = u32::from_le_bytes([
            rest[HEADER_SIZE + len],
            rest[HEADER_SIZE + len + 1],
            rest[HEADER_SIZE + len + 2],
            rest[HEADER_SIZE + len + 3],
        ]);
        if compute_crc32(body) != stored_crc {
            if offset + frame_len == bytes.len() {
                break;
            }
            return Err(SyncError::Corrupted(format!(
                "checksum mismatch at offset {offset}"
            )));
        }

        records.push(JournalRecord::decode_payload(kind, &body[HEADER_SIZE..])?);
        offset += frame_len;
    }

    Ok(Replay {
        records,
        valid_len: offset as u64,
    })
}

/// Computes a CRC32 checksum (IEEE polynomial).
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    !data.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use learnsync_protocol::{Action, ProfileRecord, SyncPayload};

    fn put() -> JournalRecord {
        JournalRecord::Put(SyncOperation::at(
            "owner",
            Action::Update,
            SyncPayload::Profile(ProfileRecord::default()),
            3,
            7,
        ))
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }

    #[test]
    fn frames_replay_in_order() {
        let records = vec![put(), JournalRecord::Remove("abc".into()), JournalRecord::Clear];
        let mut image = Vec::new();
        for record in &records {
            image.extend(record.encode().unwrap());
        }

        let replayed = replay(&image).unwrap();
        assert_eq!(replayed.records, records);
        assert_eq!(replayed.valid_len, image.len() as u64);
    }

    #[test]
    fn torn_tail_ends_replay() {
        let first = JournalRecord::Remove("kept".into()).encode().unwrap();
        let second = put().encode().unwrap();

        let mut image = first.clone();
        image.extend_from_slice(&second[..second.len() - 6]);

        let replayed = replay(&image).unwrap();
        assert_eq!(replayed.records, vec![JournalRecord::Remove("kept".into())]);
        assert_eq!(replayed.valid_len, first.len() as u64);
    }

    #[test]
    fn bad_checksum_mid_log_is_corruption() {
        let mut image = JournalRecord::Remove("a".into()).encode().unwrap();
        image[HEADER_SIZE] ^= 0xFF;
        image.extend(JournalRecord::Clear.encode().unwrap());

        assert!(matches!(replay(&image), Err(SyncError::Corrupted(_))));
    }

    #[test]
    fn bad_checksum_on_last_frame_is_torn() {
        let mut image = JournalRecord::Clear.encode().unwrap();
        let mut last = JournalRecord::Remove("a".into()).encode().unwrap();
        last[HEADER_SIZE] ^= 0xFF;
        image.extend(last);

        let replayed = replay(&image).unwrap();
        assert_eq!(replayed.records, vec![JournalRecord::Clear]);
    }

    #[test]
    fn bad_magic_is_corruption() {
        let mut image = JournalRecord::Clear.encode().unwrap();
        image[0] = b'X';
        assert!(matches!(replay(&image), Err(SyncError::Corrupted(_))));
    }
}
