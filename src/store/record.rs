//! Log record framing
//!
//! Every mutation of the store is one record in `events.log`:
//!
//! ```text
//! +------------------+
//! | Record Length    | (u32 LE, whole record including this field)
//! +------------------+
//! | Record Kind      | (u8: 1 = append, 2 = remove, 3 = counter)
//! +------------------+
//! | Body             | (length-prefixed JSON)
//! +------------------+
//! | Checksum         | (u32 LE, CRC32 over everything before it)
//! +------------------+
//! ```
//!
//! A removal is a single record so archive-insert and live-delete can never
//! be observed separately after a crash.

use std::io;

use serde::{Deserialize, Serialize};

use super::checksum::compute_checksum;
use super::event::{DeletedEvent, Event};

/// len + kind + body len + checksum
pub const MIN_RECORD_SIZE: usize = 4 + 1 + 4 + 4;

/// Persisted auto-init counter row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterState {
    pub session_id: String,
    pub next_token_id: u64,
}

/// One durable mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// Event appended to the live table
    EventAppended(Event),
    /// Event moved from the live table to the archive
    EventRemoved(DeletedEvent),
    /// Per-session counter set to a new value
    CounterAdvanced(CounterState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum RecordKind {
    EventAppended = 1,
    EventRemoved = 2,
    CounterAdvanced = 3,
}

impl RecordKind {
    fn from_u8(value: u8) -> io::Result<Self> {
        match value {
            1 => Ok(Self::EventAppended),
            2 => Ok(Self::EventRemoved),
            3 => Ok(Self::CounterAdvanced),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unknown record kind: {}", other),
            )),
        }
    }
}

impl LogRecord {
    fn kind(&self) -> RecordKind {
        match self {
            LogRecord::EventAppended(_) => RecordKind::EventAppended,
            LogRecord::EventRemoved(_) => RecordKind::EventRemoved,
            LogRecord::CounterAdvanced(_) => RecordKind::CounterAdvanced,
        }
    }

    fn encode_body(&self) -> io::Result<Vec<u8>> {
        let body = match self {
            LogRecord::EventAppended(event) => serde_json::to_vec(event),
            LogRecord::EventRemoved(deleted) => serde_json::to_vec(deleted),
            LogRecord::CounterAdvanced(counter) => serde_json::to_vec(counter),
        };
        body.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Serialize the complete framed record.
    pub fn serialize(&self) -> io::Result<Vec<u8>> {
        let body = self.encode_body()?;
        let record_length = MIN_RECORD_SIZE + body.len();

        let mut record = Vec::with_capacity(record_length);
        record.extend_from_slice(&(record_length as u32).to_le_bytes());
        record.push(self.kind() as u8);
        record.extend_from_slice(&(body.len() as u32).to_le_bytes());
        record.extend_from_slice(&body);

        let checksum = compute_checksum(&record);
        record.extend_from_slice(&checksum.to_le_bytes());

        Ok(record)
    }

    /// Deserialize one record from the front of `data`, verifying its checksum.
    ///
    /// Returns the record and the number of bytes consumed.
    pub fn deserialize(data: &[u8]) -> io::Result<(Self, usize)> {
        if data.len() < MIN_RECORD_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Record too short",
            ));
        }

        let record_length = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if record_length < MIN_RECORD_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Invalid record length: {}", record_length),
            ));
        }
        if data.len() < record_length {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "Record truncated: expected {} bytes, got {}",
                    record_length,
                    data.len()
                ),
            ));
        }

        let checksum_offset = record_length - 4;
        let stored = u32::from_le_bytes([
            data[checksum_offset],
            data[checksum_offset + 1],
            data[checksum_offset + 2],
            data[checksum_offset + 3],
        ]);
        let computed = compute_checksum(&data[..checksum_offset]);
        if computed != stored {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Checksum mismatch: computed {:08x}, stored {:08x}",
                    computed, stored
                ),
            ));
        }

        let kind = RecordKind::from_u8(data[4])?;
        let body_len = u32::from_le_bytes([data[5], data[6], data[7], data[8]]) as usize;
        if 9 + body_len != checksum_offset {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Body length {} does not match record length {}",
                    body_len, record_length
                ),
            ));
        }
        let body = &data[9..checksum_offset];

        let invalid = |e: serde_json::Error| io::Error::new(io::ErrorKind::InvalidData, e);
        let record = match kind {
            RecordKind::EventAppended => {
                LogRecord::EventAppended(serde_json::from_slice(body).map_err(invalid)?)
            }
            RecordKind::EventRemoved => {
                LogRecord::EventRemoved(serde_json::from_slice(body).map_err(invalid)?)
            }
            RecordKind::CounterAdvanced => {
                LogRecord::CounterAdvanced(serde_json::from_slice(body).map_err(invalid)?)
            }
        };

        Ok((record, record_length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample_event() -> Event {
        Event {
            id: 1,
            token_id: "001".into(),
            uid: "04:A1:B2:C3".into(),
            stage: "QUEUE_JOIN".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 7, 1, 10, 0, 0).unwrap(),
            device_id: "station-1".into(),
            session_id: "day-1".into(),
            is_manual: false,
        }
    }

    #[test]
    fn test_removal_record_decodes_back() {
        let deleted = DeletedEvent::from_event(&sample_event(), "admin", "wrong card", Utc::now());
        let record = LogRecord::EventRemoved(deleted);
        let bytes = record.serialize().unwrap();
        let (decoded, consumed) = LogRecord::deserialize(&bytes).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_consumes_only_first_record() {
        let mut bytes = LogRecord::EventAppended(sample_event()).serialize().unwrap();
        let first_len = bytes.len();
        bytes.extend(
            LogRecord::CounterAdvanced(CounterState {
                session_id: "day-1".into(),
                next_token_id: 2,
            })
            .serialize()
            .unwrap(),
        );
        let (_, consumed) = LogRecord::deserialize(&bytes).unwrap();
        assert_eq!(consumed, first_len);
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let mut bytes = LogRecord::EventAppended(sample_event()).serialize().unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        let err = LogRecord::deserialize(&bytes).unwrap_err();
        assert!(err.to_string().contains("Checksum mismatch"));
    }

    #[test]
    fn test_truncated_record_rejected() {
        let bytes = LogRecord::EventAppended(sample_event()).serialize().unwrap();
        let err = LogRecord::deserialize(&bytes[..bytes.len() - 3]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let mut bytes = LogRecord::EventAppended(sample_event()).serialize().unwrap();
        bytes[4] = 9;
        let crc_at = bytes.len() - 4;
        let crc = compute_checksum(&bytes[..crc_at]);
        bytes[crc_at..].copy_from_slice(&crc.to_le_bytes());
        let err = LogRecord::deserialize(&bytes).unwrap_err();
        assert!(err.to_string().contains("Unknown record kind"));
    }
}
