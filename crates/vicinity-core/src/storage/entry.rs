//! Index-file entry codec.
//!
//! The index file is an ordered sequence of fixed-width 28-byte entries:
//!
//! ```text
//! id (16) | offset (8 LE) | length (4 LE)
//! ```
//!
//! An all-zero id marks the logical end of the stream. A process-wide
//! tombstone sentinel id marks a deleted slot whose data bytes have not been
//! reclaimed yet.

use std::sync::OnceLock;
use uuid::Uuid;

/// Fixed width of one index entry in bytes.
pub(crate) const ENTRY_SIZE: usize = 28;

/// Bytes reserved in the data file per entry of capacity.
pub(crate) const DATA_BYTES_PER_ENTRY: usize = 4096;

static TOMBSTONE: OnceLock<Uuid> = OnceLock::new();

/// Returns the process-wide tombstone sentinel id.
///
/// Chosen once at process init; random, so it is distinct from any
/// legitimate id and from the all-zero end marker.
pub(crate) fn tombstone_id() -> Uuid {
    *TOMBSTONE.get_or_init(Uuid::new_v4)
}

/// One decoded index-file entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IndexEntry {
    /// Record id, the tombstone sentinel, or nil for end-of-stream.
    pub id: Uuid,
    /// Byte offset of the record in the data file.
    pub offset: u64,
    /// Serialized record length in bytes.
    pub length: u32,
}

impl IndexEntry {
    /// Decodes the entry at `buf[..ENTRY_SIZE]`.
    pub fn read_from(buf: &[u8]) -> Self {
        let id = Uuid::from_bytes(buf[0..16].try_into().expect("entry id slice"));
        let offset = u64::from_le_bytes(buf[16..24].try_into().expect("entry offset slice"));
        let length = u32::from_le_bytes(buf[24..28].try_into().expect("entry length slice"));
        Self { id, offset, length }
    }

    /// Encodes the entry into `buf[..ENTRY_SIZE]`.
    pub fn write_to(&self, buf: &mut [u8]) {
        buf[0..16].copy_from_slice(self.id.as_bytes());
        buf[16..24].copy_from_slice(&self.offset.to_le_bytes());
        buf[24..28].copy_from_slice(&self.length.to_le_bytes());
    }

    /// True when this slot marks the logical end of the index stream.
    pub fn is_end(&self) -> bool {
        self.id.is_nil()
    }

    /// True when this slot is a deleted record.
    pub fn is_tombstone(&self) -> bool {
        self.id == tombstone_id()
    }

    /// True when this slot holds a live record.
    pub fn is_live(&self) -> bool {
        !self.is_end() && !self.is_tombstone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_round_trip() {
        let entry = IndexEntry {
            id: Uuid::new_v4(),
            offset: 0x1122_3344_5566,
            length: 412,
        };
        let mut buf = [0u8; ENTRY_SIZE];
        entry.write_to(&mut buf);
        assert_eq!(IndexEntry::read_from(&buf), entry);
    }

    #[test]
    fn test_zeroed_slot_is_end() {
        let entry = IndexEntry::read_from(&[0u8; ENTRY_SIZE]);
        assert!(entry.is_end());
        assert!(!entry.is_live());
    }

    #[test]
    fn test_tombstone_sentinel_is_stable_and_distinct() {
        assert_eq!(tombstone_id(), tombstone_id());
        assert!(!tombstone_id().is_nil());

        let entry = IndexEntry {
            id: tombstone_id(),
            offset: 0,
            length: 0,
        };
        assert!(entry.is_tombstone());
        assert!(!entry.is_live());
    }
}
