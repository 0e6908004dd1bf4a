//! Inbound want-list messages.
//!
//! The wire codec hands the engine [`WantlistMessage`]s whose entries are
//! still raw bytes. [`WantlistMessage::validate`] turns them into typed
//! [`WantEntry`]s, failing on the first malformed entry so that a bad message
//! never partially applies.

use serde::{Deserialize, Serialize};

use crate::{BlockId, TypesError};

/// A want or cancel entry exactly as decoded from the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawWantEntry {
    pub key: Vec<u8>,
    pub priority: i32,
    pub cancel: bool,
}

impl RawWantEntry {
    pub fn want(block: BlockId, priority: i32) -> Self {
        Self {
            key: block.as_bytes().to_vec(),
            priority,
            cancel: false,
        }
    }

    pub fn cancel(block: BlockId) -> Self {
        Self {
            key: block.as_bytes().to_vec(),
            priority: 0,
            cancel: true,
        }
    }

    /// Decode the key and check the priority.
    ///
    /// Priority is only meaningful for wants; cancels accept any value.
    pub fn validate(&self) -> Result<WantEntry, TypesError> {
        let block = BlockId::from_slice(&self.key)?;
        if !self.cancel && self.priority < 0 {
            return Err(TypesError::NegativePriority {
                block: block.to_string(),
                priority: self.priority,
            });
        }
        Ok(WantEntry {
            block,
            priority: self.priority,
            cancel: self.cancel,
        })
    }
}

/// A validated want-list entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WantEntry {
    pub block: BlockId,
    pub priority: i32,
    pub cancel: bool,
}

/// A want-list update from one peer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WantlistMessage {
    /// When set, the message replaces the peer's whole want-list.
    pub full: bool,
    pub entries: Vec<RawWantEntry>,
}

impl WantlistMessage {
    pub fn incremental(entries: Vec<RawWantEntry>) -> Self {
        Self {
            full: false,
            entries,
        }
    }

    pub fn full(entries: Vec<RawWantEntry>) -> Self {
        Self {
            full: true,
            entries,
        }
    }

    /// Validate every entry. All or nothing.
    pub fn validate(&self) -> Result<Vec<WantEntry>, TypesError> {
        self.entries.iter().map(RawWantEntry::validate).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_message_decodes_all_entries() {
        let a = BlockId::for_data(b"a");
        let b = BlockId::for_data(b"b");
        let msg = WantlistMessage::incremental(vec![
            RawWantEntry::want(a, 3),
            RawWantEntry::cancel(b),
        ]);
        let entries = msg.validate().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].block, a);
        assert_eq!(entries[0].priority, 3);
        assert!(!entries[0].cancel);
        assert!(entries[1].cancel);
    }

    #[test]
    fn short_key_rejects_whole_message() {
        let msg = WantlistMessage::incremental(vec![
            RawWantEntry::want(BlockId::for_data(b"a"), 1),
            RawWantEntry {
                key: vec![1, 2, 3],
                priority: 1,
                cancel: false,
            },
        ]);
        assert_eq!(msg.validate(), Err(TypesError::InvalidBlockIdLength(3)));
    }

    #[test]
    fn negative_priority_only_matters_for_wants() {
        let id = BlockId::for_data(b"x");
        let bad = RawWantEntry::want(id, -1);
        assert!(matches!(
            bad.validate(),
            Err(TypesError::NegativePriority { priority: -1, .. })
        ));

        let cancel = RawWantEntry {
            key: id.as_bytes().to_vec(),
            priority: -5,
            cancel: true,
        };
        assert!(cancel.validate().is_ok());
    }
}
