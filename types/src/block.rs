//! Content-addressed block identifiers and payloads.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::TypesError;

type Blake2b256 = Blake2b<U32>;

/// A 32-byte content-derived key naming a block (BLAKE2b-256 of its payload).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId([u8; 32]);

impl BlockId {
    pub const LEN: usize = 32;

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derive the identifier of a payload.
    pub fn for_data(data: &[u8]) -> Self {
        let mut hasher = Blake2b256::new();
        hasher.update(data);
        let mut output = [0u8; 32];
        output.copy_from_slice(&hasher.finalize());
        Self(output)
    }

    /// Decode an identifier from raw wire bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypesError> {
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| TypesError::InvalidBlockIdLength(bytes.len()))?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({}\u{2026})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// A block payload together with its identifier.
///
/// The payload is reference counted so that handing a block to the transport
/// and keeping it in a store never copies the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Block {
    id: BlockId,
    data: Arc<[u8]>,
}

impl Block {
    /// Wrap a payload, deriving its identifier.
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        let data = data.into();
        Self {
            id: BlockId::for_data(&data),
            data,
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("id", &self.id)
            .field("len", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_derived_from_content() {
        let a = Block::new(b"hello".to_vec());
        let b = Block::new(b"hello".to_vec());
        let c = Block::new(b"world".to_vec());
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
        assert_eq!(a.id(), BlockId::for_data(b"hello"));
        assert_eq!(a.len(), 5);
    }

    #[test]
    fn from_slice_rejects_wrong_length() {
        assert_eq!(
            BlockId::from_slice(&[0u8; 31]),
            Err(TypesError::InvalidBlockIdLength(31))
        );
        let id = BlockId::from_slice(&[7u8; 32]).unwrap();
        assert_eq!(id.as_bytes(), &[7u8; 32]);
    }

    #[test]
    fn display_is_full_hex() {
        let id = BlockId::new([0xab; 32]);
        assert_eq!(id.to_string(), "ab".repeat(32));
        assert!(format!("{id:?}").starts_with("BlockId(abababab"));
    }
}
