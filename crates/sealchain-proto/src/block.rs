//! The block envelope.
//!
//! Wire layout:
//!
//! ```text
//! version:u8 (=1)
//! varint(index)
//! trustchain_id[32]
//! varint(nature)
//! varint(payload_len) ‖ payload
//! author[32]
//! signature[64]
//! ```
//!
//! The block hash covers `varint(nature) ‖ author ‖ payload`, not the
//! index, which the server assigns after the author signed.

use sealchain_crypto::hash::hash32;

use crate::errors::{ProtocolError, Result};
use crate::nature::Nature;
use crate::payloads::reader::Reader;
use crate::payloads::Payload;
use crate::{varint, TrustchainId, HASH_SIZE};

/// Current envelope version.
pub const BLOCK_FORMAT_VERSION: u8 = 1;

/// Upper bound on a payload's declared length (1 MiB; real payloads are
/// a few hundred bytes plus member lists).
const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// One signed, versioned event on the trust chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Position assigned by the server; 0 until pushed.
    pub index: u64,
    /// Chain this block belongs to.
    pub trustchain_id: TrustchainId,
    /// Parsed payload (carries the nature).
    pub payload: Payload,
    /// Trustchain id for root-authored blocks, else the authoring device id.
    pub author: [u8; HASH_SIZE],
    /// Signature over [`Block::hash`] by the author key (all-zero on the
    /// root block, whose hash is self-certifying).
    pub signature: [u8; 64],
}

impl Block {
    /// Nature tag of this block.
    pub fn nature(&self) -> Nature {
        self.payload.nature()
    }

    /// Content hash over `(nature, author, payload)`.
    pub fn hash(&self) -> [u8; HASH_SIZE] {
        let mut nature_bytes = Vec::with_capacity(varint::MAX_VARINT_LEN);
        varint::encode_varint(self.nature().to_u64(), &mut nature_bytes);
        hash32(&[&nature_bytes, &self.author, &self.payload.to_bytes()])
    }

    /// Serialize to wire bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let payload = self.payload.to_bytes();
        debug_assert!(payload.len() <= MAX_PAYLOAD_SIZE);

        let mut out = Vec::with_capacity(
            1 + varint::varint_len(self.index)
                + HASH_SIZE
                + varint::varint_len(self.nature().to_u64())
                + varint::varint_len(payload.len() as u64)
                + payload.len()
                + HASH_SIZE
                + 64,
        );
        out.push(BLOCK_FORMAT_VERSION);
        varint::encode_varint(self.index, &mut out);
        out.extend_from_slice(self.trustchain_id.as_bytes());
        varint::encode_varint(self.nature().to_u64(), &mut out);
        varint::encode_varint(payload.len() as u64, &mut out);
        out.extend_from_slice(&payload);
        out.extend_from_slice(&self.author);
        out.extend_from_slice(&self.signature);
        out
    }

    /// Parse wire bytes, requiring exact consumption.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::UnsupportedVersion`] / [`ProtocolError::UnsupportedNature`]
    ///   for values from a newer format
    /// - [`ProtocolError::Truncated`] / [`ProtocolError::TrailingBytes`] for
    ///   inputs that do not frame exactly one block
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);

        let version = reader.byte("version")?;
        if version != BLOCK_FORMAT_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }

        let index = reader.varint("index")?;
        let trustchain_id = TrustchainId(reader.array("trustchain_id")?);
        let nature = Nature::from_u64(reader.varint("nature")?)?;
        let payload_len = reader.list_len("payload", MAX_PAYLOAD_SIZE)?;
        let payload_bytes = reader.bytes(payload_len, "payload")?;
        let payload = Payload::decode(nature, payload_bytes)?;
        let author = reader.array("author")?;
        let signature = reader.array("signature")?;
        reader.finish("block")?;

        Ok(Self { index, trustchain_id, payload, author, signature })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payloads::TrustchainCreation;

    fn root_block() -> Block {
        Block {
            index: 1,
            trustchain_id: TrustchainId([0xAA; 32]),
            payload: Payload::TrustchainCreation(TrustchainCreation {
                public_signature_key: [0x11; 32],
            }),
            author: [0u8; 32],
            signature: [0u8; 64],
        }
    }

    #[test]
    fn serialize_deserialize_roundtrip() {
        let block = root_block();
        let bytes = block.serialize();
        assert_eq!(Block::deserialize(&bytes).unwrap(), block);
    }

    #[test]
    fn hash_ignores_index() {
        let block = root_block();
        let mut reindexed = block.clone();
        reindexed.index = 999;
        assert_eq!(block.hash(), reindexed.hash());
    }

    #[test]
    fn hash_covers_payload_and_author() {
        let block = root_block();

        let mut other_payload = block.clone();
        other_payload.payload = Payload::TrustchainCreation(TrustchainCreation {
            public_signature_key: [0x12; 32],
        });
        assert_ne!(block.hash(), other_payload.hash());

        let mut other_author = block.clone();
        other_author.author = [1u8; 32];
        assert_ne!(block.hash(), other_author.hash());
    }

    #[test]
    fn unknown_version_is_upgrade_required() {
        let mut bytes = root_block().serialize();
        bytes[0] = 2;
        assert_eq!(Block::deserialize(&bytes), Err(ProtocolError::UnsupportedVersion(2)));
    }

    #[test]
    fn unknown_nature_is_upgrade_required() {
        // version ‖ index ‖ trustchain_id ‖ nature=5 ...
        let mut bytes = vec![BLOCK_FORMAT_VERSION, 0x01];
        bytes.extend_from_slice(&[0xAA; 32]);
        bytes.push(5);
        assert_eq!(Block::deserialize(&bytes), Err(ProtocolError::UnsupportedNature(5)));
    }

    #[test]
    fn truncated_block_is_rejected() {
        let bytes = root_block().serialize();
        for len in [0, 1, 10, bytes.len() - 1] {
            assert!(Block::deserialize(&bytes[..len]).is_err(), "accepted prefix of {len}");
        }
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = root_block().serialize();
        bytes.push(0);
        assert!(matches!(
            Block::deserialize(&bytes),
            Err(ProtocolError::TrailingBytes { .. })
        ));
    }
}
