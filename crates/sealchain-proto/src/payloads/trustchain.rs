//! Trustchain creation payload.

use crate::errors::Result;
use crate::payloads::reader::Reader;
use crate::HASH_SIZE;

/// Root block payload: announces the chain's public signature key.
///
/// The block carrying it has an all-zero author and signature; its hash *is*
/// the trustchain id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustchainCreation {
    /// Root public signature key; delegates the first device of every user.
    pub public_signature_key: [u8; HASH_SIZE],
}

impl TrustchainCreation {
    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.public_signature_key);
    }

    pub(crate) fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self { public_signature_key: reader.array("public_signature_key")? })
    }
}
