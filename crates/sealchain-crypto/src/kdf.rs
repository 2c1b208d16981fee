//! Sub-key derivation using HKDF-SHA256.

use hkdf::Hkdf;
use sha2::Sha256;

use crate::SymmetricKey;

/// Label for per-chunk stream keys.
const CHUNK_KEY_LABEL: &[u8] = b"sealchainChunkV1";

/// Derive the AEAD key for one stream chunk.
///
/// Each chunk of a stream is encrypted under its own key so that chunks
/// cannot be reordered or transplanted between positions: the derivation
/// binds the resource key and the chunk index.
pub fn derive_chunk_key(resource_key: &SymmetricKey, chunk_index: u64) -> SymmetricKey {
    let hkdf = Hkdf::<Sha256>::new(None, resource_key.as_bytes());

    // Capacity: 16 (label) + 8 (index)
    let mut info = Vec::with_capacity(24);
    info.extend_from_slice(CHUNK_KEY_LABEL);
    info.extend_from_slice(&chunk_index.to_le_bytes());

    let mut key = [0u8; 32];
    let Ok(()) = hkdf.expand(&info, &mut key) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };
    SymmetricKey(key)
}
