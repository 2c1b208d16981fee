//! Chunked streaming encryption.
//!
//! Wire format: `varint(1) ‖ resource_id[16]` followed by encrypted chunks.
//! Each chunk is `nonce[24] ‖ ciphertext ‖ tag[16]` under a key derived
//! from the resource key and the chunk position, so chunks cannot be
//! reordered or transplanted between streams. The final chunk is strictly
//! smaller than the configured size; an exact-multiple plaintext is closed
//! by an empty final chunk.
//!
//! Both directions are push-based state machines that buffer at most one
//! chunk; the async session wraps them around whole buffers or I/O.

use sealchain_crypto::aead::{decrypt_with_nonce, encrypt_with_nonce, MAC_SIZE, NONCE_SIZE};
use sealchain_crypto::kdf::derive_chunk_key;
use sealchain_crypto::SymmetricKey;
use sealchain_proto::{decode_varint, encode_varint, ResourceId, RESOURCE_ID_SIZE};
use thiserror::Error;

/// Current stream format version.
pub const STREAM_FORMAT_VERSION: u64 = 1;

/// Default plaintext chunk size (1 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Ciphertext overhead per chunk.
pub const CHUNK_OVERHEAD: usize = NONCE_SIZE + MAC_SIZE;

/// Errors from the stream codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The header is not a recognized encrypted-stream header.
    #[error("not an encrypted stream")]
    InvalidFormat,

    /// The header names a version this implementation does not know.
    #[error("unsupported stream version {0}")]
    UnsupportedVersion(u64),

    /// A chunk failed authentication, or the stream ended mid-chunk.
    #[error("stream decryption failed at chunk {chunk_index}")]
    DecryptionFailed {
        /// Position of the offending chunk.
        chunk_index: u64,
    },
}

/// Parsed stream header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    /// Resource whose key decrypts this stream.
    pub resource_id: ResourceId,
}

impl StreamHeader {
    /// Serialize the header.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + RESOURCE_ID_SIZE);
        encode_varint(STREAM_FORMAT_VERSION, &mut out);
        out.extend_from_slice(self.resource_id.as_bytes());
        out
    }

    /// Parse a header from the front of `bytes`, returning it with the
    /// number of bytes consumed.
    ///
    /// # Errors
    ///
    /// - [`StreamError::InvalidFormat`] on malformed or truncated input
    /// - [`StreamError::UnsupportedVersion`] on a future version
    pub fn parse(bytes: &[u8]) -> Result<(Self, usize), StreamError> {
        let (version, used) =
            decode_varint(bytes, "stream_version").map_err(|_| StreamError::InvalidFormat)?;
        if version != STREAM_FORMAT_VERSION {
            return Err(StreamError::UnsupportedVersion(version));
        }
        let resource_id = bytes
            .get(used..used + RESOURCE_ID_SIZE)
            .and_then(ResourceId::from_slice)
            .ok_or(StreamError::InvalidFormat)?;
        Ok((Self { resource_id }, used + RESOURCE_ID_SIZE))
    }
}

/// Push-based chunk encryptor.
pub struct ChunkEncryptor {
    resource_key: SymmetricKey,
    chunk_size: usize,
    chunk_index: u64,
    buffer: Vec<u8>,
}

impl ChunkEncryptor {
    /// Encryptor producing plaintext chunks of `chunk_size`.
    pub fn new(resource_key: SymmetricKey, chunk_size: usize) -> Self {
        debug_assert!(chunk_size > 0);
        Self { resource_key, chunk_size, chunk_index: 0, buffer: Vec::new() }
    }

    /// Feed plaintext, returning any completed encrypted chunks.
    pub fn push(&mut self, plaintext: &[u8]) -> Vec<u8> {
        self.buffer.extend_from_slice(plaintext);
        let mut out = Vec::new();
        while self.buffer.len() >= self.chunk_size {
            let rest = self.buffer.split_off(self.chunk_size);
            let chunk = std::mem::replace(&mut self.buffer, rest);
            out.extend_from_slice(&self.encrypt_chunk(&chunk));
        }
        out
    }

    /// Close the stream, emitting the final chunk.
    ///
    /// The final chunk's plaintext is strictly smaller than the chunk size
    /// (empty when the total length was an exact multiple), which is how
    /// the decryptor recognizes the end.
    pub fn finish(mut self) -> Vec<u8> {
        let chunk = std::mem::take(&mut self.buffer);
        debug_assert!(chunk.len() < self.chunk_size);
        self.encrypt_chunk(&chunk)
    }

    fn encrypt_chunk(&mut self, plaintext: &[u8]) -> Vec<u8> {
        use rand::RngCore;
        let key = derive_chunk_key(&self.resource_key, self.chunk_index);
        self.chunk_index += 1;

        let mut nonce = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let mut out = Vec::with_capacity(plaintext.len() + CHUNK_OVERHEAD);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&encrypt_with_nonce(&key, &nonce, plaintext));
        out
    }
}

/// Push-based chunk decryptor; buffers at most one ciphertext chunk.
pub struct ChunkDecryptor {
    resource_key: SymmetricKey,
    ciphertext_chunk_size: usize,
    chunk_index: u64,
    buffer: Vec<u8>,
}

impl ChunkDecryptor {
    /// Decryptor for streams encrypted with plaintext chunks of
    /// `chunk_size`.
    pub fn new(resource_key: SymmetricKey, chunk_size: usize) -> Self {
        debug_assert!(chunk_size > 0);
        Self {
            resource_key,
            ciphertext_chunk_size: chunk_size + CHUNK_OVERHEAD,
            chunk_index: 0,
            buffer: Vec::new(),
        }
    }

    /// Feed ciphertext, returning any plaintext that became available.
    ///
    /// A buffered run of exactly one chunk is withheld until more input or
    /// [`finish`](Self::finish) arrives: it could still be the final,
    /// shorter chunk.
    ///
    /// # Errors
    ///
    /// [`StreamError::DecryptionFailed`] at the first chunk that fails
    /// authentication.
    pub fn push(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, StreamError> {
        self.buffer.extend_from_slice(ciphertext);
        let mut out = Vec::new();
        while self.buffer.len() > self.ciphertext_chunk_size {
            let rest = self.buffer.split_off(self.ciphertext_chunk_size);
            let chunk = std::mem::replace(&mut self.buffer, rest);
            out.extend_from_slice(&self.decrypt_chunk(&chunk)?);
        }
        Ok(out)
    }

    /// Close the stream, decrypting the final chunk.
    ///
    /// # Errors
    ///
    /// [`StreamError::DecryptionFailed`] if the remainder does not frame a
    /// final chunk (truncated stream) or fails authentication.
    pub fn finish(mut self) -> Result<Vec<u8>, StreamError> {
        let chunk = std::mem::take(&mut self.buffer);
        if chunk.len() < CHUNK_OVERHEAD || chunk.len() >= self.ciphertext_chunk_size {
            // Either cut off mid-chunk or missing the final short chunk.
            return Err(StreamError::DecryptionFailed { chunk_index: self.chunk_index });
        }
        self.decrypt_chunk(&chunk)
    }

    fn decrypt_chunk(&mut self, chunk: &[u8]) -> Result<Vec<u8>, StreamError> {
        let index = self.chunk_index;
        let key = derive_chunk_key(&self.resource_key, index);
        self.chunk_index += 1;

        let (nonce, body) = chunk.split_at(NONCE_SIZE);
        let mut fixed = [0u8; NONCE_SIZE];
        fixed.copy_from_slice(nonce);
        decrypt_with_nonce(&key, &fixed, body)
            .map_err(|_| StreamError::DecryptionFailed { chunk_index: index })
    }
}

/// Encrypt a whole buffer into the stream format.
pub fn encrypt_buffer(
    resource_key: &SymmetricKey,
    resource_id: ResourceId,
    plaintext: &[u8],
    chunk_size: usize,
) -> Vec<u8> {
    let mut out = StreamHeader { resource_id }.encode();
    let mut encryptor = ChunkEncryptor::new(resource_key.clone(), chunk_size);
    out.extend_from_slice(&encryptor.push(plaintext));
    out.extend_from_slice(&encryptor.finish());
    out
}

/// Decrypt a whole buffer in the stream format (header included).
///
/// # Errors
///
/// Header errors from [`StreamHeader::parse`]; [`StreamError::DecryptionFailed`]
/// at the first bad chunk.
pub fn decrypt_buffer(
    resource_key: &SymmetricKey,
    data: &[u8],
    chunk_size: usize,
) -> Result<Vec<u8>, StreamError> {
    let (_, header_len) = StreamHeader::parse(data)?;
    let mut decryptor = ChunkDecryptor::new(resource_key.clone(), chunk_size);
    let mut out = decryptor.push(&data[header_len..])?;
    out.extend_from_slice(&decryptor.finish()?);
    Ok(out)
}
