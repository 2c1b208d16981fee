//! Sealed boxes: anonymous asymmetric encryption to an X25519 public key.
//!
//! Layout: `ephemeral_public[32] ‖ ciphertext ‖ tag[16]`, overhead 48. The
//! AEAD key is derived from the Diffie-Hellman shared secret and both public
//! keys; the nonce is derived from the two public keys, which is safe because
//! the ephemeral key is fresh per seal.
//!
//! Key-publish fields that seal a 32-byte key are therefore exactly 80 bytes
//! on the wire, and a double seal (provisional identities) is 128.

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use crate::aead::{decrypt_with_nonce, encrypt_with_nonce, MAC_SIZE, NONCE_SIZE};
use crate::hash::{hash24, hash32};
use crate::{CryptoError, EncryptionKeyPair, SymmetricKey, PUBLIC_KEY_SIZE};

/// Bytes added by one [`seal`]: ephemeral public key plus tag.
pub const SEAL_OVERHEAD: usize = PUBLIC_KEY_SIZE + MAC_SIZE;

/// Domain separation label for the sealed-box AEAD key.
const SEAL_KEY_LABEL: &[u8] = b"sealchain seal v1";

/// Seal `plaintext` to a recipient public key.
pub fn seal(plaintext: &[u8], recipient_public: &[u8; PUBLIC_KEY_SIZE]) -> Vec<u8> {
    let ephemeral = StaticSecret::random_from_rng(OsRng);
    let ephemeral_public = X25519PublicKey::from(&ephemeral).to_bytes();

    let shared = ephemeral.diffie_hellman(&X25519PublicKey::from(*recipient_public));
    let key = seal_key(shared.as_bytes(), &ephemeral_public, recipient_public);
    let nonce = seal_nonce(&ephemeral_public, recipient_public);

    let mut out = Vec::with_capacity(plaintext.len() + SEAL_OVERHEAD);
    out.extend_from_slice(&ephemeral_public);
    out.extend_from_slice(&encrypt_with_nonce(&key, &nonce, plaintext));
    out
}

/// Open a sealed box with the recipient keypair.
///
/// # Errors
///
/// - [`CryptoError::TruncatedCiphertext`] if shorter than the overhead
/// - [`CryptoError::DecryptionFailed`] if the box was not sealed to this key
pub fn seal_open(sealed: &[u8], recipient: &EncryptionKeyPair) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < SEAL_OVERHEAD {
        return Err(CryptoError::TruncatedCiphertext {
            expected: SEAL_OVERHEAD,
            actual: sealed.len(),
        });
    }
    let (ephemeral_bytes, body) = sealed.split_at(PUBLIC_KEY_SIZE);
    let mut ephemeral_public = [0u8; PUBLIC_KEY_SIZE];
    ephemeral_public.copy_from_slice(ephemeral_bytes);

    let secret = StaticSecret::from(recipient.private);
    let shared = secret.diffie_hellman(&X25519PublicKey::from(ephemeral_public));
    let key = seal_key(shared.as_bytes(), &ephemeral_public, &recipient.public);
    let nonce = seal_nonce(&ephemeral_public, &recipient.public);

    decrypt_with_nonce(&key, &nonce, body)
}

/// Seal to two recipient keys, outer key last.
///
/// Used for provisional identities: the inner (app-side) seal is wrapped in
/// the outer (server-side) seal, so claiming requires both private halves.
pub fn double_seal(
    plaintext: &[u8],
    inner_public: &[u8; PUBLIC_KEY_SIZE],
    outer_public: &[u8; PUBLIC_KEY_SIZE],
) -> Vec<u8> {
    seal(&seal(plaintext, inner_public), outer_public)
}

/// Open a [`double_seal`], outer keypair first.
///
/// # Errors
///
/// Same as [`seal_open`], for either layer.
pub fn double_seal_open(
    sealed: &[u8],
    inner: &EncryptionKeyPair,
    outer: &EncryptionKeyPair,
) -> Result<Vec<u8>, CryptoError> {
    seal_open(&seal_open(sealed, outer)?, inner)
}

fn seal_key(
    shared: &[u8; 32],
    ephemeral_public: &[u8; PUBLIC_KEY_SIZE],
    recipient_public: &[u8; PUBLIC_KEY_SIZE],
) -> SymmetricKey {
    SymmetricKey(hash32(&[SEAL_KEY_LABEL, shared, ephemeral_public, recipient_public]))
}

fn seal_nonce(
    ephemeral_public: &[u8; PUBLIC_KEY_SIZE],
    recipient_public: &[u8; PUBLIC_KEY_SIZE],
) -> [u8; NONCE_SIZE] {
    hash24(&[ephemeral_public, recipient_public])
}
