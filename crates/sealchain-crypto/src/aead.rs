//! Authenticated encryption using XChaCha20-Poly1305.
//!
//! The ciphertext layout is `nonce[24] ‖ encrypted ‖ tag[16]` unless the
//! caller manages nonces itself (the streaming layer derives them).

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::{CryptoError, SymmetricKey};

/// Size of an XChaCha20 nonce.
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag.
pub const MAC_SIZE: usize = 16;

/// Combined overhead of [`encrypt`]: nonce prefix plus tag.
pub const ENCRYPT_OVERHEAD: usize = NONCE_SIZE + MAC_SIZE;

/// Encrypt with a random nonce, producing `nonce ‖ ciphertext ‖ tag`.
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Vec<u8> {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    let mut out = Vec::with_capacity(plaintext.len() + ENCRYPT_OVERHEAD);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&encrypt_with_nonce(key, &nonce, plaintext));
    out
}

/// Decrypt the output of [`encrypt`].
///
/// # Errors
///
/// - [`CryptoError::TruncatedCiphertext`] if shorter than the overhead
/// - [`CryptoError::DecryptionFailed`] on tag mismatch
pub fn decrypt(key: &SymmetricKey, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < ENCRYPT_OVERHEAD {
        return Err(CryptoError::TruncatedCiphertext {
            expected: ENCRYPT_OVERHEAD,
            actual: ciphertext.len(),
        });
    }
    let (nonce, body) = ciphertext.split_at(NONCE_SIZE);
    let mut fixed = [0u8; NONCE_SIZE];
    fixed.copy_from_slice(nonce);
    decrypt_with_nonce(key, &fixed, body)
}

/// Encrypt under an explicit nonce, producing `ciphertext ‖ tag`.
///
/// The caller is responsible for nonce uniqueness per key.
pub fn encrypt_with_nonce(
    key: &SymmetricKey,
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
) -> Vec<u8> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(nonce), plaintext) else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };
    ciphertext
}

/// Decrypt `ciphertext ‖ tag` under an explicit nonce.
///
/// # Errors
///
/// - [`CryptoError::TruncatedCiphertext`] if shorter than the tag
/// - [`CryptoError::DecryptionFailed`] on tag mismatch
pub fn decrypt_with_nonce(
    key: &SymmetricKey,
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < MAC_SIZE {
        return Err(CryptoError::TruncatedCiphertext {
            expected: MAC_SIZE,
            actual: ciphertext.len(),
        });
    }
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Authentication tag of sealing an empty marker under an all-zero nonce.
///
/// Identifies the key without revealing it: the key never encrypts payload
/// bytes directly (only derived sub-keys do), so the zero nonce is used for
/// exactly this one marker.
pub fn marker_mac(key: &SymmetricKey) -> [u8; MAC_SIZE] {
    let sealed = encrypt_with_nonce(key, &[0u8; NONCE_SIZE], b"");
    debug_assert_eq!(sealed.len(), MAC_SIZE);
    let mut mac = [0u8; MAC_SIZE];
    mac.copy_from_slice(&sealed[sealed.len() - MAC_SIZE..]);
    mac
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = SymmetricKey::generate();
        let ciphertext = encrypt(&key, b"four score and seven years ago");
        let plaintext = decrypt(&key, &ciphertext).unwrap();
        assert_eq!(plaintext, b"four score and seven years ago");
    }

    #[test]
    fn empty_plaintext_roundtrip() {
        let key = SymmetricKey::generate();
        let ciphertext = encrypt(&key, b"");
        assert_eq!(ciphertext.len(), ENCRYPT_OVERHEAD);
        assert_eq!(decrypt(&key, &ciphertext).unwrap(), b"");
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = SymmetricKey::generate();
        let mut ciphertext = encrypt(&key, b"payload");
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0x01;
        assert_eq!(decrypt(&key, &ciphertext), Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn every_bit_flip_fails() {
        let key = SymmetricKey::generate();
        let ciphertext = encrypt(&key, b"ab");
        for byte in 0..ciphertext.len() {
            let mut copy = ciphertext.clone();
            copy[byte] ^= 0x80;
            assert!(decrypt(&key, &copy).is_err(), "flip at byte {byte} was accepted");
        }
    }

    #[test]
    fn wrong_key_fails() {
        let ciphertext = encrypt(&SymmetricKey::generate(), b"payload");
        assert_eq!(
            decrypt(&SymmetricKey::generate(), &ciphertext),
            Err(CryptoError::DecryptionFailed)
        );
    }

    #[test]
    fn truncated_input_is_reported() {
        let key = SymmetricKey::generate();
        let result = decrypt(&key, &[0u8; ENCRYPT_OVERHEAD - 1]);
        assert!(matches!(result, Err(CryptoError::TruncatedCiphertext { .. })));
    }

    #[test]
    fn marker_mac_is_deterministic_per_key() {
        let key = SymmetricKey::generate();
        assert_eq!(marker_mac(&key), marker_mac(&key));
        assert_ne!(marker_mac(&key), marker_mac(&SymmetricKey::generate()));
    }
}
