//! Symmetric wrapping of a group's private signature key.
//!
//! The group private signature key travels inside group blocks encrypted
//! under key material derived from the group's private *encryption* key, so
//! a member must first unseal their encryption-key slot before they can
//! recover signing capability. Layout: `nonce_seed[16] ‖ ciphertext ‖
//! tag[16]`, 96 bytes total for the 64-byte signature key.

use rand::rngs::OsRng;
use rand::RngCore;

use crate::aead::{decrypt_with_nonce, encrypt_with_nonce, MAC_SIZE};
use crate::hash::{hash24, hash32};
use crate::{CryptoError, SymmetricKey, PRIVATE_SIGNATURE_KEY_SIZE, PUBLIC_KEY_SIZE};

/// Size of the random nonce seed stored on the wire.
const NONCE_SEED_SIZE: usize = 16;

/// Size of a wrapped private signature key.
pub const WRAPPED_SIGNATURE_KEY_SIZE: usize =
    NONCE_SEED_SIZE + PRIVATE_SIGNATURE_KEY_SIZE + MAC_SIZE;

/// Domain separation label for the wrapping key.
const WRAP_KEY_LABEL: &[u8] = b"sealchain group sig wrap v1";

/// Wrap a 64-byte private signature key under a private encryption key.
pub fn wrap_signature_key(
    signature_private: &[u8; PRIVATE_SIGNATURE_KEY_SIZE],
    encryption_private: &[u8; PUBLIC_KEY_SIZE],
) -> [u8; WRAPPED_SIGNATURE_KEY_SIZE] {
    let mut nonce_seed = [0u8; NONCE_SEED_SIZE];
    OsRng.fill_bytes(&mut nonce_seed);

    let key = wrap_key(encryption_private);
    let nonce = hash24(&[&nonce_seed]);
    let body = encrypt_with_nonce(&key, &nonce, signature_private);
    debug_assert_eq!(body.len(), PRIVATE_SIGNATURE_KEY_SIZE + MAC_SIZE);

    let mut out = [0u8; WRAPPED_SIGNATURE_KEY_SIZE];
    out[..NONCE_SEED_SIZE].copy_from_slice(&nonce_seed);
    out[NONCE_SEED_SIZE..].copy_from_slice(&body);
    out
}

/// Recover a private signature key wrapped by [`wrap_signature_key`].
///
/// # Errors
///
/// [`CryptoError::DecryptionFailed`] if the encryption key is wrong or the
/// wrapping was tampered with.
pub fn unwrap_signature_key(
    wrapped: &[u8; WRAPPED_SIGNATURE_KEY_SIZE],
    encryption_private: &[u8; PUBLIC_KEY_SIZE],
) -> Result<[u8; PRIVATE_SIGNATURE_KEY_SIZE], CryptoError> {
    let (nonce_seed, body) = wrapped.split_at(NONCE_SEED_SIZE);
    let key = wrap_key(encryption_private);
    let nonce = hash24(&[nonce_seed]);
    let plaintext = decrypt_with_nonce(&key, &nonce, body)?;

    let mut out = [0u8; PRIVATE_SIGNATURE_KEY_SIZE];
    out.copy_from_slice(&plaintext);
    Ok(out)
}

fn wrap_key(encryption_private: &[u8; PUBLIC_KEY_SIZE]) -> SymmetricKey {
    SymmetricKey(hash32(&[WRAP_KEY_LABEL, encryption_private]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EncryptionKeyPair, SignatureKeyPair};

    #[test]
    fn wrap_unwrap_roundtrip() {
        let signature = SignatureKeyPair::generate();
        let encryption = EncryptionKeyPair::generate();
        let wrapped = wrap_signature_key(&signature.private, &encryption.private);
        let recovered = unwrap_signature_key(&wrapped, &encryption.private).unwrap();
        assert_eq!(recovered, signature.private);
    }

    #[test]
    fn wrapped_size_is_ninety_six() {
        assert_eq!(WRAPPED_SIGNATURE_KEY_SIZE, 96);
    }

    #[test]
    fn wrong_encryption_key_fails() {
        let signature = SignatureKeyPair::generate();
        let wrapped =
            wrap_signature_key(&signature.private, &EncryptionKeyPair::generate().private);
        let result = unwrap_signature_key(&wrapped, &EncryptionKeyPair::generate().private);
        assert_eq!(result, Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn tampered_wrapping_fails() {
        let signature = SignatureKeyPair::generate();
        let encryption = EncryptionKeyPair::generate();
        let mut wrapped = wrap_signature_key(&signature.private, &encryption.private);
        wrapped[20] ^= 0x04;
        assert!(unwrap_signature_key(&wrapped, &encryption.private).is_err());
    }
}
