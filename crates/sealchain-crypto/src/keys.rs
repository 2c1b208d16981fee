//! Keypair types for signing and asymmetric encryption.
//!
//! Keys are stored as raw byte arrays so the wire codec can embed them
//! without conversion; the dalek types are constructed at the point of use.
//! Private material is zeroized on drop.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    CryptoError, PRIVATE_SIGNATURE_KEY_SIZE, PUBLIC_KEY_SIZE, SIGNATURE_SIZE, SYMMETRIC_KEY_SIZE,
};

/// An Ed25519 signature keypair.
///
/// The private half is the 64-byte keypair form (seed ‖ public key), matching
/// the layout other implementations of the block format expect.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SignatureKeyPair {
    /// Public verification key.
    #[zeroize(skip)]
    pub public: [u8; PUBLIC_KEY_SIZE],
    /// Private signing key (seed ‖ public).
    pub private: [u8; PRIVATE_SIGNATURE_KEY_SIZE],
}

impl SignatureKeyPair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        let signing = SigningKey::generate(&mut OsRng);
        Self { public: signing.verifying_key().to_bytes(), private: signing.to_keypair_bytes() }
    }

    /// Rebuild a keypair from its 64-byte private form.
    ///
    /// # Errors
    ///
    /// [`CryptoError::InvalidKey`] if the public half embedded in the bytes
    /// does not match the seed.
    pub fn from_private(private: &[u8; PRIVATE_SIGNATURE_KEY_SIZE]) -> Result<Self, CryptoError> {
        let signing = SigningKey::from_keypair_bytes(private)
            .map_err(|_| CryptoError::InvalidKey { role: "signature private" })?;
        Ok(Self { public: signing.verifying_key().to_bytes(), private: *private })
    }

    /// Sign a message, returning the 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        let Ok(signing) = SigningKey::from_keypair_bytes(&self.private) else {
            unreachable!("keypair bytes were validated at construction");
        };
        signing.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for SignatureKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureKeyPair").field("public", &self.public).finish_non_exhaustive()
    }
}

/// Verify an Ed25519 signature against a raw public key.
///
/// # Errors
///
/// - [`CryptoError::InvalidKey`] if the public key is not a valid curve point
/// - [`CryptoError::InvalidSignature`] if the signature does not verify
pub fn verify_signature(
    public: &[u8; PUBLIC_KEY_SIZE],
    message: &[u8],
    signature: &[u8; SIGNATURE_SIZE],
) -> Result<(), CryptoError> {
    let verifying = VerifyingKey::from_bytes(public)
        .map_err(|_| CryptoError::InvalidKey { role: "signature public" })?;
    let signature = ed25519_dalek::Signature::from_bytes(signature);
    verifying.verify(message, &signature).map_err(|_| CryptoError::InvalidSignature)
}

/// An X25519 encryption keypair.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKeyPair {
    /// Public key.
    #[zeroize(skip)]
    pub public: [u8; PUBLIC_KEY_SIZE],
    /// Private scalar.
    pub private: [u8; PUBLIC_KEY_SIZE],
}

impl EncryptionKeyPair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        Self { public: X25519PublicKey::from(&secret).to_bytes(), private: secret.to_bytes() }
    }

    /// Rebuild a keypair from its 32-byte private scalar.
    pub fn from_private(private: &[u8; PUBLIC_KEY_SIZE]) -> Self {
        let secret = StaticSecret::from(*private);
        Self { public: X25519PublicKey::from(&secret).to_bytes(), private: *private }
    }
}

impl std::fmt::Debug for EncryptionKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKeyPair").field("public", &self.public).finish_non_exhaustive()
    }
}

/// A 32-byte symmetric key.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey(pub [u8; SYMMETRIC_KEY_SIZE]);

impl SymmetricKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut key = [0u8; SYMMETRIC_KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_SIZE] {
        &self.0
    }
}

impl From<[u8; SYMMETRIC_KEY_SIZE]> for SymmetricKey {
    fn from(bytes: [u8; SYMMETRIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip() {
        let keypair = SignatureKeyPair::generate();
        let signature = keypair.sign(b"attested payload");
        verify_signature(&keypair.public, b"attested payload", &signature).unwrap();
    }

    #[test]
    fn verify_rejects_wrong_message() {
        let keypair = SignatureKeyPair::generate();
        let signature = keypair.sign(b"attested payload");
        let result = verify_signature(&keypair.public, b"other payload", &signature);
        assert_eq!(result, Err(CryptoError::InvalidSignature));
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let keypair = SignatureKeyPair::generate();
        let other = SignatureKeyPair::generate();
        let signature = keypair.sign(b"attested payload");
        let result = verify_signature(&other.public, b"attested payload", &signature);
        assert_eq!(result, Err(CryptoError::InvalidSignature));
    }

    #[test]
    fn signature_keypair_private_roundtrip() {
        let keypair = SignatureKeyPair::generate();
        let restored = SignatureKeyPair::from_private(&keypair.private).unwrap();
        assert_eq!(restored.public, keypair.public);
    }

    #[test]
    fn signature_keypair_rejects_corrupted_private() {
        let keypair = SignatureKeyPair::generate();
        let mut corrupted = keypair.private;
        corrupted[40] ^= 0xFF; // flips a bit in the embedded public half
        assert!(SignatureKeyPair::from_private(&corrupted).is_err());
    }

    #[test]
    fn encryption_keypair_private_roundtrip() {
        let keypair = EncryptionKeyPair::generate();
        let restored = EncryptionKeyPair::from_private(&keypair.private);
        assert_eq!(restored.public, keypair.public);
    }

    #[test]
    fn generated_keys_are_unique() {
        assert_ne!(SymmetricKey::generate(), SymmetricKey::generate());
        assert_ne!(EncryptionKeyPair::generate().public, EncryptionKeyPair::generate().public);
    }
}
