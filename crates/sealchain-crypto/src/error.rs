//! Error type shared by the primitive modules.

use thiserror::Error;

/// Errors produced by the cryptographic primitives.
///
/// Decryption failures carry no distinguishing detail on purpose: a wrong
/// key and a tampered ciphertext are indistinguishable to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// AEAD authentication failed (wrong key or tampered ciphertext).
    #[error("decryption failed: authentication tag mismatch")]
    DecryptionFailed,

    /// Input is shorter than the construction's fixed overhead.
    #[error("ciphertext too short: need at least {expected} bytes, got {actual}")]
    TruncatedCiphertext {
        /// Minimum length the construction requires.
        expected: usize,
        /// Length that was provided.
        actual: usize,
    },

    /// A key had the wrong length or is not a valid curve point.
    #[error("invalid {role} key")]
    InvalidKey {
        /// Which key was rejected ("signature public", "encryption private", ...).
        role: &'static str,
    },

    /// An Ed25519 signature did not verify.
    #[error("signature verification failed")]
    InvalidSignature,
}
