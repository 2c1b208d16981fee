//! Sealchain Cryptographic Primitives
//!
//! Cryptographic building blocks for the trust chain engine. Pure functions
//! with deterministic outputs wherever the construction allows it; random
//! material (nonces, ephemeral keys) is drawn from the OS RNG at the call
//! site that needs it.
//!
//! # Key Hierarchy
//!
//! Every encrypted resource is protected by a fresh 32-byte symmetric key.
//! That key never encrypts payload bytes directly: the streaming layer
//! derives one sub-key per chunk, and the key itself is distributed sealed
//! to recipient keypairs.
//!
//! ```text
//! Resource Key (random, 32 bytes)
//!        │
//!        ├── HKDF → per-chunk sub-keys → XChaCha20-Poly1305 chunks
//!        │
//!        └── sealed box → key-publish blocks (device / user / group /
//!            provisional recipients)
//! ```
//!
//! # Security
//!
//! - XChaCha20-Poly1305 AEAD for all symmetric encryption; a failed
//!   authentication tag is always surfaced, never skipped.
//! - Ed25519 for block and delegation signatures.
//! - X25519 sealed boxes for key distribution: an ephemeral keypair per
//!   seal, nonce bound to both public keys, so only the recipient's private
//!   key opens the box.
//! - BLAKE2b for content addressing (block hashes, device ids) and nonce
//!   derivation.
//! - Private key material is zeroized on drop.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod aead;
mod error;
pub mod hash;
pub mod kdf;
mod keys;
pub mod sealed;
pub mod wrap;

pub use error::CryptoError;
pub use keys::{EncryptionKeyPair, SignatureKeyPair, SymmetricKey, verify_signature};

/// Size of an Ed25519 / X25519 public key.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of an Ed25519 private key in its keypair form (seed ‖ public).
pub const PRIVATE_SIGNATURE_KEY_SIZE: usize = 64;

/// Size of an Ed25519 signature.
pub const SIGNATURE_SIZE: usize = 64;

/// Size of a symmetric resource key.
pub const SYMMETRIC_KEY_SIZE: usize = 32;
