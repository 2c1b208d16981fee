//! Session-level error taxonomy.
//!
//! This is the surface the SDK shell sees. Caller errors carry the
//! offending value; chain and crypto failures are wrapped without losing
//! the inner detail. Nothing here is swallowed: the verifier's per-block
//! drop (logged, not raised) is the only place an error terminates quietly,
//! and that happens below this layer.

use sealchain_core::CoreError;
use sealchain_crypto::CryptoError;
use sealchain_proto::{ProtocolError, ResourceId};
use thiserror::Error;

use crate::storage::StorageError;
use crate::transport::TransportError;

/// Errors surfaced by session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// An argument failed validation before any state was touched.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The session is stopped or revoked.
    #[error("invalid session status: session is {0}")]
    InvalidSessionStatus(&'static str),

    /// The data is not in a recognized encrypted format.
    #[error("invalid encryption format")]
    InvalidEncryptionFormat,

    /// No key is reachable for this resource.
    #[error("key not found for resource {0}")]
    ResourceNotFound(ResourceId),

    /// Some recipients could not be resolved on the chain.
    #[error("recipients not found: {0:?}")]
    RecipientsNotFound(Vec<String>),

    /// AEAD authentication failed.
    #[error("decryption failed")]
    DecryptionFailed,

    /// The verification code has expired.
    #[error("verification code expired")]
    ExpiredVerification,

    /// The verification code is wrong.
    #[error("invalid verification code")]
    InvalidVerification,

    /// Too many failed verification attempts.
    #[error("too many verification attempts")]
    TooManyAttempts,

    /// A group would exceed the member cap.
    #[error("group too big: {size} members exceeds the limit of {limit}")]
    GroupTooBig {
        /// Requested size.
        size: usize,
        /// Maximum allowed.
        limit: usize,
    },

    /// A group operation was given no members.
    #[error("invalid group size: a group needs at least one member")]
    InvalidGroupSize,

    /// Concurrent modification detected by the server.
    #[error("conflict: {0}")]
    Conflict(String),

    /// This device was revoked; the local safe has been wiped.
    #[error("this device was revoked")]
    DeviceRevoked,

    /// The operation was canceled by closing the session.
    #[error("operation canceled")]
    OperationCanceled,

    /// A precondition of the operation does not hold.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// The transport failed.
    #[error("network error: {0}")]
    NetworkError(String),

    /// A bug in this implementation.
    #[error("internal error: {0}")]
    InternalError(String),

    /// Data from a newer format version.
    #[error("upgrade required: {0}")]
    UpgradeRequired(String),
}

impl From<CryptoError> for SessionError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::DecryptionFailed | CryptoError::TruncatedCiphertext { .. } => {
                Self::DecryptionFailed
            }
            CryptoError::InvalidKey { .. } | CryptoError::InvalidSignature => {
                Self::InternalError(err.to_string())
            }
        }
    }
}

impl From<CoreError> for SessionError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Crypto(inner) => inner.into(),
            // Invalid or still-pending blocks never escape the sync loop;
            // reaching here means an outgoing block failed local checks.
            CoreError::InvalidBlock { .. } | CoreError::MissingDependency { .. } => {
                Self::PreconditionFailed(err.to_string())
            }
            CoreError::CorruptSafe { detail } => Self::InternalError(detail),
            CoreError::Internal(detail) => Self::InternalError(detail),
        }
    }
}

impl From<ProtocolError> for SessionError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::UnsupportedVersion(_) | ProtocolError::UnsupportedNature(_) => {
                Self::UpgradeRequired(err.to_string())
            }
            _ => Self::InvalidArgument(err.to_string()),
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Network(detail) => Self::NetworkError(detail),
            TransportError::Conflict(detail) => Self::Conflict(detail),
            TransportError::InvalidVerification => Self::InvalidVerification,
            TransportError::ExpiredVerification => Self::ExpiredVerification,
            TransportError::TooManyAttempts => Self::TooManyAttempts,
            TransportError::NotFound(detail) => Self::RecipientsNotFound(vec![detail]),
        }
    }
}

impl From<StorageError> for SessionError {
    fn from(err: StorageError) -> Self {
        Self::InternalError(err.to_string())
    }
}
