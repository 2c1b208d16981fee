//! Error types for trust chain verification and state machines.
//!
//! Invalid blocks are a typed result, not an exception path: the verifier
//! returns [`CoreError::InvalidBlock`] with a subcode, the caller drops the
//! block and moves on. Only genuine implementation bugs surface as
//! [`CoreError::Internal`].

use sealchain_proto::Nature;
use thiserror::Error;

/// Why a block failed verification.
///
/// One code per invariant family; the codes are stable identifiers used in
/// structured drop logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidBlockReason {
    /// Author field does not reference a legal author for this nature.
    InvalidAuthor,
    /// Block signature does not verify.
    InvalidSignature,
    /// Delegation signature on a device creation does not verify.
    InvalidDelegationSignature,
    /// The nature is not legal at this position (e.g. a second root block).
    InvalidNature,
    /// An embedded user public key does not match the user's current key.
    InvalidUserPublicKey,
    /// The author is not allowed to perform this operation.
    Forbidden,
    /// The authoring device was revoked before this block's index.
    RevokedAuthor,
    /// A group with this id already exists with different key material.
    GroupAlreadyExists,
    /// An addition's previous-block hash does not match the group head.
    InvalidPreviousGroupBlock,
    /// A group block's self-signature does not verify.
    InvalidSelfSignature,
    /// A revocation targets a device that is missing or already revoked.
    InvalidRevokedDevice,
    /// A v2 revocation's re-seal list does not cover the surviving devices.
    MissingUserKeys,
    /// The block version does not match the user's key state.
    VersionMismatch,
}

impl InvalidBlockReason {
    /// Stable snake_case code for structured logs.
    pub const fn code(self) -> &'static str {
        match self {
            Self::InvalidAuthor => "invalid_author",
            Self::InvalidSignature => "invalid_signature",
            Self::InvalidDelegationSignature => "invalid_delegation_signature",
            Self::InvalidNature => "invalid_nature",
            Self::InvalidUserPublicKey => "invalid_user_public_key",
            Self::Forbidden => "forbidden",
            Self::RevokedAuthor => "revoked_author",
            Self::GroupAlreadyExists => "group_already_exists",
            Self::InvalidPreviousGroupBlock => "invalid_previous_group_block",
            Self::InvalidSelfSignature => "invalid_self_signature",
            Self::InvalidRevokedDevice => "invalid_revoked_device",
            Self::MissingUserKeys => "missing_user_keys",
            Self::VersionMismatch => "version_mismatch",
        }
    }
}

/// What an out-of-order block is waiting for.
///
/// Doubles as the queueing key of the unverified store. Key publishes
/// reference recipients by public key, so missing users and groups are
/// keyed by encryption key when the id is not derivable from the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subject {
    /// An author or recipient device that has not been verified yet.
    Device(sealchain_proto::DeviceId),
    /// A user that has not been verified yet.
    User(sealchain_proto::UserId),
    /// A user encryption key no verified user owns yet.
    UserEncryptionKey([u8; 32]),
    /// A group that has not been verified yet.
    Group(sealchain_proto::GroupId),
    /// A group encryption key no verified group owns yet.
    GroupEncryptionKey([u8; 32]),
}

/// Errors from verification and state application.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The block violates a chain invariant and must be dropped.
    #[error("invalid {nature:?} block: {}", reason.code())]
    InvalidBlock {
        /// Nature of the offending block.
        nature: Nature,
        /// Which invariant failed.
        reason: InvalidBlockReason,
    },

    /// The block references state that has not been verified yet; it may
    /// verify later once the dependency arrives.
    #[error("missing dependency on {subject:?}")]
    MissingDependency {
        /// What the block is waiting for.
        subject: Subject,
    },

    /// A cryptographic operation on locally held material failed.
    #[error(transparent)]
    Crypto(#[from] sealchain_crypto::CryptoError),

    /// The local safe envelope could not be decoded.
    #[error("corrupt local safe: {detail}")]
    CorruptSafe {
        /// What failed while decoding.
        detail: String,
    },

    /// An internal invariant of this implementation was violated.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn invalid(nature: Nature, reason: InvalidBlockReason) -> Self {
        Self::InvalidBlock { nature, reason }
    }
}
