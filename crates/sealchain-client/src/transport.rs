//! Abstract block transport.
//!
//! The session never talks to a socket; it talks to this trait. Production
//! backends wrap the real server RPCs, tests use the in-process server from
//! the harness crate. Server push of new blocks is modeled as a pull
//! (`pull_blocks`) so the session's synchronization loop stays in control
//! of ordering.

use std::future::Future;

use sealchain_core::{ProvisionalKeyPair, PublicProvisionalIdentity};
use sealchain_proto::{Block, DeviceId, GroupId, UserId};
use thiserror::Error;

/// Errors a transport backend can surface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The backend is unreachable or failed mid-call.
    #[error("network failure: {0}")]
    Network(String),

    /// The server rejected a push because of concurrent modification.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A referenced entity does not exist server-side.
    #[error("not found: {0}")]
    NotFound(String),

    /// The provisional verification code is wrong.
    #[error("invalid verification code")]
    InvalidVerification,

    /// The provisional verification code has expired.
    #[error("verification code expired")]
    ExpiredVerification,

    /// Too many failed verification attempts.
    #[error("too many verification attempts")]
    TooManyAttempts,
}

/// Block-push/block-fetch RPC surface required from the server.
pub trait Transport: Send + Sync + 'static {
    /// Push a batch of blocks; the batch is appended atomically and in
    /// order, with server-assigned indices.
    fn push_blocks(
        &self,
        blocks: Vec<Block>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// All blocks with index greater than `after_index` that this session
    /// is allowed to see, in index order.
    fn pull_blocks(
        &self,
        after_index: u64,
    ) -> impl Future<Output = Result<Vec<Block>, TransportError>> + Send;

    /// Device and revocation history of the given users.
    fn get_user_history_by_user_ids(
        &self,
        user_ids: Vec<UserId>,
    ) -> impl Future<Output = Result<Vec<Block>, TransportError>> + Send;

    /// Device and revocation history of the users owning the given devices.
    fn get_user_history_by_device_ids(
        &self,
        device_ids: Vec<DeviceId>,
    ) -> impl Future<Output = Result<Vec<Block>, TransportError>> + Send;

    /// Group blocks of the given groups, creation first.
    fn get_groups_blocks_by_ids(
        &self,
        group_ids: Vec<GroupId>,
    ) -> impl Future<Output = Result<Vec<Block>, TransportError>> + Send;

    /// Group blocks of the group owning a public encryption key.
    fn get_groups_blocks_by_public_encryption_key(
        &self,
        public_encryption_key: [u8; 32],
    ) -> impl Future<Output = Result<Vec<Block>, TransportError>> + Send;

    /// Public halves of the provisional identity bound to an email.
    fn get_public_provisional_identity(
        &self,
        email: String,
    ) -> impl Future<Output = Result<PublicProvisionalIdentity, TransportError>> + Send;

    /// Exchange a verification code for the provisional identity's private
    /// keys, completing a claim.
    fn claim_provisional_identity(
        &self,
        email: String,
        verification_code: String,
    ) -> impl Future<Output = Result<ProvisionalKeyPair, TransportError>> + Send;
}
