//! Sealchain trust chain core.
//!
//! Verification and state machines for the append-only log of cryptographic
//! events: users and their devices, user-key rotation, groups, key
//! publishes, plus the local key safe, identity material, and the builders
//! for every block a device can author.
//!
//! The crate is synchronous and deterministic; the client crate owns the
//! verification lane, I/O, and persistence.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod b64doc;
pub mod blocks;
mod error;
pub mod group;
pub mod identity;
pub mod planner;
pub mod safe;
pub mod trustchain;
pub mod unverified;
pub mod user;

pub use blocks::BlockFactory;
pub use error::{CoreError, InvalidBlockReason, Subject};
pub use group::{Group, GroupStore, NoLocalKeys, SlotOpener};
pub use identity::{
    mint_identity, obfuscate_user_id, PublicIdentity, PublicProvisionalIdentity, SecretIdentity,
    SecretProvisionalIdentity,
};
pub use planner::{plan_key_publishes, KeyPublishRecipients};
pub use safe::{DeviceKeys, LocalSafe, ProvisionalKeyPair};
pub use trustchain::{AppliedEvent, TrustchainState};
pub use unverified::UnverifiedStore;
pub use user::{Device, User, UserStore};
