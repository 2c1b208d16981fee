//! Verified groups and the group state machine.
//!
//! A group is *internal* when this device holds its private keys and
//! *external* otherwise. Transitions happen when a verified group block
//! carries a slot one of our local keys can open, or when a provisional
//! identity is claimed against a retained pending slot.

use std::collections::HashMap;

use sealchain_crypto::sealed::{double_seal_open, seal_open};
use sealchain_crypto::wrap::{unwrap_signature_key, WRAPPED_SIGNATURE_KEY_SIZE};
use sealchain_crypto::{CryptoError, EncryptionKeyPair, SignatureKeyPair};
use sealchain_proto::payloads::{SealedKeyForProvisional, SealedKeyForUser};
use sealchain_proto::GroupId;

use crate::safe::ProvisionalKeyPair;

/// Read-only view of the local key material the group machine may try
/// against incoming slots.
pub trait SlotOpener {
    /// The user encryption keypair matching a public key, if held locally.
    fn user_key_pair(&self, public_encryption_key: &[u8; 32]) -> Option<EncryptionKeyPair>;

    /// The provisional keypair matching both public signature keys, if held.
    fn provisional_key_pair(
        &self,
        app_public_signature_key: &[u8; 32],
        server_public_signature_key: &[u8; 32],
    ) -> Option<ProvisionalKeyPair>;
}

/// Opener with no local keys; used when replaying a chain for audit.
pub struct NoLocalKeys;

impl SlotOpener for NoLocalKeys {
    fn user_key_pair(&self, _: &[u8; 32]) -> Option<EncryptionKeyPair> {
        None
    }

    fn provisional_key_pair(&self, _: &[u8; 32], _: &[u8; 32]) -> Option<ProvisionalKeyPair> {
        None
    }
}

/// A group this device is a member of: full key material held.
#[derive(Debug, Clone)]
pub struct InternalGroup {
    /// Group id (the public signature key).
    pub id: GroupId,
    /// Group signature keypair.
    pub signature_key_pair: SignatureKeyPair,
    /// Group encryption keypair.
    pub encryption_key_pair: EncryptionKeyPair,
    /// Hash of the group's most recent block.
    pub last_group_block: [u8; 32],
    /// Chain index of that block.
    pub index: u64,
}

/// A group known from the chain but whose private keys we cannot open.
#[derive(Debug, Clone)]
pub struct ExternalGroup {
    /// Group id (the public signature key).
    pub id: GroupId,
    /// Group public signature key.
    pub public_signature_key: [u8; 32],
    /// Group public encryption key.
    pub public_encryption_key: [u8; 32],
    /// Wrapped private signature key, openable once the encryption key is.
    pub wrapped_private_signature_key: [u8; WRAPPED_SIGNATURE_KEY_SIZE],
    /// Provisional slots retained for future claims.
    pub pending_provisional_slots: Vec<SealedKeyForProvisional>,
    /// Hash of the group's most recent block.
    pub last_group_block: [u8; 32],
    /// Chain index of that block.
    pub index: u64,
}

/// A verified group in either state.
#[derive(Debug, Clone)]
pub enum Group {
    /// Private keys held.
    Internal(InternalGroup),
    /// Only public material held.
    External(ExternalGroup),
}

impl Group {
    /// Group id.
    pub fn id(&self) -> GroupId {
        match self {
            Self::Internal(group) => group.id,
            Self::External(group) => group.id,
        }
    }

    /// Group public encryption key.
    pub fn public_encryption_key(&self) -> [u8; 32] {
        match self {
            Self::Internal(group) => group.encryption_key_pair.public,
            Self::External(group) => group.public_encryption_key,
        }
    }

    /// Group public signature key.
    pub fn public_signature_key(&self) -> [u8; 32] {
        match self {
            Self::Internal(group) => group.signature_key_pair.public,
            Self::External(group) => group.public_signature_key,
        }
    }

    /// Hash of the group's most recent block.
    pub fn last_group_block(&self) -> [u8; 32] {
        match self {
            Self::Internal(group) => group.last_group_block,
            Self::External(group) => group.last_group_block,
        }
    }

    /// Whether private keys are held.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }

    fn advance(&mut self, block_hash: [u8; 32], index: u64) {
        match self {
            Self::Internal(group) => {
                group.last_group_block = block_hash;
                group.index = index;
            }
            Self::External(group) => {
                group.last_group_block = block_hash;
                group.index = index;
            }
        }
    }
}

/// Try to open one of the slots with local keys, returning the group
/// private encryption key on success.
///
/// A slot that matches a local key but fails to unseal is a real error:
/// the chain says the key is ours, so a failed open means corruption, and
/// silently skipping it would strand the membership.
fn open_slots(
    members: &[SealedKeyForUser],
    provisionals: &[SealedKeyForProvisional],
    opener: &dyn SlotOpener,
) -> Result<Option<EncryptionKeyPair>, CryptoError> {
    for slot in members {
        if let Some(user_key) = opener.user_key_pair(&slot.recipient_public_encryption_key) {
            let private = seal_open(&slot.sealed_private_encryption_key, &user_key)?;
            let private: [u8; 32] = private
                .try_into()
                .map_err(|_| CryptoError::InvalidKey { role: "group encryption private" })?;
            return Ok(Some(EncryptionKeyPair::from_private(&private)));
        }
    }
    for slot in provisionals {
        if let Some(pair) = opener
            .provisional_key_pair(&slot.app_public_signature_key, &slot.server_public_signature_key)
        {
            let private = double_seal_open(
                &slot.sealed_private_encryption_key,
                &pair.app_encryption,
                &pair.server_encryption,
            )?;
            let private: [u8; 32] = private
                .try_into()
                .map_err(|_| CryptoError::InvalidKey { role: "group encryption private" })?;
            return Ok(Some(EncryptionKeyPair::from_private(&private)));
        }
    }
    Ok(None)
}

/// Store of verified groups.
#[derive(Debug, Default, Clone)]
pub struct GroupStore {
    groups: HashMap<GroupId, Group>,
    by_encryption_key: HashMap<[u8; 32], GroupId>,
}

impl GroupStore {
    /// Look up a group.
    pub fn group(&self, id: &GroupId) -> Option<&Group> {
        self.groups.get(id)
    }

    /// Find a group by its public encryption key.
    pub fn group_by_encryption_key(&self, key: &[u8; 32]) -> Option<&Group> {
        self.by_encryption_key.get(key).and_then(|id| self.groups.get(id))
    }

    /// Number of verified groups.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Register a verified group creation. Returns whether the group landed
    /// internal.
    ///
    /// # Errors
    ///
    /// [`CryptoError`] if a slot addressed to local keys fails to open.
    pub(crate) fn insert_from_creation(
        &mut self,
        id: GroupId,
        public_signature_key: [u8; 32],
        public_encryption_key: [u8; 32],
        wrapped_private_signature_key: [u8; WRAPPED_SIGNATURE_KEY_SIZE],
        members: &[SealedKeyForUser],
        provisionals: &[SealedKeyForProvisional],
        block_hash: [u8; 32],
        index: u64,
        opener: &dyn SlotOpener,
    ) -> Result<bool, CryptoError> {
        let group = match open_slots(members, provisionals, opener)? {
            Some(encryption_key_pair) => {
                let signature_private =
                    unwrap_signature_key(&wrapped_private_signature_key, &encryption_key_pair.private)?;
                let signature_key_pair = SignatureKeyPair::from_private(&signature_private)?;
                Group::Internal(InternalGroup {
                    id,
                    signature_key_pair,
                    encryption_key_pair,
                    last_group_block: block_hash,
                    index,
                })
            }
            None => Group::External(ExternalGroup {
                id,
                public_signature_key,
                public_encryption_key,
                wrapped_private_signature_key,
                pending_provisional_slots: provisionals.to_vec(),
                last_group_block: block_hash,
                index,
            }),
        };

        let internal = group.is_internal();
        self.by_encryption_key.insert(public_encryption_key, id);
        self.groups.insert(id, group);
        Ok(internal)
    }

    /// Register a verified group addition: advance the head, merge pending
    /// slots, and upgrade to internal if a new slot opens locally. Returns
    /// whether the group is internal afterwards.
    ///
    /// # Errors
    ///
    /// [`CryptoError`] if a slot addressed to local keys fails to open.
    pub(crate) fn apply_addition(
        &mut self,
        id: &GroupId,
        members: &[SealedKeyForUser],
        provisionals: &[SealedKeyForProvisional],
        block_hash: [u8; 32],
        index: u64,
        opener: &dyn SlotOpener,
    ) -> Result<bool, CryptoError> {
        let Some(group) = self.groups.get_mut(id) else {
            unreachable!("caller verified the group exists");
        };

        // All fallible crypto happens before any mutation so a failed open
        // cannot leave the store half-updated.
        let upgrade = match group {
            Group::Internal(_) => None,
            Group::External(external) => match open_slots(members, provisionals, opener)? {
                Some(encryption_key_pair) => {
                    let signature_private = unwrap_signature_key(
                        &external.wrapped_private_signature_key,
                        &encryption_key_pair.private,
                    )?;
                    let signature_key_pair = SignatureKeyPair::from_private(&signature_private)?;
                    Some(InternalGroup {
                        id: *id,
                        signature_key_pair,
                        encryption_key_pair,
                        last_group_block: block_hash,
                        index,
                    })
                }
                None => None,
            },
        };

        group.advance(block_hash, index);
        match upgrade {
            Some(internal) => *group = Group::Internal(internal),
            None => {
                if let Group::External(external) = group {
                    external.pending_provisional_slots.extend(provisionals.iter().cloned());
                }
            }
        }
        Ok(group.is_internal())
    }

    /// Process a freshly claimed provisional identity against every pending
    /// slot; external groups whose slot matches become internal.
    ///
    /// Returns the ids of groups that were unlocked.
    ///
    /// # Errors
    ///
    /// [`CryptoError`] if a matching slot fails to open with the claimed
    /// keys.
    pub fn apply_provisional_claim(
        &mut self,
        claimed: &ProvisionalKeyPair,
    ) -> Result<Vec<GroupId>, CryptoError> {
        let mut unlocked = Vec::new();
        for group in self.groups.values_mut() {
            let upgrade = match group {
                Group::Internal(_) => None,
                Group::External(external) => {
                    let Some(slot) = external.pending_provisional_slots.iter().find(|slot| {
                        slot.app_public_signature_key == claimed.app_signature.public
                            && slot.server_public_signature_key == claimed.server_signature.public
                    }) else {
                        continue;
                    };

                    let private = double_seal_open(
                        &slot.sealed_private_encryption_key,
                        &claimed.app_encryption,
                        &claimed.server_encryption,
                    )?;
                    let private: [u8; 32] = private
                        .try_into()
                        .map_err(|_| CryptoError::InvalidKey { role: "group encryption private" })?;
                    let encryption_key_pair = EncryptionKeyPair::from_private(&private);
                    let signature_private = unwrap_signature_key(
                        &external.wrapped_private_signature_key,
                        &encryption_key_pair.private,
                    )?;
                    let signature_key_pair = SignatureKeyPair::from_private(&signature_private)?;
                    Some(InternalGroup {
                        id: external.id,
                        signature_key_pair,
                        encryption_key_pair,
                        last_group_block: external.last_group_block,
                        index: external.index,
                    })
                }
            };
            if let Some(internal) = upgrade {
                let id = internal.id;
                *group = Group::Internal(internal);
                unlocked.push(id);
            }
        }
        Ok(unlocked)
    }
}
