//! Block verification against verified state.
//!
//! One block at a time: every invariant for the block's nature is checked
//! against the current state, and only then is the state advanced, so a
//! failed check never leaves a partial mutation behind. Callers serialize
//! invocations (the session holds the verification lane lock), so the
//! order of effects is total.
//!
//! Verification failures are values, not panics: [`CoreError::InvalidBlock`]
//! means drop the block; [`CoreError::MissingDependency`] means queue it
//! behind its subject and retry when the subject verifies.

use std::collections::{HashMap, HashSet};

use sealchain_crypto::verify_signature;
use sealchain_proto::payloads::{
    DeviceCreation1, DeviceRevocation2, UserGroupAddition, UserGroupCreation, UserKeyPair,
};
use sealchain_proto::{Block, DeviceId, GroupId, Payload, ResourceId, TrustchainId, UserId};

use crate::error::{CoreError, InvalidBlockReason, Subject};
use crate::group::{GroupStore, SlotOpener};
use crate::user::{Device, UserStore};

/// What a successfully applied block did to the state.
///
/// The session uses these to drain the unverified queue and to keep the
/// local safe in step with the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppliedEvent {
    /// The block was verified earlier; nothing changed. Histories fetched
    /// for different purposes overlap, so re-seeing blocks is routine.
    AlreadyApplied,
    /// The root block set the chain's signature key.
    TrustchainCreated,
    /// A device was added to a user (creating the user on first sight).
    DeviceCreated {
        /// Owner.
        user_id: UserId,
        /// The new device.
        device_id: DeviceId,
        /// User public key embedded in a v3 creation, if any.
        user_public_encryption_key: Option<[u8; 32]>,
    },
    /// A device was revoked.
    DeviceRevoked {
        /// Owner.
        user_id: UserId,
        /// The revoked device.
        device_id: DeviceId,
        /// Rotated user public key from a v2 revocation, if any.
        new_user_public_encryption_key: Option<[u8; 32]>,
    },
    /// A key publish was recorded.
    KeyPublishAdded {
        /// Resource the publish is for.
        resource_id: ResourceId,
    },
    /// A group was created.
    GroupCreated {
        /// The new group.
        group_id: GroupId,
        /// Its public encryption key.
        public_encryption_key: [u8; 32],
        /// Whether local keys opened a slot.
        internal: bool,
    },
    /// A group advanced (addition applied or creation re-announced).
    GroupUpdated {
        /// The group.
        group_id: GroupId,
        /// Its public encryption key.
        public_encryption_key: [u8; 32],
        /// Whether local keys hold the group private keys now.
        internal: bool,
    },
}

/// Verified chain state: users, devices, groups, and observed key
/// publishes, plus the root key.
#[derive(Debug, Clone)]
pub struct TrustchainState {
    trustchain_id: TrustchainId,
    root_public_signature_key: Option<[u8; 32]>,
    users: UserStore,
    groups: GroupStore,
    key_publishes: HashMap<ResourceId, Vec<Payload>>,
    applied: HashSet<[u8; 32]>,
    last_index: u64,
}

impl TrustchainState {
    /// Empty state for a chain.
    pub fn new(trustchain_id: TrustchainId) -> Self {
        Self {
            trustchain_id,
            root_public_signature_key: None,
            users: UserStore::default(),
            groups: GroupStore::default(),
            key_publishes: HashMap::new(),
            applied: HashSet::new(),
            last_index: 0,
        }
    }

    /// The chain this state verifies.
    pub fn trustchain_id(&self) -> TrustchainId {
        self.trustchain_id
    }

    /// Verified users and devices.
    pub fn users(&self) -> &UserStore {
        &self.users
    }

    /// Verified groups.
    pub fn groups(&self) -> &GroupStore {
        &self.groups
    }

    /// Mutable access to groups, for provisional claims.
    pub fn groups_mut(&mut self) -> &mut GroupStore {
        &mut self.groups
    }

    /// Highest verified block index.
    pub fn last_index(&self) -> u64 {
        self.last_index
    }

    /// Every verified key publish for a resource.
    pub fn key_publishes_for(&self, resource_id: &ResourceId) -> &[Payload] {
        self.key_publishes.get(resource_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Verify one block and, on success, apply it.
    ///
    /// `opener` exposes the local key material used to open group slots
    /// addressed to this device's user or claimed provisional identities.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidBlock`]: drop the block
    /// - [`CoreError::MissingDependency`]: queue the block and retry later
    /// - [`CoreError::Crypto`]: local material failed to open a slot that
    ///   names it; state is unchanged
    pub fn apply_block(
        &mut self,
        block: &Block,
        opener: &dyn SlotOpener,
    ) -> Result<AppliedEvent, CoreError> {
        if block.trustchain_id != self.trustchain_id {
            return Err(CoreError::invalid(block.nature(), InvalidBlockReason::InvalidAuthor));
        }
        let block_hash = block.hash();
        if self.applied.contains(&block_hash) {
            return Ok(AppliedEvent::AlreadyApplied);
        }

        let event = match &block.payload {
            Payload::TrustchainCreation(_) => self.apply_trustchain_creation(block)?,
            Payload::DeviceCreation1(creation) => {
                self.apply_device_creation(block, creation, None, None)?
            }
            Payload::DeviceCreation2(creation) => self.apply_device_creation(
                block,
                &creation.creation,
                None,
                Some(creation.last_reset),
            )?,
            Payload::DeviceCreation3(creation) => self.apply_device_creation(
                block,
                &creation.creation,
                Some((&creation.user_key_pair, creation.is_ghost_device, creation.is_server_device)),
                None,
            )?,
            Payload::DeviceRevocation1(revocation) => {
                self.apply_device_revocation(block, revocation.device_id, None)?
            }
            Payload::DeviceRevocation2(revocation) => {
                self.apply_device_revocation(block, revocation.device_id, Some(revocation))?
            }
            Payload::KeyPublishToDevice(_)
            | Payload::KeyPublishToUser(_)
            | Payload::KeyPublishToUserGroup(_)
            | Payload::KeyPublishToProvisionalUser(_) => self.apply_key_publish(block)?,
            Payload::UserGroupCreation(creation) => {
                self.apply_group_creation(block, creation, opener)?
            }
            Payload::UserGroupAddition(addition) => {
                self.apply_group_addition(block, addition, opener)?
            }
        };

        self.applied.insert(block_hash);
        self.last_index = self.last_index.max(block.index);
        Ok(event)
    }

    fn apply_trustchain_creation(&mut self, block: &Block) -> Result<AppliedEvent, CoreError> {
        let nature = block.nature();
        if self.root_public_signature_key.is_some() {
            // Only the first block may be a root block.
            return Err(CoreError::invalid(nature, InvalidBlockReason::InvalidNature));
        }
        if block.author != [0; 32] {
            return Err(CoreError::invalid(nature, InvalidBlockReason::InvalidAuthor));
        }
        if block.signature != [0; 64] {
            return Err(CoreError::invalid(nature, InvalidBlockReason::InvalidSignature));
        }
        if block.hash() != *self.trustchain_id.as_bytes() {
            // The root block is self-certifying: its hash is the chain id.
            return Err(CoreError::invalid(nature, InvalidBlockReason::InvalidSignature));
        }

        let Payload::TrustchainCreation(payload) = &block.payload else {
            unreachable!("dispatched on payload variant");
        };
        self.root_public_signature_key = Some(payload.public_signature_key);
        Ok(AppliedEvent::TrustchainCreated)
    }

    fn apply_device_creation(
        &mut self,
        block: &Block,
        creation: &DeviceCreation1,
        user_key: Option<(&UserKeyPair, bool, bool)>,
        last_reset: Option<[u8; 32]>,
    ) -> Result<AppliedEvent, CoreError> {
        let nature = block.nature();
        let invalid = |reason| CoreError::invalid(nature, reason);

        if last_reset.is_some_and(|reset| reset != [0; 32]) {
            return Err(invalid(InvalidBlockReason::Forbidden));
        }

        // Resolve the delegating key: the trust chain for a user's first
        // device, otherwise a same-user author device live at this index.
        let delegating_key = if block.author == *self.trustchain_id.as_bytes() {
            if self.users.user(&creation.user_id).is_some() {
                return Err(invalid(InvalidBlockReason::Forbidden));
            }
            self.root_public_signature_key
                .ok_or(invalid(InvalidBlockReason::InvalidAuthor))?
        } else {
            let author_id = DeviceId(block.author);
            let Some(author) = self.users.device(&author_id) else {
                return Err(CoreError::MissingDependency { subject: Subject::Device(author_id) });
            };
            if author.is_revoked_at(block.index) {
                return Err(invalid(InvalidBlockReason::RevokedAuthor));
            }
            if self.users.owner_of(&author_id) != Some(&creation.user_id) {
                return Err(invalid(InvalidBlockReason::Forbidden));
            }
            author.public_signature_key
        };

        verify_signature(
            &delegating_key,
            &creation.delegation_signed_data(),
            &creation.delegation_signature,
        )
        .map_err(|_| invalid(InvalidBlockReason::InvalidDelegationSignature))?;

        verify_signature(
            &creation.ephemeral_public_signature_key,
            &block.hash(),
            &block.signature,
        )
        .map_err(|_| invalid(InvalidBlockReason::InvalidSignature))?;

        // The creation version must match the user's key state, and a v3
        // block for an established user must re-announce the current key.
        let user_has_keys = self
            .users
            .user(&creation.user_id)
            .is_some_and(|user| !user.user_public_keys.is_empty());
        match (user_key, user_has_keys) {
            (None, true) => return Err(invalid(InvalidBlockReason::VersionMismatch)),
            (Some(_), false) if self.users.user(&creation.user_id).is_some() => {
                return Err(invalid(InvalidBlockReason::VersionMismatch));
            }
            (Some((pair, _, _)), true) => {
                let current = self
                    .users
                    .user(&creation.user_id)
                    .and_then(|user| user.current_public_key().copied());
                if current != Some(pair.public_encryption_key) {
                    return Err(invalid(InvalidBlockReason::InvalidUserPublicKey));
                }
            }
            _ => {}
        }

        let device_id = DeviceId(block.hash());
        let (is_ghost, is_server) =
            user_key.map(|(_, ghost, server)| (ghost, server)).unwrap_or((false, false));
        let device = Device {
            id: device_id,
            public_signature_key: creation.public_signature_key,
            public_encryption_key: creation.public_encryption_key,
            is_ghost_device: is_ghost,
            is_server_device: is_server,
            created_at_index: block.index,
            revoked_at_index: None,
        };
        let embedded_key = user_key.map(|(pair, _, _)| pair.public_encryption_key);
        self.users.insert_device(creation.user_id, device, embedded_key);

        Ok(AppliedEvent::DeviceCreated {
            user_id: creation.user_id,
            device_id,
            user_public_encryption_key: embedded_key,
        })
    }

    fn apply_device_revocation(
        &mut self,
        block: &Block,
        target_id: DeviceId,
        rotation: Option<&DeviceRevocation2>,
    ) -> Result<AppliedEvent, CoreError> {
        let nature = block.nature();
        let invalid = |reason| CoreError::invalid(nature, reason);

        let author = self.verified_author_device(block)?;
        let author_id = author.id;

        let Some(target) = self.users.device(&target_id) else {
            return Err(invalid(InvalidBlockReason::InvalidRevokedDevice));
        };
        if target.revoked_at_index.is_some() {
            return Err(invalid(InvalidBlockReason::InvalidRevokedDevice));
        }

        let user_id = *self
            .users
            .owner_of(&author_id)
            .ok_or_else(|| CoreError::Internal("verified device has no owner".into()))?;
        if self.users.owner_of(&target_id) != Some(&user_id) {
            return Err(invalid(InvalidBlockReason::Forbidden));
        }

        let user = self
            .users
            .user(&user_id)
            .ok_or_else(|| CoreError::Internal("device owner missing from store".into()))?;

        let new_key = match rotation {
            None => {
                if !user.user_public_keys.is_empty() {
                    return Err(invalid(InvalidBlockReason::VersionMismatch));
                }
                None
            }
            Some(rotation) => {
                let expected_previous =
                    user.current_public_key().copied().unwrap_or([0; 32]);
                if rotation.previous_public_encryption_key != expected_previous {
                    return Err(invalid(InvalidBlockReason::InvalidUserPublicKey));
                }

                // Exactly one re-seal slot per surviving device.
                let survivors: HashSet<DeviceId> = self
                    .users
                    .devices_of(&user_id)
                    .into_iter()
                    .filter(|device| device.id != target_id && device.revoked_at_index.is_none())
                    .map(|device| device.id)
                    .collect();
                let mut covered = HashSet::with_capacity(rotation.private_keys.len());
                for slot in &rotation.private_keys {
                    if !survivors.contains(&slot.recipient) || !covered.insert(slot.recipient) {
                        return Err(invalid(InvalidBlockReason::MissingUserKeys));
                    }
                }
                if covered.len() != survivors.len() {
                    return Err(invalid(InvalidBlockReason::MissingUserKeys));
                }

                Some(rotation.public_encryption_key)
            }
        };

        self.users.revoke_device(&user_id, &target_id, block.index, new_key);
        Ok(AppliedEvent::DeviceRevoked {
            user_id,
            device_id: target_id,
            new_user_public_encryption_key: new_key,
        })
    }

    fn apply_key_publish(&mut self, block: &Block) -> Result<AppliedEvent, CoreError> {
        let nature = block.nature();
        let invalid = |reason| CoreError::invalid(nature, reason);
        self.verified_author_device(block)?;

        // Recipient must exist at this block's index. The encrypted key
        // itself is opaque ciphertext and is not validated here.
        let resource_id = match &block.payload {
            Payload::KeyPublishToDevice(publish) => {
                let Some(recipient) = self.users.device(&publish.recipient) else {
                    return Err(CoreError::MissingDependency {
                        subject: Subject::Device(publish.recipient),
                    });
                };
                if !recipient.is_active_at(block.index) {
                    return Err(invalid(InvalidBlockReason::Forbidden));
                }
                publish.resource_id
            }
            Payload::KeyPublishToUser(publish) => {
                let key = &publish.recipient_public_encryption_key;
                let Some(user) = self.users.user_by_encryption_key(key) else {
                    return Err(CoreError::MissingDependency {
                        subject: Subject::UserEncryptionKey(*key),
                    });
                };
                if !user.key_valid_at(key, block.index) {
                    return Err(invalid(InvalidBlockReason::InvalidUserPublicKey));
                }
                publish.resource_id
            }
            Payload::KeyPublishToUserGroup(publish) => {
                let key = &publish.recipient_public_encryption_key;
                if self.groups.group_by_encryption_key(key).is_none() {
                    return Err(CoreError::MissingDependency {
                        subject: Subject::GroupEncryptionKey(*key),
                    });
                }
                publish.resource_id
            }
            Payload::KeyPublishToProvisionalUser(publish) => {
                // Provisional identities are not on the chain; only the
                // author signature binds this publish.
                publish.resource_id
            }
            _ => unreachable!("dispatched on payload variant"),
        };

        self.key_publishes.entry(resource_id).or_default().push(block.payload.clone());
        Ok(AppliedEvent::KeyPublishAdded { resource_id })
    }

    fn apply_group_creation(
        &mut self,
        block: &Block,
        creation: &UserGroupCreation,
        opener: &dyn SlotOpener,
    ) -> Result<AppliedEvent, CoreError> {
        let nature = block.nature();
        let invalid = |reason| CoreError::invalid(nature, reason);
        self.verified_author_device(block)?;

        if creation.member_keys.is_empty() && creation.provisional_member_keys.is_empty() {
            return Err(invalid(InvalidBlockReason::Forbidden));
        }

        verify_signature(
            &creation.public_signature_key,
            &creation.self_signed_data(),
            &creation.self_signature,
        )
        .map_err(|_| invalid(InvalidBlockReason::InvalidSelfSignature))?;

        let group_id = creation.group_id();
        if let Some(existing) = self.groups.group(&group_id) {
            // A re-announcement with identical key material is tolerated;
            // anything else is a takeover attempt.
            if existing.public_encryption_key() == creation.public_encryption_key {
                return Ok(AppliedEvent::GroupUpdated {
                    group_id,
                    public_encryption_key: creation.public_encryption_key,
                    internal: existing.is_internal(),
                });
            }
            return Err(invalid(InvalidBlockReason::GroupAlreadyExists));
        }

        let internal = self.groups.insert_from_creation(
            group_id,
            creation.public_signature_key,
            creation.public_encryption_key,
            creation.wrapped_private_signature_key,
            &creation.member_keys,
            &creation.provisional_member_keys,
            block.hash(),
            block.index,
            opener,
        )?;

        Ok(AppliedEvent::GroupCreated {
            group_id,
            public_encryption_key: creation.public_encryption_key,
            internal,
        })
    }

    fn apply_group_addition(
        &mut self,
        block: &Block,
        addition: &UserGroupAddition,
        opener: &dyn SlotOpener,
    ) -> Result<AppliedEvent, CoreError> {
        let nature = block.nature();
        let invalid = |reason| CoreError::invalid(nature, reason);
        self.verified_author_device(block)?;

        if addition.member_keys.is_empty() && addition.provisional_member_keys.is_empty() {
            return Err(invalid(InvalidBlockReason::Forbidden));
        }

        let Some(group) = self.groups.group(&addition.group_id) else {
            return Err(CoreError::MissingDependency {
                subject: Subject::Group(addition.group_id),
            });
        };

        verify_signature(
            &group.public_signature_key(),
            &addition.self_signed_data(),
            &addition.self_signature,
        )
        .map_err(|_| invalid(InvalidBlockReason::InvalidSelfSignature))?;

        if addition.previous_group_block != group.last_group_block() {
            return Err(invalid(InvalidBlockReason::InvalidPreviousGroupBlock));
        }

        let public_encryption_key = group.public_encryption_key();
        let internal = self.groups.apply_addition(
            &addition.group_id,
            &addition.member_keys,
            &addition.provisional_member_keys,
            block.hash(),
            block.index,
            opener,
        )?;

        Ok(AppliedEvent::GroupUpdated {
            group_id: addition.group_id,
            public_encryption_key,
            internal,
        })
    }

    /// Resolve the author device of a device-signed block, checking
    /// liveness and the block signature.
    fn verified_author_device(&self, block: &Block) -> Result<&Device, CoreError> {
        let nature = block.nature();
        let device_id = DeviceId(block.author);
        let Some(device) = self.users.device(&device_id) else {
            return Err(CoreError::MissingDependency { subject: Subject::Device(device_id) });
        };
        if device.is_revoked_at(block.index) {
            return Err(CoreError::invalid(nature, InvalidBlockReason::RevokedAuthor));
        }
        verify_signature(&device.public_signature_key, &block.hash(), &block.signature)
            .map_err(|_| CoreError::invalid(nature, InvalidBlockReason::InvalidSignature))?;
        Ok(device)
    }
}

#[cfg(test)]
mod tests {
    use sealchain_crypto::{EncryptionKeyPair, SignatureKeyPair, SymmetricKey};
    use sealchain_proto::payloads::KeyPublishToUser;

    use super::*;
    use crate::blocks::BlockFactory;
    use crate::group::NoLocalKeys;
    use crate::identity::{mint_identity, SecretIdentity};
    use crate::planner::{plan_key_publishes, KeyPublishRecipients};
    use crate::safe::{DeviceKeys, LocalSafe};

    struct Chain {
        state: TrustchainState,
        root_key: SignatureKeyPair,
        factory: BlockFactory,
        next_index: u64,
        log: Vec<Block>,
    }

    struct Member {
        identity: SecretIdentity,
        ghost: DeviceKeys,
        device: DeviceKeys,
        user_key: EncryptionKeyPair,
    }

    impl Chain {
        fn new() -> Self {
            let root_key = SignatureKeyPair::generate();
            let root = BlockFactory::make_trustchain_creation(&root_key);
            let mut state = TrustchainState::new(root.trustchain_id);
            state.apply_block(&root, &NoLocalKeys).unwrap();
            Self {
                state,
                root_key,
                factory: BlockFactory::new(root.trustchain_id),
                next_index: 1,
                log: vec![root],
            }
        }

        fn apply(&mut self, mut block: Block) -> Result<AppliedEvent, CoreError> {
            self.next_index += 1;
            block.index = self.next_index;
            let event = self.state.apply_block(&block, &NoLocalKeys)?;
            self.log.push(block);
            Ok(event)
        }

        fn signup(&mut self, name: &str) -> Member {
            let identity =
                mint_identity(&self.state.trustchain_id(), &self.root_key, name);
            let (ghost_block, ghost, user_key) = self.factory.make_ghost_device(&identity);
            self.apply(ghost_block).unwrap();
            let (device_block, device) =
                self.factory.make_device(&ghost, identity.user_id, &user_key);
            self.apply(device_block).unwrap();
            Member { identity, ghost, device, user_key }
        }
    }

    #[test]
    fn signup_creates_user_with_one_key_generation() {
        let mut chain = Chain::new();
        let alice = chain.signup("alice");

        let user = chain.state.users().user(&alice.identity.user_id).unwrap();
        assert_eq!(user.devices.len(), 2);
        assert_eq!(user.user_public_keys.len(), 1);
        assert_eq!(user.current_public_key(), Some(&alice.user_key.public));
        assert!(chain.state.users().device(&alice.ghost.device_id).unwrap().is_ghost_device);
    }

    #[test]
    fn wrong_chain_block_is_rejected() {
        let mut chain = Chain::new();
        let identity = mint_identity(&chain.state.trustchain_id(), &chain.root_key, "alice");
        let (mut block, _, _) = chain.factory.make_ghost_device(&identity);
        block.trustchain_id = TrustchainId([0xEE; 32]);
        assert!(matches!(
            chain.state.apply_block(&block, &NoLocalKeys),
            Err(CoreError::InvalidBlock { reason: InvalidBlockReason::InvalidAuthor, .. })
        ));
    }

    #[test]
    fn second_root_block_is_rejected() {
        let mut chain = Chain::new();
        let other_root = BlockFactory::make_trustchain_creation(&SignatureKeyPair::generate());
        let mut replay = chain.log[0].clone();
        replay.payload = other_root.payload;
        assert!(matches!(
            chain.apply(replay),
            Err(CoreError::InvalidBlock { reason: InvalidBlockReason::InvalidNature, .. })
        ));
    }

    #[test]
    fn tampered_delegation_is_rejected() {
        let mut chain = Chain::new();
        let identity = mint_identity(&chain.state.trustchain_id(), &chain.root_key, "alice");
        let (block, _, _) = chain.factory.make_ghost_device(&identity);

        let mut tampered = block;
        let Payload::DeviceCreation3(payload) = &mut tampered.payload else { unreachable!() };
        payload.creation.delegation_signature[0] ^= 0x01;
        // Re-sign so only the delegation is at fault.
        tampered.signature = identity.ephemeral_key_pair.sign(&tampered.hash());

        assert!(matches!(
            chain.apply(tampered),
            Err(CoreError::InvalidBlock {
                reason: InvalidBlockReason::InvalidDelegationSignature,
                ..
            })
        ));
        assert_eq!(chain.state.users().user_count(), 0);
    }

    #[test]
    fn tampered_block_signature_is_rejected() {
        let mut chain = Chain::new();
        let identity = mint_identity(&chain.state.trustchain_id(), &chain.root_key, "alice");
        let (mut block, _, _) = chain.factory.make_ghost_device(&identity);
        block.signature[10] ^= 0x40;
        assert!(matches!(
            chain.apply(block),
            Err(CoreError::InvalidBlock { reason: InvalidBlockReason::InvalidSignature, .. })
        ));
    }

    #[test]
    fn device_before_its_author_reports_missing_dependency() {
        let mut chain = Chain::new();
        let identity = mint_identity(&chain.state.trustchain_id(), &chain.root_key, "alice");
        let (_, ghost, user_key) = chain.factory.make_ghost_device(&identity);
        // The ghost block was never applied.
        let (orphan, _) = chain.factory.make_device(&ghost, identity.user_id, &user_key);

        match chain.apply(orphan) {
            Err(CoreError::MissingDependency { subject: Subject::Device(id) }) => {
                assert_eq!(id, ghost.device_id);
            }
            other => unreachable!("expected missing dependency, got {other:?}"),
        }
    }

    #[test]
    fn revocation_rotates_user_key_and_blocks_author() {
        let mut chain = Chain::new();
        let bob = chain.signup("bob");
        let (phone_block, phone) =
            chain.factory.make_device(&bob.device, bob.identity.user_id, &bob.user_key);
        chain.apply(phone_block).unwrap();

        let survivors = [
            (bob.ghost.device_id, bob.ghost.encryption.public),
            (bob.device.device_id, bob.device.encryption.public),
        ];
        let (revocation, new_user_key) = chain.factory.make_revocation(
            &bob.device,
            phone.device_id,
            Some(&bob.user_key),
            &survivors,
        );
        let event = chain.apply(revocation).unwrap();
        assert!(matches!(event, AppliedEvent::DeviceRevoked { .. }));

        let user = chain.state.users().user(&bob.identity.user_id).unwrap();
        assert_eq!(user.user_public_keys.len(), 2);
        assert_eq!(user.current_public_key(), Some(&new_user_key.public));
        assert!(chain.state.users().device(&phone.device_id).unwrap().revoked_at_index.is_some());

        // The revoked phone can no longer author blocks.
        let (group_block, _) = chain.factory.make_group_creation(&phone, &[bob.user_key.public], &[]);
        assert!(matches!(
            chain.apply(group_block),
            Err(CoreError::InvalidBlock { reason: InvalidBlockReason::RevokedAuthor, .. })
        ));
    }

    #[test]
    fn revocation_must_cover_every_survivor() {
        let mut chain = Chain::new();
        let bob = chain.signup("bob");
        let (phone_block, phone) =
            chain.factory.make_device(&bob.device, bob.identity.user_id, &bob.user_key);
        chain.apply(phone_block).unwrap();

        // Ghost device slot omitted.
        let survivors = [(bob.device.device_id, bob.device.encryption.public)];
        let (revocation, _) = chain.factory.make_revocation(
            &bob.device,
            phone.device_id,
            Some(&bob.user_key),
            &survivors,
        );
        assert!(matches!(
            chain.apply(revocation),
            Err(CoreError::InvalidBlock { reason: InvalidBlockReason::MissingUserKeys, .. })
        ));
        // Dropped, so the phone is still live.
        assert!(chain
            .state
            .users()
            .device(&phone.device_id)
            .unwrap()
            .revoked_at_index
            .is_none());
    }

    #[test]
    fn double_revocation_is_rejected() {
        let mut chain = Chain::new();
        let bob = chain.signup("bob");
        let (phone_block, phone) =
            chain.factory.make_device(&bob.device, bob.identity.user_id, &bob.user_key);
        chain.apply(phone_block).unwrap();

        let survivors = [
            (bob.ghost.device_id, bob.ghost.encryption.public),
            (bob.device.device_id, bob.device.encryption.public),
        ];
        let (first, new_user_key) = chain.factory.make_revocation(
            &bob.device,
            phone.device_id,
            Some(&bob.user_key),
            &survivors,
        );
        chain.apply(first).unwrap();

        let (second, _) = chain.factory.make_revocation(
            &bob.device,
            phone.device_id,
            Some(&new_user_key),
            &survivors,
        );
        assert!(matches!(
            chain.apply(second),
            Err(CoreError::InvalidBlock {
                reason: InvalidBlockReason::InvalidRevokedDevice,
                ..
            })
        ));
    }

    #[test]
    fn group_creation_internal_for_member_external_for_stranger() {
        let mut chain = Chain::new();
        let alice = chain.signup("alice");
        let (block, _) = chain.factory.make_group_creation(&alice.device, &[alice.user_key.public], &[]);

        // Apply with Alice's keys available.
        let mut alice_safe = LocalSafe::new(
            chain.state.trustchain_id(),
            alice.identity.user_id,
            alice.device.clone(),
        );
        alice_safe.record_user_key(0, alice.user_key.clone());

        let mut with_keys = chain.state.clone();
        let mut member_block = block.clone();
        member_block.index = chain.next_index + 1;
        let event = with_keys.apply_block(&member_block, &alice_safe).unwrap();
        assert!(matches!(event, AppliedEvent::GroupCreated { internal: true, .. }));

        // Same block without local keys lands external.
        let event = chain.apply(block).unwrap();
        assert!(matches!(event, AppliedEvent::GroupCreated { internal: false, .. }));
    }

    #[test]
    fn flipped_self_signature_rejected_without_mutation() {
        let mut chain = Chain::new();
        let alice = chain.signup("alice");
        let (block, _) = chain.factory.make_group_creation(&alice.device, &[alice.user_key.public], &[]);

        let mut tampered = block;
        let Payload::UserGroupCreation(payload) = &mut tampered.payload else { unreachable!() };
        payload.self_signature[0] ^= 0x01;
        tampered.signature = alice.device.signature.sign(&tampered.hash());

        let before = chain.state.groups().group_count();
        assert!(matches!(
            chain.apply(tampered),
            Err(CoreError::InvalidBlock {
                reason: InvalidBlockReason::InvalidSelfSignature,
                ..
            })
        ));
        assert_eq!(chain.state.groups().group_count(), before);
    }

    #[test]
    fn addition_must_chain_from_current_head() {
        let mut chain = Chain::new();
        let alice = chain.signup("alice");
        let (creation, mut group) =
            chain.factory.make_group_creation(&alice.device, &[alice.user_key.public], &[]);
        chain.apply(creation).unwrap();

        let good = chain.factory.make_group_addition(&alice.device, &group, &[[7; 32]], &[]);
        chain.apply(good.clone()).unwrap();

        // Head moved; an addition built from the stale head is rejected.
        let stale = chain.factory.make_group_addition(&alice.device, &group, &[[8; 32]], &[]);
        assert!(matches!(
            chain.apply(stale),
            Err(CoreError::InvalidBlock {
                reason: InvalidBlockReason::InvalidPreviousGroupBlock,
                ..
            })
        ));

        // Rebuilt from the new head it verifies.
        group.last_group_block = good.hash();
        let fresh = chain.factory.make_group_addition(&alice.device, &group, &[[8; 32]], &[]);
        chain.apply(fresh).unwrap();
    }

    #[test]
    fn key_publish_records_and_checks_recipient() {
        let mut chain = Chain::new();
        let alice = chain.signup("alice");
        let resource_key = SymmetricKey::generate();
        let resource_id = ResourceId([5; 16]);

        let payloads = plan_key_publishes(
            &resource_key,
            &resource_id,
            &KeyPublishRecipients {
                user_public_encryption_keys: vec![alice.user_key.public],
                ..Default::default()
            },
        );
        let block = chain.factory.make_key_publish(&alice.device, payloads[0].clone());
        chain.apply(block).unwrap();

        assert_eq!(chain.state.key_publishes_for(&resource_id).len(), 1);
        assert!(chain.state.key_publishes_for(&ResourceId([6; 16])).is_empty());
    }

    #[test]
    fn key_publish_to_unknown_user_key_waits() {
        let mut chain = Chain::new();
        let alice = chain.signup("alice");
        let publish = Payload::KeyPublishToUser(KeyPublishToUser {
            recipient_public_encryption_key: [0xDD; 32],
            resource_id: ResourceId([5; 16]),
            sealed_key: [0; 80],
        });
        let block = chain.factory.make_key_publish(&alice.device, publish);
        match chain.apply(block) {
            Err(CoreError::MissingDependency {
                subject: Subject::UserEncryptionKey(key),
            }) => assert_eq!(key, [0xDD; 32]),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn key_publish_to_superseded_key_is_rejected() {
        let mut chain = Chain::new();
        let bob = chain.signup("bob");
        let survivors = [
            (bob.ghost.device_id, bob.ghost.encryption.public),
            (bob.device.device_id, bob.device.encryption.public),
        ];
        // Revoke a throwaway device to rotate the user key.
        let (phone_block, phone) =
            chain.factory.make_device(&bob.device, bob.identity.user_id, &bob.user_key);
        chain.apply(phone_block).unwrap();
        let (revocation, _) = chain.factory.make_revocation(
            &bob.device,
            phone.device_id,
            Some(&bob.user_key),
            &survivors,
        );
        chain.apply(revocation).unwrap();

        // Sealing to the superseded key after rotation fails verification.
        let payloads = plan_key_publishes(
            &SymmetricKey::generate(),
            &ResourceId([5; 16]),
            &KeyPublishRecipients {
                user_public_encryption_keys: vec![bob.user_key.public],
                ..Default::default()
            },
        );
        let block = chain.factory.make_key_publish(&bob.device, payloads[0].clone());
        assert!(matches!(
            chain.apply(block),
            Err(CoreError::InvalidBlock {
                reason: InvalidBlockReason::InvalidUserPublicKey,
                ..
            })
        ));
    }

    #[test]
    fn replaying_the_log_reproduces_the_state() {
        let mut chain = Chain::new();
        let alice = chain.signup("alice");
        let bob = chain.signup("bob");
        let (creation, _) = chain
            .factory
            .make_group_creation(&alice.device, &[alice.user_key.public, bob.user_key.public], &[]);
        chain.apply(creation).unwrap();

        let mut replayed = TrustchainState::new(chain.state.trustchain_id());
        for block in &chain.log {
            replayed.apply_block(block, &NoLocalKeys).unwrap();
        }

        assert_eq!(replayed.users().user_count(), chain.state.users().user_count());
        assert_eq!(replayed.groups().group_count(), chain.state.groups().group_count());
        assert_eq!(replayed.last_index(), chain.state.last_index());
        let original = chain.state.users().user(&alice.identity.user_id).unwrap();
        let replay = replayed.users().user(&alice.identity.user_id).unwrap();
        assert_eq!(original.user_public_keys, replay.user_public_keys);
        assert_eq!(original.devices, replay.devices);
    }
}
