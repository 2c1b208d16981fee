//! Outgoing block construction.
//!
//! Every block a session pushes is built here, so the signing rules live in
//! one place: device creations are signed by their ephemeral keypair and
//! delegated by the author; everything else is signed by the authoring
//! device's signature key. Blocks leave with index 0; the server assigns
//! the real index, which the hash and signature deliberately do not cover.

use sealchain_crypto::sealed::{double_seal, seal};
use sealchain_crypto::wrap::wrap_signature_key;
use sealchain_crypto::{EncryptionKeyPair, SignatureKeyPair};
use sealchain_proto::payloads::{
    DeviceCreation1, DeviceCreation3, DeviceRevocation2, SealedKeyForProvisional,
    SealedKeyForUser, SealedUserKeyForDevice, TrustchainCreation, UserGroupAddition,
    UserGroupCreation, UserKeyPair,
};
use sealchain_proto::{Block, DeviceId, Payload, TrustchainId, UserId};

use crate::group::InternalGroup;
use crate::identity::{PublicProvisionalIdentity, SecretIdentity};
use crate::safe::DeviceKeys;

/// Builds signed blocks for one trust chain.
#[derive(Debug, Clone, Copy)]
pub struct BlockFactory {
    trustchain_id: TrustchainId,
}

impl BlockFactory {
    /// Factory for a chain.
    pub fn new(trustchain_id: TrustchainId) -> Self {
        Self { trustchain_id }
    }

    /// Build a chain's root block and return it with its id.
    ///
    /// The root block is self-certifying: author and signature are zero and
    /// the block hash *is* the trustchain id.
    pub fn make_trustchain_creation(root_key: &SignatureKeyPair) -> Block {
        let mut block = Block {
            index: 1,
            trustchain_id: TrustchainId([0; 32]),
            payload: Payload::TrustchainCreation(TrustchainCreation {
                public_signature_key: root_key.public,
            }),
            author: [0; 32],
            signature: [0; 64],
        };
        block.trustchain_id = TrustchainId(block.hash());
        block
    }

    /// Build the ghost device that anchors a new user.
    ///
    /// Delegated by the trust chain via the identity's delegation signature
    /// and signed by the identity's ephemeral keypair. The fresh user
    /// keypair is sealed to the ghost device itself.
    ///
    /// Returns the block, the ghost's keys, and the user keypair.
    pub fn make_ghost_device(
        &self,
        identity: &SecretIdentity,
    ) -> (Block, DeviceKeys, EncryptionKeyPair) {
        let signature = SignatureKeyPair::generate();
        let encryption = EncryptionKeyPair::generate();
        let user_key = EncryptionKeyPair::generate();

        let payload = Payload::DeviceCreation3(DeviceCreation3 {
            creation: DeviceCreation1 {
                ephemeral_public_signature_key: identity.ephemeral_key_pair.public,
                user_id: identity.user_id,
                delegation_signature: identity.delegation_signature,
                public_signature_key: signature.public,
                public_encryption_key: encryption.public,
            },
            user_key_pair: UserKeyPair {
                public_encryption_key: user_key.public,
                sealed_private_encryption_key: seal_to(&user_key.private, &encryption.public),
            },
            is_ghost_device: true,
            is_server_device: false,
        });

        let block = self.signed_block(
            *self.trustchain_id.as_bytes(),
            &identity.ephemeral_key_pair,
            payload,
        );
        let device = DeviceKeys { device_id: DeviceId(block.hash()), signature, encryption };
        (block, device, user_key)
    }

    /// Build an additional device for an existing user, authored by one of
    /// their current devices.
    ///
    /// Returns the block and the new device's keys.
    pub fn make_device(
        &self,
        author: &DeviceKeys,
        user_id: UserId,
        user_key: &EncryptionKeyPair,
    ) -> (Block, DeviceKeys) {
        let signature = SignatureKeyPair::generate();
        let encryption = EncryptionKeyPair::generate();
        let ephemeral = SignatureKeyPair::generate();

        let mut delegation_data = Vec::with_capacity(64);
        delegation_data.extend_from_slice(&ephemeral.public);
        delegation_data.extend_from_slice(user_id.as_bytes());
        let delegation_signature = author.signature.sign(&delegation_data);

        let payload = Payload::DeviceCreation3(DeviceCreation3 {
            creation: DeviceCreation1 {
                ephemeral_public_signature_key: ephemeral.public,
                user_id,
                delegation_signature,
                public_signature_key: signature.public,
                public_encryption_key: encryption.public,
            },
            user_key_pair: UserKeyPair {
                public_encryption_key: user_key.public,
                sealed_private_encryption_key: seal_to(&user_key.private, &encryption.public),
            },
            is_ghost_device: false,
            is_server_device: false,
        });

        let block = self.signed_block(*author.device_id.as_bytes(), &ephemeral, payload);
        let device = DeviceKeys { device_id: DeviceId(block.hash()), signature, encryption };
        (block, device)
    }

    /// Build a key-rotating revocation of `target`.
    ///
    /// `remaining_devices` lists every non-revoked device of the user
    /// *except* the target, as `(device id, device public encryption key)`;
    /// the rotated user key is sealed to each. The previous user keypair is
    /// sealed to the rotated public key so older publishes stay readable.
    ///
    /// Returns the block and the rotated user keypair.
    pub fn make_revocation(
        &self,
        author: &DeviceKeys,
        target: DeviceId,
        previous_user_key: Option<&EncryptionKeyPair>,
        remaining_devices: &[(DeviceId, [u8; 32])],
    ) -> (Block, EncryptionKeyPair) {
        let new_user_key = EncryptionKeyPair::generate();

        let previous_public =
            previous_user_key.map(|key| key.public).unwrap_or([0; 32]);
        let previous_private = previous_user_key.map(|key| key.private).unwrap_or([0; 32]);

        let payload = Payload::DeviceRevocation2(DeviceRevocation2 {
            device_id: target,
            public_encryption_key: new_user_key.public,
            previous_public_encryption_key: previous_public,
            sealed_key_for_previous_user_key: seal_to(&previous_private, &new_user_key.public),
            private_keys: remaining_devices
                .iter()
                .map(|(device_id, device_public)| SealedUserKeyForDevice {
                    recipient: *device_id,
                    sealed_private_encryption_key: seal_to(&new_user_key.private, device_public),
                })
                .collect(),
        });

        let block =
            self.signed_block(*author.device_id.as_bytes(), &author.signature, payload);
        (block, new_user_key)
    }

    /// Build a group creation for the given member keys.
    ///
    /// Returns the block and the group in internal form (the author is a
    /// founding member and holds the keys by construction).
    pub fn make_group_creation(
        &self,
        author: &DeviceKeys,
        member_public_encryption_keys: &[[u8; 32]],
        provisional_members: &[PublicProvisionalIdentity],
    ) -> (Block, InternalGroup) {
        let group_signature = SignatureKeyPair::generate();
        let group_encryption = EncryptionKeyPair::generate();

        let mut creation = UserGroupCreation {
            public_signature_key: group_signature.public,
            public_encryption_key: group_encryption.public,
            wrapped_private_signature_key: wrap_signature_key(
                &group_signature.private,
                &group_encryption.private,
            ),
            member_keys: member_public_encryption_keys
                .iter()
                .map(|user_key| SealedKeyForUser {
                    recipient_public_encryption_key: *user_key,
                    sealed_private_encryption_key: seal_to(&group_encryption.private, user_key),
                })
                .collect(),
            provisional_member_keys: provisional_members
                .iter()
                .map(|provisional| self.provisional_slot(&group_encryption, provisional))
                .collect(),
            self_signature: [0; 64],
        };
        creation.self_signature = group_signature.sign(&creation.self_signed_data());

        let block = self.signed_block(
            *author.device_id.as_bytes(),
            &author.signature,
            Payload::UserGroupCreation(creation),
        );
        let group = InternalGroup {
            id: sealchain_proto::GroupId(group_signature.public),
            signature_key_pair: group_signature,
            encryption_key_pair: group_encryption,
            last_group_block: block.hash(),
            index: 0,
        };
        (block, group)
    }

    /// Build a membership addition for a group this device holds the keys
    /// of.
    pub fn make_group_addition(
        &self,
        author: &DeviceKeys,
        group: &InternalGroup,
        member_public_encryption_keys: &[[u8; 32]],
        provisional_members: &[PublicProvisionalIdentity],
    ) -> Block {
        let mut addition = UserGroupAddition {
            group_id: group.id,
            previous_group_block: group.last_group_block,
            member_keys: member_public_encryption_keys
                .iter()
                .map(|user_key| SealedKeyForUser {
                    recipient_public_encryption_key: *user_key,
                    sealed_private_encryption_key: seal_to(
                        &group.encryption_key_pair.private,
                        user_key,
                    ),
                })
                .collect(),
            provisional_member_keys: provisional_members
                .iter()
                .map(|provisional| self.provisional_slot(&group.encryption_key_pair, provisional))
                .collect(),
            self_signature: [0; 64],
        };
        addition.self_signature = group.signature_key_pair.sign(&addition.self_signed_data());

        self.signed_block(
            *author.device_id.as_bytes(),
            &author.signature,
            Payload::UserGroupAddition(addition),
        )
    }

    /// Sign a planned key-publish payload.
    pub fn make_key_publish(&self, author: &DeviceKeys, payload: Payload) -> Block {
        debug_assert!(payload.nature().is_key_publish());
        self.signed_block(*author.device_id.as_bytes(), &author.signature, payload)
    }

    fn provisional_slot(
        &self,
        group_encryption: &EncryptionKeyPair,
        provisional: &PublicProvisionalIdentity,
    ) -> SealedKeyForProvisional {
        let sealed = double_seal(
            &group_encryption.private,
            &provisional.app_public_encryption_key,
            &provisional.server_public_encryption_key,
        );
        let Ok(sealed_private_encryption_key) = <[u8; 128]>::try_from(sealed.as_slice()) else {
            unreachable!("double-sealing 32 bytes yields exactly 128");
        };
        SealedKeyForProvisional {
            app_public_signature_key: provisional.app_public_signature_key,
            server_public_signature_key: provisional.server_public_signature_key,
            sealed_private_encryption_key,
        }
    }

    fn signed_block(
        &self,
        author: [u8; 32],
        signer: &SignatureKeyPair,
        payload: Payload,
    ) -> Block {
        let mut block = Block {
            index: 0,
            trustchain_id: self.trustchain_id,
            payload,
            author,
            signature: [0; 64],
        };
        block.signature = signer.sign(&block.hash());
        block
    }
}

fn seal_to(private_key: &[u8; 32], recipient_public: &[u8; 32]) -> [u8; 80] {
    let sealed = seal(private_key, recipient_public);
    let Ok(fixed) = <[u8; 80]>::try_from(sealed.as_slice()) else {
        unreachable!("sealing 32 bytes yields exactly 80");
    };
    fixed
}

#[cfg(test)]
mod tests {
    use sealchain_crypto::sealed::seal_open;
    use sealchain_crypto::verify_signature;
    use sealchain_proto::Nature;

    use super::*;
    use crate::identity::mint_identity;

    fn chain() -> (TrustchainId, SignatureKeyPair, BlockFactory) {
        let root_key = SignatureKeyPair::generate();
        let root = BlockFactory::make_trustchain_creation(&root_key);
        let factory = BlockFactory::new(root.trustchain_id);
        (root.trustchain_id, root_key, factory)
    }

    #[test]
    fn root_block_is_self_certifying() {
        let root_key = SignatureKeyPair::generate();
        let root = BlockFactory::make_trustchain_creation(&root_key);
        assert_eq!(root.hash(), *root.trustchain_id.as_bytes());
        assert_eq!(root.author, [0; 32]);
        assert_eq!(root.signature, [0; 64]);
    }

    #[test]
    fn ghost_device_signed_by_ephemeral_key() {
        let (trustchain_id, root_key, factory) = chain();
        let identity = mint_identity(&trustchain_id, &root_key, "alice");
        let (block, device, user_key) = factory.make_ghost_device(&identity);

        assert_eq!(block.nature(), Nature::DeviceCreation3);
        assert_eq!(block.author, *trustchain_id.as_bytes());
        verify_signature(&identity.ephemeral_key_pair.public, &block.hash(), &block.signature)
            .unwrap();

        // The sealed user key opens with the ghost device's encryption key.
        let Payload::DeviceCreation3(payload) = &block.payload else { unreachable!() };
        let opened = seal_open(
            &payload.user_key_pair.sealed_private_encryption_key,
            &device.encryption,
        )
        .unwrap();
        assert_eq!(opened, user_key.private);
        assert!(payload.is_ghost_device);
    }

    #[test]
    fn additional_device_delegated_by_author() {
        let (trustchain_id, root_key, factory) = chain();
        let identity = mint_identity(&trustchain_id, &root_key, "alice");
        let (_, ghost, user_key) = factory.make_ghost_device(&identity);
        let (block, device) = factory.make_device(&ghost, identity.user_id, &user_key);

        assert_eq!(block.author, *ghost.device_id.as_bytes());
        let Payload::DeviceCreation3(payload) = &block.payload else { unreachable!() };
        verify_signature(
            &ghost.signature.public,
            &payload.creation.delegation_signed_data(),
            &payload.creation.delegation_signature,
        )
        .unwrap();
        assert!(!payload.is_ghost_device);
        assert_eq!(device.device_id.as_bytes(), &block.hash());
    }

    #[test]
    fn revocation_seals_new_key_to_survivors() {
        let (trustchain_id, root_key, factory) = chain();
        let identity = mint_identity(&trustchain_id, &root_key, "bob");
        let (_, ghost, user_key) = factory.make_ghost_device(&identity);
        let (_, laptop) = factory.make_device(&ghost, identity.user_id, &user_key);
        let (_, phone) = factory.make_device(&ghost, identity.user_id, &user_key);

        let survivors =
            [(ghost.device_id, ghost.encryption.public), (laptop.device_id, laptop.encryption.public)];
        let (block, new_user_key) =
            factory.make_revocation(&laptop, phone.device_id, Some(&user_key), &survivors);

        let Payload::DeviceRevocation2(payload) = &block.payload else { unreachable!() };
        assert_eq!(payload.previous_public_encryption_key, user_key.public);
        assert_eq!(payload.private_keys.len(), 2);

        let laptop_slot =
            payload.private_keys.iter().find(|slot| slot.recipient == laptop.device_id).unwrap();
        let opened =
            seal_open(&laptop_slot.sealed_private_encryption_key, &laptop.encryption).unwrap();
        assert_eq!(opened, new_user_key.private);

        // Previous key stays recoverable under the rotated key.
        let previous =
            seal_open(&payload.sealed_key_for_previous_user_key, &new_user_key).unwrap();
        assert_eq!(previous, user_key.private);
    }

    #[test]
    fn group_creation_self_signature_verifies() {
        let (trustchain_id, root_key, factory) = chain();
        let identity = mint_identity(&trustchain_id, &root_key, "alice");
        let (_, ghost, user_key) = factory.make_ghost_device(&identity);
        let (block, group) = factory.make_group_creation(&ghost, &[user_key.public], &[]);

        let Payload::UserGroupCreation(payload) = &block.payload else { unreachable!() };
        verify_signature(
            &payload.public_signature_key,
            &payload.self_signed_data(),
            &payload.self_signature,
        )
        .unwrap();
        assert_eq!(group.last_group_block, block.hash());
        assert_eq!(group.id.as_bytes(), &payload.public_signature_key);

        // A founding member can open their slot.
        let opened = seal_open(
            &payload.member_keys[0].sealed_private_encryption_key,
            &user_key,
        )
        .unwrap();
        assert_eq!(opened, group.encryption_key_pair.private);
    }

    #[test]
    fn group_addition_chains_previous_block() {
        let (trustchain_id, root_key, factory) = chain();
        let identity = mint_identity(&trustchain_id, &root_key, "alice");
        let (_, ghost, user_key) = factory.make_ghost_device(&identity);
        let (creation_block, group) = factory.make_group_creation(&ghost, &[user_key.public], &[]);

        let block = factory.make_group_addition(&ghost, &group, &[[7; 32]], &[]);
        let Payload::UserGroupAddition(payload) = &block.payload else { unreachable!() };
        assert_eq!(payload.previous_group_block, creation_block.hash());
        verify_signature(
            &group.signature_key_pair.public,
            &payload.self_signed_data(),
            &payload.self_signature,
        )
        .unwrap();
    }
}
