//! Key-publish planning.
//!
//! Pure translation from a recipient set to key-publish payloads: one block
//! per recipient, every key sealed to the recipient's *current* material.
//! The session resolves identities to keys, signs the payloads, and pushes
//! them as one batch. Legacy publish-to-device is decrypt-only and never
//! planned.

use sealchain_crypto::sealed::{double_seal, seal};
use sealchain_crypto::SymmetricKey;
use sealchain_proto::payloads::{
    KeyPublishToProvisionalUser, KeyPublishToUser, KeyPublishToUserGroup,
};
use sealchain_proto::{Payload, ResourceId};

use crate::identity::PublicProvisionalIdentity;

/// Resolved recipients of one resource key.
#[derive(Debug, Clone, Default)]
pub struct KeyPublishRecipients {
    /// Current public encryption key of each recipient user.
    pub user_public_encryption_keys: Vec<[u8; 32]>,
    /// Public encryption key of each recipient group.
    pub group_public_encryption_keys: Vec<[u8; 32]>,
    /// Each recipient provisional identity.
    pub provisional_identities: Vec<PublicProvisionalIdentity>,
}

impl KeyPublishRecipients {
    /// Whether there is nobody to publish to.
    pub fn is_empty(&self) -> bool {
        self.user_public_encryption_keys.is_empty()
            && self.group_public_encryption_keys.is_empty()
            && self.provisional_identities.is_empty()
    }
}

/// Produce one key-publish payload per recipient.
pub fn plan_key_publishes(
    resource_key: &SymmetricKey,
    resource_id: &ResourceId,
    recipients: &KeyPublishRecipients,
) -> Vec<Payload> {
    let mut payloads = Vec::with_capacity(
        recipients.user_public_encryption_keys.len()
            + recipients.group_public_encryption_keys.len()
            + recipients.provisional_identities.len(),
    );

    for user_key in &recipients.user_public_encryption_keys {
        payloads.push(Payload::KeyPublishToUser(KeyPublishToUser {
            recipient_public_encryption_key: *user_key,
            resource_id: *resource_id,
            sealed_key: seal_fixed(resource_key, user_key),
        }));
    }

    for group_key in &recipients.group_public_encryption_keys {
        payloads.push(Payload::KeyPublishToUserGroup(KeyPublishToUserGroup {
            recipient_public_encryption_key: *group_key,
            resource_id: *resource_id,
            sealed_key: seal_fixed(resource_key, group_key),
        }));
    }

    for provisional in &recipients.provisional_identities {
        let sealed = double_seal(
            resource_key.as_bytes(),
            &provisional.app_public_encryption_key,
            &provisional.server_public_encryption_key,
        );
        let Ok(sealed_key) = <[u8; 128]>::try_from(sealed.as_slice()) else {
            unreachable!("double-sealing 32 bytes yields exactly 128");
        };
        payloads.push(Payload::KeyPublishToProvisionalUser(KeyPublishToProvisionalUser {
            app_public_signature_key: provisional.app_public_signature_key,
            server_public_signature_key: provisional.server_public_signature_key,
            resource_id: *resource_id,
            sealed_key,
        }));
    }

    payloads
}

fn seal_fixed(resource_key: &SymmetricKey, recipient: &[u8; 32]) -> [u8; 80] {
    let sealed = seal(resource_key.as_bytes(), recipient);
    let Ok(fixed) = <[u8; 80]>::try_from(sealed.as_slice()) else {
        unreachable!("sealing 32 bytes yields exactly 80");
    };
    fixed
}

#[cfg(test)]
mod tests {
    use sealchain_crypto::sealed::{double_seal_open, seal_open};
    use sealchain_crypto::EncryptionKeyPair;
    use sealchain_proto::TrustchainId;

    use super::*;
    use crate::identity::SecretProvisionalIdentity;

    #[test]
    fn one_payload_per_recipient_in_order() {
        let recipients = KeyPublishRecipients {
            user_public_encryption_keys: vec![[1; 32], [2; 32]],
            group_public_encryption_keys: vec![[3; 32]],
            provisional_identities: vec![
                SecretProvisionalIdentity::generate(&TrustchainId([0; 32]), "a@b.c").to_public(),
            ],
        };
        let payloads =
            plan_key_publishes(&SymmetricKey::generate(), &ResourceId([9; 16]), &recipients);

        assert_eq!(payloads.len(), 4);
        assert!(matches!(payloads[0], Payload::KeyPublishToUser(_)));
        assert!(matches!(payloads[1], Payload::KeyPublishToUser(_)));
        assert!(matches!(payloads[2], Payload::KeyPublishToUserGroup(_)));
        assert!(matches!(payloads[3], Payload::KeyPublishToProvisionalUser(_)));
    }

    #[test]
    fn user_publish_unseals_with_recipient_key() {
        let recipient = EncryptionKeyPair::generate();
        let resource_key = SymmetricKey::generate();
        let recipients = KeyPublishRecipients {
            user_public_encryption_keys: vec![recipient.public],
            ..Default::default()
        };
        let payloads = plan_key_publishes(&resource_key, &ResourceId([9; 16]), &recipients);

        let Payload::KeyPublishToUser(publish) = &payloads[0] else { unreachable!() };
        assert_eq!(publish.resource_id, ResourceId([9; 16]));
        let opened = seal_open(&publish.sealed_key, &recipient).unwrap();
        assert_eq!(opened, resource_key.as_bytes());
    }

    #[test]
    fn provisional_publish_requires_both_halves() {
        let secret = SecretProvisionalIdentity::generate(&TrustchainId([0; 32]), "a@b.c");
        let resource_key = SymmetricKey::generate();
        let recipients = KeyPublishRecipients {
            provisional_identities: vec![secret.to_public()],
            ..Default::default()
        };
        let payloads = plan_key_publishes(&resource_key, &ResourceId([9; 16]), &recipients);

        let Payload::KeyPublishToProvisionalUser(publish) = &payloads[0] else { unreachable!() };
        let opened =
            double_seal_open(&publish.sealed_key, &secret.app_encryption, &secret.server_encryption)
                .unwrap();
        assert_eq!(opened, resource_key.as_bytes());

        let wrong = EncryptionKeyPair::generate();
        assert!(double_seal_open(&publish.sealed_key, &wrong, &secret.server_encryption).is_err());
    }

    #[test]
    fn empty_recipient_set_plans_nothing() {
        let payloads = plan_key_publishes(
            &SymmetricKey::generate(),
            &ResourceId([9; 16]),
            &KeyPublishRecipients::default(),
        );
        assert!(payloads.is_empty());
    }
}
