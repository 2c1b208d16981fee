//! The local key safe.
//!
//! One encrypted record per device holding this device's keypairs, the
//! ordered history of user encryption keypairs, and claimed provisional
//! keypairs. Serialized as JSON with base64 byte fields and encrypted with
//! AEAD under the user secret; rewritten atomically after every rotation or
//! claim, wiped when the local device is revoked.

use serde::{Deserialize, Serialize};

use sealchain_crypto::{aead, EncryptionKeyPair, SignatureKeyPair, SymmetricKey};
use sealchain_proto::{DeviceId, TrustchainId, UserId};

use crate::b64doc;
use crate::error::CoreError;
use crate::group::SlotOpener;

/// This device's long-lived keypairs.
#[derive(Debug, Clone)]
pub struct DeviceKeys {
    /// Hash of this device's creation block.
    pub device_id: DeviceId,
    /// Signature keypair.
    pub signature: SignatureKeyPair,
    /// Encryption keypair.
    pub encryption: EncryptionKeyPair,
}

/// One generation of the user's encryption keypair, private half included.
#[derive(Debug, Clone)]
pub struct UserKeyPairEntry {
    /// Chain index of the block that introduced this generation.
    pub index: u64,
    /// The keypair.
    pub key_pair: EncryptionKeyPair,
}

/// A claimed provisional identity's four keypairs.
#[derive(Debug, Clone)]
pub struct ProvisionalKeyPair {
    /// App-side signature keypair.
    pub app_signature: SignatureKeyPair,
    /// App-side encryption keypair.
    pub app_encryption: EncryptionKeyPair,
    /// Server-side signature keypair.
    pub server_signature: SignatureKeyPair,
    /// Server-side encryption keypair.
    pub server_encryption: EncryptionKeyPair,
}

/// The decrypted safe contents.
#[derive(Debug, Clone)]
pub struct LocalSafe {
    /// Chain this safe belongs to.
    pub trustchain_id: TrustchainId,
    /// User this safe belongs to.
    pub user_id: UserId,
    /// This device's keypairs.
    pub device: DeviceKeys,
    /// User keypair history, ascending by index.
    pub user_keys: Vec<UserKeyPairEntry>,
    /// Claimed provisional keypairs.
    pub provisional_keys: Vec<ProvisionalKeyPair>,
}

impl LocalSafe {
    /// Fresh safe for a just-created device.
    pub fn new(trustchain_id: TrustchainId, user_id: UserId, device: DeviceKeys) -> Self {
        Self { trustchain_id, user_id, device, user_keys: Vec::new(), provisional_keys: Vec::new() }
    }

    /// The newest user keypair, if any generation is held.
    pub fn current_user_key(&self) -> Option<&EncryptionKeyPair> {
        self.user_keys.last().map(|entry| &entry.key_pair)
    }

    /// The user keypair with a given public key.
    pub fn user_key_for(&self, public: &[u8; 32]) -> Option<&EncryptionKeyPair> {
        self.user_keys
            .iter()
            .find(|entry| entry.key_pair.public == *public)
            .map(|entry| &entry.key_pair)
    }

    /// Record a user key generation discovered at `index`.
    ///
    /// Keeps the history ascending; re-recording an already-known public
    /// key is a no-op, so replaying the chain is idempotent.
    pub fn record_user_key(&mut self, index: u64, key_pair: EncryptionKeyPair) {
        if self.user_key_for(&key_pair.public).is_some() {
            return;
        }
        let position = self.user_keys.partition_point(|entry| entry.index <= index);
        self.user_keys.insert(position, UserKeyPairEntry { index, key_pair });
    }

    /// Record a claimed provisional identity.
    pub fn record_provisional(&mut self, key_pair: ProvisionalKeyPair) {
        let exists = self.provisional_keys.iter().any(|held| {
            held.app_signature.public == key_pair.app_signature.public
                && held.server_signature.public == key_pair.server_signature.public
        });
        if !exists {
            self.provisional_keys.push(key_pair);
        }
    }

    /// Encrypt the safe for storage.
    pub fn seal(&self, user_secret: &[u8; 32]) -> Vec<u8> {
        let doc = SafeDoc::from(self);
        let Ok(json) = serde_json::to_vec(&doc) else {
            unreachable!("safe document serialization cannot fail");
        };
        aead::encrypt(&SymmetricKey(*user_secret), &json)
    }

    /// Decrypt and decode a stored safe.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Crypto`] if the record does not authenticate
    /// - [`CoreError::CorruptSafe`] if the decrypted document is malformed
    pub fn open(record: &[u8], user_secret: &[u8; 32]) -> Result<Self, CoreError> {
        let json = aead::decrypt(&SymmetricKey(*user_secret), record)?;
        let doc: SafeDoc = serde_json::from_slice(&json)
            .map_err(|e| CoreError::CorruptSafe { detail: e.to_string() })?;
        doc.try_into()
    }
}

impl SlotOpener for LocalSafe {
    fn user_key_pair(&self, public_encryption_key: &[u8; 32]) -> Option<EncryptionKeyPair> {
        self.user_key_for(public_encryption_key).cloned()
    }

    fn provisional_key_pair(
        &self,
        app_public_signature_key: &[u8; 32],
        server_public_signature_key: &[u8; 32],
    ) -> Option<ProvisionalKeyPair> {
        self.provisional_keys
            .iter()
            .find(|pair| {
                pair.app_signature.public == *app_public_signature_key
                    && pair.server_signature.public == *server_public_signature_key
            })
            .cloned()
    }
}

#[derive(Serialize, Deserialize)]
struct SafeDoc {
    trustchain_id: String,
    user_id: String,
    device_id: String,
    device_private_signature_key: String,
    device_private_encryption_key: String,
    user_keys: Vec<UserKeyDoc>,
    provisional_keys: Vec<ProvisionalKeyDoc>,
}

#[derive(Serialize, Deserialize)]
struct UserKeyDoc {
    index: u64,
    private_encryption_key: String,
}

#[derive(Serialize, Deserialize)]
struct ProvisionalKeyDoc {
    app_private_signature_key: String,
    app_private_encryption_key: String,
    server_private_signature_key: String,
    server_private_encryption_key: String,
}

impl From<&LocalSafe> for SafeDoc {
    fn from(safe: &LocalSafe) -> Self {
        Self {
            trustchain_id: b64doc::encode(safe.trustchain_id.as_bytes()),
            user_id: b64doc::encode(safe.user_id.as_bytes()),
            device_id: b64doc::encode(safe.device.device_id.as_bytes()),
            device_private_signature_key: b64doc::encode(&safe.device.signature.private),
            device_private_encryption_key: b64doc::encode(&safe.device.encryption.private),
            user_keys: safe
                .user_keys
                .iter()
                .map(|entry| UserKeyDoc {
                    index: entry.index,
                    private_encryption_key: b64doc::encode(&entry.key_pair.private),
                })
                .collect(),
            provisional_keys: safe
                .provisional_keys
                .iter()
                .map(|pair| ProvisionalKeyDoc {
                    app_private_signature_key: b64doc::encode(&pair.app_signature.private),
                    app_private_encryption_key: b64doc::encode(&pair.app_encryption.private),
                    server_private_signature_key: b64doc::encode(&pair.server_signature.private),
                    server_private_encryption_key: b64doc::encode(&pair.server_encryption.private),
                })
                .collect(),
        }
    }
}

impl TryFrom<SafeDoc> for LocalSafe {
    type Error = CoreError;

    fn try_from(doc: SafeDoc) -> Result<Self, CoreError> {
        let corrupt = |detail: String| CoreError::CorruptSafe { detail };

        let signature_private =
            b64doc::decode_array::<64>("device_private_signature_key", &doc.device_private_signature_key)
                .map_err(corrupt)?;
        let encryption_private =
            b64doc::decode_array::<32>("device_private_encryption_key", &doc.device_private_encryption_key)
                .map_err(corrupt)?;

        let device = DeviceKeys {
            device_id: DeviceId(
                b64doc::decode_array("device_id", &doc.device_id).map_err(corrupt)?,
            ),
            signature: SignatureKeyPair::from_private(&signature_private)
                .map_err(|e| corrupt(e.to_string()))?,
            encryption: EncryptionKeyPair::from_private(&encryption_private),
        };

        let mut user_keys = Vec::with_capacity(doc.user_keys.len());
        for entry in &doc.user_keys {
            let private =
                b64doc::decode_array::<32>("private_encryption_key", &entry.private_encryption_key)
                    .map_err(corrupt)?;
            user_keys.push(UserKeyPairEntry {
                index: entry.index,
                key_pair: EncryptionKeyPair::from_private(&private),
            });
        }

        let mut provisional_keys = Vec::with_capacity(doc.provisional_keys.len());
        for entry in &doc.provisional_keys {
            let app_signature =
                b64doc::decode_array::<64>("app_private_signature_key", &entry.app_private_signature_key)
                    .map_err(corrupt)?;
            let app_encryption =
                b64doc::decode_array::<32>("app_private_encryption_key", &entry.app_private_encryption_key)
                    .map_err(corrupt)?;
            let server_signature = b64doc::decode_array::<64>(
                "server_private_signature_key",
                &entry.server_private_signature_key,
            )
            .map_err(corrupt)?;
            let server_encryption = b64doc::decode_array::<32>(
                "server_private_encryption_key",
                &entry.server_private_encryption_key,
            )
            .map_err(corrupt)?;
            provisional_keys.push(ProvisionalKeyPair {
                app_signature: SignatureKeyPair::from_private(&app_signature)
                    .map_err(|e| corrupt(e.to_string()))?,
                app_encryption: EncryptionKeyPair::from_private(&app_encryption),
                server_signature: SignatureKeyPair::from_private(&server_signature)
                    .map_err(|e| corrupt(e.to_string()))?,
                server_encryption: EncryptionKeyPair::from_private(&server_encryption),
            });
        }

        Ok(Self {
            trustchain_id: TrustchainId(
                b64doc::decode_array("trustchain_id", &doc.trustchain_id).map_err(corrupt)?,
            ),
            user_id: UserId(b64doc::decode_array("user_id", &doc.user_id).map_err(corrupt)?),
            device,
            user_keys,
            provisional_keys,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_safe() -> LocalSafe {
        let mut safe = LocalSafe::new(
            TrustchainId([1; 32]),
            UserId([2; 32]),
            DeviceKeys {
                device_id: DeviceId([3; 32]),
                signature: SignatureKeyPair::generate(),
                encryption: EncryptionKeyPair::generate(),
            },
        );
        safe.record_user_key(4, EncryptionKeyPair::generate());
        safe.record_user_key(9, EncryptionKeyPair::generate());
        safe
    }

    #[test]
    fn seal_open_roundtrip() {
        let safe = sample_safe();
        let secret = [7u8; 32];
        let record = safe.seal(&secret);
        let restored = LocalSafe::open(&record, &secret).unwrap();

        assert_eq!(restored.user_id, safe.user_id);
        assert_eq!(restored.device.device_id, safe.device.device_id);
        assert_eq!(restored.device.signature.public, safe.device.signature.public);
        assert_eq!(restored.user_keys.len(), 2);
        assert_eq!(
            restored.current_user_key().unwrap().public,
            safe.current_user_key().unwrap().public
        );
    }

    #[test]
    fn wrong_secret_fails_authentication() {
        let record = sample_safe().seal(&[7u8; 32]);
        assert!(matches!(
            LocalSafe::open(&record, &[8u8; 32]),
            Err(CoreError::Crypto(_))
        ));
    }

    #[test]
    fn user_keys_stay_ordered_and_deduped() {
        let mut safe = sample_safe();
        let early = EncryptionKeyPair::generate();
        safe.record_user_key(1, early.clone());
        safe.record_user_key(1, early.clone());

        assert_eq!(safe.user_keys.len(), 3);
        assert_eq!(safe.user_keys[0].index, 1);
        assert!(safe.user_keys.windows(2).all(|w| w[0].index <= w[1].index));
    }

    #[test]
    fn current_user_key_is_newest() {
        let mut safe = sample_safe();
        let newest = EncryptionKeyPair::generate();
        safe.record_user_key(20, newest.clone());
        assert_eq!(safe.current_user_key().unwrap().public, newest.public);
    }

    #[test]
    fn provisional_claims_dedupe() {
        let mut safe = sample_safe();
        let pair = ProvisionalKeyPair {
            app_signature: SignatureKeyPair::generate(),
            app_encryption: EncryptionKeyPair::generate(),
            server_signature: SignatureKeyPair::generate(),
            server_encryption: EncryptionKeyPair::generate(),
        };
        safe.record_provisional(pair.clone());
        safe.record_provisional(pair);
        assert_eq!(safe.provisional_keys.len(), 1);
    }

    #[test]
    fn slot_opener_finds_held_keys() {
        let safe = sample_safe();
        let current = safe.current_user_key().unwrap().public;
        assert!(safe.user_key_pair(&current).is_some());
        assert!(safe.user_key_pair(&[0u8; 32]).is_none());
    }
}
