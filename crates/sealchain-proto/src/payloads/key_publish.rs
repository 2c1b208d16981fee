//! Key-publish payloads.
//!
//! A key publish seals one resource key to one recipient keypair. The
//! encrypted key field is opaque to verification; only the matching private
//! key gives it meaning.

use crate::errors::Result;
use crate::payloads::reader::Reader;
use crate::{DeviceId, ResourceId, DOUBLE_SEALED_KEY_SIZE, HASH_SIZE, SEALED_KEY_SIZE};

/// Upper bound on the legacy variable-width encrypted key.
const MAX_LEGACY_KEY_SIZE: usize = 1024;

/// Resource key sealed directly to a device encryption key.
///
/// Legacy nature: still verified and decrypted, never issued by new
/// sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPublishToDevice {
    /// Recipient device.
    pub recipient: DeviceId,
    /// Resource the key unlocks.
    pub resource_id: ResourceId,
    /// Sealed resource key (variable width on old chains).
    pub encrypted_key: Vec<u8>,
}

impl KeyPublishToDevice {
    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.recipient.as_bytes());
        out.extend_from_slice(self.resource_id.as_bytes());
        crate::varint::encode_varint(self.encrypted_key.len() as u64, out);
        out.extend_from_slice(&self.encrypted_key);
    }

    pub(crate) fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        let recipient = DeviceId(reader.array("recipient")?);
        let resource_id = ResourceId(reader.array("resource_id")?);
        let len = reader.list_len("encrypted_key", MAX_LEGACY_KEY_SIZE)?;
        let encrypted_key = reader.bytes(len, "encrypted_key")?.to_vec();
        Ok(Self { recipient, resource_id, encrypted_key })
    }
}

/// Resource key sealed to a user public encryption key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPublishToUser {
    /// The user public encryption key the key is sealed to. Identifies both
    /// the user and which generation of their key to unseal with.
    pub recipient_public_encryption_key: [u8; HASH_SIZE],
    /// Resource the key unlocks.
    pub resource_id: ResourceId,
    /// Sealed resource key.
    pub sealed_key: [u8; SEALED_KEY_SIZE],
}

impl KeyPublishToUser {
    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.recipient_public_encryption_key);
        out.extend_from_slice(self.resource_id.as_bytes());
        out.extend_from_slice(&self.sealed_key);
    }

    pub(crate) fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            recipient_public_encryption_key: reader.array("recipient_public_encryption_key")?,
            resource_id: ResourceId(reader.array("resource_id")?),
            sealed_key: reader.array("sealed_key")?,
        })
    }
}

/// Resource key sealed to a group public encryption key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPublishToUserGroup {
    /// The group public encryption key the key is sealed to.
    pub recipient_public_encryption_key: [u8; HASH_SIZE],
    /// Resource the key unlocks.
    pub resource_id: ResourceId,
    /// Sealed resource key.
    pub sealed_key: [u8; SEALED_KEY_SIZE],
}

impl KeyPublishToUserGroup {
    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.recipient_public_encryption_key);
        out.extend_from_slice(self.resource_id.as_bytes());
        out.extend_from_slice(&self.sealed_key);
    }

    pub(crate) fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            recipient_public_encryption_key: reader.array("recipient_public_encryption_key")?,
            resource_id: ResourceId(reader.array("resource_id")?),
            sealed_key: reader.array("sealed_key")?,
        })
    }
}

/// Resource key double-sealed to a provisional identity.
///
/// The identity is addressed by its two public signature keys; the key is
/// sealed to the app-side encryption key, then to the server-side one, so
/// claiming requires both private halves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPublishToProvisionalUser {
    /// App-side public signature key of the provisional identity.
    pub app_public_signature_key: [u8; HASH_SIZE],
    /// Server-side public signature key of the provisional identity.
    pub server_public_signature_key: [u8; HASH_SIZE],
    /// Resource the key unlocks.
    pub resource_id: ResourceId,
    /// Double-sealed resource key (app-side inner, server-side outer).
    pub sealed_key: [u8; DOUBLE_SEALED_KEY_SIZE],
}

impl KeyPublishToProvisionalUser {
    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.app_public_signature_key);
        out.extend_from_slice(&self.server_public_signature_key);
        out.extend_from_slice(self.resource_id.as_bytes());
        out.extend_from_slice(&self.sealed_key);
    }

    pub(crate) fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            app_public_signature_key: reader.array("app_public_signature_key")?,
            server_public_signature_key: reader.array("server_public_signature_key")?,
            resource_id: ResourceId(reader.array("resource_id")?),
            sealed_key: reader.array("sealed_key")?,
        })
    }
}
