//! Device creation and revocation payloads.
//!
//! Three creation versions coexist on old chains. v1 is the bare device;
//! v2 prefixes a reset marker that must be zero; v3 appends the user
//! keypair (public half plus the private half sealed to this device) and a
//! flags byte. Revocation v1 names the device; v2 additionally rotates the
//! user key and re-seals it to every remaining device.

use crate::errors::{ProtocolError, Result};
use crate::payloads::reader::Reader;
use crate::{DeviceId, UserId, HASH_SIZE, SEALED_KEY_SIZE};

/// Upper bound on the re-seal list of a v2 revocation.
const MAX_PRIVATE_KEY_ENTRIES: usize = 4096;

const FLAG_GHOST_DEVICE: u8 = 0b0000_0001;
const FLAG_SERVER_DEVICE: u8 = 0b0000_0010;

/// Device creation, first version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCreation1 {
    /// Public half of the one-shot keypair that signs this block.
    pub ephemeral_public_signature_key: [u8; HASH_SIZE],
    /// User the device belongs to.
    pub user_id: UserId,
    /// Signature over `ephemeral_public ‖ user_id` by the delegating key.
    pub delegation_signature: [u8; 64],
    /// The device's long-lived public signature key.
    pub public_signature_key: [u8; HASH_SIZE],
    /// The device's long-lived public encryption key.
    pub public_encryption_key: [u8; HASH_SIZE],
}

impl DeviceCreation1 {
    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.ephemeral_public_signature_key);
        out.extend_from_slice(self.user_id.as_bytes());
        out.extend_from_slice(&self.delegation_signature);
        out.extend_from_slice(&self.public_signature_key);
        out.extend_from_slice(&self.public_encryption_key);
    }

    pub(crate) fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            ephemeral_public_signature_key: reader.array("ephemeral_public_signature_key")?,
            user_id: UserId(reader.array("user_id")?),
            delegation_signature: reader.array("delegation_signature")?,
            public_signature_key: reader.array("public_signature_key")?,
            public_encryption_key: reader.array("public_encryption_key")?,
        })
    }

    /// Bytes covered by the delegation signature.
    pub fn delegation_signed_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(HASH_SIZE + UserId::SIZE);
        data.extend_from_slice(&self.ephemeral_public_signature_key);
        data.extend_from_slice(self.user_id.as_bytes());
        data
    }
}

/// Device creation, second version: a reset marker ahead of the v1 fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCreation2 {
    /// Historical reset marker; must be all zero.
    pub last_reset: [u8; HASH_SIZE],
    /// The v1 fields.
    pub creation: DeviceCreation1,
}

impl DeviceCreation2 {
    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.last_reset);
        self.creation.encode(out);
    }

    pub(crate) fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            last_reset: reader.array("last_reset")?,
            creation: DeviceCreation1::decode(reader)?,
        })
    }
}

/// The user keypair carried by a v3 device creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserKeyPair {
    /// The user's public encryption key at insertion time.
    pub public_encryption_key: [u8; HASH_SIZE],
    /// The matching private key, sealed to the new device.
    pub sealed_private_encryption_key: [u8; SEALED_KEY_SIZE],
}

/// Device creation, third version: v1 plus the user keypair and flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCreation3 {
    /// The v1 fields.
    pub creation: DeviceCreation1,
    /// User keypair handed to the new device.
    pub user_key_pair: UserKeyPair,
    /// Non-interactive key-holder device created at registration.
    pub is_ghost_device: bool,
    /// Device operated by the application server.
    pub is_server_device: bool,
}

impl DeviceCreation3 {
    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        self.creation.encode(out);
        out.extend_from_slice(&self.user_key_pair.public_encryption_key);
        out.extend_from_slice(&self.user_key_pair.sealed_private_encryption_key);
        let mut flags = 0u8;
        if self.is_ghost_device {
            flags |= FLAG_GHOST_DEVICE;
        }
        if self.is_server_device {
            flags |= FLAG_SERVER_DEVICE;
        }
        out.push(flags);
    }

    pub(crate) fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        let creation = DeviceCreation1::decode(reader)?;
        let user_key_pair = UserKeyPair {
            public_encryption_key: reader.array("user_public_encryption_key")?,
            sealed_private_encryption_key: reader.array("sealed_user_private_encryption_key")?,
        };
        let flags = reader.byte("device_flags")?;
        if flags & !(FLAG_GHOST_DEVICE | FLAG_SERVER_DEVICE) != 0 {
            return Err(ProtocolError::UnknownFlags { value: flags });
        }
        Ok(Self {
            creation,
            user_key_pair,
            is_ghost_device: flags & FLAG_GHOST_DEVICE != 0,
            is_server_device: flags & FLAG_SERVER_DEVICE != 0,
        })
    }
}

/// Device revocation, first version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRevocation1 {
    /// Device being revoked.
    pub device_id: DeviceId,
}

impl DeviceRevocation1 {
    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.device_id.as_bytes());
    }

    pub(crate) fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self { device_id: DeviceId(reader.array("device_id")?) })
    }
}

/// One re-sealed user private key for a surviving device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedUserKeyForDevice {
    /// Device the slot is for.
    pub recipient: DeviceId,
    /// New user private encryption key sealed to that device.
    pub sealed_private_encryption_key: [u8; SEALED_KEY_SIZE],
}

/// Device revocation, second version: rotates the user key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRevocation2 {
    /// Device being revoked.
    pub device_id: DeviceId,
    /// The rotated (new) user public encryption key.
    pub public_encryption_key: [u8; HASH_SIZE],
    /// The user public encryption key being superseded.
    pub previous_public_encryption_key: [u8; HASH_SIZE],
    /// Previous private key sealed to the new key, keeping history readable.
    pub sealed_key_for_previous_user_key: [u8; SEALED_KEY_SIZE],
    /// One slot per remaining non-revoked device of the user.
    pub private_keys: Vec<SealedUserKeyForDevice>,
}

impl DeviceRevocation2 {
    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.device_id.as_bytes());
        out.extend_from_slice(&self.public_encryption_key);
        out.extend_from_slice(&self.previous_public_encryption_key);
        out.extend_from_slice(&self.sealed_key_for_previous_user_key);
        crate::varint::encode_varint(self.private_keys.len() as u64, out);
        for entry in &self.private_keys {
            out.extend_from_slice(entry.recipient.as_bytes());
            out.extend_from_slice(&entry.sealed_private_encryption_key);
        }
    }

    pub(crate) fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        let device_id = DeviceId(reader.array("device_id")?);
        let public_encryption_key = reader.array("public_encryption_key")?;
        let previous_public_encryption_key = reader.array("previous_public_encryption_key")?;
        let sealed_key_for_previous_user_key =
            reader.array("sealed_key_for_previous_user_key")?;
        let count = reader.list_len("private_keys", MAX_PRIVATE_KEY_ENTRIES)?;
        let mut private_keys = Vec::with_capacity(count);
        for _ in 0..count {
            private_keys.push(SealedUserKeyForDevice {
                recipient: DeviceId(reader.array("private_keys.recipient")?),
                sealed_private_encryption_key: reader.array("private_keys.sealed_key")?,
            });
        }
        Ok(Self {
            device_id,
            public_encryption_key,
            previous_public_encryption_key,
            sealed_key_for_previous_user_key,
            private_keys,
        })
    }
}
