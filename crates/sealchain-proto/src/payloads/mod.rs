//! Nature-specific payload layouts.
//!
//! Each payload variant maps to exactly one [`Nature`]; the block envelope
//! carries the nature tag, so payload bytes themselves are untagged.
//! Adding a variant breaks the `match` in `nature()`, `encode()`, and
//! `decode()`, so no variant can be left unhandled.

pub mod device;
pub mod group;
pub mod key_publish;
pub(crate) mod reader;
pub mod trustchain;

use crate::errors::Result;
use crate::nature::Nature;
use crate::payloads::reader::Reader;

pub use device::{
    DeviceCreation1, DeviceCreation2, DeviceCreation3, DeviceRevocation1, DeviceRevocation2,
    SealedUserKeyForDevice, UserKeyPair,
};
pub use group::{
    SealedKeyForProvisional, SealedKeyForUser, UserGroupAddition, UserGroupCreation,
};
pub use key_publish::{
    KeyPublishToDevice, KeyPublishToProvisionalUser, KeyPublishToUser, KeyPublishToUserGroup,
};
pub use trustchain::TrustchainCreation;

/// A parsed block payload, one variant per nature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Root block.
    TrustchainCreation(TrustchainCreation),
    /// Device creation v1.
    DeviceCreation1(DeviceCreation1),
    /// Device creation v2.
    DeviceCreation2(DeviceCreation2),
    /// Device creation v3.
    DeviceCreation3(DeviceCreation3),
    /// Device revocation v1.
    DeviceRevocation1(DeviceRevocation1),
    /// Device revocation v2.
    DeviceRevocation2(DeviceRevocation2),
    /// Legacy key publish to a device.
    KeyPublishToDevice(KeyPublishToDevice),
    /// Key publish to a user.
    KeyPublishToUser(KeyPublishToUser),
    /// Key publish to a group.
    KeyPublishToUserGroup(KeyPublishToUserGroup),
    /// Key publish to a provisional identity.
    KeyPublishToProvisionalUser(KeyPublishToProvisionalUser),
    /// Group creation.
    UserGroupCreation(UserGroupCreation),
    /// Group addition.
    UserGroupAddition(UserGroupAddition),
}

impl Payload {
    /// Nature tag for this payload.
    pub const fn nature(&self) -> Nature {
        match self {
            Self::TrustchainCreation(_) => Nature::TrustchainCreation,
            Self::DeviceCreation1(_) => Nature::DeviceCreation1,
            Self::DeviceCreation2(_) => Nature::DeviceCreation2,
            Self::DeviceCreation3(_) => Nature::DeviceCreation3,
            Self::DeviceRevocation1(_) => Nature::DeviceRevocation1,
            Self::DeviceRevocation2(_) => Nature::DeviceRevocation2,
            Self::KeyPublishToDevice(_) => Nature::KeyPublishToDevice,
            Self::KeyPublishToUser(_) => Nature::KeyPublishToUser,
            Self::KeyPublishToUserGroup(_) => Nature::KeyPublishToUserGroup,
            Self::KeyPublishToProvisionalUser(_) => Nature::KeyPublishToProvisionalUser,
            Self::UserGroupCreation(_) => Nature::UserGroupCreation,
            Self::UserGroupAddition(_) => Nature::UserGroupAddition,
        }
    }

    /// Append the payload's wire bytes to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Self::TrustchainCreation(inner) => inner.encode(out),
            Self::DeviceCreation1(inner) => inner.encode(out),
            Self::DeviceCreation2(inner) => inner.encode(out),
            Self::DeviceCreation3(inner) => inner.encode(out),
            Self::DeviceRevocation1(inner) => inner.encode(out),
            Self::DeviceRevocation2(inner) => inner.encode(out),
            Self::KeyPublishToDevice(inner) => inner.encode(out),
            Self::KeyPublishToUser(inner) => inner.encode(out),
            Self::KeyPublishToUserGroup(inner) => inner.encode(out),
            Self::KeyPublishToProvisionalUser(inner) => inner.encode(out),
            Self::UserGroupCreation(inner) => inner.encode(out),
            Self::UserGroupAddition(inner) => inner.encode(out),
        }
    }

    /// The payload's wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }

    /// Parse payload bytes for a known nature.
    ///
    /// # Errors
    ///
    /// Any [`crate::ProtocolError`] from the variant's fixed layout,
    /// including trailing bytes after the layout is consumed.
    pub fn decode(nature: Nature, bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let payload = match nature {
            Nature::TrustchainCreation => {
                Self::TrustchainCreation(TrustchainCreation::decode(&mut reader)?)
            }
            Nature::DeviceCreation1 => Self::DeviceCreation1(DeviceCreation1::decode(&mut reader)?),
            Nature::DeviceCreation2 => Self::DeviceCreation2(DeviceCreation2::decode(&mut reader)?),
            Nature::DeviceCreation3 => Self::DeviceCreation3(DeviceCreation3::decode(&mut reader)?),
            Nature::DeviceRevocation1 => {
                Self::DeviceRevocation1(DeviceRevocation1::decode(&mut reader)?)
            }
            Nature::DeviceRevocation2 => {
                Self::DeviceRevocation2(DeviceRevocation2::decode(&mut reader)?)
            }
            Nature::KeyPublishToDevice => {
                Self::KeyPublishToDevice(KeyPublishToDevice::decode(&mut reader)?)
            }
            Nature::KeyPublishToUser => {
                Self::KeyPublishToUser(KeyPublishToUser::decode(&mut reader)?)
            }
            Nature::KeyPublishToUserGroup => {
                Self::KeyPublishToUserGroup(KeyPublishToUserGroup::decode(&mut reader)?)
            }
            Nature::KeyPublishToProvisionalUser => {
                Self::KeyPublishToProvisionalUser(KeyPublishToProvisionalUser::decode(&mut reader)?)
            }
            Nature::UserGroupCreation => {
                Self::UserGroupCreation(UserGroupCreation::decode(&mut reader)?)
            }
            Nature::UserGroupAddition => {
                Self::UserGroupAddition(UserGroupAddition::decode(&mut reader)?)
            }
        };
        reader.finish("payload")?;
        Ok(payload)
    }
}
