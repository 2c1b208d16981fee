//! Block nature tags.

use crate::errors::{ProtocolError, Result};

/// The type tag of a block.
///
/// Wire values are fixed for all time; value 5 was retired before this
/// format version and parses as unsupported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum Nature {
    /// Root block of a trust chain.
    TrustchainCreation = 1,
    /// First-generation device creation (no user keys).
    DeviceCreation1 = 2,
    /// Resource key sealed directly to a device encryption key (legacy).
    KeyPublishToDevice = 3,
    /// First-generation device revocation (no user-key rotation).
    DeviceRevocation1 = 4,
    /// Device creation with a reset marker.
    DeviceCreation2 = 6,
    /// Device creation carrying the user keypair.
    DeviceCreation3 = 7,
    /// Resource key sealed to a user's current public encryption key.
    KeyPublishToUser = 8,
    /// Device revocation with user-key rotation.
    DeviceRevocation2 = 9,
    /// Group creation.
    UserGroupCreation = 10,
    /// Resource key sealed to a group public encryption key.
    KeyPublishToUserGroup = 11,
    /// Group membership addition.
    UserGroupAddition = 12,
    /// Resource key double-sealed to a provisional identity.
    KeyPublishToProvisionalUser = 13,
}

impl Nature {
    /// Wire value of this nature.
    pub const fn to_u64(self) -> u64 {
        self as u64
    }

    /// Parse a wire value.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::UnsupportedNature`] for any value outside the known
    /// set, including the retired value 5.
    pub fn from_u64(value: u64) -> Result<Self> {
        Ok(match value {
            1 => Self::TrustchainCreation,
            2 => Self::DeviceCreation1,
            3 => Self::KeyPublishToDevice,
            4 => Self::DeviceRevocation1,
            6 => Self::DeviceCreation2,
            7 => Self::DeviceCreation3,
            8 => Self::KeyPublishToUser,
            9 => Self::DeviceRevocation2,
            10 => Self::UserGroupCreation,
            11 => Self::KeyPublishToUserGroup,
            12 => Self::UserGroupAddition,
            13 => Self::KeyPublishToProvisionalUser,
            other => return Err(ProtocolError::UnsupportedNature(other)),
        })
    }

    /// True for every device-creation version.
    pub const fn is_device_creation(self) -> bool {
        matches!(self, Self::DeviceCreation1 | Self::DeviceCreation2 | Self::DeviceCreation3)
    }

    /// True for every device-revocation version.
    pub const fn is_device_revocation(self) -> bool {
        matches!(self, Self::DeviceRevocation1 | Self::DeviceRevocation2)
    }

    /// True for every key-publish variant.
    pub const fn is_key_publish(self) -> bool {
        matches!(
            self,
            Self::KeyPublishToDevice
                | Self::KeyPublishToUser
                | Self::KeyPublishToUserGroup
                | Self::KeyPublishToProvisionalUser
        )
    }

    /// All natures this implementation understands, in wire-value order.
    pub const ALL: [Nature; 12] = [
        Self::TrustchainCreation,
        Self::DeviceCreation1,
        Self::KeyPublishToDevice,
        Self::DeviceRevocation1,
        Self::DeviceCreation2,
        Self::DeviceCreation3,
        Self::KeyPublishToUser,
        Self::DeviceRevocation2,
        Self::UserGroupCreation,
        Self::KeyPublishToUserGroup,
        Self::UserGroupAddition,
        Self::KeyPublishToProvisionalUser,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values_round_trip() {
        for nature in Nature::ALL {
            assert_eq!(Nature::from_u64(nature.to_u64()).unwrap(), nature);
        }
    }

    #[test]
    fn retired_and_unknown_values_rejected() {
        for value in [0u64, 5, 14, 255, u64::MAX] {
            assert_eq!(Nature::from_u64(value), Err(ProtocolError::UnsupportedNature(value)));
        }
    }

    #[test]
    fn kind_predicates() {
        assert!(Nature::DeviceCreation3.is_device_creation());
        assert!(!Nature::DeviceRevocation2.is_device_creation());
        assert!(Nature::DeviceRevocation1.is_device_revocation());
        assert!(Nature::KeyPublishToProvisionalUser.is_key_publish());
        assert!(!Nature::UserGroupCreation.is_key_publish());
    }
}
