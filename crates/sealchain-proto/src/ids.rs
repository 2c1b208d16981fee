//! Content-addressed identifiers.
//!
//! Every cross-reference in the verified state is one of these id types;
//! state containers own their values and look each other up by id, never by
//! pointer. Ids render as base64 in logs and serialize as base64 strings.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

macro_rules! byte_id {
    ($(#[$doc:meta])* $name:ident, $size:expr) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; $size]);

        impl $name {
            /// Byte width of this id.
            pub const SIZE: usize = $size;

            /// Raw id bytes.
            pub fn as_bytes(&self) -> &[u8; $size] {
                &self.0
            }

            /// Construct from a slice of exactly [`Self::SIZE`] bytes.
            pub fn from_slice(bytes: &[u8]) -> Option<Self> {
                <[u8; $size]>::try_from(bytes).ok().map(Self)
            }
        }

        impl From<[u8; $size]> for $name {
            fn from(bytes: [u8; $size]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), BASE64.encode(self.0))
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&BASE64.encode(self.0))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&BASE64.encode(self.0))
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let text = String::deserialize(deserializer)?;
                let bytes = BASE64.decode(&text).map_err(D::Error::custom)?;
                Self::from_slice(&bytes)
                    .ok_or_else(|| D::Error::custom(concat!("wrong length for ", stringify!($name))))
            }
        }
    };
}

byte_id!(
    /// Root hash of a trust chain; equals the hash of its creation block.
    TrustchainId,
    32
);

byte_id!(
    /// Obfuscated user identifier.
    UserId,
    32
);

byte_id!(
    /// Hash of the device-creation block that introduced a device.
    DeviceId,
    32
);

byte_id!(
    /// Group identifier; equals the group's public signature key.
    GroupId,
    32
);

byte_id!(
    /// Identifier of an encrypted resource (the marker MAC of its key).
    ResourceId,
    16
);
