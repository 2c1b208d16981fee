//! Verified users and their devices.
//!
//! The store owns value types keyed by content-addressed ids; every
//! cross-reference (device → user, encryption key → user) is an id lookup.

use std::collections::HashMap;

use sealchain_proto::{DeviceId, UserId};

/// One verified device of a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Hash of the device-creation block.
    pub id: DeviceId,
    /// Long-lived signature verification key.
    pub public_signature_key: [u8; 32],
    /// Long-lived encryption key.
    pub public_encryption_key: [u8; 32],
    /// Non-interactive key-holder created at registration.
    pub is_ghost_device: bool,
    /// Operated by the application server.
    pub is_server_device: bool,
    /// Chain index of the creation block.
    pub created_at_index: u64,
    /// Chain index of the revocation block, if any. A device is revoked
    /// from that index onward and is never resurrected.
    pub revoked_at_index: Option<u64>,
}

impl Device {
    /// Whether the device counts as revoked at `index`.
    pub fn is_revoked_at(&self, index: u64) -> bool {
        self.revoked_at_index.is_some_and(|revoked_at| revoked_at <= index)
    }

    /// Whether the device exists and is live at `index`.
    pub fn is_active_at(&self, index: u64) -> bool {
        self.created_at_index <= index && !self.is_revoked_at(index)
    }
}

/// One generation of a user's encryption key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserKeyEntry {
    /// The public encryption key.
    pub public_encryption_key: [u8; 32],
    /// Chain index of the block that introduced it.
    pub index: u64,
}

/// A verified user: device list plus the append-only user key history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Obfuscated user id.
    pub id: UserId,
    /// Devices in creation order.
    pub devices: Vec<DeviceId>,
    /// Key history, oldest first. Superseded entries stay queryable.
    pub user_public_keys: Vec<UserKeyEntry>,
}

impl User {
    /// The user's current public encryption key, if they have user keys.
    pub fn current_public_key(&self) -> Option<&[u8; 32]> {
        self.user_public_keys.last().map(|entry| &entry.public_encryption_key)
    }

    /// Whether `key` was this user's key at `index` (current or not yet
    /// superseded by the next generation at that point).
    pub fn key_valid_at(&self, key: &[u8; 32], index: u64) -> bool {
        let Some(position) =
            self.user_public_keys.iter().position(|entry| entry.public_encryption_key == *key)
        else {
            return false;
        };
        match self.user_public_keys.get(position + 1) {
            Some(successor) => successor.index > index,
            None => true,
        }
    }
}

/// Store of verified users and devices.
#[derive(Debug, Default, Clone)]
pub struct UserStore {
    users: HashMap<UserId, User>,
    devices: HashMap<DeviceId, Device>,
    device_owner: HashMap<DeviceId, UserId>,
    user_by_encryption_key: HashMap<[u8; 32], UserId>,
}

impl UserStore {
    /// Look up a user.
    pub fn user(&self, id: &UserId) -> Option<&User> {
        self.users.get(id)
    }

    /// Look up a device.
    pub fn device(&self, id: &DeviceId) -> Option<&Device> {
        self.devices.get(id)
    }

    /// Which user owns a device.
    pub fn owner_of(&self, id: &DeviceId) -> Option<&UserId> {
        self.device_owner.get(id)
    }

    /// Find the user that owns (or once owned) an encryption key.
    pub fn user_by_encryption_key(&self, key: &[u8; 32]) -> Option<&User> {
        self.user_by_encryption_key.get(key).and_then(|id| self.users.get(id))
    }

    /// Devices of a user, resolved.
    pub fn devices_of(&self, id: &UserId) -> Vec<&Device> {
        self.users
            .get(id)
            .map(|user| user.devices.iter().filter_map(|d| self.devices.get(d)).collect())
            .unwrap_or_default()
    }

    /// Number of verified users.
    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Insert a freshly verified device, creating the user on first sight.
    ///
    /// `user_key` carries the user public key embedded in a v3 creation; it
    /// starts the key history when this is the user's first device.
    pub(crate) fn insert_device(
        &mut self,
        user_id: UserId,
        device: Device,
        user_key: Option<[u8; 32]>,
    ) {
        let user = self.users.entry(user_id).or_insert_with(|| User {
            id: user_id,
            devices: Vec::new(),
            user_public_keys: Vec::new(),
        });

        if user.user_public_keys.is_empty() {
            if let Some(key) = user_key {
                user.user_public_keys
                    .push(UserKeyEntry { public_encryption_key: key, index: device.created_at_index });
                self.user_by_encryption_key.insert(key, user_id);
            }
        }

        user.devices.push(device.id);
        self.device_owner.insert(device.id, user_id);
        self.devices.insert(device.id, device);
    }

    /// Mark a device revoked and, for key-rotating revocations, append the
    /// new user key generation.
    pub(crate) fn revoke_device(
        &mut self,
        user_id: &UserId,
        device_id: &DeviceId,
        index: u64,
        rotated_key: Option<[u8; 32]>,
    ) {
        if let Some(device) = self.devices.get_mut(device_id) {
            device.revoked_at_index = Some(index);
        }
        if let Some(key) = rotated_key {
            if let Some(user) = self.users.get_mut(user_id) {
                user.user_public_keys.push(UserKeyEntry { public_encryption_key: key, index });
            }
            self.user_by_encryption_key.insert(key, *user_id);
        }
    }
}
