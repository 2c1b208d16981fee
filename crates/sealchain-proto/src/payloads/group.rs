//! Group creation and addition payloads.
//!
//! Both carry a trailing self-signature: a signature over the payload's
//! canonical bytes (everything ahead of the signature field) under the
//! group's own signature key, binding the block to the identity it
//! announces.
//!
//! The provisional-member list is an optional trailing segment ahead of the
//! self-signature. Older chains omit it entirely; absence parses as empty,
//! and an empty list is never written, so the segment is unambiguous: after
//! the member slots, exactly 64 bytes remaining means no list.

use crate::errors::Result;
use crate::payloads::reader::Reader;
use crate::{GroupId, DOUBLE_SEALED_KEY_SIZE, HASH_SIZE, SEALED_KEY_SIZE, WRAPPED_SIGNATURE_KEY_SIZE};

/// Upper bound on member and provisional-member lists.
const MAX_GROUP_SLOTS: usize = 4096;

/// Size of the trailing self-signature.
const SELF_SIGNATURE_SIZE: usize = 64;

/// One member slot: the group private encryption key sealed to a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedKeyForUser {
    /// The recipient user's public encryption key at block-creation time.
    pub recipient_public_encryption_key: [u8; HASH_SIZE],
    /// Group private encryption key sealed to that user key.
    pub sealed_private_encryption_key: [u8; SEALED_KEY_SIZE],
}

impl SealedKeyForUser {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.recipient_public_encryption_key);
        out.extend_from_slice(&self.sealed_private_encryption_key);
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            recipient_public_encryption_key: reader
                .array("member.recipient_public_encryption_key")?,
            sealed_private_encryption_key: reader.array("member.sealed_private_encryption_key")?,
        })
    }
}

/// One provisional slot: the group private encryption key double-sealed to
/// a provisional identity, addressed by its public signature keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedKeyForProvisional {
    /// App-side public signature key.
    pub app_public_signature_key: [u8; HASH_SIZE],
    /// Server-side public signature key.
    pub server_public_signature_key: [u8; HASH_SIZE],
    /// Group private encryption key, app-side seal inner, server-side outer.
    pub sealed_private_encryption_key: [u8; DOUBLE_SEALED_KEY_SIZE],
}

impl SealedKeyForProvisional {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.app_public_signature_key);
        out.extend_from_slice(&self.server_public_signature_key);
        out.extend_from_slice(&self.sealed_private_encryption_key);
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            app_public_signature_key: reader.array("provisional.app_public_signature_key")?,
            server_public_signature_key: reader
                .array("provisional.server_public_signature_key")?,
            sealed_private_encryption_key: reader
                .array("provisional.sealed_private_encryption_key")?,
        })
    }
}

fn encode_member_lists(
    members: &[SealedKeyForUser],
    provisionals: &[SealedKeyForProvisional],
    out: &mut Vec<u8>,
) {
    crate::varint::encode_varint(members.len() as u64, out);
    for member in members {
        member.encode(out);
    }
    if !provisionals.is_empty() {
        crate::varint::encode_varint(provisionals.len() as u64, out);
        for provisional in provisionals {
            provisional.encode(out);
        }
    }
}

fn decode_member_lists(
    reader: &mut Reader<'_>,
) -> Result<(Vec<SealedKeyForUser>, Vec<SealedKeyForProvisional>)> {
    let member_count = reader.list_len("members", MAX_GROUP_SLOTS)?;
    let mut members = Vec::with_capacity(member_count);
    for _ in 0..member_count {
        members.push(SealedKeyForUser::decode(reader)?);
    }

    let mut provisionals = Vec::new();
    if reader.remaining() != SELF_SIGNATURE_SIZE {
        let provisional_count = reader.list_len("provisional_members", MAX_GROUP_SLOTS)?;
        provisionals.reserve(provisional_count);
        for _ in 0..provisional_count {
            provisionals.push(SealedKeyForProvisional::decode(reader)?);
        }
    }
    Ok((members, provisionals))
}

/// Group creation payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserGroupCreation {
    /// Group public signature key; doubles as the group id.
    pub public_signature_key: [u8; HASH_SIZE],
    /// Group public encryption key.
    pub public_encryption_key: [u8; HASH_SIZE],
    /// Group private signature key wrapped under the private encryption key.
    pub wrapped_private_signature_key: [u8; WRAPPED_SIGNATURE_KEY_SIZE],
    /// One slot per founding member user.
    pub member_keys: Vec<SealedKeyForUser>,
    /// One slot per founding provisional member.
    pub provisional_member_keys: Vec<SealedKeyForProvisional>,
    /// Signature over the payload body under the group signature key.
    pub self_signature: [u8; SELF_SIGNATURE_SIZE],
}

impl UserGroupCreation {
    /// Group id announced by this payload.
    pub fn group_id(&self) -> GroupId {
        GroupId(self.public_signature_key)
    }

    /// Canonical bytes covered by the self-signature.
    pub fn self_signed_data(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_body(&mut out);
        out
    }

    fn encode_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.public_signature_key);
        out.extend_from_slice(&self.public_encryption_key);
        out.extend_from_slice(&self.wrapped_private_signature_key);
        encode_member_lists(&self.member_keys, &self.provisional_member_keys, out);
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        self.encode_body(out);
        out.extend_from_slice(&self.self_signature);
    }

    pub(crate) fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        let public_signature_key = reader.array("public_signature_key")?;
        let public_encryption_key = reader.array("public_encryption_key")?;
        let wrapped_private_signature_key = reader.array("wrapped_private_signature_key")?;
        let (member_keys, provisional_member_keys) = decode_member_lists(reader)?;
        let self_signature = reader.array("self_signature")?;
        Ok(Self {
            public_signature_key,
            public_encryption_key,
            wrapped_private_signature_key,
            member_keys,
            provisional_member_keys,
            self_signature,
        })
    }
}

/// Group addition payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserGroupAddition {
    /// Group being extended.
    pub group_id: GroupId,
    /// Hash of the group's previous block; chains additions in order.
    pub previous_group_block: [u8; HASH_SIZE],
    /// One slot per added member user.
    pub member_keys: Vec<SealedKeyForUser>,
    /// One slot per added provisional member.
    pub provisional_member_keys: Vec<SealedKeyForProvisional>,
    /// Signature over the payload body under the current group signature key.
    pub self_signature: [u8; SELF_SIGNATURE_SIZE],
}

impl UserGroupAddition {
    /// Canonical bytes covered by the self-signature.
    pub fn self_signed_data(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_body(&mut out);
        out
    }

    fn encode_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.group_id.as_bytes());
        out.extend_from_slice(&self.previous_group_block);
        encode_member_lists(&self.member_keys, &self.provisional_member_keys, out);
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        self.encode_body(out);
        out.extend_from_slice(&self.self_signature);
    }

    pub(crate) fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        let group_id = GroupId(reader.array("group_id")?);
        let previous_group_block = reader.array("previous_group_block")?;
        let (member_keys, provisional_member_keys) = decode_member_lists(reader)?;
        let self_signature = reader.array("self_signature")?;
        Ok(Self {
            group_id,
            previous_group_block,
            member_keys,
            provisional_member_keys,
            self_signature,
        })
    }
}
