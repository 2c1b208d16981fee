//! Trust chain block wire format.
//!
//! A block is the atomic verifiable unit of the chain: a versioned envelope
//! carrying a nature tag, a nature-specific payload, the author reference,
//! and a signature over the block hash. The envelope is raw binary with
//! LEB128 varints for the variable-width fields; payloads are fixed-field
//! layouts dispatched on the nature.
//!
//! Parsing never trusts lengths it has not checked: truncated input fails
//! with a typed error before any allocation sized from attacker data, and
//! unknown versions or natures are rejected rather than skipped so an old
//! client cannot misinterpret newer chains.
//!
//! # Invariants
//!
//! - Each payload variant maps to exactly one nature (enforced by match
//!   exhaustiveness).
//! - `serialize(parse(bytes)) == bytes` for every well-formed block, and
//!   `parse(serialize(block)) == block` for every known nature. Round-trips
//!   are property-tested.
//! - The block hash covers `(nature, author, payload)` and is independent of
//!   the server-assigned index.

#![forbid(unsafe_code)]

mod block;
mod errors;
mod ids;
mod nature;
pub mod payloads;
mod varint;

pub use block::{Block, BLOCK_FORMAT_VERSION};
pub use errors::{ProtocolError, Result};
pub use ids::{DeviceId, GroupId, ResourceId, TrustchainId, UserId};
pub use nature::Nature;
pub use payloads::Payload;
pub use varint::{decode_varint, encode_varint, varint_len};

/// Size of a 32-byte hash or key field on the wire.
pub const HASH_SIZE: usize = 32;

/// Size of a resource id.
pub const RESOURCE_ID_SIZE: usize = 16;

/// Size of a key sealed to one recipient (32-byte key + seal overhead).
pub const SEALED_KEY_SIZE: usize = 80;

/// Size of a key sealed to a provisional identity (two seal layers).
pub const DOUBLE_SEALED_KEY_SIZE: usize = 128;

/// Size of a wrapped group private signature key.
pub const WRAPPED_SIGNATURE_KEY_SIZE: usize = sealchain_crypto::wrap::WRAPPED_SIGNATURE_KEY_SIZE;
