//! Sealchain client: the session orchestrator.
//!
//! Binds the trust chain core to a transport and a storage backend and
//! exposes the operations an SDK shell needs: encrypt, decrypt, share,
//! groups, provisional claims, device management. Incoming blocks are
//! verified on a single lane; resource keys are resolved through the chain
//! and cached encrypted at rest.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
pub mod resource_keys;
pub mod session;
pub mod storage;
pub mod stream;
pub mod transport;

pub use error::SessionError;
pub use resource_keys::ResourceKeyManager;
pub use session::{
    EncryptionOptions, Session, SessionConfig, SharingOptions, Status, MAX_GROUP_SIZE,
};
pub use storage::{MemoryStorage, Storage, StorageError, Table};
pub use stream::{
    ChunkDecryptor, ChunkEncryptor, StreamError, StreamHeader, CHUNK_OVERHEAD, DEFAULT_CHUNK_SIZE,
};
pub use transport::{Transport, TransportError};
