//! In-memory trustchain server.
//!
//! Plays the server's role for tests: appends blocks with assigned
//! indices, answers the history queries, mints identities (it holds the
//! trust chain's private key, as the application server would), and models
//! the provisional-identity verification exchange including code delivery.
//!
//! The server never verifies block contents beyond framing; like the real
//! one, it is untrusted, and clients verify everything.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use sealchain_client::{Transport, TransportError};
use sealchain_core::{
    mint_identity, BlockFactory, ProvisionalKeyPair, PublicProvisionalIdentity, SecretIdentity,
    SecretProvisionalIdentity,
};
use sealchain_crypto::SignatureKeyPair;
use sealchain_proto::{Block, DeviceId, GroupId, Payload, TrustchainId, UserId};

/// Verification attempts allowed before lockout.
const MAX_VERIFICATION_ATTEMPTS: u32 = 3;

struct ProvisionalRecord {
    secret: SecretProvisionalIdentity,
    verification_code: String,
    attempts: u32,
    expired: bool,
}

struct ServerInner {
    blocks: Vec<Block>,
    provisional: HashMap<String, ProvisionalRecord>,
}

/// Shared in-memory server; clones talk to the same chain.
#[derive(Clone)]
pub struct TrustchainServer {
    trustchain_id: TrustchainId,
    root_key: Arc<SignatureKeyPair>,
    inner: Arc<Mutex<ServerInner>>,
}

impl TrustchainServer {
    /// Spin up a fresh chain with its root block at index 1.
    pub fn new() -> Self {
        let root_key = SignatureKeyPair::generate();
        let root = BlockFactory::make_trustchain_creation(&root_key);
        Self {
            trustchain_id: root.trustchain_id,
            root_key: Arc::new(root_key),
            inner: Arc::new(Mutex::new(ServerInner {
                blocks: vec![root],
                provisional: HashMap::new(),
            })),
        }
    }

    /// This chain's id.
    pub fn trustchain_id(&self) -> TrustchainId {
        self.trustchain_id
    }

    /// Mint a secret identity for an application user id.
    pub fn create_identity(&self, app_user_id: &str) -> SecretIdentity {
        mint_identity(&self.trustchain_id, &self.root_key, app_user_id)
    }

    /// The verification code "emailed" for a provisional identity.
    pub fn verification_code_for(&self, email: &str) -> Option<String> {
        self.lock().provisional.get(email).map(|record| record.verification_code.clone())
    }

    /// Test hook: expire the verification code of an email.
    pub fn expire_verification_code(&self, email: &str) {
        if let Some(record) = self.lock().provisional.get_mut(email) {
            record.expired = true;
        }
    }

    /// Number of blocks on the chain.
    pub fn block_count(&self) -> usize {
        self.lock().blocks.len()
    }

    fn lock(&self) -> MutexGuard<'_, ServerInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn user_of_device(blocks: &[Block], device_id: &DeviceId) -> Option<UserId> {
        blocks.iter().find_map(|block| {
            let creation = match &block.payload {
                Payload::DeviceCreation1(c) => c,
                Payload::DeviceCreation2(c) => &c.creation,
                Payload::DeviceCreation3(c) => &c.creation,
                _ => return None,
            };
            (block.hash() == *device_id.as_bytes()).then_some(creation.user_id)
        })
    }

    fn group_of_block(block: &Block) -> Option<GroupId> {
        match &block.payload {
            Payload::UserGroupCreation(creation) => Some(creation.group_id()),
            Payload::UserGroupAddition(addition) => Some(addition.group_id),
            _ => None,
        }
    }
}

impl Default for TrustchainServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for TrustchainServer {
    async fn push_blocks(&self, blocks: Vec<Block>) -> Result<(), TransportError> {
        let mut inner = self.lock();
        for mut block in blocks {
            if block.trustchain_id != self.trustchain_id {
                return Err(TransportError::Conflict("block for a different chain".into()));
            }
            block.index = inner.blocks.len() as u64 + 1;
            inner.blocks.push(block);
        }
        Ok(())
    }

    async fn pull_blocks(&self, after_index: u64) -> Result<Vec<Block>, TransportError> {
        Ok(self
            .lock()
            .blocks
            .iter()
            .filter(|block| block.index > after_index)
            .cloned()
            .collect())
    }

    async fn get_user_history_by_user_ids(
        &self,
        user_ids: Vec<UserId>,
    ) -> Result<Vec<Block>, TransportError> {
        let inner = self.lock();
        let mut history: Vec<Block> = vec![inner.blocks[0].clone()];
        history.extend(inner.blocks.iter().filter(|block| match &block.payload {
            Payload::DeviceCreation1(c) => user_ids.contains(&c.user_id),
            Payload::DeviceCreation2(c) => user_ids.contains(&c.creation.user_id),
            Payload::DeviceCreation3(c) => user_ids.contains(&c.creation.user_id),
            Payload::DeviceRevocation1(r) => {
                Self::user_of_device(&inner.blocks, &r.device_id)
                    .is_some_and(|owner| user_ids.contains(&owner))
            }
            Payload::DeviceRevocation2(r) => {
                Self::user_of_device(&inner.blocks, &r.device_id)
                    .is_some_and(|owner| user_ids.contains(&owner))
            }
            _ => false,
        }).cloned());
        Ok(history)
    }

    async fn get_user_history_by_device_ids(
        &self,
        device_ids: Vec<DeviceId>,
    ) -> Result<Vec<Block>, TransportError> {
        let owners: Vec<UserId> = {
            let inner = self.lock();
            device_ids
                .iter()
                .filter_map(|device_id| Self::user_of_device(&inner.blocks, device_id))
                .collect()
        };
        self.get_user_history_by_user_ids(owners).await
    }

    async fn get_groups_blocks_by_ids(
        &self,
        group_ids: Vec<GroupId>,
    ) -> Result<Vec<Block>, TransportError> {
        Ok(self
            .lock()
            .blocks
            .iter()
            .filter(|block| {
                Self::group_of_block(block).is_some_and(|group| group_ids.contains(&group))
            })
            .cloned()
            .collect())
    }

    async fn get_groups_blocks_by_public_encryption_key(
        &self,
        public_encryption_key: [u8; 32],
    ) -> Result<Vec<Block>, TransportError> {
        let inner = self.lock();
        let Some(group_id) = inner.blocks.iter().find_map(|block| match &block.payload {
            Payload::UserGroupCreation(creation)
                if creation.public_encryption_key == public_encryption_key =>
            {
                Some(creation.group_id())
            }
            _ => None,
        }) else {
            return Ok(Vec::new());
        };
        Ok(inner
            .blocks
            .iter()
            .filter(|block| Self::group_of_block(block) == Some(group_id))
            .cloned()
            .collect())
    }

    async fn get_public_provisional_identity(
        &self,
        email: String,
    ) -> Result<PublicProvisionalIdentity, TransportError> {
        let trustchain_id = self.trustchain_id;
        let mut inner = self.lock();
        let record = inner.provisional.entry(email.clone()).or_insert_with(|| {
            use rand::Rng;
            let code: u32 = rand::thread_rng().gen_range(0..100_000_000);
            ProvisionalRecord {
                secret: SecretProvisionalIdentity::generate(&trustchain_id, &email),
                verification_code: format!("{code:08}"),
                attempts: 0,
                expired: false,
            }
        });
        Ok(record.secret.to_public())
    }

    async fn claim_provisional_identity(
        &self,
        email: String,
        verification_code: String,
    ) -> Result<ProvisionalKeyPair, TransportError> {
        let mut inner = self.lock();
        let Some(record) = inner.provisional.get_mut(&email) else {
            return Err(TransportError::NotFound(format!(
                "no provisional identity for {email}"
            )));
        };
        if record.expired {
            return Err(TransportError::ExpiredVerification);
        }
        if record.attempts >= MAX_VERIFICATION_ATTEMPTS {
            return Err(TransportError::TooManyAttempts);
        }
        if record.verification_code != verification_code {
            record.attempts += 1;
            return Err(TransportError::InvalidVerification);
        }
        record.attempts = 0;
        Ok(record.secret.key_pair())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_assigns_consecutive_indices() {
        let server = TrustchainServer::new();
        let identity = server.create_identity("alice");
        let factory = BlockFactory::new(server.trustchain_id());
        let (ghost_block, ghost, user_key) = factory.make_ghost_device(&identity);
        let (device_block, _) = factory.make_device(&ghost, identity.user_id, &user_key);

        server.push_blocks(vec![ghost_block, device_block]).await.unwrap();

        let blocks = server.pull_blocks(0).await.unwrap();
        let indices: Vec<u64> = blocks.iter().map(|block| block.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert!(server.pull_blocks(2).await.unwrap().iter().all(|block| block.index > 2));
    }

    #[tokio::test]
    async fn user_history_includes_root_and_revocations() {
        let server = TrustchainServer::new();
        let identity = server.create_identity("bob");
        let factory = BlockFactory::new(server.trustchain_id());
        let (ghost_block, ghost, user_key) = factory.make_ghost_device(&identity);
        let (device_block, device) = factory.make_device(&ghost, identity.user_id, &user_key);
        let (revocation, _) = factory.make_revocation(
            &ghost,
            device.device_id,
            Some(&user_key),
            &[(ghost.device_id, ghost.encryption.public)],
        );
        server.push_blocks(vec![ghost_block, device_block, revocation]).await.unwrap();

        let history =
            server.get_user_history_by_user_ids(vec![identity.user_id]).await.unwrap();
        assert_eq!(history.len(), 4); // root + ghost + device + revocation

        let none = server
            .get_user_history_by_user_ids(vec![UserId([0xEE; 32])])
            .await
            .unwrap();
        assert_eq!(none.len(), 1); // root only
    }

    #[tokio::test]
    async fn wrong_verification_code_counts_attempts() {
        let server = TrustchainServer::new();
        server.get_public_provisional_identity("a@b.c".into()).await.unwrap();

        for _ in 0..MAX_VERIFICATION_ATTEMPTS {
            assert!(matches!(
                server.claim_provisional_identity("a@b.c".into(), "wrong".into()).await,
                Err(TransportError::InvalidVerification)
            ));
        }
        assert!(matches!(
            server.claim_provisional_identity("a@b.c".into(), "wrong".into()).await,
            Err(TransportError::TooManyAttempts)
        ));
    }

    #[tokio::test]
    async fn expired_code_is_reported() {
        let server = TrustchainServer::new();
        server.get_public_provisional_identity("a@b.c".into()).await.unwrap();
        let code = server.verification_code_for("a@b.c").unwrap();
        server.expire_verification_code("a@b.c");
        assert!(matches!(
            server.claim_provisional_identity("a@b.c".into(), code).await,
            Err(TransportError::ExpiredVerification)
        ));
    }
}
