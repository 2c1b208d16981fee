//! The session orchestrator.
//!
//! A `Session` binds the verified chain state, the local safe, the
//! resource-key manager, and the transport and storage handles behind one
//! value. All block verification and store mutation runs on a single
//! logical lane (a mutex over the state), so verifier effects are totally
//! ordered; I/O and AEAD run outside the lane and feed results back in.
//!
//! Lifecycle: [`Session::start`] signs up a new user (ghost device plus
//! local device) or reopens an existing safe; [`Session::add_device`] and
//! [`Session::attach_device`] extend a user to another machine;
//! [`Session::stop`] closes the session, failing outstanding operations
//! with `OperationCanceled`. When the chain reveals that *this* device was
//! revoked, the safe and every cached key are wiped, the status flips to
//! `Revoked` once, and every later operation fails with
//! `InvalidSessionStatus`.

use std::collections::VecDeque;
use std::sync::Arc;

use sealchain_core::{
    plan_key_publishes, AppliedEvent, BlockFactory, CoreError, DeviceKeys, KeyPublishRecipients,
    LocalSafe, PublicIdentity, PublicProvisionalIdentity, SecretIdentity, TrustchainState,
    UnverifiedStore,
};
use sealchain_crypto::sealed::{double_seal_open, seal_open};
use sealchain_crypto::{EncryptionKeyPair, SymmetricKey};
use sealchain_proto::{Block, DeviceId, GroupId, Payload, ResourceId, TrustchainId, UserId};
use tokio::sync::{watch, Mutex};

use crate::error::SessionError;
use crate::resource_keys::ResourceKeyManager;
use crate::storage::{Storage, Table};
use crate::stream::{self, StreamError, StreamHeader, DEFAULT_CHUNK_SIZE};
use crate::transport::Transport;

/// Hard cap on group membership.
pub const MAX_GROUP_SIZE: usize = 1000;

/// Storage key of the safe record.
const SAFE_RECORD_KEY: &[u8] = b"safe";

/// Storage key of the verified-index record.
const LAST_INDEX_KEY: &[u8] = b"last_index";

/// Session lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Operational.
    Ready,
    /// Closed by the caller.
    Stopped,
    /// This device was revoked on the chain; local secrets are wiped.
    Revoked,
}

/// Session tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Plaintext chunk size of the streaming format.
    pub chunk_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { chunk_size: DEFAULT_CHUNK_SIZE }
    }
}

/// Who else, besides the author, can decrypt.
#[derive(Debug, Clone, Default)]
pub struct SharingOptions {
    /// Recipient users.
    pub share_with_users: Vec<PublicIdentity>,
    /// Recipient groups.
    pub share_with_groups: Vec<GroupId>,
    /// Recipient provisional identities.
    pub share_with_provisional_users: Vec<PublicProvisionalIdentity>,
}

impl SharingOptions {
    fn is_empty(&self) -> bool {
        self.share_with_users.is_empty()
            && self.share_with_groups.is_empty()
            && self.share_with_provisional_users.is_empty()
    }
}

/// Options for [`Session::encrypt`].
#[derive(Debug, Clone)]
pub struct EncryptionOptions {
    /// Recipients beyond the author.
    pub sharing: SharingOptions,
    /// Whether the author keeps access (cached locally and sealed to their
    /// own current user key). Defaults to true.
    pub share_with_self: bool,
}

impl Default for EncryptionOptions {
    fn default() -> Self {
        Self { sharing: SharingOptions::default(), share_with_self: true }
    }
}

/// Everything serialized on the verification lane.
struct Lane {
    state: TrustchainState,
    safe: LocalSafe,
    unverified: UnverifiedStore,
    /// Sealed previous-user-key slots from v2 revocations of our user, kept
    /// so key history can be unwound once a newer generation is held.
    rotations: Vec<RotationRecord>,
}

struct RotationRecord {
    index: u64,
    new_public_key: [u8; 32],
    sealed_previous_key: [u8; 80],
}

/// An open session for one device of one user.
pub struct Session<T: Transport, S: Storage> {
    transport: Arc<T>,
    storage: Arc<S>,
    factory: BlockFactory,
    device: DeviceKeys,
    trustchain_id: TrustchainId,
    user_id: UserId,
    user_secret: [u8; 32],
    chunk_size: usize,
    lane: Mutex<Lane>,
    resource_keys: ResourceKeyManager<S>,
    status_tx: watch::Sender<Status>,
}

impl<T: Transport, S: Storage> Session<T, S> {
    /// Open a session: reuse the stored safe if this device is already
    /// registered here, otherwise sign the user up (ghost device plus local
    /// device).
    pub async fn start(
        transport: T,
        storage: S,
        identity: &SecretIdentity,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let storage = Arc::new(storage);
        let existing = storage.get(Table::DeviceKeys, SAFE_RECORD_KEY).await?;
        match existing {
            Some(record) => {
                let safe = LocalSafe::open(&record, &identity.user_secret)?;
                if safe.user_id != identity.user_id {
                    return Err(SessionError::PreconditionFailed(
                        "stored safe belongs to a different user".into(),
                    ));
                }
                Self::open(transport, storage, identity, safe, config).await
            }
            None => Self::signup(transport, storage, identity, config).await,
        }
    }

    /// Register this machine as an additional device of an existing user.
    ///
    /// `device` comes from [`Session::add_device`] on an already-registered
    /// machine; its creation block is on the chain, and the user key is
    /// recovered from it during the initial synchronization.
    pub async fn attach_device(
        transport: T,
        storage: S,
        identity: &SecretIdentity,
        device: DeviceKeys,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let storage = Arc::new(storage);
        let safe = LocalSafe::new(identity.trustchain_id, identity.user_id, device);
        storage
            .put(Table::DeviceKeys, SAFE_RECORD_KEY, &safe.seal(&identity.user_secret))
            .await?;
        Self::open(transport, storage, identity, safe, config).await
    }

    async fn signup(
        transport: T,
        storage: Arc<S>,
        identity: &SecretIdentity,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let factory = BlockFactory::new(identity.trustchain_id);
        let (ghost_block, ghost, user_key) = factory.make_ghost_device(identity);
        let (device_block, device) = factory.make_device(&ghost, identity.user_id, &user_key);
        transport.push_blocks(vec![ghost_block, device_block]).await?;

        let mut safe = LocalSafe::new(identity.trustchain_id, identity.user_id, device);
        safe.record_user_key(0, user_key);
        storage
            .put(Table::DeviceKeys, SAFE_RECORD_KEY, &safe.seal(&identity.user_secret))
            .await?;

        Self::open(transport, storage, identity, safe, config).await
    }

    async fn open(
        transport: T,
        storage: Arc<S>,
        identity: &SecretIdentity,
        safe: LocalSafe,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        if config.chunk_size == 0 {
            return Err(SessionError::InvalidArgument("chunk size must be positive".into()));
        }
        let (status_tx, _) = watch::channel(Status::Ready);
        let session = Self {
            transport: Arc::new(transport),
            storage: Arc::clone(&storage),
            factory: BlockFactory::new(identity.trustchain_id),
            device: safe.device.clone(),
            trustchain_id: identity.trustchain_id,
            user_id: identity.user_id,
            user_secret: identity.user_secret,
            chunk_size: config.chunk_size,
            lane: Mutex::new(Lane {
                state: TrustchainState::new(identity.trustchain_id),
                safe,
                unverified: UnverifiedStore::default(),
                rotations: Vec::new(),
            }),
            resource_keys: ResourceKeyManager::new(storage, identity.user_secret),
            status_tx,
        };
        session.sync().await?;
        Ok(session)
    }

    /// This device's id.
    pub fn device_id(&self) -> DeviceId {
        self.device.device_id
    }

    /// This session's user.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Current lifecycle status.
    pub fn status(&self) -> Status {
        *self.status_tx.borrow()
    }

    /// Watch status transitions; the change to `Revoked` is the one-shot
    /// device-revoked event.
    pub fn subscribe_status(&self) -> watch::Receiver<Status> {
        self.status_tx.subscribe()
    }

    /// Close the session. Outstanding operations fail with
    /// `OperationCanceled`; secrets are zeroized when the session drops.
    pub fn stop(&self) {
        if self.status() == Status::Ready {
            let _ = self.status_tx.send(Status::Stopped);
        }
    }

    /// Pull and verify new blocks from the transport.
    pub async fn sync(&self) -> Result<(), SessionError> {
        self.ensure_ready()?;
        let mut lane = self.lane.lock().await;
        let after = lane.state.last_index();
        drop(lane);
        let blocks = self.transport.pull_blocks(after).await?;
        self.check_cancel()?;
        let mut lane = self.lane.lock().await;
        self.process_blocks(&mut lane, blocks).await
    }

    /// Encrypt `plaintext` for the sharing set (plus self by default).
    ///
    /// # Errors
    ///
    /// `RecipientsNotFound` if a recipient cannot be resolved on the chain;
    /// transport errors if the key-publish batch cannot be pushed. The
    /// returned ciphertext is only meaningful if the call succeeds.
    pub async fn encrypt(
        &self,
        plaintext: &[u8],
        options: &EncryptionOptions,
    ) -> Result<Vec<u8>, SessionError> {
        self.ensure_ready()?;
        if !options.share_with_self && options.sharing.is_empty() {
            return Err(SessionError::InvalidArgument(
                "nothing to encrypt for: no recipients and share_with_self is false".into(),
            ));
        }

        let (resource_key, resource_id) = self.resource_keys.new_resource_key();
        let ciphertext =
            stream::encrypt_buffer(&resource_key, resource_id, plaintext, self.chunk_size);

        let mut recipients = self.resolve_recipients(&options.sharing).await?;
        if options.share_with_self {
            recipients.user_public_encryption_keys.push(self.own_user_public_key().await?);
            self.resource_keys.store_key(resource_id, &resource_key).await?;
        }
        self.push_key_publishes(&[(resource_key, resource_id)], &recipients).await?;

        Ok(ciphertext)
    }

    /// Decrypt data produced by [`Session::encrypt`].
    pub async fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, SessionError> {
        self.ensure_ready()?;
        let (header, _) = StreamHeader::parse(data).map_err(map_stream_error)?;
        let resource_key = self
            .find_resource_key(header.resource_id)
            .await?
            .ok_or(SessionError::ResourceNotFound(header.resource_id))?;
        stream::decrypt_buffer(&resource_key, data, self.chunk_size).map_err(map_stream_error)
    }

    /// The resource id of an encrypted blob, without decrypting it.
    pub fn resource_id_of(&self, data: &[u8]) -> Result<ResourceId, SessionError> {
        let (header, _) = StreamHeader::parse(data).map_err(map_stream_error)?;
        Ok(header.resource_id)
    }

    /// Share already-encrypted resources with more recipients.
    pub async fn share(
        &self,
        resource_ids: &[ResourceId],
        sharing: &SharingOptions,
    ) -> Result<(), SessionError> {
        self.ensure_ready()?;
        if resource_ids.is_empty() {
            return Err(SessionError::InvalidArgument("no resources to share".into()));
        }
        if sharing.is_empty() {
            return Err(SessionError::InvalidArgument("no recipients to share with".into()));
        }

        let recipients = self.resolve_recipients(sharing).await?;
        let mut keys = Vec::with_capacity(resource_ids.len());
        for resource_id in resource_ids {
            let key = self
                .find_resource_key(*resource_id)
                .await?
                .ok_or(SessionError::ResourceNotFound(*resource_id))?;
            keys.push((key, *resource_id));
        }
        self.push_key_publishes(&keys, &recipients).await
    }

    /// Create a group and return its id.
    pub async fn create_group(
        &self,
        members: &[PublicIdentity],
        provisional_members: &[PublicProvisionalIdentity],
    ) -> Result<GroupId, SessionError> {
        self.ensure_ready()?;
        check_group_size(members.len() + provisional_members.len())?;

        let member_keys = self.resolve_user_keys(members).await?;
        let (block, group) =
            self.factory.make_group_creation(&self.device, &member_keys, provisional_members);
        let group_id = group.id;
        self.transport.push_blocks(vec![block]).await?;
        self.check_cancel()?;
        self.sync().await?;
        Ok(group_id)
    }

    /// Add members to a group this device belongs to.
    pub async fn update_group_members(
        &self,
        group_id: GroupId,
        users_to_add: &[PublicIdentity],
        provisional_users_to_add: &[PublicProvisionalIdentity],
    ) -> Result<(), SessionError> {
        self.ensure_ready()?;
        if users_to_add.is_empty() && provisional_users_to_add.is_empty() {
            return Err(SessionError::InvalidArgument("no members to add".into()));
        }
        check_group_size(users_to_add.len() + provisional_users_to_add.len())?;

        let member_keys = self.resolve_user_keys(users_to_add).await?;

        // The group must be known and internal: only members hold the
        // signature key that the addition's self-signature requires.
        self.fetch_group_if_unknown(group_id).await?;
        let block = {
            let lane = self.lane.lock().await;
            let Some(group) = lane.state.groups().group(&group_id) else {
                return Err(SessionError::RecipientsNotFound(vec![group_id.to_string()]));
            };
            match group {
                sealchain_core::Group::Internal(internal) => self.factory.make_group_addition(
                    &self.device,
                    internal,
                    &member_keys,
                    provisional_users_to_add,
                ),
                sealchain_core::Group::External(_) => {
                    return Err(SessionError::PreconditionFailed(
                        "cannot update a group this device is not a member of".into(),
                    ));
                }
            }
        };
        self.transport.push_blocks(vec![block]).await?;
        self.check_cancel()?;
        self.sync().await
    }

    /// Claim the provisional identity bound to `email`, unlocking pending
    /// group slots and key publishes addressed to it.
    pub async fn claim_provisional_identity(
        &self,
        email: &str,
        verification_code: &str,
    ) -> Result<(), SessionError> {
        self.ensure_ready()?;
        let pair = self
            .transport
            .claim_provisional_identity(email.to_string(), verification_code.to_string())
            .await?;
        self.check_cancel()?;

        let mut lane = self.lane.lock().await;
        lane.safe.record_provisional(pair.clone());
        let unlocked = lane.state.groups_mut().apply_provisional_claim(&pair)?;
        for group_id in &unlocked {
            tracing::debug!(group = %group_id, "provisional claim unlocked group");
        }
        self.persist_safe(&lane).await
    }

    /// Revoke one of this user's devices, rotating the user key and
    /// re-sealing it to every surviving device.
    pub async fn revoke_device(&self, device_id: DeviceId) -> Result<(), SessionError> {
        self.ensure_ready()?;
        self.sync().await?;

        let block = {
            let lane = self.lane.lock().await;
            let Some(target) = lane.state.users().device(&device_id) else {
                return Err(SessionError::PreconditionFailed(format!(
                    "unknown device {device_id}"
                )));
            };
            if lane.state.users().owner_of(&device_id) != Some(&self.user_id) {
                return Err(SessionError::PreconditionFailed(
                    "cannot revoke another user's device".into(),
                ));
            }
            if target.revoked_at_index.is_some() {
                return Err(SessionError::PreconditionFailed("device is already revoked".into()));
            }

            let survivors: Vec<(DeviceId, [u8; 32])> = lane
                .state
                .users()
                .devices_of(&self.user_id)
                .into_iter()
                .filter(|device| device.id != device_id && device.revoked_at_index.is_none())
                .map(|device| (device.id, device.public_encryption_key))
                .collect();

            let (block, _) = self.factory.make_revocation(
                &self.device,
                device_id,
                lane.safe.current_user_key(),
                &survivors,
            );
            block
        };
        self.transport.push_blocks(vec![block]).await?;
        self.check_cancel()?;
        // The rotated key reaches the safe through the revocation block.
        self.sync().await
    }

    /// Author a device-creation block for a new machine and return its
    /// keys, to be transferred out of band.
    pub async fn add_device(&self) -> Result<DeviceKeys, SessionError> {
        self.ensure_ready()?;
        let user_key = {
            let lane = self.lane.lock().await;
            lane.safe.current_user_key().cloned().ok_or_else(|| {
                SessionError::PreconditionFailed("no user key available yet".into())
            })?
        };
        let (block, new_device) = self.factory.make_device(&self.device, self.user_id, &user_key);
        self.transport.push_blocks(vec![block]).await?;
        Ok(new_device)
    }

    fn ensure_ready(&self) -> Result<(), SessionError> {
        match self.status() {
            Status::Ready => Ok(()),
            Status::Stopped => Err(SessionError::InvalidSessionStatus("stopped")),
            Status::Revoked => Err(SessionError::InvalidSessionStatus("revoked")),
        }
    }

    /// After a suspension point: a session closed mid-operation cancels the
    /// operation rather than reporting a status error.
    fn check_cancel(&self) -> Result<(), SessionError> {
        match self.status() {
            Status::Ready => Ok(()),
            Status::Stopped => Err(SessionError::OperationCanceled),
            Status::Revoked => Err(SessionError::InvalidSessionStatus("revoked")),
        }
    }

    async fn own_user_public_key(&self) -> Result<[u8; 32], SessionError> {
        let lane = self.lane.lock().await;
        lane.safe
            .current_user_key()
            .map(|pair| pair.public)
            .ok_or_else(|| SessionError::PreconditionFailed("no user key available yet".into()))
    }

    async fn push_key_publishes(
        &self,
        keys: &[(SymmetricKey, ResourceId)],
        recipients: &KeyPublishRecipients,
    ) -> Result<(), SessionError> {
        if recipients.is_empty() {
            return Ok(());
        }
        let mut blocks = Vec::new();
        for (resource_key, resource_id) in keys {
            for payload in plan_key_publishes(resource_key, resource_id, recipients) {
                blocks.push(self.factory.make_key_publish(&self.device, payload));
            }
        }
        self.transport.push_blocks(blocks).await?;
        self.check_cancel()
    }

    /// Resolve user identities to their current public encryption keys,
    /// fetching and verifying their history first.
    async fn resolve_user_keys(
        &self,
        users: &[PublicIdentity],
    ) -> Result<Vec<[u8; 32]>, SessionError> {
        if users.is_empty() {
            return Ok(Vec::new());
        }
        for identity in users {
            if identity.trustchain_id != self.trustchain_id {
                return Err(SessionError::InvalidArgument(format!(
                    "identity {} belongs to a different trust chain",
                    identity.user_id
                )));
            }
        }

        let ids: Vec<UserId> = users.iter().map(|identity| identity.user_id).collect();
        let history = self.transport.get_user_history_by_user_ids(ids.clone()).await?;
        self.check_cancel()?;
        let mut lane = self.lane.lock().await;
        self.process_blocks(&mut lane, history).await?;

        let mut keys = Vec::with_capacity(ids.len());
        let mut missing = Vec::new();
        for user_id in &ids {
            match lane.state.users().user(user_id).and_then(|user| user.current_public_key()) {
                Some(key) => keys.push(*key),
                None => missing.push(user_id.to_string()),
            }
        }
        if !missing.is_empty() {
            return Err(SessionError::RecipientsNotFound(missing));
        }
        Ok(keys)
    }

    async fn resolve_recipients(
        &self,
        sharing: &SharingOptions,
    ) -> Result<KeyPublishRecipients, SessionError> {
        let user_keys = self.resolve_user_keys(&sharing.share_with_users).await?;

        let mut group_keys = Vec::with_capacity(sharing.share_with_groups.len());
        let mut missing = Vec::new();
        for group_id in &sharing.share_with_groups {
            self.fetch_group_if_unknown(*group_id).await?;
            let lane = self.lane.lock().await;
            match lane.state.groups().group(group_id) {
                Some(group) => group_keys.push(group.public_encryption_key()),
                None => missing.push(group_id.to_string()),
            }
        }
        if !missing.is_empty() {
            return Err(SessionError::RecipientsNotFound(missing));
        }

        for provisional in &sharing.share_with_provisional_users {
            if provisional.trustchain_id != self.trustchain_id {
                return Err(SessionError::InvalidArgument(format!(
                    "provisional identity for {} belongs to a different trust chain",
                    provisional.target_email
                )));
            }
        }

        Ok(KeyPublishRecipients {
            user_public_encryption_keys: user_keys,
            group_public_encryption_keys: group_keys,
            provisional_identities: sharing.share_with_provisional_users.clone(),
        })
    }

    async fn fetch_group_if_unknown(&self, group_id: GroupId) -> Result<(), SessionError> {
        {
            let lane = self.lane.lock().await;
            if lane.state.groups().group(&group_id).is_some() {
                return Ok(());
            }
        }
        let blocks = self.transport.get_groups_blocks_by_ids(vec![group_id]).await?;
        self.check_cancel()?;
        let mut lane = self.lane.lock().await;
        self.process_blocks(&mut lane, blocks).await
    }

    /// Resolve a resource key: cache, then the key publishes on the chain
    /// against locally held device, user, group, and provisional keys.
    async fn find_resource_key(
        &self,
        resource_id: ResourceId,
    ) -> Result<Option<SymmetricKey>, SessionError> {
        self.resource_keys
            .find_key(resource_id, || async {
                self.sync().await?;
                self.ensure_ready()?;
                let lane = self.lane.lock().await;
                self.open_key_publishes(&lane, resource_id)
            })
            .await
    }

    /// Try every verified key publish for the resource against local keys.
    ///
    /// A publish addressed to material we hold but failing to open is a
    /// hard `DecryptionFailed`: key material the chain says is ours must
    /// work, and skipping it would silently hide corruption.
    fn open_key_publishes(
        &self,
        lane: &Lane,
        resource_id: ResourceId,
    ) -> Result<Option<SymmetricKey>, SessionError> {
        for payload in lane.state.key_publishes_for(&resource_id) {
            let opened: Option<Vec<u8>> = match payload {
                Payload::KeyPublishToDevice(publish) => {
                    if publish.recipient == self.device.device_id {
                        Some(seal_open(&publish.encrypted_key, &lane.safe.device.encryption)?)
                    } else {
                        None
                    }
                }
                Payload::KeyPublishToUser(publish) => lane
                    .safe
                    .user_key_for(&publish.recipient_public_encryption_key)
                    .map(|pair| seal_open(&publish.sealed_key, pair))
                    .transpose()?,
                Payload::KeyPublishToUserGroup(publish) => {
                    match lane
                        .state
                        .groups()
                        .group_by_encryption_key(&publish.recipient_public_encryption_key)
                    {
                        Some(sealchain_core::Group::Internal(internal)) => {
                            Some(seal_open(&publish.sealed_key, &internal.encryption_key_pair)?)
                        }
                        _ => None,
                    }
                }
                Payload::KeyPublishToProvisionalUser(publish) => lane
                    .safe
                    .provisional_keys
                    .iter()
                    .find(|pair| {
                        pair.app_signature.public == publish.app_public_signature_key
                            && pair.server_signature.public == publish.server_public_signature_key
                    })
                    .map(|pair| {
                        double_seal_open(
                            &publish.sealed_key,
                            &pair.app_encryption,
                            &pair.server_encryption,
                        )
                    })
                    .transpose()?,
                _ => None,
            };

            if let Some(bytes) = opened {
                let key: [u8; 32] = bytes.try_into().map_err(|_| {
                    SessionError::InternalError("key publish carried a malformed key".into())
                })?;
                return Ok(Some(SymmetricKey(key)));
            }
        }
        Ok(None)
    }

    /// Feed blocks through the verifier in order, queueing out-of-order
    /// blocks and draining their dependants when subjects appear. Invalid
    /// blocks are dropped with a structured log record and never touch
    /// verified state.
    async fn process_blocks(
        &self,
        lane: &mut Lane,
        blocks: Vec<Block>,
    ) -> Result<(), SessionError> {
        let mut queue: VecDeque<Block> = blocks.into();
        let mut safe_dirty = false;
        let mut local_revocation = false;

        while let Some(block) = queue.pop_front() {
            match lane.state.apply_block(&block, &lane.safe) {
                Ok(event) => {
                    safe_dirty |= self.absorb_event(
                        lane,
                        &block,
                        &event,
                        &mut queue,
                        &mut local_revocation,
                    )?;
                }
                Err(CoreError::MissingDependency { subject }) => {
                    tracing::debug!(?subject, index = block.index, "block waits on dependency");
                    lane.unverified.enqueue(subject, block);
                }
                Err(CoreError::InvalidBlock { nature, reason }) => {
                    tracing::warn!(
                        ?nature,
                        code = reason.code(),
                        index = block.index,
                        "dropping invalid block"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }

        if safe_dirty {
            self.persist_safe(lane).await?;
        }
        self.storage
            .put(Table::Trustchain, LAST_INDEX_KEY, &lane.state.last_index().to_le_bytes())
            .await?;

        if local_revocation {
            self.handle_local_revocation().await?;
        }
        Ok(())
    }

    /// React to one applied block: update the safe when the chain hands
    /// this device key material, and release queued blocks whose subject
    /// just verified.
    fn absorb_event(
        &self,
        lane: &mut Lane,
        block: &Block,
        event: &AppliedEvent,
        queue: &mut VecDeque<Block>,
        local_revocation: &mut bool,
    ) -> Result<bool, SessionError> {
        use sealchain_core::Subject;
        let mut safe_dirty = false;

        match event {
            AppliedEvent::TrustchainCreated | AppliedEvent::AlreadyApplied => {}
            AppliedEvent::KeyPublishAdded { .. } => {}

            AppliedEvent::DeviceCreated { user_id, device_id, user_public_encryption_key } => {
                if *device_id == self.device.device_id {
                    if let Payload::DeviceCreation3(payload) = &block.payload {
                        let private = seal_open(
                            &payload.user_key_pair.sealed_private_encryption_key,
                            &lane.safe.device.encryption,
                        )?;
                        let private: [u8; 32] = private.try_into().map_err(|_| {
                            SessionError::InternalError("sealed user key is malformed".into())
                        })?;
                        lane.safe
                            .record_user_key(block.index, EncryptionKeyPair::from_private(&private));
                        safe_dirty = true;
                        safe_dirty |= self.unwind_rotations(lane)?;
                    }
                }
                drain(lane, queue, Subject::Device(*device_id));
                drain(lane, queue, Subject::User(*user_id));
                if let Some(key) = user_public_encryption_key {
                    drain(lane, queue, Subject::UserEncryptionKey(*key));
                }
            }

            AppliedEvent::DeviceRevoked { user_id, device_id, new_user_public_encryption_key } => {
                if *device_id == self.device.device_id {
                    *local_revocation = true;
                } else if *user_id == self.user_id {
                    if let Payload::DeviceRevocation2(payload) = &block.payload {
                        lane.rotations.push(RotationRecord {
                            index: block.index,
                            new_public_key: payload.public_encryption_key,
                            sealed_previous_key: payload.sealed_key_for_previous_user_key,
                        });
                        let own_slot = payload
                            .private_keys
                            .iter()
                            .find(|slot| slot.recipient == self.device.device_id);
                        if let Some(slot) = own_slot {
                            let private = seal_open(
                                &slot.sealed_private_encryption_key,
                                &lane.safe.device.encryption,
                            )?;
                            let private: [u8; 32] = private.try_into().map_err(|_| {
                                SessionError::InternalError("sealed user key is malformed".into())
                            })?;
                            lane.safe.record_user_key(
                                block.index,
                                EncryptionKeyPair::from_private(&private),
                            );
                            safe_dirty = true;
                            safe_dirty |= self.unwind_rotations(lane)?;
                        }
                    }
                }
                if let Some(key) = new_user_public_encryption_key {
                    drain(lane, queue, Subject::UserEncryptionKey(*key));
                }
            }

            AppliedEvent::GroupCreated { group_id, public_encryption_key, .. }
            | AppliedEvent::GroupUpdated { group_id, public_encryption_key, .. } => {
                drain(lane, queue, Subject::Group(*group_id));
                drain(lane, queue, Subject::GroupEncryptionKey(*public_encryption_key));
            }
        }
        Ok(safe_dirty)
    }

    /// Walk rotation records backwards from every held user key, recovering
    /// superseded generations so old publishes stay decryptable.
    fn unwind_rotations(&self, lane: &mut Lane) -> Result<bool, SessionError> {
        let mut dirty = false;
        loop {
            let mut recovered = None;
            for rotation in &lane.rotations {
                let Some(holder) = lane.safe.user_key_for(&rotation.new_public_key) else {
                    continue;
                };
                let previous = seal_open(&rotation.sealed_previous_key, holder)?;
                let previous: [u8; 32] = previous.try_into().map_err(|_| {
                    SessionError::InternalError("sealed previous user key is malformed".into())
                })?;
                if previous == [0; 32] {
                    // The user had no key before this rotation.
                    continue;
                }
                let pair = EncryptionKeyPair::from_private(&previous);
                if lane.safe.user_key_for(&pair.public).is_none() {
                    recovered = Some((rotation.index.saturating_sub(1), pair));
                    break;
                }
            }
            match recovered {
                Some((index, pair)) => {
                    lane.safe.record_user_key(index, pair);
                    dirty = true;
                }
                None => return Ok(dirty),
            }
        }
    }

    async fn persist_safe(&self, lane: &Lane) -> Result<(), SessionError> {
        let record = lane.safe.seal(&self.user_secret);
        self.storage.put(Table::DeviceKeys, SAFE_RECORD_KEY, &record).await?;
        Ok(())
    }

    /// This device was revoked on the chain: wipe everything local and
    /// flip the status once.
    async fn handle_local_revocation(&self) -> Result<(), SessionError> {
        tracing::warn!(device = %self.device.device_id, "local device revoked, wiping safe");
        self.storage.clear_all().await?;
        let _ = self.status_tx.send(Status::Revoked);
        Ok(())
    }
}

fn drain(lane: &mut Lane, queue: &mut VecDeque<Block>, subject: sealchain_core::Subject) {
    for block in lane.unverified.take(&subject) {
        queue.push_back(block);
    }
}

fn check_group_size(size: usize) -> Result<(), SessionError> {
    if size == 0 {
        return Err(SessionError::InvalidGroupSize);
    }
    if size > MAX_GROUP_SIZE {
        return Err(SessionError::GroupTooBig { size, limit: MAX_GROUP_SIZE });
    }
    Ok(())
}

fn map_stream_error(err: StreamError) -> SessionError {
    match err {
        StreamError::InvalidFormat => SessionError::InvalidEncryptionFormat,
        StreamError::UnsupportedVersion(version) => {
            SessionError::UpgradeRequired(format!("stream format version {version}"))
        }
        StreamError::DecryptionFailed { .. } => SessionError::DecryptionFailed,
    }
}
