//! User and provisional identities.
//!
//! A secret permanent identity is minted by whoever holds the trust chain's
//! private signature key (the application server in production, the harness
//! in tests). It carries everything a first device needs: the obfuscated
//! user id, the delegation signature, the ephemeral keypair that will sign
//! the device-creation block, and the user secret that encrypts the local
//! safe.
//!
//! Identities serialize as JSON with base64 byte fields, matching the local
//! safe envelope.

use serde::{Deserialize, Serialize};

use rand::rngs::OsRng;
use rand::RngCore;
use sealchain_crypto::hash::hash32;
use sealchain_crypto::{EncryptionKeyPair, SignatureKeyPair};
use sealchain_proto::{TrustchainId, UserId};

use crate::b64doc;
use crate::error::CoreError;
use crate::safe::ProvisionalKeyPair;

/// Domain separation label for user-secret derivation.
const USER_SECRET_LABEL: &[u8] = b"sealchain user secret v1";

/// Obfuscate an application-level user id into the on-chain form.
///
/// Hashing with the trustchain id keeps ids from correlating across chains.
pub fn obfuscate_user_id(app_user_id: &str, trustchain_id: &TrustchainId) -> UserId {
    UserId(hash32(&[app_user_id.as_bytes(), trustchain_id.as_bytes()]))
}

/// Derive the safe-encryption secret for a user.
///
/// Derived once at identity-mint time from the chain, the user, and a
/// random seed carried only inside the secret identity; it never goes over
/// the wire.
pub fn derive_user_secret(
    trustchain_id: &TrustchainId,
    user_id: &UserId,
    seed: &[u8; 32],
) -> [u8; 32] {
    hash32(&[USER_SECRET_LABEL, trustchain_id.as_bytes(), user_id.as_bytes(), seed])
}

/// Everything a user's first device needs to join the chain.
#[derive(Clone)]
pub struct SecretIdentity {
    /// Chain the identity belongs to.
    pub trustchain_id: TrustchainId,
    /// Obfuscated user id.
    pub user_id: UserId,
    /// Signature over `ephemeral_public ‖ user_id` by the trustchain key.
    pub delegation_signature: [u8; 64],
    /// Ephemeral keypair that signs the first device-creation block.
    pub ephemeral_key_pair: SignatureKeyPair,
    /// Secret encrypting the local safe.
    pub user_secret: [u8; 32],
}

impl SecretIdentity {
    /// The shareable half of the identity.
    pub fn to_public(&self) -> PublicIdentity {
        PublicIdentity { trustchain_id: self.trustchain_id, user_id: self.user_id }
    }
}

impl std::fmt::Debug for SecretIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretIdentity")
            .field("trustchain_id", &self.trustchain_id)
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

/// A user's shareable identity: enough to address key publishes to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicIdentity {
    /// Chain the identity belongs to.
    pub trustchain_id: TrustchainId,
    /// Obfuscated user id.
    pub user_id: UserId,
}

/// Mint a secret identity for an application user id.
///
/// Requires the trust chain's private signature key; in production this
/// runs server-side, next to the chain root.
pub fn mint_identity(
    trustchain_id: &TrustchainId,
    trustchain_key: &SignatureKeyPair,
    app_user_id: &str,
) -> SecretIdentity {
    let user_id = obfuscate_user_id(app_user_id, trustchain_id);
    let ephemeral_key_pair = SignatureKeyPair::generate();

    let mut delegation_data = Vec::with_capacity(64);
    delegation_data.extend_from_slice(&ephemeral_key_pair.public);
    delegation_data.extend_from_slice(user_id.as_bytes());
    let delegation_signature = trustchain_key.sign(&delegation_data);

    let mut seed = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    let user_secret = derive_user_secret(trustchain_id, &user_id, &seed);

    SecretIdentity {
        trustchain_id: *trustchain_id,
        user_id,
        delegation_signature,
        ephemeral_key_pair,
        user_secret,
    }
}

/// The secret half of a provisional identity: both keypair families.
///
/// The app-side pair is minted by the application for the invited email
/// address; the server-side pair is held back until the address is
/// verified.
#[derive(Clone)]
pub struct SecretProvisionalIdentity {
    /// Chain the identity belongs to.
    pub trustchain_id: TrustchainId,
    /// Email address the identity is bound to.
    pub target_email: String,
    /// App-side signature keypair.
    pub app_signature: SignatureKeyPair,
    /// App-side encryption keypair.
    pub app_encryption: EncryptionKeyPair,
    /// Server-side signature keypair.
    pub server_signature: SignatureKeyPair,
    /// Server-side encryption keypair.
    pub server_encryption: EncryptionKeyPair,
}

impl SecretProvisionalIdentity {
    /// Mint a fresh provisional identity for an email address.
    pub fn generate(trustchain_id: &TrustchainId, target_email: &str) -> Self {
        Self {
            trustchain_id: *trustchain_id,
            target_email: target_email.to_string(),
            app_signature: SignatureKeyPair::generate(),
            app_encryption: EncryptionKeyPair::generate(),
            server_signature: SignatureKeyPair::generate(),
            server_encryption: EncryptionKeyPair::generate(),
        }
    }

    /// The shareable half.
    pub fn to_public(&self) -> PublicProvisionalIdentity {
        PublicProvisionalIdentity {
            trustchain_id: self.trustchain_id,
            target_email: self.target_email.clone(),
            app_public_signature_key: self.app_signature.public,
            app_public_encryption_key: self.app_encryption.public,
            server_public_signature_key: self.server_signature.public,
            server_public_encryption_key: self.server_encryption.public,
        }
    }

    /// The keypair bundle stored in the safe after a claim.
    pub fn key_pair(&self) -> ProvisionalKeyPair {
        ProvisionalKeyPair {
            app_signature: self.app_signature.clone(),
            app_encryption: self.app_encryption.clone(),
            server_signature: self.server_signature.clone(),
            server_encryption: self.server_encryption.clone(),
        }
    }
}

impl std::fmt::Debug for SecretProvisionalIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretProvisionalIdentity")
            .field("target_email", &self.target_email)
            .finish_non_exhaustive()
    }
}

/// The shareable half of a provisional identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicProvisionalIdentity {
    /// Chain the identity belongs to.
    pub trustchain_id: TrustchainId,
    /// Email address the identity is bound to.
    pub target_email: String,
    /// App-side public signature key; half of the on-chain address.
    pub app_public_signature_key: [u8; 32],
    /// App-side public encryption key; inner seal recipient.
    pub app_public_encryption_key: [u8; 32],
    /// Server-side public signature key; half of the on-chain address.
    pub server_public_signature_key: [u8; 32],
    /// Server-side public encryption key; outer seal recipient.
    pub server_public_encryption_key: [u8; 32],
}

#[derive(Serialize, Deserialize)]
struct SecretIdentityDoc {
    trustchain_id: String,
    user_id: String,
    delegation_signature: String,
    ephemeral_private_signature_key: String,
    user_secret: String,
}

impl Serialize for SecretIdentity {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        SecretIdentityDoc {
            trustchain_id: b64doc::encode(self.trustchain_id.as_bytes()),
            user_id: b64doc::encode(self.user_id.as_bytes()),
            delegation_signature: b64doc::encode(&self.delegation_signature),
            ephemeral_private_signature_key: b64doc::encode(&self.ephemeral_key_pair.private),
            user_secret: b64doc::encode(&self.user_secret),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SecretIdentity {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error as _;
        let doc = SecretIdentityDoc::deserialize(deserializer)?;
        let ephemeral_private = b64doc::decode_array::<64>(
            "ephemeral_private_signature_key",
            &doc.ephemeral_private_signature_key,
        )
        .map_err(D::Error::custom)?;
        Ok(Self {
            trustchain_id: TrustchainId(
                b64doc::decode_array("trustchain_id", &doc.trustchain_id)
                    .map_err(D::Error::custom)?,
            ),
            user_id: UserId(
                b64doc::decode_array("user_id", &doc.user_id).map_err(D::Error::custom)?,
            ),
            delegation_signature: b64doc::decode_array(
                "delegation_signature",
                &doc.delegation_signature,
            )
            .map_err(D::Error::custom)?,
            ephemeral_key_pair: SignatureKeyPair::from_private(&ephemeral_private)
                .map_err(D::Error::custom)?,
            user_secret: b64doc::decode_array("user_secret", &doc.user_secret)
                .map_err(D::Error::custom)?,
        })
    }
}

/// Round-trip a secret identity through its JSON document form.
///
/// # Errors
///
/// [`CoreError::CorruptSafe`] when the document does not decode.
pub fn secret_identity_from_json(json: &str) -> Result<SecretIdentity, CoreError> {
    serde_json::from_str(json).map_err(|e| CoreError::CorruptSafe { detail: e.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> (TrustchainId, SignatureKeyPair) {
        let key = SignatureKeyPair::generate();
        (TrustchainId(hash32(&[&key.public])), key)
    }

    #[test]
    fn obfuscation_is_deterministic_and_chain_bound() {
        let (chain_a, _) = chain();
        let (chain_b, _) = chain();
        assert_eq!(
            obfuscate_user_id("alice", &chain_a),
            obfuscate_user_id("alice", &chain_a)
        );
        assert_ne!(obfuscate_user_id("alice", &chain_a), obfuscate_user_id("bob", &chain_a));
        assert_ne!(
            obfuscate_user_id("alice", &chain_a),
            obfuscate_user_id("alice", &chain_b)
        );
    }

    #[test]
    fn minted_delegation_verifies() {
        let (trustchain_id, trustchain_key) = chain();
        let identity = mint_identity(&trustchain_id, &trustchain_key, "alice");

        let mut data = Vec::new();
        data.extend_from_slice(&identity.ephemeral_key_pair.public);
        data.extend_from_slice(identity.user_id.as_bytes());
        sealchain_crypto::verify_signature(
            &trustchain_key.public,
            &data,
            &identity.delegation_signature,
        )
        .unwrap();
    }

    #[test]
    fn user_secrets_are_unique_per_mint() {
        let (trustchain_id, trustchain_key) = chain();
        let a = mint_identity(&trustchain_id, &trustchain_key, "alice");
        let b = mint_identity(&trustchain_id, &trustchain_key, "alice");
        assert_ne!(a.user_secret, b.user_secret);
    }

    #[test]
    fn secret_identity_json_roundtrip() {
        let (trustchain_id, trustchain_key) = chain();
        let identity = mint_identity(&trustchain_id, &trustchain_key, "alice");

        let json = serde_json::to_string(&identity).unwrap();
        let restored = secret_identity_from_json(&json).unwrap();

        assert_eq!(restored.user_id, identity.user_id);
        assert_eq!(restored.user_secret, identity.user_secret);
        assert_eq!(restored.delegation_signature, identity.delegation_signature);
        assert_eq!(restored.ephemeral_key_pair.public, identity.ephemeral_key_pair.public);
    }

    #[test]
    fn provisional_public_mirrors_secret() {
        let (trustchain_id, _) = chain();
        let secret = SecretProvisionalIdentity::generate(&trustchain_id, "bob@example.com");
        let public = secret.to_public();
        assert_eq!(public.app_public_signature_key, secret.app_signature.public);
        assert_eq!(public.server_public_encryption_key, secret.server_encryption.public);
        assert_eq!(public.target_email, "bob@example.com");
    }
}
