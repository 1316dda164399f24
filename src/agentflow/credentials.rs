//! API key issuance and validation.
//!
//! Raw keys look like `sk_live_<base64url>` and carry at least 192 bits of
//! randomness.  Only the SHA-256 hex digest of the full key is persisted;
//! the raw key appears in exactly one place — the issuance return value —
//! and is never logged.
//!
//! Validation hashes the presented key and looks the digest up directly, so
//! the comparison cost is independent of how much of the key matches.

use crate::agentflow::error::PlatformError;
use crate::agentflow::models::ApiKey;
use crate::agentflow::repository::ApiKeyRepository;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

/// Human-recognisable key prefix.
pub const KEY_TAG: &str = "sk_live_";

/// Length of the stored display prefix.
const DISPLAY_PREFIX_LEN: usize = 12;

/// Scope required to fire workflows through the API trigger.
pub const SCOPE_WORKFLOWS_EXECUTE: &str = "workflows:execute";

/// Wildcard scope granting everything.
pub const SCOPE_ALL: &str = "*";

/// A freshly issued credential.  `raw_key` is handed to the caller once and
/// exists nowhere else.
pub struct IssuedKey {
    pub record: ApiKey,
    pub raw_key: String,
}

/// SHA-256 credential store.
pub struct CredentialStore {
    keys: Arc<dyn ApiKeyRepository>,
}

impl CredentialStore {
    pub fn new(keys: Arc<dyn ApiKeyRepository>) -> Self {
        Self { keys }
    }

    /// Generate and persist a new API key.
    ///
    /// The key body is 32 random bytes (256 bits), base64-url encoded
    /// without padding, behind the `sk_live_` tag.
    pub async fn issue(
        &self,
        user_id: Uuid,
        name: impl Into<String>,
        scopes: Vec<String>,
        rate_limit: u32,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<IssuedKey, PlatformError> {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        let raw_key = format!("{}{}", KEY_TAG, URL_SAFE_NO_PAD.encode(secret));

        let record = ApiKey {
            id: Uuid::new_v4(),
            user_id,
            name: name.into(),
            key_hash: hash_key(&raw_key),
            key_prefix: raw_key[..DISPLAY_PREFIX_LEN].to_string(),
            scopes,
            rate_limit,
            expires_at,
            last_used_at: None,
            created_at: Utc::now(),
        };
        self.keys.insert(&record).await?;

        Ok(IssuedKey { record, raw_key })
    }

    /// Validate a presented key.
    ///
    /// Rejects unknown digests and expired keys with the same
    /// `Unauthenticated` kind.  `last_used_at` is updated best-effort; a
    /// store hiccup there does not fail the request.
    pub async fn validate(&self, presented: &str) -> Result<ApiKey, PlatformError> {
        let digest = hash_key(presented);
        let key = self
            .keys
            .find_by_hash(&digest)
            .await?
            .ok_or_else(|| PlatformError::Unauthenticated(String::from("Invalid API key")))?;

        if let Some(expires_at) = key.expires_at {
            if expires_at < Utc::now() {
                return Err(PlatformError::Unauthenticated(String::from(
                    "API key expired",
                )));
            }
        }

        if let Err(e) = self.keys.touch_last_used(key.id, Utc::now()).await {
            log::debug!("failed to update last_used_at for key {}: {}", key.id, e);
        }

        Ok(key)
    }
}

/// SHA-256 hex digest (lowercase) of a raw key.
pub fn hash_key(raw_key: &str) -> String {
    format!("{:x}", Sha256::digest(raw_key.as_bytes()))
}

/// A scope is satisfied by an exact match or the `*` wildcard.
pub fn scope_satisfied(key: &ApiKey, required: &str) -> bool {
    key.scopes.iter().any(|s| s == required || s == SCOPE_ALL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentflow::repository::MemoryStore;
    use chrono::Duration;

    fn store() -> (CredentialStore, Arc<MemoryStore>) {
        let repo = Arc::new(MemoryStore::new());
        (CredentialStore::new(repo.clone()), repo)
    }

    #[tokio::test]
    async fn test_issue_shape() {
        let (creds, _) = store();
        let issued = creds
            .issue(Uuid::new_v4(), "ci", vec![String::from("*")], 100, None)
            .await
            .unwrap();

        assert!(issued.raw_key.starts_with(KEY_TAG));
        // 32 bytes of randomness beyond the tag, base64url encoded.
        assert!(issued.raw_key.len() >= KEY_TAG.len() + 40);
        assert_eq!(issued.record.key_hash, hash_key(&issued.raw_key));
        assert_eq!(issued.record.key_hash.len(), 64);
        assert!(issued.raw_key.starts_with(&issued.record.key_prefix));
        // The record never carries the raw key.
        assert!(!serde_json::to_string(&issued.record)
            .unwrap()
            .contains(&issued.raw_key));
    }

    #[tokio::test]
    async fn test_validate_round_trip() {
        let (creds, _) = store();
        let issued = creds
            .issue(Uuid::new_v4(), "ci", vec![String::from("*")], 100, None)
            .await
            .unwrap();

        let key = creds.validate(&issued.raw_key).await.unwrap();
        assert_eq!(key.id, issued.record.id);
        assert!(key.last_used_at.is_none() || key.last_used_at.is_some());

        let err = creds.validate("sk_live_not_a_real_key").await.unwrap_err();
        assert!(matches!(err, PlatformError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn test_expired_key_rejected() {
        let (creds, _) = store();
        let issued = creds
            .issue(
                Uuid::new_v4(),
                "old",
                vec![String::from("*")],
                100,
                Some(Utc::now() - Duration::hours(1)),
            )
            .await
            .unwrap();

        let err = creds.validate(&issued.raw_key).await.unwrap_err();
        assert!(matches!(err, PlatformError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn test_scope_check() {
        let (creds, _) = store();
        let scoped = creds
            .issue(
                Uuid::new_v4(),
                "scoped",
                vec![String::from(SCOPE_WORKFLOWS_EXECUTE)],
                100,
                None,
            )
            .await
            .unwrap();
        let wildcard = creds
            .issue(
                Uuid::new_v4(),
                "admin",
                vec![String::from(SCOPE_ALL)],
                100,
                None,
            )
            .await
            .unwrap();

        assert!(scope_satisfied(&scoped.record, SCOPE_WORKFLOWS_EXECUTE));
        assert!(!scope_satisfied(&scoped.record, "agents:write"));
        assert!(scope_satisfied(&wildcard.record, SCOPE_WORKFLOWS_EXECUTE));
        assert!(scope_satisfied(&wildcard.record, "agents:write"));
    }

    #[tokio::test]
    async fn test_keys_are_distinct() {
        let (creds, _) = store();
        let a = creds
            .issue(Uuid::new_v4(), "a", vec![], 10, None)
            .await
            .unwrap();
        let b = creds
            .issue(Uuid::new_v4(), "b", vec![], 10, None)
            .await
            .unwrap();
        assert_ne!(a.raw_key, b.raw_key);
        assert_ne!(a.record.key_hash, b.record.key_hash);
    }
}
