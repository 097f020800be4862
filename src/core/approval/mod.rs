//! Single-use, plan-bound, short-lived approval credentials. The raw
//! secret is returned exactly once at issue time; only its SHA-256 hash
//! is stored, and audit records carry the token identifier, never the
//! secret.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::core::error::EngineError;
use crate::core::store::EngineStore;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("approval token is not recognized")]
    NotFound,

    #[error("approval token has expired")]
    Expired,

    #[error("approval token was issued for a different plan")]
    PlanMismatch,

    #[error("approval token has already been used")]
    AlreadyUsed,
}

/// Epoch-seconds clock, injectable so TTL logic tests without waiting.
pub trait Clock: Send + Sync {
    fn now_epoch(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch(&self) -> i64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => elapsed.as_secs() as i64,
            Err(_) => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token_id: String,
    pub plan_id: String,
    /// Raw secret; handed to the approver and then forgotten.
    pub secret: String,
    pub expires_at: i64,
}

fn hash_token(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

fn generate_secret() -> String {
    let bytes: [u8; 16] = rand::random();
    format!("cvt_{}", hex::encode(bytes))
}

#[derive(Clone)]
pub struct ApprovalService {
    store: Arc<EngineStore>,
    clock: Arc<dyn Clock>,
    ttl_secs: i64,
}

impl ApprovalService {
    pub fn new(store: Arc<EngineStore>, clock: Arc<dyn Clock>, ttl_secs: i64) -> Self {
        Self {
            store,
            clock,
            ttl_secs,
        }
    }

    pub async fn issue(&self, plan_id: &str, approver: &str) -> Result<IssuedToken, EngineError> {
        let now = self.clock.now_epoch();
        self.store.purge_expired_tokens(now).await?;

        let secret = generate_secret();
        let token_id = uuid::Uuid::new_v4().to_string();
        let expires_at = now + self.ttl_secs;
        self.store
            .insert_token(&token_id, &hash_token(&secret), plan_id, approver, expires_at)
            .await?;

        info!(token = %token_id, plan = %plan_id, approver = %approver, "approval token issued");
        Ok(IssuedToken {
            token_id,
            plan_id: plan_id.to_string(),
            secret,
            expires_at,
        })
    }

    /// Single atomic check-and-spend. The used flag flips through a
    /// conditional UPDATE, so two concurrent apply attempts cannot both
    /// pass. Returns the token identifier for audit records.
    pub async fn validate_and_consume(
        &self,
        secret: &str,
        plan_id: &str,
    ) -> Result<String, EngineError> {
        let record = self
            .store
            .get_token_by_hash(&hash_token(secret))
            .await?
            .ok_or(ApprovalError::NotFound)?;

        if record.expires_at <= self.clock.now_epoch() {
            return Err(ApprovalError::Expired.into());
        }
        if record.plan_id != plan_id {
            return Err(ApprovalError::PlanMismatch.into());
        }
        if !self.store.consume_token(&record.token_id).await? {
            return Err(ApprovalError::AlreadyUsed.into());
        }

        info!(token = %record.token_id, plan = %plan_id, "approval token consumed");
        Ok(record.token_id)
    }
}
