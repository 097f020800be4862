use anyhow::Result;
use rusqlite::params;

use super::EngineStore;
use super::types::TokenRecord;

impl EngineStore {
    pub async fn insert_token(
        &self,
        token_id: &str,
        token_hash: &str,
        plan_id: &str,
        issued_by: &str,
        expires_at: i64,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO approval_tokens (token_id, token_hash, plan_id, issued_by, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![token_id, token_hash, plan_id, issued_by, expires_at],
        )?;
        Ok(())
    }

    pub async fn get_token_by_hash(&self, token_hash: &str) -> Result<Option<TokenRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT token_id, plan_id, issued_by, expires_at, used
             FROM approval_tokens WHERE token_hash = ?1 LIMIT 1",
        )?;
        let mut rows = stmt.query(params![token_hash])?;
        match rows.next()? {
            Some(row) => Ok(Some(TokenRecord {
                token_id: row.get(0)?,
                plan_id: row.get(1)?,
                issued_by: row.get(2)?,
                expires_at: row.get(3)?,
                used: row.get::<_, i64>(4)? != 0,
            })),
            None => Ok(None),
        }
    }

    /// Flip the used flag, but only if it is still unset. The conditional
    /// UPDATE is the whole double-spend defense: of two concurrent
    /// consumers exactly one sees a changed row.
    pub async fn consume_token(&self, token_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE approval_tokens SET used = 1 WHERE token_id = ?1 AND used = 0",
            params![token_id],
        )?;
        Ok(rows > 0)
    }

    /// Tokens are meant to be spent within minutes; anything past its
    /// expiry is deleted rather than kept around.
    pub async fn purge_expired_tokens(&self, now_epoch: i64) -> Result<usize> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "DELETE FROM approval_tokens WHERE expires_at < ?1",
            params![now_epoch],
        )?;
        Ok(rows)
    }
}
