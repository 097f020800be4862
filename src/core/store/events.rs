use anyhow::Result;
use rusqlite::params;

use super::EngineStore;
use super::types::EventRecord;

impl EngineStore {
    pub async fn add_event(
        &self,
        correlation_id: &str,
        plan_id: Option<&str>,
        job_id: Option<&str>,
        event_type: &str,
        payload_json: &str,
    ) -> Result<i64> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO events (correlation_id, plan_id, job_id, event_type, payload_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![correlation_id, plan_id, job_id, event_type, payload_json],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Events of one end-to-end operation, joined by the correlation
    /// identifier every event carries.
    pub async fn list_events_by_correlation(
        &self,
        correlation_id: &str,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<EventRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, correlation_id, plan_id, job_id, event_type, payload_json, created_at
             FROM events WHERE correlation_id = ?1 AND id > ?2 ORDER BY id ASC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![correlation_id, after_id, limit as i64], |row| {
            Ok(EventRecord {
                id: row.get(0)?,
                correlation_id: row.get(1)?,
                plan_id: row.get(2)?,
                job_id: row.get(3)?,
                event_type: row.get(4)?,
                payload_json: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn list_events(
        &self,
        plan_id: &str,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<EventRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, correlation_id, plan_id, job_id, event_type, payload_json, created_at
             FROM events WHERE plan_id = ?1 AND id > ?2 ORDER BY id ASC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![plan_id, after_id, limit as i64], |row| {
            Ok(EventRecord {
                id: row.get(0)?,
                correlation_id: row.get(1)?,
                plan_id: row.get(2)?,
                job_id: row.get(3)?,
                event_type: row.get(4)?,
                payload_json: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}
