use anyhow::Result;
use rusqlite::{Row, params};

use super::EngineStore;
use super::types::{DeviceResultRecord, JobRecord};

const JOB_COLUMNS: &str = "job_id, plan_id, status, attempt, summary, cancel_requested, \
     created_at, updated_at, finished_at";

fn map_job_row(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    Ok(JobRecord {
        job_id: row.get(0)?,
        plan_id: row.get(1)?,
        status: row.get(2)?,
        attempt: row.get(3)?,
        summary: row.get(4)?,
        cancel_requested: row.get::<_, i64>(5)? != 0,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        finished_at: row.get(8)?,
    })
}

fn map_result_row(row: &Row<'_>) -> rusqlite::Result<DeviceResultRecord> {
    Ok(DeviceResultRecord {
        job_id: row.get(0)?,
        position: row.get(1)?,
        device_id: row.get(2)?,
        outcome: row.get(3)?,
        before_json: row.get(4)?,
        after_json: row.get(5)?,
        error: row.get(6)?,
        duration_ms: row.get(7)?,
        retries: row.get(8)?,
    })
}

impl EngineStore {
    /// Insert a job in `pending` with one `pending` device result per
    /// target, in plan order. The result rows are created up front so the
    /// ordering invariant holds no matter where execution halts.
    pub async fn create_job(
        &self,
        job_id: &str,
        plan_id: &str,
        attempt: i64,
        device_ids: &[String],
    ) -> Result<JobRecord> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO jobs (job_id, plan_id, status, attempt) VALUES (?1, ?2, 'pending', ?3)",
            params![job_id, plan_id, attempt],
        )?;
        for (position, device_id) in device_ids.iter().enumerate() {
            db.execute(
                "INSERT INTO device_results (job_id, position, device_id, outcome)
                 VALUES (?1, ?2, ?3, 'pending')",
                params![job_id, position as i64, device_id],
            )?;
        }
        let rec = db.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?1"),
            params![job_id],
            map_job_row,
        )?;
        Ok(rec)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>> {
        let db = self.db.lock().await;
        let mut stmt =
            db.prepare(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?1 LIMIT 1"))?;
        let mut rows = stmt.query(params![job_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(map_job_row(row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_jobs(&self, plan_id: &str) -> Result<Vec<JobRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE plan_id = ?1 ORDER BY rowid ASC"
        ))?;
        let rows = stmt.query_map(params![plan_id], map_job_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn next_job_attempt(&self, plan_id: &str) -> Result<i64> {
        let db = self.db.lock().await;
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM jobs WHERE plan_id = ?1",
            params![plan_id],
            |row| row.get(0),
        )?;
        Ok(count + 1)
    }

    pub async fn update_job_status(
        &self,
        job_id: &str,
        status: &str,
        summary: Option<&str>,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let finished = matches!(status, "success" | "partial_failure" | "failed" | "cancelled");
        let rows = if finished {
            db.execute(
                "UPDATE jobs
                 SET status = ?1, summary = COALESCE(?2, summary),
                     updated_at = CURRENT_TIMESTAMP, finished_at = CURRENT_TIMESTAMP
                 WHERE job_id = ?3",
                params![status, summary, job_id],
            )?
        } else {
            db.execute(
                "UPDATE jobs
                 SET status = ?1, summary = COALESCE(?2, summary), updated_at = CURRENT_TIMESTAMP
                 WHERE job_id = ?3",
                params![status, summary, job_id],
            )?
        };
        Ok(rows > 0)
    }

    pub async fn request_job_cancel(&self, job_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE jobs SET cancel_requested = 1, updated_at = CURRENT_TIMESTAMP
             WHERE job_id = ?1 AND status IN ('pending', 'running')",
            params![job_id],
        )?;
        Ok(rows > 0)
    }

    pub async fn job_cancel_requested(&self, job_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let flagged: i64 = db.query_row(
            "SELECT cancel_requested FROM jobs WHERE job_id = ?1",
            params![job_id],
            |row| row.get(0),
        )?;
        Ok(flagged != 0)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn set_device_result(
        &self,
        job_id: &str,
        position: i64,
        outcome: &str,
        before_json: Option<&str>,
        after_json: Option<&str>,
        error: Option<&str>,
        duration_ms: i64,
        retries: i64,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE device_results
             SET outcome = ?1, before_json = ?2, after_json = ?3, error = ?4,
                 duration_ms = ?5, retries = ?6
             WHERE job_id = ?7 AND position = ?8",
            params![outcome, before_json, after_json, error, duration_ms, retries, job_id, position],
        )?;
        Ok(rows > 0)
    }

    pub async fn list_device_results(&self, job_id: &str) -> Result<Vec<DeviceResultRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT job_id, position, device_id, outcome, before_json, after_json, error,
                    duration_ms, retries
             FROM device_results WHERE job_id = ?1 ORDER BY position ASC",
        )?;
        let rows = stmt.query_map(params![job_id], map_result_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}
