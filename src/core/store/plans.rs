use anyhow::Result;
use rusqlite::{Row, params};

use super::EngineStore;
use super::types::PlanRecord;

/// Column set every plan query selects, in `map_plan_row` order.
const PLAN_COLUMNS: &str = "plan_id, operation, status, created_by, correlation_id, summary, \
     device_ids, change_spec, preview, continue_on_failure, approved_by, approved_at, \
     running_job_id, last_job_id, created_at, updated_at";

pub struct NewPlan<'a> {
    pub plan_id: &'a str,
    pub operation: &'a str,
    pub status: &'a str,
    pub created_by: &'a str,
    pub correlation_id: &'a str,
    pub summary: &'a str,
    pub device_ids_json: &'a str,
    pub change_spec_json: &'a str,
    pub preview_json: &'a str,
    pub continue_on_failure: bool,
}

fn map_plan_row(row: &Row<'_>) -> rusqlite::Result<PlanRecord> {
    Ok(PlanRecord {
        plan_id: row.get(0)?,
        operation: row.get(1)?,
        status: row.get(2)?,
        created_by: row.get(3)?,
        correlation_id: row.get(4)?,
        summary: row.get(5)?,
        device_ids_json: row.get(6)?,
        change_spec_json: row.get(7)?,
        preview_json: row.get(8)?,
        continue_on_failure: row.get::<_, i64>(9)? != 0,
        approved_by: row.get(10)?,
        approved_at: row.get(11)?,
        running_job_id: row.get(12)?,
        last_job_id: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

impl EngineStore {
    pub async fn insert_plan(&self, plan: &NewPlan<'_>) -> Result<PlanRecord> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO plans
             (plan_id, operation, status, created_by, correlation_id, summary,
              device_ids, change_spec, preview, continue_on_failure)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                plan.plan_id,
                plan.operation,
                plan.status,
                plan.created_by,
                plan.correlation_id,
                plan.summary,
                plan.device_ids_json,
                plan.change_spec_json,
                plan.preview_json,
                plan.continue_on_failure as i64,
            ],
        )?;
        let rec = db.query_row(
            &format!("SELECT {PLAN_COLUMNS} FROM plans WHERE plan_id = ?1"),
            params![plan.plan_id],
            map_plan_row,
        )?;
        Ok(rec)
    }

    pub async fn get_plan(&self, plan_id: &str) -> Result<Option<PlanRecord>> {
        let db = self.db.lock().await;
        let mut stmt =
            db.prepare(&format!("SELECT {PLAN_COLUMNS} FROM plans WHERE plan_id = ?1 LIMIT 1"))?;
        let mut rows = stmt.query(params![plan_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(map_plan_row(row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_plans(&self, limit: usize) -> Result<Vec<PlanRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {PLAN_COLUMNS} FROM plans ORDER BY rowid DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit as i64], map_plan_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn update_plan_status(&self, plan_id: &str, status: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE plans SET status = ?1, updated_at = CURRENT_TIMESTAMP WHERE plan_id = ?2",
            params![status, plan_id],
        )?;
        Ok(rows > 0)
    }

    pub async fn set_plan_approved(&self, plan_id: &str, approver: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE plans
             SET status = 'approved', approved_by = ?1, approved_at = CURRENT_TIMESTAMP,
                 updated_at = CURRENT_TIMESTAMP
             WHERE plan_id = ?2",
            params![approver, plan_id],
        )?;
        Ok(rows > 0)
    }

    /// Claim the one-running-job-per-plan lease. A single conditional
    /// UPDATE: it only wins if no job currently holds the lease and the
    /// plan is in one of `from_statuses`. Returns false when another job
    /// holds the lease or the plan moved out of an applyable state.
    pub async fn acquire_job_lease(
        &self,
        plan_id: &str,
        job_id: &str,
        from_statuses: &[&str],
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let placeholders = (0..from_statuses.len())
            .map(|i| format!("?{}", i + 3))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE plans
             SET running_job_id = ?1, last_job_id = ?1, status = 'applying',
                 updated_at = CURRENT_TIMESTAMP
             WHERE plan_id = ?2 AND running_job_id IS NULL AND status IN ({placeholders})"
        );
        let mut args: Vec<&dyn rusqlite::ToSql> = vec![&job_id, &plan_id];
        for status in from_statuses {
            args.push(status);
        }
        let rows = db.execute(&sql, args.as_slice())?;
        Ok(rows > 0)
    }

    /// Release the lease and record the plan status the finished job
    /// mirrors onto its plan.
    pub async fn release_job_lease(&self, plan_id: &str, final_status: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE plans
             SET running_job_id = NULL, status = ?1, updated_at = CURRENT_TIMESTAMP
             WHERE plan_id = ?2",
            params![final_status, plan_id],
        )?;
        Ok(rows > 0)
    }
}
