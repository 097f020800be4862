mod executor;
pub mod types;
pub mod verify;

pub use types::{DeviceChangeResult, DeviceOutcome, Job, JobState};
pub use verify::{Verifier, VerifyError};

use std::sync::Arc;

use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::core::approval::ApprovalService;
use crate::core::config::EngineConfig;
use crate::core::device::DeviceClient;
use crate::core::error::EngineError;
use crate::core::plan::{Plan, PlanState};
use crate::core::store::EngineStore;

pub fn can_transition(from: JobState, to: JobState) -> bool {
    if from == to {
        return true;
    }
    match from {
        JobState::Pending => matches!(to, JobState::Running | JobState::Cancelled),
        JobState::Running => matches!(
            to,
            JobState::Success | JobState::PartialFailure | JobState::Failed | JobState::Cancelled
        ),
        JobState::Success | JobState::PartialFailure | JobState::Failed | JobState::Cancelled => {
            false
        }
    }
}

/// Converts one applyable plan into exactly one running job and drives it
/// to completion. The one-job-per-plan rule is enforced by a persisted
/// lease claimed with a conditional update, not an in-process flag, so it
/// holds across engine instances and restarts.
pub struct Orchestrator {
    store: Arc<EngineStore>,
    devices: Arc<DeviceClient>,
    approvals: ApprovalService,
    config: EngineConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<EngineStore>,
        devices: Arc<DeviceClient>,
        approvals: ApprovalService,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            devices,
            approvals,
            config,
        }
    }

    /// A failed plan stays applyable so a fresh job can retry it; the
    /// job history keeps every attempt.
    fn applyable_states(&self) -> &'static [PlanState] {
        if self.config.require_approval {
            &[PlanState::Approved, PlanState::Failed]
        } else {
            &[
                PlanState::Draft,
                PlanState::PendingApproval,
                PlanState::Approved,
                PlanState::Failed,
            ]
        }
    }

    pub async fn apply_plan(
        &self,
        plan_id: &str,
        token: Option<&str>,
    ) -> Result<Job, EngineError> {
        let record = self
            .store
            .get_plan(plan_id)
            .await?
            .ok_or_else(|| EngineError::PlanNotFound(plan_id.to_string()))?;
        let plan = Plan::from_record(record)?;

        let applyable = self.applyable_states();
        if !applyable.contains(&plan.status) {
            if plan.status == PlanState::Applying {
                return Err(EngineError::AlreadyRunning(plan_id.to_string()));
            }
            return Err(EngineError::InvalidState {
                entity: format!("plan {plan_id}"),
                status: plan.status.as_str().to_string(),
                action: "apply",
            });
        }

        // Token is validated and spent before any job exists: a rejected
        // token must leave no trace beyond its own audit event.
        if self.config.require_approval {
            let secret = token.ok_or_else(|| EngineError::ApprovalRequired(plan_id.to_string()))?;
            let token_id = self.approvals.validate_and_consume(secret, plan_id).await?;
            let _ = self
                .store
                .add_event(
                    &plan.correlation_id,
                    Some(plan_id),
                    None,
                    "approval_consumed",
                    &json!({ "token_id": token_id }).to_string(),
                )
                .await;
        }

        let job_id = Uuid::new_v4().to_string();
        let from_statuses: Vec<&str> = applyable.iter().map(|s| s.as_str()).collect();
        if !self
            .store
            .acquire_job_lease(plan_id, &job_id, &from_statuses)
            .await?
        {
            return Err(EngineError::AlreadyRunning(plan_id.to_string()));
        }

        let attempt = self.store.next_job_attempt(plan_id).await?;
        self.store
            .create_job(&job_id, plan_id, attempt, &plan.device_ids)
            .await?;
        let _ = self
            .store
            .add_event(
                &plan.correlation_id,
                Some(plan_id),
                Some(&job_id),
                "job_created",
                &json!({ "attempt": attempt, "devices": plan.device_ids.len() }).to_string(),
            )
            .await;

        self.store
            .update_job_status(&job_id, JobState::Running.as_str(), None)
            .await?;
        let _ = self
            .store
            .add_event(
                &plan.correlation_id,
                Some(plan_id),
                Some(&job_id),
                "job_status",
                &json!({ "status": JobState::Running.as_str() }).to_string(),
            )
            .await;
        info!(plan = %plan_id, job = %job_id, attempt, "job started");

        let (final_status, summary) =
            executor::run_apply_job(self.store.clone(), self.devices.clone(), &plan, &job_id).await;

        if can_transition(JobState::Running, final_status) {
            self.store
                .update_job_status(&job_id, final_status.as_str(), Some(&summary))
                .await?;
        }

        // Mirror the job's terminal outcome onto the owning plan and
        // release the lease in the same update.
        let plan_status = match final_status {
            JobState::Success => PlanState::Applied,
            JobState::Cancelled => PlanState::Cancelled,
            _ => PlanState::Failed,
        };
        self.store
            .release_job_lease(plan_id, plan_status.as_str())
            .await?;

        let _ = self
            .store
            .add_event(
                &plan.correlation_id,
                Some(plan_id),
                Some(&job_id),
                "job_done",
                &json!({
                    "status": final_status.as_str(),
                    "plan_status": plan_status.as_str(),
                    "summary": summary,
                })
                .to_string(),
            )
            .await;
        info!(
            plan = %plan_id,
            job = %job_id,
            status = final_status.as_str(),
            "job finished"
        );

        self.get_job(&job_id).await
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Job, EngineError> {
        let record = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))?;
        let results = self.store.list_device_results(job_id).await?;
        Ok(Job::from_records(record, results)?)
    }

    pub async fn list_jobs(&self, plan_id: &str) -> Result<Vec<Job>, EngineError> {
        let records = self.store.list_jobs(plan_id).await?;
        let mut jobs = Vec::with_capacity(records.len());
        for record in records {
            let results = self.store.list_device_results(&record.job_id).await?;
            jobs.push(Job::from_records(record, results)?);
        }
        Ok(jobs)
    }

    /// Flag a running job for cancellation. The executor honors the flag
    /// at the next device boundary; the in-flight device call finishes
    /// first.
    pub async fn request_cancel(&self, job_id: &str) -> Result<(), EngineError> {
        if self.store.request_job_cancel(job_id).await? {
            info!(job = %job_id, "job cancellation requested");
            return Ok(());
        }
        let record = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))?;
        Err(EngineError::InvalidState {
            entity: format!("job {job_id}"),
            status: record.status,
            action: "cancel",
        })
    }
}

#[cfg(test)]
mod tests;
