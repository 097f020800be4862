use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::store::types::{DeviceResultRecord, JobRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Success,
    PartialFailure,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Success => "success",
            JobState::PartialFailure => "partial_failure",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(JobState::Pending),
            "running" => Some(JobState::Running),
            "success" => Some(JobState::Success),
            "partial_failure" => Some(JobState::PartialFailure),
            "failed" => Some(JobState::Failed),
            "cancelled" => Some(JobState::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Success | JobState::PartialFailure | JobState::Failed | JobState::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceOutcome {
    Pending,
    Success,
    Failed,
    RolledBack,
    Skipped,
}

impl DeviceOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceOutcome::Pending => "pending",
            DeviceOutcome::Success => "success",
            DeviceOutcome::Failed => "failed",
            DeviceOutcome::RolledBack => "rolled_back",
            DeviceOutcome::Skipped => "skipped",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(DeviceOutcome::Pending),
            "success" => Some(DeviceOutcome::Success),
            "failed" => Some(DeviceOutcome::Failed),
            "rolled_back" => Some(DeviceOutcome::RolledBack),
            "skipped" => Some(DeviceOutcome::Skipped),
            _ => None,
        }
    }
}

/// Outcome for one device within one job, in plan order. `before`/`after`
/// are value copies of the touched fields captured at execution time.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceChangeResult {
    pub device_id: String,
    pub outcome: DeviceOutcome,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub retries: u32,
}

/// One execution attempt of a plan.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub job_id: String,
    pub plan_id: String,
    pub status: JobState,
    pub attempt: i64,
    pub summary: Option<String>,
    pub results: Vec<DeviceChangeResult>,
    pub created_at: String,
    pub finished_at: Option<String>,
}

impl Job {
    pub fn from_records(job: JobRecord, results: Vec<DeviceResultRecord>) -> Result<Self> {
        let status = JobState::from_status(&job.status)
            .with_context(|| format!("unknown job status {}", job.status))?;
        let mut parsed = Vec::with_capacity(results.len());
        for record in results {
            let outcome = DeviceOutcome::from_status(&record.outcome)
                .with_context(|| format!("unknown device outcome {}", record.outcome))?;
            parsed.push(DeviceChangeResult {
                device_id: record.device_id,
                outcome,
                before: record
                    .before_json
                    .as_deref()
                    .and_then(|json| serde_json::from_str(json).ok()),
                after: record
                    .after_json
                    .as_deref()
                    .and_then(|json| serde_json::from_str(json).ok()),
                error: record.error,
                duration_ms: record.duration_ms.max(0) as u64,
                retries: record.retries.max(0) as u32,
            });
        }
        Ok(Self {
            job_id: job.job_id,
            plan_id: job.plan_id,
            status,
            attempt: job.attempt,
            summary: job.summary,
            results: parsed,
            created_at: job.created_at,
            finished_at: job.finished_at,
        })
    }
}
