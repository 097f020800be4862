use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::store::types::PlanRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanState {
    Draft,
    PendingApproval,
    Approved,
    Applying,
    Applied,
    Failed,
    Cancelled,
}

impl PlanState {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanState::Draft => "draft",
            PlanState::PendingApproval => "pending_approval",
            PlanState::Approved => "approved",
            PlanState::Applying => "applying",
            PlanState::Applied => "applied",
            PlanState::Failed => "failed",
            PlanState::Cancelled => "cancelled",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(PlanState::Draft),
            "pending_approval" => Some(PlanState::PendingApproval),
            "approved" => Some(PlanState::Approved),
            "applying" => Some(PlanState::Applying),
            "applied" => Some(PlanState::Applied),
            "failed" => Some(PlanState::Failed),
            "cancelled" => Some(PlanState::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PlanState::Applied | PlanState::Cancelled)
    }
}

/// The intended change, shared by every device in the plan. `desired` is a
/// flat object of resource fields; `overrides` layers device-specific
/// values on top for the named device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeSpec {
    pub resource: String,
    pub desired: Value,
    #[serde(default)]
    pub overrides: HashMap<String, Value>,
}

impl ChangeSpec {
    /// The portion of the change that applies to one device.
    pub fn for_device(&self, device_id: &str) -> Value {
        let mut fields = match self.desired.as_object() {
            Some(map) => map.clone(),
            None => serde_json::Map::new(),
        };
        if let Some(Value::Object(over)) = self.overrides.get(device_id) {
            for (key, value) in over {
                fields.insert(key.clone(), value.clone());
            }
        }
        Value::Object(fields)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.resource.trim().is_empty() {
            return Err("resource must not be empty".to_string());
        }
        if !self.desired.is_object() {
            return Err("desired state must be a JSON object of fields".to_string());
        }
        for (device, value) in &self.overrides {
            if !value.is_object() {
                return Err(format!("override for device {device} must be a JSON object"));
            }
        }
        Ok(())
    }
}

/// Per-device dry-run computed at plan creation for the approver's
/// benefit. A failed preview read becomes a warning, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevicePreview {
    pub device_id: String,
    pub current: Option<Value>,
    pub delta: Option<Value>,
    pub warning: Option<String>,
}

pub struct CreatePlanRequest {
    pub operation: String,
    pub device_ids: Vec<String>,
    pub change: ChangeSpec,
    pub created_by: String,
    pub summary: String,
    /// Halt policy override; engine default when None.
    pub continue_on_failure: Option<bool>,
    pub correlation_id: Option<String>,
}

/// Immutable description of an intended multi-device change. Only status,
/// approval fields, and the trailing job pointer ever change after
/// creation.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub plan_id: String,
    pub operation: String,
    pub status: PlanState,
    pub created_by: String,
    pub correlation_id: String,
    pub summary: String,
    pub device_ids: Vec<String>,
    pub change: ChangeSpec,
    pub preview: Vec<DevicePreview>,
    pub continue_on_failure: bool,
    pub approved_by: Option<String>,
    pub approved_at: Option<String>,
    pub last_job_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Plan {
    pub fn from_record(record: PlanRecord) -> Result<Self> {
        let status = PlanState::from_status(&record.status)
            .with_context(|| format!("unknown plan status {}", record.status))?;
        Ok(Self {
            plan_id: record.plan_id,
            operation: record.operation,
            status,
            created_by: record.created_by,
            correlation_id: record.correlation_id,
            summary: record.summary,
            device_ids: serde_json::from_str(&record.device_ids_json)
                .context("plan device list is not valid JSON")?,
            change: serde_json::from_str(&record.change_spec_json)
                .context("plan change spec is not valid JSON")?,
            preview: serde_json::from_str(&record.preview_json)
                .context("plan preview is not valid JSON")?,
            continue_on_failure: record.continue_on_failure,
            approved_by: record.approved_by,
            approved_at: record.approved_at,
            last_job_id: record.last_job_id,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}
