pub mod types;

pub use types::{ChangeSpec, CreatePlanRequest, DevicePreview, Plan, PlanState};

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::config::EngineConfig;
use crate::core::device::{DeviceClient, field_delta};
use crate::core::directory::DeviceDirectory;
use crate::core::error::EngineError;
use crate::core::store::{EngineStore, NewPlan};

pub fn can_transition(from: PlanState, to: PlanState) -> bool {
    if from == to {
        return true;
    }
    match from {
        PlanState::Draft => matches!(
            to,
            PlanState::PendingApproval
                | PlanState::Approved
                | PlanState::Applying
                | PlanState::Cancelled
        ),
        PlanState::PendingApproval => matches!(
            to,
            PlanState::Approved | PlanState::Applying | PlanState::Cancelled
        ),
        PlanState::Approved => matches!(to, PlanState::Applying | PlanState::Cancelled),
        PlanState::Applying => matches!(
            to,
            PlanState::Applied | PlanState::Failed | PlanState::Cancelled
        ),
        // A failed plan may be retried with a fresh job.
        PlanState::Failed => matches!(to, PlanState::Applying),
        PlanState::Applied | PlanState::Cancelled => false,
    }
}

/// Owns plan creation and the plan state machine. Never touches a device
/// beyond preview reads; execution belongs to the orchestrator.
pub struct PlanManager {
    store: Arc<EngineStore>,
    devices: Arc<DeviceClient>,
    directory: Arc<dyn DeviceDirectory>,
    config: EngineConfig,
}

impl PlanManager {
    pub fn new(
        store: Arc<EngineStore>,
        devices: Arc<DeviceClient>,
        directory: Arc<dyn DeviceDirectory>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            devices,
            directory,
            config,
        }
    }

    pub async fn create_plan(&self, request: CreatePlanRequest) -> Result<Plan, EngineError> {
        if request.device_ids.is_empty() {
            return Err(EngineError::EmptyDeviceList);
        }
        if request.device_ids.len() > self.config.max_devices_per_plan {
            return Err(EngineError::BatchTooLarge {
                count: request.device_ids.len(),
                max: self.config.max_devices_per_plan,
            });
        }
        request
            .change
            .validate()
            .map_err(EngineError::MalformedChangeSpec)?;

        for device_id in &request.device_ids {
            self.directory.check(device_id, &request.operation).await?;
        }

        let preview = self.compute_preview(&request).await;

        let plan_id = Uuid::new_v4().to_string();
        let correlation_id = request
            .correlation_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let status = if self.config.require_approval {
            PlanState::PendingApproval
        } else {
            PlanState::Draft
        };
        let continue_on_failure = request
            .continue_on_failure
            .unwrap_or(self.config.continue_on_failure);

        let device_ids_json = serde_json::to_string(&request.device_ids)
            .map_err(anyhow::Error::from)?;
        let change_spec_json =
            serde_json::to_string(&request.change).map_err(anyhow::Error::from)?;
        let preview_json = serde_json::to_string(&preview).map_err(anyhow::Error::from)?;

        let record = self
            .store
            .insert_plan(&NewPlan {
                plan_id: &plan_id,
                operation: &request.operation,
                status: status.as_str(),
                created_by: &request.created_by,
                correlation_id: &correlation_id,
                summary: &request.summary,
                device_ids_json: &device_ids_json,
                change_spec_json: &change_spec_json,
                preview_json: &preview_json,
                continue_on_failure,
            })
            .await?;

        let _ = self
            .store
            .add_event(
                &correlation_id,
                Some(&plan_id),
                None,
                "plan_created",
                &json!({
                    "operation": request.operation,
                    "device_count": request.device_ids.len(),
                    "status": status.as_str(),
                    "created_by": request.created_by,
                })
                .to_string(),
            )
            .await;

        info!(
            plan = %plan_id,
            operation = %record.operation,
            devices = request.device_ids.len(),
            "plan created"
        );
        Ok(Plan::from_record(record)?)
    }

    /// Dry-run diff per device, read-only. One unreadable device does not
    /// block plan creation; the approver sees the warning instead.
    async fn compute_preview(&self, request: &CreatePlanRequest) -> Vec<DevicePreview> {
        let mut preview = Vec::with_capacity(request.device_ids.len());
        for device_id in &request.device_ids {
            let desired = request.change.for_device(device_id);
            match self.devices.read(device_id, &request.change.resource).await {
                Ok(read) => preview.push(DevicePreview {
                    device_id: device_id.clone(),
                    current: Some(read.state.clone()),
                    delta: Some(field_delta(&read.state, &desired)),
                    warning: None,
                }),
                Err(failure) => {
                    warn!(device = %device_id, error = %failure, "preview read failed");
                    preview.push(DevicePreview {
                        device_id: device_id.clone(),
                        current: None,
                        delta: None,
                        warning: Some(format!("preview read failed: {failure}")),
                    });
                }
            }
        }
        preview
    }

    pub async fn cancel_plan(&self, plan_id: &str, actor: &str) -> Result<Plan, EngineError> {
        let record = self
            .store
            .get_plan(plan_id)
            .await?
            .ok_or_else(|| EngineError::PlanNotFound(plan_id.to_string()))?;
        let status = Plan::from_record(record)?.status;

        // Cancellation is an administrative action on a plan that has not
        // begun executing; running jobs cancel through the orchestrator.
        if !matches!(
            status,
            PlanState::Draft | PlanState::PendingApproval | PlanState::Approved
        ) {
            return Err(EngineError::InvalidState {
                entity: format!("plan {plan_id}"),
                status: status.as_str().to_string(),
                action: "cancel",
            });
        }

        self.store
            .update_plan_status(plan_id, PlanState::Cancelled.as_str())
            .await?;
        let plan = self.get_plan(plan_id).await?;
        let _ = self
            .store
            .add_event(
                &plan.correlation_id,
                Some(plan_id),
                None,
                "plan_cancelled",
                &json!({ "actor": actor }).to_string(),
            )
            .await;
        info!(plan = %plan_id, actor = %actor, "plan cancelled");
        Ok(plan)
    }

    pub async fn get_plan(&self, plan_id: &str) -> Result<Plan, EngineError> {
        let record = self
            .store
            .get_plan(plan_id)
            .await?
            .ok_or_else(|| EngineError::PlanNotFound(plan_id.to_string()))?;
        Ok(Plan::from_record(record)?)
    }

    pub async fn list_plans(&self, limit: usize) -> Result<Vec<Plan>, EngineError> {
        let records = self.store.list_plans(limit).await?;
        let mut plans = Vec::with_capacity(records.len());
        for record in records {
            plans.push(Plan::from_record(record)?);
        }
        Ok(plans)
    }
}
