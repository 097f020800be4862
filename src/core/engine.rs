use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::core::approval::{ApprovalService, IssuedToken, SystemClock};
use crate::core::config::EngineConfig;
use crate::core::device::commands::CommandRegistry;
use crate::core::device::transport::DeviceTransport;
use crate::core::device::{CommandOutcome, CommandRunError, DeviceClient};
use crate::core::directory::DeviceDirectory;
use crate::core::error::EngineError;
use crate::core::orchestrator::{Job, Orchestrator};
use crate::core::plan::{CreatePlanRequest, Plan, PlanManager, PlanState};
use crate::core::store::EngineStore;
use crate::core::store::types::EventRecord;

/// The narrow inbound surface collaborators call. Authentication and
/// authorization are assumed settled before any of these are invoked;
/// approval tokens are the one credential the engine re-checks itself.
pub struct Engine {
    store: Arc<EngineStore>,
    devices: Arc<DeviceClient>,
    plans: PlanManager,
    orchestrator: Orchestrator,
    approvals: ApprovalService,
    config: EngineConfig,
}

impl Engine {
    /// Open against an existing data directory, using the persisted
    /// engine config when one is present.
    pub async fn open(
        data_dir: impl AsRef<Path>,
        transport: Arc<dyn DeviceTransport>,
        directory: Arc<dyn DeviceDirectory>,
        commands: CommandRegistry,
    ) -> Result<Self, EngineError> {
        let store = Arc::new(EngineStore::open(data_dir).await?);
        let config = store.get_engine_config().await?.unwrap_or_default();
        let devices = Arc::new(DeviceClient::new(
            transport,
            config.retry_policy(),
            config.call_deadline(),
            config.per_device_concurrency,
            commands,
        ));
        Ok(Self::new(store, devices, directory, config))
    }

    /// Open with an explicit config, persisting it for other instances
    /// sharing the store.
    pub async fn with_config(
        data_dir: impl AsRef<Path>,
        transport: Arc<dyn DeviceTransport>,
        directory: Arc<dyn DeviceDirectory>,
        commands: CommandRegistry,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let store = Arc::new(EngineStore::open(data_dir).await?);
        store.set_engine_config(&config).await?;
        let devices = Arc::new(DeviceClient::new(
            transport,
            config.retry_policy(),
            config.call_deadline(),
            config.per_device_concurrency,
            commands,
        ));
        Ok(Self::new(store, devices, directory, config))
    }

    pub fn new(
        store: Arc<EngineStore>,
        devices: Arc<DeviceClient>,
        directory: Arc<dyn DeviceDirectory>,
        config: EngineConfig,
    ) -> Self {
        let approvals = ApprovalService::new(
            store.clone(),
            Arc::new(SystemClock),
            config.token_ttl_secs,
        );
        let plans = PlanManager::new(store.clone(), devices.clone(), directory, config.clone());
        let orchestrator = Orchestrator::new(
            store.clone(),
            devices.clone(),
            approvals.clone(),
            config.clone(),
        );
        Self {
            store,
            devices,
            plans,
            orchestrator,
            approvals,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn create_plan(&self, request: CreatePlanRequest) -> Result<Plan, EngineError> {
        self.plans.create_plan(request).await
    }

    pub async fn cancel_plan(&self, plan_id: &str, actor: &str) -> Result<Plan, EngineError> {
        self.plans.cancel_plan(plan_id, actor).await
    }

    pub async fn get_plan(&self, plan_id: &str) -> Result<Plan, EngineError> {
        self.plans.get_plan(plan_id).await
    }

    pub async fn list_plans(&self, limit: usize) -> Result<Vec<Plan>, EngineError> {
        self.plans.list_plans(limit).await
    }

    /// The approve step: records the approver on the plan, moves it to
    /// `approved`, and hands back the single-use token. The secret in the
    /// returned value is shown once and never stored.
    pub async fn issue_approval(
        &self,
        plan_id: &str,
        approver: &str,
    ) -> Result<IssuedToken, EngineError> {
        let plan = self.plans.get_plan(plan_id).await?;
        // Failed plans may be re-approved for a retry attempt.
        if !matches!(
            plan.status,
            PlanState::PendingApproval | PlanState::Approved | PlanState::Failed
        ) {
            return Err(EngineError::InvalidState {
                entity: format!("plan {plan_id}"),
                status: plan.status.as_str().to_string(),
                action: "approve",
            });
        }

        let token = self.approvals.issue(plan_id, approver).await?;
        if plan.status == PlanState::PendingApproval {
            self.store.set_plan_approved(plan_id, approver).await?;
        }
        let _ = self
            .store
            .add_event(
                &plan.correlation_id,
                Some(plan_id),
                None,
                "approval_issued",
                &json!({
                    "token_id": token.token_id,
                    "approver": approver,
                    "expires_at": token.expires_at,
                })
                .to_string(),
            )
            .await;
        Ok(token)
    }

    pub async fn apply_plan(
        &self,
        plan_id: &str,
        token: Option<&str>,
    ) -> Result<Job, EngineError> {
        self.orchestrator.apply_plan(plan_id, token).await
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Job, EngineError> {
        self.orchestrator.get_job(job_id).await
    }

    pub async fn list_jobs(&self, plan_id: &str) -> Result<Vec<Job>, EngineError> {
        self.orchestrator.list_jobs(plan_id).await
    }

    pub async fn request_job_cancel(&self, job_id: &str) -> Result<(), EngineError> {
        self.orchestrator.request_cancel(job_id).await
    }

    /// Escape hatch for operations the device API cannot express. Only
    /// pre-registered templates run, and every invocation lands in the
    /// audit stream, success or failure.
    pub async fn run_device_command(
        &self,
        device_id: &str,
        template_id: &str,
        params: &HashMap<String, String>,
        correlation_id: Option<&str>,
    ) -> Result<CommandOutcome, EngineError> {
        let correlation = correlation_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let result = self
            .devices
            .run_whitelisted_command(device_id, template_id, params)
            .await;

        let payload = match &result {
            Ok(outcome) => json!({
                "device_id": device_id,
                "template_id": template_id,
                "params": params,
                "output": outcome.output,
                "ok": true,
            }),
            Err(err) => json!({
                "device_id": device_id,
                "template_id": template_id,
                "params": params,
                "error": err.to_string(),
                "ok": false,
            }),
        };
        let _ = self
            .store
            .add_event(&correlation, None, None, "device_command", &payload.to_string())
            .await;

        result.map_err(|err| match err {
            CommandRunError::Template(e) => EngineError::Command(e),
            CommandRunError::Device(failure) => EngineError::Device(failure.error),
        })
    }

    pub async fn list_events(
        &self,
        plan_id: &str,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<EventRecord>, EngineError> {
        Ok(self.store.list_events(plan_id, after_id, limit).await?)
    }
}
