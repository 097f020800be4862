/// Raw persisted rows. Status columns stay as strings here; the plan and
/// orchestrator modules parse them through their state enums.
#[derive(Debug, Clone)]
pub struct PlanRecord {
    pub plan_id: String,
    pub operation: String,
    pub status: String,
    pub created_by: String,
    pub correlation_id: String,
    pub summary: String,
    pub device_ids_json: String,
    pub change_spec_json: String,
    pub preview_json: String,
    pub continue_on_failure: bool,
    pub approved_by: Option<String>,
    pub approved_at: Option<String>,
    pub running_job_id: Option<String>,
    pub last_job_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub job_id: String,
    pub plan_id: String,
    pub status: String,
    pub attempt: i64,
    pub summary: Option<String>,
    pub cancel_requested: bool,
    pub created_at: String,
    pub updated_at: String,
    pub finished_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DeviceResultRecord {
    pub job_id: String,
    pub position: i64,
    pub device_id: String,
    pub outcome: String,
    pub before_json: Option<String>,
    pub after_json: Option<String>,
    pub error: Option<String>,
    pub duration_ms: i64,
    pub retries: i64,
}

#[derive(Debug, Clone)]
pub struct TokenRecord {
    pub token_id: String,
    pub plan_id: String,
    pub issued_by: String,
    pub expires_at: i64,
    pub used: bool,
}

#[derive(Debug, Clone)]
pub struct EventRecord {
    pub id: i64,
    pub correlation_id: String,
    pub plan_id: Option<String>,
    pub job_id: Option<String>,
    pub event_type: String,
    pub payload_json: String,
    pub created_at: String,
}
