use thiserror::Error;

use crate::core::approval::ApprovalError;
use crate::core::device::commands::CommandError;
use crate::core::device::transport::DeviceError;
use crate::core::directory::EligibilityError;

/// Caller-facing error taxonomy. Transient device failures never appear
/// here: the device client absorbs and retries them, and anything that
/// survives the retry budget is recorded in the Job's per-device results
/// rather than raised out of `apply_plan`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("plan {0} not found")]
    PlanNotFound(String),

    #[error("job {0} not found")]
    JobNotFound(String),

    #[error("plan has an empty device list")]
    EmptyDeviceList,

    #[error("plan targets {count} devices, maximum is {max}")]
    BatchTooLarge { count: usize, max: usize },

    #[error("malformed change spec: {0}")]
    MalformedChangeSpec(String),

    #[error(transparent)]
    Eligibility(#[from] EligibilityError),

    #[error("{entity} is in status {status}, which does not permit {action}")]
    InvalidState {
        entity: String,
        status: String,
        action: &'static str,
    },

    #[error("a job is already running for plan {0}")]
    AlreadyRunning(String),

    #[error("plan {0} requires an approval token")]
    ApprovalRequired(String),

    #[error(transparent)]
    Approval(#[from] ApprovalError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}
