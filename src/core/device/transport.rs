use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Classified failure from one transport call. The split between
/// transient and permanent drives the device client's retry decision.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("device unreachable: {0}")]
    Unreachable(String),

    #[error("device call exceeded its deadline")]
    Timeout,

    /// 5xx-equivalent from the device's management plane.
    #[error("remote service error: {0}")]
    Upstream(String),

    /// Auth, validation, or config-conflict rejection. Never retried.
    #[error("device rejected the request: {0}")]
    Rejected(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    /// The device answered with something we cannot parse.
    #[error("malformed device response: {0}")]
    Protocol(String),
}

impl DeviceError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DeviceError::Unreachable(_) | DeviceError::Timeout | DeviceError::Upstream(_)
        )
    }
}

/// Request/response channel to one managed device. The management API is
/// expected to support partial-field updates: `patch` submits only the
/// delta and returns the resulting resource state.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    async fn read(&self, device_id: &str, resource: &str) -> Result<Value, DeviceError>;

    async fn patch(
        &self,
        device_id: &str,
        resource: &str,
        delta: &Value,
    ) -> Result<Value, DeviceError>;

    async fn execute(&self, device_id: &str, command: &str) -> Result<String, DeviceError>;

    async fn health(&self, device_id: &str) -> Result<(), DeviceError>;
}
