use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::core::device::{DeviceClient, field_delta};

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("verification failed: {diff}")]
    VerificationFailed { diff: String },

    #[error("health check failed after change: {0}")]
    HealthCheckFailed(String),

    /// Rollback did not restore the device. Not retried; an operator has
    /// to intervene.
    #[error("rollback failed, manual intervention required: {0}")]
    RollbackFailed(String),
}

/// Confirms a just-applied change actually took effect and compensates
/// when it did not. Rollback only ever targets the device whose change
/// just failed; devices verified earlier in the job are left alone.
pub struct Verifier {
    devices: Arc<DeviceClient>,
}

impl Verifier {
    pub fn new(devices: Arc<DeviceClient>) -> Self {
        Self { devices }
    }

    /// Re-read the resource and compare the observed values against the
    /// fields the change was supposed to set, then probe basic health.
    pub async fn verify(
        &self,
        device_id: &str,
        resource: &str,
        expected: &Value,
    ) -> Result<(), VerifyError> {
        let read = self
            .devices
            .read(device_id, resource)
            .await
            .map_err(|failure| VerifyError::HealthCheckFailed(failure.to_string()))?;

        let mismatched = field_delta(&read.state, expected);
        if let Some(fields) = mismatched.as_object()
            && !fields.is_empty()
        {
            let diff = fields
                .iter()
                .map(|(key, want)| {
                    let observed = read.state.get(key).cloned().unwrap_or(Value::Null);
                    format!("{key}: expected {want}, observed {observed}")
                })
                .collect::<Vec<_>>()
                .join("; ");
            warn!(device = device_id, resource, %diff, "verification mismatch");
            return Err(VerifyError::VerificationFailed { diff });
        }

        self.devices
            .health(device_id)
            .await
            .map_err(|err| VerifyError::HealthCheckFailed(err.to_string()))?;
        Ok(())
    }

    /// Re-apply the before-values captured at change time, then re-verify
    /// once. One attempt only: a rollback that does not verify is a
    /// terminal condition, not something to loop on.
    pub async fn rollback(
        &self,
        device_id: &str,
        resource: &str,
        before: &Value,
    ) -> Result<(), VerifyError> {
        info!(device = device_id, resource, "rolling back device change");
        self.devices
            .apply_change(device_id, resource, before)
            .await
            .map_err(|failure| VerifyError::RollbackFailed(failure.to_string()))?;

        match self.verify(device_id, resource, before).await {
            Ok(()) => {
                info!(device = device_id, resource, "rollback verified");
                Ok(())
            }
            Err(err) => Err(VerifyError::RollbackFailed(err.to_string())),
        }
    }
}
