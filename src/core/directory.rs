use async_trait::async_trait;
use thiserror::Error;

/// Contract for the external device inventory. Authentication, role, and
/// environment checks happen before the engine is invoked; this trait only
/// answers whether a device exists and may receive the named operation
/// given its capability flags.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn check(&self, device_id: &str, operation: &str) -> Result<(), EligibilityError>;
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EligibilityError {
    #[error("device {0} is not known to the inventory")]
    UnknownDevice(String),

    #[error("device {device} is not eligible for {operation}: {reason}")]
    NotEligible {
        device: String,
        operation: String,
        reason: String,
    },
}

/// Inventory that admits every device. Useful for deployments where the
/// upstream caller has already resolved eligibility.
pub struct OpenDirectory;

#[async_trait]
impl DeviceDirectory for OpenDirectory {
    async fn check(&self, _device_id: &str, _operation: &str) -> Result<(), EligibilityError> {
        Ok(())
    }
}
