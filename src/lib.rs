pub mod core;

pub use crate::core::config::EngineConfig;
pub use crate::core::device::transport::{DeviceError, DeviceTransport};
pub use crate::core::device::{DeviceClient, Sleeper, TokioSleeper};
pub use crate::core::directory::{DeviceDirectory, EligibilityError};
pub use crate::core::engine::Engine;
pub use crate::core::error::EngineError;
pub use crate::core::store::EngineStore;
