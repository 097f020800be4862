//! Device communication layer: one logical operation per call, with
//! transient-failure retry, per-device concurrency ceilings, per-call
//! deadlines, and read-modify-write diffing hidden from callers.

pub mod commands;
pub mod http;
pub mod transport;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use commands::{CommandError, CommandRegistry};
use transport::{DeviceError, DeviceTransport};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff: base * 2^(attempt-1), capped. `attempt` is the
    /// attempt that just failed, starting at 1.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Seam for backoff waits so retry behavior is testable without real time.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Terminal failure of one logical device call, with the retry budget it
/// consumed on the way.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct DeviceFailure {
    pub error: DeviceError,
    pub retries: u32,
}

#[derive(Debug, Error)]
pub enum CommandRunError {
    #[error(transparent)]
    Template(#[from] CommandError),
    #[error(transparent)]
    Device(#[from] DeviceFailure),
}

#[derive(Debug, Clone)]
pub struct ReadOutcome {
    pub state: Value,
    pub retries: u32,
}

/// Result of a read-modify-write. `before`/`after` are plain value copies
/// of the touched fields, captured at call time.
#[derive(Debug, Clone)]
pub struct ChangeOutcome {
    pub changed: bool,
    pub before: Value,
    pub after: Value,
    pub retries: u32,
}

#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub template_id: String,
    pub command: String,
    pub output: String,
    pub retries: u32,
}

pub struct DeviceClient {
    transport: Arc<dyn DeviceTransport>,
    retry: RetryPolicy,
    call_deadline: Duration,
    per_device_limit: usize,
    sleeper: Arc<dyn Sleeper>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    commands: CommandRegistry,
}

impl DeviceClient {
    pub fn new(
        transport: Arc<dyn DeviceTransport>,
        retry: RetryPolicy,
        call_deadline: Duration,
        per_device_limit: usize,
        commands: CommandRegistry,
    ) -> Self {
        Self {
            transport,
            retry,
            call_deadline,
            per_device_limit: per_device_limit.max(1),
            sleeper: Arc::new(TokioSleeper),
            gates: Mutex::new(HashMap::new()),
            commands,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Fetch the authoritative current state of one resource.
    pub async fn read(&self, device_id: &str, resource: &str) -> Result<ReadOutcome, DeviceFailure> {
        let transport = self.transport.clone();
        let device = device_id.to_string();
        let res = resource.to_string();
        let (state, retries) = self
            .with_retry(device_id, "read", move || {
                let transport = transport.clone();
                let device = device.clone();
                let res = res.clone();
                async move { transport.read(&device, &res).await }
            })
            .await?;
        Ok(ReadOutcome { state, retries })
    }

    /// Read-modify-write: fetch current state, compute the delta against
    /// `desired`, and submit only that delta. Fields not named in
    /// `desired` are never touched, and a full-object replace is never
    /// sent, so out-of-band manual changes survive. An empty delta issues
    /// no write at all.
    pub async fn apply_change(
        &self,
        device_id: &str,
        resource: &str,
        desired: &Value,
    ) -> Result<ChangeOutcome, DeviceFailure> {
        let read = self.read(device_id, resource).await?;
        let before = project(&read.state, desired);
        let delta = field_delta(&read.state, desired);
        let read_retries = read.retries;

        if delta.as_object().is_none_or(|m| m.is_empty()) {
            debug!(device = device_id, resource, "desired state already in effect, no write issued");
            return Ok(ChangeOutcome {
                changed: false,
                before: before.clone(),
                after: before,
                retries: read_retries,
            });
        }

        let transport = self.transport.clone();
        let device = device_id.to_string();
        let res = resource.to_string();
        let delta_owned = delta.clone();
        let (updated, patch_retries) = self
            .with_retry(device_id, "patch", move || {
                let transport = transport.clone();
                let device = device.clone();
                let res = res.clone();
                let delta = delta_owned.clone();
                async move { transport.patch(&device, &res, &delta).await }
            })
            .await
            .map_err(|mut failure| {
                failure.retries += read_retries;
                failure
            })?;

        Ok(ChangeOutcome {
            changed: true,
            before,
            after: project(&updated, desired),
            retries: read_retries + patch_retries,
        })
    }

    /// Run a pre-registered command template. Free-form command strings
    /// are not accepted anywhere; the template set is fixed at startup.
    /// Each invocation is recorded, success or failure.
    pub async fn run_whitelisted_command(
        &self,
        device_id: &str,
        template_id: &str,
        params: &HashMap<String, String>,
    ) -> Result<CommandOutcome, CommandRunError> {
        let command = self.commands.render(template_id, params)?;

        let transport = self.transport.clone();
        let device = device_id.to_string();
        let rendered = command.clone();
        let result = self
            .with_retry(device_id, "execute", move || {
                let transport = transport.clone();
                let device = device.clone();
                let command = rendered.clone();
                async move { transport.execute(&device, &command).await }
            })
            .await;

        match result {
            Ok((output, retries)) => {
                info!(device = device_id, template = template_id, retries, "command executed");
                Ok(CommandOutcome {
                    template_id: template_id.to_string(),
                    command,
                    output,
                    retries,
                })
            }
            Err(failure) => {
                warn!(
                    device = device_id,
                    template = template_id,
                    error = %failure.error,
                    "command failed"
                );
                Err(failure.into())
            }
        }
    }

    /// Lightweight reachability probe; single attempt, deadline-bounded.
    pub async fn health(&self, device_id: &str) -> Result<(), DeviceError> {
        match timeout(self.call_deadline, self.transport.health(device_id)).await {
            Ok(result) => result,
            Err(_) => Err(DeviceError::Timeout),
        }
    }

    async fn gate(&self, device_id: &str) -> Arc<Semaphore> {
        let mut gates = self.gates.lock().await;
        gates
            .entry(device_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_device_limit)))
            .clone()
    }

    /// Bounded retry loop around one transport call. Only classified
    /// transient failures are retried; everything else propagates on the
    /// first attempt. The per-device gate is held across the attempts of
    /// one logical call, so callers beyond the ceiling queue here.
    async fn with_retry<T, F, Fut>(
        &self,
        device_id: &str,
        op: &'static str,
        call: F,
    ) -> Result<(T, u32), DeviceFailure>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, DeviceError>> + Send,
    {
        let gate = self.gate(device_id).await;
        let _permit = gate.acquire_owned().await.map_err(|_| DeviceFailure {
            error: DeviceError::Unreachable("device gate closed".to_string()),
            retries: 0,
        })?;

        let mut attempt: u32 = 1;
        loop {
            let started = Instant::now();
            let result = match timeout(self.call_deadline, call()).await {
                Ok(inner) => inner,
                Err(_) => Err(DeviceError::Timeout),
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(value) => {
                    debug!(device = device_id, op, attempt, elapsed_ms, "device call ok");
                    return Ok((value, attempt - 1));
                }
                Err(err) if err.is_transient() && attempt < self.retry.max_attempts => {
                    warn!(
                        device = device_id,
                        op,
                        attempt,
                        elapsed_ms,
                        error = %err,
                        "transient device failure, retrying"
                    );
                    self.sleeper.sleep(self.retry.delay_for(attempt)).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(
                        device = device_id,
                        op,
                        attempt,
                        elapsed_ms,
                        error = %err,
                        "device call failed"
                    );
                    return Err(DeviceFailure {
                        error: err,
                        retries: attempt - 1,
                    });
                }
            }
        }
    }
}

/// Fields of `desired` whose value differs from `current`. Anything the
/// caller did not mention stays out of the delta.
pub(crate) fn field_delta(current: &Value, desired: &Value) -> Value {
    let mut delta = serde_json::Map::new();
    if let Some(desired_map) = desired.as_object() {
        for (key, want) in desired_map {
            if current.get(key) != Some(want) {
                delta.insert(key.clone(), want.clone());
            }
        }
    }
    Value::Object(delta)
}

/// Snapshot of `state` restricted to the keys `shape` mentions. Missing
/// fields come back as null so before/after snapshots line up.
pub(crate) fn project(state: &Value, shape: &Value) -> Value {
    let mut out = serde_json::Map::new();
    if let Some(shape_map) = shape.as_object() {
        for key in shape_map.keys() {
            out.insert(key.clone(), state.get(key).cloned().unwrap_or(Value::Null));
        }
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests;
