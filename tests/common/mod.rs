#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use convoy::core::approval::Clock;
use convoy::core::config::EngineConfig;
use convoy::core::device::commands::{CommandRegistry, CommandTemplate};
use convoy::core::device::transport::{DeviceError, DeviceTransport};
use convoy::core::device::{DeviceClient, Sleeper};
use convoy::core::directory::OpenDirectory;
use convoy::core::engine::Engine;
use convoy::core::plan::{ChangeSpec, CreatePlanRequest};
use convoy::core::store::EngineStore;

/// In-memory device fleet. State is keyed by (device, resource); failures
/// are scripted per (device, operation) and consumed in order.
pub struct MockDeviceNet {
    state: Mutex<HashMap<(String, String), Value>>,
    scripts: Mutex<HashMap<(String, String), VecDeque<DeviceError>>>,
    /// Devices that silently ignore writes; their patches report success
    /// but leave state untouched, so verification catches them.
    ignore_writes: Mutex<HashSet<String>>,
    patch_log: Mutex<Vec<(String, Value)>>,
    /// One-shot hook: after the next successful patch, request
    /// cancellation of every job of the given plan.
    cancel_hook: Mutex<Option<(Arc<EngineStore>, String)>>,
}

impl MockDeviceNet {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
            scripts: Mutex::new(HashMap::new()),
            ignore_writes: Mutex::new(HashSet::new()),
            patch_log: Mutex::new(Vec::new()),
            cancel_hook: Mutex::new(None),
        }
    }

    pub fn seed(&self, device: &str, resource: &str, state: Value) {
        self.state
            .lock()
            .unwrap()
            .insert((device.to_string(), resource.to_string()), state);
    }

    pub fn script_failures(&self, device: &str, op: &str, errors: Vec<DeviceError>) {
        self.scripts
            .lock()
            .unwrap()
            .insert((device.to_string(), op.to_string()), errors.into());
    }

    pub fn ignore_writes_for(&self, device: &str) {
        self.ignore_writes.lock().unwrap().insert(device.to_string());
    }

    pub fn cancel_plan_jobs_after_next_patch(&self, store: Arc<EngineStore>, plan_id: &str) {
        *self.cancel_hook.lock().unwrap() = Some((store, plan_id.to_string()));
    }

    pub fn device_state(&self, device: &str, resource: &str) -> Option<Value> {
        self.state
            .lock()
            .unwrap()
            .get(&(device.to_string(), resource.to_string()))
            .cloned()
    }

    pub fn patches(&self) -> Vec<(String, Value)> {
        self.patch_log.lock().unwrap().clone()
    }

    fn next_scripted(&self, device: &str, op: &str) -> Option<DeviceError> {
        self.scripts
            .lock()
            .unwrap()
            .get_mut(&(device.to_string(), op.to_string()))
            .and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl DeviceTransport for MockDeviceNet {
    async fn read(&self, device_id: &str, resource: &str) -> Result<Value, DeviceError> {
        if let Some(err) = self.next_scripted(device_id, "read") {
            return Err(err);
        }
        self.device_state(device_id, resource)
            .ok_or_else(|| DeviceError::NotFound(resource.to_string()))
    }

    async fn patch(
        &self,
        device_id: &str,
        resource: &str,
        delta: &Value,
    ) -> Result<Value, DeviceError> {
        if let Some(err) = self.next_scripted(device_id, "patch") {
            return Err(err);
        }
        let ignored = self.ignore_writes.lock().unwrap().contains(device_id);
        let current = {
            let mut state = self.state.lock().unwrap();
            let entry = state
                .get_mut(&(device_id.to_string(), resource.to_string()))
                .ok_or_else(|| DeviceError::NotFound(resource.to_string()))?;
            if !ignored {
                if let (Some(map), Some(delta_map)) = (entry.as_object_mut(), delta.as_object()) {
                    for (key, value) in delta_map {
                        map.insert(key.clone(), value.clone());
                    }
                }
            }
            entry.clone()
        };
        self.patch_log
            .lock()
            .unwrap()
            .push((device_id.to_string(), delta.clone()));

        let hook = self.cancel_hook.lock().unwrap().take();
        if let Some((store, plan_id)) = hook {
            for job in store.list_jobs(&plan_id).await.unwrap() {
                store.request_job_cancel(&job.job_id).await.unwrap();
            }
        }
        Ok(current)
    }

    async fn execute(&self, _device_id: &str, command: &str) -> Result<String, DeviceError> {
        Ok(format!("executed: {command}"))
    }

    async fn health(&self, _device_id: &str) -> Result<(), DeviceError> {
        Ok(())
    }
}

/// Backoff waits are irrelevant to these tests; skip them.
pub struct NoopSleeper;

#[async_trait]
impl Sleeper for NoopSleeper {
    async fn sleep(&self, _duration: Duration) {}
}

/// Test clock that only moves when told to.
pub struct FakeClock(pub AtomicI64);

impl FakeClock {
    pub fn at(epoch: i64) -> Self {
        Self(AtomicI64::new(epoch))
    }

    pub fn advance(&self, secs: i64) {
        self.0.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now_epoch(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Harness {
    pub engine: Engine,
    pub net: Arc<MockDeviceNet>,
    pub store: Arc<EngineStore>,
    _data_dir: tempfile::TempDir,
}

pub fn ping_registry() -> CommandRegistry {
    let mut registry = CommandRegistry::new();
    registry.register(CommandTemplate {
        id: "ping".to_string(),
        text: "ping -c 4 {target}".to_string(),
        params: vec!["target".to_string()],
    });
    registry
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub async fn harness_with(config: EngineConfig) -> Harness {
    init_tracing();
    let data_dir = tempfile::tempdir().unwrap();
    let store = Arc::new(EngineStore::open(data_dir.path()).await.unwrap());
    let net = Arc::new(MockDeviceNet::new());
    let devices = Arc::new(
        DeviceClient::new(
            net.clone(),
            config.retry_policy(),
            config.call_deadline(),
            config.per_device_concurrency,
            ping_registry(),
        )
        .with_sleeper(Arc::new(NoopSleeper)),
    );
    let engine = Engine::new(store.clone(), devices, Arc::new(OpenDirectory), config);
    Harness {
        engine,
        net,
        store,
        _data_dir: data_dir,
    }
}

pub async fn harness() -> Harness {
    harness_with(EngineConfig::default()).await
}

/// Three-router fleet, all serving the same network resource.
pub fn seed_routers(net: &MockDeviceNet) {
    for device in ["rt-1", "rt-2", "rt-3"] {
        net.seed(
            device,
            "network",
            json!({"dns": ["8.8.8.8", "8.8.4.4"], "vlan": 10}),
        );
    }
}

pub fn dns_change() -> ChangeSpec {
    ChangeSpec {
        resource: "network".to_string(),
        desired: json!({"dns": ["1.1.1.1", "1.0.0.1"]}),
        overrides: HashMap::new(),
    }
}

pub fn dns_plan_request(devices: Vec<String>) -> CreatePlanRequest {
    CreatePlanRequest {
        operation: "update_dns".to_string(),
        device_ids: devices,
        change: dns_change(),
        created_by: "ops@example.net".to_string(),
        summary: "Point fleet DNS at resolver pair".to_string(),
        continue_on_failure: None,
        correlation_id: None,
    }
}
