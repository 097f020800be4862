mod common;

use std::sync::Arc;

use convoy::core::directory::OpenDirectory;
use convoy::{Engine, EngineConfig};

use common::MockDeviceNet;

#[tokio::test]
async fn persisted_config_is_picked_up_on_reopen() {
    let data_dir = tempfile::tempdir().unwrap();
    let net = Arc::new(MockDeviceNet::new());
    let custom = EngineConfig {
        require_approval: false,
        max_devices_per_plan: 10,
        ..EngineConfig::default()
    };

    {
        let engine = Engine::with_config(
            data_dir.path(),
            net.clone(),
            Arc::new(OpenDirectory),
            common::ping_registry(),
            custom,
        )
        .await
        .unwrap();
        assert!(!engine.config().require_approval);
    }

    let engine = Engine::open(
        data_dir.path(),
        net,
        Arc::new(OpenDirectory),
        common::ping_registry(),
    )
    .await
    .unwrap();
    assert!(!engine.config().require_approval);
    assert_eq!(engine.config().max_devices_per_plan, 10);
}
