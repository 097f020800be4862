mod common;

use std::collections::HashMap;

use convoy::EngineError;

use common::{harness, seed_routers};

#[tokio::test]
async fn whitelisted_commands_run_and_land_in_the_audit_stream() {
    let h = harness().await;
    seed_routers(&h.net);

    let params = HashMap::from([("target".to_string(), "1.1.1.1".to_string())]);
    let outcome = h
        .engine
        .run_device_command("rt-1", "ping", &params, Some("corr-77"))
        .await
        .unwrap();
    assert_eq!(outcome.command, "ping -c 4 1.1.1.1");
    assert!(outcome.output.contains("ping -c 4 1.1.1.1"));

    let events = h.store.list_events_by_correlation("corr-77", 0, 10).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "device_command");
    assert!(events[0].payload_json.contains("\"ok\":true"));
}

#[tokio::test]
async fn free_form_commands_have_no_path_in() {
    let h = harness().await;
    seed_routers(&h.net);

    let err = h
        .engine
        .run_device_command("rt-1", "reboot --force", &HashMap::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Command(_)));
}
