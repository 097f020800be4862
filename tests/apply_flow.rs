mod common;

use serde_json::json;

use convoy::core::device::transport::DeviceError;
use convoy::core::orchestrator::{DeviceOutcome, JobState};
use convoy::core::plan::PlanState;
use convoy::EngineConfig;

use common::{dns_plan_request, harness, harness_with, seed_routers};

fn routers() -> Vec<String> {
    vec!["rt-1".to_string(), "rt-2".to_string(), "rt-3".to_string()]
}

#[tokio::test]
async fn full_rollout_applies_every_device_in_order() {
    let h = harness().await;
    seed_routers(&h.net);

    let plan = h.engine.create_plan(dns_plan_request(routers())).await.unwrap();
    assert_eq!(plan.status, PlanState::PendingApproval);
    // Preview computed from reads only; no device was written.
    assert_eq!(plan.preview.len(), 3);
    assert!(plan.preview.iter().all(|p| p.warning.is_none()));
    assert!(h.net.patches().is_empty());

    let token = h.engine.issue_approval(&plan.plan_id, "lead@example.net").await.unwrap();
    let approved = h.engine.get_plan(&plan.plan_id).await.unwrap();
    assert_eq!(approved.status, PlanState::Approved);
    assert_eq!(approved.approved_by.as_deref(), Some("lead@example.net"));

    let job = h
        .engine
        .apply_plan(&plan.plan_id, Some(&token.secret))
        .await
        .unwrap();
    assert_eq!(job.status, JobState::Success);
    assert_eq!(job.results.len(), 3);
    let order: Vec<&str> = job.results.iter().map(|r| r.device_id.as_str()).collect();
    assert_eq!(order, ["rt-1", "rt-2", "rt-3"]);
    for result in &job.results {
        assert_eq!(result.outcome, DeviceOutcome::Success);
        assert_eq!(result.before, Some(json!({"dns": ["8.8.8.8", "8.8.4.4"]})));
        assert_eq!(result.after, Some(json!({"dns": ["1.1.1.1", "1.0.0.1"]})));
    }

    let finished = h.engine.get_plan(&plan.plan_id).await.unwrap();
    assert_eq!(finished.status, PlanState::Applied);
    assert_eq!(finished.last_job_id.as_deref(), Some(job.job_id.as_str()));

    let kinds: Vec<String> = h
        .engine
        .list_events(&plan.plan_id, 0, 100)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    for expected in [
        "plan_created",
        "approval_issued",
        "approval_consumed",
        "job_created",
        "job_done",
    ] {
        assert!(kinds.iter().any(|k| k == expected), "missing event {expected}");
    }
}

#[tokio::test]
async fn applied_plans_never_re_enter_execution() {
    let h = harness().await;
    seed_routers(&h.net);

    let plan = h.engine.create_plan(dns_plan_request(routers())).await.unwrap();
    let token = h.engine.issue_approval(&plan.plan_id, "lead").await.unwrap();
    h.engine.apply_plan(&plan.plan_id, Some(&token.secret)).await.unwrap();

    let second = h.engine.issue_approval(&plan.plan_id, "lead").await;
    assert!(second.is_err(), "applied plan must not be re-approved");
}

#[tokio::test]
async fn transient_timeouts_are_retried_and_recorded() {
    let h = harness().await;
    seed_routers(&h.net);
    h.net.script_failures(
        "rt-2",
        "patch",
        vec![DeviceError::Timeout, DeviceError::Timeout],
    );

    let plan = h.engine.create_plan(dns_plan_request(routers())).await.unwrap();
    let token = h.engine.issue_approval(&plan.plan_id, "lead").await.unwrap();
    let job = h
        .engine
        .apply_plan(&plan.plan_id, Some(&token.secret))
        .await
        .unwrap();

    assert_eq!(job.status, JobState::Success);
    assert_eq!(job.results[1].outcome, DeviceOutcome::Success);
    assert_eq!(job.results[1].retries, 2);
}

#[tokio::test]
async fn failed_verification_rolls_back_and_halts_the_sequence() {
    let h = harness().await;
    seed_routers(&h.net);
    // rt-2 accepts the write but never applies it, so re-reading exposes
    // the mismatch.
    h.net.ignore_writes_for("rt-2");

    let plan = h.engine.create_plan(dns_plan_request(routers())).await.unwrap();
    let token = h.engine.issue_approval(&plan.plan_id, "lead").await.unwrap();
    let job = h
        .engine
        .apply_plan(&plan.plan_id, Some(&token.secret))
        .await
        .unwrap();

    assert_eq!(job.status, JobState::PartialFailure);
    assert_eq!(job.results[0].outcome, DeviceOutcome::Success);
    assert_eq!(job.results[1].outcome, DeviceOutcome::RolledBack);
    assert!(job.results[1].error.as_deref().unwrap().contains("verification failed"));
    assert_eq!(job.results[2].outcome, DeviceOutcome::Skipped);

    // The device that succeeded first keeps its change; the halted tail
    // was never touched.
    assert_eq!(
        h.net.device_state("rt-1", "network").unwrap()["dns"],
        json!(["1.1.1.1", "1.0.0.1"])
    );
    assert_eq!(
        h.net.device_state("rt-3", "network").unwrap()["dns"],
        json!(["8.8.8.8", "8.8.4.4"])
    );

    let plan = h.engine.get_plan(&plan.plan_id).await.unwrap();
    assert_eq!(plan.status, PlanState::Failed);
}

#[tokio::test]
async fn rejection_on_the_first_device_fails_the_job() {
    let h = harness().await;
    seed_routers(&h.net);
    h.net.script_failures(
        "rt-1",
        "patch",
        vec![DeviceError::Rejected("invalid credentials".to_string())],
    );

    let plan = h.engine.create_plan(dns_plan_request(routers())).await.unwrap();
    let token = h.engine.issue_approval(&plan.plan_id, "lead").await.unwrap();
    let job = h
        .engine
        .apply_plan(&plan.plan_id, Some(&token.secret))
        .await
        .unwrap();

    assert_eq!(job.status, JobState::Failed);
    assert_eq!(job.results[0].outcome, DeviceOutcome::Failed);
    // Rejections burn no retries.
    assert_eq!(job.results[0].retries, 0);
    assert_eq!(job.results[1].outcome, DeviceOutcome::Skipped);
    assert_eq!(job.results[2].outcome, DeviceOutcome::Skipped);
    assert_eq!(
        h.engine.get_plan(&plan.plan_id).await.unwrap().status,
        PlanState::Failed
    );
}

#[tokio::test]
async fn continue_on_failure_processes_the_remaining_devices() {
    let h = harness().await;
    seed_routers(&h.net);
    h.net.script_failures(
        "rt-2",
        "patch",
        vec![DeviceError::Rejected("config conflict".to_string())],
    );

    let mut request = dns_plan_request(routers());
    request.continue_on_failure = Some(true);
    let plan = h.engine.create_plan(request).await.unwrap();
    let token = h.engine.issue_approval(&plan.plan_id, "lead").await.unwrap();
    let job = h
        .engine
        .apply_plan(&plan.plan_id, Some(&token.secret))
        .await
        .unwrap();

    assert_eq!(job.status, JobState::PartialFailure);
    assert_eq!(job.results[0].outcome, DeviceOutcome::Success);
    assert_eq!(job.results[1].outcome, DeviceOutcome::Failed);
    assert_eq!(job.results[2].outcome, DeviceOutcome::Success);
}

#[tokio::test]
async fn a_second_apply_retries_a_failed_plan() {
    let h = harness_with(EngineConfig {
        require_approval: false,
        ..EngineConfig::default()
    })
    .await;
    seed_routers(&h.net);
    h.net.script_failures(
        "rt-1",
        "patch",
        vec![DeviceError::Rejected("locked".to_string())],
    );

    let plan = h.engine.create_plan(dns_plan_request(routers())).await.unwrap();
    let first = h.engine.apply_plan(&plan.plan_id, None).await.unwrap();
    assert_eq!(first.status, JobState::Failed);

    let second = h.engine.apply_plan(&plan.plan_id, None).await.unwrap();
    assert_eq!(second.status, JobState::Success);

    let jobs = h.engine.list_jobs(&plan.plan_id).await.unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].attempt, 1);
    assert_eq!(jobs[1].attempt, 2);
    assert_eq!(
        h.engine.get_plan(&plan.plan_id).await.unwrap().status,
        PlanState::Applied
    );
}

#[tokio::test]
async fn a_held_lease_blocks_a_second_job() {
    let h = harness_with(EngineConfig {
        require_approval: false,
        ..EngineConfig::default()
    })
    .await;
    seed_routers(&h.net);

    let plan = h.engine.create_plan(dns_plan_request(routers())).await.unwrap();
    let claimed = h
        .store
        .acquire_job_lease(&plan.plan_id, "ghost-job", &["draft"])
        .await
        .unwrap();
    assert!(claimed);

    let err = h.engine.apply_plan(&plan.plan_id, None).await.unwrap_err();
    assert!(
        matches!(err, convoy::EngineError::AlreadyRunning(_)),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn cancellation_is_honored_at_the_device_boundary() {
    let h = harness_with(EngineConfig {
        require_approval: false,
        ..EngineConfig::default()
    })
    .await;
    seed_routers(&h.net);

    let plan = h.engine.create_plan(dns_plan_request(routers())).await.unwrap();
    h.net
        .cancel_plan_jobs_after_next_patch(h.store.clone(), &plan.plan_id);

    let job = h.engine.apply_plan(&plan.plan_id, None).await.unwrap();
    assert_eq!(job.status, JobState::Cancelled);
    // The in-flight device finished; everything after stopped cleanly.
    assert_eq!(job.results[0].outcome, DeviceOutcome::Success);
    assert_eq!(job.results[1].outcome, DeviceOutcome::Skipped);
    assert_eq!(job.results[2].outcome, DeviceOutcome::Skipped);
    assert_eq!(
        h.engine.get_plan(&plan.plan_id).await.unwrap().status,
        PlanState::Cancelled
    );
}

#[tokio::test]
async fn cancel_requests_on_finished_jobs_are_rejected() {
    let h = harness_with(EngineConfig {
        require_approval: false,
        ..EngineConfig::default()
    })
    .await;
    seed_routers(&h.net);

    let plan = h.engine.create_plan(dns_plan_request(routers())).await.unwrap();
    let job = h.engine.apply_plan(&plan.plan_id, None).await.unwrap();

    let err = h.engine.request_job_cancel(&job.job_id).await.unwrap_err();
    assert!(matches!(err, convoy::EngineError::InvalidState { .. }));
    let err = h.engine.request_job_cancel("no-such-job").await.unwrap_err();
    assert!(matches!(err, convoy::EngineError::JobNotFound(_)));
}
