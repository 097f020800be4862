//! The per-job device loop. Strictly sequential, in plan order: one
//! device at a time, verification after every change, halt on the first
//! unrecoverable failure with the remainder marked skipped. Sequencing is
//! a safety property here, not a performance compromise.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tracing::{info, warn};

use super::types::{DeviceOutcome, JobState};
use super::verify::Verifier;
use crate::core::device::DeviceClient;
use crate::core::plan::Plan;
use crate::core::store::EngineStore;

struct DeviceRow {
    outcome: DeviceOutcome,
    before: Option<serde_json::Value>,
    after: Option<serde_json::Value>,
    error: Option<String>,
    retries: u32,
}

/// Drive one running job to a terminal state. Returns the terminal job
/// status and a human-readable summary; the caller owns the surrounding
/// status updates and lease release.
pub(crate) async fn run_apply_job(
    store: Arc<EngineStore>,
    devices: Arc<DeviceClient>,
    plan: &Plan,
    job_id: &str,
) -> (JobState, String) {
    let verifier = Verifier::new(devices.clone());
    let total = plan.device_ids.len();
    let resource = &plan.change.resource;

    let mut successes = 0usize;
    let mut failures = 0usize;
    let mut cancelled = false;
    // First position that was never executed; everything from here on is
    // marked skipped.
    let mut halt_at: Option<usize> = None;

    for (position, device_id) in plan.device_ids.iter().enumerate() {
        // Cancellation is honored only here, at the boundary between
        // devices; an in-flight device call always runs to completion.
        if store.job_cancel_requested(job_id).await.unwrap_or(false) {
            info!(job = %job_id, position, "cancel requested, halting at device boundary");
            cancelled = true;
            halt_at = Some(position);
            break;
        }

        let desired = plan.change.for_device(device_id);
        let started = Instant::now();
        let row = match devices.apply_change(device_id, resource, &desired).await {
            Err(failure) => DeviceRow {
                outcome: DeviceOutcome::Failed,
                before: None,
                after: None,
                error: Some(failure.to_string()),
                retries: failure.retries,
            },
            Ok(change) => match verifier.verify(device_id, resource, &desired).await {
                Ok(()) => DeviceRow {
                    outcome: DeviceOutcome::Success,
                    before: Some(change.before),
                    after: Some(change.after),
                    error: None,
                    retries: change.retries,
                },
                Err(verify_err) if change.changed => {
                    match verifier.rollback(device_id, resource, &change.before).await {
                        Ok(()) => DeviceRow {
                            outcome: DeviceOutcome::RolledBack,
                            after: Some(change.before.clone()),
                            before: Some(change.before),
                            error: Some(verify_err.to_string()),
                            retries: change.retries,
                        },
                        Err(rollback_err) => DeviceRow {
                            outcome: DeviceOutcome::Failed,
                            before: Some(change.before),
                            after: Some(change.after),
                            error: Some(format!("{verify_err}; {rollback_err}")),
                            retries: change.retries,
                        },
                    }
                }
                // Nothing was written, so there is nothing to compensate.
                Err(verify_err) => DeviceRow {
                    outcome: DeviceOutcome::Failed,
                    before: Some(change.before),
                    after: Some(change.after),
                    error: Some(verify_err.to_string()),
                    retries: change.retries,
                },
            },
        };
        let duration_ms = started.elapsed().as_millis() as i64;

        let _ = store
            .set_device_result(
                job_id,
                position as i64,
                row.outcome.as_str(),
                row.before
                    .as_ref()
                    .and_then(|v| serde_json::to_string(v).ok())
                    .as_deref(),
                row.after
                    .as_ref()
                    .and_then(|v| serde_json::to_string(v).ok())
                    .as_deref(),
                row.error.as_deref(),
                duration_ms,
                row.retries as i64,
            )
            .await;
        let _ = store
            .add_event(
                &plan.correlation_id,
                Some(&plan.plan_id),
                Some(job_id),
                "device_result",
                &json!({
                    "device_id": device_id,
                    "position": position,
                    "outcome": row.outcome.as_str(),
                    "error": row.error,
                    "retries": row.retries,
                })
                .to_string(),
            )
            .await;

        if row.outcome == DeviceOutcome::Success {
            successes += 1;
        } else {
            failures += 1;
            warn!(
                job = %job_id,
                device = %device_id,
                outcome = row.outcome.as_str(),
                "device change did not succeed"
            );
            if !plan.continue_on_failure {
                halt_at = Some(position + 1);
                break;
            }
        }
    }

    let mut skipped = 0usize;
    if let Some(halt) = halt_at {
        for position in halt..total {
            skipped += 1;
            let _ = store
                .set_device_result(
                    job_id,
                    position as i64,
                    DeviceOutcome::Skipped.as_str(),
                    None,
                    None,
                    None,
                    0,
                    0,
                )
                .await;
            let _ = store
                .add_event(
                    &plan.correlation_id,
                    Some(&plan.plan_id),
                    Some(job_id),
                    "device_result",
                    &json!({
                        "device_id": plan.device_ids[position],
                        "position": position,
                        "outcome": DeviceOutcome::Skipped.as_str(),
                    })
                    .to_string(),
                )
                .await;
        }
    }

    let status = if cancelled {
        JobState::Cancelled
    } else if failures == 0 && skipped == 0 {
        JobState::Success
    } else if successes > 0 {
        JobState::PartialFailure
    } else {
        JobState::Failed
    };
    let summary = format!(
        "{successes} succeeded, {failures} failed, {skipped} skipped of {total} devices"
    );
    (status, summary)
}
