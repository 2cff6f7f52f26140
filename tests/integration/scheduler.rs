//! Scheduled reconciler jobs.

use crate::common::builders::EnvBuilder;
use crate::common::fixtures::{account, source_mapping};
use idm_reconciler::scheduler::{FireOutcome, TriggerStatus};
use idm_reconciler::{Credentials, DomainContext, IdentityKind, JobKind, Scheduler, SyncTask};
use std::time::Duration;

fn pull_job() -> JobKind {
    JobKind::Synchronization(SyncTask::new("hr-pull", "hr", IdentityKind::User))
}

#[tokio::test]
async fn test_overlapping_firings_are_skipped() {
    let env = EnvBuilder::new().with_resource("hr", source_mapping()).build().await;
    let hr = env.connector("hr");
    hr.put_external(IdentityKind::User, account("tess")).await;
    hr.set_latency(Some(Duration::from_millis(200))).await;

    let scheduler = Scheduler::new();
    let id = env.reconciler.schedule(
        &scheduler,
        "hr-pull",
        pull_job(),
        vec![env.ctx.clone()],
        Duration::from_secs(3600),
    );

    assert_eq!(scheduler.fire_now(&id).unwrap(), FireOutcome::Fired);
    assert_eq!(scheduler.fire_now(&id).unwrap(), FireOutcome::Skipped);
    assert_eq!(scheduler.status(&id).unwrap().trigger_status, TriggerStatus::Blocked);

    tokio::time::sleep(Duration::from_millis(800)).await;
    let status = scheduler.status(&id).unwrap();
    assert_eq!(status.trigger_name, "pull:hr");
    assert_eq!(status.run_count, 1);
    assert_eq!(status.skipped_count, 1);
    assert!(status.last_error.is_none());
    assert!(env.identity("tess").await.is_some());
    assert_eq!(env.sink.snapshots().len(), 1);
}

#[tokio::test]
async fn test_job_failure_in_one_domain_is_reported() {
    let env = EnvBuilder::new().with_resource("hr", source_mapping()).build().await;
    env.connector("hr")
        .put_external(IdentityKind::User, account("uma"))
        .await;

    let scheduler = Scheduler::new();
    let other = DomainContext::new("Other", Credentials::system());
    let id = env.reconciler.schedule(
        &scheduler,
        "hr-pull",
        pull_job(),
        vec![other, env.ctx.clone()],
        Duration::from_secs(3600),
    );
    scheduler.fire_now(&id).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let status = scheduler.status(&id).unwrap();
    let error = status.last_error.unwrap();
    assert!(error.contains("Job 'pull:hr' failed"));
    assert!(error.contains("Other"));
    // the domain that has the resource still ran
    assert!(env.identity("uma").await.is_some());

    scheduler.stop(&id).unwrap();
    assert_eq!(scheduler.fire_now(&id).unwrap(), FireOutcome::Skipped);
    assert_eq!(scheduler.jobs()[0].trigger_status, TriggerStatus::Complete);
}
