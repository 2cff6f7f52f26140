//! Pull synchronization from external resources.

use crate::common::builders::EnvBuilder;
use crate::common::fixtures::{account, source_mapping, user, username_mapping};
use async_trait::async_trait;
use idm_reconciler::connector::ConnectorObject;
use idm_reconciler::error::{SyncActionError, SyncActionResult};
use idm_reconciler::report::ReportOperation;
use idm_reconciler::sync::{EntryResult, MatchingRule, SyncActions, SyncEntry, SyncProfile};
use idm_reconciler::{DomainContext, IdentityKind, IdentityPatch, ReconcilerError, ReportStatus, SyncTask};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Fails `before_update` for one account and counts `after_all` calls.
struct FlakyHook {
    fail_on: &'static str,
    after_all: AtomicUsize,
    results: AtomicUsize,
}

impl FlakyHook {
    fn new(fail_on: &'static str) -> Self {
        Self {
            fail_on,
            after_all: AtomicUsize::new(0),
            results: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SyncActions for FlakyHook {
    async fn before_update(
        &self,
        _ctx: &DomainContext,
        _profile: &SyncProfile,
        entry: &SyncEntry,
        _patch: &mut IdentityPatch,
    ) -> SyncActionResult {
        if entry.account_id == self.fail_on {
            return Err(SyncActionError::failed("directory rejected the change"));
        }
        Ok(())
    }

    async fn after_all(&self, _ctx: &DomainContext, _profile: &SyncProfile, results: &[EntryResult]) {
        self.after_all.fetch_add(1, Ordering::SeqCst);
        self.results.store(results.len(), Ordering::SeqCst);
    }
}

fn changed(uid: &str) -> ConnectorObject {
    account(uid).with_attr("mail", format!("{}@corp.example", uid))
}

#[tokio::test]
async fn test_ten_deltas_with_one_hook_failure() {
    let hook = Arc::new(FlakyHook::new("user-05"));
    let env = EnvBuilder::new()
        .with_resource("hr", source_mapping())
        .with_sync_action("flaky", hook.clone())
        .build()
        .await;
    let hr = env.connector("hr");
    let uids: Vec<String> = (0..10).map(|i| format!("user-{:02}", i)).collect();

    for uid in &uids {
        hr.put_external(IdentityKind::User, account(uid)).await;
    }
    let initial = env
        .reconciler
        .run_synchronization(&env.ctx, &SyncTask::new("hr-pull", "hr", IdentityKind::User))
        .await
        .unwrap();
    assert_eq!(initial.summary().succeeded, 10);
    assert!(initial.entries.iter().all(|e| e.operation == ReportOperation::Create));
    assert_eq!(env.user_count().await, 10);

    for uid in &uids {
        hr.put_external(IdentityKind::User, changed(uid)).await;
    }
    let task = SyncTask::new("hr-pull", "hr", IdentityKind::User).with_action("flaky");
    let report = env.reconciler.run_synchronization(&env.ctx, &task).await.unwrap();

    let summary = report.summary();
    assert_eq!(report.entries.len(), 10);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded + summary.ignored, 9);
    let failure = report.find("user-05", "hr").unwrap();
    assert_eq!(failure.status, ReportStatus::Failure);
    assert!(failure.message.as_deref().unwrap().contains("directory rejected the change"));

    assert_eq!(hook.after_all.load(Ordering::SeqCst), 1);
    assert_eq!(hook.results.load(Ordering::SeqCst), 10);

    // the failed entry left the identity untouched
    let untouched = env.identity("user-05").await.unwrap();
    assert_eq!(untouched.first_value("email"), Some("user-05@example.org"));
    let updated = env.identity("user-06").await.unwrap();
    assert_eq!(updated.first_value("email"), Some("user-06@corp.example"));
}

#[tokio::test]
async fn test_rerun_without_new_deltas_changes_nothing() {
    let env = EnvBuilder::new().with_resource("hr", source_mapping()).build().await;
    let hr = env.connector("hr");
    hr.put_external(IdentityKind::User, account("hank")).await;
    hr.put_external(IdentityKind::User, account("iris")).await;

    let task = SyncTask::new("hr-pull", "hr", IdentityKind::User);
    let first = env.reconciler.run_synchronization(&env.ctx, &task).await.unwrap();
    assert_eq!(first.summary().succeeded, 2);

    let second = env.reconciler.run_synchronization(&env.ctx, &task).await.unwrap();
    assert!(
        second
            .entries
            .iter()
            .all(|e| e.operation == ReportOperation::None)
    );
    assert_eq!(env.user_count().await, 2);
    assert_eq!(
        env.reconciler
            .store()
            .sync_token(&env.ctx, "hr", IdentityKind::User)
            .await
            .unwrap(),
        Some(hr.current_token().await)
    );
}

#[tokio::test]
async fn test_resynchronized_identity_resolves_to_update() {
    let env = EnvBuilder::new().with_resource("hr", source_mapping()).build().await;
    let hr = env.connector("hr");
    hr.put_external(IdentityKind::User, account("jane")).await;

    let task = SyncTask::new("hr-pull", "hr", IdentityKind::User);
    let created = env.reconciler.run_synchronization(&env.ctx, &task).await.unwrap();
    assert_eq!(created.find("jane", "hr").unwrap().operation, ReportOperation::Create);
    let jane = env.identity("jane").await.unwrap();
    assert!(jane.is_linked_to("hr"));

    hr.put_external(IdentityKind::User, changed("jane")).await;
    let full = SyncTask::new("hr-full", "hr", IdentityKind::User).full_reconciliation();
    let report = env.reconciler.run_synchronization(&env.ctx, &full).await.unwrap();

    let entry = report.find("jane", "hr").unwrap();
    assert_eq!(entry.operation, ReportOperation::Update);
    assert_eq!(entry.status, ReportStatus::Success);
    assert_eq!(env.user_count().await, 1);
}

#[tokio::test]
async fn test_pulled_changes_reach_the_other_resources() {
    let env = EnvBuilder::new()
        .with_resource("hr", source_mapping())
        .with_resource("ldap", username_mapping())
        .build()
        .await;
    env.reconciler
        .create_identity(&env.ctx, user("kim").with_resource("hr").with_resource("ldap"), None)
        .await
        .unwrap();
    let hr = env.connector("hr");
    let writes_before = hr.calls().await.len();

    hr.put_external(IdentityKind::User, changed("kim")).await;
    let report = env
        .reconciler
        .run_synchronization(&env.ctx, &SyncTask::new("hr-pull", "hr", IdentityKind::User))
        .await
        .unwrap();

    assert_eq!(report.find("kim", "hr").unwrap().operation, ReportOperation::Update);
    let ldap = report.find("kim", "ldap").unwrap();
    assert_eq!(ldap.operation, ReportOperation::Update);
    assert_eq!(ldap.status, ReportStatus::Success);
    assert_eq!(
        env.connector("ldap").object(IdentityKind::User, "kim").await.unwrap()["mail"],
        vec!["kim@corp.example".to_string()]
    );
    // the source is never written back
    assert_eq!(hr.calls().await.len(), writes_before);
}

#[tokio::test]
async fn test_matched_accounts_can_be_left_alone() {
    let env = EnvBuilder::new().with_resource("hr", source_mapping()).build().await;
    let hr = env.connector("hr");
    hr.put_external(IdentityKind::User, account("lena")).await;
    let task = SyncTask::new("hr-pull", "hr", IdentityKind::User);
    env.reconciler.run_synchronization(&env.ctx, &task).await.unwrap();

    hr.put_external(IdentityKind::User, changed("lena")).await;
    let ignore = SyncTask::new("hr-pull", "hr", IdentityKind::User).with_matching_rule(MatchingRule::Ignore);
    let report = env.reconciler.run_synchronization(&env.ctx, &ignore).await.unwrap();

    assert_eq!(report.find("lena", "hr").unwrap().status, ReportStatus::Ignored);
    assert_eq!(
        env.identity("lena").await.unwrap().first_value("email"),
        Some("lena@example.org")
    );
}

#[tokio::test]
async fn test_unregistered_sync_action_fails_before_any_entry() {
    let env = EnvBuilder::new().with_resource("hr", source_mapping()).build().await;
    env.connector("hr")
        .put_external(IdentityKind::User, account("mona"))
        .await;

    let task = SyncTask::new("hr-pull", "hr", IdentityKind::User).with_action("not-registered");
    let result = env.reconciler.run_synchronization(&env.ctx, &task).await;

    assert_error_variant!(result, ReconcilerError::Configuration { .. });
    assert_eq!(env.user_count().await, 0);
    assert!(env.sink.snapshots().is_empty());

    let unknown = SyncTask::new("crm-pull", "crm", IdentityKind::User);
    assert_error_variant!(
        env.reconciler.run_synchronization(&env.ctx, &unknown).await,
        ReconcilerError::ResourceNotFound { .. }
    );
}
