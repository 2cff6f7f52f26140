//! Push of internal identities onto one resource.

use crate::common::builders::EnvBuilder;
use crate::common::fixtures::{user, username_mapping};
use crate::common::TestEnv;
use idm_reconciler::report::ReportOperation;
use idm_reconciler::sync::{MatchingRule, UnmatchingRule};
use idm_reconciler::{IdentityKind, PushTask, ReportStatus};

async fn env_with_users(keys: &[&str]) -> TestEnv {
    let env = EnvBuilder::new().with_resource("ldap", username_mapping()).build().await;
    for key in keys {
        env.reconciler
            .create_identity(&env.ctx, user(key), None)
            .await
            .unwrap();
    }
    env
}

#[tokio::test]
async fn test_push_assigns_then_updates() {
    let env = env_with_users(&["nina", "otto"]).await;
    let ldap = env.connector("ldap");
    let task = PushTask::new("ldap-push", "ldap", IdentityKind::User).include_unlinked();

    let first = env.reconciler.run_push(&env.ctx, &task).await.unwrap();
    assert_eq!(first.summary().succeeded, 2);
    for key in ["nina", "otto"] {
        assert_eq!(first.find(key, "ldap").unwrap().operation, ReportOperation::Create);
        assert!(env.identity(key).await.unwrap().is_linked_to("ldap"));
    }
    assert_eq!(ldap.object_count(IdentityKind::User).await, 2);

    // accounts now exist and correlate: the second push updates
    let second = env.reconciler.run_push(&env.ctx, &task).await.unwrap();
    for key in ["nina", "otto"] {
        let entry = second.find(key, "ldap").unwrap();
        assert_eq!(entry.operation, ReportOperation::Update);
        assert_eq!(entry.status, ReportStatus::Success);
    }
    assert_eq!(ldap.object_count(IdentityKind::User).await, 2);
}

#[tokio::test]
async fn test_push_failure_is_isolated_per_identity() {
    let env = env_with_users(&["paul", "quinn"]).await;
    env.connector("ldap").fail_on("paul").await;

    let task = PushTask::new("ldap-push", "ldap", IdentityKind::User).include_unlinked();
    let report = env.reconciler.run_push(&env.ctx, &task).await.unwrap();

    assert_eq!(report.find("paul", "ldap").unwrap().status, ReportStatus::Failure);
    assert_eq!(report.find("quinn", "ldap").unwrap().status, ReportStatus::Success);
    assert!(!env.identity("paul").await.unwrap().is_linked_to("ldap"));
    assert!(env.identity("quinn").await.unwrap().is_linked_to("ldap"));
}

#[tokio::test]
async fn test_stale_links_are_dropped() {
    let env = EnvBuilder::new().with_resource("ldap", username_mapping()).build().await;
    env.reconciler
        .create_identity(&env.ctx, user("rosa").with_resource("ldap"), None)
        .await
        .unwrap();
    env.connector("ldap").remove_external(IdentityKind::User, "rosa").await;

    let task = PushTask::new("ldap-cleanup", "ldap", IdentityKind::User)
        .with_matching_rule(MatchingRule::Ignore)
        .with_unmatching_rule(UnmatchingRule::Unlink);
    let report = env.reconciler.run_push(&env.ctx, &task).await.unwrap();

    assert_eq!(report.find("rosa", "ldap").unwrap().status, ReportStatus::Success);
    assert!(!env.identity("rosa").await.unwrap().is_linked_to("ldap"));
    assert_eq!(env.connector("ldap").object_count(IdentityKind::User).await, 0);
}

#[tokio::test]
async fn test_dry_run_push_writes_nothing() {
    let env = env_with_users(&["sam"]).await;
    let mut task = PushTask::new("ldap-push", "ldap", IdentityKind::User).include_unlinked();
    task.settings.dry_run = true;

    let report = env.reconciler.run_push(&env.ctx, &task).await.unwrap();
    let entry = report.find("sam", "ldap").unwrap();
    assert_eq!(entry.operation, ReportOperation::Create);
    assert_eq!(entry.message.as_deref(), Some("dry run"));
    assert!(env.connector("ldap").calls().await.is_empty());
    assert!(!env.identity("sam").await.unwrap().is_linked_to("ldap"));
}
