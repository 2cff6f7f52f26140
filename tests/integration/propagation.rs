//! Outbound propagation through the reconciler.

use crate::common::builders::EnvBuilder;
use crate::common::fixtures::{email_mapping, user, username_mapping};
use async_trait::async_trait;
use idm_reconciler::connector::ConnInstance;
use idm_reconciler::error::ReconcilerResult;
use idm_reconciler::propagation::{PropagationActions, PropagationManager, PropagationTask, TaskStatus};
use idm_reconciler::report::ReportOperation;
use idm_reconciler::{
    DomainContext, ExternalResource, IdentityKind, IdentityPatch, PropagationMode,
    PropagationOperation, ReconcilerError, ReportStatus,
};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct OrderRecorder {
    resources: Mutex<Vec<String>>,
}

#[async_trait]
impl PropagationActions for OrderRecorder {
    async fn before(&self, _ctx: &DomainContext, task: &mut PropagationTask) -> ReconcilerResult<()> {
        self.resources.lock().unwrap().push(task.resource.clone());
        Ok(())
    }
}

#[tokio::test]
async fn test_email_account_id_scenario() {
    let env = EnvBuilder::new()
        .with_resource("ws-target-1", email_mapping())
        .build()
        .await;
    let store = env.reconciler.store();
    let resources = store.resources(&env.ctx).await.unwrap();
    let schemas = store.schemas(&env.ctx).await.unwrap();

    let identity = user("alice")
        .with_attr("email", "a@b.com")
        .with_attr("badge", "42")
        .with_resource("ws-target-1");
    let tasks = PropagationManager::new(&resources, &schemas).build_tasks(
        &env.ctx,
        &identity,
        PropagationOperation::Create,
        &BTreeSet::new(),
        Some("ignored-password"),
    );

    assert_eq!(tasks.len(), 1);
    let task = &tasks[0];
    assert_eq!(task.resource, "ws-target-1");
    assert_eq!(task.account_id, "a@b.com");
    let attributes: Vec<&str> = task.attributes.keys().map(String::as_str).collect();
    assert_eq!(attributes, vec!["__NAME__", "displayName"]);

    let (_, report) = env
        .reconciler
        .create_identity(&env.ctx, identity, Some("ignored-password"))
        .await
        .unwrap();
    let entry = report.find("alice", "ws-target-1").unwrap();
    assert_eq!(entry.operation, ReportOperation::Create);
    assert_eq!(entry.status, ReportStatus::Success);
    assert!(
        env.connector("ws-target-1")
            .object(IdentityKind::User, "a@b.com")
            .await
            .is_some()
    );
}

#[tokio::test]
async fn test_priority_resources_run_first() {
    let recorder = Arc::new(OrderRecorder::default());
    let resource = |name: &str| {
        ExternalResource::new(name, ConnInstance::new(name))
            .with_mapping(username_mapping())
            .with_action("recorder")
    };
    let env = EnvBuilder::new()
        .with_propagation_action("recorder", recorder.clone())
        .with_resource_def(resource("alpha"))
        .with_resource_def(resource("mid"))
        .with_resource_def(resource("zeta").with_priority(0))
        .with_resource_def(resource("omega").with_priority(1))
        .build()
        .await;

    let store = env.reconciler.store();
    let resources = store.resources(&env.ctx).await.unwrap();
    let schemas = store.schemas(&env.ctx).await.unwrap();
    let identity = ["alpha", "mid", "zeta", "omega"]
        .into_iter()
        .fold(user("bob"), |identity, name| identity.with_resource(name));

    let order: Vec<String> = PropagationManager::new(&resources, &schemas)
        .build_tasks(&env.ctx, &identity, PropagationOperation::Update, &BTreeSet::new(), None)
        .into_iter()
        .map(|task| task.resource)
        .collect();
    assert_eq!(order, vec!["zeta", "omega", "alpha", "mid"]);

    env.reconciler.create_identity(&env.ctx, identity, None).await.unwrap();
    let executed = recorder.resources.lock().unwrap().clone();
    assert_eq!(&executed[..2], &["zeta".to_string(), "omega".to_string()]);
    assert_eq!(executed.len(), 4);
}

#[tokio::test]
async fn test_failing_resource_does_not_stop_the_others() {
    let env = EnvBuilder::new()
        .with_resource_def(
            ExternalResource::new("primary", ConnInstance::new("primary"))
                .with_mapping(username_mapping())
                .with_priority(0),
        )
        .with_resource("ldap", username_mapping())
        .with_resource("crm", username_mapping())
        .build()
        .await;
    env.connector("primary").fail_on("carol").await;
    env.connector("crm").set_unavailable(true).await;

    let identity = user("carol")
        .with_resource("primary")
        .with_resource("ldap")
        .with_resource("crm");
    let (_, report) = env
        .reconciler
        .create_identity(&env.ctx, identity, Some("s3cret"))
        .await
        .unwrap();

    assert_eq!(report.find("carol", "primary").unwrap().status, ReportStatus::Failure);
    assert_eq!(report.find("carol", "crm").unwrap().status, ReportStatus::Failure);
    assert_eq!(report.find("carol", "ldap").unwrap().status, ReportStatus::Success);
    assert_eq!(report.primary_failures, vec!["primary".to_string()]);
    assert_eq!(report.summary().failed, 2);

    // the internal change stands
    assert!(env.identity("carol").await.unwrap().password_matches("s3cret"));
    let ldap = env.connector("ldap").object(IdentityKind::User, "carol").await.unwrap();
    assert_eq!(ldap["__PASSWORD__"], vec!["s3cret".to_string()]);
    assert_eq!(env.sink.snapshots().len(), 1);
}

#[tokio::test]
async fn test_excluded_resources_are_skipped() {
    let env = EnvBuilder::new()
        .with_resource("ldap", username_mapping())
        .with_resource("crm", username_mapping())
        .build()
        .await;
    let identity = user("dave").with_resource("ldap").with_resource("crm");
    env.reconciler.create_identity(&env.ctx, identity, None).await.unwrap();

    let excluded = BTreeSet::from(["crm".to_string()]);
    let report = env
        .reconciler
        .propagate(&env.ctx, IdentityKind::User, "dave", PropagationOperation::Update, &excluded)
        .await
        .unwrap();
    assert!(report.find("dave", "crm").is_none());
    assert_eq!(report.find("dave", "ldap").unwrap().operation, ReportOperation::Update);
}

#[tokio::test]
async fn test_update_and_delete_lifecycle() {
    let env = EnvBuilder::new()
        .with_resource("ldap", username_mapping())
        .with_resource("crm", username_mapping())
        .build()
        .await;
    env.reconciler
        .create_identity(&env.ctx, user("erin").with_resource("ldap").with_resource("crm"), None)
        .await
        .unwrap();

    let (erin, report) = env
        .reconciler
        .update_identity(
            &env.ctx,
            IdentityKind::User,
            "erin",
            IdentityPatch::new()
                .with_attr("email", "erin@corp.example")
                .without_resource("crm"),
        )
        .await
        .unwrap();
    assert!(!erin.is_linked_to("crm"));
    assert_eq!(report.find("erin", "crm").unwrap().operation, ReportOperation::Delete);
    assert_eq!(report.find("erin", "ldap").unwrap().operation, ReportOperation::Update);
    assert_eq!(env.connector("crm").object_count(IdentityKind::User).await, 0);
    assert_eq!(
        env.connector("ldap").object(IdentityKind::User, "erin").await.unwrap()["mail"],
        vec!["erin@corp.example".to_string()]
    );

    let report = env
        .reconciler
        .delete_identity(&env.ctx, IdentityKind::User, "erin")
        .await
        .unwrap();
    assert_eq!(report.find("erin", "ldap").unwrap().operation, ReportOperation::Delete);
    assert!(env.identity("erin").await.is_none());
    assert_eq!(env.connector("ldap").object_count(IdentityKind::User).await, 0);

    let missing = env
        .reconciler
        .delete_identity(&env.ctx, IdentityKind::User, "erin")
        .await;
    assert_error_variant!(missing, ReconcilerError::IdentityNotFound { .. });
}

#[tokio::test]
async fn test_connector_timeout_is_a_task_failure() {
    let env = EnvBuilder::new()
        .with_resource_def(
            ExternalResource::new("slow", ConnInstance::new("slow").with_timeout(Duration::from_secs(1)))
                .with_mapping(username_mapping()),
        )
        .with_resource("fast", username_mapping())
        .build()
        .await;
    env.connector("slow")
        .set_latency(Some(Duration::from_millis(1500)))
        .await;

    let identity = user("frank").with_resource("slow").with_resource("fast");
    let (_, report) = env.reconciler.create_identity(&env.ctx, identity, None).await.unwrap();

    let slow = report.find("frank", "slow").unwrap();
    assert_eq!(slow.status, ReportStatus::Failure);
    assert!(slow.message.as_deref().unwrap().contains("timed out"));
    assert_eq!(report.find("frank", "fast").unwrap().status, ReportStatus::Success);

    let failures: Vec<_> = env
        .reconciler
        .execution_log()
        .entries()
        .into_iter()
        .filter(|e| e.status == TaskStatus::Failure)
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].resource, "slow");
}

#[tokio::test]
async fn test_two_phase_confirmation_lifecycle() {
    let env = EnvBuilder::new()
        .with_resource_def(
            ExternalResource::new("hr", ConnInstance::new("hr"))
                .with_mapping(username_mapping())
                .with_mode(PropagationMode::TwoPhases),
        )
        .build()
        .await;

    let (_, report) = env
        .reconciler
        .create_identity(&env.ctx, user("gina").with_resource("hr"), None)
        .await
        .unwrap();
    let entry = report.find("gina", "hr").unwrap();
    assert_eq!(entry.status, ReportStatus::Success);
    assert_eq!(entry.message.as_deref(), Some("submitted, awaiting confirmation"));

    let pending = env.reconciler.executor().pending_submissions().await;
    assert_eq!(pending.len(), 1);
    let task_id = pending[0].id.clone();

    let confirmed = env.reconciler.confirm_task(&task_id, Ok(())).await.unwrap();
    assert_eq!(confirmed.status, TaskStatus::Confirmed);
    assert!(env.reconciler.executor().pending_submissions().await.is_empty());
    assert_error_variant!(
        env.reconciler.confirm_task(&task_id, Ok(())).await,
        ReconcilerError::UnknownSubmission { .. }
    );

    // a rejected confirmation ends the task as failed
    env.reconciler
        .propagate(
            &env.ctx,
            IdentityKind::User,
            "gina",
            PropagationOperation::Update,
            &BTreeSet::new(),
        )
        .await
        .unwrap();
    let pending = env.reconciler.executor().pending_submissions().await;
    let failed = env
        .reconciler
        .confirm_task(&pending[0].id, Err("rejected by approver".to_string()))
        .await
        .unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(failed.message.unwrap().contains("rejected by approver"));

    let statuses: Vec<TaskStatus> = env
        .reconciler
        .execution_log()
        .entries()
        .into_iter()
        .map(|e| e.status)
        .collect();
    assert_eq!(
        statuses,
        vec![TaskStatus::Submitted, TaskStatus::Confirmed, TaskStatus::Submitted, TaskStatus::Failed]
    );
}
