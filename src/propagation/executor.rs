//! Executes propagation tasks against connectors.
//!
//! Priority tasks run first, one after the other; the remaining tasks fan out
//! with at most `max_concurrency` connector calls in flight and are joined
//! before [`PropagationExecutor::execute`] returns. A failing task never stops
//! the others. Batches touching the same identity are serialized.
//!
//! Two-phase submissions that stay unconfirmed longer than the submission max
//! age are failed by [`PropagationExecutor::expire_submissions`], which every
//! `execute` call runs first.

use super::{
    ExecutionLog, PropagationManager, PropagationMode, PropagationOperation, PropagationTask,
    TaskExecution, TaskStatus,
};
use crate::actions::{ActionRegistry, Named};
use crate::connector::{Connector, ConnectorRegistry, ENABLE_ATTRIBUTE, call_with_timeout};
use crate::context::DomainContext;
use crate::error::{
    ConnectorError, ConnectorResult, PropagationCause, PropagationError, ReconcilerError,
    ReconcilerResult,
};
use crate::identity::{Identity, IdentityKind};
use crate::locks::{IdentityLocks, identity_lock_key};
use crate::propagation::PropagationActions;
use crate::report::Reporter;
use crate::resource::{ExternalResource, ResourceMap};
use crate::schema::SchemaRegistry;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// Final (or submitted) state of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult {
    pub task_id: String,
    pub resource: String,
    pub kind: IdentityKind,
    pub identity_key: String,
    pub operation: PropagationOperation,
    pub status: TaskStatus,
    pub message: Option<String>,
}

/// Results of one `execute` call, in task order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropagationOutcome {
    pub results: Vec<TaskResult>,
}

impl PropagationOutcome {
    pub fn is_success(&self) -> bool {
        self.results.iter().all(|r| !r.status.is_failure())
    }

    pub fn failures(&self) -> impl Iterator<Item = &TaskResult> {
        self.results.iter().filter(|r| r.status.is_failure())
    }

    pub fn succeeded(&self) -> usize {
        self.results.len() - self.failures().count()
    }

    pub fn for_resource(&self, resource: &str) -> Option<&TaskResult> {
        self.results.iter().find(|r| r.resource == resource)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

struct Submission {
    task: PropagationTask,
    submitted_at: DateTime<Utc>,
}

type Prepared<'r> = (
    &'r ExternalResource,
    Vec<Named<dyn PropagationActions>>,
    Arc<dyn Connector>,
);

/// Runs propagation tasks and tracks two-phase submissions.
pub struct PropagationExecutor {
    connectors: ConnectorRegistry,
    actions: ActionRegistry,
    default_timeout: Duration,
    max_concurrency: usize,
    submission_max_age: Duration,
    identity_locks: IdentityLocks,
    submissions: tokio::sync::Mutex<HashMap<String, Submission>>,
    log: ExecutionLog,
}

impl PropagationExecutor {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_MAX_CONCURRENCY: usize = 8;
    pub const DEFAULT_SUBMISSION_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

    pub fn new(connectors: ConnectorRegistry, actions: ActionRegistry) -> Self {
        Self {
            connectors,
            actions,
            default_timeout: Self::DEFAULT_TIMEOUT,
            max_concurrency: Self::DEFAULT_MAX_CONCURRENCY,
            submission_max_age: Self::DEFAULT_SUBMISSION_MAX_AGE,
            identity_locks: IdentityLocks::new(),
            submissions: tokio::sync::Mutex::new(HashMap::new()),
            log: ExecutionLog::new(),
        }
    }

    /// Timeout for resources that do not configure their own.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// How long a two-phase submission may wait for its confirmation.
    pub fn with_submission_max_age(mut self, max_age: Duration) -> Self {
        self.submission_max_age = max_age;
        self
    }

    /// Keep at most `capacity` executions in the log.
    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log = ExecutionLog::with_capacity(capacity);
        self
    }

    /// Per-call timeout for a resource.
    pub fn timeout_for(&self, resource: &ExternalResource) -> Duration {
        resource.connector.timeout().unwrap_or(self.default_timeout)
    }

    pub fn execution_log(&self) -> &ExecutionLog {
        &self.log
    }

    pub fn connectors(&self) -> &ConnectorRegistry {
        &self.connectors
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    /// Build and execute the tasks for an identity change.
    #[allow(clippy::too_many_arguments)]
    pub async fn propagate(
        &self,
        ctx: &DomainContext,
        resources: &ResourceMap,
        schemas: &SchemaRegistry,
        identity: &Identity,
        operation: PropagationOperation,
        excluded: &BTreeSet<String>,
        password: Option<&str>,
        reporter: &dyn Reporter,
    ) -> PropagationOutcome {
        let tasks = PropagationManager::new(resources, schemas).build_tasks(
            ctx, identity, operation, excluded, password,
        );
        self.execute(ctx, resources, tasks, reporter).await
    }

    /// Execute tasks, reporting each outcome to `reporter`.
    pub async fn execute(
        &self,
        ctx: &DomainContext,
        resources: &ResourceMap,
        tasks: Vec<PropagationTask>,
        reporter: &dyn Reporter,
    ) -> PropagationOutcome {
        self.expire_submissions().await;
        if tasks.is_empty() {
            return PropagationOutcome::default();
        }

        let keys = tasks
            .iter()
            .map(|t| identity_lock_key(&t.domain, t.kind, &t.identity_key))
            .collect();
        let guards = self.identity_locks.lock_all(keys).await;

        let (priority, rest): (Vec<_>, Vec<_>) = tasks
            .into_iter()
            .enumerate()
            .partition(|(_, task)| task.is_priority());

        let mut results = Vec::with_capacity(priority.len() + rest.len());
        for (index, task) in priority {
            let result = self.execute_task(ctx, resources, task).await;
            reporter.report_task(&result);
            if result.status.is_failure() {
                reporter.on_primary_resource_failure(&result);
            }
            results.push((index, result));
        }

        let mut concurrent: Vec<(usize, TaskResult)> = stream::iter(rest)
            .map(|(index, task)| async move {
                (index, self.execute_task(ctx, resources, task).await)
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;
        concurrent.sort_by_key(|(index, _)| *index);
        for (_, result) in &concurrent {
            reporter.report_task(result);
        }
        results.extend(concurrent);
        results.sort_by_key(|(index, _)| *index);

        drop(guards);

        PropagationOutcome {
            results: results.into_iter().map(|(_, result)| result).collect(),
        }
    }

    /// Complete a two-phase task.
    ///
    /// `Ok(())` confirms the submission, `Err(message)` marks it failed.
    pub async fn confirm(
        &self,
        task_id: &str,
        result: Result<(), String>,
    ) -> ReconcilerResult<TaskExecution> {
        let submission = self
            .submissions
            .lock()
            .await
            .remove(task_id)
            .ok_or_else(|| ReconcilerError::UnknownSubmission {
                task_id: task_id.to_string(),
            })?;

        let task = submission.task;
        let (status, message) = match result {
            Ok(()) => (TaskStatus::Confirmed, None),
            Err(message) => {
                let error = PropagationError::new(
                    &task.resource,
                    PropagationCause::Confirmation { message },
                );
                (TaskStatus::Failed, Some(error.to_string()))
            }
        };
        info!(
            "Task {} on '{}' for '{}' {}",
            task.id, task.resource, task.identity_key, status
        );

        let execution = TaskExecution {
            task_id: task.id,
            resource: task.resource,
            identity_key: task.identity_key,
            operation: task.operation,
            status,
            started_at: submission.submitted_at,
            ended_at: Utc::now(),
            message,
        };
        self.log.append(execution.clone());
        Ok(execution)
    }

    /// Tasks submitted and awaiting confirmation.
    pub async fn pending_submissions(&self) -> Vec<PropagationTask> {
        let mut tasks: Vec<PropagationTask> = self
            .submissions
            .lock()
            .await
            .values()
            .map(|s| s.task.clone())
            .collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        tasks
    }

    /// Fail every submission older than the submission max age.
    ///
    /// Expired tasks are removed, logged as `Failed` and returned; confirming
    /// one afterwards reports an unknown submission.
    pub async fn expire_submissions(&self) -> Vec<TaskExecution> {
        let now = Utc::now();
        let expired: Vec<Submission> = {
            let mut submissions = self.submissions.lock().await;
            let ids: Vec<String> = submissions
                .iter()
                .filter(|(_, s)| {
                    (now - s.submitted_at).to_std().unwrap_or_default() >= self.submission_max_age
                })
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| submissions.remove(id)).collect()
        };

        expired
            .into_iter()
            .map(|submission| {
                let task = submission.task;
                let error = PropagationError::new(
                    &task.resource,
                    PropagationCause::Confirmation {
                        message: format!(
                            "no confirmation within {}s",
                            self.submission_max_age.as_secs()
                        ),
                    },
                );
                warn!("Task {} for '{}': {}", task.id, task.identity_key, error);
                let execution = TaskExecution {
                    task_id: task.id,
                    resource: task.resource,
                    identity_key: task.identity_key,
                    operation: task.operation,
                    status: TaskStatus::Failed,
                    started_at: submission.submitted_at,
                    ended_at: now,
                    message: Some(error.to_string()),
                };
                self.log.append(execution.clone());
                execution
            })
            .collect()
    }

    async fn execute_task(
        &self,
        ctx: &DomainContext,
        resources: &ResourceMap,
        mut task: PropagationTask,
    ) -> TaskResult {
        let started_at = Utc::now();

        let (actions, attempt) = match self.prepare(resources, &task) {
            Ok((resource, actions, connector)) => {
                let attempt = self
                    .attempt(ctx, resource, connector.as_ref(), &actions, &mut task)
                    .await;
                (actions, attempt)
            }
            Err(error) => (Vec::new(), Err(error)),
        };

        let (status, message) = match (attempt, task.mode) {
            (Ok(()), PropagationMode::OnePhase) => (TaskStatus::Success, None),
            (Ok(()), PropagationMode::TwoPhases) => (TaskStatus::Submitted, None),
            (Err(error), mode) => {
                warn!("{}", error);
                let status = match mode {
                    PropagationMode::OnePhase => TaskStatus::Failure,
                    PropagationMode::TwoPhases => TaskStatus::Failed,
                };
                (status, Some(error.to_string()))
            }
        };

        let execution = TaskExecution {
            task_id: task.id.clone(),
            resource: task.resource.clone(),
            identity_key: task.identity_key.clone(),
            operation: task.operation,
            status,
            started_at,
            ended_at: Utc::now(),
            message: message.clone(),
        };
        self.log.append(execution.clone());

        for (_, action) in &actions {
            action.after(ctx, &task, &execution).await;
        }

        let result = TaskResult {
            task_id: task.id.clone(),
            resource: task.resource.clone(),
            kind: task.kind,
            identity_key: task.identity_key.clone(),
            operation: task.operation,
            status,
            message,
        };

        if status == TaskStatus::Submitted {
            self.submissions.lock().await.insert(
                task.id.clone(),
                Submission {
                    task,
                    submitted_at: started_at,
                },
            );
        }

        debug!(
            "{} {} '{}' on '{}': {}",
            result.operation, result.kind, result.identity_key, result.resource, result.status
        );
        result
    }

    fn prepare<'r>(
        &self,
        resources: &'r ResourceMap,
        task: &PropagationTask,
    ) -> Result<Prepared<'r>, PropagationError> {
        let configuration = |error: ReconcilerError| {
            PropagationError::new(
                &task.resource,
                PropagationCause::Configuration {
                    message: error.to_string(),
                },
            )
        };

        let resource = resources
            .get(&task.resource)
            .ok_or_else(|| configuration(ReconcilerError::resource_not_found(&task.resource)))?;
        let actions = self
            .actions
            .resolve_propagation(&resource.propagation_actions)
            .map_err(configuration)?;
        let connector = self
            .connectors
            .create(&resource.connector)
            .map_err(configuration)?;
        Ok((resource, actions, connector))
    }

    async fn attempt(
        &self,
        ctx: &DomainContext,
        resource: &ExternalResource,
        connector: &dyn Connector,
        actions: &[Named<dyn PropagationActions>],
        task: &mut PropagationTask,
    ) -> Result<(), PropagationError> {
        for (name, action) in actions {
            action.before(ctx, task).await.map_err(|e| {
                PropagationError::new(
                    &task.resource,
                    PropagationCause::Action {
                        action: name.clone(),
                        message: e.to_string(),
                    },
                )
            })?;
        }

        invoke(connector, task, self.timeout_for(resource))
            .await
            .map_err(|e| PropagationError::new(&task.resource, e))
    }
}

/// Perform the connector call for a task within `timeout`.
///
/// A create on an existing account becomes an update, an update of a missing
/// account becomes a create, and deleting a missing account succeeds.
async fn invoke(
    connector: &dyn Connector,
    task: &PropagationTask,
    timeout: Duration,
) -> ConnectorResult<()> {
    let mut attributes = task.attributes.clone();
    if let Some(enabled) = task.enabled {
        attributes.insert(ENABLE_ATTRIBUTE.to_string(), vec![enabled.to_string()]);
    }
    let kind = task.kind;
    let account_id = task.account_id.as_str();

    let call = async {
        match task.operation {
            PropagationOperation::Create => {
                match connector.create(kind, account_id, &attributes).await {
                    Err(ConnectorError::ObjectAlreadyExists { .. }) => {
                        connector.update(kind, account_id, &attributes).await.map(drop)
                    }
                    other => other.map(drop),
                }
            }
            PropagationOperation::Update => {
                match connector.update(kind, account_id, &attributes).await {
                    Err(ConnectorError::ObjectNotFound { .. }) => {
                        connector.create(kind, account_id, &attributes).await.map(drop)
                    }
                    other => other.map(drop),
                }
            }
            PropagationOperation::Delete => match connector.delete(kind, account_id).await {
                Err(ConnectorError::ObjectNotFound { .. }) => Ok(()),
                other => other,
            },
        }
    };

    call_with_timeout(&task.resource, timeout, call).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{
        ConnInstance, ConnectorCapabilities, ConnectorObject, MemoryConnector, SyncBatch,
    };
    use crate::mapping::ExternalAttributes;
    use crate::report::{ProvisioningReport, ReportStatus};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn task(resource: &str, operation: PropagationOperation) -> PropagationTask {
        let mut task = PropagationTask::new(
            "Master",
            IdentityKind::User,
            "jdoe",
            operation,
            resource,
            "jdoe",
        );
        task.attributes
            .insert("mail".to_string(), vec!["a@b.com".to_string()]);
        task
    }

    struct Fixture {
        resources: ResourceMap,
        connectors: HashMap<String, Arc<MemoryConnector>>,
        registry: ConnectorRegistry,
    }

    fn fixture(names: &[&str]) -> Fixture {
        let mut fixture = Fixture {
            resources: ResourceMap::new(),
            connectors: HashMap::new(),
            registry: ConnectorRegistry::new(),
        };
        for name in names {
            let connector = Arc::new(MemoryConnector::new(*name));
            let connector_type = format!("memory-{}", name);
            fixture
                .registry
                .register_instance(&connector_type, connector.clone());
            fixture.resources.insert(
                name.to_string(),
                ExternalResource::new(*name, ConnInstance::new(connector_type)),
            );
            fixture.connectors.insert(name.to_string(), connector);
        }
        fixture
    }

    #[tokio::test]
    async fn test_failure_isolation() {
        let fixture = fixture(&["ldap", "db", "ws"]);
        fixture.connectors["db"].fail_on("jdoe").await;
        let executor = PropagationExecutor::new(fixture.registry.clone(), ActionRegistry::new());
        let report = ProvisioningReport::new();

        let tasks = vec![
            task("ldap", PropagationOperation::Create),
            task("db", PropagationOperation::Create),
            task("ws", PropagationOperation::Create),
        ];
        let outcome = executor
            .execute(&DomainContext::master(), &fixture.resources, tasks, &report)
            .await;

        assert_eq!(outcome.len(), 3);
        assert_eq!(outcome.succeeded(), 2);
        assert_eq!(
            outcome.for_resource("db").map(|r| r.status),
            Some(TaskStatus::Failure)
        );
        assert!(fixture.connectors["ldap"].object(IdentityKind::User, "jdoe").await.is_some());
        assert!(fixture.connectors["ws"].object(IdentityKind::User, "jdoe").await.is_some());

        let statuses = report.statuses();
        assert_eq!(
            statuses.get(&("jdoe".to_string(), "db".to_string())),
            Some(&ReportStatus::Failure)
        );
        assert_eq!(executor.execution_log().len(), 3);
    }

    #[derive(Default)]
    struct SpyReporter {
        primary_failures: Mutex<Vec<String>>,
        reported: AtomicUsize,
    }

    impl Reporter for SpyReporter {
        fn report_task(&self, _result: &TaskResult) {
            self.reported.fetch_add(1, Ordering::SeqCst);
        }

        fn on_primary_resource_failure(&self, result: &TaskResult) {
            self.primary_failures
                .lock()
                .unwrap()
                .push(result.resource.clone());
        }
    }

    #[tokio::test]
    async fn test_priority_failure_is_reported_and_others_still_run() {
        let fixture = fixture(&["primary", "secondary"]);
        fixture.connectors["primary"].fail_on("jdoe").await;
        let executor = PropagationExecutor::new(fixture.registry.clone(), ActionRegistry::new());
        let reporter = SpyReporter::default();

        let tasks = vec![
            task("primary", PropagationOperation::Update).with_priority(Some(1)),
            task("secondary", PropagationOperation::Update),
        ];
        let outcome = executor
            .execute(&DomainContext::master(), &fixture.resources, tasks, &reporter)
            .await;

        assert_eq!(*reporter.primary_failures.lock().unwrap(), vec!["primary".to_string()]);
        assert_eq!(reporter.reported.load(Ordering::SeqCst), 2);
        assert_eq!(
            outcome.for_resource("secondary").map(|r| r.status),
            Some(TaskStatus::Success)
        );
        // update of a missing account falls back to create
        assert!(
            fixture.connectors["secondary"]
                .object(IdentityKind::User, "jdoe")
                .await
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_timeout_is_a_failure() {
        let fixture = fixture(&["slow"]);
        fixture.connectors["slow"]
            .set_latency(Some(Duration::from_millis(500)))
            .await;
        let executor = PropagationExecutor::new(fixture.registry.clone(), ActionRegistry::new())
            .with_default_timeout(Duration::from_millis(20));
        let report = ProvisioningReport::new();

        let outcome = executor
            .execute(
                &DomainContext::master(),
                &fixture.resources,
                vec![task("slow", PropagationOperation::Create)],
                &report,
            )
            .await;

        let result = &outcome.results[0];
        assert_eq!(result.status, TaskStatus::Failure);
        assert!(result.message.as_deref().unwrap_or("").contains("timed out"));
    }

    #[tokio::test]
    async fn test_two_phase_lifecycle() {
        let mut fixture = fixture(&["async-hr"]);
        if let Some(resource) = fixture.resources.get_mut("async-hr") {
            resource.propagation_mode = PropagationMode::TwoPhases;
        }
        let executor = PropagationExecutor::new(fixture.registry.clone(), ActionRegistry::new());
        let report = ProvisioningReport::new();

        let task = task("async-hr", PropagationOperation::Create).with_mode(PropagationMode::TwoPhases);
        let task_id = task.id.clone();
        let outcome = executor
            .execute(&DomainContext::master(), &fixture.resources, vec![task], &report)
            .await;
        assert_eq!(outcome.results[0].status, TaskStatus::Submitted);
        assert_eq!(executor.pending_submissions().await.len(), 1);

        let execution = executor.confirm(&task_id, Ok(())).await.unwrap();
        assert_eq!(execution.status, TaskStatus::Confirmed);
        assert!(executor.pending_submissions().await.is_empty());

        let history = executor.execution_log().for_task(&task_id);
        let statuses: Vec<TaskStatus> = history.iter().map(|e| e.status).collect();
        assert_eq!(statuses, vec![TaskStatus::Submitted, TaskStatus::Confirmed]);

        assert!(matches!(
            executor.confirm(&task_id, Ok(())).await,
            Err(ReconcilerError::UnknownSubmission { .. })
        ));
    }

    #[tokio::test]
    async fn test_two_phase_confirmation_failure() {
        let fixture = fixture(&["async-hr"]);
        let executor = PropagationExecutor::new(fixture.registry.clone(), ActionRegistry::new());
        let task = task("async-hr", PropagationOperation::Update).with_mode(PropagationMode::TwoPhases);
        let task_id = task.id.clone();
        executor
            .execute(
                &DomainContext::master(),
                &fixture.resources,
                vec![task],
                &ProvisioningReport::new(),
            )
            .await;

        let execution = executor
            .confirm(&task_id, Err("rejected by HR".to_string()))
            .await
            .unwrap();
        assert_eq!(execution.status, TaskStatus::Failed);
        assert!(execution.message.unwrap().contains("rejected by HR"));
    }

    struct RejectingAction;

    #[async_trait]
    impl PropagationActions for RejectingAction {
        async fn before(&self, _ctx: &DomainContext, task: &mut PropagationTask) -> ReconcilerResult<()> {
            if task.account_id == "blocked" {
                return Err(ReconcilerError::configuration("account is blocked"));
            }
            task.attributes
                .insert("description".to_string(), vec!["managed".to_string()]);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_actions_rewrite_and_reject() {
        let mut fixture = fixture(&["ldap"]);
        if let Some(resource) = fixture.resources.get_mut("ldap") {
            resource.propagation_actions.push("guard".to_string());
        }
        let mut actions = ActionRegistry::new();
        actions.register_propagation("guard", Arc::new(RejectingAction));
        let executor = PropagationExecutor::new(fixture.registry.clone(), actions);
        let report = ProvisioningReport::new();

        let mut blocked = task("ldap", PropagationOperation::Create);
        blocked.account_id = "blocked".to_string();
        let tasks = vec![task("ldap", PropagationOperation::Create), blocked];
        let outcome = executor
            .execute(&DomainContext::master(), &fixture.resources, tasks, &report)
            .await;

        assert_eq!(outcome.results[0].status, TaskStatus::Success);
        assert_eq!(outcome.results[1].status, TaskStatus::Failure);
        assert!(outcome.results[1].message.as_deref().unwrap().contains("guard"));

        let object = fixture.connectors["ldap"]
            .object(IdentityKind::User, "jdoe")
            .await
            .unwrap();
        assert_eq!(object.get("description"), Some(&vec!["managed".to_string()]));
        assert!(
            fixture.connectors["ldap"]
                .object(IdentityKind::User, "blocked")
                .await
                .is_none()
        );
    }

    /// Tracks the highest number of simultaneous calls.
    #[derive(Default)]
    struct CountingConnector {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl CountingConnector {
        async fn track(&self) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Connector for CountingConnector {
        fn display_name(&self) -> &str {
            "counting"
        }

        fn capabilities(&self) -> ConnectorCapabilities {
            ConnectorCapabilities::all()
        }

        async fn search(
            &self,
            _kind: IdentityKind,
            _filter: Option<&crate::connector::Filter>,
        ) -> ConnectorResult<Vec<ConnectorObject>> {
            Ok(Vec::new())
        }

        async fn create(
            &self,
            _kind: IdentityKind,
            account_id: &str,
            _attributes: &ExternalAttributes,
        ) -> ConnectorResult<String> {
            self.track().await;
            Ok(account_id.to_string())
        }

        async fn update(
            &self,
            _kind: IdentityKind,
            account_id: &str,
            _attributes: &ExternalAttributes,
        ) -> ConnectorResult<String> {
            self.track().await;
            Ok(account_id.to_string())
        }

        async fn delete(&self, _kind: IdentityKind, _account_id: &str) -> ConnectorResult<()> {
            self.track().await;
            Ok(())
        }

        async fn sync(&self, _kind: IdentityKind, _token: Option<&str>) -> ConnectorResult<SyncBatch> {
            Ok(SyncBatch::default())
        }
    }

    #[tokio::test]
    async fn test_fan_out_is_bounded() {
        let connector = Arc::new(CountingConnector::default());
        let mut registry = ConnectorRegistry::new();
        registry.register_instance("counting", connector.clone());
        let resources: ResourceMap = (0..6)
            .map(|i| {
                let name = format!("r{}", i);
                (name.clone(), ExternalResource::new(name, ConnInstance::new("counting")))
            })
            .collect();
        let executor =
            PropagationExecutor::new(registry, ActionRegistry::new()).with_max_concurrency(2);

        let tasks = resources
            .keys()
            .map(|name| task(name, PropagationOperation::Update))
            .collect();
        let outcome = executor
            .execute(&DomainContext::master(), &resources, tasks, &ProvisioningReport::new())
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.len(), 6);
        assert!(connector.max_in_flight.load(Ordering::SeqCst) <= 2);
        assert!(connector.max_in_flight.load(Ordering::SeqCst) >= 1);
    }

    fn counting_fixture(resources: usize) -> (Arc<CountingConnector>, ResourceMap, PropagationExecutor) {
        let connector = Arc::new(CountingConnector::default());
        let mut registry = ConnectorRegistry::new();
        registry.register_instance("counting", connector.clone());
        let resources = (0..resources)
            .map(|i| {
                let name = format!("r{}", i);
                (name.clone(), ExternalResource::new(name, ConnInstance::new("counting")))
            })
            .collect();
        let executor = PropagationExecutor::new(registry, ActionRegistry::new());
        (connector, resources, executor)
    }

    #[tokio::test]
    async fn test_batches_for_one_identity_never_overlap() {
        let (connector, resources, executor) = counting_fixture(2);
        let ctx = DomainContext::master();
        let report = ProvisioningReport::new();

        let (first, second) = tokio::join!(
            executor.execute(&ctx, &resources, vec![task("r0", PropagationOperation::Update)], &report),
            executor.execute(&ctx, &resources, vec![task("r1", PropagationOperation::Update)], &report),
        );

        assert!(first.is_success() && second.is_success());
        assert_eq!(connector.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_batches_for_different_identities_run_in_parallel() {
        let (connector, resources, executor) = counting_fixture(2);
        let ctx = DomainContext::master();
        let report = ProvisioningReport::new();

        let mut other = task("r1", PropagationOperation::Update);
        other.identity_key = "asmith".to_string();
        other.account_id = "asmith".to_string();
        let (first, second) = tokio::join!(
            executor.execute(&ctx, &resources, vec![task("r0", PropagationOperation::Update)], &report),
            executor.execute(&ctx, &resources, vec![other], &report),
        );

        assert!(first.is_success() && second.is_success());
        assert_eq!(connector.max_in_flight.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unconfirmed_submissions_expire() {
        let fixture = fixture(&["async-hr"]);
        let executor = PropagationExecutor::new(fixture.registry.clone(), ActionRegistry::new())
            .with_submission_max_age(Duration::ZERO)
            .with_log_capacity(10);
        let task = task("async-hr", PropagationOperation::Create).with_mode(PropagationMode::TwoPhases);
        let task_id = task.id.clone();

        executor
            .execute(
                &DomainContext::master(),
                &fixture.resources,
                vec![task],
                &ProvisioningReport::new(),
            )
            .await;
        assert_eq!(executor.pending_submissions().await.len(), 1);

        let expired = executor.expire_submissions().await;
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].task_id, task_id);
        assert_eq!(expired[0].status, TaskStatus::Failed);
        assert!(expired[0].message.as_deref().unwrap().contains("no confirmation within 0s"));
        assert!(executor.pending_submissions().await.is_empty());
        assert_eq!(executor.execution_log().capacity(), 10);
        assert_eq!(executor.execution_log().for_task(&task_id).len(), 2);

        assert!(matches!(
            executor.confirm(&task_id, Ok(())).await,
            Err(ReconcilerError::UnknownSubmission { .. })
        ));
    }

    #[tokio::test]
    async fn test_fresh_submissions_survive_expiry() {
        let fixture = fixture(&["async-hr"]);
        let executor = PropagationExecutor::new(fixture.registry.clone(), ActionRegistry::new());
        let task = task("async-hr", PropagationOperation::Create).with_mode(PropagationMode::TwoPhases);
        executor
            .execute(
                &DomainContext::master(),
                &fixture.resources,
                vec![task],
                &ProvisioningReport::new(),
            )
            .await;
        assert!(executor.expire_submissions().await.is_empty());
        assert_eq!(executor.pending_submissions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_resource_is_a_task_failure() {
        let fixture = fixture(&["ldap"]);
        let executor = PropagationExecutor::new(fixture.registry.clone(), ActionRegistry::new());
        let outcome = executor
            .execute(
                &DomainContext::master(),
                &fixture.resources,
                vec![
                    task("gone", PropagationOperation::Delete),
                    task("ldap", PropagationOperation::Create),
                ],
                &ProvisioningReport::new(),
            )
            .await;
        assert_eq!(outcome.results[0].status, TaskStatus::Failure);
        assert_eq!(outcome.results[1].status, TaskStatus::Success);
    }
}
