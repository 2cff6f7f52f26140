//! Interval job scheduler.
//!
//! Each job owns a tokio interval trigger and a single-run guard. A firing
//! takes the guard without waiting; when the previous run still holds it the
//! firing is skipped and counted, so runs of one job never overlap. Runs are
//! never cancelled midway: stopping a job only ends its trigger. A panicking
//! run is recorded as a failed run and releases the job.

use crate::error::{ReconcilerError, ReconcilerResult};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Work performed by one firing.
pub type JobAction = Arc<dyn Fn() -> BoxFuture<'static, ReconcilerResult<()>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerStatus {
    Normal,
    Paused,
    /// A run is in progress
    Blocked,
    /// Stopped; the trigger will not fire again
    Complete,
}

/// Snapshot of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub id: String,
    pub name: String,
    pub trigger_name: String,
    pub trigger_status: TriggerStatus,
    pub last_run: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub skipped_count: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Fired,
    /// The previous run was still in progress, or the job is stopped
    Skipped,
}

#[derive(Debug)]
struct JobState {
    status: JobStatus,
    paused: bool,
    running: bool,
}

struct JobShared {
    action: JobAction,
    guard: Arc<tokio::sync::Mutex<()>>,
    state: Mutex<JobState>,
}

impl JobShared {
    fn state(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> JobStatus {
        let state = self.state();
        let mut status = state.status.clone();
        if status.trigger_status != TriggerStatus::Complete {
            status.trigger_status = if state.running {
                TriggerStatus::Blocked
            } else if state.paused {
                TriggerStatus::Paused
            } else {
                TriggerStatus::Normal
            };
        }
        status
    }

    /// Start a run unless one is in progress.
    fn fire(self: &Arc<Self>) -> FireOutcome {
        if self.state().status.trigger_status == TriggerStatus::Complete {
            return FireOutcome::Skipped;
        }
        let Ok(permit) = self.guard.clone().try_lock_owned() else {
            let mut state = self.state();
            state.status.skipped_count += 1;
            debug!(
                "Job '{}' still running, skipping firing ({} skipped)",
                state.status.name, state.status.skipped_count
            );
            return FireOutcome::Skipped;
        };
        self.state().running = true;

        let job = Arc::clone(self);
        tokio::spawn(async move {
            let result = AssertUnwindSafe(async { (job.action)().await })
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(ReconcilerError::JobFailed {
                        job: job.state().status.trigger_name.clone(),
                        message: format!("job panicked: {}", panic_message(&*panic)),
                    })
                });
            {
                let mut state = job.state();
                state.running = false;
                state.status.run_count += 1;
                state.status.last_run = Some(Utc::now());
                state.status.last_error = match result {
                    Ok(()) => None,
                    Err(e) => {
                        warn!("Job '{}' failed: {}", state.status.name, e);
                        Some(e.to_string())
                    }
                };
            }
            drop(permit);
        });
        FireOutcome::Fired
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

struct ScheduledJob {
    shared: Arc<JobShared>,
    trigger: JoinHandle<()>,
}

/// Owns the jobs and their triggers. Dropping the scheduler stops every
/// trigger.
#[derive(Default)]
pub struct Scheduler {
    jobs: Mutex<HashMap<String, ScheduledJob>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job firing every `every`, first after one period.
    ///
    /// Must be called within a tokio runtime. Returns the job id.
    pub fn schedule(
        &self,
        name: impl Into<String>,
        trigger_name: impl Into<String>,
        every: Duration,
        action: JobAction,
    ) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let name = name.into();
        let shared = Arc::new(JobShared {
            action,
            guard: Arc::new(tokio::sync::Mutex::new(())),
            state: Mutex::new(JobState {
                status: JobStatus {
                    id: id.clone(),
                    name: name.clone(),
                    trigger_name: trigger_name.into(),
                    trigger_status: TriggerStatus::Normal,
                    last_run: None,
                    run_count: 0,
                    skipped_count: 0,
                    last_error: None,
                },
                paused: false,
                running: false,
            }),
        });

        let job = Arc::clone(&shared);
        let trigger = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if job.state().paused {
                    continue;
                }
                job.fire();
            }
        });

        info!("Scheduled job '{}' ({}) every {:?}", name, id, every);
        self.lock().insert(id.clone(), ScheduledJob { shared, trigger });
        id
    }

    /// Fire a job immediately, outside its trigger.
    pub fn fire_now(&self, job_id: &str) -> ReconcilerResult<FireOutcome> {
        Ok(self.with_job(job_id, |job| Arc::clone(&job.shared))?.fire())
    }

    /// End the trigger. A run in progress completes.
    pub fn stop(&self, job_id: &str) -> ReconcilerResult<()> {
        self.with_job(job_id, |job| {
            job.trigger.abort();
            job.shared.state().status.trigger_status = TriggerStatus::Complete;
        })?;
        info!("Stopped job {}", job_id);
        Ok(())
    }

    pub fn pause(&self, job_id: &str) -> ReconcilerResult<()> {
        self.with_job(job_id, |job| job.shared.state().paused = true)
    }

    pub fn resume(&self, job_id: &str) -> ReconcilerResult<()> {
        self.with_job(job_id, |job| job.shared.state().paused = false)
    }

    pub fn status(&self, job_id: &str) -> ReconcilerResult<JobStatus> {
        self.with_job(job_id, |job| job.shared.snapshot())
    }

    /// Every job, ordered by name.
    pub fn jobs(&self) -> Vec<JobStatus> {
        let mut jobs: Vec<JobStatus> = self
            .lock()
            .values()
            .map(|job| job.shared.snapshot())
            .collect();
        jobs.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    fn with_job<T>(&self, job_id: &str, f: impl FnOnce(&ScheduledJob) -> T) -> ReconcilerResult<T> {
        self.lock()
            .get(job_id)
            .map(f)
            .ok_or_else(|| ReconcilerError::JobNotFound {
                job_id: job_id.to_string(),
            })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ScheduledJob>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for job in self.lock().values() {
            job.trigger.abort();
        }
    }
}
