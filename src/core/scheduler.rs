//! Bounded background worker pool.
//!
//! Jobs are blocking closures run on tokio's blocking pool, gated by a
//! semaphore sized from [`SchedulerConfig::max_concurrent_tasks`]. A task
//! cancelled while queued never starts; a running task only sees the
//! cancellation through its [`TaskContext`].

use crate::core::commands::Command;
use crate::core::journal::JournalManager;
use crate::core::notify::{emit, SharedNotifier};
use crate::core::staging::StagingManager;
use crate::models::command::CommandStatus;
use crate::models::config::SchedulerConfig;
use crate::models::notification::Notification;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinHandle};
use uuid::Uuid;

pub type TaskId = Uuid;

/// Cooperative cancellation flag shared between a task and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }
}

/// Snapshot of one submitted task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: String,
    pub status: TaskStatus,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Handed to every job.
#[derive(Clone)]
pub struct TaskContext {
    id: TaskId,
    name: String,
    token: CancellationToken,
    notifier: Option<SharedNotifier>,
}

impl TaskContext {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fail fast with `Error::Cancelled` once the task was cancelled.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled(self.name.clone()));
        }
        Ok(())
    }

    pub fn report_progress(&self, percentage: f64, message: impl Into<String>) {
        emit(
            &self.notifier,
            Notification::TaskProgress {
                task_id: self.id,
                name: self.name.clone(),
                percentage: percentage.clamp(0.0, 100.0),
                message: message.into(),
            },
        );
    }
}

struct TaskEntry {
    info: TaskInfo,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

type TaskTable = Arc<Mutex<HashMap<TaskId, TaskEntry>>>;

enum Start {
    Run,
    /// Cancelled through its token while queued.
    Cancelled,
    /// Already finished by `cancel`.
    Skip,
}

/// Move a queued task to running, unless it was cancelled meanwhile.
fn begin(tasks: &TaskTable, id: TaskId) -> Start {
    let Ok(mut table) = tasks.lock() else {
        return Start::Skip;
    };
    match table.get_mut(&id) {
        Some(entry) if entry.info.status == TaskStatus::Queued => {
            if entry.token.is_cancelled() {
                entry.info.status = TaskStatus::Cancelled;
                entry.info.finished_at = Some(Utc::now());
                Start::Cancelled
            } else {
                entry.info.status = TaskStatus::Running;
                entry.info.started_at = Some(Utc::now());
                Start::Run
            }
        }
        _ => Start::Skip,
    }
}

fn finish(tasks: &TaskTable, id: TaskId, status: TaskStatus, error: Option<String>) {
    if let Ok(mut table) = tasks.lock() {
        if let Some(entry) = table.get_mut(&id) {
            entry.info.status = status;
            entry.info.finished_at = Some(Utc::now());
            entry.info.error = error;
        }
    }
}

pub struct TaskScheduler {
    runtime: Option<Runtime>,
    semaphore: Arc<Semaphore>,
    tasks: TaskTable,
    periodic: Mutex<HashMap<TaskId, AbortHandle>>,
    notifier: Option<SharedNotifier>,
    shut_down: AtomicBool,
    max_concurrent: usize,
}

impl TaskScheduler {
    pub fn new(config: &SchedulerConfig) -> Result<Self> {
        let max_concurrent = config.max_concurrent_tasks.max(1);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .max_blocking_threads(max_concurrent)
            .thread_name("media-guard-worker")
            .enable_all()
            .build()?;

        tracing::debug!("Task scheduler started with {} workers", max_concurrent);
        Ok(Self {
            runtime: Some(runtime),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            tasks: Arc::new(Mutex::new(HashMap::new())),
            periodic: Mutex::new(HashMap::new()),
            notifier: None,
            shut_down: AtomicBool::new(false),
            max_concurrent,
        })
    }

    pub fn with_notifier(mut self, notifier: SharedNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    fn runtime(&self) -> Result<&Runtime> {
        match &self.runtime {
            Some(rt) if !self.shut_down.load(Ordering::SeqCst) => Ok(rt),
            _ => Err(Error::Other("Task scheduler has been shut down".to_string())),
        }
    }

    /// Queue a blocking job. Returns immediately with its id.
    pub fn submit<F>(&self, name: impl Into<String>, job: F) -> Result<TaskId>
    where
        F: FnOnce(&TaskContext) -> Result<()> + Send + 'static,
    {
        self.submit_with_token(name.into(), CancellationToken::new(), job)
    }

    /// Execute a shared command in the background.
    ///
    /// Cancelling the task cancels the command; the command honors it only
    /// before its operation body starts. The outcome is read back from the
    /// command itself.
    pub fn submit_command(&self, command: Arc<Mutex<Box<dyn Command>>>) -> Result<TaskId> {
        let (name, token) = {
            let cmd = command
                .lock()
                .map_err(|_| Error::Other("Command lock poisoned".to_string()))?;
            (cmd.description().to_string(), cmd.cancellation_token())
        };

        self.submit_with_token(name, token, move |ctx| {
            let mut cmd = command
                .lock()
                .map_err(|_| Error::Other("Command lock poisoned".to_string()))?;
            let result = cmd.execute();
            match result.status {
                CommandStatus::Completed => Ok(()),
                CommandStatus::Cancelled => Err(Error::Cancelled(cmd.description().to_string())),
                _ => {
                    let message = result
                        .error
                        .map(|e| e.message)
                        .unwrap_or_else(|| "command failed".to_string());
                    Err(Error::Execution(format!("{} ({})", message, ctx.id())))
                }
            }
        })
    }

    fn submit_with_token<F>(&self, name: String, token: CancellationToken, job: F) -> Result<TaskId>
    where
        F: FnOnce(&TaskContext) -> Result<()> + Send + 'static,
    {
        let runtime = self.runtime()?;
        let id = Uuid::new_v4();
        let ctx = TaskContext {
            id,
            name: name.clone(),
            token: token.clone(),
            notifier: self.notifier.clone(),
        };

        {
            let mut table = self
                .tasks
                .lock()
                .map_err(|_| Error::Other("Task table poisoned".to_string()))?;
            table.insert(
                id,
                TaskEntry {
                    info: TaskInfo {
                        id,
                        name: name.clone(),
                        status: TaskStatus::Queued,
                        submitted_at: Utc::now(),
                        started_at: None,
                        finished_at: None,
                        error: None,
                    },
                    token,
                    handle: None,
                },
            );
        }

        let tasks = Arc::clone(&self.tasks);
        let semaphore = Arc::clone(&self.semaphore);
        let notifier = self.notifier.clone();

        let handle = runtime.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };
            match begin(&tasks, id) {
                Start::Run => {}
                Start::Cancelled => {
                    tracing::debug!("Task '{}' cancelled before start", ctx.name);
                    emit(&notifier, Notification::TaskCancelled { task_id: id, name: ctx.name.clone() });
                    return;
                }
                Start::Skip => return,
            }

            emit(&notifier, Notification::TaskStarted { task_id: id, name: ctx.name.clone() });
            let started = Instant::now();
            let job_ctx = ctx.clone();
            let outcome = tokio::task::spawn_blocking(move || job(&job_ctx)).await;

            let notification = match outcome {
                Ok(Ok(())) => {
                    finish(&tasks, id, TaskStatus::Completed, None);
                    Notification::TaskCompleted {
                        task_id: id,
                        name: ctx.name.clone(),
                        duration_ms: started.elapsed().as_millis() as u64,
                    }
                }
                Ok(Err(Error::Cancelled(_))) => {
                    finish(&tasks, id, TaskStatus::Cancelled, None);
                    Notification::TaskCancelled { task_id: id, name: ctx.name.clone() }
                }
                Ok(Err(e)) => {
                    tracing::error!("Task '{}' failed: {}", ctx.name, e);
                    finish(&tasks, id, TaskStatus::Failed, Some(e.to_string()));
                    Notification::TaskFailed {
                        task_id: id,
                        name: ctx.name.clone(),
                        error_message: e.to_string(),
                    }
                }
                Err(join_error) => {
                    let message = format!("Task panicked: {}", join_error);
                    tracing::error!("Task '{}': {}", ctx.name, message);
                    finish(&tasks, id, TaskStatus::Failed, Some(message.clone()));
                    Notification::TaskFailed {
                        task_id: id,
                        name: ctx.name.clone(),
                        error_message: message,
                    }
                }
            };
            emit(&notifier, notification);
        });

        if let Ok(mut table) = self.tasks.lock() {
            if let Some(entry) = table.get_mut(&id) {
                entry.handle = Some(handle);
            }
        }
        tracing::debug!("Submitted task '{}' ({})", name, id);
        Ok(id)
    }

    /// Run `job` every `interval` until cancelled or the scheduler shuts down.
    ///
    /// The first run happens one interval after scheduling. Failures are
    /// logged and do not stop the schedule.
    pub fn schedule_periodic<F>(&self, name: impl Into<String>, interval: Duration, job: F) -> Result<TaskId>
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        let runtime = self.runtime()?;
        let id = Uuid::new_v4();
        let name = name.into();
        let job = Arc::new(job);
        let label = name.clone();

        let handle = runtime.spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let run = Arc::clone(&job);
                match tokio::task::spawn_blocking(move || run()).await {
                    Ok(Ok(())) => tracing::debug!("Periodic job '{}' ran", label),
                    Ok(Err(e)) => tracing::warn!("Periodic job '{}' failed: {}", label, e),
                    Err(e) => tracing::warn!("Periodic job '{}' panicked: {}", label, e),
                }
            }
        });

        self.periodic
            .lock()
            .map_err(|_| Error::Other("Periodic table poisoned".to_string()))?
            .insert(id, handle.abort_handle());
        tracing::info!("Scheduled '{}' every {:?}", name, interval);
        Ok(id)
    }

    /// Schedule staging garbage collection and journal cleanup every
    /// `cleanup_interval_minutes` of the staging config.
    ///
    /// Each job is only scheduled when its manager has `auto_cleanup` set.
    pub fn schedule_maintenance(
        &self,
        staging: &Arc<StagingManager>,
        journal: &Arc<JournalManager>,
    ) -> Result<Vec<TaskId>> {
        let minutes = staging.config().cleanup_interval_minutes.max(1);
        self.schedule_maintenance_every(staging, journal, Duration::from_secs(minutes * 60))
    }

    /// [`Self::schedule_maintenance`] with an explicit interval.
    pub fn schedule_maintenance_every(
        &self,
        staging: &Arc<StagingManager>,
        journal: &Arc<JournalManager>,
        interval: Duration,
    ) -> Result<Vec<TaskId>> {
        let mut ids = Vec::new();
        if staging.config().auto_cleanup {
            let staging = Arc::clone(staging);
            ids.push(self.schedule_periodic("staging-cleanup", interval, move || {
                let cleaned = staging.cleanup_old_staging();
                if cleaned > 0 {
                    tracing::debug!("Staging maintenance removed {} entries", cleaned);
                }
                Ok(())
            })?);
        }
        if journal.config().auto_cleanup {
            let journal = Arc::clone(journal);
            ids.push(self.schedule_periodic("journal-cleanup", interval, move || {
                journal.cleanup_old_entries(false).map(|_| ())
            })?);
        }
        Ok(ids)
    }

    /// Cancel a queued, running or periodic task.
    ///
    /// Returns false for unknown or already finished tasks.
    pub fn cancel(&self, id: TaskId) -> bool {
        if let Ok(mut periodic) = self.periodic.lock() {
            if let Some(handle) = periodic.remove(&id) {
                handle.abort();
                return true;
            }
        }

        let cancelled_queued = {
            let Ok(mut table) = self.tasks.lock() else {
                return false;
            };
            let Some(entry) = table.get_mut(&id) else {
                return false;
            };
            match entry.info.status {
                TaskStatus::Queued => {
                    entry.token.cancel();
                    entry.info.status = TaskStatus::Cancelled;
                    entry.info.finished_at = Some(Utc::now());
                    Some(entry.info.name.clone())
                }
                TaskStatus::Running => {
                    entry.token.cancel();
                    None
                }
                _ => return false,
            }
        };

        if let Some(name) = cancelled_queued {
            emit(&self.notifier, Notification::TaskCancelled { task_id: id, name });
        }
        true
    }

    /// Block until the task finishes and return its final snapshot.
    ///
    /// Must not be called from inside a scheduled job.
    pub fn wait(&self, id: TaskId) -> Result<TaskInfo> {
        let handle = {
            let mut table = self
                .tasks
                .lock()
                .map_err(|_| Error::Other("Task table poisoned".to_string()))?;
            table.get_mut(&id).ok_or(Error::TaskNotFound(id))?.handle.take()
        };

        match (handle, &self.runtime) {
            (Some(handle), Some(runtime)) => {
                if let Err(e) = runtime.block_on(handle) {
                    tracing::warn!("Task {} did not join cleanly: {}", id, e);
                }
            }
            _ => {
                while !self.status(id).map(TaskStatus::is_finished).unwrap_or(true) {
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
        }
        self.info(id).ok_or(Error::TaskNotFound(id))
    }

    pub fn status(&self, id: TaskId) -> Option<TaskStatus> {
        self.info(id).map(|info| info.status)
    }

    pub fn info(&self, id: TaskId) -> Option<TaskInfo> {
        let table = self.tasks.lock().ok()?;
        table.get(&id).map(|entry| entry.info.clone())
    }

    pub fn tasks(&self) -> Vec<TaskInfo> {
        let Ok(table) = self.tasks.lock() else {
            return Vec::new();
        };
        let mut list: Vec<TaskInfo> = table.values().map(|e| e.info.clone()).collect();
        list.sort_by_key(|info| info.submitted_at);
        list
    }

    pub fn running_count(&self) -> usize {
        self.tasks()
            .iter()
            .filter(|info| info.status == TaskStatus::Running)
            .count()
    }

    /// Forget finished tasks. Returns how many were dropped.
    pub fn prune_finished(&self) -> usize {
        let Ok(mut table) = self.tasks.lock() else {
            return 0;
        };
        let before = table.len();
        table.retain(|_, entry| !entry.info.status.is_finished());
        before - table.len()
    }

    /// Stop periodic jobs, cancel outstanding tasks and refuse new ones.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut periodic) = self.periodic.lock() {
            for (_, handle) in periodic.drain() {
                handle.abort();
            }
        }
        if let Ok(table) = self.tasks.lock() {
            for entry in table.values().filter(|e| !e.info.status.is_finished()) {
                entry.token.cancel();
            }
        }
        tracing::info!("Task scheduler shut down");
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::notify::RecordingNotifier;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    fn scheduler(max: usize) -> TaskScheduler {
        TaskScheduler::new(&SchedulerConfig { max_concurrent_tasks: max }).unwrap()
    }

    #[test]
    fn test_submit_and_wait() {
        let recorder = Arc::new(RecordingNotifier::new());
        let sched = scheduler(2).with_notifier(recorder.clone());

        let id = sched
            .submit("progress", |ctx| {
                ctx.report_progress(50.0, "halfway");
                Ok(())
            })
            .unwrap();
        let info = sched.wait(id).unwrap();

        assert_eq!(info.status, TaskStatus::Completed);
        assert!(info.started_at.is_some());
        assert_eq!(recorder.count("task_started"), 1);
        assert_eq!(recorder.count("task_progress"), 1);
        assert_eq!(recorder.count("task_completed"), 1);
    }

    #[test]
    fn test_failed_task_records_error() {
        let sched = scheduler(1);
        let id = sched
            .submit("broken", |_| Err(Error::Execution("boom".to_string())))
            .unwrap();
        let info = sched.wait(id).unwrap();
        assert_eq!(info.status, TaskStatus::Failed);
        assert!(info.error.unwrap().contains("boom"));
    }

    #[test]
    fn test_cancel_queued_task_never_runs() {
        let sched = scheduler(1);
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let ran = Arc::new(AtomicBool::new(false));

        let blocker = sched
            .submit("blocker", move |_| {
                let _ = release_rx.recv_timeout(Duration::from_secs(5));
                Ok(())
            })
            .unwrap();
        while sched.status(blocker) != Some(TaskStatus::Running) {
            std::thread::sleep(Duration::from_millis(5));
        }
        let flag = Arc::clone(&ran);
        let queued = sched
            .submit("queued", move |_| {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        assert!(sched.cancel(queued));
        assert_eq!(sched.status(queued), Some(TaskStatus::Cancelled));

        release_tx.send(()).unwrap();
        sched.wait(blocker).unwrap();
        assert_eq!(sched.wait(queued).unwrap().status, TaskStatus::Cancelled);
        assert!(!ran.load(Ordering::SeqCst));
        assert!(!sched.cancel(queued));
    }

    #[test]
    fn test_concurrency_is_bounded() {
        let sched = scheduler(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let ids: Vec<TaskId> = (0..6)
            .map(|i| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                sched
                    .submit(format!("job {}", i), move |_| {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(20));
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .unwrap()
            })
            .collect();

        for id in ids {
            assert_eq!(sched.wait(id).unwrap().status, TaskStatus::Completed);
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_periodic_job_runs_until_cancelled() {
        let sched = scheduler(1);
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);

        let id = sched
            .schedule_periodic("tick", Duration::from_millis(20), move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        std::thread::sleep(Duration::from_millis(200));
        assert!(sched.cancel(id));

        let seen = runs.load(Ordering::SeqCst);
        assert!(seen >= 2);
        std::thread::sleep(Duration::from_millis(100));
        assert!(runs.load(Ordering::SeqCst) <= seen + 1);
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let sched = scheduler(1);
        sched.shutdown();
        assert!(sched.submit("late", |_| Ok(())).is_err());
    }

    #[test]
    fn test_wait_unknown_task() {
        let sched = scheduler(1);
        assert!(matches!(sched.wait(Uuid::new_v4()), Err(Error::TaskNotFound(_))));
    }
}
