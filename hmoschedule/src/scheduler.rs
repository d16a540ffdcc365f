//! Job scheduler running cron and one-shot jobs on the tokio runtime.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Local};
use cron::Schedule;
use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::cron_expr::{next_fire, parse_cron};
use crate::error::{Result, ScheduleError};

pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Job body. Called once per firing; the returned future runs on the
/// runtime the job was registered from.
pub type JobCallback = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// Wraps an async closure into a [`JobCallback`].
pub fn job_fn<F, Fut>(f: F) -> JobCallback
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move || Box::pin(f()) as JobFuture)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Trigger {
    Cron { expression: String },
    Date { run_at: DateTime<Local> },
}

/// Public view of a registered job.
#[derive(Clone, Debug)]
pub struct Job {
    pub id: String,
    pub trigger: Trigger,
    pub next_run: Option<DateTime<Local>>,
}

struct JobEntry {
    trigger: Trigger,
    schedule: Option<Schedule>,
    generation: u64,
    handle: JoinHandle<()>,
}

impl JobEntry {
    fn view(&self, id: &str) -> Job {
        let next_run = match (&self.trigger, &self.schedule) {
            (Trigger::Date { run_at }, _) => Some(*run_at),
            (Trigger::Cron { .. }, Some(schedule)) => next_fire(schedule, &Local::now()),
            (Trigger::Cron { .. }, None) => None,
        };
        Job {
            id: id.to_string(),
            trigger: self.trigger.clone(),
            next_run,
        }
    }
}

#[derive(Default)]
struct SchedulerInner {
    jobs: HashMap<String, JobEntry>,
    next_generation: u64,
}

/// Registry of running jobs keyed by id.
///
/// Registering a job under an id that is already taken replaces (and
/// cancels) the previous job. A one-shot job leaves the registry right
/// before its callback runs, so the callback may register a new job under
/// the same id or remove it without cancelling itself.
#[derive(Clone, Default)]
pub struct Scheduler {
    inner: Arc<Mutex<SchedulerInner>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("jobs", &self.lock().jobs.keys().collect::<Vec<_>>())
            .finish()
    }
}

async fn run_guarded(id: String, callback: JobCallback) {
    if AssertUnwindSafe(callback()).catch_unwind().await.is_err() {
        error!(job_id = %id, "Scheduled job panicked");
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(
        &self,
        id: &str,
        trigger: Trigger,
        schedule: Option<Schedule>,
        spawn: impl FnOnce(u64) -> JoinHandle<()>,
    ) {
        let mut inner = self.lock();
        inner.next_generation += 1;
        let generation = inner.next_generation;
        let handle = spawn(generation);
        let entry = JobEntry {
            trigger,
            schedule,
            generation,
            handle,
        };
        if let Some(previous) = inner.jobs.insert(id.to_string(), entry) {
            debug!(job_id = %id, "Replacing existing job");
            previous.handle.abort();
        }
    }

    /// Registers a recurring job. Returns `false` when the expression is
    /// invalid or no runtime is available.
    pub fn add_cron_job(&self, id: &str, expression: &str, callback: JobCallback) -> bool {
        match self.try_add_cron_job(id, expression, callback) {
            Ok(()) => true,
            Err(e) => {
                warn!(job_id = %id, error = %e, "Cron job not registered");
                false
            }
        }
    }

    pub fn try_add_cron_job(&self, id: &str, expression: &str, callback: JobCallback) -> Result<()> {
        let schedule = parse_cron(expression)?;
        let runtime = Handle::try_current().map_err(|_| ScheduleError::NoRuntime(id.to_string()))?;

        let task_schedule = schedule.clone();
        let job_id = id.to_string();
        self.insert(
            id,
            Trigger::Cron {
                expression: expression.to_string(),
            },
            Some(schedule),
            move |_| {
                runtime.spawn(async move {
                    let mut last_fire: Option<DateTime<Local>> = None;
                    loop {
                        let now = Local::now();
                        let reference = match last_fire {
                            Some(last) if last > now => last,
                            _ => now,
                        };
                        let Some(next) = next_fire(&task_schedule, &reference) else {
                            debug!(job_id = %job_id, "Cron schedule exhausted");
                            break;
                        };
                        let wait = (next - now).to_std().unwrap_or_default();
                        tokio::time::sleep(wait).await;
                        last_fire = Some(next);

                        debug!(job_id = %job_id, "Cron job firing");
                        tokio::spawn(run_guarded(job_id.clone(), callback.clone()));
                    }
                })
            },
        );
        Ok(())
    }

    /// Registers a one-shot job at `run_at`. A date in the past fires
    /// immediately.
    pub fn add_date_job(&self, id: &str, run_at: DateTime<Local>, callback: JobCallback) -> bool {
        let delay = (run_at - Local::now()).to_std().unwrap_or_default();
        self.register_one_shot(id, run_at, delay, callback)
    }

    /// Registers a one-shot job `delay` from now.
    pub fn add_job_in(&self, id: &str, delay: Duration, callback: JobCallback) -> bool {
        let run_at = Local::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        self.register_one_shot(id, run_at, delay, callback)
    }

    fn register_one_shot(
        &self,
        id: &str,
        run_at: DateTime<Local>,
        delay: Duration,
        callback: JobCallback,
    ) -> bool {
        let Ok(runtime) = Handle::try_current() else {
            warn!(job_id = %id, "No runtime available, one-shot job not registered");
            return false;
        };

        let registry = self.clone();
        let job_id = id.to_string();
        self.insert(id, Trigger::Date { run_at }, None, move |generation| {
            runtime.spawn(async move {
                tokio::time::sleep(delay).await;
                {
                    let mut inner = registry.lock();
                    if inner.jobs.get(&job_id).map(|e| e.generation) == Some(generation) {
                        inner.jobs.remove(&job_id);
                    }
                }
                debug!(job_id = %job_id, "One-shot job firing");
                run_guarded(job_id, callback).await;
            })
        });
        true
    }

    pub fn get_job(&self, id: &str) -> Option<Job> {
        self.lock().jobs.get(id).map(|entry| entry.view(id))
    }

    pub fn has_job(&self, id: &str) -> bool {
        self.lock().jobs.contains_key(id)
    }

    /// Cancels and forgets a job. Returns whether a job was registered.
    pub fn remove_job(&self, id: &str) -> bool {
        match self.lock().jobs.remove(id) {
            Some(entry) => {
                entry.handle.abort();
                debug!(job_id = %id, "Job removed");
                true
            }
            None => false,
        }
    }

    pub fn get_all_jobs(&self) -> Vec<Job> {
        let inner = self.lock();
        let mut jobs: Vec<Job> = inner
            .jobs
            .iter()
            .map(|(id, entry)| entry.view(id))
            .collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        jobs
    }

    /// Cancels every job.
    pub fn shutdown(&self) {
        for (_, entry) in self.lock().jobs.drain() {
            entry.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter_job(counter: &Arc<AtomicUsize>) -> JobCallback {
        let counter = counter.clone();
        job_fn(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_fires_once_and_leaves_registry() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        assert!(scheduler.add_job_in("once", Duration::from_secs(3), counter_job(&fired)));
        assert!(scheduler.has_job("once"));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!scheduler.has_job("once"));
    }

    #[tokio::test(start_paused = true)]
    async fn same_id_replaces_previous_job() {
        let scheduler = Scheduler::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        scheduler.add_job_in("advance", Duration::from_secs(5), counter_job(&first));
        scheduler.add_job_in("advance", Duration::from_secs(8), counter_job(&second));
        assert_eq!(scheduler.get_all_jobs().len(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn removed_job_never_fires() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        scheduler.add_job_in("verify", Duration::from_secs(3), counter_job(&fired));
        assert!(scheduler.remove_job("verify"));
        assert!(!scheduler.remove_job("verify"));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn callback_may_reschedule_its_own_id() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let inner_scheduler = scheduler.clone();
        let inner_fired = fired.clone();
        scheduler.add_job_in(
            "chain",
            Duration::from_secs(1),
            job_fn(move || {
                let scheduler = inner_scheduler.clone();
                let fired = inner_fired.clone();
                async move {
                    fired.fetch_add(1, Ordering::SeqCst);
                    scheduler.remove_job("chain");
                    scheduler.add_job_in("chain", Duration::from_secs(1), counter_job(&fired));
                }
            }),
        );

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_job_is_contained() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        scheduler.add_job_in("boom", Duration::from_secs(1), job_fn(|| async { panic!("boom") }));
        scheduler.add_job_in("fine", Duration::from_secs(2), counter_job(&fired));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cron_job_fires_repeatedly() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        assert!(scheduler.add_cron_job("tick", "* * * * * *", counter_job(&fired)));
        let job = scheduler.get_job("tick").unwrap();
        assert!(job.next_run.is_some());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(fired.load(Ordering::SeqCst) >= 2);
        assert!(scheduler.has_job("tick"));
    }

    #[tokio::test]
    async fn invalid_cron_is_not_registered() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        assert!(!scheduler.add_cron_job("bad", "not a cron", counter_job(&fired)));
        assert!(scheduler.get_job("bad").is_none());
    }

    #[test]
    fn one_shot_without_runtime_is_refused() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        assert!(!scheduler.add_job_in("x", Duration::from_secs(1), counter_job(&fired)));
    }
}
