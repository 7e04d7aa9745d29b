//! In-process job scheduler.
//!
//! Hosts the job store and drives time-based triggers. Each job is a tokio
//! task that sleeps until its next fire time and then invokes the job
//! function. Two schedule shapes are supported:
//!
//! - **cron**: fires at each matching instant. Missed firings are *not*
//!   replayed: the task always sleeps to the next upcoming occurrence, so
//!   downtime produces no catch-up stampede.
//! - **interval**: fires every `period`, with one-cycle backoff. A tick
//!   that reports [`TickOutcome::Backoff`] doubles the next wait once,
//!   then the cadence reverts.
//!
//! Job ids are owned by this scheduler; `schedule_job` with an existing id
//! replaces the prior entry (duplicate cron scheduling for a flow replaces
//! rather than doubles).

use cron::Schedule;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What a job function reports back to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Normal,
    /// Upstream asked us to slow down (429 / rate-limit header). The next
    /// interval is doubled for one cycle.
    Backoff,
}

/// Boxed async job body.
pub type JobFn =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = TickOutcome> + Send>> + Send + Sync>;

/// When a job fires.
#[derive(Clone)]
pub enum JobSchedule {
    Cron(Schedule),
    Interval(Duration),
}

impl JobSchedule {
    /// Parse a validated 5-field cron expression. The `cron` crate wants a
    /// seconds field, so one is prepended.
    pub fn from_cron_fields(expr: &str) -> Result<Self, String> {
        let with_seconds = format!("0 {}", expr.trim());
        Schedule::from_str(&with_seconds)
            .map(JobSchedule::Cron)
            .map_err(|e| format!("invalid cron expression '{}': {}", expr, e))
    }
}

struct JobHandle {
    task: tokio::task::JoinHandle<()>,
}

/// The scheduler process: a job table plus the timer tasks driving it.
pub struct Scheduler {
    jobs: Arc<Mutex<HashMap<String, JobHandle>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Schedule (or replace) a job. Replacing cancels the prior task
    /// before the new one is installed, so at most one task runs per id.
    pub fn schedule_job(&self, job_id: &str, schedule: JobSchedule, func: JobFn) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(existing) = jobs.remove(job_id) {
            existing.task.abort();
            log::info!("job replaced: id={}", job_id);
        } else {
            log::info!("job scheduled: id={}", job_id);
        }

        let task = match schedule {
            JobSchedule::Cron(cron_schedule) => tokio::spawn(run_cron_job(cron_schedule, func)),
            JobSchedule::Interval(period) => tokio::spawn(run_interval_job(period, func)),
        };
        jobs.insert(job_id.to_string(), JobHandle { task });
    }

    /// Remove a job, cancelling its task. Unknown ids are logged and
    /// ignored.
    pub fn unschedule_job(&self, job_id: &str) {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.remove(job_id) {
            Some(handle) => {
                handle.task.abort();
                log::info!("job cancelled: id={}", job_id);
            }
            None => log::warn!("no job with id={} to cancel", job_id),
        }
    }

    pub fn has_job(&self, job_id: &str) -> bool {
        self.jobs.lock().unwrap().contains_key(job_id)
    }

    pub fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.jobs.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let jobs = self.jobs.lock().unwrap();
        for handle in jobs.values() {
            handle.task.abort();
        }
    }
}

async fn run_cron_job(schedule: Schedule, func: JobFn) {
    loop {
        let next = match schedule.upcoming(chrono::Utc).next() {
            Some(next) => next,
            None => return,
        };
        let wait = (next - chrono::Utc::now())
            .to_std()
            .unwrap_or_else(|_| Duration::from_secs(0));
        tokio::time::sleep(wait).await;
        // Ticks skipped while the process was down are simply gone; the
        // next sleep targets the next *upcoming* occurrence.
        let _ = func().await;
    }
}

async fn run_interval_job(period: Duration, func: JobFn) {
    let mut next_wait = period;
    loop {
        tokio::time::sleep(next_wait).await;
        match func().await {
            TickOutcome::Backoff => {
                log::warn!(
                    "interval job backing off: next tick in {}s",
                    (period * 2).as_secs()
                );
                next_wait = period * 2;
            }
            TickOutcome::Normal => next_wait = period,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_job(counter: Arc<AtomicU32>) -> JobFn {
        Arc::new(move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                TickOutcome::Normal
            })
        })
    }

    #[tokio::test]
    async fn test_interval_job_fires() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicU32::new(0));
        scheduler.schedule_job(
            "tick",
            JobSchedule::Interval(Duration::from_millis(20)),
            counting_job(counter.clone()),
        );
        tokio::time::sleep(Duration::from_millis(110)).await;
        scheduler.unschedule_job("tick");
        let fired = counter.load(Ordering::SeqCst);
        assert!(fired >= 3, "expected at least 3 ticks, got {}", fired);
    }

    #[tokio::test]
    async fn test_unschedule_removes_job() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicU32::new(0));
        scheduler.schedule_job(
            "gone",
            JobSchedule::Interval(Duration::from_millis(10)),
            counting_job(counter.clone()),
        );
        assert!(scheduler.has_job("gone"));
        scheduler.unschedule_job("gone");
        assert!(!scheduler.has_job("gone"));

        let snapshot = counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), snapshot);
    }

    #[tokio::test]
    async fn test_reschedule_replaces_prior_entry() {
        let scheduler = Scheduler::new();
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));
        scheduler.schedule_job(
            "job",
            JobSchedule::Interval(Duration::from_millis(10)),
            counting_job(first.clone()),
        );
        scheduler.schedule_job(
            "job",
            JobSchedule::Interval(Duration::from_millis(10)),
            counting_job(second.clone()),
        );
        let first_snapshot = first.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(first.load(Ordering::SeqCst), first_snapshot);
        assert!(second.load(Ordering::SeqCst) >= 2);
        assert_eq!(scheduler.job_ids(), vec!["job".to_string()]);
    }

    #[tokio::test]
    async fn test_backoff_doubles_one_cycle() {
        let scheduler = Scheduler::new();
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let fired = Arc::new(AtomicU32::new(0));
        let ticks_clone = ticks.clone();
        let fired_clone = fired.clone();
        let start = std::time::Instant::now();
        let job: JobFn = Arc::new(move || {
            let ticks = ticks_clone.clone();
            let fired = fired_clone.clone();
            let start = start;
            Box::pin(async move {
                ticks.lock().unwrap().push(start.elapsed());
                // First tick reports a rate limit; everything after is fine.
                if fired.fetch_add(1, Ordering::SeqCst) == 0 {
                    TickOutcome::Backoff
                } else {
                    TickOutcome::Normal
                }
            })
        });
        scheduler.schedule_job("poll", JobSchedule::Interval(Duration::from_millis(50)), job);
        tokio::time::sleep(Duration::from_millis(260)).await;
        scheduler.unschedule_job("poll");

        let recorded = ticks.lock().unwrap().clone();
        assert!(recorded.len() >= 3, "expected 3+ ticks, got {}", recorded.len());
        // Gap after the 429 tick is roughly doubled; the one after reverts.
        let gap_backoff = recorded[1] - recorded[0];
        let gap_normal = recorded[2] - recorded[1];
        assert!(gap_backoff >= Duration::from_millis(85), "{:?}", gap_backoff);
        assert!(gap_normal < Duration::from_millis(85), "{:?}", gap_normal);
    }

    #[test]
    fn test_cron_schedule_parses_five_fields() {
        assert!(JobSchedule::from_cron_fields("*/5 * * * *").is_ok());
        assert!(JobSchedule::from_cron_fields("not a cron").is_err());
    }
}
