use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::{
    error::{Result, SchedulerError},
    schedule::Schedule,
    types::{EntryId, EntryInfo},
};

/// A unit of work the engine can fire.
///
/// The engine knows nothing about what a firing does; new job kinds only
/// need a new implementation of this trait.
#[async_trait]
pub trait Runnable: Send + Sync {
    /// Label used in logs and diagnostics.
    fn name(&self) -> &str;

    /// When true, a firing is skipped while the previous one is still running.
    fn skip_if_running(&self) -> bool {
        false
    }

    async fn run(&self);
}

struct Entry {
    expr: String,
    schedule: Schedule,
    next_run: Option<DateTime<Utc>>,
    job: Arc<dyn Runnable>,
    in_flight: Arc<AtomicBool>,
}

/// Clears the in-flight flag when a firing ends, even by panic.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Core scheduler: keeps entries in memory and fires them at ±1 s precision.
///
/// Shared behind an `Arc`; `add`/`remove` may be called from any task while
/// [`run`](Self::run) is looping.
pub struct SchedulerEngine {
    entries: Mutex<BTreeMap<EntryId, Entry>>,
    next_id: AtomicU64,
    stopped: AtomicBool,
    /// Zone calendar fields are evaluated in.
    tz: Tz,
}

impl Default for SchedulerEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerEngine {
    /// Engine evaluating schedules in UTC.
    pub fn new() -> Self {
        Self::with_timezone(Tz::UTC)
    }

    pub fn with_timezone(tz: Tz) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            stopped: AtomicBool::new(false),
            tz,
        }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Register `job` under `expr`. Malformed expressions are rejected here,
    /// never dropped silently.
    pub fn add(&self, expr: &str, job: Arc<dyn Runnable>) -> Result<EntryId> {
        self.add_at(expr, job, Utc::now())
    }

    pub(crate) fn add_at(
        &self,
        expr: &str,
        job: Arc<dyn Runnable>,
        now: DateTime<Utc>,
    ) -> Result<EntryId> {
        let schedule = Schedule::parse(expr)?;
        let next_run = schedule
            .next_after(now, self.tz)
            .ok_or_else(|| SchedulerError::Exhausted {
                expr: expr.to_string(),
            })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(entry = id, job = job.name(), %expr, next = %next_run, "entry added");
        self.entries.lock().insert(
            id,
            Entry {
                expr: expr.to_string(),
                schedule,
                next_run: Some(next_run),
                job,
                in_flight: Arc::new(AtomicBool::new(false)),
            },
        );
        Ok(id)
    }

    /// Remove an entry. A firing already in progress is not interrupted.
    pub fn remove(&self, id: EntryId) -> bool {
        let removed = self.entries.lock().remove(&id).is_some();
        if removed {
            debug!(entry = id, "entry removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Snapshot of all entries ordered by id.
    pub fn entries(&self) -> Vec<EntryInfo> {
        self.entries
            .lock()
            .iter()
            .map(|(id, e)| EntryInfo {
                id: *id,
                name: e.job.name().to_string(),
                expr: e.expr.clone(),
                next_run: e.next_run,
            })
            .collect()
    }

    /// Main loop. Ticks every second until `shutdown` broadcasts `true`.
    ///
    /// Firings spawned before shutdown are left to finish on their own.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(entries = self.len(), timezone = %self.tz, "scheduler engine started");

        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(Utc::now());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.stopped.store(true, Ordering::Release);
        info!("scheduler engine stopped");
    }

    /// Fire every entry due at `now` and advance its next run.
    ///
    /// Next runs are computed from `now`, so seconds missed during a slow
    /// tick are not replayed.
    pub(crate) fn tick(&self, now: DateTime<Utc>) -> Vec<JoinHandle<()>> {
        if self.stopped.load(Ordering::Acquire) {
            return Vec::new();
        }

        let mut due: Vec<(EntryId, Arc<dyn Runnable>, Arc<AtomicBool>)> = Vec::new();
        {
            let mut entries = self.entries.lock();
            for (id, entry) in entries.iter_mut() {
                match entry.next_run {
                    Some(next) if next <= now => {
                        entry.next_run = entry.schedule.next_after(now, self.tz);
                        if entry.next_run.is_none() {
                            warn!(entry = *id, expr = %entry.expr, "schedule exhausted");
                        }
                        due.push((*id, Arc::clone(&entry.job), Arc::clone(&entry.in_flight)));
                    }
                    _ => {}
                }
            }
        }

        let mut handles = Vec::with_capacity(due.len());
        for (id, job, in_flight) in due {
            let busy = in_flight.swap(true, Ordering::AcqRel);
            if busy && job.skip_if_running() {
                info!(entry = id, job = job.name(), "previous run still in progress, skipping");
                continue;
            }
            debug!(entry = id, job = job.name(), "firing entry");
            // Only the firing that raised the flag may clear it.
            let guard = (!busy).then(|| InFlight(in_flight));
            handles.push(tokio::spawn(async move {
                let _guard = guard;
                job.run().await;
            }));
        }
        handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    struct Counter {
        name: String,
        runs: AtomicUsize,
        skip: bool,
        gate: Option<Arc<Notify>>,
    }

    impl Counter {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                runs: AtomicUsize::new(0),
                skip: false,
                gate: None,
            })
        }

        fn gated(name: &str, skip: bool, gate: Arc<Notify>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                runs: AtomicUsize::new(0),
                skip,
                gate: Some(gate),
            })
        }

        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Runnable for Counter {
        fn name(&self) -> &str {
            &self.name
        }
        fn skip_if_running(&self) -> bool {
            self.skip
        }
        async fn run(&self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
        }
    }

    fn t(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, secs).unwrap()
    }

    async fn join(handles: Vec<JoinHandle<()>>) {
        for h in handles {
            h.await.unwrap();
        }
    }

    #[tokio::test]
    async fn fires_only_when_due() {
        let engine = SchedulerEngine::new();
        let job = Counter::new("every-10s");
        engine.add_at("*/10 * * * * *", job.clone(), t(0)).unwrap();

        assert!(engine.tick(t(5)).is_empty());
        join(engine.tick(t(10))).await;
        assert_eq!(job.runs(), 1);

        // Same instant again: next run already advanced past it.
        assert!(engine.tick(t(10)).is_empty());
        join(engine.tick(t(21))).await;
        assert_eq!(job.runs(), 2);
    }

    #[tokio::test]
    async fn missed_firings_are_not_replayed() {
        let engine = SchedulerEngine::new();
        let job = Counter::new("every-second");
        engine.add_at("* * * * * *", job.clone(), t(0)).unwrap();

        join(engine.tick(t(30))).await;
        assert_eq!(job.runs(), 1);
        let next = engine.entries()[0].next_run.unwrap();
        assert_eq!(next, t(31));
    }

    #[tokio::test]
    async fn entries_fire_independently() {
        let engine = SchedulerEngine::new();
        let a = Counter::new("a");
        let b = Counter::new("b");
        engine.add_at("* * * * * *", a.clone(), t(0)).unwrap();
        engine.add_at("*/30 * * * * *", b.clone(), t(0)).unwrap();

        join(engine.tick(t(1))).await;
        join(engine.tick(t(30))).await;
        assert_eq!(a.runs(), 2);
        assert_eq!(b.runs(), 1);
    }

    #[tokio::test]
    async fn skip_if_running_prevents_overlap() {
        let gate = Arc::new(Notify::new());
        let engine = SchedulerEngine::new();
        let job = Counter::gated("slow", true, gate.clone());
        engine.add_at("* * * * * *", job.clone(), t(0)).unwrap();

        let first = engine.tick(t(1));
        assert_eq!(first.len(), 1);
        tokio::task::yield_now().await;

        // Still blocked on the gate: the second firing is skipped.
        assert!(engine.tick(t(2)).is_empty());

        gate.notify_one();
        join(first).await;
        join(engine.tick(t(3))).await;
        assert_eq!(job.runs(), 2);
    }

    #[tokio::test]
    async fn overlap_allowed_without_skip() {
        let gate = Arc::new(Notify::new());
        let engine = SchedulerEngine::new();
        let job = Counter::gated("overlapping", false, gate.clone());
        engine.add_at("* * * * * *", job.clone(), t(0)).unwrap();

        let first = engine.tick(t(1));
        let second = engine.tick(t(2));
        assert_eq!(first.len() + second.len(), 2);

        gate.notify_waiters();
        for _ in 0..10 {
            tokio::task::yield_now().await;
            gate.notify_waiters();
        }
        join(first).await;
        join(second).await;
        assert_eq!(job.runs(), 2);
    }

    #[test]
    fn entries_fire_at_local_wall_clock_time() {
        let engine = SchedulerEngine::with_timezone(chrono_tz::Europe::Paris);
        engine.add_at("0 0 3 * * *", Counter::new("nightly"), t(0)).unwrap();
        // 03:00 CEST on 2024-06-04 is 01:00 UTC.
        let expected = Utc.with_ymd_and_hms(2024, 6, 4, 1, 0, 0).unwrap();
        assert_eq!(engine.entries()[0].next_run, Some(expected));
    }

    #[test]
    fn malformed_schedule_rejected_at_add() {
        let engine = SchedulerEngine::new();
        let err = engine.add("every tuesday", Counter::new("bad")).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule { .. }));
        assert!(engine.is_empty());
    }

    #[test]
    fn remove_drops_entry() {
        let engine = SchedulerEngine::new();
        let id = engine.add("@hourly", Counter::new("h")).unwrap();
        assert_eq!(engine.len(), 1);
        assert!(engine.remove(id));
        assert!(!engine.remove(id));
        assert!(engine.is_empty());
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let engine = Arc::new(SchedulerEngine::new());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(&engine).run(rx));
        tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(engine.tick(Utc::now() + chrono::TimeDelta::days(1)).is_empty());
    }
}
