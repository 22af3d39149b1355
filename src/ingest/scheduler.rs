// src/ingest/scheduler.rs
//! Daily, staggered crawl triggers with at most one run per source.
//!
//! Every source owns a lock. A trigger (timetable or manual) takes it before
//! spawning the run and the run holds it until it finishes, so overlapping
//! triggers coalesce instead of queueing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone};
use metrics::{counter, gauge};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::clock;
use crate::ingest::config::ScheduleConfig;
use crate::ingest::{CrawlJob, RunOutcome};

/// One daily fire for one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleJob {
    pub source_id: &'static str,
    /// Local civil time of day.
    pub fire_at: NaiveTime,
    /// How late a fire may still happen after a restart or stall.
    pub grace: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOrigin {
    Schedule,
    Manual,
}

impl TriggerOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerOrigin::Schedule => "schedule",
            TriggerOrigin::Manual => "manual",
        }
    }
}

#[derive(Debug)]
pub enum TriggerOutcome {
    /// A fresh run was spawned; the handle resolves when it finishes.
    Started(JoinHandle<RunOutcome>),
    /// A run for this source is in flight; this trigger was absorbed.
    AlreadyRunning,
    UnknownSource,
}

struct Slot {
    job: Arc<dyn CrawlJob>,
    running: Arc<Mutex<()>>,
}

/// Registry of crawl jobs with per-source singleton execution.
pub struct JobRunner {
    slots: HashMap<&'static str, Slot>,
    order: Vec<&'static str>,
}

impl JobRunner {
    pub fn new(jobs: Vec<Arc<dyn CrawlJob>>) -> Self {
        let mut slots = HashMap::with_capacity(jobs.len());
        let mut order = Vec::with_capacity(jobs.len());
        for job in jobs {
            let id = job.source_id();
            if slots.contains_key(id) {
                warn!(target: "scheduler", source = id, "duplicate job registration ignored");
                continue;
            }
            order.push(id);
            slots.insert(
                id,
                Slot {
                    job,
                    running: Arc::new(Mutex::new(())),
                },
            );
        }
        Self { slots, order }
    }

    /// Registered sources in registration order.
    pub fn sources(&self) -> &[&'static str] {
        &self.order
    }

    pub fn job(&self, source: &str) -> Option<Arc<dyn CrawlJob>> {
        self.slots.get(source).map(|s| s.job.clone())
    }

    pub fn is_running(&self, source: &str) -> bool {
        self.slots
            .get(source)
            .is_some_and(|s| s.running.try_lock().is_err())
    }

    /// Start a detached run unless one is already in flight. Never waits
    /// for the crawl.
    pub fn trigger(&self, source: &str, origin: TriggerOrigin) -> TriggerOutcome {
        let Some(slot) = self.slots.get(source) else {
            return TriggerOutcome::UnknownSource;
        };
        let Ok(guard) = slot.running.clone().try_lock_owned() else {
            counter!("scheduler_coalesced_total", "source" => slot.job.source_id(), "origin" => origin.as_str())
                .increment(1);
            info!(target: "scheduler", source, origin = origin.as_str(), "run already in flight; trigger coalesced");
            return TriggerOutcome::AlreadyRunning;
        };

        let job = slot.job.clone();
        counter!("scheduler_fires_total", "source" => job.source_id(), "origin" => origin.as_str())
            .increment(1);
        info!(target: "scheduler", source, origin = origin.as_str(), "crawl triggered");
        TriggerOutcome::Started(tokio::spawn(async move {
            let _guard = guard;
            job.run().await
        }))
    }
}

fn parse_hhmm(raw: &str, fallback: &str) -> NaiveTime {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").unwrap_or_else(|e| {
        warn!(target: "scheduler", value = raw, error = %e, fallback, "bad fire time, using fallback");
        NaiveTime::parse_from_str(fallback, "%H:%M").unwrap_or(NaiveTime::MIN)
    })
}

/// Staggered daily timetable: event sources from `events_start`, one every
/// `step_minutes`; each rate source at `rates_at`. Overrides win.
pub fn timetable(
    cfg: &ScheduleConfig,
    event_sources: &[&'static str],
    rate_sources: &[&'static str],
) -> Vec<ScheduleJob> {
    let grace = Duration::from_secs(cfg.misfire_grace_secs);
    let start = parse_hhmm(&cfg.events_start, "04:00");
    let rates_at = parse_hhmm(&cfg.rates_at, "05:00");
    let step = chrono::Duration::minutes(i64::from(cfg.step_minutes));

    let slot = |source: &'static str, default: NaiveTime| ScheduleJob {
        source_id: source,
        fire_at: cfg
            .overrides
            .get(source)
            .map(|raw| parse_hhmm(raw, &default.format("%H:%M").to_string()))
            .unwrap_or(default),
        grace,
    };

    let mut out: Vec<ScheduleJob> = event_sources
        .iter()
        .enumerate()
        .map(|(i, &source)| {
            let offset = step * i32::try_from(i).unwrap_or(i32::MAX);
            // NaiveTime arithmetic wraps past midnight.
            let (at, _) = start.overflowing_add_signed(offset);
            slot(source, at)
        })
        .collect();
    out.extend(rate_sources.iter().map(|&source| slot(source, rates_at)));
    out
}

/// Absolute instant of `at` on local `date`.
pub fn occurrence(date: NaiveDate, at: NaiveTime) -> DateTime<FixedOffset> {
    let offset = clock::local_offset();
    let naive = date.and_time(at);
    offset
        .from_local_datetime(&naive)
        .single()
        .unwrap_or_else(|| offset.from_utc_datetime(&naive))
}

/// First occurrence of `at` strictly after `after`.
pub fn next_fire_after(after: DateTime<FixedOffset>, at: NaiveTime) -> DateTime<FixedOffset> {
    let local = after.with_timezone(&clock::local_offset());
    let today = occurrence(local.date_naive(), at);
    if today > after {
        today
    } else {
        today + chrono::Duration::days(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Misfire {
    /// The most recent slot was missed by no more than the grace window.
    FireNow { scheduled: DateTime<FixedOffset> },
    /// Nothing to catch up; wait for this instant.
    WaitUntil(DateTime<FixedOffset>),
}

/// Decide what to do at `now` for a daily fire at `at`. A slot missed by
/// more than `grace` is skipped, not queued.
pub fn misfire_decision(now: DateTime<FixedOffset>, at: NaiveTime, grace: Duration) -> Misfire {
    let local = now.with_timezone(&clock::local_offset());
    let today = occurrence(local.date_naive(), at);
    let last = if today <= now {
        today
    } else {
        today - chrono::Duration::days(1)
    };
    let late = (now - last).to_std().unwrap_or_default();
    if late <= grace {
        Misfire::FireNow { scheduled: last }
    } else {
        Misfire::WaitUntil(next_fire_after(now, at))
    }
}

async fn sleep_until_local(target: DateTime<FixedOffset>) {
    let wait = (target - clock::now_local()).to_std().unwrap_or_default();
    tokio::time::sleep(wait).await;
}

async fn job_loop(runner: Arc<JobRunner>, job: ScheduleJob) {
    let mut scheduled = match misfire_decision(clock::now_local(), job.fire_at, job.grace) {
        Misfire::FireNow { scheduled } => scheduled,
        Misfire::WaitUntil(next) => {
            info!(target: "scheduler", source = job.source_id, next = %clock::format_stamp(&next), "waiting for first fire");
            next
        }
    };

    loop {
        sleep_until_local(scheduled).await;
        let now = clock::now_local();
        let late = (now - scheduled).to_std().unwrap_or_default();

        if late > job.grace {
            counter!("scheduler_misfires_skipped_total", "source" => job.source_id).increment(1);
            warn!(target: "scheduler", source = job.source_id, late_secs = late.as_secs(), "fire missed beyond grace; skipped");
        } else {
            gauge!("scheduler_last_fire_ts", "source" => job.source_id)
                .set(now.timestamp() as f64);
            // Detached: the timetable never waits for a crawl.
            let _ = runner.trigger(job.source_id, TriggerOrigin::Schedule);
        }

        scheduled = next_fire_after(now.max(scheduled), job.fire_at);
    }
}

/// Spawn one timing loop per timetable entry.
pub fn spawn_scheduler(runner: Arc<JobRunner>, table: Vec<ScheduleJob>) -> Vec<JoinHandle<()>> {
    table
        .into_iter()
        .filter(|job| {
            let known = runner.job(job.source_id).is_some();
            if !known {
                warn!(target: "scheduler", source = job.source_id, "timetable entry for unknown source ignored");
            }
            known
        })
        .map(|job| {
            info!(target: "scheduler", source = job.source_id, at = %job.fire_at.format("%H:%M"), "scheduled daily");
            tokio::spawn(job_loop(runner.clone(), job))
        })
        .collect()
}
