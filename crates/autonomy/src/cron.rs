//! Cron service: `at` one-shots, `every` intervals, and 5-field cron
//! expressions, with isolation, bounded retries, and a durable snapshot.
//!
//! The orchestrator calls [`CronService::tick`] periodically; due jobs are
//! spawned onto the runtime and the service tracks in-flight ids so an
//! `isolated` job never overlaps itself. Every mutation flushes
//! `cron-state.json`.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use perch_domain::config::AutonomyConfig;
use perch_domain::trace::TraceEvent;
use perch_domain::{Error, Result};
use perch_store::snapshot::{load_json, save_json};

/// Retry backoff never exceeds an hour.
const MAX_BACKOFF_MS: u64 = 3_600_000;

/// Job callback: owns its future so the service can spawn it.
pub type CronRunner = Arc<dyn Fn(CronJob) -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CronKind {
    At,
    Every,
    Cron,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJob {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: CronKind,
    /// The kind-specific expression: an RFC 3339 instant for `at`, a
    /// duration like `"1s"`/`"5m"` for `every`, five fields for `cron`.
    pub expression: String,
    /// When true, a new run is skipped while one is still in flight.
    #[serde(default)]
    pub isolated: bool,
    #[serde(default = "d_max_retries")]
    pub max_retries: u32,
    #[serde(default = "d_backoff_ms")]
    pub backoff_ms: u64,
    /// Epoch ms of the next firing; `None` for a spent one-shot.
    pub next_run_at: Option<i64>,
    /// Consecutive failures of the current occurrence.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn d_max_retries() -> u32 {
    3
}
fn d_backoff_ms() -> u64 {
    10_000
}

impl CronJob {
    /// Build a job from a schedule string: `at <RFC3339>`,
    /// `every <duration>`, or `cron <5 fields>`.
    pub fn new(id: impl Into<String>, schedule: &str) -> Result<Self> {
        let (kind, expression) = parse_schedule(schedule)?;
        let now = Utc::now();
        let mut job = Self {
            id: id.into(),
            kind,
            expression,
            isolated: false,
            max_retries: d_max_retries(),
            backoff_ms: d_backoff_ms(),
            next_run_at: None,
            attempts: 0,
            last_error: None,
            created_at: now,
        };
        job.next_run_at = compute_next(job.kind, &job.expression, now)?;
        Ok(job)
    }

    pub fn isolated(mut self, isolated: bool) -> Self {
        self.isolated = isolated;
        self
    }
}

/// Split a schedule string into kind + expression, validating the latter.
pub fn parse_schedule(schedule: &str) -> Result<(CronKind, String)> {
    let (head, rest) = schedule
        .trim()
        .split_once(char::is_whitespace)
        .ok_or_else(|| Error::SchemaInvalid(format!("schedule \"{schedule}\" has no expression")))?;
    let rest = rest.trim().to_owned();
    let kind = match head {
        "at" => {
            DateTime::parse_from_rfc3339(&rest)
                .map_err(|e| Error::SchemaInvalid(format!("at-expression \"{rest}\": {e}")))?;
            CronKind::At
        }
        "every" => {
            parse_duration_ms(&rest)?;
            CronKind::Every
        }
        "cron" => {
            if rest.split_whitespace().count() != 5 {
                return Err(Error::SchemaInvalid(format!(
                    "cron expression \"{rest}\" must have 5 fields"
                )));
            }
            CronKind::Cron
        }
        other => {
            return Err(Error::SchemaInvalid(format!(
                "unknown schedule kind \"{other}\" (expected at/every/cron)"
            )))
        }
    };
    Ok((kind, rest))
}

/// Parse `"500ms"`, `"1s"`, `"5m"`, `"2h"`, `"1d"` into milliseconds.
pub fn parse_duration_ms(s: &str) -> Result<u64> {
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| Error::SchemaInvalid(format!("duration \"{s}\" has no unit")))?;
    let (digits, unit) = s.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| Error::SchemaInvalid(format!("duration \"{s}\" has no magnitude")))?;
    let factor = match unit {
        "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        other => {
            return Err(Error::SchemaInvalid(format!(
                "duration unit \"{other}\" (expected ms/s/m/h/d)"
            )))
        }
    };
    value
        .checked_mul(factor)
        .filter(|&ms| ms > 0)
        .ok_or_else(|| Error::SchemaInvalid(format!("duration \"{s}\" out of range")))
}

/// Next firing after `after`, as epoch ms. `None` for a spent one-shot.
fn compute_next(kind: CronKind, expression: &str, after: DateTime<Utc>) -> Result<Option<i64>> {
    match kind {
        CronKind::At => {
            let at = DateTime::parse_from_rfc3339(expression)
                .map_err(|e| Error::SchemaInvalid(format!("at-expression: {e}")))?;
            Ok(Some(at.timestamp_millis()))
        }
        CronKind::Every => {
            let ms = parse_duration_ms(expression)?;
            Ok(Some(after.timestamp_millis() + ms as i64))
        }
        CronKind::Cron => Ok(cron_next(expression, &after).map(|t| t.timestamp_millis())),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 5-field cron evaluation (minute hour dom month dow)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse a cron field and check if a value matches.
fn cron_field_matches(field: &str, value: u32) -> bool {
    if field == "*" {
        return true;
    }
    // Handle */N (every N)
    if let Some(step) = field.strip_prefix("*/") {
        if let Ok(n) = step.parse::<u32>() {
            return n > 0 && value % n == 0;
        }
    }
    // Handle comma-separated values
    for part in field.split(',') {
        // Handle range N-M
        if let Some((start_s, end_s)) = part.split_once('-') {
            if let (Ok(start), Ok(end)) = (start_s.parse::<u32>(), end_s.parse::<u32>()) {
                if value >= start && value <= end {
                    return true;
                }
            }
        } else if let Ok(n) = part.parse::<u32>() {
            if value == n {
                return true;
            }
        }
    }
    false
}

/// Check if a UTC datetime matches a 5-field cron expression.
pub fn cron_matches(cron: &str, dt: &DateTime<Utc>) -> bool {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    if fields.len() != 5 {
        return false;
    }
    cron_field_matches(fields[0], dt.minute())
        && cron_field_matches(fields[1], dt.hour())
        && cron_field_matches(fields[2], dt.day())
        && cron_field_matches(fields[3], dt.month())
        && cron_field_matches(fields[4], dt.weekday().num_days_from_sunday())
}

/// Compute the next occurrence after `after`, scanning minute by minute
/// for up to a year.
pub fn cron_next(cron: &str, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    let next_min_secs = 60 - after.second() as i64;
    let mut candidate = (*after + Duration::seconds(next_min_secs))
        .with_second(0)
        .unwrap_or(*after)
        .with_nanosecond(0)
        .unwrap_or(*after);

    let max_checks = 366 * 24 * 60;
    for _ in 0..max_checks {
        if cron_matches(cron, &candidate) {
            return Some(candidate);
        }
        candidate += Duration::minutes(1);
    }
    None
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Service
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default, Serialize, Deserialize)]
struct CronStateFile {
    jobs: Vec<CronJob>,
}

struct Inner {
    path: PathBuf,
    config: AutonomyConfig,
    jobs: Mutex<HashMap<String, CronJob>>,
    in_flight: Mutex<HashSet<String>>,
    running: AtomicUsize,
}

#[derive(Clone)]
pub struct CronService {
    inner: Arc<Inner>,
}

impl CronService {
    /// Open the service, loading any persisted jobs from `path`.
    pub fn open(path: PathBuf, config: AutonomyConfig) -> Result<Self> {
        let state: CronStateFile = load_json(&path)?.unwrap_or_default();
        let jobs = state.jobs.into_iter().map(|j| (j.id.clone(), j)).collect();
        Ok(Self {
            inner: Arc::new(Inner {
                path,
                config,
                jobs: Mutex::new(jobs),
                in_flight: Mutex::new(HashSet::new()),
                running: AtomicUsize::new(0),
            }),
        })
    }

    pub fn add(&self, job: CronJob) -> Result<()> {
        self.inner.jobs.lock().insert(job.id.clone(), job);
        self.flush()
    }

    pub fn remove(&self, id: &str) -> Result<bool> {
        let removed = self.inner.jobs.lock().remove(id).is_some();
        if removed {
            self.flush()?;
        }
        Ok(removed)
    }

    pub fn list(&self) -> Vec<CronJob> {
        let mut jobs: Vec<CronJob> = self.inner.jobs.lock().values().cloned().collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        jobs
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.running.load(Ordering::Relaxed)
    }

    /// Fire every due job. Runs are spawned; `tick` returns immediately.
    ///
    /// Isolated jobs are skipped while a previous run of the same id is in
    /// flight; the global `max_concurrent_runs` cap bounds everything else.
    pub fn tick(&self, now: DateTime<Utc>, runner: &CronRunner) {
        let now_ms = now.timestamp_millis();
        let mut due: Vec<CronJob> = Vec::new();

        {
            let mut jobs = self.inner.jobs.lock();
            let in_flight = self.inner.in_flight.lock();
            let mut slots = self
                .inner
                .config
                .max_concurrent_runs
                .saturating_sub(self.inner.running.load(Ordering::Relaxed));

            for job in jobs.values_mut() {
                if slots == 0 {
                    break;
                }
                let Some(next) = job.next_run_at else { continue };
                if next > now_ms {
                    continue;
                }
                if job.isolated && in_flight.contains(&job.id) {
                    continue;
                }
                // Advance the schedule at fire time so a slow run does not
                // retrigger on every tick.
                job.next_run_at = match job.kind {
                    CronKind::At => None,
                    _ => compute_next(job.kind, &job.expression, now).ok().flatten(),
                };
                due.push(job.clone());
                slots -= 1;
            }
        }

        if due.is_empty() {
            return;
        }

        for job in due {
            self.inner.in_flight.lock().insert(job.id.clone());
            self.inner.running.fetch_add(1, Ordering::Relaxed);

            TraceEvent::CronFired {
                job_id: job.id.clone(),
                attempt: job.attempts,
            }
            .emit();

            let service = self.clone();
            let fut = runner(job.clone());
            tokio::spawn(async move {
                let outcome = fut.await;
                service.complete_run(job.id, outcome);
            });
        }

        if let Err(e) = self.flush() {
            tracing::warn!(error = %e, "failed to persist cron state after tick");
        }
    }

    fn complete_run(&self, id: String, outcome: Result<()>) {
        let now = Utc::now();
        {
            let mut jobs = self.inner.jobs.lock();
            if let Some(job) = jobs.get_mut(&id) {
                match outcome {
                    Ok(()) => {
                        job.attempts = 0;
                        job.last_error = None;
                        if job.kind == CronKind::At {
                            jobs.remove(&id);
                        }
                    }
                    Err(e) => {
                        job.attempts += 1;
                        job.last_error = Some(e.to_string());
                        if job.attempts <= job.max_retries {
                            let delay = backoff_delay_ms(job.backoff_ms, job.attempts);
                            job.next_run_at = Some(now.timestamp_millis() + delay as i64);
                            TraceEvent::CronBackoff {
                                job_id: id.clone(),
                                attempt: job.attempts,
                                delay_ms: delay,
                            }
                            .emit();
                        } else {
                            // Give up on this occurrence.
                            job.attempts = 0;
                            match job.kind {
                                CronKind::At => {
                                    jobs.remove(&id);
                                }
                                _ => {
                                    job.next_run_at = compute_next(job.kind, &job.expression, now)
                                        .ok()
                                        .flatten();
                                }
                            }
                        }
                    }
                }
            }
        }

        self.inner.in_flight.lock().remove(&id);
        self.inner.running.fetch_sub(1, Ordering::Relaxed);

        if let Err(e) = self.flush() {
            tracing::warn!(error = %e, "failed to persist cron state after run");
        }
    }

    fn flush(&self) -> Result<()> {
        let jobs = self.list();
        save_json(&self.inner.path, &CronStateFile { jobs })
    }
}

/// `backoff_ms * 2^(attempts-1)`, capped at [`MAX_BACKOFF_MS`].
fn backoff_delay_ms(backoff_ms: u64, attempts: u32) -> u64 {
    let exp = attempts.saturating_sub(1).min(20);
    backoff_ms
        .saturating_mul(1u64 << exp)
        .min(MAX_BACKOFF_MS)
}
