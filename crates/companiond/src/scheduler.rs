//! Scheduled task manager: a small whitelist-only expression grammar (no
//! code evaluation), a job model, and a pump the heartbeat calls each tick.

use std::collections::HashMap;
use std::sync::OnceLock;
use tokio::sync::Mutex;

use regex::Regex;

use crate::config::ScheduledTaskConfig;

/// Action handlers are synchronous closures returning an optional message
/// for the caller to surface; failures are carried in the job's `last_error`
/// without aborting the rest of the pump.
pub type ActionHandler = Box<dyn Fn() -> Result<Option<String>, String> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Second,
    Minute,
    Hour,
    Day,
    Weekday(chrono::Weekday),
}

#[derive(Debug, Clone)]
struct ParsedSchedule {
    interval: i64,
    unit: Unit,
    at: Option<(u32, u32)>,
}

/// Parses the whitelist grammar `every(N).unit[.at('HH:MM')]`. Anything
/// outside this grammar — in particular arbitrary code — is rejected.
fn parse_schedule(expr: &str) -> Result<ParsedSchedule, String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^every\((\d*)\)\.([A-Za-z]+)(?:\.at\('(\d{1,2}:\d{2})'\))?$").unwrap());

    let captures = re.captures(expr.trim()).ok_or_else(|| format!("schedule expression '{expr}' is not a recognized form"))?;

    let interval: i64 = captures.get(1).map(|m| m.as_str()).filter(|s| !s.is_empty()).map(|s| s.parse().unwrap_or(1)).unwrap_or(1);
    let unit_str = captures.get(2).unwrap().as_str().to_lowercase();

    let unit = match unit_str.as_str() {
        "second" | "seconds" => Unit::Second,
        "minute" | "minutes" => Unit::Minute,
        "hour" | "hours" => Unit::Hour,
        "day" | "days" => Unit::Day,
        "monday" => Unit::Weekday(chrono::Weekday::Mon),
        "tuesday" => Unit::Weekday(chrono::Weekday::Tue),
        "wednesday" => Unit::Weekday(chrono::Weekday::Wed),
        "thursday" => Unit::Weekday(chrono::Weekday::Thu),
        "friday" => Unit::Weekday(chrono::Weekday::Fri),
        "saturday" => Unit::Weekday(chrono::Weekday::Sat),
        "sunday" => Unit::Weekday(chrono::Weekday::Sun),
        other => return Err(format!("unrecognized schedule unit '{other}'")),
    };

    let at = captures
        .get(3)
        .map(|m| {
            let (h, m_) = m.as_str().split_once(':').unwrap();
            (h.parse::<u32>().unwrap_or(0), m_.parse::<u32>().unwrap_or(0))
        })
        .filter(|(h, m)| *h < 24 && *m < 60);

    if captures.get(3).is_some() && at.is_none() {
        return Err(format!("invalid time-of-day in schedule expression '{expr}'"));
    }
    if interval == 0 {
        return Err(format!("schedule interval must be at least 1 in '{expr}'"));
    }

    Ok(ParsedSchedule { interval, unit, at })
}

fn next_run_after(schedule: &ParsedSchedule, now: i64) -> i64 {
    match schedule.unit {
        Unit::Second => now + schedule.interval,
        Unit::Minute => now + schedule.interval * 60,
        Unit::Hour => now + schedule.interval * 3600,
        Unit::Day => {
            if let Some((hour, minute)) = schedule.at {
                next_daily_at(now, hour, minute, schedule.interval)
            } else {
                now + schedule.interval * 86_400
            }
        }
        Unit::Weekday(target) => next_weekly_at(now, target, schedule.at.unwrap_or((0, 0)), schedule.interval),
    }
}

fn next_daily_at(now: i64, hour: u32, minute: u32, interval_days: i64) -> i64 {
    let now_dt = chrono::DateTime::from_timestamp(now, 0).unwrap_or_default();
    let today_at = now_dt.date_naive().and_hms_opt(hour, minute, 0).unwrap().and_utc().timestamp();
    if today_at > now {
        today_at
    } else {
        today_at + interval_days * 86_400
    }
}

fn next_weekly_at(now: i64, target: chrono::Weekday, at: (u32, u32), interval_weeks: i64) -> i64 {
    let now_dt = chrono::DateTime::from_timestamp(now, 0).unwrap_or_default();
    let current_weekday = now_dt.weekday();
    let mut days_ahead = (target.num_days_from_monday() as i64 - current_weekday.num_days_from_monday() as i64).rem_euclid(7);

    let candidate = now_dt.date_naive() + chrono::Duration::days(days_ahead);
    let candidate_ts = candidate.and_hms_opt(at.0, at.1, 0).unwrap().and_utc().timestamp();
    if days_ahead == 0 && candidate_ts <= now {
        days_ahead += 7 * interval_weeks.max(1);
    } else if interval_weeks > 1 {
        days_ahead += 7 * (interval_weeks - 1);
    }

    let candidate = now_dt.date_naive() + chrono::Duration::days(days_ahead);
    candidate.and_hms_opt(at.0, at.1, 0).unwrap().and_utc().timestamp()
}

#[derive(Debug, Clone)]
pub struct JobStatus {
    pub name: String,
    pub enabled: bool,
    pub last_run: Option<i64>,
    pub run_count: u64,
    pub last_error: Option<String>,
    pub next_run_ts: i64,
}

struct Job {
    name: String,
    schedule: ParsedSchedule,
    action: String,
    enabled: bool,
    last_run: Option<i64>,
    run_count: u64,
    last_error: Option<String>,
    next_run_ts: i64,
}

/// Owns the job list and the action registry, dispatched from the heartbeat
/// tick via [`Scheduler::run_pending`].
pub struct Scheduler {
    jobs: Mutex<Vec<Job>>,
    actions: HashMap<String, ActionHandler>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self { jobs: Mutex::new(Vec::new()), actions: HashMap::new() }
    }

    pub fn register_action(&mut self, name: impl Into<String>, handler: ActionHandler) {
        self.actions.insert(name.into(), handler);
    }

    /// Loads jobs from configured task entries. An entry whose schedule
    /// fails to parse, or whose action isn't registered, is logged and
    /// skipped rather than failing the whole load.
    pub async fn load_tasks(&self, tasks: &[ScheduledTaskConfig]) {
        let mut jobs = self.jobs.lock().await;
        let now = chrono::Utc::now().timestamp();

        for task in tasks {
            let schedule = match parse_schedule(&task.schedule) {
                Ok(schedule) => schedule,
                Err(e) => {
                    tracing::warn!("scheduled task '{}' has an invalid schedule: {e}", task.name);
                    continue;
                }
            };
            if !self.actions.contains_key(&task.action) {
                tracing::warn!("scheduled task '{}' references unknown action '{}'", task.name, task.action);
                continue;
            }
            jobs.push(Job { name: task.name.clone(), schedule, action: task.action.clone(), enabled: task.enabled, last_run: None, run_count: 0, last_error: None, next_run_ts: now });
        }
    }

    /// Runs every enabled job whose `next_run_ts` has arrived. A job whose
    /// action errors records `last_error` and keeps going — the pump never
    /// aborts partway through.
    pub async fn run_pending(&self) {
        let now = chrono::Utc::now().timestamp();
        let mut jobs = self.jobs.lock().await;

        for job in jobs.iter_mut() {
            if !job.enabled || job.next_run_ts > now {
                continue;
            }

            let outcome = match self.actions.get(&job.action) {
                Some(handler) => handler(),
                None => Err(format!("action '{}' is no longer registered", job.action)),
            };

            match outcome {
                Ok(_) => job.last_error = None,
                Err(e) => {
                    tracing::warn!("scheduled job '{}' failed: {e}", job.name);
                    job.last_error = Some(e);
                }
            }

            job.last_run = Some(now);
            job.run_count += 1;
            job.next_run_ts = next_run_after(&job.schedule, now);
        }
    }

    pub async fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.iter_mut().find(|j| j.name == name) {
            job.enabled = enabled;
            true
        } else {
            false
        }
    }

    pub async fn status(&self) -> Vec<JobStatus> {
        let jobs = self.jobs.lock().await;
        jobs.iter()
            .map(|j| JobStatus { name: j.name.clone(), enabled: j.enabled, last_run: j.last_run, run_count: j.run_count, last_error: j.last_error.clone(), next_run_ts: j.next_run_ts })
            .collect()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_interval_forms() {
        assert!(parse_schedule("every(5).minutes").is_ok());
        assert!(parse_schedule("every().hours").is_ok());
        assert!(parse_schedule("every(1).day.at('09:30')").is_ok());
        assert!(parse_schedule("every(2).monday").is_ok());
    }

    #[test]
    fn rejects_anything_outside_the_grammar() {
        assert!(parse_schedule("os.system('rm -rf /')").is_err());
        assert!(parse_schedule("every(5).fortnights").is_err());
        assert!(parse_schedule("every(5).day.at('25:99')").is_err());
        assert!(parse_schedule("every(0).minutes").is_err());
    }

    #[tokio::test]
    async fn disabled_job_never_runs() {
        let mut scheduler = Scheduler::new();
        scheduler.register_action("noop", Box::new(|| Ok(None)));
        scheduler
            .load_tasks(&[ScheduledTaskConfig { name: "t".to_string(), schedule: "every(1).seconds".to_string(), action: "noop".to_string(), enabled: false }])
            .await;
        scheduler.run_pending().await;
        let status = scheduler.status().await;
        assert_eq!(status[0].run_count, 0);
    }

    #[tokio::test]
    async fn failing_action_records_last_error_and_keeps_pumping() {
        let mut scheduler = Scheduler::new();
        scheduler.register_action("boom", Box::new(|| Err("kaboom".to_string())));
        scheduler
            .load_tasks(&[ScheduledTaskConfig { name: "t".to_string(), schedule: "every(1).seconds".to_string(), action: "boom".to_string(), enabled: true }])
            .await;

        // next_run_ts is "now" at load time, so it should be eligible immediately.
        scheduler.run_pending().await;
        let status = scheduler.status().await;
        assert_eq!(status[0].run_count, 1);
        assert_eq!(status[0].last_error.as_deref(), Some("kaboom"));
    }

    #[tokio::test]
    async fn unknown_action_is_skipped_at_load() {
        let scheduler = Scheduler::new();
        scheduler
            .load_tasks(&[ScheduledTaskConfig { name: "t".to_string(), schedule: "every(1).seconds".to_string(), action: "missing".to_string(), enabled: true }])
            .await;
        assert!(scheduler.status().await.is_empty());
    }
}
