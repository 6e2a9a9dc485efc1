//! The single cooperative tick loop: mood decay, scheduled tasks, proactive
//! behaviors, and autonomous thought, none of it overlapping with itself.

use chrono::Timelike;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use companion_core::{Mood, Personality, TaskStore};
use tokio::sync::Mutex;

use crate::brain::Brain;
use crate::config::HeartbeatConfig;
use crate::display::DisplaySink;
use crate::scheduler::Scheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BehaviorKind {
    Mood,
    Time,
    Social,
    Maintenance,
}

struct Behavior {
    name: &'static str,
    kind: BehaviorKind,
    probability: f64,
    cooldown_seconds: i64,
    last_triggered_ts: Option<i64>,
}

impl Behavior {
    fn new(name: &'static str, kind: BehaviorKind, probability: f64, cooldown_seconds: i64) -> Self {
        Self { name, kind, probability, cooldown_seconds, last_triggered_ts: None }
    }

    fn off_cooldown(&self, now: i64) -> bool {
        match self.last_triggered_ts {
            Some(last) => now - last >= self.cooldown_seconds,
            None => true,
        }
    }
}

struct BatterySnapshot {
    percentage: u8,
    is_charging: bool,
}

/// Reports the device's current battery state each tick; `None` means the
/// device has no battery to report (e.g. mains-powered).
pub type BatterySampler = dyn Fn() -> Option<(u8, bool)> + Send + Sync;

pub struct Heartbeat {
    personality: Arc<Mutex<Personality>>,
    brain: Option<Arc<Brain>>,
    scheduler: Option<Arc<Scheduler>>,
    tasks: Option<Arc<TaskStore>>,
    display: Arc<dyn DisplaySink>,
    battery_sampler: Option<Box<BatterySampler>>,
    config: HeartbeatConfig,
    behaviors: Mutex<Vec<Behavior>>,
    last_battery: Mutex<Option<BatterySnapshot>>,
    next_thought_ts: AtomicI64,
    running: AtomicBool,
    tick_count: AtomicU64,
    focus_quiet_mode: AtomicBool,
}

impl Heartbeat {
    pub fn new(
        personality: Arc<Mutex<Personality>>,
        brain: Option<Arc<Brain>>,
        scheduler: Option<Arc<Scheduler>>,
        tasks: Option<Arc<TaskStore>>,
        display: Arc<dyn DisplaySink>,
        battery_sampler: Option<Box<BatterySampler>>,
        config: HeartbeatConfig,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        let next_thought = now + rand::thread_rng().gen_range(config.thought_interval_min_minutes..=config.thought_interval_max_minutes) as i64 * 60;

        let behaviors = vec![
            Behavior::new("share_a_thought", BehaviorKind::Mood, 0.3, 1800),
            Behavior::new("express_boredom", BehaviorKind::Mood, 0.4, 1200),
            Behavior::new("sleepy_yawn", BehaviorKind::Mood, 0.3, 1800),
            Behavior::new("good_morning", BehaviorKind::Time, 0.5, 18_000),
            Behavior::new("evening_wind_down", BehaviorKind::Time, 0.4, 18_000),
            Behavior::new("check_in", BehaviorKind::Social, 0.15, 7200),
            Behavior::new("memory_cleanup", BehaviorKind::Maintenance, 1.0, 86_400),
            Behavior::new("task_reminder_scan", BehaviorKind::Maintenance, 1.0, 3600),
        ];

        Self {
            personality,
            brain,
            scheduler,
            tasks,
            display,
            battery_sampler,
            config,
            behaviors: Mutex::new(behaviors),
            last_battery: Mutex::new(None),
            next_thought_ts: AtomicI64::new(next_thought),
            running: AtomicBool::new(true),
            tick_count: AtomicU64::new(0),
            focus_quiet_mode: AtomicBool::new(false),
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn set_focus_quiet_mode(&self, active: bool) {
        self.focus_quiet_mode.store(active, Ordering::SeqCst);
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count.load(Ordering::SeqCst)
    }

    /// Runs `tick()` then sleeps `tick_interval` seconds, until [`Self::stop`]
    /// is called. Each tick runs to completion before the next begins.
    pub async fn run(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            self.tick().await;
            tokio::time::sleep(Duration::from_secs(self.config.tick_interval)).await;
        }
    }

    /// One non-reentrant pass: mood update, battery mood update, personality
    /// decay persistence, screensaver check, scheduled-task pump, proactive
    /// behaviors, autonomous thought, then battery-edge bookkeeping.
    async fn tick(&self) {
        self.tick_count.fetch_add(1, Ordering::SeqCst);
        let now = chrono::Utc::now().timestamp();

        {
            let mut personality = self.personality.lock().await;
            personality.update();
            personality.save();
        }

        let current_battery = if self.config.enable_battery_behaviors { self.sample_battery().await } else { None };
        if let Some((percentage, charging)) = current_battery {
            let previous = self.last_battery.lock().await;
            let edge_message = battery_edge_message(previous.as_ref(), percentage, charging, self.config.battery_full_threshold);
            drop(previous);

            let mut personality = self.personality.lock().await;
            personality.on_battery_status_change(percentage, charging);
            personality.save();
            let mood = personality.mood.current;
            drop(personality);

            if let Some(text) = edge_message {
                self.display.update(mood.face(), Some(&text), None, None, false).await;
            }
        }

        if self.display.should_activate_screensaver().await {
            self.display.start_screensaver().await;
        } else {
            self.display.stop_screensaver().await;
        }

        if let Some(scheduler) = &self.scheduler {
            scheduler.run_pending().await;
        }

        let quiet = self.in_quiet_hours(now);
        self.run_behaviors(now, quiet).await;

        if !quiet {
            self.maybe_generate_thought(now).await;
        }

        if let Some((percentage, charging)) = current_battery {
            let mut last = self.last_battery.lock().await;
            *last = Some(BatterySnapshot { percentage, is_charging: charging });
        }
    }

    async fn sample_battery(&self) -> Option<(u8, bool)> {
        self.battery_sampler.as_ref().and_then(|sampler| sampler())
    }

    fn in_quiet_hours(&self, now: i64) -> bool {
        let hour = chrono::DateTime::from_timestamp(now, 0).map(|dt| dt.hour()).unwrap_or(0);
        let start = self.config.quiet_hours_start;
        let end = self.config.quiet_hours_end;
        if start == end {
            false
        } else if start < end {
            hour >= start && hour < end
        } else {
            hour >= start || hour < end
        }
    }

    async fn run_behaviors(&self, now: i64, quiet: bool) {
        let focus_quiet = self.focus_quiet_mode.load(Ordering::SeqCst);
        let mood = self.personality.lock().await.mood.current;
        let hour = chrono::DateTime::from_timestamp(now, 0).map(|dt| dt.time().hour()).unwrap_or(0);

        let mut behaviors = self.behaviors.lock().await;
        for behavior in behaviors.iter_mut() {
            if quiet && behavior.kind != BehaviorKind::Maintenance {
                continue;
            }
            if focus_quiet && behavior.kind != BehaviorKind::Maintenance {
                continue;
            }
            if !self.type_enabled(behavior.kind) {
                continue;
            }
            if !behavior.off_cooldown(now) {
                continue;
            }
            match behavior.kind {
                BehaviorKind::Mood if !mood_allows(behavior.name, mood) => continue,
                BehaviorKind::Time if !time_allows(behavior.name, hour) => continue,
                _ => {}
            }
            if rand::thread_rng().gen::<f64>() >= behavior.probability {
                continue;
            }

            let message = match self.run_behavior_handler(behavior.name, mood).await {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!("heartbeat behavior '{}' failed: {e}", behavior.name);
                    continue;
                }
            };
            behavior.last_triggered_ts = Some(now);

            if let Some(text) = message {
                if !text.is_empty() {
                    self.display.update(mood.face(), Some(&text), None, None, false).await;
                }
            }
        }
    }

    fn type_enabled(&self, kind: BehaviorKind) -> bool {
        match kind {
            BehaviorKind::Mood => self.config.enable_mood_behaviors,
            BehaviorKind::Time => self.config.enable_time_behaviors,
            BehaviorKind::Social => self.config.enable_social_behaviors,
            BehaviorKind::Maintenance => self.config.enable_maintenance_behaviors,
        }
    }

    async fn run_behavior_handler(&self, name: &str, mood: Mood) -> Result<Option<String>, String> {
        match name {
            "share_a_thought" => Ok(Some(format!("I'm feeling {} right now.", mood.description()))),
            "express_boredom" => Ok(Some("Anything interesting going on? I could use some stimulation.".to_string())),
            "sleepy_yawn" => Ok(Some("*yawn* getting a little sleepy over here.".to_string())),
            "good_morning" => Ok(Some("Good morning! Ready when you are.".to_string())),
            "evening_wind_down" => Ok(Some("Winding down for the evening.".to_string())),
            "check_in" => Ok(Some("Just checking in — how's it going?".to_string())),
            "memory_cleanup" => {
                // No-op unless the caller wires a memory store through the Brain;
                // scheduled forget_old runs via the scheduler's maintenance action.
                Ok(None)
            }
            "task_reminder_scan" => self.scan_overdue_tasks().await,
            _ => Ok(None),
        }
    }

    async fn scan_overdue_tasks(&self) -> Result<Option<String>, String> {
        let Some(tasks) = &self.tasks else { return Ok(None) };
        let overdue = tasks.get_overdue_tasks().map_err(|e| e.to_string())?;
        if overdue.is_empty() {
            return Ok(None);
        }
        Ok(Some(format!("You have {} overdue task(s), including \"{}\".", overdue.len(), overdue[0].title)))
    }

    async fn maybe_generate_thought(&self, now: i64) {
        if now < self.next_thought_ts.load(Ordering::SeqCst) {
            return;
        }
        self.schedule_next_thought(now);

        let Some(brain) = &self.brain else { return };
        let result = brain.think("Share one brief thought about how you're feeling right now.", "Respond with a single short sentence, nothing more.", 1, false, 0, None).await;

        let Ok(result) = result else {
            tracing::debug!("autonomous thought generation skipped: provider unavailable");
            return;
        };

        let sanitized = crate::brain::error::sanitize(&result.content);
        tracing::info!(thought = %sanitized, "autonomous thought");

        {
            let mut personality = self.personality.lock().await;
            personality.set_last_thought(sanitized.clone());
            personality.save();
        }

        if rand::thread_rng().gen::<f64>() < self.config.thought_surface_probability {
            let mood = self.personality.lock().await.mood.current;
            self.display.update(mood.face(), Some(&sanitized), None, None, false).await;
        }
    }

    fn schedule_next_thought(&self, now: i64) {
        let min = self.config.thought_interval_min_minutes.max(1);
        let max = self.config.thought_interval_max_minutes.max(min);
        let delta_minutes = rand::thread_rng().gen_range(min..=max);
        self.next_thought_ts.store(now + delta_minutes as i64 * 60, Ordering::SeqCst);
    }
}

/// One-shot messages for state transitions a plain threshold check would
/// otherwise repeat every tick: charging just started/stopped, or battery
/// just crossed the full threshold.
fn battery_edge_message(previous: Option<&BatterySnapshot>, percentage: u8, charging: bool, full_threshold: u8) -> Option<String> {
    let Some(previous) = previous else { return None };

    if charging && !previous.is_charging {
        Some("Plugged in and charging now.".to_string())
    } else if !charging && previous.is_charging {
        Some("Unplugged — running on battery again.".to_string())
    } else if percentage >= full_threshold && previous.percentage < full_threshold {
        Some("Battery's topped up now.".to_string())
    } else {
        None
    }
}

fn mood_allows(behavior_name: &str, mood: Mood) -> bool {
    match behavior_name {
        "share_a_thought" => matches!(mood, Mood::Curious | Mood::Excited | Mood::Playful),
        "express_boredom" => matches!(mood, Mood::Bored),
        "sleepy_yawn" => matches!(mood, Mood::Sleepy),
        _ => true,
    }
}

fn time_allows(behavior_name: &str, hour: u32) -> bool {
    match behavior_name {
        "good_morning" => (7..10).contains(&hour),
        "evening_wind_down" => (21..23).contains(&hour),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::NullDisplay;
    use companion_core::Personality;

    fn heartbeat_with(config: HeartbeatConfig) -> Heartbeat {
        Heartbeat::new(Arc::new(Mutex::new(Personality::default())), None, None, None, Arc::new(NullDisplay), None, config)
    }

    #[test]
    fn quiet_hours_wraps_past_midnight() {
        let mut config = HeartbeatConfig::default();
        config.quiet_hours_start = 23;
        config.quiet_hours_end = 7;
        let heartbeat = heartbeat_with(config);

        let ts_at = |hour: u32| chrono::Utc::now().date_naive().and_hms_opt(hour, 0, 0).unwrap().and_utc().timestamp();
        assert!(heartbeat.in_quiet_hours(ts_at(2)));
        assert!(heartbeat.in_quiet_hours(ts_at(23)));
        assert!(!heartbeat.in_quiet_hours(ts_at(12)));
    }

    #[test]
    fn quiet_hours_disabled_when_equal() {
        let mut config = HeartbeatConfig::default();
        config.quiet_hours_start = 5;
        config.quiet_hours_end = 5;
        let heartbeat = heartbeat_with(config);
        assert!(!heartbeat.in_quiet_hours(chrono::Utc::now().timestamp()));
    }

    #[test]
    fn mood_gating_matches_fixed_table() {
        assert!(mood_allows("express_boredom", Mood::Bored));
        assert!(!mood_allows("express_boredom", Mood::Happy));
    }

    #[test]
    fn time_gating_matches_fixed_windows() {
        assert!(time_allows("good_morning", 8));
        assert!(!time_allows("good_morning", 15));
        assert!(time_allows("evening_wind_down", 22));
    }

    #[tokio::test]
    async fn tick_runs_without_brain_or_scheduler() {
        let heartbeat = heartbeat_with(HeartbeatConfig::default());
        heartbeat.tick().await;
        assert_eq!(heartbeat.tick_count(), 1);
    }
}
