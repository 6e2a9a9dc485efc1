//! The companion's persistent personality: traits, mood and progression
//! wired together with the event methods that drive state transitions.
//!
//! A fan-in event bus: every other component calls one of the `on_*` methods
//! rather than mutating mood or XP directly, and mood/level-up listeners are
//! fanned back out to whoever registered interest.

use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use crate::mood::{Mood, MoodState};
use crate::persistence::{load_json_or_default, save_json_atomic};
use crate::progression::{ChatQuality, Progression, XpSource};

/// Six clamped scalar traits that color tone and behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PersonalityTraits {
    pub curiosity: f32,
    pub cheerfulness: f32,
    pub verbosity: f32,
    pub playfulness: f32,
    pub empathy: f32,
    pub independence: f32,
}

impl Default for PersonalityTraits {
    fn default() -> Self {
        Self {
            curiosity: 0.7,
            cheerfulness: 0.6,
            verbosity: 0.5,
            playfulness: 0.6,
            empathy: 0.7,
            independence: 0.4,
        }
    }
}

impl PersonalityTraits {
    fn clamp_all(&mut self) {
        self.curiosity = self.curiosity.clamp(0.0, 1.0);
        self.cheerfulness = self.cheerfulness.clamp(0.0, 1.0);
        self.verbosity = self.verbosity.clamp(0.0, 1.0);
        self.playfulness = self.playfulness.clamp(0.0, 1.0);
        self.empathy = self.empathy.clamp(0.0, 1.0);
        self.independence = self.independence.clamp(0.0, 1.0);
    }
}

/// Generic social interaction categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocialEvent {
    Greeting,
    ThanksReceived,
    TaskShared,
    ReminderAcknowledged,
}

/// Coarse task-priority bucket used by [`Personality::on_task_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Urgent,
}

/// Outcome of a task-related event: XP granted plus an optional celebration
/// line a front-end may choose to surface.
#[derive(Debug, Clone, Default)]
pub struct TaskEventResult {
    pub xp_awarded: i64,
    pub message: Option<String>,
}

/// Top-level persistent personality: name, traits, mood, progression and a
/// rolling interaction log. Mood-change and level-up callbacks are NOT
/// serialized — they are re-registered by the owning controller on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Personality {
    pub name: String,
    pub traits: PersonalityTraits,
    pub mood: MoodState,
    pub progression: Progression,
    pub interaction_count: u64,
    pub last_interaction_ts: i64,
    pub last_thought: Option<String>,
    pub last_thought_ts: Option<i64>,
    pub battery_hint: Option<String>,

    /// Per-minute intensity decay rate used by [`Self::update`].
    pub mood_decay_rate: f32,

    #[serde(skip)]
    state_path: Option<PathBuf>,
    #[serde(skip)]
    on_mood_change: Vec<Box<dyn Fn(Mood, Mood) + Send + Sync>>,
    #[serde(skip)]
    on_level_up: Vec<Box<dyn Fn(i64, i64) + Send + Sync>>,
}

impl Default for Personality {
    fn default() -> Self {
        Self {
            name: "Companion".to_string(),
            traits: PersonalityTraits::default(),
            mood: MoodState::default(),
            progression: Progression::default(),
            interaction_count: 0,
            last_interaction_ts: chrono::Utc::now().timestamp(),
            last_thought: None,
            last_thought_ts: None,
            battery_hint: None,
            mood_decay_rate: 0.1,
            state_path: None,
            on_mood_change: Vec::new(),
            on_level_up: Vec::new(),
        }
    }
}

impl Personality {
    pub fn load(path: &Path) -> Self {
        let mut personality: Personality = load_json_or_default(path);
        personality.traits.clamp_all();
        personality.state_path = Some(path.to_path_buf());
        personality
    }

    pub fn save(&self) {
        if let Some(path) = &self.state_path {
            save_json_atomic(path, self);
        }
    }

    /// Registers a mood-change listener, invoked synchronously in
    /// registration order; a panicking listener is swallowed.
    pub fn on_mood_change(&mut self, callback: impl Fn(Mood, Mood) + Send + Sync + 'static) {
        self.on_mood_change.push(Box::new(callback));
    }

    pub fn on_level_up(&mut self, callback: impl Fn(i64, i64) + Send + Sync + 'static) {
        self.on_level_up.push(Box::new(callback));
    }

    fn notify_mood_change(&self, old: Mood, new: Mood) {
        if old == new {
            return;
        }
        for callback in &self.on_mood_change {
            let _ = catch_unwind(AssertUnwindSafe(|| callback(old, new)));
        }
    }

    fn notify_level_up(&self, old_level: i64, new_level: i64) {
        if new_level <= old_level {
            return;
        }
        for callback in &self.on_level_up {
            let _ = catch_unwind(AssertUnwindSafe(|| callback(old_level, new_level)));
        }
    }

    /// Periodic idle decay: `intensity <- max(0.1, intensity - decay_rate *
    /// minutes_idle)`, with baseline transition below 0.2 and bored/sleepy
    /// drift past the 10/30-minute thresholds.
    pub fn update(&mut self) {
        let now = chrono::Utc::now().timestamp();
        let minutes_idle = ((now - self.last_interaction_ts).max(0) as f32) / 60.0;
        let old_mood = self.mood.current;

        let decayed = (self.mood.intensity() - self.mood_decay_rate * minutes_idle).max(0.1);
        self.mood.set_intensity(decayed);

        if self.mood.intensity() < 0.2 {
            self.transition_to_baseline();
        }

        if minutes_idle > 30.0 {
            self.mood.set_mood(Mood::Sleepy, 0.6);
        } else if minutes_idle > 10.0 {
            self.mood.set_mood(Mood::Bored, 0.4);
        }

        self.notify_mood_change(old_mood, self.mood.current);
    }

    fn transition_to_baseline(&mut self) {
        let old_mood = self.mood.current;
        let new_mood = if self.traits.cheerfulness > 0.6 {
            Mood::Happy
        } else if self.traits.curiosity > 0.7 {
            Mood::Curious
        } else {
            Mood::Cool
        };

        if old_mood != new_mood {
            self.mood.set_mood(new_mood, 0.3);
        }
    }

    /// Records a chat turn: touches the interaction clock, updates the daily
    /// streak, scores the turn for XP via the positive interaction table,
    /// and notifies listeners. Returns any XP awarded.
    pub fn on_interaction(&mut self, positive: bool, prompt: Option<&str>, quality: Option<ChatQuality>) -> i64 {
        self.last_interaction_ts = chrono::Utc::now().timestamp();
        self.interaction_count += 1;
        let old_mood = self.mood.current;
        let old_level = self.progression.level;
        let mut xp_awarded = 0;

        if self.progression.update_streak() {
            let (awarded, amount) = self.progression.award_xp(XpSource::FirstOfDay, 20, None);
            if awarded {
                xp_awarded += amount;
            }
        }

        if positive {
            if let Some(quality) = quality {
                let (source, base_xp) = quality.calculate_xp();
                let (awarded, amount) = self.progression.award_xp(source, base_xp, prompt);
                if awarded {
                    xp_awarded += amount;
                }
                self.progression.check_chat_achievement(self.interaction_count);
            }

            match self.mood.current {
                Mood::Lonely => self.mood.set_mood(Mood::Grateful, 0.7),
                Mood::Bored => self.mood.set_mood(Mood::Curious, 0.6),
                Mood::Sad => self.mood.set_mood(Mood::Happy, 0.5),
                Mood::Sleepy => self.mood.set_mood(Mood::Curious, 0.5),
                _ => self.mood.adjust_intensity(0.2),
            }
        } else {
            match self.mood.current {
                Mood::Happy => self.mood.set_mood(Mood::Sad, 0.4),
                Mood::Excited => self.mood.set_mood(Mood::Bored, 0.5),
                _ => self.mood.adjust_intensity(-0.2),
            }
        }

        self.notify_level_up(old_level, self.progression.level);
        self.notify_mood_change(old_mood, self.mood.current);

        if xp_awarded > 0 {
            self.save();
        }
        xp_awarded
    }

    /// Success/failure magnitude split at 0.7/0.4 between a mood set and a
    /// plain intensity nudge.
    pub fn on_success(&mut self, magnitude: f32) {
        let old_mood = self.mood.current;
        if magnitude > 0.7 {
            self.mood.set_mood(Mood::Excited, 0.8);
        } else if magnitude > 0.4 {
            self.mood.set_mood(Mood::Happy, 0.6);
        } else {
            self.mood.adjust_intensity(0.1);
        }
        self.notify_mood_change(old_mood, self.mood.current);
    }

    pub fn on_failure(&mut self, magnitude: f32) {
        let old_mood = self.mood.current;
        if magnitude > 0.7 {
            self.mood.set_mood(Mood::Sad, 0.7);
        } else if magnitude > 0.4 {
            self.mood.set_mood(Mood::Bored, 0.5);
        } else {
            self.mood.adjust_intensity(-0.1);
        }
        self.notify_mood_change(old_mood, self.mood.current);
    }

    pub fn on_social_event(&mut self, event: SocialEvent) -> i64 {
        let old_mood = self.mood.current;
        let old_level = self.progression.level;
        let mut xp_awarded = 0;

        match event {
            SocialEvent::Greeting => {
                self.mood.set_mood(Mood::Happy, 0.6);
                let (awarded, amount) = self.progression.award_xp(XpSource::Greeting, 2, None);
                if awarded {
                    xp_awarded += amount;
                }
            }
            SocialEvent::ThanksReceived => {
                self.mood.set_mood(Mood::Grateful, 0.7);
            }
            SocialEvent::TaskShared => {
                self.mood.set_mood(Mood::Focused, 0.6);
            }
            SocialEvent::ReminderAcknowledged => {
                self.mood.adjust_intensity(0.05);
            }
        }

        self.notify_level_up(old_level, self.progression.level);
        self.notify_mood_change(old_mood, self.mood.current);
        xp_awarded
    }

    /// Awards XP for a task transition and nudges mood, using a fixed
    /// priority-to-source table.
    pub fn on_task_event(&mut self, priority: TaskPriority, completed_on_time: bool, streak_days: u32) -> TaskEventResult {
        let old_mood = self.mood.current;
        let old_level = self.progression.level;
        let mut result = TaskEventResult::default();

        let source = match priority {
            TaskPriority::Low => XpSource::TaskCompletedLow,
            TaskPriority::Medium => XpSource::TaskCompletedMedium,
            TaskPriority::High => XpSource::TaskCompletedHigh,
            TaskPriority::Urgent => XpSource::TaskCompletedUrgent,
        };
        let base = match priority {
            TaskPriority::Low => 10,
            TaskPriority::Medium => 15,
            TaskPriority::High => 25,
            TaskPriority::Urgent => 40,
        };

        let (awarded, amount) = self.progression.award_xp(source, base, None);
        if awarded {
            result.xp_awarded += amount;
        }

        if completed_on_time {
            let (awarded, amount) = self.progression.award_xp(XpSource::TaskOnTimeBonus, 10, None);
            if awarded {
                result.xp_awarded += amount;
            }
        }

        if streak_days >= 7 {
            let (awarded, amount) = self.progression.award_xp(XpSource::TaskStreak7, 30, None);
            if awarded {
                result.xp_awarded += amount;
            }
            result.message = Some(format!("{streak_days}-day streak! You're on fire."));
        } else if streak_days >= 3 {
            let (awarded, amount) = self.progression.award_xp(XpSource::TaskStreak3, 15, None);
            if awarded {
                result.xp_awarded += amount;
            }
            result.message = Some(format!("Nice, a {streak_days}-day streak going."));
        }

        if priority == TaskPriority::Urgent {
            self.mood.set_mood(Mood::Grateful, 0.8);
            result.message.get_or_insert_with(|| "Thanks for handling that urgent one.".to_string());
        } else {
            self.mood.set_mood(Mood::Happy, 0.7);
            result.message.get_or_insert_with(|| format!("Nicely done, +{} XP.", result.xp_awarded));
        }

        self.notify_level_up(old_level, self.progression.level);
        self.notify_mood_change(old_mood, self.mood.current);

        if result.xp_awarded > 0 {
            self.save();
        }
        result
    }

    /// Battery events against a fixed threshold table. Also refreshes the
    /// textual `battery_hint` used in prompt assembly.
    pub fn on_battery_status_change(&mut self, percentage: u8, is_charging: bool) {
        let old_mood = self.mood.current;

        if is_charging {
            if matches!(self.mood.current, Mood::Sleepy | Mood::Sad | Mood::Bored | Mood::Lonely) {
                self.mood.set_mood(Mood::Grateful, 0.8);
            } else if self.mood.current != Mood::Excited {
                self.mood.adjust_intensity(0.1);
            }
            self.battery_hint = Some("is currently charging and feeling refreshed".to_string());
        } else if percentage <= 10 {
            self.mood.set_mood(Mood::Sleepy, 0.9);
            self.battery_hint = Some(format!("is critically low on power ({percentage}%) and very sleepy"));
        } else if percentage <= 20 {
            self.mood.set_mood(Mood::Sad, 0.7);
            self.battery_hint = Some(format!("is running low on power ({percentage}%) and feeling drained"));
        } else if percentage <= 30 {
            if !matches!(self.mood.current, Mood::Sad | Mood::Sleepy) {
                self.mood.set_mood(Mood::Bored, 0.5);
            }
            self.battery_hint = Some(format!("has {percentage}% battery remaining"));
        } else {
            if matches!(self.mood.current, Mood::Sleepy | Mood::Sad) {
                self.mood.set_mood(Mood::Happy, 0.5);
            }
            self.battery_hint = Some(format!("has {percentage}% battery remaining and is well-powered"));
        }

        self.notify_mood_change(old_mood, self.mood.current);
    }

    pub fn set_last_thought(&mut self, thought: impl Into<String>) {
        self.last_thought = Some(thought.into());
        self.last_thought_ts = Some(chrono::Utc::now().timestamp());
    }

    /// Derived energy scalar used by front-ends: `mood.energy * intensity`.
    pub fn energy(&self) -> f32 {
        self.mood.current.energy() * self.mood.intensity()
    }

    /// Assembles the mood/trait/level fragment injected into the system
    /// prompt sent to the LLM provider.
    pub fn system_prompt_context(&self) -> String {
        let intensity_desc = if self.mood.intensity() > 0.7 {
            "very"
        } else if self.mood.intensity() > 0.4 {
            "somewhat"
        } else {
            "mildly"
        };

        let mut traits_desc = Vec::new();
        if self.traits.curiosity > 0.6 {
            traits_desc.push("naturally curious");
        }
        if self.traits.cheerfulness > 0.6 {
            traits_desc.push("generally cheerful");
        }
        if self.traits.playfulness > 0.6 {
            traits_desc.push("playful");
        }
        if self.traits.empathy > 0.6 {
            traits_desc.push("empathetic");
        }
        let traits_str = if traits_desc.is_empty() { "balanced".to_string() } else { traits_desc.join(", ") };

        let mut context = format!(
            "You are {}, an AI companion living on a small e-ink device. You are {traits_str}. \
             Right now you're {intensity_desc} {}. You are level {} with {} total XP. ",
            self.name,
            self.mood.current.description(),
            self.progression.display_level(),
            self.progression.xp,
        );

        if let Some(hint) = &self.battery_hint {
            context.push_str(&format!("Your current battery status {hint}. "));
        }

        context.push_str("Keep responses brief to fit the small display.");
        context
    }

    pub fn status_line(&self) -> &'static str {
        self.mood.current.face()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_atomic_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("personality.json");

        let mut p = Personality::load(&path);
        p.name = "Pixel".to_string();
        p.on_success(0.8);
        p.save();

        let reloaded = Personality::load(&path);
        assert_eq!(reloaded.name, "Pixel");
        assert_eq!(reloaded.mood.current, Mood::Excited);
    }

    #[test]
    fn update_decays_intensity_but_never_below_floor() {
        let mut p = Personality::default();
        p.mood.set_intensity(0.9);
        p.last_interaction_ts = chrono::Utc::now().timestamp() - 300;
        p.update();
        assert!(p.mood.intensity() >= 0.1);
        assert!(p.mood.intensity() < 0.9);
    }

    #[test]
    fn long_idle_drifts_to_sleepy() {
        let mut p = Personality::default();
        p.last_interaction_ts = chrono::Utc::now().timestamp() - 31 * 60;
        p.update();
        assert_eq!(p.mood.current, Mood::Sleepy);
    }

    #[test]
    fn positive_interaction_from_lonely_becomes_grateful() {
        let mut p = Personality::default();
        p.mood.set_mood(Mood::Lonely, 0.5);
        p.on_interaction(true, None, None);
        assert_eq!(p.mood.current, Mood::Grateful);
    }

    #[test]
    fn negative_interaction_from_happy_becomes_sad() {
        let mut p = Personality::default();
        p.mood.set_mood(Mood::Happy, 0.5);
        p.on_interaction(false, None, None);
        assert_eq!(p.mood.current, Mood::Sad);
    }

    #[test]
    fn task_event_awards_priority_scaled_xp() {
        let mut p = Personality::default();
        let xp_before = p.progression.xp;
        let result = p.on_task_event(TaskPriority::Urgent, true, 0);
        assert!(p.progression.xp > xp_before);
        assert!(result.xp_awarded > 0);
    }

    #[test]
    fn battery_critical_sets_sleepy() {
        let mut p = Personality::default();
        p.on_battery_status_change(5, false);
        assert_eq!(p.mood.current, Mood::Sleepy);
        assert!(p.battery_hint.as_ref().unwrap().contains("critically low"));
    }

    #[test]
    fn mood_change_callback_fires_in_order() {
        use std::sync::{Arc, Mutex};

        let log = Arc::new(Mutex::new(Vec::new()));
        let mut p = Personality::default();

        let log_clone = log.clone();
        p.on_mood_change(move |old, new| log_clone.lock().unwrap().push((old, new)));

        p.on_success(0.9);
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn system_prompt_context_mentions_name_and_level() {
        let mut p = Personality::default();
        p.name = "Orbit".to_string();
        let ctx = p.system_prompt_context();
        assert!(ctx.contains("Orbit"));
        assert!(ctx.contains("L1"));
    }
}
