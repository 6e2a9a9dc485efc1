//! Mood state machine: a closed label set plus a decaying intensity.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Maximum number of `(previous_mood, ts)` pairs kept in `MoodState::history`.
const MAX_HISTORY: usize = 20;

/// A closed enumeration of affective labels.
///
/// `Playful` and `Focused` are this implementation's companion-appropriate
/// extensions of the generic label set (see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    Happy,
    Excited,
    Curious,
    Bored,
    Sad,
    Sleepy,
    Grateful,
    Lonely,
    Intense,
    Cool,
    Playful,
    Focused,
}

impl Mood {
    /// Static face-atlas key for this mood.
    pub fn face(self) -> &'static str {
        match self {
            Mood::Happy => "happy",
            Mood::Excited => "excited",
            Mood::Curious => "curious",
            Mood::Bored => "bored",
            Mood::Sad => "sad",
            Mood::Sleepy => "sleep",
            Mood::Grateful => "grateful",
            Mood::Lonely => "lonely",
            Mood::Intense => "intense",
            Mood::Cool => "cool",
            Mood::Playful => "playful",
            Mood::Focused => "focused",
        }
    }

    /// Static energy level in `[0, 1]`.
    pub fn energy(self) -> f32 {
        match self {
            Mood::Happy => 0.7,
            Mood::Excited => 0.9,
            Mood::Curious => 0.8,
            Mood::Bored => 0.3,
            Mood::Sad => 0.2,
            Mood::Sleepy => 0.1,
            Mood::Grateful => 0.6,
            Mood::Lonely => 0.4,
            Mood::Intense => 0.85,
            Mood::Cool => 0.5,
            Mood::Playful => 0.85,
            Mood::Focused => 0.6,
        }
    }

    /// Short human-readable description used in system-prompt assembly.
    pub fn description(self) -> &'static str {
        match self {
            Mood::Happy => "feeling happy and content",
            Mood::Excited => "feeling excited and energetic",
            Mood::Curious => "feeling curious and inquisitive",
            Mood::Bored => "feeling a bit bored and understimulated",
            Mood::Sad => "feeling somewhat sad or down",
            Mood::Sleepy => "feeling sleepy and low-energy",
            Mood::Grateful => "feeling grateful and warm",
            Mood::Lonely => "feeling lonely and wanting connection",
            Mood::Intense => "feeling focused and intense",
            Mood::Cool => "feeling calm and collected",
            Mood::Playful => "feeling playful and a little silly",
            Mood::Focused => "locked in on the task at hand",
        }
    }
}

/// Current mood plus bounded history of prior moods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoodState {
    pub current: Mood,
    intensity: f32,
    pub last_change_ts: i64,
    pub history: VecDeque<(Mood, i64)>,
}

impl Default for MoodState {
    fn default() -> Self {
        Self {
            current: Mood::Happy,
            intensity: 0.5,
            last_change_ts: chrono::Utc::now().timestamp(),
            history: VecDeque::new(),
        }
    }
}

impl MoodState {
    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    /// Changes the current mood, pushing `(old_current, old_last_change_ts)`
    /// onto `history` and trimming it to the most recent [`MAX_HISTORY`].
    pub fn set_mood(&mut self, mood: Mood, intensity: f32) {
        self.history.push_back((self.current, self.last_change_ts));
        while self.history.len() > MAX_HISTORY {
            self.history.pop_front();
        }

        self.current = mood;
        self.intensity = intensity.clamp(0.0, 1.0);
        self.last_change_ts = chrono::Utc::now().timestamp();
    }

    pub fn adjust_intensity(&mut self, delta: f32) {
        self.intensity = (self.intensity + delta).clamp(0.1, 1.0);
    }

    pub fn set_intensity(&mut self, intensity: f32) {
        self.intensity = intensity.clamp(0.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_caps_at_twenty_entries() {
        let mut state = MoodState::default();
        for _ in 0..30 {
            state.set_mood(Mood::Curious, 0.5);
        }
        assert!(state.history.len() <= MAX_HISTORY);
    }

    #[test]
    fn intensity_always_clamped() {
        let mut state = MoodState::default();
        state.set_mood(Mood::Sad, 5.0);
        assert!(state.intensity() <= 1.0);
        state.set_mood(Mood::Sad, -5.0);
        assert!(state.intensity() >= 0.0);
    }

    #[test]
    fn adjust_intensity_floors_at_point_one() {
        let mut state = MoodState::default();
        state.set_intensity(0.15);
        state.adjust_intensity(-0.5);
        assert!((state.intensity() - 0.1).abs() < 1e-6);
    }
}
