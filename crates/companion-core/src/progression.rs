//! XP, leveling, prestige, achievements and the anti-farming rate limiter.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Named sources of XP gain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum XpSource {
    Greeting,
    QuickChat,
    DeepChat,
    PostDream,
    ReceiveFish,
    SendTelegram,
    ReceiveTelegramReply,
    FirstOfDay,
    TaskCreated,
    TaskCompletedLow,
    TaskCompletedMedium,
    TaskCompletedHigh,
    TaskCompletedUrgent,
    TaskOnTimeBonus,
    TaskStreak3,
    TaskStreak7,
    Achievement,
}

impl XpSource {
    /// Chat-category sources share the single anti-spam cooldown and the
    /// prompt-similarity diminishing-returns check. The cooldown is a single
    /// shared gate across all chat sources, not per-source.
    fn is_chat(self) -> bool {
        matches!(self, XpSource::Greeting | XpSource::QuickChat | XpSource::DeepChat)
    }
}

/// Analysis of one chat turn, used to pick an XP source and base amount.
#[derive(Debug, Clone, Copy)]
pub struct ChatQuality {
    pub message_length: usize,
    pub turn_count: u32,
    pub is_question: bool,
}

impl ChatQuality {
    pub fn calculate_xp(&self) -> (XpSource, i64) {
        if self.message_length < 20 && !self.is_question {
            return (XpSource::Greeting, 2);
        }
        if self.turn_count >= 3 && self.message_length > 50 {
            return (XpSource::DeepChat, 15);
        }
        (XpSource::QuickChat, 5)
    }
}

/// An unlockable achievement/badge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Achievement {
    pub id: String,
    pub name: String,
    pub description: String,
    pub xp_reward: i64,
    pub unlocked: bool,
    pub unlocked_at: Option<i64>,
}

impl Achievement {
    fn new(id: &str, name: &str, description: &str, xp_reward: i64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            xp_reward,
            unlocked: false,
            unlocked_at: None,
        }
    }

    fn unlock(&mut self) -> i64 {
        if self.unlocked {
            return 0;
        }
        self.unlocked = true;
        self.unlocked_at = Some(chrono::Utc::now().timestamp());
        self.xp_reward
    }
}

fn default_achievements() -> HashMap<String, Achievement> {
    let defs = [
        ("first_dream", "Dreamer", "Posted your first dream", 50),
        ("first_telegram", "Pen Pal", "Had your first telegram exchange", 75),
        ("viral_dream", "Viral", "Got 10 fish on a single dream", 100),
        ("streak_7", "Dedicated", "7-day conversation streak", 200),
        ("chat_100", "Conversationalist", "Reached 100 total chats", 300),
        ("legendary", "Legendary", "Reached Level 25", 500),
    ];
    defs.into_iter()
        .map(|(id, name, desc, xp)| (id.to_string(), Achievement::new(id, name, desc, xp)))
        .collect()
}

const MAX_LEVEL: i64 = 25;

/// XP curve and level derivation: `xp_for_level(k) = floor(100 * k^1.8)`.
pub struct LevelCalculator;

impl LevelCalculator {
    pub fn xp_for_level(level: i64) -> i64 {
        if level <= 1 {
            return 0;
        }
        (100.0 * (level as f64).powf(1.8)).floor() as i64
    }

    pub fn level_from_xp(xp: i64) -> i64 {
        if xp <= 0 {
            return 1;
        }
        let mut level = 1;
        while level < MAX_LEVEL {
            if xp < Self::xp_for_level(level + 1) {
                return level;
            }
            level += 1;
        }
        MAX_LEVEL
    }

    pub fn xp_to_next_level(current_xp: i64) -> i64 {
        let level = Self::level_from_xp(current_xp);
        if level >= MAX_LEVEL {
            return 0;
        }
        Self::xp_for_level(level + 1) - current_xp
    }

    pub fn progress_to_next_level(current_xp: i64) -> f64 {
        let level = Self::level_from_xp(current_xp);
        if level >= MAX_LEVEL {
            return 1.0;
        }
        let lo = Self::xp_for_level(level);
        let hi = Self::xp_for_level(level + 1);
        (current_xp - lo) as f64 / (hi - lo) as f64
    }

    pub fn level_name(level: i64) -> &'static str {
        match level {
            l if l <= 2 => "Newborn Companion",
            l if l <= 5 => "Curious Companion",
            l if l <= 10 => "Chatty Companion",
            l if l <= 15 => "Wise Companion",
            l if l <= 20 => "Sage Companion",
            l if l < 25 => "Ancient Companion",
            _ => "Legendary Companion",
        }
    }
}

/// Anti-farming limiter: hourly cap, single shared chat cooldown, and
/// Jaccard-similarity diminishing returns over the last 3 chat prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XpRateLimiter {
    max_xp_per_hour: i64,
    xp_this_hour: i64,
    last_hour_reset_ts: i64,
    recent_prompts: VecDeque<(String, i64)>,
    last_chat_xp_ts: i64,
}

impl Default for XpRateLimiter {
    fn default() -> Self {
        Self {
            max_xp_per_hour: 100,
            xp_this_hour: 0,
            last_hour_reset_ts: chrono::Utc::now().timestamp(),
            recent_prompts: VecDeque::new(),
            last_chat_xp_ts: 0,
        }
    }
}

impl XpRateLimiter {
    fn reset_hour_if_needed(&mut self, now: i64) {
        if now - self.last_hour_reset_ts >= 3600 {
            self.xp_this_hour = 0;
            self.last_hour_reset_ts = now;
            self.recent_prompts.retain(|(_, ts)| now - ts < 3600);
        }
    }

    /// `(can_award, clamped_amount)` for a proposed award.
    pub fn can_award_xp(&mut self, source: XpSource, amount: i64, prompt: Option<&str>) -> (bool, i64) {
        let now = chrono::Utc::now().timestamp();
        self.reset_hour_if_needed(now);

        if self.xp_this_hour >= self.max_xp_per_hour {
            return (false, 0);
        }

        let remaining = self.max_xp_per_hour - self.xp_this_hour;
        let mut amount = amount.min(remaining);

        if source.is_chat() && now - self.last_chat_xp_ts < 5 {
            return (false, 0);
        }

        if let Some(prompt) = prompt {
            if matches!(source, XpSource::QuickChat | XpSource::DeepChat) {
                let similarity = self.prompt_similarity(prompt);
                if similarity > 0.8 {
                    amount /= 2;
                } else if similarity > 0.6 {
                    amount = (amount as f64 * 0.75) as i64;
                }
            }
        }

        (true, amount)
    }

    pub fn record_xp(&mut self, source: XpSource, amount: i64, prompt: Option<&str>) {
        self.xp_this_hour += amount;

        if source.is_chat() {
            self.last_chat_xp_ts = chrono::Utc::now().timestamp();
        }

        if let Some(prompt) = prompt {
            self.recent_prompts.push_back((prompt.to_lowercase(), chrono::Utc::now().timestamp()));
            while self.recent_prompts.len() > 10 {
                self.recent_prompts.pop_front();
            }
        }
    }

    fn prompt_similarity(&self, prompt: &str) -> f64 {
        let prompt_words: std::collections::HashSet<&str> = prompt.to_lowercase().split_whitespace().collect::<Vec<_>>().into_iter().collect();
        if prompt_words.len() < 2 {
            return 0.0;
        }

        let mut max_similarity: f64 = 0.0;

        for (prev, _) in self.recent_prompts.iter().rev().take(3) {
            let prev_words: std::collections::HashSet<&str> = prev.split_whitespace().collect();
            if prev_words.len() < 2 {
                continue;
            }
            let overlap = prompt_words.intersection(&prev_words).count();
            let denom = prompt_words.len().max(prev_words.len());
            let similarity = overlap as f64 / denom as f64;
            max_similarity = max_similarity.max(similarity);
        }

        max_similarity
    }
}

/// Main progression tracker: XP, level, prestige, achievements, streaks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progression {
    pub xp: i64,
    pub level: i64,
    pub prestige: i64,
    pub badges: Vec<String>,
    pub xp_history: VecDeque<XpHistoryEntry>,
    pub achievements: HashMap<String, Achievement>,
    pub last_interaction_date: Option<String>,
    pub current_streak: i64,
    rate_limiter: XpRateLimiter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XpHistoryEntry {
    pub timestamp: i64,
    pub source: String,
    pub amount: i64,
}

impl Default for Progression {
    fn default() -> Self {
        Self {
            xp: 0,
            level: 1,
            prestige: 0,
            badges: Vec::new(),
            xp_history: VecDeque::new(),
            achievements: default_achievements(),
            last_interaction_date: None,
            current_streak: 0,
            rate_limiter: XpRateLimiter::default(),
        }
    }
}

impl Progression {
    fn xp_multiplier(&self) -> f64 {
        1.0 + self.prestige as f64
    }

    /// Awards XP from `source`, applying the prestige multiplier and the
    /// anti-farming limiter. Returns `(awarded, actual_amount)`.
    pub fn award_xp(&mut self, source: XpSource, base_amount: i64, prompt: Option<&str>) -> (bool, i64) {
        let amount = (base_amount as f64 * self.xp_multiplier()).floor() as i64;
        let (can_award, actual_amount) = self.rate_limiter.can_award_xp(source, amount, prompt);

        if !can_award || actual_amount <= 0 {
            return (false, 0);
        }

        let old_level = self.level;
        self.xp += actual_amount;
        self.level = LevelCalculator::level_from_xp(self.xp);

        self.xp_history.push_back(XpHistoryEntry {
            timestamp: chrono::Utc::now().timestamp(),
            source: format!("{:?}", source),
            amount: actual_amount,
        });
        while self.xp_history.len() > 50 {
            self.xp_history.pop_front();
        }

        self.rate_limiter.record_xp(source, actual_amount, prompt);

        if self.level > old_level {
            self.on_level_up(old_level, self.level);
        }

        (true, actual_amount)
    }

    fn on_level_up(&mut self, _old_level: i64, new_level: i64) {
        if new_level == MAX_LEVEL {
            self.unlock_achievement("legendary");
        }
    }

    /// Unlocks an achievement, bypassing the XP rate limiter.
    pub fn unlock_achievement(&mut self, achievement_id: &str) -> i64 {
        let Some(achievement) = self.achievements.get_mut(achievement_id) else {
            return 0;
        };
        let xp_reward = achievement.unlock();
        if xp_reward <= 0 {
            return 0;
        }

        if !self.badges.iter().any(|b| b == achievement_id) {
            self.badges.push(achievement_id.to_string());
        }

        let old_level = self.level;
        self.xp += xp_reward;
        self.level = LevelCalculator::level_from_xp(self.xp);

        self.xp_history.push_back(XpHistoryEntry {
            timestamp: chrono::Utc::now().timestamp(),
            source: "achievement".to_string(),
            amount: xp_reward,
        });
        while self.xp_history.len() > 50 {
            self.xp_history.pop_front();
        }

        if self.level > old_level {
            self.on_level_up(old_level, self.level);
        }

        xp_reward
    }

    pub fn check_chat_achievement(&mut self, chat_count: u64) {
        if chat_count >= 100 {
            self.unlock_achievement("chat_100");
        }
    }

    /// Updates the daily streak; returns `true` if this is the first
    /// interaction of the calendar day (caller may award a daily bonus).
    pub fn update_streak(&mut self) -> bool {
        let today = chrono::Local::now().format("%Y-%m-%d").to_string();

        if self.last_interaction_date.as_deref() == Some(today.as_str()) {
            return false;
        }

        if let Some(last) = &self.last_interaction_date {
            if let (Ok(last_date), Ok(today_date)) = (
                chrono::NaiveDate::parse_from_str(last, "%Y-%m-%d"),
                chrono::NaiveDate::parse_from_str(&today, "%Y-%m-%d"),
            ) {
                let diff = (today_date - last_date).num_days();
                self.current_streak = if diff == 1 { self.current_streak + 1 } else { 1 };
            } else {
                self.current_streak = 1;
            }
        } else {
            self.current_streak = 1;
        }

        self.last_interaction_date = Some(today);

        if self.current_streak >= 7 {
            self.unlock_achievement("streak_7");
        }

        true
    }

    pub fn can_prestige(&self) -> bool {
        self.level >= MAX_LEVEL && self.prestige < 10
    }

    /// Resets to L1/0 XP, preserving badges and achievements, and bumps the
    /// prestige multiplier. Irreversible.
    pub fn do_prestige(&mut self) -> bool {
        if !self.can_prestige() {
            return false;
        }

        self.prestige += 1;
        self.level = 1;
        self.xp = 0;

        let badge = format!("prestige_{}", self.prestige);
        if !self.badges.iter().any(|b| b == &badge) {
            self.badges.push(badge);
        }

        true
    }

    pub fn display_level(&self) -> String {
        if self.prestige > 0 {
            format!("L{} {}", self.level, "\u{2b50}".repeat(self.prestige as usize))
        } else {
            format!("L{}", self.level)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xp_for_level_matches_curve() {
        assert_eq!(LevelCalculator::xp_for_level(1), 0);
        assert_eq!(LevelCalculator::xp_for_level(2), (100.0 * 2f64.powf(1.8)).floor() as i64);
    }

    #[test]
    fn level_derivation_is_consistent_with_curve() {
        for xp in [0, 50, 500, 5000, 50000, 1_000_000] {
            let level = LevelCalculator::level_from_xp(xp);
            assert!(LevelCalculator::xp_for_level(level) <= xp || level == 1);
            if level < 25 {
                assert!(LevelCalculator::xp_for_level(level + 1) > xp);
            }
        }
    }

    #[test]
    fn chat_xp_gated_by_five_second_shared_cooldown() {
        let mut p = Progression::default();
        let (awarded1, _) = p.award_xp(XpSource::QuickChat, 5, Some("hello there"));
        assert!(awarded1);
        let (awarded2, amount2) = p.award_xp(XpSource::Greeting, 2, Some("hi"));
        assert!(!awarded2);
        assert_eq!(amount2, 0);
    }

    #[test]
    fn social_sources_bypass_chat_cooldown() {
        let mut p = Progression::default();
        let (awarded1, _) = p.award_xp(XpSource::QuickChat, 5, Some("hello there"));
        assert!(awarded1);
        let (awarded2, amount2) = p.award_xp(XpSource::PostDream, 10, None);
        assert!(awarded2);
        assert_eq!(amount2, 10);
    }

    #[test]
    fn hourly_cap_clamps_award() {
        let mut p = Progression::default();
        p.award_xp(XpSource::PostDream, 90, None);
        let (awarded, amount) = p.award_xp(XpSource::PostDream, 90, None);
        assert!(awarded);
        assert_eq!(amount, 10);
    }

    #[test]
    fn prestige_resets_and_preserves_badges() {
        let mut p = Progression::default();
        p.xp = 100_000;
        p.level = 25;
        p.badges.push("chat_100".to_string());

        assert!(p.can_prestige());
        assert!(p.do_prestige());

        assert_eq!(p.level, 1);
        assert_eq!(p.xp, 0);
        assert_eq!(p.prestige, 1);
        assert!(p.badges.contains(&"chat_100".to_string()));
        assert!(p.badges.contains(&"prestige_1".to_string()));

        let (awarded, amount) = p.award_xp(XpSource::PostDream, 5, None);
        assert!(awarded);
        assert_eq!(amount, 10);
    }

    #[test]
    fn achievement_unlock_bypasses_rate_limiter() {
        let mut p = Progression::default();
        p.award_xp(XpSource::PostDream, 100, None);
        let reward = p.unlock_achievement("first_dream");
        assert_eq!(reward, 50);
        assert!(p.badges.contains(&"first_dream".to_string()));

        let reward_again = p.unlock_achievement("first_dream");
        assert_eq!(reward_again, 0);
    }

    #[test]
    fn streak_increments_on_consecutive_days_only() {
        let mut p = Progression::default();
        assert!(p.update_streak());
        assert_eq!(p.current_streak, 1);
        assert!(!p.update_streak());
    }
}
