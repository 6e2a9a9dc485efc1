//! Data model and persistent stores for the companion agent: mood,
//! personality, progression/XP, rate limiting, long-term memory and tasks.
//!
//! This crate has no knowledge of LLM providers, MCP, or the network —
//! it is the pure state layer that `companiond` builds behavior on top of.

pub mod error;
pub mod memory;
pub mod mood;
pub mod persistence;
pub mod personality;
pub mod progression;
pub mod rate_limiter;
pub mod tasks;

pub use error::{CoreError, CoreResult};
pub use memory::{Memory, MemoryStore};
pub use mood::{Mood, MoodState};
pub use personality::{Personality, PersonalityTraits, SocialEvent, TaskPriority};
pub use progression::{ChatQuality, LevelCalculator, Progression, XpSource};
pub use rate_limiter::{OperationType, RateLimitConfig, RateLimiter, ThrottleController};
pub use tasks::{Priority, Task, TaskStats, TaskStatus, TaskStore};
