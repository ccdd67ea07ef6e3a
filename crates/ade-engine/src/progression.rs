//! Stability-gated progression
//!
//! A unit unlocks only when mastery is high enough AND recent performance
//! shows it was not luck: good recent accuracy, a short correct streak, or a
//! clean first-try success at non-trivial difficulty.

use serde::{Deserialize, Serialize};
use tracing::debug;

use ade_core::{AdeError, AttemptRecord, Result, StudentId, UnitId};
use ade_rl::LearnerTopicState;

use crate::repository::{ProgressionRepository, TopicInfo, UnitRef};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressionConfig {
    pub min_mastery: f64,
    /// Share of correct answers over the accuracy window
    pub accuracy_threshold: f64,
    pub accuracy_window: usize,
    /// Attempts of history handed to the gate
    pub history_limit: usize,
    pub min_streak: u32,
    pub clean_success_difficulty: u8,
}

impl Default for ProgressionConfig {
    fn default() -> Self {
        Self {
            min_mastery: 60.0,
            accuracy_threshold: 0.7,
            accuracy_window: 5,
            history_limit: 10,
            min_streak: 2,
            clean_success_difficulty: 3,
        }
    }
}

impl ProgressionConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.min_mastery) {
            return Err(AdeError::Config(format!(
                "progression.min_mastery must be in [0, 100], got {}",
                self.min_mastery
            )));
        }
        if !(0.0..=1.0).contains(&self.accuracy_threshold) {
            return Err(AdeError::Config(format!(
                "progression.accuracy_threshold must be in [0, 1], got {}",
                self.accuracy_threshold
            )));
        }
        if self.accuracy_window == 0 || self.history_limit < self.accuracy_window {
            return Err(AdeError::Config(
                "progression.history_limit must be at least accuracy_window, which must be positive"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Stability signals, any one of which suffices alongside mastery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StabilityCondition {
    RecentAccuracy,
    ConsecutiveCorrect,
    CleanSuccess,
}

impl StabilityCondition {
    pub fn as_str(self) -> &'static str {
        match self {
            StabilityCondition::RecentAccuracy => "recentAccuracy",
            StabilityCondition::ConsecutiveCorrect => "consecutiveCorrect",
            StabilityCondition::CleanSuccess => "cleanSuccess",
        }
    }
}

/// Result of an unlock check; derived on demand, never stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityCheck {
    pub meets: bool,
    pub reason: String,
    pub conditions_met: Vec<StabilityCondition>,
}

/// Payload announcing a newly unlocked unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockNotification {
    pub unit_id: UnitId,
    pub display_name: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ProgressionGate {
    config: ProgressionConfig,
}

impl ProgressionGate {
    pub fn new(config: ProgressionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProgressionConfig {
        &self.config
    }

    /// Evaluate the gate against a state and its recent attempts (most recent last)
    pub fn check_unlock(&self, state: &LearnerTopicState, history: &[AttemptRecord]) -> StabilityCheck {
        let c = &self.config;
        let mastery = state.mastery.value();
        let start = history.len().saturating_sub(c.history_limit);
        let history = &history[start..];

        let mut conditions_met = Vec::new();

        let window = &history[history.len().saturating_sub(c.accuracy_window)..];
        if !window.is_empty() {
            let correct = window.iter().filter(|a| a.was_correct).count();
            let accuracy = correct as f64 / window.len() as f64;
            if accuracy >= c.accuracy_threshold {
                conditions_met.push(StabilityCondition::RecentAccuracy);
            }
        }

        if state.correct_streak >= c.min_streak {
            conditions_met.push(StabilityCondition::ConsecutiveCorrect);
        }

        if let Some(last) = history.last() {
            if last.was_correct
                && !last.hint_used
                && state.wrong_streak == 0
                && last.difficulty.level() >= c.clean_success_difficulty
            {
                conditions_met.push(StabilityCondition::CleanSuccess);
            }
        }

        if mastery < c.min_mastery {
            return StabilityCheck {
                meets: false,
                reason: format!("Mastery {mastery:.2} is below the {:.0} required", c.min_mastery),
                conditions_met,
            };
        }

        if conditions_met.is_empty() {
            return StabilityCheck {
                meets: false,
                reason: format!(
                    "Mastery {mastery:.2} reached but recent performance is not yet stable"
                ),
                conditions_met,
            };
        }

        let cited: Vec<&str> = conditions_met.iter().map(|c| c.as_str()).collect();
        StabilityCheck {
            meets: true,
            reason: format!("Stable mastery {mastery:.2} ({})", cited.join(", ")),
            conditions_met,
        }
    }

    /// The topic's next unit, if the gate is met and it is not unlocked yet.
    ///
    /// Nothing is written here; the unlock is committed together with the answer.
    pub async fn pending_unlock<'t>(
        &self,
        repo: &dyn ProgressionRepository,
        student: &StudentId,
        topic: &'t TopicInfo,
        check: &StabilityCheck,
    ) -> Result<Option<&'t UnitRef>> {
        if !check.meets {
            return Ok(None);
        }
        let Some(unit) = &topic.next_unit else {
            return Ok(None);
        };

        if repo.is_unlocked(student, &unit.id).await? {
            debug!(student = %student, unit = %unit.id, "Unit already unlocked");
            return Ok(None);
        }
        Ok(Some(unit))
    }

    /// Payload announcing `unit`, reached by mastering `topic`
    pub fn notification(&self, topic: &TopicInfo, unit: &UnitRef) -> UnlockNotification {
        UnlockNotification {
            unit_id: unit.id.clone(),
            display_name: unit.display_name.clone(),
            message: format!(
                "Great work on {}! You've unlocked {}.",
                topic.name, unit.display_name
            ),
        }
    }
}
